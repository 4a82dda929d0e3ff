//! Environment-driven agent configuration
//!
//! All knobs come from environment variables with working defaults for a
//! local deployment, except the chain account, which has no sensible
//! default and is required. Invalid values are fatal at startup.

use std::path::PathBuf;
use std::time::Duration;

use anchor_pipeline::adapters::{AnchorChainConfig, ChainNetwork, ObjectStoreConfig, RedisConfig};
use anchor_pipeline::{BatchingConfig, PipelineConfig, PipelineError};

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub pipeline: PipelineConfig,
    pub broker: RedisConfig,
    pub object_store: ObjectStoreConfig,
    pub chain: AnchorChainConfig,
    pub network: ChainNetwork,
    /// Path of the account credential file.
    pub credential_path: PathBuf,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let get_or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let organization_id = get_or("ANCHOR_ORG_ID", "demo-org");
        let network = ChainNetwork::parse(&get_or("ANCHOR_NETWORK", "testnet"))?;

        let batching = BatchingConfig {
            max_batch_size: parse_number(&get, "MAX_BATCH_SIZE", 1000)?,
            min_batch_size: parse_number(&get, "MIN_BATCH_SIZE", 1)?,
            idle_timeout: Duration::from_secs(parse_number(&get, "IDLE_TIMEOUT_SECS", 60)?),
            force_seal_after: Duration::from_secs(parse_number(
                &get,
                "FORCE_SEAL_AFTER_SECS",
                300,
            )?),
        };
        batching.validate()?;

        let pipeline = PipelineConfig {
            organization_id: organization_id.clone(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            stream_pattern: get_or("STREAM_PATTERN", "cdc.public.*"),
            consumer_group: get_or("CONSUMER_GROUP", "anchor-agent"),
            consumer_name: get_or("CONSUMER_NAME", "agent-1"),
            batching,
            ..PipelineConfig::default()
        };

        let broker = RedisConfig {
            host: get_or("BROKER_HOST", "localhost"),
            port: parse_number(&get, "BROKER_PORT", 6379_u64)? as u16,
            password: get("BROKER_PASSWORD"),
        };

        let endpoint = get("OBJECT_STORE_ENDPOINT");
        let object_store = ObjectStoreConfig {
            bucket: get("OBJECT_STORE_BUCKET")
                .unwrap_or_else(|| format!("anchor-{organization_id}")),
            region: get_or("OBJECT_STORE_REGION", "us-west-2"),
            // S3-compatible endpoints want path-style addressing.
            path_style: endpoint.is_some(),
            endpoint,
            access_key_id: get("OBJECT_STORE_ACCESS_KEY"),
            secret_access_key: get("OBJECT_STORE_SECRET_KEY"),
            ..ObjectStoreConfig::default()
        };

        let account = get("CHAIN_ACCOUNT").ok_or_else(|| {
            PipelineError::Configuration("CHAIN_ACCOUNT must be set".to_string())
        })?;

        let chain = AnchorChainConfig {
            endpoint: get("CHAIN_ENDPOINT")
                .unwrap_or_else(|| network.default_endpoint().to_string()),
            account: account.clone(),
            attempt_timeout: Duration::from_secs(30),
        };

        let credentials_dir = get("CHAIN_CREDENTIALS_DIR")
            .map(PathBuf::from)
            .or_else(|| get("HOME").map(|home| PathBuf::from(home).join(".chain-credentials")))
            .ok_or_else(|| {
                PipelineError::Configuration(
                    "cannot locate credentials: set CHAIN_CREDENTIALS_DIR or HOME".to_string(),
                )
            })?;
        let credential_path = credentials_dir
            .join(network.as_str())
            .join(format!("{account}.json"));

        Ok(Self {
            pipeline,
            broker,
            object_store,
            chain,
            network,
            credential_path,
        })
    }
}

fn parse_number<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, PipelineError>
where
    T: std::str::FromStr + Copy,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            PipelineError::Configuration(format!("{name} is not a valid number: {raw:?}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config_from(pairs: &[(&str, &str)]) -> Result<AgentConfig, PipelineError> {
        let map = vars(pairs);
        AgentConfig::from_vars(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[
            ("CHAIN_ACCOUNT", "org.testnet"),
            ("HOME", "/home/agent"),
        ])
        .unwrap();

        assert_eq!(config.pipeline.organization_id, "demo-org");
        assert_eq!(config.pipeline.stream_pattern, "cdc.public.*");
        assert_eq!(config.pipeline.batching.max_batch_size, 1000);
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 6379);
        assert_eq!(config.object_store.bucket, "anchor-demo-org");
        assert_eq!(config.network, ChainNetwork::Testnet);
        assert_eq!(
            config.credential_path,
            PathBuf::from("/home/agent/.chain-credentials/testnet/org.testnet.json")
        );
    }

    #[test]
    fn test_missing_account_is_fatal() {
        let err = config_from(&[("HOME", "/home/agent")]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_invalid_number_is_fatal() {
        let err = config_from(&[
            ("CHAIN_ACCOUNT", "org.testnet"),
            ("HOME", "/home/agent"),
            ("MAX_BATCH_SIZE", "lots"),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_invalid_batching_is_fatal() {
        let err = config_from(&[
            ("CHAIN_ACCOUNT", "org.testnet"),
            ("HOME", "/home/agent"),
            ("MIN_BATCH_SIZE", "50"),
            ("MAX_BATCH_SIZE", "10"),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_explicit_endpoint_enables_path_style() {
        let config = config_from(&[
            ("CHAIN_ACCOUNT", "org.testnet"),
            ("HOME", "/home/agent"),
            ("OBJECT_STORE_ENDPOINT", "http://localhost:9000"),
            ("OBJECT_STORE_BUCKET", "audit-artifacts"),
        ])
        .unwrap();

        assert!(config.object_store.path_style);
        assert_eq!(config.object_store.bucket, "audit-artifacts");
    }

    #[test]
    fn test_mainnet_selects_mainnet_endpoint() {
        let config = config_from(&[
            ("CHAIN_ACCOUNT", "org.mainnet"),
            ("HOME", "/home/agent"),
            ("ANCHOR_NETWORK", "mainnet"),
        ])
        .unwrap();
        assert_eq!(
            config.chain.endpoint,
            ChainNetwork::Mainnet.default_endpoint()
        );
    }

    #[test]
    fn test_chain_endpoint_override() {
        let config = config_from(&[
            ("CHAIN_ACCOUNT", "org.testnet"),
            ("HOME", "/home/agent"),
            ("CHAIN_ENDPOINT", "http://localhost:3030"),
        ])
        .unwrap();
        assert_eq!(config.chain.endpoint, "http://localhost:3030");
    }
}
