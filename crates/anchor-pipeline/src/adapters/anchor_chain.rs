//! Blockchain anchor adapter
//!
//! Talks to the contract gateway over HTTP: one JSON call per mint, signed
//! server-side with the account credential loaded at startup. The gateway
//! is idempotent on token id and reports a replayed mint as a dedicated
//! error, which this adapter surfaces as [`AnchorError::AlreadyMinted`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{AnchorError, PipelineError};
use crate::ports::{AnchorClient, MintReceipt, MintRequest};

/// Target chain network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainNetwork {
    Testnet,
    Mainnet,
}

impl ChainNetwork {
    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        match value {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(PipelineError::Configuration(format!(
                "unknown network {other:?}, expected testnet or mainnet"
            ))),
        }
    }

    /// Default gateway endpoint for the network.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Testnet => "https://rpc.testnet.anchorline.dev",
            Self::Mainnet => "https://rpc.mainnet.anchorline.dev",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

/// Account credential as written by the chain CLI: a JSON file holding the
/// account id and its private key.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainCredential {
    pub account_id: String,
    #[serde(alias = "secret_key")]
    pub private_key: String,
}

impl ChainCredential {
    /// Load the credential file for an account. Missing or unreadable
    /// credentials are fatal at startup.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot read credential file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Configuration(format!(
                "invalid credential file {}: {e}",
                path.display()
            ))
        })
    }
}

/// Gateway connection parameters.
#[derive(Debug, Clone)]
pub struct AnchorChainConfig {
    pub endpoint: String,
    /// Contract account; also the token receiver.
    pub account: String,
    pub attempt_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GatewayReply {
    result: Option<GatewayResult>,
    error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
struct GatewayResult {
    transaction_hash: String,
    #[serde(default)]
    block_height: String,
    #[serde(default)]
    gas_burnt: String,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: String,
    message: String,
}

/// HTTP implementation of the anchor contract capability.
pub struct HttpAnchorClient {
    config: AnchorChainConfig,
    credential: ChainCredential,
    client: reqwest::Client,
}

impl HttpAnchorClient {
    pub fn new(
        config: AnchorChainConfig,
        credential: ChainCredential,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("http client: {e}")))?;

        info!(
            endpoint = %config.endpoint,
            account = %config.account,
            "anchor client initialized"
        );
        Ok(Self {
            config,
            credential,
            client,
        })
    }
}

#[async_trait]
impl AnchorClient for HttpAnchorClient {
    fn owner(&self) -> &str {
        &self.config.account
    }

    async fn mint_batch(&self, request: &MintRequest) -> Result<MintReceipt, AnchorError> {
        let body = json!({
            "method": "mint_batch",
            "contract_id": self.config.account,
            "signer_id": self.credential.account_id,
            "args": request,
        });

        debug!(token_id = %request.token_id, "submitting mint call");
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnchorError::Timeout {
                        seconds: self.config.attempt_timeout.as_secs(),
                    }
                } else {
                    AnchorError::CallFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AnchorError::CallFailed(format!("{status} - {text}")));
        }

        let reply: GatewayReply = response
            .json()
            .await
            .map_err(|e| AnchorError::CallFailed(format!("unreadable reply: {e}")))?;

        if let Some(error) = reply.error {
            return Err(classify_gateway_error(
                &error.code,
                &error.message,
                &request.token_id,
            ));
        }

        let result = reply
            .result
            .ok_or_else(|| AnchorError::CallFailed("reply carries no result".to_string()))?;

        Ok(MintReceipt {
            token_id: request.token_id.clone(),
            tx_hash: result.transaction_hash,
            block_height: result.block_height,
            gas_used: result.gas_burnt,
            replayed: false,
        })
    }
}

/// Map a gateway error to the capability error. Replayed token ids come
/// back either as a dedicated code or as an "already minted" message.
fn classify_gateway_error(code: &str, message: &str, token_id: &str) -> AnchorError {
    let lowered = message.to_ascii_lowercase();
    if code == "ALREADY_MINTED" || lowered.contains("already minted") || lowered.contains("already exists")
    {
        AnchorError::AlreadyMinted {
            token_id: token_id.to_string(),
        }
    } else {
        AnchorError::CallFailed(format!("{code}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!(
            ChainNetwork::parse("testnet").unwrap(),
            ChainNetwork::Testnet
        );
        assert_eq!(
            ChainNetwork::parse("mainnet").unwrap(),
            ChainNetwork::Mainnet
        );
        assert!(ChainNetwork::parse("devnet").is_err());
    }

    #[test]
    fn test_network_endpoints_differ() {
        assert_ne!(
            ChainNetwork::Testnet.default_endpoint(),
            ChainNetwork::Mainnet.default_endpoint()
        );
    }

    #[test]
    fn test_credential_accepts_both_key_fields() {
        let with_private: ChainCredential =
            serde_json::from_str(r#"{"account_id":"org.testnet","private_key":"ed25519:abc"}"#)
                .unwrap();
        assert_eq!(with_private.account_id, "org.testnet");
        assert_eq!(with_private.private_key, "ed25519:abc");

        let with_secret: ChainCredential =
            serde_json::from_str(r#"{"account_id":"org.testnet","secret_key":"ed25519:def"}"#)
                .unwrap();
        assert_eq!(with_secret.private_key, "ed25519:def");
    }

    #[test]
    fn test_missing_credential_file_is_configuration_error() {
        let err = ChainCredential::load(Path::new("/nonexistent/credentials.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_gateway_error_classification() {
        assert!(classify_gateway_error("ALREADY_MINTED", "token BATCH-1 exists", "BATCH-1")
            .is_already_minted());
        assert!(
            classify_gateway_error("", "Token already minted: BATCH-1", "BATCH-1")
                .is_already_minted()
        );
        assert!(!classify_gateway_error("", "insufficient balance", "BATCH-1")
            .is_already_minted());
    }
}
