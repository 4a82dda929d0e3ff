//! Mint retry policy
//!
//! Wraps the anchor contract capability with bounded retries and
//! exponential backoff. An "already minted" reply is a successful replay:
//! the token id equals the batch id, so a duplicate call after a crash or
//! redelivery hits the same token and must not be treated as a failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{AnchorError, PipelineError};
use crate::ports::{AnchorClient, MintReceipt, MintRequest};

/// Mints batches with up to three attempts, backing off 1s/2s between them.
pub struct AnchorMinter<A: AnchorClient> {
    client: Arc<A>,
    max_attempts: u32,
    base_delay: Duration,
}

impl<A: AnchorClient> AnchorMinter<A> {
    pub fn new(client: Arc<A>) -> Self {
        Self::with_policy(client, 3, Duration::from_secs(1))
    }

    pub fn with_policy(client: Arc<A>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub async fn mint(&self, request: &MintRequest) -> Result<MintReceipt, PipelineError> {
        let mut delay = self.base_delay;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.client.mint_batch(request).await {
                Ok(receipt) => {
                    info!(
                        token_id = %request.token_id,
                        tx_hash = %receipt.tx_hash,
                        attempt,
                        "token minted"
                    );
                    return Ok(receipt);
                }
                Err(AnchorError::AlreadyMinted { token_id }) => {
                    info!(token_id = %token_id, "token already minted, treating as success");
                    return Ok(MintReceipt {
                        token_id,
                        replayed: true,
                        ..MintReceipt::default()
                    });
                }
                Err(e) => {
                    warn!(
                        token_id = %request.token_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "mint attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(PipelineError::MintFailed {
            token_id: request.token_id.clone(),
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryAnchorClient;
    use crate::ports::{BatchSummary, OperationCounts, TokenMetadata};

    fn request(token_id: &str) -> MintRequest {
        MintRequest {
            token_id: token_id.to_string(),
            receiver: "org.testnet".to_string(),
            token_metadata: TokenMetadata {
                title: format!("Anchor Batch {token_id}"),
                description: "test".to_string(),
                copies: 1,
                issued_at: "0".to_string(),
                reference: "https://store/batch-data.json".to_string(),
            },
            batch_summary: BatchSummary {
                database_name: "ledger".to_string(),
                table_names: vec!["accounts".to_string()],
                timestamp: 0,
                tx_count: 1,
                merkle_root: "00".repeat(32),
                object_store_bucket: "bucket".to_string(),
                object_store_key_prefix: "ledger/accounts/X/".to_string(),
                size_bytes: 2,
                operation_counts: OperationCounts::default(),
            },
        }
    }

    fn minter(client: Arc<InMemoryAnchorClient>) -> AnchorMinter<InMemoryAnchorClient> {
        AnchorMinter::with_policy(client, 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_mint_succeeds_first_try() {
        let client = Arc::new(InMemoryAnchorClient::new("org.testnet"));
        let receipt = minter(Arc::clone(&client))
            .mint(&request("BATCH-1"))
            .await
            .unwrap();
        assert!(!receipt.replayed);
        assert!(client.is_minted("BATCH-1"));
    }

    #[tokio::test]
    async fn test_mint_recovers_after_transient_failures() {
        let client = Arc::new(InMemoryAnchorClient::new("org.testnet"));
        client.fail_next_calls(2);

        let receipt = minter(Arc::clone(&client))
            .mint(&request("BATCH-2"))
            .await
            .unwrap();
        assert!(!receipt.replayed);
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mint_fails_after_exhausting_attempts() {
        let client = Arc::new(InMemoryAnchorClient::new("org.testnet"));
        client.fail_next_calls(5);

        let err = minter(Arc::clone(&client))
            .mint(&request("BATCH-3"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MintFailed { .. }));
        assert_eq!(client.call_count(), 3);
        assert!(!client.is_minted("BATCH-3"));
    }

    #[tokio::test]
    async fn test_already_minted_is_success() {
        let client = Arc::new(InMemoryAnchorClient::new("org.testnet"));
        let m = minter(Arc::clone(&client));

        m.mint(&request("BATCH-4")).await.unwrap();
        let replay = m.mint(&request("BATCH-4")).await.unwrap();

        assert!(replay.replayed);
        assert_eq!(replay.token_id, "BATCH-4");
    }
}
