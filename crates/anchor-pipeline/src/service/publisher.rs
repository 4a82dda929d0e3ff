//! Artifact publication policy
//!
//! Upload ordering is the commit protocol: the supporting documents
//! (standalone tree, indices) go up first, `batch-data.json` goes up last.
//! The read side treats the presence of the batch body as the marker that
//! a batch exists and is queryable, so a reader can never observe a body
//! whose tree and indices are missing. On any failure the publisher
//! deletes whatever it already wrote, best effort, and reports the error.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::artifacts::ArtifactSet;
use crate::error::StoreError;
use crate::ports::ObjectStore;

const CONTENT_TYPE_JSON: &str = "application/json";

/// Uploads artifact sets with the ordering and cleanup policy above.
pub struct ArtifactPublisher<S: ObjectStore> {
    store: Arc<S>,
}

impl<S: ObjectStore> ArtifactPublisher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Upload a full artifact set. Returns only after the commit marker is
    /// stored, or after cleanup of a failed attempt.
    pub async fn publish(&self, set: &ArtifactSet) -> Result<(), StoreError> {
        let supporting = try_join_all(set.supporting_documents().map(|doc| {
            self.store
                .put_object(&doc.key, doc.bytes.clone(), CONTENT_TYPE_JSON)
        }))
        .await;

        let result = match supporting {
            Ok(_) => {
                self.store
                    .put_object(
                        &set.batch_data.key,
                        set.batch_data.bytes.clone(),
                        CONTENT_TYPE_JSON,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(prefix = %set.key_prefix, "artifact set uploaded");
                Ok(())
            }
            Err(e) => {
                warn!(prefix = %set.key_prefix, error = %e, "upload failed, removing partial artifacts");
                self.cleanup(set).await;
                Err(e)
            }
        }
    }

    async fn cleanup(&self, set: &ArtifactSet) {
        for key in set.all_keys() {
            if let Err(e) = self.store.delete_object(&key).await {
                warn!(key = %key, error = %e, "cleanup delete failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryObjectStore, StoreOp};
    use crate::artifacts::ArtifactDocument;

    fn artifact_set() -> ArtifactSet {
        let doc = |key: &str| ArtifactDocument {
            key: key.to_string(),
            bytes: b"{}".to_vec(),
        };
        ArtifactSet {
            key_prefix: "db/t/BATCH-X".to_string(),
            merkle_tree: doc("db/t/BATCH-X/merkle-tree.json"),
            indices: vec![
                doc("db/t/BATCH-X/indices/by_timestamp.json"),
                doc("db/t/BATCH-X/indices/by_operation.json"),
                doc("db/t/BATCH-X/indices/by_date.json"),
            ],
            batch_data: doc("db/t/BATCH-X/batch-data.json"),
        }
    }

    #[tokio::test]
    async fn test_marker_uploaded_last() {
        let store = Arc::new(InMemoryObjectStore::new("bucket"));
        let publisher = ArtifactPublisher::new(Arc::clone(&store));

        publisher.publish(&artifact_set()).await.unwrap();

        let puts: Vec<String> = store
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Put(key) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(puts.len(), 5);
        assert_eq!(puts.last().unwrap(), "db/t/BATCH-X/batch-data.json");
        assert_eq!(store.object_count(), 5);
    }

    #[tokio::test]
    async fn test_failed_marker_cleans_up_supporting_documents() {
        let store = Arc::new(InMemoryObjectStore::new("bucket"));
        store.fail_uploads_matching("batch-data.json");
        let publisher = ArtifactPublisher::new(Arc::clone(&store));

        let err = publisher.publish(&artifact_set()).await.unwrap_err();
        assert!(matches!(err, StoreError::UploadFailed { .. }));
        // The four supporting documents were written and then removed.
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_supporting_upload_reports_error() {
        let store = Arc::new(InMemoryObjectStore::new("bucket"));
        store.fail_uploads_matching("by_operation.json");
        let publisher = ArtifactPublisher::new(Arc::clone(&store));

        assert!(publisher.publish(&artifact_set()).await.is_err());
        // Whatever landed before the failure is gone again.
        assert_eq!(store.object_count(), 0);
        // The marker was never attempted.
        assert!(!store
            .operations()
            .iter()
            .any(|op| matches!(op, StoreOp::Put(k) if k.ends_with("batch-data.json"))));
    }
}
