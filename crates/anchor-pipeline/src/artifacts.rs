//! Artifact composition
//!
//! Turns one sealed batch into the three object-store documents: the batch
//! body, the standalone Merkle tree, and the lookup indices. The tree is
//! duplicated into its own document so a verifier holding only a root and
//! a proof never has to download the transaction list.
//!
//! Documents are stable-serialized: object keys sorted recursively, compact
//! separators, UTF-8. Composing the same batch twice yields identical
//! bytes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::domain::batch::{Batch, BatchIndices, MerkleLeaf, TransactionMetadata};
use crate::domain::merkle::MerkleProof;

const TREE_ALGORITHM: &str = "sha256";

/// One composed document, addressed by its full object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDocument {
    pub key: String,
    pub bytes: Vec<u8>,
}

/// The full artifact set for one batch. `batch_data` is the commit marker
/// and must be uploaded after everything else.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    /// `<database>/<table>/<batch_id>`
    pub key_prefix: String,
    pub merkle_tree: ArtifactDocument,
    pub indices: Vec<ArtifactDocument>,
    pub batch_data: ArtifactDocument,
}

impl ArtifactSet {
    /// The documents uploaded ahead of the commit marker.
    pub fn supporting_documents(&self) -> impl Iterator<Item = &ArtifactDocument> {
        std::iter::once(&self.merkle_tree).chain(self.indices.iter())
    }

    /// Every key in the set, supporting documents first.
    pub fn all_keys(&self) -> Vec<String> {
        self.supporting_documents()
            .map(|d| d.key.clone())
            .chain(std::iter::once(self.batch_data.key.clone()))
            .collect()
    }

    /// Size of the batch body document in bytes.
    pub fn batch_data_size(&self) -> u64 {
        self.batch_data.bytes.len() as u64
    }
}

#[derive(Serialize)]
struct BatchInfo<'a> {
    batch_id: &'a str,
    created_at: i64,
    organization_id: &'a str,
    database_name: &'a str,
    table_names: &'a [String],
    agent_version: &'a str,
}

#[derive(Serialize)]
struct TransactionDocument<'a> {
    metadata: &'a TransactionMetadata,
    merkle_leaf: &'a MerkleLeaf,
}

#[derive(Serialize)]
struct MerkleTreeDocument<'a> {
    algorithm: &'a str,
    root: &'a str,
    height: usize,
    nodes: &'a [Vec<String>],
    proof_index: BTreeMap<String, &'a MerkleProof>,
}

#[derive(Serialize)]
struct BatchDocument<'a> {
    batch_info: BatchInfo<'a>,
    transactions: Vec<TransactionDocument<'a>>,
    merkle_tree: MerkleTreeDocument<'a>,
    indices: &'a BatchIndices,
}

/// Compose the artifact set for a sealed batch.
pub fn compose(batch: &Batch, agent_version: &str) -> Result<ArtifactSet, serde_json::Error> {
    let key_prefix = format!(
        "{}/{}/{}",
        batch.database,
        batch.storage_table(),
        batch.batch_id
    );

    let batch_document = BatchDocument {
        batch_info: BatchInfo {
            batch_id: &batch.batch_id,
            created_at: batch.created_at_ms,
            organization_id: &batch.organization_id,
            database_name: &batch.database,
            table_names: &batch.table_names,
            agent_version,
        },
        transactions: batch
            .transactions
            .iter()
            .map(|tx| TransactionDocument {
                metadata: &tx.metadata,
                merkle_leaf: &tx.merkle_leaf,
            })
            .collect(),
        merkle_tree: tree_document(batch),
        indices: &batch.indices,
    };

    let merkle_tree = ArtifactDocument {
        key: format!("{key_prefix}/merkle-tree.json"),
        bytes: stable_bytes(&serde_json::to_value(tree_document(batch))?),
    };

    let indices = [
        ("by_timestamp", &batch.indices.by_timestamp),
        ("by_operation", &batch.indices.by_operation),
        ("by_date", &batch.indices.by_date),
    ]
    .into_iter()
    .map(|(name, index)| {
        Ok(ArtifactDocument {
            key: format!("{key_prefix}/indices/{name}.json"),
            bytes: stable_bytes(&serde_json::to_value(index)?),
        })
    })
    .collect::<Result<Vec<_>, serde_json::Error>>()?;

    let batch_data = ArtifactDocument {
        key: format!("{key_prefix}/batch-data.json"),
        bytes: stable_bytes(&serde_json::to_value(&batch_document)?),
    };

    Ok(ArtifactSet {
        key_prefix,
        merkle_tree,
        indices,
        batch_data,
    })
}

fn tree_document(batch: &Batch) -> MerkleTreeDocument<'_> {
    MerkleTreeDocument {
        algorithm: TREE_ALGORITHM,
        root: batch.tree.root(),
        height: batch.tree.height(),
        nodes: batch.tree.levels(),
        proof_index: batch
            .tree
            .proofs()
            .iter()
            .map(|(index, proof)| (format!("tx-{index}"), proof))
            .collect(),
    }
}

/// Serialize with recursively sorted keys and compact separators.
pub fn stable_bytes(value: &Value) -> Vec<u8> {
    sorted_value(value).to_string().into_bytes()
}

fn sorted_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sorted_value(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_types::{ChangeEvent, ColumnValue, OperationKind, RowImage, SourceMeta};
    use serde_json::json;

    fn sample_batch() -> Batch {
        let mut after = RowImage::new();
        after.insert("id".to_string(), ColumnValue::Integer(1));
        let events = vec![ChangeEvent {
            stream: "cdc.public.accounts".to_string(),
            entry_id: "1-0".to_string(),
            operation: OperationKind::Insert,
            timestamp_ms: 1_749_864_039_877,
            database: "ledger".to_string(),
            table: "accounts".to_string(),
            before: None,
            after: Some(after),
            source: SourceMeta::default(),
        }];
        Batch::from_events(
            "BATCH-2025-06-14-0a1b2c3d".to_string(),
            "demo-org".to_string(),
            1_749_864_100_000,
            &events,
        )
        .unwrap()
    }

    #[test]
    fn test_key_layout() {
        let set = compose(&sample_batch(), "0.1.0").unwrap();
        assert_eq!(set.key_prefix, "ledger/accounts/BATCH-2025-06-14-0a1b2c3d");
        assert_eq!(
            set.all_keys(),
            vec![
                "ledger/accounts/BATCH-2025-06-14-0a1b2c3d/merkle-tree.json",
                "ledger/accounts/BATCH-2025-06-14-0a1b2c3d/indices/by_timestamp.json",
                "ledger/accounts/BATCH-2025-06-14-0a1b2c3d/indices/by_operation.json",
                "ledger/accounts/BATCH-2025-06-14-0a1b2c3d/indices/by_date.json",
                "ledger/accounts/BATCH-2025-06-14-0a1b2c3d/batch-data.json",
            ]
        );
    }

    #[test]
    fn test_batch_body_shape() {
        let batch = sample_batch();
        let set = compose(&batch, "0.1.0").unwrap();
        let body: Value = serde_json::from_slice(&set.batch_data.bytes).unwrap();

        assert_eq!(body["batch_info"]["batch_id"], "BATCH-2025-06-14-0a1b2c3d");
        assert_eq!(body["batch_info"]["organization_id"], "demo-org");
        assert_eq!(body["batch_info"]["database_name"], "ledger");
        assert_eq!(body["batch_info"]["table_names"], json!(["accounts"]));
        assert_eq!(body["batch_info"]["agent_version"], "0.1.0");

        assert_eq!(body["merkle_tree"]["algorithm"], "sha256");
        assert_eq!(body["merkle_tree"]["root"], batch.tree.root());
        assert_eq!(body["merkle_tree"]["height"], 0);

        let tx = &body["transactions"][0];
        assert_eq!(tx["metadata"]["operation_type"], "INSERT");
        assert_eq!(tx["merkle_leaf"]["index"], 0);
        // Payload images are not persisted.
        assert!(tx.get("payload").is_none());
    }

    #[test]
    fn test_standalone_tree_matches_embedded_section() {
        let set = compose(&sample_batch(), "0.1.0").unwrap();
        let body: Value = serde_json::from_slice(&set.batch_data.bytes).unwrap();
        let tree: Value = serde_json::from_slice(&set.merkle_tree.bytes).unwrap();
        assert_eq!(body["merkle_tree"], tree);
    }

    #[test]
    fn test_proof_index_keys() {
        let set = compose(&sample_batch(), "0.1.0").unwrap();
        let tree: Value = serde_json::from_slice(&set.merkle_tree.bytes).unwrap();
        let proof = &tree["proof_index"]["tx-0"];
        assert_eq!(proof["leaf_index"], 0);
        assert_eq!(proof["proof_path"], json!([]));
        assert_eq!(proof["sibling_positions"], json!([]));
    }

    #[test]
    fn test_composition_is_byte_stable() {
        let batch = sample_batch();
        let first = compose(&batch, "0.1.0").unwrap();
        let second = compose(&batch, "0.1.0").unwrap();
        assert_eq!(first.batch_data.bytes, second.batch_data.bytes);
        assert_eq!(first.merkle_tree.bytes, second.merkle_tree.bytes);
    }

    #[test]
    fn test_stable_bytes_sorts_keys() {
        let value = json!({"zebra": {"b": 1, "a": 2}, "apple": [3, {"y": 1, "x": 2}]});
        let rendered = String::from_utf8(stable_bytes(&value)).unwrap();
        assert_eq!(
            rendered,
            r#"{"apple":[3,{"x":2,"y":1}],"zebra":{"a":2,"b":1}}"#
        );
    }
}
