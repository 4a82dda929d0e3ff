//! In-memory implementations of the outbound ports
//!
//! Functional stand-ins for the broker, object store and anchor contract,
//! suitable for single-process operation and for driving the whole
//! pipeline in tests. Each fake records enough of what happened (consumed
//! and acknowledged entries, upload order, minted tokens) for tests to
//! assert the commit protocol, and offers targeted failure injection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{AnchorError, BrokerError, StoreError};
use crate::ports::{AnchorClient, MintReceipt, MintRequest, ObjectStore, StreamBroker, StreamEntry};

/// Minimal glob matching: `*` spans any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

#[derive(Debug, Clone)]
struct StoredEntry {
    id: String,
    fields: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next undelivered entry.
    cursor: usize,
    /// Delivered but not yet acknowledged entry ids.
    pending: BTreeSet<String>,
    /// Acknowledged entry ids, in ack order.
    acked: Vec<String>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: Vec<StoredEntry>,
    groups: BTreeMap<String, GroupState>,
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: BTreeMap<String, StreamState>,
    sequence: u64,
}

/// In-memory stream broker with consumer-group semantics.
#[derive(Default)]
pub struct InMemoryStreamBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    fail_reads: AtomicU32,
}

impl InMemoryStreamBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry whose `value` field carries the given envelope.
    pub fn publish_envelope(&self, stream: &str, envelope: &serde_json::Value) -> String {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), envelope.to_string());
        self.publish(stream, fields)
    }

    /// Append a raw entry, creating the stream on first use. Ids are
    /// monotonic per broker.
    pub fn publish(&self, stream: &str, fields: HashMap<String, String>) -> String {
        let id = {
            let mut state = self.state.lock();
            state.sequence += 1;
            let id = format!("0-{}", state.sequence);
            state
                .streams
                .entry(stream.to_string())
                .or_default()
                .entries
                .push(StoredEntry {
                    id: id.clone(),
                    fields,
                });
            id
        };
        self.notify.notify_waiters();
        id
    }

    /// Make the next `n` reads fail with a connection error.
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Entry ids acknowledged against a group, in ack order.
    pub fn acked(&self, stream: &str, group: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.acked.clone())
            .unwrap_or_default()
    }

    /// Delivered-but-unacknowledged entry count for a group.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        let state = self.state.lock();
        state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    fn take_available(&self, group: &str, streams: &[String], count: usize) -> Vec<StreamEntry> {
        let mut state = self.state.lock();
        let mut out = Vec::new();

        for stream_name in streams {
            if out.len() >= count {
                break;
            }
            let Some(stream) = state.streams.get_mut(stream_name) else {
                continue;
            };
            let Some(group_state) = stream.groups.get_mut(group) else {
                continue;
            };

            while group_state.cursor < stream.entries.len() && out.len() < count {
                let entry = &stream.entries[group_state.cursor];
                group_state.cursor += 1;
                group_state.pending.insert(entry.id.clone());
                out.push(StreamEntry {
                    stream: stream_name.clone(),
                    id: entry.id.clone(),
                    fields: entry.fields.clone(),
                });
            }
        }

        out
    }
}

#[async_trait]
impl StreamBroker for InMemoryStreamBroker {
    async fn discover_streams(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
        let state = self.state.lock();
        Ok(state
            .streams
            .keys()
            .filter(|name| glob_match(pattern, name))
            .cloned()
            .collect())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let stream_state = state.streams.entry(stream.to_string()).or_default();
        stream_state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        _consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        if self
            .fail_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::Connection("injected read failure".to_string()));
        }

        let deadline = tokio::time::Instant::now() + block;
        loop {
            let available = self.take_available(group, streams, count);
            if !available.is_empty() {
                return Ok(available);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(remaining, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(
        &self,
        stream: &str,
        group: &str,
        entry_ids: &[String],
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let group_state = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| {
                BrokerError::CommandRejected(format!("no group {group} on {stream}"))
            })?;

        for id in entry_ids {
            if group_state.pending.remove(id) {
                group_state.acked.push(id.clone());
            }
        }
        Ok(())
    }
}

/// Recorded object-store operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    EnsureBucket,
    Put(String),
    Delete(String),
}

/// In-memory object store with upload-failure injection.
pub struct InMemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    operations: Mutex<Vec<StoreOp>>,
    fail_patterns: Mutex<Vec<String>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            operations: Mutex::new(Vec::new()),
            fail_patterns: Mutex::new(Vec::new()),
        }
    }

    /// Uploads whose key contains this substring will fail.
    pub fn fail_uploads_matching(&self, pattern: &str) {
        self.fail_patterns.lock().push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_patterns.lock().clear();
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn ensure_bucket(&self) -> Result<(), StoreError> {
        self.operations.lock().push(StoreOp::EnsureBucket);
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        self.operations.lock().push(StoreOp::Put(key.to_string()));

        let failing = self
            .fail_patterns
            .lock()
            .iter()
            .any(|pattern| key.contains(pattern));
        if failing {
            return Err(StoreError::UploadFailed {
                key: key.to_string(),
                reason: "injected upload failure".to_string(),
            });
        }

        self.objects.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.operations.lock().push(StoreOp::Delete(key.to_string()));
        self.objects.lock().remove(key);
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn reference_url(&self, key: &str) -> String {
        format!("https://objects.local/{}/{}", self.bucket, key)
    }
}

/// In-memory anchor contract: idempotent on token id, with transient
/// failure injection.
pub struct InMemoryAnchorClient {
    owner: String,
    minted: Mutex<BTreeMap<String, MintRequest>>,
    fail_remaining: AtomicU32,
    replay_remaining: AtomicU32,
    calls: AtomicU32,
}

impl InMemoryAnchorClient {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            minted: Mutex::new(BTreeMap::new()),
            fail_remaining: AtomicU32::new(0),
            replay_remaining: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Make the next `n` mint calls fail with a transient error.
    pub fn fail_next_calls(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` mint calls report the token as already minted,
    /// simulating a replay against the idempotent contract.
    pub fn replay_next_calls(&self, n: u32) {
        self.replay_remaining.store(n, Ordering::SeqCst);
    }

    pub fn is_minted(&self, token_id: &str) -> bool {
        self.minted.lock().contains_key(token_id)
    }

    pub fn minted_count(&self) -> usize {
        self.minted.lock().len()
    }

    pub fn minted_request(&self, token_id: &str) -> Option<MintRequest> {
        self.minted.lock().get(token_id).cloned()
    }

    pub fn minted_tokens(&self) -> Vec<String> {
        self.minted.lock().keys().cloned().collect()
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnchorClient for InMemoryAnchorClient {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn mint_batch(&self, request: &MintRequest) -> Result<MintReceipt, AnchorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AnchorError::CallFailed(
                "injected mint failure".to_string(),
            ));
        }

        if self
            .replay_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AnchorError::AlreadyMinted {
                token_id: request.token_id.clone(),
            });
        }

        let mut minted = self.minted.lock();
        if minted.contains_key(&request.token_id) {
            return Err(AnchorError::AlreadyMinted {
                token_id: request.token_id.clone(),
            });
        }

        minted.insert(request.token_id.clone(), request.clone());
        Ok(MintReceipt {
            token_id: request.token_id.clone(),
            tx_hash: format!("txn-{}", request.token_id),
            block_height: minted.len().to_string(),
            gas_used: "0".to_string(),
            replayed: false,
        })
    }
}
