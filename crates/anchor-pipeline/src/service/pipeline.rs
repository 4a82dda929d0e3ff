//! Pipeline orchestration
//!
//! One logical processing task owns the whole loop: discover streams, read
//! a bounded batch of entries, feed the accumulator, evaluate sealing
//! triggers, and commit each sealed batch synchronously: compose
//! artifacts, upload, mint, then acknowledge the broker entries that made
//! up the batch. Acknowledgement strictly follows a successful (or
//! replayed) mint, so any token observable on-chain points at a complete
//! artifact set.
//!
//! Failed commits keep their events in a retry queue and are re-sealed
//! under a fresh batch id on the next iteration. Broker outages back off
//! exponentially and never acknowledge anything.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::artifacts::{compose, ArtifactSet};
use crate::domain::accumulator::{BatchAccumulator, SealedEvents};
use crate::domain::batch::{generate_batch_id, shard_batch_id, Batch};
use crate::domain::config::BatchingConfig;
use crate::domain::envelope::parse_entry;
use crate::error::{PipelineError, StoreError};
use crate::metrics::PipelineMetrics;
use crate::ports::{
    AnchorClient, BatchSummary, MintRequest, ObjectStore, OperationCounts, StreamBroker,
    StreamEntryRef, TokenMetadata,
};
use crate::service::minter::AnchorMinter;
use crate::service::publisher::ArtifactPublisher;

/// Runtime parameters of the pipeline loop.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub organization_id: String,
    pub agent_version: String,
    pub stream_pattern: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub batching: BatchingConfig,
    /// First reconnect delay after a broker error.
    pub reconnect_initial: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_cap: Duration,
    /// Pause before re-discovering when no stream matches the pattern.
    pub rediscover_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            organization_id: "demo-org".to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            stream_pattern: "cdc.public.*".to_string(),
            consumer_group: "anchor-agent".to_string(),
            consumer_name: "agent-1".to_string(),
            batching: BatchingConfig::default(),
            reconnect_initial: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            rediscover_delay: Duration::from_secs(5),
        }
    }
}

/// The pipeline orchestrator. Owns the broker, store and anchor
/// capabilities explicitly; there is no ambient state.
pub struct Pipeline<B, S, A>
where
    B: StreamBroker,
    S: ObjectStore,
    A: AnchorClient,
{
    config: PipelineConfig,
    broker: Arc<B>,
    store: Arc<S>,
    anchor: Arc<A>,
    publisher: ArtifactPublisher<S>,
    minter: AnchorMinter<A>,
    accumulator: BatchAccumulator,
    /// Sealed event groups whose commit failed; retried with fresh ids.
    retry_queue: VecDeque<SealedEvents>,
    /// Streams whose consumer group has been ensured this connection.
    known_groups: HashSet<String>,
    backoff: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl<B, S, A> Pipeline<B, S, A>
where
    B: StreamBroker,
    S: ObjectStore,
    A: AnchorClient,
{
    pub fn new(
        config: PipelineConfig,
        broker: Arc<B>,
        store: Arc<S>,
        anchor: Arc<A>,
    ) -> Result<Self, PipelineError> {
        config.batching.validate()?;

        let publisher = ArtifactPublisher::new(Arc::clone(&store));
        let minter = AnchorMinter::new(Arc::clone(&anchor));
        let accumulator = BatchAccumulator::new(config.batching.clone());
        let backoff = config.reconnect_initial;

        Ok(Self {
            config,
            broker,
            store,
            anchor,
            publisher,
            minter,
            accumulator,
            retry_queue: VecDeque::new(),
            known_groups: HashSet::new(),
            backoff,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Override the mint retry policy; the integration tests shrink the
    /// backoff to keep runs fast.
    pub fn with_mint_policy(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.minter = AnchorMinter::with_policy(Arc::clone(&self.anchor), max_attempts, base_delay);
        self
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until the shutdown signal flips, then drain.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        self.store.ensure_bucket().await?;

        info!(
            pattern = %self.config.stream_pattern,
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            max_batch_size = self.config.batching.max_batch_size,
            "pipeline started"
        );

        while !*shutdown.borrow() {
            match self.step(&mut shutdown).await {
                Ok(()) => {
                    self.backoff = self.config.reconnect_initial;
                }
                Err(PipelineError::BrokerUnavailable(e)) => {
                    let delay = self.backoff;
                    self.backoff = (self.backoff * 2).min(self.config.reconnect_cap);
                    // Stream discovery repeats on the next iteration.
                    self.known_groups.clear();
                    warn!(
                        error = %e,
                        retry_in_secs = delay.as_secs(),
                        "broker unavailable, backing off"
                    );
                    self.pause(delay, &mut shutdown).await;
                }
                Err(e) => {
                    error!(error = %e, "pipeline iteration failed");
                }
            }
        }

        self.drain().await;
        info!("pipeline stopped");
        Ok(())
    }

    /// One loop iteration: retries, discovery, read, triggers, commits.
    async fn step(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), PipelineError> {
        self.flush_retries().await;

        let streams = self
            .broker
            .discover_streams(&self.config.stream_pattern)
            .await?;
        if streams.is_empty() {
            debug!(pattern = %self.config.stream_pattern, "no streams found, waiting");
            self.pause(self.config.rediscover_delay, shutdown).await;
            return Ok(());
        }

        for stream in &streams {
            if !self.known_groups.contains(stream) {
                self.broker
                    .ensure_group(stream, &self.config.consumer_group)
                    .await?;
                self.known_groups.insert(stream.clone());
            }
        }

        // Never read past the remaining batch capacity, so a buffer seals
        // at its configured size rather than overshooting it.
        let capacity = self
            .config
            .batching
            .max_batch_size
            .saturating_sub(self.accumulator.pending_events())
            .max(1);

        let entries = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            result = self.broker.read_group(
                &self.config.consumer_group,
                &self.config.consumer_name,
                &streams,
                capacity,
                self.config.batching.idle_timeout,
            ) => result?,
        };

        let read_was_empty = entries.is_empty();
        if read_was_empty {
            self.metrics.record_empty_read();
        }

        let now = Instant::now();
        for entry in entries {
            match parse_entry(&entry.stream, &entry.id, &entry.fields) {
                Ok(event) => self.accumulator.push(event, now),
                Err(e) => {
                    warn!(error = %e, "dropping malformed event");
                    self.metrics.record_malformed_event();
                    // The bad entry must not be redelivered forever.
                    if let Err(ack_err) = self
                        .broker
                        .ack(&entry.stream, &self.config.consumer_group, &[entry.id])
                        .await
                    {
                        warn!(error = %ack_err, "failed to ack malformed entry");
                    }
                }
            }
        }

        let sealed = self.accumulator.collect_sealed(read_was_empty, Instant::now());
        self.commit_round(sealed).await;
        Ok(())
    }

    /// Commit every group sealed in one trigger check. Groups share a base
    /// batch id and take a shard suffix when more than one sealed.
    async fn commit_round(&mut self, sealed: Vec<SealedEvents>) {
        if sealed.is_empty() {
            return;
        }

        let base_id = generate_batch_id(Utc::now().date_naive());
        let multi = sealed.len() > 1;

        for (shard, group) in sealed.into_iter().enumerate() {
            let batch_id = if multi {
                shard_batch_id(&base_id, shard)
            } else {
                base_id.clone()
            };

            if let Err(e) = self.commit(&group, batch_id).await {
                error!(
                    error = %e,
                    database = %group.database,
                    table = %group.table,
                    events = group.events.len(),
                    "batch commit failed, queued for retry"
                );
                self.retry_queue.push_back(group);
            }
        }
    }

    /// Re-attempt previously failed commits, each under a fresh batch id.
    async fn flush_retries(&mut self) {
        let pending = self.retry_queue.len();
        for _ in 0..pending {
            let Some(group) = self.retry_queue.pop_front() else {
                break;
            };
            let batch_id = generate_batch_id(Utc::now().date_naive());
            if let Err(e) = self.commit(&group, batch_id).await {
                warn!(error = %e, table = %group.table, "retry commit failed");
                self.retry_queue.push_back(group);
            }
        }
    }

    /// Commit one sealed group: seal the batch, upload artifacts, mint,
    /// then acknowledge the source entries.
    async fn commit(&mut self, group: &SealedEvents, batch_id: String) -> Result<(), PipelineError> {
        let created_at_ms = Utc::now().timestamp_millis();
        let Some(batch) = Batch::from_events(
            batch_id,
            self.config.organization_id.clone(),
            created_at_ms,
            &group.events,
        ) else {
            return Ok(());
        };

        let artifacts = compose(&batch, &self.config.agent_version).map_err(|e| {
            PipelineError::ObjectStoreUploadFailed(StoreError::UploadFailed {
                key: format!("{}/{}/{}", batch.database, batch.storage_table(), batch.batch_id),
                reason: format!("artifact composition failed: {e}"),
            })
        })?;

        self.publisher
            .publish(&artifacts)
            .await
            .map_err(PipelineError::ObjectStoreUploadFailed)?;

        let request = self.mint_request(&batch, &artifacts);
        let receipt = match self.minter.mint(&request).await {
            Ok(receipt) => {
                self.metrics.record_mint_success();
                receipt
            }
            Err(e) => {
                self.metrics.record_mint_failure();
                return Err(e);
            }
        };

        self.ack_entries(&group.entries).await;
        self.metrics.record_batch(batch.transactions.len(), created_at_ms);

        info!(
            batch_id = %batch.batch_id,
            merkle_root = %batch.tree.root(),
            events = batch.transactions.len(),
            seal_reason = group.reason.as_str(),
            replayed = receipt.replayed,
            "batch committed"
        );
        Ok(())
    }

    fn mint_request(&self, batch: &Batch, artifacts: &ArtifactSet) -> MintRequest {
        let (inserts, updates, deletes) = batch.operation_counts();
        let tx_count = batch.transactions.len() as u64;

        MintRequest {
            token_id: batch.batch_id.clone(),
            receiver: self.anchor.owner().to_string(),
            token_metadata: TokenMetadata {
                title: format!("Anchor Batch {}", batch.batch_id),
                description: format!(
                    "Integrity certificate for {} transactions from table {}",
                    tx_count,
                    batch.storage_table()
                ),
                copies: 1,
                issued_at: batch.created_at_ms.to_string(),
                reference: self.store.reference_url(&artifacts.batch_data.key),
            },
            batch_summary: BatchSummary {
                database_name: batch.database.clone(),
                table_names: batch.table_names.clone(),
                timestamp: batch.earliest_timestamp(),
                tx_count,
                merkle_root: batch.tree.root().to_string(),
                object_store_bucket: self.store.bucket().to_string(),
                object_store_key_prefix: format!("{}/", artifacts.key_prefix),
                size_bytes: artifacts.batch_data_size(),
                operation_counts: OperationCounts {
                    inserts,
                    updates,
                    deletes,
                },
            },
        }
    }

    /// Acknowledge committed entries, grouped per stream. Failures are
    /// logged and tolerated: the batch is already anchored, and redelivered
    /// entries deduplicate downstream by content hash.
    async fn ack_entries(&self, entries: &[StreamEntryRef]) {
        let mut by_stream: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for entry in entries {
            by_stream
                .entry(entry.stream.as_str())
                .or_default()
                .push(entry.entry_id.clone());
        }

        for (stream, ids) in by_stream {
            if let Err(e) = self
                .broker
                .ack(stream, &self.config.consumer_group, &ids)
                .await
            {
                warn!(stream = %stream, error = %e, "acknowledgement failed; entries will be redelivered");
            }
        }
    }

    /// Shutdown drain: flush retries, force-seal qualifying buffers, and
    /// commit them before returning.
    async fn drain(&mut self) {
        self.flush_retries().await;

        let (sealed, dropped) = self.accumulator.drain_for_shutdown();
        if dropped > 0 {
            info!(
                events = dropped,
                "dropping under-sized buffers at shutdown; entries stay unacknowledged"
            );
        }
        self.commit_round(sealed).await;

        if !self.retry_queue.is_empty() {
            warn!(
                batches = self.retry_queue.len(),
                "uncommitted batches remain at shutdown; their entries will be redelivered"
            );
        }
    }

    async fn pause(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
