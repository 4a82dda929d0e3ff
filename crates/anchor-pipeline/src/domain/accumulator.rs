//! Per-table batch accumulation
//!
//! The accumulator keeps one open buffer per `(database, table)` key and
//! evaluates the sealing triggers on every consumer read return. Buffers
//! are independent: a trigger firing on one never affects another. When a
//! single check seals several buffers they are emitted in key order, so a
//! run over the same input is deterministic.
//!
//! The accumulator works in monotonic time (`Instant`) supplied by the
//! caller; it performs no I/O and reads no clocks of its own.

use std::collections::BTreeMap;
use std::time::Instant;

use anchor_types::ChangeEvent;
use tracing::debug;

use crate::domain::config::BatchingConfig;
use crate::ports::StreamEntryRef;

/// Why a buffer sealed; carried into logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    /// Buffer reached `max_batch_size`.
    Capacity,
    /// Empty read and the buffer sat quiet for `idle_timeout`.
    Idle,
    /// First event older than `force_seal_after`.
    Age,
    /// Graceful shutdown drain.
    Shutdown,
}

impl SealReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Idle => "idle",
            Self::Age => "age",
            Self::Shutdown => "shutdown",
        }
    }
}

/// An unsealed per-table buffer.
#[derive(Debug)]
struct TableBuffer {
    events: Vec<ChangeEvent>,
    entries: Vec<StreamEntryRef>,
    first_insert: Instant,
    last_insert: Instant,
}

/// The events of one sealed buffer, in arrival order, with the broker
/// entries that produced them.
#[derive(Debug, Clone)]
pub struct SealedEvents {
    pub database: String,
    pub table: String,
    pub reason: SealReason,
    pub events: Vec<ChangeEvent>,
    pub entries: Vec<StreamEntryRef>,
}

/// Buffers change events per `(database, table)` and seals them under the
/// configured size, idle and age triggers.
#[derive(Debug)]
pub struct BatchAccumulator {
    config: BatchingConfig,
    buffers: BTreeMap<(String, String), TableBuffer>,
}

impl BatchAccumulator {
    pub fn new(config: BatchingConfig) -> Self {
        Self {
            config,
            buffers: BTreeMap::new(),
        }
    }

    /// Append one event to its table buffer.
    pub fn push(&mut self, event: ChangeEvent, now: Instant) {
        let key = event.table_key();
        let entry = StreamEntryRef {
            stream: event.stream.clone(),
            entry_id: event.entry_id.clone(),
        };

        let buffer = self.buffers.entry(key).or_insert_with(|| TableBuffer {
            events: Vec::new(),
            entries: Vec::new(),
            first_insert: now,
            last_insert: now,
        });
        buffer.events.push(event);
        buffer.entries.push(entry);
        buffer.last_insert = now;
    }

    /// Total events currently buffered across all tables.
    pub fn pending_events(&self) -> usize {
        self.buffers.values().map(|b| b.events.len()).sum()
    }

    /// Evaluate all triggers and remove every buffer that seals.
    ///
    /// `read_was_empty` is whether the read that preceded this check
    /// returned no events; only then does the idle trigger apply.
    pub fn collect_sealed(&mut self, read_was_empty: bool, now: Instant) -> Vec<SealedEvents> {
        let config = &self.config;
        let mut sealed_keys = Vec::new();

        for (key, buffer) in &self.buffers {
            let len = buffer.events.len();
            let reason = if len >= config.max_batch_size {
                Some(SealReason::Capacity)
            } else if len >= config.min_batch_size
                && now.duration_since(buffer.first_insert) >= config.force_seal_after
            {
                Some(SealReason::Age)
            } else if len >= config.min_batch_size
                && read_was_empty
                && now.duration_since(buffer.last_insert) >= config.idle_timeout
            {
                Some(SealReason::Idle)
            } else {
                None
            };

            if let Some(reason) = reason {
                sealed_keys.push((key.clone(), reason));
            }
        }

        // BTreeMap iteration already yielded keys in order.
        sealed_keys
            .into_iter()
            .filter_map(|(key, reason)| {
                self.buffers.remove(&key).map(|buffer| {
                    debug!(
                        database = %key.0,
                        table = %key.1,
                        events = buffer.events.len(),
                        reason = reason.as_str(),
                        "buffer sealed"
                    );
                    SealedEvents {
                        database: key.0,
                        table: key.1,
                        reason,
                        events: buffer.events,
                        entries: buffer.entries,
                    }
                })
            })
            .collect()
    }

    /// Shutdown drain: seal every buffer meeting `min_batch_size`; report
    /// how many events are dropped unacknowledged (they will be
    /// redelivered to the group after restart).
    pub fn drain_for_shutdown(&mut self) -> (Vec<SealedEvents>, usize) {
        let min = self.config.min_batch_size;
        let buffers = std::mem::take(&mut self.buffers);

        let mut sealed = Vec::new();
        let mut dropped = 0;
        for (key, buffer) in buffers {
            if buffer.events.len() >= min {
                sealed.push(SealedEvents {
                    database: key.0,
                    table: key.1,
                    reason: SealReason::Shutdown,
                    events: buffer.events,
                    entries: buffer.entries,
                });
            } else {
                dropped += buffer.events.len();
            }
        }
        (sealed, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_types::{OperationKind, RowImage, SourceMeta};
    use std::time::Duration;

    fn event(table: &str, n: usize) -> ChangeEvent {
        ChangeEvent {
            stream: format!("cdc.public.{table}"),
            entry_id: format!("0-{n}"),
            operation: OperationKind::Insert,
            timestamp_ms: n as i64,
            database: "ledger".to_string(),
            table: table.to_string(),
            before: None,
            after: Some(RowImage::new()),
            source: SourceMeta::default(),
        }
    }

    fn config(max: usize, min: usize, idle_secs: u64, force_secs: u64) -> BatchingConfig {
        BatchingConfig {
            max_batch_size: max,
            min_batch_size: min,
            idle_timeout: Duration::from_secs(idle_secs),
            force_seal_after: Duration::from_secs(force_secs),
        }
    }

    #[test]
    fn test_capacity_trigger() {
        let mut acc = BatchAccumulator::new(config(3, 1, 60, 300));
        let start = Instant::now();

        for n in 0..3 {
            acc.push(event("accounts", n), start);
        }

        let sealed = acc.collect_sealed(false, start);
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].reason, SealReason::Capacity);
        assert_eq!(sealed[0].events.len(), 3);
        assert_eq!(acc.pending_events(), 0);
    }

    #[test]
    fn test_idle_trigger_needs_empty_read() {
        let mut acc = BatchAccumulator::new(config(1000, 1, 60, 300));
        let start = Instant::now();
        acc.push(event("accounts", 0), start);

        let later = start + Duration::from_secs(61);
        // Events arrived on this read: idle does not fire.
        assert!(acc.collect_sealed(false, later).is_empty());
        // Empty read: idle fires.
        let sealed = acc.collect_sealed(true, later);
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].reason, SealReason::Idle);
    }

    #[test]
    fn test_idle_respects_min_batch_size() {
        let mut acc = BatchAccumulator::new(config(1000, 5, 60, 300));
        let start = Instant::now();
        acc.push(event("accounts", 0), start);

        let later = start + Duration::from_secs(3600);
        // One event under a min of five: never seals on idle or age.
        assert!(acc.collect_sealed(true, later).is_empty());
    }

    #[test]
    fn test_empty_buffer_never_seals() {
        let mut acc = BatchAccumulator::new(config(1000, 1, 60, 300));
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(acc.collect_sealed(true, later).is_empty());
    }

    #[test]
    fn test_age_trigger_fires_despite_activity() {
        let mut acc = BatchAccumulator::new(config(1000, 1, 60, 300));
        let start = Instant::now();
        acc.push(event("accounts", 0), start);

        // Keep inserting so the buffer is never idle.
        let mut now = start;
        for n in 1..3 {
            now = start + Duration::from_secs(n as u64 * 120);
            acc.push(event("accounts", n), now);
        }

        // 300s after the first insert, a non-empty read still seals it.
        let sealed = acc.collect_sealed(false, start + Duration::from_secs(301));
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].reason, SealReason::Age);
        assert_eq!(sealed[0].events.len(), 3);
        // Arrival order preserved.
        let ids: Vec<&str> = sealed[0]
            .events
            .iter()
            .map(|e| e.entry_id.as_str())
            .collect();
        assert_eq!(ids, ["0-0", "0-1", "0-2"]);
    }

    #[test]
    fn test_age_trigger_seals_single_event_buffer() {
        let mut acc = BatchAccumulator::new(config(1000, 1, 60, 300));
        let start = Instant::now();
        acc.push(event("accounts", 0), start);

        let sealed = acc.collect_sealed(false, start + Duration::from_secs(300));
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].reason, SealReason::Age);
        assert_eq!(sealed[0].events.len(), 1);
    }

    #[test]
    fn test_tables_buffer_independently() {
        let mut acc = BatchAccumulator::new(config(2, 1, 60, 300));
        let start = Instant::now();

        acc.push(event("orders", 0), start);
        acc.push(event("accounts", 1), start);
        acc.push(event("accounts", 2), start);

        let sealed = acc.collect_sealed(false, start);
        // Only accounts reached capacity; orders keeps buffering.
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].table, "accounts");
        assert_eq!(acc.pending_events(), 1);
    }

    #[test]
    fn test_multi_seal_is_key_ordered() {
        let mut acc = BatchAccumulator::new(config(1, 1, 60, 300));
        let start = Instant::now();

        acc.push(event("zebra", 0), start);
        acc.push(event("accounts", 1), start);

        let sealed = acc.collect_sealed(false, start);
        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed[0].table, "accounts");
        assert_eq!(sealed[1].table, "zebra");
    }

    #[test]
    fn test_shutdown_drain() {
        let mut acc = BatchAccumulator::new(config(1000, 2, 60, 300));
        let start = Instant::now();

        acc.push(event("accounts", 0), start);
        acc.push(event("accounts", 1), start);
        acc.push(event("orders", 2), start);

        let (sealed, dropped) = acc.drain_for_shutdown();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].table, "accounts");
        assert_eq!(sealed[0].reason, SealReason::Shutdown);
        // The single orders event is below the minimum and is dropped
        // without acknowledgement.
        assert_eq!(dropped, 1);
        assert_eq!(acc.pending_events(), 0);
    }

    #[test]
    fn test_entries_track_events() {
        let mut acc = BatchAccumulator::new(config(2, 1, 60, 300));
        let start = Instant::now();
        acc.push(event("accounts", 7), start);
        acc.push(event("accounts", 8), start);

        let sealed = acc.collect_sealed(false, start);
        let entry_ids: Vec<&str> = sealed[0]
            .entries
            .iter()
            .map(|e| e.entry_id.as_str())
            .collect();
        assert_eq!(entry_ids, ["0-7", "0-8"]);
    }
}
