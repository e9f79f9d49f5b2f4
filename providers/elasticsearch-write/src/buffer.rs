//! Bulk batch buffer
//!
//! Accumulates encoded bulk entries in append order and reports a ready batch
//! once a count or size trigger fires. Time-based flushes are driven from the
//! writer's timer through [`BatchBuffer::is_expired`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::bulk::BulkAction;
use crate::error::{Result, WriterError};
use crate::event::ChangeEvent;

/// Flush thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush after this many actions; 1 sends one request per event
    pub max_actions: usize,
    /// Flush once the encoded payload reaches this many bytes
    pub max_bytes: usize,
    /// Flush a non-empty batch after it has been open this long
    pub flush_interval_ms: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_actions: 1000,
            max_bytes: 5 * 1024 * 1024,
            flush_interval_ms: Some(30_000),
        }
    }
}

impl BatchConfig {
    /// Load thresholds from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_actions: std::env::var("BULK_MAX_ACTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_actions),
            max_bytes: std::env::var("BULK_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_bytes),
            flush_interval_ms: match std::env::var("BULK_FLUSH_INTERVAL_MS") {
                // 0 disables time-based flushing
                Ok(v) => v.parse().ok().filter(|ms| *ms > 0),
                Err(_) => defaults.flush_interval_ms,
            },
        }
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_actions == 0 {
            return Err(WriterError::Config("max_actions must be at least 1".to_string()));
        }
        if self.max_bytes == 0 {
            return Err(WriterError::Config("max_bytes must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Flush trigger reasons
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FlushTrigger {
    CountThreshold,
    SizeThreshold,
    TimeThreshold,
    Manual,
    Shutdown,
}

/// An encoded bulk entry together with the event it applies
#[derive(Debug)]
pub struct BatchEntry {
    pub action: BulkAction,
    pub event: ChangeEvent,
    encoded: Vec<u8>,
    outcome: Option<oneshot::Sender<Result<()>>>,
}

impl BatchEntry {
    /// Encode the action up front so the batch size is known on append
    pub fn new(action: BulkAction, event: ChangeEvent) -> Result<Self> {
        let encoded = action.encode()?;
        Ok(Self {
            action,
            event,
            encoded,
            outcome: None,
        })
    }

    /// Attach the channel that reports this entry's outcome to its writer
    pub(crate) fn with_outcome(mut self, tx: oneshot::Sender<Result<()>>) -> Self {
        self.outcome = Some(tx);
        self
    }

    pub fn size_bytes(&self) -> usize {
        self.encoded.len()
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Report the final outcome; a dropped handle is not an error.
    pub(crate) fn resolve(&mut self, outcome: Result<()>) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Batch ready to be sent as one bulk request
#[derive(Debug)]
pub struct ReadyBatch {
    pub batch_id: Uuid,
    pub entries: Vec<BatchEntry>,
    pub flush_reason: FlushTrigger,
    pub total_size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

impl ReadyBatch {
    /// NDJSON request body, entries in append order
    pub fn payload(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.total_size_bytes);
        for entry in &self.entries {
            body.extend_from_slice(entry.encoded());
        }
        body
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub pending_actions: usize,
    pub pending_bytes: usize,
}

/// Accumulates entries for the next bulk request
#[derive(Debug)]
pub struct BatchBuffer {
    config: BatchConfig,
    entries: Vec<BatchEntry>,
    size_bytes: usize,
    opened_at: Instant,
}

impl BatchBuffer {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            size_bytes: 0,
            opened_at: Instant::now(),
        }
    }

    /// Add an entry; returns the batch when a count or size trigger fires
    #[instrument(skip(self, entry), fields(type_name = %entry.action.type_name, method = ?entry.action.method))]
    pub fn append(&mut self, entry: BatchEntry) -> Option<ReadyBatch> {
        if self.entries.is_empty() {
            self.opened_at = Instant::now();
        }
        self.size_bytes += entry.size_bytes();
        self.entries.push(entry);

        let trigger = self.should_flush()?;
        debug!(
            "Flush triggered ({:?}): {} actions, {} bytes",
            trigger,
            self.entries.len(),
            self.size_bytes
        );
        self.take_batch(trigger)
    }

    fn should_flush(&self) -> Option<FlushTrigger> {
        if self.entries.len() >= self.config.max_actions {
            return Some(FlushTrigger::CountThreshold);
        }

        if self.size_bytes >= self.config.max_bytes {
            return Some(FlushTrigger::SizeThreshold);
        }

        None
    }

    /// Whether a non-empty batch has been open for at least `interval`
    pub fn is_expired(&self, interval: Duration) -> bool {
        !self.entries.is_empty() && self.opened_at.elapsed() >= interval
    }

    /// Take the current batch, leaving the buffer empty. `None` when empty.
    pub fn take_batch(&mut self, flush_reason: FlushTrigger) -> Option<ReadyBatch> {
        if self.entries.is_empty() {
            return None;
        }

        let entries = std::mem::take(&mut self.entries);
        let total_size_bytes = std::mem::take(&mut self.size_bytes);
        self.opened_at = Instant::now();

        Some(ReadyBatch {
            batch_id: Uuid::new_v4(),
            entries,
            flush_reason,
            total_size_bytes,
            created_at: Utc::now(),
        })
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pending_actions: self.entries.len(),
            pending_bytes: self.size_bytes,
        }
    }
}
