//! Delivery confirmation
//!
//! Turns the result of one bulk request into per-event outcomes. Sinks only
//! fire from here, after the response for their item has been received.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::buffer::{FlushTrigger, ReadyBatch};
use crate::bulk::{BulkItemResult, BulkMethod, BulkResponse};
use crate::error::{ItemFailure, Result, WriterError};

/// Summary of one flushed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub batch_id: Option<Uuid>,
    pub flush_reason: Option<FlushTrigger>,
    pub confirmed: usize,
    pub failed: usize,
}

impl FlushReport {
    /// Report for a flush that had nothing to send
    pub fn empty() -> Self {
        Self {
            batch_id: None,
            flush_reason: None,
            confirmed: 0,
            failed: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.confirmed + self.failed
    }
}

/// Apply a bulk result to the batch it was sent for.
///
/// Whole-batch failures fail every entry and fire nothing. Otherwise each
/// successful item confirms its event and each rejected item is collected
/// into a [`WriterError::PartialWrite`].
#[instrument(skip(batch, response), fields(batch_id = %batch.batch_id, actions = batch.entries.len()))]
pub fn settle(mut batch: ReadyBatch, response: Result<BulkResponse>) -> Result<FlushReport> {
    let results = response.and_then(|response| {
        let results = response.into_results();
        if results.len() != batch.entries.len() {
            return Err(WriterError::Transport(format!(
                "Bulk response has {} items for {} actions",
                results.len(),
                batch.entries.len()
            )));
        }
        Ok(results)
    });

    let results = match results {
        Ok(results) => results,
        Err(err) => {
            warn!("Batch {} failed, no confirmations sent: {}", batch.batch_id, err);
            for entry in batch.entries.iter_mut() {
                entry.resolve(Err(err.clone()));
            }
            return Err(err);
        }
    };

    let mut report = FlushReport {
        batch_id: Some(batch.batch_id),
        flush_reason: Some(batch.flush_reason),
        confirmed: 0,
        failed: 0,
    };
    let mut failures = Vec::new();

    for (position, (mut entry, item)) in batch.entries.into_iter().zip(results).enumerate() {
        if is_applied(entry.action.method, &item) {
            let id = item.id.clone().or_else(|| entry.action.routing.id.clone());
            entry.resolve(Ok(()));
            entry.event.confirm(id);
            report.confirmed += 1;
        } else {
            let failure = ItemFailure {
                position,
                id: entry.action.routing.id.clone().or(item.id.clone()),
                type_name: entry.action.type_name.clone(),
                status: item.status,
                reason: item.reason(),
            };
            warn!("Bulk item rejected: {}", failure);
            entry.resolve(Err(WriterError::PartialWrite(vec![failure.clone()])));
            failures.push(failure);
            report.failed += 1;
        }
    }

    info!(
        "Batch {} settled: {} confirmed, {} failed",
        batch.batch_id, report.confirmed, report.failed
    );

    if failures.is_empty() {
        Ok(report)
    } else {
        Err(WriterError::PartialWrite(failures))
    }
}

/// Deleting a document that is already gone (`not_found`, no error object)
/// leaves the index in the requested state.
fn is_applied(method: BulkMethod, item: &BulkItemResult) -> bool {
    item.is_success()
        || (method == BulkMethod::Delete && item.status == 404 && item.error.is_none())
}
