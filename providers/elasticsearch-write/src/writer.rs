//! Bulk writer
//!
//! `write` translates and buffers events synchronously. Ready batches are
//! handed over an mpsc channel to a single flusher task, so requests go out
//! one at a time in the order their batches were cut, and writes made while a
//! request is in flight fill the next batch.
//!
//! `close` flushes what is left, waits for every queued and in-flight request
//! and caches the terminal result.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::{BatchBuffer, BatchEntry, BufferStats, FlushTrigger, ReadyBatch};
use crate::config::WriterConfig;
use crate::confirm::{self, FlushReport};
use crate::error::{Result, WriterError};
use crate::event::ChangeEvent;
use crate::transport::{BulkTransport, HttpBulkClient};
use crate::translator::translate;

/// Build a writer for `config` backed by the reqwest bulk client.
///
/// Must be called from within a Tokio runtime.
pub fn create_writer(config: WriterConfig) -> Result<BulkWriter> {
    config.validate()?;
    let client = HttpBulkClient::new(&config)?;
    BulkWriter::new(config, client)
}

/// Outcome of a single write, resolved once its batch has been flushed
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteHandle {
    /// Wait for the write to be applied or rejected
    pub async fn outcome(self) -> Result<()> {
        self.rx.await.unwrap_or_else(|_| Err(abandoned()))
    }

    /// Non-blocking check; `None` while the write is still pending
    pub fn try_outcome(&mut self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(abandoned())),
        }
    }
}

fn abandoned() -> WriterError {
    WriterError::Abandoned("flush ended without reporting a result".to_string())
}

struct FlushRequest {
    batch: Option<ReadyBatch>,
    /// `None` for threshold and timer flushes; their errors surface on close
    reply: Option<oneshot::Sender<Result<FlushReport>>>,
}

struct WriterState {
    buffer: BatchBuffer,
    /// Dropped on close, which lets the flusher drain and exit
    batches: Option<mpsc::UnboundedSender<FlushRequest>>,
}

/// Progress of `close`, kept across calls so a dropped close can be resumed
#[derive(Default)]
struct Shutdown {
    flusher: Option<JoinHandle<Result<()>>>,
    /// Reply for the shutdown flush once it has been queued
    final_reply: Option<oneshot::Receiver<Result<FlushReport>>>,
    final_flush: Option<Result<()>>,
    background: Option<Result<()>>,
    terminal: Option<Result<()>>,
}

/// Elasticsearch bulk writer
pub struct BulkWriter {
    config: WriterConfig,
    state: Arc<Mutex<WriterState>>,
    shutdown: tokio::sync::Mutex<Shutdown>,
    cancel: CancellationToken,
}

impl BulkWriter {
    /// Create a writer over any bulk transport and start its flusher task
    pub fn new(config: WriterConfig, transport: impl BulkTransport) -> Result<Self> {
        config.validate()?;

        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(WriterState {
            buffer: BatchBuffer::new(config.batch.clone()),
            batches: Some(batch_tx),
        }));
        let cancel = CancellationToken::new();

        let flusher = tokio::spawn(run_flusher(transport, batch_rx));

        if let Some(interval) = config.batch.flush_interval() {
            spawn_timer(Arc::clone(&state), interval, cancel.clone());
        }

        info!(
            "Bulk writer started for index {} (parent field: {:?}, max_actions: {}, max_bytes: {})",
            config.index,
            config.parent_field(),
            config.batch.max_actions,
            config.batch.max_bytes
        );

        Ok(Self {
            config,
            state,
            shutdown: tokio::sync::Mutex::new(Shutdown {
                flusher: Some(flusher),
                ..Shutdown::default()
            }),
            cancel,
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Queue an event for writing. Never waits on the network.
    ///
    /// Translation errors are returned here and the event is not queued.
    #[instrument(skip(self, event), fields(op = %event.op(), type_name = %event.type_name()))]
    pub fn write(&self, event: ChangeEvent) -> Result<WriteHandle> {
        let mut state = self.state.lock();
        let WriterState { buffer, batches } = &mut *state;
        let batches = batches.as_ref().ok_or(WriterError::Closed)?;

        let action = translate(&event, &self.config.index, self.config.parent_field())
            .map_err(|e| {
                warn!("Skipping event: {}", e);
                e
            })?;

        let (tx, rx) = oneshot::channel();
        let entry = BatchEntry::new(action, event)?.with_outcome(tx);

        if let Some(batch) = buffer.append(entry) {
            submit(
                batches,
                FlushRequest {
                    batch: Some(batch),
                    reply: None,
                },
            )?;
        }

        Ok(WriteHandle { rx })
    }

    /// Send the pending partial batch and wait for its result.
    ///
    /// Also waits for batches queued before it. Flushing an empty buffer
    /// sends nothing and returns an empty report.
    pub async fn flush(&self) -> Result<FlushReport> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            let WriterState { buffer, batches } = &mut *state;
            let batches = batches.as_ref().ok_or(WriterError::Closed)?;
            submit(
                batches,
                FlushRequest {
                    batch: buffer.take_batch(FlushTrigger::Manual),
                    reply: Some(tx),
                },
            )?;
        }

        rx.await.unwrap_or_else(|_| Err(abandoned()))
    }

    /// Flush the remainder, wait for all outstanding requests and stop.
    ///
    /// Later calls return the same result without sending anything. A close
    /// that is dropped part way is picked up by the next call.
    pub async fn close(&self) -> Result<()> {
        let mut shutdown = self.shutdown.lock().await;
        if let Some(result) = shutdown.terminal.as_ref() {
            debug!("Writer already closed");
            return result.clone();
        }

        if shutdown.final_reply.is_none() && shutdown.final_flush.is_none() {
            info!("Closing bulk writer for index {}", self.config.index);
            self.cancel.cancel();

            let (tx, rx) = oneshot::channel();
            let submitted = {
                let mut state = self.state.lock();
                let batch = state.buffer.take_batch(FlushTrigger::Shutdown);
                match state.batches.take() {
                    Some(batches) => submit(&batches, FlushRequest { batch, reply: Some(tx) }),
                    None => Err(WriterError::Closed),
                }
            };
            match submitted {
                Ok(()) => shutdown.final_reply = Some(rx),
                Err(e) => shutdown.final_flush = Some(Err(e)),
            }
        }

        if let Some(reply) = shutdown.final_reply.as_mut() {
            let outcome = reply.await.unwrap_or_else(|_| Err(abandoned()));
            shutdown.final_reply = None;
            shutdown.final_flush = Some(outcome.map(|_| ()));
        }

        if shutdown.background.is_none() {
            let background = match shutdown.flusher.as_mut() {
                Some(handle) => handle
                    .await
                    .unwrap_or_else(|e| Err(WriterError::Abandoned(format!("flusher task failed: {}", e)))),
                None => Ok(()),
            };
            shutdown.flusher = None;
            shutdown.background = Some(background);
        }

        let final_flush = shutdown.final_flush.clone().unwrap_or(Ok(()));
        let background = shutdown.background.clone().unwrap_or(Ok(()));
        let result = final_flush.and(background);
        match &result {
            Ok(()) => info!("Bulk writer closed"),
            Err(e) => error!("Bulk writer closed with error: {}", e),
        }

        shutdown.terminal = Some(result.clone());
        result
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().batches.is_none()
    }

    pub fn stats(&self) -> BufferStats {
        self.state.lock().buffer.stats()
    }
}

impl Drop for BulkWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Hand a request to the flusher; if it is gone, fail the batch's writes.
fn submit(batches: &mpsc::UnboundedSender<FlushRequest>, request: FlushRequest) -> Result<()> {
    batches.send(request).map_err(|mpsc::error::SendError(request)| {
        error!("Flusher stopped, abandoning batch");
        if let Some(mut batch) = request.batch {
            for entry in batch.entries.iter_mut() {
                entry.resolve(Err(abandoned()));
            }
        }
        abandoned()
    })
}

/// Consume batches one at a time until every sender is gone.
///
/// Errors of flushes nobody waits on are kept and returned at the end.
async fn run_flusher<T: BulkTransport>(
    transport: T,
    mut batches: mpsc::UnboundedReceiver<FlushRequest>,
) -> Result<()> {
    let mut first_error = None;

    while let Some(request) = batches.recv().await {
        let result = match request.batch {
            Some(batch) => flush_batch(&transport, batch).await,
            None => Ok(FlushReport::empty()),
        };

        match request.reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    error!("Background flush failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
    }

    debug!("Batch channel closed, flusher shutting down");
    first_error.map_or(Ok(()), Err)
}

#[instrument(skip(transport, batch), fields(
    batch_id = %batch.batch_id,
    actions = batch.len(),
    bytes = batch.total_size_bytes,
    reason = ?batch.flush_reason
))]
async fn flush_batch<T: BulkTransport>(transport: &T, batch: ReadyBatch) -> Result<FlushReport> {
    info!(
        "Flushing batch {} ({} actions, {} bytes, reason: {:?})",
        batch.batch_id,
        batch.len(),
        batch.total_size_bytes,
        batch.flush_reason
    );

    let response = transport.send_bulk(batch.payload()).await;
    confirm::settle(batch, response)
}

fn spawn_timer(
    state: Arc<Mutex<WriterState>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let check_every = (interval / 4).max(Duration::from_millis(10));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !flush_expired(&state, interval) {
                        break;
                    }
                }
            }
        }

        debug!("Flush timer stopped");
    })
}

/// Cut a time-threshold batch if one is due. Returns false once closed.
fn flush_expired(state: &Mutex<WriterState>, interval: Duration) -> bool {
    let mut state = state.lock();
    let WriterState { buffer, batches } = &mut *state;
    let Some(batches) = batches.as_ref() else {
        return false;
    };

    if !buffer.is_expired(interval) {
        return true;
    }

    if let Some(batch) = buffer.take_batch(FlushTrigger::TimeThreshold) {
        debug!("Time-based flush of {} actions", batch.len());
        if let Err(e) = submit(batches, FlushRequest { batch: Some(batch), reply: None }) {
            warn!("Failed to queue time-based batch: {}", e);
            return false;
        }
    }
    true
}
