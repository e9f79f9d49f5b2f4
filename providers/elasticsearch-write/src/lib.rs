//! Elasticsearch Write Provider
//!
//! Applies a stream of change events (insert, update, delete against a named
//! document type) to an Elasticsearch index through the bulk API, and tells
//! each event's confirmation sinks once its write is durable.
//!
//! This provider:
//! - Translates events into `index` / `update` / `delete` bulk actions
//! - Lifts `_id` and an optional parent field out of the document as the
//!   action's identifier and parent/routing value
//! - Micro-batches actions (count, size and time triggers) into NDJSON
//!   requests sent one at a time by a background flusher
//! - Confirms each event only after its item in the bulk response succeeded
//!
//! Configuration via environment variables:
//! - ELASTICSEARCH_URLS: comma separated endpoints
//! - ELASTICSEARCH_INDEX: target index
//! - ELASTICSEARCH_PARENT_FIELD: document field holding the parent link
//! - BULK_MAX_ACTIONS / BULK_MAX_BYTES / BULK_FLUSH_INTERVAL_MS: flush triggers

pub mod buffer;
pub mod bulk;
pub mod config;
pub mod confirm;
pub mod document;
pub mod error;
pub mod event;
pub mod routing;
pub mod translator;
pub mod transport;
pub mod writer;

pub use buffer::{BatchConfig, BufferStats, FlushTrigger};
pub use bulk::{BulkAction, BulkMethod};
pub use config::WriterConfig;
pub use confirm::FlushReport;
pub use document::{Document, Value};
pub use error::{ItemFailure, Result, WriterError};
pub use event::{ChangeEvent, Confirmation, ConfirmationSink, OperationKind};
pub use routing::RoutingInfo;
pub use transport::{BulkTransport, HttpBulkClient};
pub use writer::{create_writer, BulkWriter, WriteHandle};
