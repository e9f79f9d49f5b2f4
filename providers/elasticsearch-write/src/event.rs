//! Change events and their confirmation sinks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::warn;

use crate::document::Document;
use crate::error::WriterError;

/// Kind of change carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Command => "command",
            OperationKind::Noop => "noop",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = WriterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            "command" => Ok(OperationKind::Command),
            "noop" => Ok(OperationKind::Noop),
            other => Err(WriterError::UnsupportedOperation(other.to_string())),
        }
    }
}

/// Notice delivered to a sink once its event is durable in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub op: OperationKind,
    pub type_name: String,
    /// Identifier of the written document, store-assigned ids included
    pub id: Option<String>,
}

/// Upstream handle notified when an event's write is applied
#[derive(Debug, Clone)]
pub struct ConfirmationSink {
    tx: mpsc::UnboundedSender<Confirmation>,
}

impl ConfirmationSink {
    /// Create a sink and the receiver that observes its confirmations
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Confirmation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::UnboundedSender<Confirmation>) -> Self {
        Self { tx }
    }

    fn notify(&self, confirmation: Confirmation) {
        if self.tx.send(confirmation).is_err() {
            warn!("Confirmation receiver dropped before delivery");
        }
    }
}

/// A single insert, update or delete against a document type
#[derive(Debug)]
pub struct ChangeEvent {
    op: OperationKind,
    type_name: String,
    document: Document,
    confirms: Vec<ConfirmationSink>,
}

impl ChangeEvent {
    pub fn new(op: OperationKind, type_name: impl Into<String>, document: Document) -> Self {
        Self {
            op,
            type_name: type_name.into(),
            document,
            confirms: Vec::new(),
        }
    }

    /// Register a confirmation sink; sinks fire in registration order
    pub fn with_confirms(mut self, sink: ConfirmationSink) -> Self {
        self.confirms.push(sink);
        self
    }

    pub fn op(&self) -> OperationKind {
        self.op
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn confirm_count(&self) -> usize {
        self.confirms.len()
    }

    /// Fire every sink once. Consumes the event so it cannot confirm twice.
    pub(crate) fn confirm(self, id: Option<String>) {
        let confirmation = Confirmation {
            op: self.op,
            type_name: self.type_name,
            id,
        };
        for sink in &self.confirms {
            sink.notify(confirmation.clone());
        }
    }
}
