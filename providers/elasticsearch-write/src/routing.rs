//! Identifier and parent routing extraction
//!
//! The parent value is passed through verbatim. It is not checked against an
//! existing parent document; it only has to be the same value for every
//! document that must share a shard.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::Document;

/// Field Elasticsearch reserves for the document identifier
pub const ID_FIELD: &str = "_id";

/// Identifier and parent link for one bulk action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub id: Option<String>,
    /// Parent link, also used as the shard routing key
    pub parent: Option<String>,
}

impl RoutingInfo {
    pub fn routing(&self) -> Option<&str> {
        self.parent.as_deref()
    }
}

/// Split routing metadata out of a document.
///
/// `_id` and the configured parent field are removed from the returned body
/// when they hold a scalar. A configured parent field that is absent is not
/// an error: root documents of a parent-aware index have no parent.
pub fn resolve(mut document: Document, parent_field: Option<&str>) -> (RoutingInfo, Document) {
    let id = take_key(&mut document, ID_FIELD);

    let parent = match parent_field.filter(|field| !field.is_empty()) {
        Some(field) => take_key(&mut document, field),
        None => None,
    };

    (RoutingInfo { id, parent }, document)
}

fn take_key(document: &mut Document, field: &str) -> Option<String> {
    let value = document.get(field)?;
    match value.as_key() {
        Some(key) => {
            document.remove(field);
            Some(key)
        }
        None => {
            warn!("Field {} has no scalar value, leaving it in the document", field);
            None
        }
    }
}
