//! Elasticsearch bulk API wire format
//!
//! Requests are NDJSON: one action line per entry, followed by a source line
//! for `index` and `update`. Responses list one item per request entry, in
//! request order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::document::Document;
use crate::error::Result;
use crate::routing::RoutingInfo;

/// Bulk action method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkMethod {
    Index,
    Update,
    Delete,
}

impl BulkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkMethod::Index => "index",
            BulkMethod::Update => "update",
            BulkMethod::Delete => "delete",
        }
    }
}

/// One translated write, ready to be encoded into a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkAction {
    pub method: BulkMethod,
    pub index: String,
    pub type_name: String,
    pub routing: RoutingInfo,
    /// Source document; always `None` for deletes
    pub body: Option<Document>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type")]
    type_name: &'a str,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    routing: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

#[derive(Serialize)]
struct PartialUpdate<'a> {
    doc: &'a Document,
}

impl BulkAction {
    /// Encode the action and its source as NDJSON lines.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let meta = ActionMeta {
            index: &self.index,
            type_name: &self.type_name,
            id: self.routing.id.as_deref(),
            routing: self.routing.routing(),
            parent: self.routing.parent.as_deref(),
        };
        let mut header = HashMap::with_capacity(1);
        header.insert(self.method.as_str(), meta);

        let mut buf = serde_json::to_vec(&header)?;
        buf.push(b'\n');

        // index and update always carry a source line, empty when no body
        let empty = Document::new();
        let body = self.body.as_ref().unwrap_or(&empty);
        match self.method {
            BulkMethod::Delete => {}
            BulkMethod::Index => {
                serde_json::to_writer(&mut buf, body)?;
                buf.push(b'\n');
            }
            BulkMethod::Update => {
                serde_json::to_writer(&mut buf, &PartialUpdate { doc: body })?;
                buf.push(b'\n');
            }
        }

        Ok(buf)
    }
}

/// Bulk API response body
#[derive(Debug, Clone, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItemResult>>,
}

impl BulkResponse {
    /// Per-item results in request order, unwrapped from their method key
    pub fn into_results(self) -> Vec<BulkItemResult> {
        self.items
            .into_iter()
            .filter_map(|item| item.into_values().next())
            .collect()
    }
}

/// Outcome of one bulk entry
#[derive(Debug, Clone, Deserialize)]
pub struct BulkItemResult {
    #[serde(rename = "_index", default)]
    pub index: Option<String>,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl BulkItemResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Human readable failure reason from the item's error object
    pub fn reason(&self) -> String {
        match &self.error {
            Some(serde_json::Value::Object(err)) => {
                let kind = err.get("type").and_then(|v| v.as_str()).unwrap_or("error");
                match err.get("reason").and_then(|v| v.as_str()) {
                    Some(reason) => format!("{}: {}", kind, reason),
                    None => kind.to_string(),
                }
            }
            Some(other) => other.to_string(),
            None => self
                .result
                .clone()
                .unwrap_or_else(|| format!("status {}", self.status)),
        }
    }
}
