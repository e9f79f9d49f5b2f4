//! In-memory Elasticsearch bulk endpoint for wiremock

#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use elasticsearch_write_provider::{BatchConfig, WriterConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDoc {
    pub type_name: String,
    pub source: Map<String, Value>,
    pub routing: Option<String>,
    pub parent: Option<String>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<(String, String), StoredDoc>,
    reject_ids: HashSet<String>,
    next_id: u64,
    requests: Vec<Vec<Value>>,
}

/// Applies bulk requests to an in-memory document map
#[derive(Clone, Default)]
pub struct FakeElasticsearch {
    inner: Arc<Mutex<Inner>>,
    delay: Option<Duration>,
}

impl FakeElasticsearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail items targeting `id` with a mapping error
    pub fn reject_id(&self, id: &str) {
        self.inner.lock().unwrap().reject_ids.insert(id.to_string());
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    pub fn count(&self, type_name: Option<&str>) -> usize {
        self.inner
            .lock()
            .unwrap()
            .docs
            .values()
            .filter(|d| type_name.map_or(true, |t| d.type_name == t))
            .count()
    }

    pub fn get(&self, type_name: &str, id: &str) -> Option<StoredDoc> {
        self.inner
            .lock()
            .unwrap()
            .docs
            .get(&(type_name.to_string(), id.to_string()))
            .cloned()
    }

    /// Decoded NDJSON lines of every request received, in arrival order
    pub fn requests(&self) -> Vec<Vec<Value>> {
        self.inner.lock().unwrap().requests.clone()
    }

    fn apply(&self, body: &[u8]) -> Value {
        let lines: Vec<Value> = std::str::from_utf8(body)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(lines.clone());

        let mut items = Vec::new();
        let mut errors = false;
        let mut lines = lines.into_iter();

        while let Some(action) = lines.next() {
            let (method, meta) = action.as_object().unwrap().iter().next().unwrap();
            let method = method.clone();
            let meta = meta.as_object().unwrap().clone();
            let type_name = meta["_type"].as_str().unwrap().to_string();
            let id = meta.get("_id").and_then(|v| v.as_str()).map(str::to_string);
            let source = match method.as_str() {
                "delete" => None,
                _ => lines.next(),
            };

            let rejected = id
                .as_ref()
                .map_or(false, |id| inner.reject_ids.contains(id));
            let (id, status, error) = if rejected {
                (
                    id.unwrap_or_default(),
                    400,
                    Some(json!({"type": "mapper_parsing_exception", "reason": "failed to parse"})),
                )
            } else {
                apply_one(&mut inner, &method, &type_name, id, &meta, source)
            };

            if error.is_some() {
                errors = true;
            }
            let mut item = json!({"_index": meta["_index"], "_type": type_name, "_id": id, "status": status});
            if let Some(error) = error {
                item["error"] = error;
            }
            items.push(json!({ method: item }));
        }

        json!({"took": 1, "errors": errors, "items": items})
    }
}

fn apply_one(
    inner: &mut Inner,
    method: &str,
    type_name: &str,
    id: Option<String>,
    meta: &Map<String, Value>,
    source: Option<Value>,
) -> (String, u16, Option<Value>) {
    let id = id.unwrap_or_else(|| {
        inner.next_id += 1;
        format!("auto-{}", inner.next_id)
    });
    let key = (type_name.to_string(), id.clone());
    let routing = meta.get("routing").and_then(|v| v.as_str()).map(str::to_string);
    let parent = meta.get("parent").and_then(|v| v.as_str()).map(str::to_string);

    match method {
        "index" => {
            let source = source.and_then(|s| s.as_object().cloned()).unwrap_or_default();
            let existed = inner
                .docs
                .insert(
                    key,
                    StoredDoc {
                        type_name: type_name.to_string(),
                        source,
                        routing,
                        parent,
                    },
                )
                .is_some();
            (id, if existed { 200 } else { 201 }, None)
        }
        "update" => match inner.docs.get_mut(&key) {
            Some(doc) => {
                let partial = source
                    .and_then(|s| s.get("doc").and_then(|d| d.as_object().cloned()))
                    .unwrap_or_default();
                doc.source.extend(partial);
                (id, 200, None)
            }
            None => (
                id,
                404,
                Some(json!({"type": "document_missing_exception", "reason": "document missing"})),
            ),
        },
        "delete" => match inner.docs.remove(&key) {
            Some(_) => (id, 200, None),
            None => (id, 404, None),
        },
        other => (
            id,
            400,
            Some(json!({"type": "illegal_argument_exception", "reason": other})),
        ),
    }
}

impl Respond for FakeElasticsearch {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = self.apply(&request.body);
        let template = ResponseTemplate::new(200).set_body_json(body);
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

pub fn writer_config(server: &MockServer, index: &str, max_actions: usize) -> WriterConfig {
    WriterConfig::new(vec![server.uri()], index).with_batch(BatchConfig {
        max_actions,
        max_bytes: 5 * 1024 * 1024,
        flush_interval_ms: None,
    })
}
