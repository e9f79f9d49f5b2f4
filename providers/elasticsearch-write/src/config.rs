use serde::{Deserialize, Serialize};
use std::env;

use crate::buffer::BatchConfig;
use crate::error::{Result, WriterError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    // Elasticsearch endpoints, used round-robin
    pub urls: Vec<String>,
    pub index: String,

    // Field holding the parent link; also used as the routing key
    pub parent_field: Option<String>,

    pub request_timeout_seconds: u64,

    pub batch: BatchConfig,
}

impl WriterConfig {
    pub fn new(urls: Vec<String>, index: impl Into<String>) -> Self {
        Self {
            urls,
            index: index.into(),
            ..Default::default()
        }
    }

    pub fn with_parent_field(mut self, field: impl Into<String>) -> Self {
        self.parent_field = Some(field.into());
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let config = WriterConfig {
            urls: env::var("ELASTICSEARCH_URLS")
                .unwrap_or_else(|_| "http://127.0.0.1:9200".to_string())
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),

            index: env::var("ELASTICSEARCH_INDEX")?,

            parent_field: env::var("ELASTICSEARCH_PARENT_FIELD")
                .ok()
                .filter(|f| !f.is_empty()),

            request_timeout_seconds: env::var("ELASTICSEARCH_REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|e| WriterError::Config(format!("ELASTICSEARCH_REQUEST_TIMEOUT_SECONDS: {}", e)))?,

            batch: BatchConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(WriterError::Config("no Elasticsearch URLs configured".to_string()));
        }
        if self.index.trim().is_empty() {
            return Err(WriterError::Config("index name is empty".to_string()));
        }
        self.batch.validate()
    }

    /// Parent field, with an empty string meaning "not configured"
    pub fn parent_field(&self) -> Option<&str> {
        self.parent_field.as_deref().filter(|f| !f.is_empty())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            urls: vec!["http://127.0.0.1:9200".to_string()],
            index: String::new(),
            parent_field: None,
            request_timeout_seconds: 30,
            batch: BatchConfig::default(),
        }
    }
}
