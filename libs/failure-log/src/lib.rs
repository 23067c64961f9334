//! # Failure Log Side-Channel
//!
//! Emits failure traces to up to three sinks: a local JSON-lines file, the
//! central log topic on the stream broker, and a structured search index.
//! Used exclusively on the failure path — nothing here runs when a delivery
//! succeeds.
//!
//! `report` never fails. A sink that errors is skipped silently; a trace
//! about a failure must not produce a second failure that masks the first.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use stream_broker::StreamPublisher;

/// One failed delivery or publish, as shipped to the sinks.
#[derive(Debug, Clone, Serialize)]
pub struct FailureTrace {
    pub service: String,
    pub type_name: String,
    /// Where in the protocol the failure happened ("transact",
    /// "transaction-config", "outbox-publish", ...).
    pub stage: String,
    pub error: String,
    pub message_id: Option<String>,
    pub retry_count: u32,
    pub occurred_at: DateTime<Utc>,
}

impl FailureTrace {
    pub fn new(
        service: impl Into<String>,
        type_name: impl Into<String>,
        stage: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            type_name: type_name.into(),
            stage: stage.into(),
            error: error.into(),
            message_id: None,
            retry_count: 0,
            occurred_at: Utc::now(),
        }
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }
}

#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn emit(&self, trace: &FailureTrace) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// Fans a trace out to the configured sinks. Infallible by design.
#[derive(Default)]
pub struct FailureLogger {
    sinks: Vec<Arc<dyn FailureSink>>,
}

impl FailureLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn report(&self, trace: FailureTrace) {
        error!(
            service = %trace.service,
            type_name = %trace.type_name,
            stage = %trace.stage,
            message_id = trace.message_id.as_deref().unwrap_or(""),
            retry_count = trace.retry_count,
            error = %trace.error,
            "delivery failure"
        );

        for sink in &self.sinks {
            if let Err(e) = sink.emit(&trace).await {
                debug!(sink = sink.name(), error = %e, "failure sink error, skipped");
            }
        }
    }
}

/// JSON-lines append to a local file.
pub struct FileFailureSink {
    path: PathBuf,
}

impl FileFailureSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FailureSink for FileFailureSink {
    async fn emit(&self, trace: &FailureTrace) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(trace)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Ships traces to a fixed topic on the stream broker.
pub struct StreamFailureSink {
    publisher: Arc<StreamPublisher>,
    topic: String,
}

impl StreamFailureSink {
    pub fn new(publisher: Arc<StreamPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl FailureSink for StreamFailureSink {
    async fn emit(&self, trace: &FailureTrace) -> anyhow::Result<()> {
        let payload = serde_json::to_string(trace)?;
        self.publisher
            .publish_fresh(&self.topic, "FailureTrace", &payload)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}

/// Indexes traces into a document search index over HTTP.
pub struct SearchIndexSink {
    http: reqwest::Client,
    base_url: String,
    index: String,
}

impl SearchIndexSink {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            index: index.into(),
        }
    }
}

#[async_trait]
impl FailureSink for SearchIndexSink {
    async fn emit(&self, trace: &FailureTrace) -> anyhow::Result<()> {
        let url = format!(
            "{}/{}/_doc",
            self.base_url.trim_end_matches('/'),
            self.index
        );
        let response = self.http.post(&url).json(trace).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("search index responded {}", response.status());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "search-index"
    }
}
