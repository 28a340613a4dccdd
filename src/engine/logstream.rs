//! Per-job log buffering and fan-out.
//!
//! Every job keeps a bounded tail window of structured entries. Local
//! subscribers ride a broadcast channel; an optional [`LogTransport`] relays
//! entries to other instances. The stream is fully functional with the
//! default no-op transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    fn new(level: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level: level.to_string(),
            message: message.into(),
            context: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new("info", message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new("warn", message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error", message)
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Cross-instance relay seam. Delivery is at-least-once and best-effort;
/// consumers tolerate duplicates and reordering across instance boundaries.
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn publish(&self, job_id: &str, entry: &LogEntry) -> Result<()>;
}

/// Default transport: local-only fan-out.
pub struct NoopTransport;

#[async_trait]
impl LogTransport for NoopTransport {
    async fn publish(&self, _job_id: &str, _entry: &LogEntry) -> Result<()> {
        Ok(())
    }
}

struct JobBuffer {
    entries: VecDeque<LogEntry>,
    tx: broadcast::Sender<LogEntry>,
}

#[derive(Clone)]
pub struct LogStream {
    capacity: usize,
    buffers: Arc<Mutex<HashMap<String, JobBuffer>>>,
    transport: Arc<dyn LogTransport>,
}

impl LogStream {
    pub fn new(capacity: usize) -> Self {
        Self::with_transport(capacity, Arc::new(NoopTransport))
    }

    pub fn with_transport(capacity: usize, transport: Arc<dyn LogTransport>) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: Arc::new(Mutex::new(HashMap::new())),
            transport,
        }
    }

    /// Buffers an entry (evicting the oldest past capacity), fans it out to
    /// local subscribers, then hands it to the transport. Transport failures
    /// never fail the append.
    pub async fn append(&self, job_id: &str, entry: LogEntry) {
        self.store_local(job_id, entry.clone()).await;
        if let Err(e) = self.transport.publish(job_id, &entry).await {
            warn!("Log transport publish failed for job {}: {}", job_id, e);
        }
    }

    /// Entries relayed from another instance: buffered and fanned out locally
    /// without being re-published.
    pub async fn append_remote(&self, job_id: &str, entry: LogEntry) {
        self.store_local(job_id, entry).await;
    }

    async fn store_local(&self, job_id: &str, entry: LogEntry) {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry(job_id.to_string())
            .or_insert_with(|| JobBuffer {
                entries: VecDeque::new(),
                tx: broadcast::channel(self.capacity).0,
            });
        if buffer.entries.len() >= self.capacity {
            buffer.entries.pop_front();
        }
        buffer.entries.push_back(entry.clone());
        // No receivers is fine; the buffer still serves tail().
        let _ = buffer.tx.send(entry);
    }

    /// Live subscription for one job. Dropping the receiver unsubscribes;
    /// slow receivers observe a lag error rather than blocking appends.
    pub async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<LogEntry> {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry(job_id.to_string())
            .or_insert_with(|| JobBuffer {
                entries: VecDeque::new(),
                tx: broadcast::channel(self.capacity).0,
            });
        buffer.tx.subscribe()
    }

    /// Last `n` entries for a job, oldest first.
    pub async fn tail(&self, job_id: &str, n: usize) -> Vec<LogEntry> {
        let buffers = self.buffers.lock().await;
        match buffers.get(job_id) {
            Some(buffer) => {
                let skip = buffer.entries.len().saturating_sub(n);
                buffer.entries.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }
}
