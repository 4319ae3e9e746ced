//! # Audit Log
//!
//! Append-only record of everything the relay saw and decided. Records go to
//! an in-memory tail (served by `/api/logs`) and to any number of
//! [`AuditSink`]s, normally a JSON Lines file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::model::{ControlDecision, EvTelemetry};

/// Default number of records kept in memory.
pub const DEFAULT_TAIL_CAPACITY: usize = 500;

/// Failures while persisting a record.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not be opened or written.
    #[error("audit sink {path}: {source}")]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The record could not be encoded.
    #[error("audit record did not serialize: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditRecord {
    /// Telemetry that passed validation.
    #[serde(rename = "EV_PRIORITY_REQ_RECEIVED")]
    TelemetryReceived {
        /// Write time.
        ts: DateTime<Utc>,
        /// The validated record.
        ev: EvTelemetry,
    },
    /// A decision produced for an EV.
    #[serde(rename = "RSU_DECISION")]
    DecisionMade {
        /// Write time.
        ts: DateTime<Utc>,
        /// EV the decision is for.
        ev_id: String,
        /// The decision as broadcast.
        decision: ControlDecision,
    },
    /// A payload that failed validation.
    #[serde(rename = "INVALID_EV_MSG")]
    InvalidInput {
        /// Write time.
        ts: DateTime<Utc>,
        /// Validation error text.
        error: String,
        /// The rejected payload, or the lossy body text when it was not JSON.
        payload: Value,
    },
}

impl AuditRecord {
    /// Record time.
    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            AuditRecord::TelemetryReceived { ts, .. }
            | AuditRecord::DecisionMade { ts, .. }
            | AuditRecord::InvalidInput { ts, .. } => *ts,
        }
    }

    /// The `type` tag as written.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditRecord::TelemetryReceived { .. } => "EV_PRIORITY_REQ_RECEIVED",
            AuditRecord::DecisionMade { .. } => "RSU_DECISION",
            AuditRecord::InvalidInput { .. } => "INVALID_EV_MSG",
        }
    }
}

/// Durable destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persists one record. Must be atomic per record.
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Sink name for logging.
    fn name(&self) -> String;
}

/// Appends one JSON object per line to a file.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: AsyncMutex<File>,
}

impl JsonLinesAuditSink {
    /// Opens (or creates) `path` for appending, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| AuditError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;

        Ok(Self { path, file: AsyncMutex::new(file) })
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        let io_err = |source| AuditError::Io { path: self.path.clone(), source };
        file.write_all(&line).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// What a sink failure means for the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPolicy {
    /// Log and carry on.
    #[default]
    BestEffort,
    /// Fail the operation that produced the record.
    Strict,
}

/// In-memory tail plus durable sinks.
pub struct AuditLog {
    tail: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
    sinks: Vec<Arc<dyn AuditSink>>,
    policy: AuditPolicy,
}

impl AuditLog {
    /// A log with only the in-memory tail.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            tail: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            sinks: Vec::new(),
            policy: AuditPolicy::BestEffort,
        }
    }

    /// Adds a durable sink.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Sets the failure policy.
    pub fn with_policy(mut self, policy: AuditPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The failure policy.
    pub fn policy(&self) -> AuditPolicy {
        self.policy
    }

    /// Appends `record` to the tail and every sink.
    ///
    /// The tail always receives the record. The first sink error is returned
    /// after all sinks were tried; whether that is fatal is the caller's call
    /// (see [`AuditLog::policy`]).
    pub async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.append(&record).await {
                log::warn!("Audit sink {} failed: {}", sink.name(), e);
                first_err.get_or_insert(e);
            }
        }

        {
            let mut tail = self.tail.lock().unwrap_or_else(|p| p.into_inner());
            if tail.len() == self.capacity {
                tail.pop_front();
            }
            tail.push_back(record);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let tail = self.tail.lock().unwrap_or_else(|p| p.into_inner());
        let skip = tail.len().saturating_sub(limit);
        tail.iter().skip(skip).cloned().collect()
    }

    /// Records currently held in memory.
    pub fn len(&self) -> usize {
        self.tail.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Whether the tail is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory(DEFAULT_TAIL_CAPACITY)
    }
}
