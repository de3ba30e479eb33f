//! Audit emitter: outbound fingerprints for external tamper-evident logging.
//!
//! The emitter is a stateless relay. For every state-changing event it
//! builds an [`AuditRecord`] carrying a domain-separated fingerprint of the
//! event content and hands it to a configured sink. The sink handle is
//! set-once: reconfiguring an already-set destination fails rather than
//! silently overwriting, so an operator cannot retroactively redirect the
//! trail. With no sink configured, emission is a no-op.
//!
//! Sink write failures never fail the underlying ledger write; they are
//! logged and dropped. The external log's own consistency guarantees are
//! its concern, not the engine's.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::identity::AgentId;

/// Domain separator for audit record fingerprints.
const AUDIT_FINGERPRINT_DOMAIN: &[u8] = b"merit.audit_record.v1";

/// Errors from audit sink operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not serialize the record.
    #[error("audit record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The sink could not write the record.
    #[error("audit sink write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One audit record, emitted (not stored) per state-changing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The subject the event concerns; empty for engine-wide events.
    pub subject: AgentId,
    /// Stable event-kind name.
    pub kind: String,
    /// Hex-encoded domain-separated blake3 fingerprint of the event.
    pub fingerprint: String,
    /// Unix seconds when the event occurred.
    pub timestamp: u64,
}

impl AuditRecord {
    /// Builds the record for an event, fingerprinting its serialized form.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialize`] if the event cannot be serialized.
    /// The fingerprint always covers the real payload; there is no
    /// empty-payload fallback.
    pub fn for_event(event: &EngineEvent, timestamp: u64) -> Result<Self, AuditError> {
        let payload = serde_json::to_vec(event)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(AUDIT_FINGERPRINT_DOMAIN);
        hasher.update(&(payload.len() as u64).to_le_bytes());
        hasher.update(&payload);
        hasher.update(&timestamp.to_le_bytes());

        Ok(Self {
            subject: event.subject().cloned().unwrap_or_default(),
            kind: event.kind().to_string(),
            fingerprint: hex::encode(hasher.finalize().as_bytes()),
            timestamp,
        })
    }
}

/// Destination for audit records.
///
/// Object-safe so the engine can hold any sink behind `Arc<dyn AuditSink>`.
pub trait AuditSink: Send + Sync {
    /// Records one audit record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the record cannot be persisted. The engine
    /// logs and drops the error; it never fails the originating write.
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// A restorable description of the destination, if it has one.
    ///
    /// File-backed sinks return their path so a snapshot restore can
    /// reattach the same destination. In-memory sinks return `None`.
    fn destination(&self) -> Option<&str> {
        None
    }
}

/// In-memory sink for tests and introspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record seen so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

/// Append-only file sink: one JSON line per record.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    path_str: String,
}

impl JsonlSink {
    /// Creates a sink appending to `path`. The file is created lazily on
    /// the first record.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path_str = path.to_string_lossy().into_owned();
        Self { path, path_str }
    }

    /// The file this sink appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn destination(&self) -> Option<&str> {
        Some(&self.path_str)
    }
}

/// Set-once relay from engine events to the configured sink.
#[derive(Default)]
pub struct AuditEmitter {
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditEmitter {
    /// Creates an unconfigured emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a sink is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// The configured sink's restorable destination, if any.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.sink.as_deref().and_then(AuditSink::destination)
    }

    /// Configures the sink. Set-once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyConfigured`] if a sink is already set.
    pub fn configure(&mut self, sink: Arc<dyn AuditSink>) -> Result<(), EngineError> {
        if self.sink.is_some() {
            return Err(EngineError::AlreadyConfigured {
                what: "audit log destination",
            });
        }
        self.sink = Some(sink);
        Ok(())
    }

    /// Emits one record per event. No-op when unconfigured; record build
    /// and sink failures are logged and never propagated.
    pub fn emit_all(&self, events: &[EngineEvent], timestamp: u64) {
        let Some(sink) = &self.sink else {
            return;
        };
        for event in events {
            match AuditRecord::for_event(event, timestamp) {
                Ok(record) => {
                    if let Err(error) = sink.record(&record) {
                        tracing::warn!(kind = record.kind, %error, "audit sink write failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(kind = event.kind(), %error, "audit record build failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("configured", &self.is_configured())
            .field("destination", &self.destination())
            .finish()
    }
}
