//! Plugin traits for the two external collaborators
//!
//! The pipeline reads raw lines from a [`CaptureSource`] and hands finished
//! batches to a [`BatchSink`]. Both are trait objects so the controller never
//! depends on a particular process-spawning API or HTTP client.

use crate::record::NormalizedRecord;
use async_trait::async_trait;
use std::process::ExitStatus;
use thiserror::Error;

/// Boxed error used to carry transport failures across crate boundaries
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Capture source errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture process exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("Capture source not started")]
    NotStarted,

    #[error("Capture source already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery errors. All of them end the current run.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Transport(#[source] BoxError),

    #[error("Storage rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// How a capture source ended
#[derive(Debug, Clone, Default)]
pub struct CaptureExit {
    /// Exit status of the capture process, when there was one
    pub status: Option<ExitStatus>,

    /// Last diagnostic lines written by the capture process
    pub stderr_tail: Vec<String>,

    /// Whether the process had to be killed after the grace period
    pub forced: bool,
}

impl CaptureExit {
    /// True unless a process reported a failing exit status
    pub fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(true)
    }
}

/// Basic plugin information
pub trait PluginInfo {
    /// Plugin name
    fn name(&self) -> &str;

    /// Plugin description
    fn description(&self) -> &str {
        ""
    }
}

/// Capture source - a forward-only sequence of raw capture lines
#[async_trait]
pub trait CaptureSource: PluginInfo + Send {
    /// Origin recorded in every record's metadata
    fn label(&self) -> &str;

    /// Start producing lines (spawns the capture process, if any)
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Next raw line, `Ok(None)` at end of stream.
    ///
    /// Must be cancel-safe: the controller races it against shutdown.
    async fn next_line(&mut self) -> Result<Option<String>, CaptureError>;

    /// Lines returned by `next_line` so far
    fn lines_read(&self) -> u64;

    /// Release the source and report how it ended
    async fn stop(&mut self) -> Result<CaptureExit, CaptureError>;
}

/// Batch sink - the write side of the storage endpoint
#[async_trait]
pub trait BatchSink: PluginInfo + Send + Sync {
    /// Deliver one batch, at most once
    async fn deliver(&self, batch: &[NormalizedRecord]) -> Result<(), DeliveryError>;
}
