//! netfeed core - record model, parsing, batching and pipeline orchestration
//!
//! This crate provides the pieces every netfeed front-end shares:
//!
//! - **Records**: the storage-ready shape of one capture event
//! - **Parser**: lenient conversion of tab-separated dissector output
//! - **Batcher**: size and quota bounded accumulation
//! - **Plugins**: the `CaptureSource` and `BatchSink` seams
//! - **Pipeline**: the streaming loop, draining and cancellation

pub mod batcher;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod plugins;
pub mod record;
pub mod shutdown;

// Re-export commonly used types
pub use batcher::Batcher;
pub use config::{
    CaptureMode, CaptureTarget, ConfigError, ConfigLoader, NetfeedConfig, PipelineConfig,
    StorageTarget,
};
pub use parser::parse_line;
pub use pipeline::{IngestReport, Pipeline, PipelineError, StopReason};
pub use plugins::{
    BatchSink, CaptureError, CaptureExit, CaptureSource, DeliveryError, PluginInfo,
};
pub use record::{NormalizedRecord, RecordMetadata};
pub use shutdown::{PipelineState, ShutdownHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
