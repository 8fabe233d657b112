//! JSONL sink - one record per line to stdout or a file

use async_trait::async_trait;
use netfeed_core::{BatchSink, DeliveryError, NormalizedRecord, PluginInfo};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Writes each delivered record as a JSON line
pub struct JsonlSink {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
}

impl JsonlSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write to `path`, appending or truncating
    pub fn create(path: &Path, append: bool) -> io::Result<Self> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        info!("JSONL sink writing to: {}", path.display());
        Ok(Self::new(Box::new(file)))
    }
}

impl PluginInfo for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn description(&self) -> &str {
        "Writes records as JSON lines"
    }
}

#[async_trait]
impl BatchSink for JsonlSink {
    async fn deliver(&self, batch: &[NormalizedRecord]) -> Result<(), DeliveryError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        for record in batch {
            serde_json::to_writer(&mut *writer, record)?;
            writer
                .write_all(b"\n")
                .map_err(|e| DeliveryError::Transport(Box::new(e)))?;
        }
        writer
            .flush()
            .map_err(|e| DeliveryError::Transport(Box::new(e)))
    }
}
