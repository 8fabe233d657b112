//! Dry-run sink: reports what would be sent, sends nothing

use async_trait::async_trait;
use netfeed_core::{BatchSink, DeliveryError, NormalizedRecord, PluginInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub struct DryRunSink {
    table: String,
    rows: AtomicU64,
}

impl DryRunSink {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: AtomicU64::new(0),
        }
    }

    /// Rows that would have been sent so far
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }
}

impl PluginInfo for DryRunSink {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn description(&self) -> &str {
        "Logs batches instead of sending them"
    }
}

#[async_trait]
impl BatchSink for DryRunSink {
    async fn deliver(&self, batch: &[NormalizedRecord]) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.rows.fetch_add(batch.len() as u64, Ordering::Relaxed);
        info!(
            "[dry-run] Would send batch of {} rows to {}",
            batch.len(),
            self.table
        );
        Ok(())
    }
}
