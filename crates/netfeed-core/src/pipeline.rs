//! Ingestion pipeline - drives capture lines through parsing and batching
//! into the sink
//!
//! The controller runs `starting → streaming → draining → stopped` on a
//! single task. Network delivery happens inline, so a slow endpoint
//! back-pressures the capture pipe rather than buffering in memory.

use crate::batcher::Batcher;
use crate::config::PipelineConfig;
use crate::parser::parse_line;
use crate::plugins::{BatchSink, CaptureError, CaptureExit, CaptureSource, DeliveryError};
use crate::record::NormalizedRecord;
use crate::shutdown::ShutdownHandle;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Pipeline errors, each carrying the rows delivered before the failure
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Capture failed after {sent} rows: {source}")]
    Capture {
        sent: u64,
        #[source]
        source: CaptureError,
    },

    #[error("Delivery failed after {sent} rows: {source}")]
    Delivery {
        sent: u64,
        #[source]
        source: DeliveryError,
    },
}

impl PipelineError {
    /// Rows successfully delivered before the run failed
    pub fn rows_sent(&self) -> u64 {
        match self {
            PipelineError::Capture { sent, .. } | PipelineError::Delivery { sent, .. } => *sent,
        }
    }
}

/// Controller phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Streaming,
    Draining,
    Stopped,
}

/// Why the streaming loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The capture source ran out of lines
    EndOfInput,
    /// The global record limit was delivered
    LimitReached,
    /// A stop was requested
    Cancelled,
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub rows_sent: u64,
    pub batches_sent: u64,
    pub lines_read: u64,
    pub lines_discarded: u64,
    pub stopped_by: StopReason,
    pub capture: Option<CaptureExit>,
}

#[derive(Debug, Default)]
struct RunStats {
    rows_sent: u64,
    batches_sent: u64,
    lines_discarded: u64,
}

/// The ingestion pipeline
pub struct Pipeline {
    source: Box<dyn CaptureSource>,
    sink: Box<dyn BatchSink>,
    shutdown: ShutdownHandle,
    batch_size: usize,
    limit: Option<u64>,
    phase: Phase,
}

impl Pipeline {
    /// Create a pipeline with a batch size of one and no limit
    pub fn new(
        source: Box<dyn CaptureSource>,
        sink: Box<dyn BatchSink>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            source,
            sink,
            shutdown,
            batch_size: 1,
            limit: None,
            phase: Phase::Starting,
        }
    }

    /// Create a pipeline using the batching settings of `config`
    pub fn from_config(
        config: &PipelineConfig,
        source: Box<dyn CaptureSource>,
        sink: Box<dyn BatchSink>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self::new(source, sink, shutdown)
            .with_batch_size(config.batch_size)
            .with_limit(config.limit)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the pipeline to completion
    pub async fn run(mut self) -> Result<IngestReport, PipelineError> {
        self.enter(Phase::Starting);
        if let Err(source) = self.source.start().await {
            self.enter(Phase::Stopped);
            self.shutdown.mark_stopped();
            return Err(PipelineError::Capture { sent: 0, source });
        }
        info!("Started capture source: {}", self.source.name());

        self.enter(Phase::Streaming);
        let mut batcher = Batcher::new(self.batch_size, self.limit);
        let mut stats = RunStats::default();
        let streamed = self.stream(&mut batcher, &mut stats).await;

        self.enter(Phase::Draining);
        let drained = match streamed {
            Ok(reason) => match batcher.finish() {
                Some(batch) => Self::deliver(self.sink.as_ref(), batch, &mut stats)
                    .await
                    .map(|_| reason),
                None => Ok(reason),
            },
            // Rows already parsed are still delivered; the read error stays the result
            Err(PipelineError::Capture { source, .. }) => {
                if let Some(batch) = batcher.finish() {
                    if let Err(e) = Self::deliver(self.sink.as_ref(), batch, &mut stats).await {
                        warn!("Failed to flush pending rows after capture error: {}", e);
                    }
                }
                Err(PipelineError::Capture {
                    sent: stats.rows_sent,
                    source,
                })
            }
            // The failed batch is gone and the endpoint is unusable
            Err(e) => Err(e),
        };

        let capture = match self.source.stop().await {
            Ok(exit) => {
                log_stderr_tail(&exit);
                Some(exit)
            }
            Err(e) => {
                warn!("Error stopping capture source {}: {}", self.source.name(), e);
                None
            }
        };
        let lines_read = self.source.lines_read();

        self.enter(Phase::Stopped);
        self.shutdown.mark_stopped();

        let stopped_by = drained?;

        if let Some(exit) = &capture {
            if !exit.success() && lines_read == 0 && stopped_by != StopReason::Cancelled {
                return Err(PipelineError::Capture {
                    sent: stats.rows_sent,
                    source: CaptureError::Exited {
                        status: exit
                            .status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unknown status".to_string()),
                        stderr: exit.stderr_tail.join("\n"),
                    },
                });
            }
        }

        info!(
            "Ingest finished ({:?}): {} rows in {} batches, {} of {} lines discarded",
            stopped_by, stats.rows_sent, stats.batches_sent, stats.lines_discarded, lines_read
        );

        Ok(IngestReport {
            rows_sent: stats.rows_sent,
            batches_sent: stats.batches_sent,
            lines_read,
            lines_discarded: stats.lines_discarded,
            stopped_by,
            capture,
        })
    }

    async fn stream(
        &mut self,
        batcher: &mut Batcher,
        stats: &mut RunStats,
    ) -> Result<StopReason, PipelineError> {
        let label = self.source.label().to_string();

        loop {
            if !self.shutdown.is_running() {
                return Ok(StopReason::Cancelled);
            }
            if batcher.is_exhausted() {
                return Ok(StopReason::LimitReached);
            }

            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(StopReason::Cancelled),
                next = self.source.next_line() => next,
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(StopReason::EndOfInput),
                Err(source) => {
                    return Err(PipelineError::Capture {
                        sent: stats.rows_sent,
                        source,
                    })
                }
            };

            match parse_line(&line, &label) {
                Some(record) => {
                    if let Some(batch) = batcher.push(record) {
                        Self::deliver(self.sink.as_ref(), batch, stats).await?;
                    }
                }
                None => {
                    stats.lines_discarded += 1;
                    trace!("Discarded capture line: {:?}", line);
                }
            }
        }
    }

    async fn deliver(
        sink: &dyn BatchSink,
        batch: Vec<NormalizedRecord>,
        stats: &mut RunStats,
    ) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        sink.deliver(&batch)
            .await
            .map_err(|source| PipelineError::Delivery {
                sent: stats.rows_sent,
                source,
            })?;

        stats.rows_sent += batch.len() as u64;
        stats.batches_sent += 1;
        info!("Rows delivered: {}", stats.rows_sent);
        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Pipeline phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

fn log_stderr_tail(exit: &CaptureExit) {
    if exit.stderr_tail.is_empty() {
        return;
    }
    info!(
        "Capture stderr (last lines):\n{}",
        exit.stderr_tail.join("\n")
    );
}
