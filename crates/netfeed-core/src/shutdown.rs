//! Process-wide pipeline state and cooperative cancellation

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Pipeline run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Stopping,
    Stopped,
}

/// Shared handle over the pipeline state.
///
/// Written by signal delivery and by the controller's own shutdown sequence,
/// read by the streaming loop between lines.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<PipelineState>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PipelineState::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the pipeline to stop after the current line.
    ///
    /// Returns true if this call moved the state out of `Running`.
    pub fn request_stop(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Stopping;
                true
            } else {
                false
            }
        })
    }

    /// Mark the pipeline as fully stopped
    pub fn mark_stopped(&self) {
        self.tx.send_replace(PipelineState::Stopped);
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    /// Resolves once the state has left `Running`
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| *state != PipelineState::Running).await;
    }

    /// Spawn a task that requests a stop on Ctrl-C, and on SIGTERM under unix
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            if handle.request_stop() {
                info!("Interrupt received, draining pipeline");
            }
        })
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        }
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }
}
