//! Capture source over already-dissected text
//!
//! Replays saved `tshark -T fields` output (a file or stdin) through the
//! same pipeline as a live capture.

use crate::lines::LineReader;
use async_trait::async_trait;
use netfeed_core::{CaptureError, CaptureExit, CaptureSource, PluginInfo};
use std::path::Path;
use tokio::io::AsyncRead;

/// Reads capture lines from any async byte stream
pub struct ReaderSource<R> {
    label: String,
    reader: Option<LineReader<R>>,
    started: bool,
    lines_read: u64,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(label: impl Into<String>, reader: R) -> Self {
        Self {
            label: label.into(),
            reader: Some(LineReader::new(reader)),
            started: false,
            lines_read: 0,
        }
    }
}

impl ReaderSource<tokio::fs::File> {
    /// Open a text file, labelled `text:{path}`
    pub async fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(format!("text:{}", path.display()), file))
    }
}

impl ReaderSource<tokio::io::Stdin> {
    /// Standard input, labelled `text:stdin`
    pub fn stdin() -> Self {
        Self::new("text:stdin", tokio::io::stdin())
    }
}

impl<R> PluginInfo for ReaderSource<R> {
    fn name(&self) -> &str {
        "text-reader"
    }

    fn description(&self) -> &str {
        "Replays saved field-extraction output"
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> CaptureSource for ReaderSource<R> {
    fn label(&self) -> &str {
        &self.label
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.started {
            return Err(CaptureError::AlreadyStarted);
        }
        self.started = true;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>, CaptureError> {
        if !self.started {
            return Err(CaptureError::NotStarted);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let line = reader.next_line().await?;
        if line.is_some() {
            self.lines_read += 1;
        }
        Ok(line)
    }

    fn lines_read(&self) -> u64 {
        self.lines_read
    }

    async fn stop(&mut self) -> Result<CaptureExit, CaptureError> {
        self.reader = None;
        Ok(CaptureExit::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_until_end() {
        let mut source = ReaderSource::new("text:test", &b"one\ntwo\n"[..]);
        assert!(matches!(
            source.next_line().await,
            Err(CaptureError::NotStarted)
        ));

        source.start().await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("two"));
        assert!(source.next_line().await.unwrap().is_none());
        assert_eq!(source.lines_read(), 2);

        let exit = source.stop().await.unwrap();
        assert!(exit.success());
        assert!(exit.status.is_none());
        assert!(source.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a\tb").unwrap();
        file.flush().unwrap();

        let mut source = ReaderSource::open(file.path()).await.unwrap();
        assert_eq!(source.label(), format!("text:{}", file.path().display()));
        source.start().await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("a\tb"));
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let result = ReaderSource::open(Path::new("/nonexistent/capture.txt")).await;
        assert!(matches!(result, Err(CaptureError::Io(_))));
    }
}
