//! Cancel-safe line reading over any async byte stream

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Reads newline-terminated lines, tolerating invalid UTF-8.
///
/// Bytes from a read interrupted by `select!` stay in the buffer and are
/// picked up by the next call, so `next_line` can be raced safely.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            eof: false,
        }
    }

    /// Next line without its terminator, `None` once the stream is closed
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        if self.eof {
            return Ok(None);
        }

        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            self.eof = true;
            if self.buf.is_empty() {
                return Ok(None);
            }
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }

    /// Whether the end of the stream has been seen
    pub fn at_eof(&self) -> bool {
        self.eof
    }
}
