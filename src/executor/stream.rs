//! Per-stream pump: console passthrough, capture, and line delivery

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{LineObserver, Stream};

const CHUNK_SIZE: usize = 8192;

/// Splits a byte stream into lines, holding back an unterminated tail
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, calling `emit` for each completed line (terminator removed)
    pub fn push<F: FnMut(&str)>(&mut self, bytes: &[u8], mut emit: F) {
        self.pending.extend_from_slice(bytes);
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            emit(&decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
    }

    /// Emit whatever is left once the stream is closed
    pub fn finish<F: FnMut(&str)>(&mut self, mut emit: F) {
        if !self.pending.is_empty() {
            emit(&decode_line(&self.pending));
            self.pending.clear();
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Copy `reader` to `console` unmodified as bytes arrive, append everything to
/// `captured`, and hand complete lines to `observer` in arrival order.
pub async fn pump<R, W>(
    mut reader: R,
    mut console: Option<W>,
    stream: Stream,
    captured: Arc<Mutex<Vec<u8>>>,
    observer: Arc<dyn LineObserver>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut splitter = LineSplitter::new();

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];

        if let Some(out) = console.as_mut() {
            // A closed console must not stop capture
            if out.write_all(chunk).await.is_ok() {
                let _ = out.flush().await;
            } else {
                console = None;
            }
        }

        captured
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(chunk);

        splitter.push(chunk, |line| observer.observe(stream, line));
    }

    splitter.finish(|line| observer.observe(stream, line));
    Ok(())
}
