//! Newline-delimited framing over async byte streams.
//!
//! Each frame is one JSON document followed by `\n`. Frames may not contain
//! an embedded newline; compact `serde_json` output never does.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Frame delimiter
pub const DELIMITER: u8 = b'\n';

/// Reads delimited frames from a byte stream.
///
/// Frames that arrive split over several underlying reads are reassembled;
/// blank lines are skipped and a trailing `\r` is stripped.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read the next frame into `buf`, replacing its contents.
    ///
    /// Returns `Ok(false)` on a clean end of stream. Bytes after the last
    /// delimiter at end of stream still form a frame.
    pub async fn read_frame(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        loop {
            buf.clear();
            if self.reader.read_until(DELIMITER, buf).await? == 0 {
                return Ok(false);
            }
            trim_line_ending(buf);
            if !buf.is_empty() {
                return Ok(true);
            }
        }
    }
}

fn trim_line_ending(buf: &mut Vec<u8>) {
    if buf.last() == Some(&DELIMITER) {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serializes frame writes from any number of tasks onto one stream.
///
/// The lock is held for the whole frame, so concurrent frames never
/// interleave. A write future dropped midway can leave a torn frame on the
/// stream; callers that may be cancelled should write from a spawned task.
pub struct FrameWriter {
    out: Mutex<BoxedWriter>,
}

impl FrameWriter {
    pub fn new<W>(out: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Write `payload` followed by the delimiter and flush
    pub async fn write_frame(&self, payload: &[u8]) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(payload).await?;
        out.write_all(&[DELIMITER]).await?;
        out.flush().await
    }
}
