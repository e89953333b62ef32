//! 📜 Wire protocol: one JSON object per line, in both directions.
//!
//! ```text
//!   client                                  server
//!   {"type":"hello","token":"…"}      ──▶
//!                                     ◀──   {"type":"welcome"} | {"type":"denied","reason":"…"}
//!   {"type":"put","queue":"iqueue","record":{…}}            ──▶
//!   {"type":"put_many","queue":"iqueue","records":[…]}      ──▶
//!                                     ◀──   {"type":"accepted","queued":N} | {"type":"failed","message":"…"}
//! ```
//!
//! `queued` counts what actually went in. A write-disabled queue answers
//! `accepted` with `queued: 0`: dropping writes during shutdown is not an error.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ProxyError;
use crate::common::RawRecord;

/// 📏 No single frame gets to be bigger than this. 16 MiB of JSON is already a cry for help.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// 🤝 A hello is a token and some punctuation. Nobody gets 16 MiB before they've authenticated.
pub const MAX_HELLO_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Hello { token: String },
    Put { queue: String, record: RawRecord },
    PutMany { queue: String, records: Vec<RawRecord> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Welcome,
    Denied { reason: String },
    Accepted { queued: usize },
    Failed { message: String },
}

/// ✍️ Serialize `frame`, newline-terminate it, flush.
pub async fn write_frame<W, F>(writer: &mut W, frame: &F) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
    F: Serialize,
{
    let mut line = serde_json::to_vec(frame).map_err(|e| ProxyError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// 📖 Read one frame. `Ok(None)` means the other side hung up cleanly.
pub async fn read_frame<R, F>(reader: &mut R) -> Result<Option<F>, ProxyError>
where
    R: AsyncBufRead + Unpin,
    F: for<'de> Deserialize<'de>,
{
    read_frame_within(reader, MAX_FRAME_BYTES).await
}

/// 📖 [`read_frame`] with a tighter cap. Stops reading as soon as `max_bytes` is exceeded.
pub async fn read_frame_within<R, F>(reader: &mut R, max_bytes: usize) -> Result<Option<F>, ProxyError>
where
    R: AsyncBufRead + Unpin,
    F: for<'de> Deserialize<'de>,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(max_bytes as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if line.len() > max_bytes {
        return Err(ProxyError::Protocol(format!("frame exceeds {max_bytes} bytes")));
    }
    let frame = serde_json::from_slice(&line).map_err(|e| ProxyError::Protocol(e.to_string()))?;
    Ok(Some(frame))
}
