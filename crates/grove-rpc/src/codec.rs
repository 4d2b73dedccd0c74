//! Newline-delimited JSON framing.
//!
//! One [`Message`] per line. Works over any byte stream: TCP, pipes or an
//! in-memory duplex in tests.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RpcError, RpcResult};
use crate::wire::Message;

/// Upper bound on one encoded message.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Encode a message as one line, including the trailing newline.
pub fn encode(msg: &Message) -> RpcResult<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line.
///
/// # Errors
///
/// Returns [`RpcError::Codec`] for malformed JSON or an unknown message
/// shape. The transport stays usable; callers log and drop the line.
pub fn decode(line: &str) -> RpcResult<Message> {
    serde_json::from_str(line.trim_end()).map_err(|e| RpcError::Codec(e.to_string()))
}

/// Read the next non-empty line, or `None` at end of stream.
///
/// Malformed content is returned as an `Err(Codec)` inside `Some`, so one
/// bad line never ends the stream.
pub async fn read_message<R>(reader: &mut R, buf: &mut String) -> RpcResult<Option<RpcResult<Message>>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let n = reader.read_line(buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.trim().is_empty() {
            continue;
        }
        if buf.len() > MAX_LINE_BYTES {
            return Ok(Some(Err(RpcError::Codec(format!(
                "message of {} bytes exceeds limit",
                buf.len()
            )))));
        }
        return Ok(Some(decode(buf)));
    }
}

/// Write one message and flush.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> RpcResult<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode(msg)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
