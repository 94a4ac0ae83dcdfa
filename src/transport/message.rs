// Multipart ingest messages.
//
// Producers push pull-style messages over the two ingest sockets. A message
// is a sequence of length-prefixed parts (u32 BE count, then u32 BE length +
// bytes per part). Part meaning depends on the endpoint:
//
//   screencast: [base64 PNG payload] [ASCII float seconds]
//   blobsink:   [UTF-8 file path] [ASCII float seconds] [subscriber id]
//
// Extra trailing parts are discarded with a log line.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Cap on one part's size; a screencast PNG stays far below this.
const MAX_PART_BYTES: u32 = 64 * 1024 * 1024;
/// Cap on parts per message; both endpoints use 2-3.
const MAX_PARTS: u32 = 16;

/// One decoded ingest message.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestMessage {
    /// A screencast still: base64 PNG plus its producer timestamp.
    Screencast { payload: String, timestamp: f64 },
    /// A subscriber audio notification: the growing file's path, the
    /// producer timestamp, and the subscriber's id.
    Blobsink {
        path: String,
        timestamp: f64,
        subscriber_id: String,
    },
}

/// Which endpoint a connection arrived on, deciding part interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Screencast,
    Blobsink,
}

/// Read one multipart message off the wire.
///
/// Returns `Ok(None)` on clean EOF before the first byte of a message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<Vec<u8>>>> {
    let part_count = match reader.read_u32().await {
        Ok(count) => count,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("failed to read part count"),
    };
    if part_count == 0 || part_count > MAX_PARTS {
        bail!("unreasonable part count: {part_count}");
    }
    let mut parts = Vec::with_capacity(part_count as usize);
    for index in 0..part_count {
        let len = reader
            .read_u32()
            .await
            .with_context(|| format!("failed to read length of part {index}"))?;
        if len > MAX_PART_BYTES {
            bail!("part {index} too large: {len} bytes");
        }
        let mut part = vec![0u8; len as usize];
        reader
            .read_exact(&mut part)
            .await
            .with_context(|| format!("failed to read part {index}"))?;
        parts.push(part);
    }
    Ok(Some(parts))
}

/// Write one multipart message. Producer-side helper, also used by tests.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, parts: &[&[u8]]) -> Result<()> {
    writer.write_u32(parts.len() as u32).await?;
    for part in parts {
        writer.write_u32(part.len() as u32).await?;
        writer.write_all(part).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Interpret raw parts according to the endpoint they arrived on.
pub fn parse_message(kind: EndpointKind, parts: Vec<Vec<u8>>) -> Result<IngestMessage> {
    let expected = match kind {
        EndpointKind::Screencast => 2,
        EndpointKind::Blobsink => 3,
    };
    if parts.len() < expected {
        bail!(
            "{:?} message has {} parts, expected {}",
            kind,
            parts.len(),
            expected
        );
    }
    if parts.len() > expected {
        debug!(
            "{:?} message: discarding {} unknown extra parts",
            kind,
            parts.len() - expected
        );
    }

    let mut parts = parts.into_iter();
    match kind {
        EndpointKind::Screencast => {
            let payload = utf8_part(parts.next().unwrap(), "payload")?;
            let timestamp = float_part(parts.next().unwrap(), "timestamp")?;
            Ok(IngestMessage::Screencast { payload, timestamp })
        }
        EndpointKind::Blobsink => {
            let path = utf8_part(parts.next().unwrap(), "path")?;
            let timestamp = float_part(parts.next().unwrap(), "timestamp")?;
            let subscriber_id = utf8_part(parts.next().unwrap(), "subscriber id")?;
            Ok(IngestMessage::Blobsink {
                path,
                timestamp,
                subscriber_id,
            })
        }
    }
}

fn utf8_part(part: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(part).with_context(|| format!("{what} part is not UTF-8"))
}

fn float_part(part: Vec<u8>, what: &str) -> Result<f64> {
    let text = std::str::from_utf8(&part).with_context(|| format!("{what} part is not UTF-8"))?;
    text.trim()
        .parse::<f64>()
        .with_context(|| format!("{what} part is not a float: {text:?}"))
}
