// Async frame IO over the split halves of a TCP stream.
use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SessionError;

// A length line is a u32 in hex plus CRLF; anything longer is not a length line.
const MAX_LENGTH_LINE: u64 = 32;

/// Read one `<hex-len>\r\n<payload>\r\n` frame.
///
/// End of stream anywhere inside a frame is [`SessionError::ConnectionClosed`];
/// a malformed length or trailer is [`SessionError::Framing`].
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    scratch: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<Bytes, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    read_line(reader, line).await?;
    let length = cometload_wire::parse_length_line(line, max_frame_bytes)?;

    scratch.clear();
    scratch.resize(length, 0u8);
    if let Err(err) = reader.read_exact(&mut scratch[..]).await {
        return Err(read_error(err));
    }
    let payload = scratch.split().freeze();

    read_line(reader, line).await?;
    cometload_wire::check_trailer(line)?;
    Ok(payload)
}

async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader)
        .take(MAX_LENGTH_LINE)
        .read_until(b'\n', line)
        .await
        .map_err(read_error)?;
    if line.ends_with(b"\n") {
        return Ok(());
    }
    if read as u64 >= MAX_LENGTH_LINE {
        return Err(SessionError::Framing(cometload_wire::Error::MissingCrlf));
    }
    Err(SessionError::ConnectionClosed)
}

fn read_error(err: io::Error) -> SessionError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
            SessionError::ConnectionClosed
        }
        _ => SessionError::Read(err),
    }
}

/// Write `buf` in full, resuming at the unsent offset after short writes.
///
/// Each write error counts against `attempts`; the write gives up on the
/// attempt that reaches the limit.
pub(crate) async fn write_all_retrying<W>(
    writer: &mut W,
    buf: &[u8],
    attempts: u32,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let attempts = attempts.max(1);
    let mut failures = 0u32;
    let mut offset = 0usize;
    while offset < buf.len() {
        match writer.write(&buf[offset..]).await {
            Ok(0) => return Err(SessionError::ConnectionClosed),
            Ok(written) => offset += written,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                failures += 1;
                if failures >= attempts {
                    return Err(SessionError::Write {
                        attempts: failures,
                        source: err,
                    });
                }
                tracing::debug!(error = %err, failures, offset, "retrying frame write");
            }
        }
    }
    writer.flush().await.map_err(|source| SessionError::Write {
        attempts: failures + 1,
        source,
    })
}

pub(crate) async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    attempts: u32,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let frame = cometload_wire::encode(payload);
    write_all_retrying(writer, &frame, attempts).await
}
