// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::header::{Header, HEADER_LEN};
use crate::iovec::BufferList;

/// Read exactly one header from `reader`.
///
/// A short read (including a clean EOF at the very start of a frame) is
/// reported as [`Error::ConnectionClosed`], since it means the peer ended
/// the stream rather than sending a malformed frame. A decoded-but-invalid
/// header (bad magic or version) is [`Error::Protocol`]; both are fatal
/// for the stream per the framing contract.
pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Header, Error> {
    let mut buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ConnectionClosed)
        }
        Err(e) => return Err(Error::Io(e)),
    }

    Header::decode(&buf).map_err(Error::from)
}

/// Read exactly `size` payload bytes following a header already consumed
/// by [`read_header`]. A short read here is also connection-closed, not a
/// protocol error: the header was valid, so this is a truncated stream.
pub async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    size: u32,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; size as usize];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Read and discard exactly `size` bytes. Used to drain the payload of a
/// frame whose tag has no waiting caller (e.g. a response for an expired
/// timeout), preserving framing on the shared stream without delivering
/// the bytes anywhere.
pub async fn drain_payload<R: AsyncRead + Unpin>(reader: &mut R, size: u32) -> Result<(), Error> {
    let mut remaining = size as usize;
    let mut scratch = [0u8; 4096];
    while remaining > 0 {
        let n = remaining.min(scratch.len());
        match reader.read_exact(&mut scratch[..n]).await {
            Ok(_) => remaining -= n,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::ConnectionClosed)
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

/// Write `header || payload` as a single atomic unit with respect to other
/// writers on the same stream.
///
/// Callers are responsible for holding the stream's write mutex across
/// this call; this function only guarantees that the header precedes its
/// payload with no other frame interleaved *within* this call.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &Header,
    payload: &BufferList,
) -> Result<(), Error> {
    writer.write_all(&header.encode()).await?;
    for segment in payload.iter() {
        writer.write_all(segment).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Convenience used for error replies that carry no payload at all (e.g.
/// the "unknown function" response).
pub async fn write_empty_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &Header,
) -> Result<(), Error> {
    debug_assert_eq!(header.size, 0);
    writer.write_all(&header.encode()).await?;
    writer.flush().await?;
    Ok(())
}
