// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

/// The possible errors that can arise from using a [`crate::client::Stub`],
/// [`crate::server::Skeleton`], or [`crate::pool::StubPool`].
#[derive(Debug)]
pub enum Error {
    /// Caller-supplied argument was invalid: message too large for a
    /// caller-provided fixed buffer, or an empty input where non-empty was
    /// required.
    InvalidArgument(String),

    /// The receive-side serializer reported more than one variable-length
    /// buffer; the core only supports a single variable buffer on receive.
    NoBufferSpace,

    /// The per-call deadline elapsed before a response header arrived.
    Timeout,

    /// The stream ended, or was closed, while a call was pending on it.
    ConnectionClosed,

    /// A frame failed validation (bad magic, wrong version, or a short
    /// read). Fatal for the stream it occurred on.
    Protocol(ProtocolError),

    /// A full-size response failed `validate_checksum`.
    ChecksumMismatch,

    /// The Skeleton is shutting down, or the StubPool could not connect.
    Unavailable,

    /// Errors surfaced by the underlying stream.
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NoBufferSpace => write!(f, "no buffer space for receive-side variable buffer"),
            Self::Timeout => write!(f, "timed out waiting for response"),
            Self::ConnectionClosed => write!(f, "connection closed while call was pending"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::ChecksumMismatch => write!(f, "response checksum mismatch"),
            Self::Unavailable => write!(f, "rpc endpoint unavailable"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Errors that arise purely from decoding a frame, before any call or
/// dispatch logic runs. Always fatal for the stream they occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The header's magic number didn't match.
    BadMagic,

    /// The header's version field wasn't one this core understands.
    BadVersion,

    /// The stream ended partway through a header or payload.
    ShortRead,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::BadMagic => "bad magic number",
                Self::BadVersion => "unsupported header version",
                Self::ShortRead => "short read decoding frame",
            }
        )
    }
}
