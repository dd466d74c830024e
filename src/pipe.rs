// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! An in-process connected pair of endpoints for exercising client/server
//! behavior in tests, without a real listener or filesystem path.

use tokio::net::UnixStream;

/// Create a connected pair of endpoints suitable for a [`crate::client::Stub`]
/// on one end and a [`crate::server::Skeleton`] on the other.
pub fn pipe() -> std::io::Result<(UnixStream, UnixStream)> {
    UnixStream::pair()
}
