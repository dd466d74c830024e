// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use crate::iovec::BufferList;

/// The contract a user-defined request or response message type must
/// satisfy to travel over a [`crate::client::Stub`] or
/// [`crate::server::Skeleton`]. How a type chooses to lay out its own
/// fields is its own business; the core only depends on this surface.
pub trait RpcMessage: Sized {
    /// Append segments describing this message's fields to `out`. Fields
    /// that point at caller-owned memory are appended as zero-copy
    /// segments; the core neither copies nor frees that memory.
    fn serialize(&self, out: &mut BufferList);

    /// Reconstruct a message from a previously-serialized buffer list. The
    /// returned value may borrow from `buf`'s underlying storage (via
    /// `bytes::Bytes`'s reference counting) rather than deep-copying it.
    fn deserialize(buf: &BufferList) -> Option<Self>;

    /// Optional integrity check invoked on full-size receive paths. The
    /// default accepts everything; message types that carry a checksum
    /// field should override this.
    fn validate_checksum(&self, _buf: &BufferList) -> bool {
        true
    }
}

/// A service dispatched by [`crate::server::Skeleton`]: the associated
/// request/response types and the interface/method id pair that routes to
/// it. Modeled as an associated-constants trait so callers can build a
/// slice of descriptors and iterate it at registration time, rather than
/// needing one registration call generated per operation.
pub trait RpcOperation {
    const INTERFACE_ID: u32;
    const METHOD_ID: u32;

    type Request: RpcMessage;
    type Response: RpcMessage;
}
