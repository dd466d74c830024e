// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::Error;

/// Allocates and frees payload memory on behalf of a [`BufferList`].
///
/// The core never frees memory it did not allocate itself; ownership of
/// caller-supplied segments always stays with the caller. A `BufferList`
/// that was never handed an allocator simply can't be used for the
/// allocating receive path (`Stub::call_alloc`).
pub trait Allocator: Send + Sync {
    /// Allocate a zeroed buffer of `len` bytes.
    fn alloc(&self, len: usize) -> Vec<u8>;
}

/// The allocator used when none is supplied: a plain heap allocation via
/// the global allocator, matching "default is the iovector library
/// default" from the wire contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAllocator;

impl Allocator for DefaultAllocator {
    fn alloc(&self, len: usize) -> Vec<u8> {
        vec![0u8; len]
    }
}

/// An ordered, scatter/gather sequence of memory segments describing a
/// message payload without copying.
///
/// Segments are `bytes::Bytes`, which clone by reference count rather than
/// by copy — this is the zero-copy property the wire layer needs: a
/// segment pointing at caller-owned memory is never duplicated or freed by
/// the core.
#[derive(Debug, Default, Clone)]
pub struct BufferList {
    segments: Vec<Bytes>,
    allocator: Option<Arc<dyn Allocator>>,
}

impl BufferList {
    /// An empty buffer list with no attached allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty buffer list that allocates receive buffers from `allocator`.
    pub fn with_allocator(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            segments: Vec::new(),
            allocator: Some(allocator),
        }
    }

    /// Attach (or replace) the allocator used for future allocating reads.
    pub fn set_allocator(&mut self, allocator: Arc<dyn Allocator>) {
        self.allocator = Some(allocator);
    }

    pub fn allocator(&self) -> Arc<dyn Allocator> {
        self.allocator.clone().unwrap_or_else(|| Arc::new(DefaultAllocator))
    }

    /// Append a zero-copy segment to the end of the list.
    pub fn push(&mut self, segment: Bytes) {
        self.segments.push(segment);
    }

    /// The number of segments currently held.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total length across all segments, in bytes.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|b| b.len()).sum()
    }

    /// Truncate the list in place to the first `n` bytes, keeping the
    /// prefix and dropping (or partially shrinking) trailing segments.
    pub fn truncate(&mut self, n: usize) {
        let mut remaining = n;
        let mut keep = Vec::with_capacity(self.segments.len());

        for seg in self.segments.drain(..) {
            if remaining == 0 {
                break;
            }
            if seg.len() <= remaining {
                remaining -= seg.len();
                keep.push(seg);
            } else {
                keep.push(seg.slice(0..remaining));
                remaining = 0;
            }
        }

        self.segments = keep;
    }

    /// Iterate over the segments in order.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.segments.iter()
    }

    /// Copy every segment into one contiguous buffer. Used at the edges of
    /// the core (handing a fixed-size caller buffer its bytes, encoding a
    /// response for the wire) where contiguity is unavoidable.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for seg in &self.segments {
            out.extend_from_slice(seg);
        }
        out
    }

    /// Build a `BufferList` from one contiguous owned buffer.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let mut list = Self::new();
        list.push(Bytes::from(buf));
        list
    }

    /// Enforce the receive-side rule that a response may declare at most
    /// one variable-length buffer. Returns `NoBufferSpace` if violated.
    pub fn check_single_variable_buffer(&self) -> Result<(), Error> {
        if self.segments.len() > 1 {
            return Err(Error::NoBufferSpace);
        }
        Ok(())
    }
}
