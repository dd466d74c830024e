// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod client;
pub mod error;
pub mod framing;
pub mod header;
pub mod iovec;
pub mod message;
pub mod pipe;
pub mod pool;
pub mod server;

pub use error::Error;
pub use header::{FunctionID, Header};
pub use iovec::{Allocator, BufferList, DefaultAllocator};
pub use message::{RpcMessage, RpcOperation};
