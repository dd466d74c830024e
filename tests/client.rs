// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use rpc_core::client::{new_rpc_stub, StreamOwnership};
use rpc_core::error::Error;
use rpc_core::header::{FunctionID, Header};
use rpc_core::iovec::BufferList;
use rpc_core::message::{RpcMessage, RpcOperation};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Echo(Vec<u8>);

impl RpcMessage for Echo {
    fn serialize(&self, out: &mut BufferList) {
        out.push(Bytes::from(self.0.clone()));
    }

    fn deserialize(buf: &BufferList) -> Option<Self> {
        Some(Echo(buf.to_contiguous()))
    }
}

struct EchoOp;
impl RpcOperation for EchoOp {
    const INTERFACE_ID: u32 = 1;
    const METHOD_ID: u32 = 1;
    type Request = Echo;
    type Response = Echo;
}

/// A response type that (incorrectly, for the purpose of this test) wants
/// two independent variable-length buffers back.
struct TwoBuffers(Vec<u8>);

impl RpcMessage for TwoBuffers {
    fn serialize(&self, out: &mut BufferList) {
        out.push(Bytes::from_static(b"first"));
        out.push(Bytes::from_static(b"second"));
    }

    fn deserialize(buf: &BufferList) -> Option<Self> {
        Some(TwoBuffers(buf.to_contiguous()))
    }
}

struct TwoBufferOp;
impl RpcOperation for TwoBufferOp {
    const INTERFACE_ID: u32 = 1;
    const METHOD_ID: u32 = 2;
    type Request = Echo;
    type Response = TwoBuffers;
}

#[tokio::test]
async fn stream_closure_fails_pending_calls() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let stub = new_rpc_stub(client_io, StreamOwnership::Owned);

    // Close the peer side immediately so the reader hits EOF.
    drop(server_io);

    let req = Echo(b"hi".to_vec());
    let mut resp = Echo(Vec::new());
    let result = stub
        .call_op::<EchoOp>(&req, &mut resp, Duration::from_secs(5))
        .await;

    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn bad_magic_closes_the_stream_and_fails_pending_calls() {
    let (client_io, mut server_io) = tokio::io::duplex(4096);
    let stub = new_rpc_stub(client_io, StreamOwnership::Owned);

    tokio::spawn(async move {
        let mut bad = Header {
            function: FunctionID::new(1, 1),
            tag: 0,
            size: 0,
        }
        .encode();
        bad[0..8].copy_from_slice(&0u64.to_le_bytes());
        let _ = server_io.write_all(&bad).await;
    });

    let req = Echo(b"hi".to_vec());
    let mut resp = Echo(Vec::new());
    let result = stub
        .call_op::<EchoOp>(&req, &mut resp, Duration::from_secs(5))
        .await;

    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn response_wanting_two_variable_buffers_is_rejected_before_sending() {
    let (client_io, mut server_io) = tokio::io::duplex(4096);
    let stub = new_rpc_stub(client_io, StreamOwnership::Owned);

    let req = Echo(b"hi".to_vec());
    let mut resp = TwoBuffers(Vec::new());
    let result = stub
        .call_op::<TwoBufferOp>(&req, &mut resp, Duration::from_secs(5))
        .await;

    assert!(matches!(result, Err(Error::NoBufferSpace)));

    // The shape check happens before any I/O, so the peer should see
    // nothing at all.
    let mut probe = [0u8; 1];
    let arrived = tokio::time::timeout(Duration::from_millis(50), server_io.read(&mut probe)).await;
    assert!(arrived.is_err(), "no bytes should have been sent");
}
