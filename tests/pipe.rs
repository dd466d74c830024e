// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use rpc_core::pipe::pipe;

#[tokio::test]
async fn pipe_endpoints_are_connected() {
    let (mut a, mut b) = pipe().unwrap();
    a.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    b.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}
