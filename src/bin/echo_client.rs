// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tokio::net::TcpStream;

use rpc_core::client::{new_rpc_stub, StreamOwnership};
use rpc_core::iovec::BufferList;
use rpc_core::message::{RpcMessage, RpcOperation};

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:7800")]
    server: String,

    #[arg(long, default_value = "hello")]
    message: String,

    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

struct EchoMessage(Vec<u8>);

impl RpcMessage for EchoMessage {
    fn serialize(&self, out: &mut BufferList) {
        out.push(Bytes::from(self.0.clone()));
    }

    fn deserialize(buf: &BufferList) -> Option<Self> {
        Some(EchoMessage(buf.to_contiguous()))
    }
}

struct EchoOp;

impl RpcOperation for EchoOp {
    const INTERFACE_ID: u32 = 1;
    const METHOD_ID: u32 = 1;
    type Request = EchoMessage;
    type Response = EchoMessage;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let stream = TcpStream::connect(&args.server).await?;
    let stub = new_rpc_stub(stream, StreamOwnership::Owned);

    let request = EchoMessage(args.message.clone().into_bytes());
    let mut response = EchoMessage(Vec::new());
    let n = stub
        .call_op::<EchoOp>(&request, &mut response, Duration::from_secs(args.timeout_secs))
        .await?;

    println!(
        "received {n} bytes: {}",
        String::from_utf8_lossy(&response.0)
    );

    Ok(())
}
