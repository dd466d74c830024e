// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use log::*;
use tokio::net::TcpListener;

use rpc_core::iovec::BufferList;
use rpc_core::message::{RpcMessage, RpcOperation};
use rpc_core::server::{new_skeleton, ServiceHandler, DEFAULT_POOL_SIZE};

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "0.0.0.0:7800")]
    bind: String,

    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,
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

struct EchoService;

#[async_trait::async_trait]
impl ServiceHandler<EchoOp> for EchoService {
    async fn do_rpc_service(&self, request: EchoMessage) -> EchoMessage {
        request
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let skeleton = new_skeleton(args.pool_size);
    skeleton.register_service::<EchoOp, _>(Arc::new(EchoService));
    skeleton.set_accept_notify(|id| info!("accepted connection {id:?}"));
    skeleton.set_close_notify(|id| info!("closed connection {id:?}"));

    let listener = TcpListener::bind(&args.bind).await?;
    info!("echo_server listening on {}", args.bind);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("incoming connection from {peer}");
        let skeleton = skeleton.clone();
        tokio::spawn(async move {
            if let Err(e) = skeleton.serve(stream).await {
                warn!("connection from {peer} ended: {e}");
            }
        });
    }
}
