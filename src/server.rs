// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use dashmap::DashMap;
use log::*;
use tokio::sync::{Mutex, Notify, Semaphore};

use crate::client::DuplexStream;
use crate::error::Error;
use crate::framing::{read_header, read_payload, write_empty_frame, write_frame};
use crate::header::{FunctionID, Header};
use crate::iovec::{Allocator, BufferList, DefaultAllocator};
use crate::message::{RpcMessage, RpcOperation};

/// A stream's write half, type-erased down to the one trait a
/// [`ResponseSender`] actually needs: `tokio::io::split` hands back a
/// `WriteHalf` that only implements `AsyncWrite`, not the full
/// [`DuplexStream`] bound.
type Writer = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

/// Default size of a [`Skeleton`]'s bounded worker pool.
pub const DEFAULT_POOL_SIZE: usize = 128;

/// A handler registered for one [`FunctionID`]: given the decoded request
/// payload and a one-shot [`ResponseSender`], it produces (asynchronously)
/// the response and sends it exactly once.
pub type Handler =
    Arc<dyn Fn(BufferList, ResponseSender) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

type NotifyFn = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Identifies one call to [`Skeleton::serve`], passed to the accept/close
/// notifiers so they can tell connections apart without needing the
/// stream itself (a `Skeleton` serves arbitrary stream types, behind
/// [`DuplexStream`], so there's no single concrete handle to hand them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A one-shot callback handed to a registered handler. The handler (or
/// whatever async work it kicks off) calls [`ResponseSender::send`]
/// exactly once, possibly well after the handler's own stack frame has
/// returned — its captured state (the stream's write half and the
/// request's tag) is owned, not borrowed, so it can safely outlive the
/// dispatch call that created it.
pub struct ResponseSender {
    writer: Arc<Mutex<Writer>>,
    function: FunctionID,
    tag: u64,
}

impl ResponseSender {
    /// Write `response` back to the caller, using the original request's
    /// function id and tag, under the stream's write mutex.
    pub async fn send(self, response: BufferList) -> Result<(), Error> {
        let header = Header {
            function: self.function,
            tag: self.tag,
            size: response.total_len() as u32,
        };
        let mut w = self.writer.lock().await;
        write_frame(&mut *w, &header, &response).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    /// `reject_new` mirrors `shutdown(no_more_requests)`: when true, every
    /// `serve` loop stops reading further frames from its stream as soon
    /// as it next checks.
    Draining { reject_new: bool },
    Terminated,
}

/// The server-side dispatcher: a `FunctionID` → handler map, a bounded
/// worker pool, and a shutdown state machine. One `Skeleton` can `serve`
/// many connections concurrently, each on its own task.
pub struct Skeleton {
    handlers: DashMap<FunctionID, Handler>,
    allocator: StdMutex<Arc<dyn Allocator>>,
    worker_permits: Arc<Semaphore>,
    accept_notify: StdMutex<Option<NotifyFn>>,
    close_notify: StdMutex<Option<NotifyFn>>,
    state: StdMutex<State>,
    inflight: AtomicUsize,
    quiescent: Notify,
}

impl Skeleton {
    /// Build an empty Skeleton with a worker pool bounded to `pool_size`
    /// concurrent handler invocations across all connections it serves.
    pub fn new(pool_size: usize) -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            allocator: StdMutex::new(Arc::new(DefaultAllocator)),
            worker_permits: Arc::new(Semaphore::new(pool_size)),
            accept_notify: StdMutex::new(None),
            close_notify: StdMutex::new(None),
            state: StdMutex::new(State::Running),
            inflight: AtomicUsize::new(0),
            quiescent: Notify::new(),
        })
    }

    /// Register `handler` for `function`, replacing any handler already
    /// registered for it.
    pub fn add_function(&self, function: FunctionID, handler: Handler) {
        self.handlers.insert(function, handler);
    }

    /// Remove the handler registered for `function`, if any.
    pub fn remove_function(&self, function: FunctionID) {
        self.handlers.remove(&function);
    }

    /// Convenience registration: bind `Op` to `svc.do_rpc_service`. Callers
    /// with many operations call this once per operation (over a slice of
    /// descriptors they maintain) rather than through variadic generics.
    pub fn register_service<Op, Svc>(&self, svc: Arc<Svc>)
    where
        Op: RpcOperation + 'static,
        Op::Request: Send + 'static,
        Op::Response: Send + 'static,
        Svc: ServiceHandler<Op> + 'static,
    {
        let function = FunctionID::new(Op::INTERFACE_ID, Op::METHOD_ID);
        self.add_function(function, service_handler::<Op, Svc>(svc));
    }

    /// Replace the allocator used for incoming payload buffers.
    pub fn set_allocator(&self, allocator: Arc<dyn Allocator>) {
        *self.allocator.lock().unwrap() = allocator;
    }

    /// Register a callback invoked once per `serve` entry, with an opaque
    /// id for that connection. Must not block.
    pub fn set_accept_notify(&self, f: impl Fn(ConnectionId) + Send + Sync + 'static) {
        *self.accept_notify.lock().unwrap() = Some(Arc::new(f));
    }

    /// Register a callback invoked once per `serve` exit. Must not block.
    pub fn set_close_notify(&self, f: impl Fn(ConnectionId) + Send + Sync + 'static) {
        *self.close_notify.lock().unwrap() = Some(Arc::new(f));
    }

    /// Read frames from `stream`, dispatch each to its registered handler
    /// on a worker from the bounded pool, and write back its response.
    /// Returns once the stream ends or is closed due to a protocol error.
    pub async fn serve(self: &Arc<Self>, stream: impl DuplexStream + 'static) -> Result<(), Error> {
        let conn_id = ConnectionId::next();
        if let Some(f) = self.accept_notify.lock().unwrap().clone() {
            f(conn_id);
        }

        let result = self.serve_inner(stream).await;

        if let Some(f) = self.close_notify.lock().unwrap().clone() {
            f(conn_id);
        }

        result
    }

    async fn serve_inner(self: &Arc<Self>, stream: impl DuplexStream + 'static) -> Result<(), Error> {
        let (mut read_half, write_half) = tokio::io::split(stream);
        let writer: Arc<Mutex<Writer>> = Arc::new(Mutex::new(Box::new(write_half)));

        loop {
            if self.rejecting_new_requests() {
                break;
            }

            let header = match read_header(&mut read_half).await {
                Ok(h) => h,
                Err(Error::ConnectionClosed) => break,
                Err(e) => {
                    warn!("closing connection after framing error: {e}");
                    return Err(e);
                }
            };

            let allocator = self.allocator.lock().unwrap().clone();
            let payload = read_payload(&mut read_half, header.size).await?;

            let mut req_buf = BufferList::with_allocator(allocator);
            req_buf.push(Bytes::from(payload));

            let handler = self.handlers.get(&header.function).map(|h| h.clone());

            match handler {
                None => {
                    debug!(
                        "no handler registered for function {:?}; replying empty",
                        header.function
                    );
                    let reply = Header {
                        function: header.function,
                        tag: header.tag,
                        size: 0,
                    };
                    let mut w = writer.lock().await;
                    write_empty_frame(&mut *w, &reply).await?;
                }
                Some(handler) => {
                    let permit = match self.worker_permits.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    let sender = ResponseSender {
                        writer: writer.clone(),
                        function: header.function,
                        tag: header.tag,
                    };

                    self.inflight.fetch_add(1, Ordering::AcqRel);
                    let this = self.clone();
                    tokio::spawn(async move {
                        handler(req_buf, sender).await;
                        drop(permit);
                        if this.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
                            this.quiescent.notify_one();
                        }
                    });
                }
            }
        }

        Ok(())
    }

    fn rejecting_new_requests(&self) -> bool {
        matches!(
            *self.state.lock().unwrap(),
            State::Draining { reject_new: true } | State::Terminated
        )
    }

    /// Transition to draining, optionally rejecting new requests
    /// immediately, then wait for every in-flight handler to finish before
    /// transitioning to terminated. Must not be called from inside a
    /// handler — spawn a separate task to call it instead.
    pub async fn shutdown(self: &Arc<Self>, no_more_requests: bool) {
        *self.state.lock().unwrap() = State::Draining {
            reject_new: no_more_requests,
        };

        while self.inflight.load(Ordering::Acquire) > 0 {
            self.quiescent.notified().await;
        }

        *self.state.lock().unwrap() = State::Terminated;
    }

    /// Transition straight to terminated without waiting for in-flight
    /// handlers. Their responses may be dropped if the stream they were
    /// writing to is already gone.
    pub fn shutdown_no_wait(self: &Arc<Self>) {
        *self.state.lock().unwrap() = State::Terminated;
    }
}

/// Binds a user object's implementation of one [`RpcOperation`] for
/// [`Skeleton::register_service`].
#[async_trait::async_trait]
pub trait ServiceHandler<Op: RpcOperation>: Send + Sync {
    async fn do_rpc_service(&self, request: Op::Request) -> Op::Response;
}

/// Construct a new, empty [`Skeleton`] with the given worker pool size.
pub fn new_skeleton(pool_size: usize) -> Arc<Skeleton> {
    Skeleton::new(pool_size)
}

/// Builds a [`Skeleton`] from a table of `(FunctionID, Handler)` entries
/// assembled up front and installed in one `build()` call, rather than
/// through a sequence of mutating registration calls on an already-live
/// Skeleton.
#[derive(Default)]
pub struct SkeletonBuilder {
    pool_size: usize,
    functions: Vec<(FunctionID, Handler)>,
    allocator: Option<Arc<dyn Allocator>>,
}

impl SkeletonBuilder {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            functions: Vec::new(),
            allocator: None,
        }
    }

    pub fn function(mut self, function: FunctionID, handler: Handler) -> Self {
        self.functions.push((function, handler));
        self
    }

    pub fn service<Op, Svc>(self, svc: Arc<Svc>) -> Self
    where
        Op: RpcOperation + 'static,
        Op::Request: Send + 'static,
        Op::Response: Send + 'static,
        Svc: ServiceHandler<Op> + 'static,
    {
        let function = FunctionID::new(Op::INTERFACE_ID, Op::METHOD_ID);
        let handler = service_handler::<Op, Svc>(svc);
        self.function(function, handler)
    }

    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn build(self) -> Arc<Skeleton> {
        let skeleton = Skeleton::new(self.pool_size);
        if let Some(allocator) = self.allocator {
            skeleton.set_allocator(allocator);
        }
        for (function, handler) in self.functions {
            skeleton.add_function(function, handler);
        }
        skeleton
    }
}

fn service_handler<Op, Svc>(svc: Arc<Svc>) -> Handler
where
    Op: RpcOperation + 'static,
    Op::Request: Send + 'static,
    Op::Response: Send + 'static,
    Svc: ServiceHandler<Op> + 'static,
{
    Arc::new(move |req_buf, sender| {
        let svc = svc.clone();
        Box::pin(async move {
            let Some(request) = Op::Request::deserialize(&req_buf) else {
                warn!("failed to decode request for a registered service handler");
                let _ = sender.send(BufferList::new()).await;
                return;
            };
            let response = svc.do_rpc_service(request).await;
            let mut out = BufferList::new();
            response.serialize(&mut out);
            if let Err(e) = sender.send(out).await {
                debug!("failed to send response: {e}");
            }
        })
    })
}
