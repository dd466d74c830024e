// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::*;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::framing::{drain_payload, read_header, read_payload, write_frame};
use crate::header::{FunctionID, Header};
use crate::iovec::BufferList;
use crate::message::{RpcMessage, RpcOperation};

/// Any duplex byte stream the core can drive: a reliable, ordered,
/// bidirectional connection (TCP, Unix-domain, or TLS). Establishing one
/// is a caller concern; the core only needs the finished connection.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

/// The two single-direction halves a [`DuplexStream`] is split into:
/// `tokio::io::split` hands back a `ReadHalf`/`WriteHalf` pair that each
/// implement only one of `AsyncRead`/`AsyncWrite`, so the reader task and
/// the writer mutex are typed over these narrower bounds rather than the
/// full `DuplexStream` contract.
type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Declares whether a [`Stub`] is responsible for closing the stream it
/// was built with (or later swapped to via [`Stub::set_stream`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOwnership {
    /// The Stub closes the stream when it is replaced or dropped.
    Owned,
    /// The caller retains responsibility for the stream's lifetime; the
    /// Stub still releases its own handle to it, but does not explicitly
    /// shut it down.
    Borrowed,
}

/// A snapshot of the stream currently installed in a [`Stub`]: which
/// generation it is and who owns closing it. [`Stub::call`] splits a
/// stream into independent read/write halves so a send and the
/// in-flight reader task never block each other, which means the two
/// halves can't be losslessly rejoined into a single stream object once
/// installed — this handle is what [`Stub::get_stream`] returns instead,
/// enough to tell whether the Stub is still on the same connection a
/// caller handed it earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    pub generation: u64,
    pub ownership: StreamOwnership,
}

/// What the reader task hands back to a waiting caller once it has
/// matched an incoming frame's tag to a pending call. Splitting "header
/// arrived" from "body arrived" is what lets a call's timeout cover only
/// the header leg: once the header for a tag has been matched, the rest
/// of that response is always delivered (or the connection is reported
/// closed), regardless of how long it takes to arrive.
struct HeaderArrived {
    body_rx: oneshot::Receiver<Result<Vec<u8>, Error>>,
}

type PendingMap = DashMap<u64, oneshot::Sender<HeaderArrived>>;

/// The client-side multiplexer over one byte-stream.
///
/// A `Stub` is affine to the scheduling domain (tokio task) that first
/// calls [`Stub::call`] on it: every subsequent call must come from a task
/// with the same [`tokio::task::Id`], enforced with a runtime assertion
/// rather than a type-level bound, since the underlying stream must still
/// be constructible and handed off from wherever it was accepted or
/// connected before that first call happens.
pub struct Stub {
    writer: Arc<Mutex<Writer>>,
    pending: Arc<PendingMap>,
    next_tag: AtomicU64,
    domain: OnceCell<tokio::task::Id>,
    reader_task: Mutex<JoinHandle<()>>,
    ownership: Mutex<StreamOwnership>,
    generation: AtomicU64,
}

impl Stub {
    /// Build a new Stub around `stream`. Spawns the single reader task
    /// that demultiplexes incoming frames by tag for the lifetime of this
    /// stream (until replaced by [`Stub::set_stream`] or the Stub is
    /// dropped).
    pub fn new(stream: impl DuplexStream + 'static, ownership: StreamOwnership) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let reader_task = spawn_reader(Box::new(read_half), pending.clone());

        Arc::new(Self {
            writer: Arc::new(Mutex::new(Box::new(write_half))),
            pending,
            next_tag: AtomicU64::new(1),
            domain: OnceCell::new(),
            reader_task: Mutex::new(reader_task),
            ownership: Mutex::new(ownership),
            generation: AtomicU64::new(0),
        })
    }

    /// Number of tags currently awaiting a response.
    pub fn get_queue_count(&self) -> usize {
        self.pending.len()
    }

    /// A counter bumped every time [`Stub::set_stream`] installs a new
    /// underlying stream; lets a caller notice that the Stub it's holding
    /// now speaks to a different connection than it did before.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// A handle identifying the stream currently installed, for comparison
    /// against a handle captured earlier. Does not hand back anything
    /// usable for direct I/O — see [`StreamHandle`] for why.
    pub async fn get_stream(&self) -> StreamHandle {
        StreamHandle {
            generation: self.generation(),
            ownership: *self.ownership.lock().await,
        }
    }

    /// Atomically replace the underlying stream. The previous stream's
    /// reader task is aborted, its pending calls fail with
    /// [`Error::ConnectionClosed`], and — if it was [`StreamOwnership::Owned`]
    /// — it is explicitly shut down before being dropped.
    pub async fn set_stream(&self, stream: impl DuplexStream + 'static, ownership: StreamOwnership) {
        let (read_half, write_half) = tokio::io::split(stream);

        {
            let mut old_reader = self.reader_task.lock().await;
            old_reader.abort();
            *old_reader = spawn_reader(Box::new(read_half), self.pending.clone());
        }

        {
            let mut w = self.writer.lock().await;
            let old_ownership = *self.ownership.lock().await;
            if old_ownership == StreamOwnership::Owned {
                use tokio::io::AsyncWriteExt;
                let _ = w.shutdown().await;
            }
            *w = Box::new(write_half);
        }

        *self.ownership.lock().await = ownership;
        self.fail_all_pending();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// `call<Op>(req, resp, timeout)`: serialize `req`, transmit it, and
    /// block the calling task until a response for this call's tag
    /// arrives, the timeout elapses, or the connection fails. On success,
    /// `resp` is overwritten in place and the number of payload bytes
    /// received is returned.
    pub async fn call_op<Op: RpcOperation>(
        &self,
        req: &Op::Request,
        resp: &mut Op::Response,
        timeout: Duration,
    ) -> Result<usize, Error> {
        self.call(
            FunctionID::new(Op::INTERFACE_ID, Op::METHOD_ID),
            req,
            resp,
            timeout,
        )
        .await
    }

    /// As [`Stub::call_op`], but with the function id passed explicitly
    /// rather than carried by an [`RpcOperation`] type.
    pub async fn call<Req: RpcMessage, Resp: RpcMessage>(
        &self,
        function: FunctionID,
        req: &Req,
        resp: &mut Resp,
        timeout: Duration,
    ) -> Result<usize, Error> {
        self.assert_domain().await;

        // The response type declares its own shape by serializing itself;
        // that tells us how many variable-length buffers a full response
        // would need, without doing any I/O yet.
        let mut shape = BufferList::new();
        resp.serialize(&mut shape);
        shape.check_single_variable_buffer()?;
        let expected_len = shape.total_len();

        let mut req_buf = BufferList::new();
        req.serialize(&mut req_buf);

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let (header_tx, header_rx) = oneshot::channel();
        self.pending.insert(tag, header_tx);

        let header = Header {
            function,
            tag,
            size: req_buf.total_len() as u32,
        };

        if let Err(e) = self.send_frame(&header, &req_buf).await {
            self.pending.remove(&tag);
            return Err(e);
        }

        let header_event = match tokio::time::timeout(timeout, header_rx).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_elapsed) => {
                self.pending.remove(&tag);
                return Err(Error::Timeout);
            }
        };

        // Receiving the body itself is not subject to the call timeout.
        let bytes = match header_event.body_rx.await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::ConnectionClosed),
        };

        let received_len = bytes.len();
        let buf = BufferList::from_vec(bytes);

        let Some(decoded) = Resp::deserialize(&buf) else {
            return Err(Error::Protocol(crate::error::ProtocolError::ShortRead));
        };

        if received_len == expected_len && !decoded.validate_checksum(&buf) {
            return Err(Error::ChecksumMismatch);
        }

        *resp = decoded;
        Ok(received_len)
    }

    /// The allocating receive variant: the core allocates response memory
    /// from `resp_iov`'s allocator and returns the decoded response
    /// directly, instead of writing into a caller-supplied instance.
    /// `resp_iov` must be empty on entry.
    pub async fn call_alloc<Req: RpcMessage, Resp: RpcMessage>(
        &self,
        function: FunctionID,
        req: &Req,
        resp_iov: &mut BufferList,
        timeout: Duration,
    ) -> Result<Resp, Error> {
        if resp_iov.segment_count() != 0 {
            return Err(Error::InvalidArgument(
                "resp_iov must be empty on entry".into(),
            ));
        }

        self.assert_domain().await;

        let mut req_buf = BufferList::new();
        req.serialize(&mut req_buf);

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let (header_tx, header_rx) = oneshot::channel();
        self.pending.insert(tag, header_tx);

        let header = Header {
            function,
            tag,
            size: req_buf.total_len() as u32,
        };

        if let Err(e) = self.send_frame(&header, &req_buf).await {
            self.pending.remove(&tag);
            return Err(e);
        }

        let header_event = match tokio::time::timeout(timeout, header_rx).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_elapsed) => {
                self.pending.remove(&tag);
                return Err(Error::Timeout);
            }
        };

        let bytes = match header_event.body_rx.await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::ConnectionClosed),
        };

        let allocator = resp_iov.allocator();
        let mut owned = allocator.alloc(bytes.len());
        owned.copy_from_slice(&bytes);
        resp_iov.push(bytes::Bytes::from(owned));

        Resp::deserialize(resp_iov).ok_or(Error::Protocol(crate::error::ProtocolError::ShortRead))
    }

    async fn send_frame(&self, header: &Header, payload: &BufferList) -> Result<(), Error> {
        // Registering the pending-call entry above happens-before this
        // acquires the write mutex, so the reader task can never observe
        // this tag's bytes without first finding its awaiter.
        let mut w = self.writer.lock().await;
        write_frame(&mut *w, header, payload).await
    }

    async fn assert_domain(&self) {
        let Some(current) = tokio::task::try_id() else {
            return;
        };
        let owner = self.domain.get_or_init(|| async { current }).await;
        assert_eq!(
            *owner, current,
            "Stub used from a different scheduling domain than it was first used from; \
             a Stub must not migrate between tasks"
        );
    }

    fn fail_all_pending(&self) {
        self.pending.clear();
    }
}

impl Drop for Stub {
    fn drop(&mut self) {
        self.fail_all_pending();
        // Release our half of the stream. Combined with dropping `writer`
        // below, this is what actually closes an Owned stream once both
        // halves are gone; the reader task otherwise keeps its half of a
        // split stream alive as a detached task even after the Stub itself
        // is gone.
        if let Ok(reader) = self.reader_task.try_lock() {
            reader.abort();
        }
    }
}

fn spawn_reader(mut reader: Reader, pending: Arc<PendingMap>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let header = match read_header(&mut reader).await {
                Ok(h) => h,
                Err(e) => {
                    debug!("Stub reader ending: {e}");
                    break;
                }
            };

            match pending.remove(&header.tag) {
                Some((_, header_tx)) => {
                    let (body_tx, body_rx) = oneshot::channel();
                    let delivered = header_tx.send(HeaderArrived { body_rx }).is_ok();

                    if delivered {
                        let result = read_payload(&mut reader, header.size).await;
                        let fatal = result.is_err();
                        let _ = body_tx.send(result);
                        if fatal {
                            break;
                        }
                    } else if let Err(e) = drain_payload(&mut reader, header.size).await {
                        debug!("Stub reader ending while draining orphaned tag: {e}");
                        break;
                    }
                }
                None => {
                    // No awaiter for this tag (already timed out, or a
                    // stray response): drain its bytes to preserve framing
                    // on the shared stream, and discard them.
                    if let Err(e) = drain_payload(&mut reader, header.size).await {
                        debug!("Stub reader ending while draining unknown tag: {e}");
                        break;
                    }
                }
            }
        }

        pending.clear();
    })
}

/// Construct a new [`Stub`] around `stream`.
pub fn new_rpc_stub(stream: impl DuplexStream + 'static, ownership: StreamOwnership) -> Arc<Stub> {
    Stub::new(stream, ownership)
}
