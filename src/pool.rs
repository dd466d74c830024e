// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::*;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::client::{DuplexStream, Stub, StreamOwnership};
use crate::error::Error;

/// How a [`StubPool`] is configured: how long an idle, unreferenced entry
/// survives before the sweeper reclaims it, and how long a new connection
/// attempt is allowed to take.
#[derive(Debug, Clone, Copy)]
pub struct StubPoolConfig {
    pub idle_expiration: Duration,
    pub connect_timeout: Duration,
}

impl StubPoolConfig {
    pub fn new(idle_expiration: Duration, connect_timeout: Duration) -> Self {
        Self {
            idle_expiration,
            connect_timeout,
        }
    }
}

/// Establishes a fresh stream for one endpoint. This is the seam where a
/// caller plugs in TCP dialing, a Unix-domain connect, or a TLS
/// handshake; the pool itself only ever asks for a stream, never how one
/// is obtained.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    type Endpoint: Eq + Hash + Clone + Send + Sync + 'static;

    async fn connect(&self, endpoint: &Self::Endpoint, tls: bool) -> Result<Box<dyn DuplexStream>, Error>;
}

struct PoolEntry {
    stub: Arc<Stub>,
    refcount: usize,
    last_used: Instant,
}

/// An endpoint-keyed cache of live [`Stub`]s with refcounted reuse and idle
/// expiration.
///
/// Each `(endpoint, tls)` key maps to its own `tokio::sync::Mutex`-guarded
/// slot, so concurrent `get_stub` calls for the *same* key naturally
/// serialize on that slot's lock (satisfying "at most one connection is
/// initiated per key") while different keys never contend with each other.
pub struct StubPool<C: Connector> {
    entries: DashMap<(C::Endpoint, bool), Arc<Mutex<Option<PoolEntry>>>>,
    config: StubPoolConfig,
    connector: Arc<C>,
}

impl<C: Connector + 'static> StubPool<C> {
    pub fn new(config: StubPoolConfig, connector: Arc<C>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            config,
            connector,
        })
    }

    /// Look up `(endpoint, tls)`; if a healthy entry exists, bump its
    /// refcount and return it. Otherwise connect a fresh stream (bounded by
    /// `connect_timeout`), wrap it in a new `Stub`, and insert it.
    pub async fn get_stub(&self, endpoint: C::Endpoint, tls: bool) -> Result<Arc<Stub>, Error> {
        let key = (endpoint.clone(), tls);
        let slot = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        if let Some(entry) = guard.as_mut() {
            entry.refcount += 1;
            entry.last_used = Instant::now();
            return Ok(entry.stub.clone());
        }

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(&endpoint, tls),
        )
        .await
        .map_err(|_| Error::Unavailable)??;

        let stub = Stub::new(stream, StreamOwnership::Owned);
        *guard = Some(PoolEntry {
            stub: stub.clone(),
            refcount: 1,
            last_used: Instant::now(),
        });

        Ok(stub)
    }

    /// Non-creating lookup: returns `None` if no entry exists for this key,
    /// without bumping its refcount.
    pub async fn acquire(&self, endpoint: &C::Endpoint, tls: bool) -> Option<Arc<Stub>> {
        let key = (endpoint.clone(), tls);
        let slot = self.entries.get(&key)?.clone();
        let guard = slot.lock().await;
        guard.as_ref().map(|e| e.stub.clone())
    }

    /// Release a reference acquired by `get_stub`. If `immediately`, the
    /// entry is evicted and its stream closed regardless of any other
    /// outstanding references; otherwise the refcount is decremented and
    /// the entry is left for the sweeper to reclaim once idle.
    pub async fn put_stub(&self, endpoint: &C::Endpoint, tls: bool, immediately: bool) {
        let key = (endpoint.clone(), tls);
        let Some(slot) = self.entries.get(&key).map(|r| r.clone()) else {
            return;
        };

        let mut guard = slot.lock().await;
        if let Some(entry) = guard.as_mut() {
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.last_used = Instant::now();

            if immediately {
                *guard = None;
                drop(guard);
                self.entries.remove(&key);
            }
        }
    }

    /// Remove every entry whose refcount is zero and whose idle time
    /// exceeds `idle_expiration`. Called periodically by the sweeper task
    /// spawned from [`StubPool::spawn_sweeper`], but also callable directly
    /// (e.g. from tests) for a lazy, on-access sweep.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let keys: Vec<_> = self.entries.iter().map(|r| r.key().clone()).collect();

        for key in keys {
            let Some(slot) = self.entries.get(&key).map(|r| r.clone()) else {
                continue;
            };

            let mut guard = slot.lock().await;
            let expired = matches!(
                guard.as_ref(),
                Some(entry) if entry.refcount == 0
                    && now.duration_since(entry.last_used) > self.config.idle_expiration
            );

            if expired {
                debug!("stub pool evicting idle entry");
                *guard = None;
                drop(guard);
                self.entries.remove(&key);
            }
        }
    }

    /// Spawn a background task that calls [`StubPool::sweep`] on
    /// `interval` until the returned handle is aborted or the pool itself
    /// is dropped (the task holds only a weak-equivalent clone through
    /// `Arc`, so keeping the handle around is the caller's responsibility
    /// for controlling its lifetime).
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep().await;
            }
        })
    }
}

/// Connects over a Unix-domain socket at a path supplied per-call; `tls` is
/// accepted for interface symmetry with [`Connector`] but rejected, since
/// TLS over a UDS endpoint is not a meaningful combination.
pub struct UnixConnector;

#[async_trait::async_trait]
impl Connector for UnixConnector {
    type Endpoint = PathBuf;

    async fn connect(&self, endpoint: &PathBuf, tls: bool) -> Result<Box<dyn DuplexStream>, Error> {
        if tls {
            return Err(Error::InvalidArgument(
                "TLS is not supported over a Unix-domain socket endpoint".into(),
            ));
        }
        let stream = tokio::net::UnixStream::connect(endpoint).await?;
        Ok(Box::new(stream))
    }
}

/// Build a `StubPool` over an arbitrary [`Connector`].
pub fn new_stub_pool<C: Connector + 'static>(
    idle_expiration: Duration,
    connect_timeout: Duration,
    connector: Arc<C>,
) -> Arc<StubPool<C>> {
    StubPool::new(StubPoolConfig::new(idle_expiration, connect_timeout), connector)
}

/// Build a `StubPool` of Unix-domain-socket connections. `path` is
/// accepted for interface symmetry with [`new_stub_pool`], but each
/// `get_stub` call supplies its own endpoint path.
pub fn new_uds_stub_pool(
    _path: impl AsRef<Path>,
    idle_expiration: Duration,
    connect_timeout: Duration,
) -> Arc<StubPool<UnixConnector>> {
    new_stub_pool(idle_expiration, connect_timeout, Arc::new(UnixConnector))
}
