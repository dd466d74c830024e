// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_core::client::DuplexStream;
use rpc_core::error::Error;
use rpc_core::pool::{new_stub_pool, Connector};

struct CountingConnector {
    connects: AtomicUsize,
}

#[async_trait::async_trait]
impl Connector for CountingConnector {
    type Endpoint = String;

    async fn connect(&self, _endpoint: &String, _tls: bool) -> Result<Box<dyn DuplexStream>, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (a, _b) = tokio::io::duplex(4096);
        Ok(Box::new(a))
    }
}

#[tokio::test]
async fn reuses_stub_within_refcount() {
    let connector = Arc::new(CountingConnector {
        connects: AtomicUsize::new(0),
    });
    let pool = new_stub_pool(Duration::from_secs(60), Duration::from_secs(1), connector.clone());

    let a = pool.get_stub("ep".to_string(), false).await.unwrap();
    let b = pool.get_stub("ep".to_string(), false).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sweep_evicts_after_expiration_once_refcount_zero() {
    let connector = Arc::new(CountingConnector {
        connects: AtomicUsize::new(0),
    });
    let pool = new_stub_pool(
        Duration::from_millis(1),
        Duration::from_secs(1),
        connector.clone(),
    );

    let stub = pool.get_stub("ep".to_string(), false).await.unwrap();
    pool.put_stub(&"ep".to_string(), false, false).await;
    drop(stub);

    tokio::time::sleep(Duration::from_millis(5)).await;
    pool.sweep().await;

    assert!(pool.acquire(&"ep".to_string(), false).await.is_none());
    let _ = pool.get_stub("ep".to_string(), false).await.unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn put_stub_immediately_evicts_despite_refcount() {
    let connector = Arc::new(CountingConnector {
        connects: AtomicUsize::new(0),
    });
    let pool = new_stub_pool(Duration::from_secs(60), Duration::from_secs(1), connector);

    let _a = pool.get_stub("ep".to_string(), false).await.unwrap();
    let _b = pool.get_stub("ep".to_string(), false).await.unwrap();
    pool.put_stub(&"ep".to_string(), false, true).await;

    assert!(pool.acquire(&"ep".to_string(), false).await.is_none());
}
