//! Connection pool — at most `P` live TCP connections per
//! `(backend_kind, server_index)`.
//!
//! Keyed by a `DashMap` so pools for different targets never contend on a
//! shared lock. `pop`/`push` are async so callers block on a
//! `tokio::sync::Semaphore` rather than busy-poll when the pool is
//! exhausted. Nagle is disabled via `socket2` immediately on connect.

use std::sync::Arc;

use dashmap::DashMap;
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use strata_core::StrataError;

/// Which capability set a pooled connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Object,
    Kv,
}

type PoolKey = (BackendKind, u32);

/// A leased connection. On success the caller calls `ConnectionPool::push`
/// to return it; on I/O error the caller simply drops it, which releases
/// its semaphore permit without returning the (possibly broken) stream to
/// the idle list — this is the "close rather than return" rule from spec
/// §4.2 and §7's `NetworkTransient` handling.
pub struct PooledConnection {
    pub stream: TcpStream,
    key: PoolKey,
    permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn server_index(&self) -> u32 {
        self.key.1
    }
}

pub struct ConnectionPool {
    cap: usize,
    idle: DashMap<PoolKey, Mutex<Vec<(TcpStream, OwnedSemaphorePermit)>>>,
    semaphores: DashMap<PoolKey, Arc<Semaphore>>,
}

impl ConnectionPool {
    pub fn new(cap: u32) -> Self {
        Self {
            cap: cap as usize,
            idle: DashMap::new(),
            semaphores: DashMap::new(),
        }
    }

    fn semaphore_for(&self, key: PoolKey) -> Arc<Semaphore> {
        self.semaphores
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(self.cap)))
            .clone()
    }

    /// Lease a connection to `addr` for `(kind, server_index)`, reusing an
    /// idle one if available, else opening a fresh connection once a
    /// semaphore permit frees up (bounding the pool at `P` total
    /// outstanding connections for this key, idle or leased).
    pub async fn pop(
        &self,
        kind: BackendKind,
        server_index: u32,
        addr: &str,
    ) -> Result<PooledConnection, StrataError> {
        let key = (kind, server_index);

        if let Some(list) = self.idle.get(&key) {
            let mut guard = list.lock().await;
            if let Some((stream, permit)) = guard.pop() {
                return Ok(PooledConnection { stream, key, permit });
            }
        }

        let semaphore = self.semaphore_for(key);
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        let stream = TcpStream::connect(addr).await?;
        SockRef::from(&stream)
            .set_nodelay(true)
            .map_err(StrataError::from)?;

        Ok(PooledConnection { stream, key, permit })
    }

    /// Return a healthy connection to the idle list for reuse.
    pub async fn push(&self, conn: PooledConnection) {
        let list = self
            .idle
            .entry(conn.key)
            .or_insert_with(|| Mutex::new(Vec::new()));
        list.lock().await.push((conn.stream, conn.permit));
    }

    /// Number of connections (idle + leased) outstanding for `key`.
    pub fn outstanding(&self, kind: BackendKind, server_index: u32) -> usize {
        let key = (kind, server_index);
        self.cap
            - self
                .semaphores
                .get(&key)
                .map(|s| s.available_permits())
                .unwrap_or(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                if let Ok((mut sock, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        use tokio::io::{AsyncReadExt, AsyncWriteExt};
                        while let Ok(n) = sock.read(&mut buf).await {
                            if n == 0 {
                                break;
                            }
                            let _ = sock.write_all(&buf[..n]).await;
                        }
                    });
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn pop_push_reuses_the_same_connection() {
        let addr = echo_server().await;
        let pool = ConnectionPool::new(4);

        let conn = pool.pop(BackendKind::Object, 0, &addr).await.unwrap();
        let local_addr = conn.stream.local_addr().unwrap();
        pool.push(conn).await;

        let conn2 = pool.pop(BackendKind::Object, 0, &addr).await.unwrap();
        assert_eq!(conn2.stream.local_addr().unwrap(), local_addr);
    }

    #[tokio::test]
    async fn pool_bounds_outstanding_connections_per_key() {
        let addr = echo_server().await;
        let pool = ConnectionPool::new(2);

        let c1 = pool.pop(BackendKind::Object, 0, &addr).await.unwrap();
        let c2 = pool.pop(BackendKind::Object, 0, &addr).await.unwrap();
        assert_eq!(pool.outstanding(BackendKind::Object, 0), 2);

        let pop_fut = pool.pop(BackendKind::Object, 0, &addr);
        tokio::pin!(pop_fut);
        tokio::select! {
            _ = &mut pop_fut => panic!("third pop should block while pool is at capacity"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }

        pool.push(c1).await;
        let c3 = pop_fut.await.unwrap();
        drop(c2);
        drop(c3);
    }

    #[tokio::test]
    async fn different_server_indices_get_independent_pools() {
        let addr = echo_server().await;
        let pool = ConnectionPool::new(1);
        let _a = pool.pop(BackendKind::Object, 0, &addr).await.unwrap();
        let _b = pool.pop(BackendKind::Object, 1, &addr).await.unwrap();
        assert_eq!(pool.outstanding(BackendKind::Object, 0), 1);
        assert_eq!(pool.outstanding(BackendKind::Object, 1), 1);
    }
}
