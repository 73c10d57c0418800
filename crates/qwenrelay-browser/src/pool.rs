//! Bounded free-list of reusable browser pages.
//!
//! A handle is always in exactly one place: in the pool, on loan to a
//! caller, or closed. Handles released into a full pool are closed
//! immediately, never leaked.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Maximum number of idle pages kept alive.
pub const POOL_CAPACITY: usize = 3;

/// Close seam for pooled handles; lets the capacity and drain invariants be
/// tested without a live browser.
#[async_trait]
pub trait PooledPage: Send + Sync {
    async fn close_page(self);
}

#[async_trait]
impl PooledPage for chromiumoxide::Page {
    async fn close_page(self) {
        if let Err(e) = self.close().await {
            warn!("Failed to close page: {}", e);
        }
    }
}

pub struct PagePool<P: PooledPage> {
    free: Mutex<Vec<P>>,
    capacity: usize,
}

/// The production pool over live CDP pages.
pub type CdpPagePool = PagePool<chromiumoxide::Page>;

impl<P: PooledPage> PagePool<P> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Pop a free handle, if any. Creating and bootstrapping a replacement
    /// page is the session manager's job.
    pub async fn take(&self) -> Option<P> {
        self.free.lock().await.pop()
    }

    /// Return a handle to the free-list, or close it when the pool is full.
    pub async fn release(&self, page: P) {
        let evicted = {
            let mut free = self.free.lock().await;
            if free.len() < self.capacity {
                free.push(page);
                None
            } else {
                Some(page)
            }
        };
        if let Some(page) = evicted {
            debug!("Page pool full, closing released page");
            page.close_page().await;
        }
    }

    /// Close every free handle and empty the list. Idempotent; called before
    /// any browser teardown.
    pub async fn drain(&self) {
        let pages = std::mem::take(&mut *self.free.lock().await);
        for page in pages {
            page.close_page().await;
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.free.lock().await.len()
    }
}

impl<P: PooledPage> Default for PagePool<P> {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}

/// Close a page that was opened for a one-shot sequence and pass the
/// sequence's result through, so no exit path leaks the page.
pub async fn close_with<P: PooledPage, T>(page: P, result: T) -> T {
    page.close_page().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockPage {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PooledPage for MockPage {
        async fn close_page(self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn mock(closed: &Arc<AtomicUsize>) -> MockPage {
        MockPage {
            closed: closed.clone(),
        }
    }

    #[tokio::test]
    async fn test_release_beyond_capacity_closes_excess() {
        let closed = Arc::new(AtomicUsize::new(0));
        let pool: PagePool<MockPage> = PagePool::new(POOL_CAPACITY);

        for _ in 0..5 {
            pool.release(mock(&closed)).await;
        }

        assert_eq!(pool.idle_count().await, POOL_CAPACITY);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_take_then_release_round_trips() {
        let closed = Arc::new(AtomicUsize::new(0));
        let pool: PagePool<MockPage> = PagePool::new(POOL_CAPACITY);

        assert!(pool.take().await.is_none());
        pool.release(mock(&closed)).await;
        let page = pool.take().await.unwrap();
        assert_eq!(pool.idle_count().await, 0);

        pool.release(page).await;
        assert_eq!(pool.idle_count().await, 1);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drain_closes_all_and_is_idempotent() {
        let closed = Arc::new(AtomicUsize::new(0));
        let pool: PagePool<MockPage> = PagePool::new(POOL_CAPACITY);

        for _ in 0..3 {
            pool.release(mock(&closed)).await;
        }

        pool.drain().await;
        assert_eq!(pool.idle_count().await, 0);
        assert_eq!(closed.load(Ordering::SeqCst), 3);

        pool.drain().await;
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_close_with_closes_on_every_result() {
        let closed = Arc::new(AtomicUsize::new(0));

        let failed: Result<(), &str> = close_with(mock(&closed), Err("cookie write failed")).await;
        assert!(failed.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let passed: Result<(), &str> = close_with(mock(&closed), Ok(())).await;
        assert!(passed.is_ok());
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }
}
