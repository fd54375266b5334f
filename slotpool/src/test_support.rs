//! Instrumented resource shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::Resource;

#[derive(Debug)]
pub struct TestConnection {
    pub id: u64,
    pub closed: AtomicBool,
}

/// Counts every acquire/release and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct CountingResource {
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    pub fail: AtomicBool,
    open_delay: Duration,
    next_id: AtomicU64,
}

impl CountingResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_delay(delay: Duration) -> Self {
        Self {
            open_delay: delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let resource = Self::default();
        resource.fail.store(true, Ordering::SeqCst);
        resource
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resource for CountingResource {
    type Handle = TestConnection;

    async fn acquire(&self) -> anyhow::Result<TestConnection> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(TestConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            closed: AtomicBool::new(false),
        })
    }

    async fn release(&self, handle: Arc<TestConnection>) {
        handle.closed.store(true, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
