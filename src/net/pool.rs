//! Connection slot pool.
//!
//! # Responsibilities
//! - Bound concurrently active connections to `max_concurrency`
//! - Wait up to the accept timeout for a free slot, then report exhaustion
//! - Detect double release of a slot
//!
//! Slots are backed by owned semaphore permits. A slot dropped without an
//! explicit `release()` still returns its permit, so a panicking or aborted
//! connection task cannot leak capacity.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Error type for slot operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// No slot became free within the accept timeout.
    #[error("all {max} connection slots are in use")]
    Exhausted { max: usize },
    /// `release()` was called on a slot that was already released.
    #[error("connection slot {0} released twice")]
    AlreadyReleased(u64),
    /// The pool was closed for shutdown.
    #[error("connection pool is closed")]
    Closed,
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    acquire_timeout: Duration,
    outstanding: AtomicUsize,
    next_slot_id: AtomicU64,
}

/// Bounded pool of connection slots. Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct SlotPool {
    inner: Arc<PoolInner>,
}

impl SlotPool {
    /// Create a pool with `max_concurrency` slots.
    ///
    /// `acquire_timeout` of zero makes `acquire` reject immediately when
    /// every slot is taken.
    pub fn new(max_concurrency: usize, acquire_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(max_concurrency)),
                max_concurrency,
                acquire_timeout,
                outstanding: AtomicUsize::new(0),
                next_slot_id: AtomicU64::new(1),
            }),
        }
    }

    /// Acquire a slot, waiting at most the configured accept timeout.
    pub async fn acquire(&self) -> Result<ConnectionSlot, SlotError> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        let permit = if self.inner.acquire_timeout.is_zero() {
            semaphore.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => self.exhausted(),
                TryAcquireError::Closed => SlotError::Closed,
            })?
        } else {
            match tokio::time::timeout(self.inner.acquire_timeout, semaphore.acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(SlotError::Closed),
                Err(_) => return Err(self.exhausted()),
            }
        };
        Ok(self.issue(permit))
    }

    /// Acquire a slot without waiting.
    pub fn try_acquire(&self) -> Result<ConnectionSlot, SlotError> {
        let permit = Arc::clone(&self.inner.semaphore)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => self.exhausted(),
                TryAcquireError::Closed => SlotError::Closed,
            })?;
        Ok(self.issue(permit))
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> ConnectionSlot {
        let previous = self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        debug_assert!(previous < self.inner.max_concurrency);
        ConnectionSlot {
            id: self.inner.next_slot_id.fetch_add(1, Ordering::Relaxed),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
        }
    }

    fn exhausted(&self) -> SlotError {
        SlotError::Exhausted {
            max: self.inner.max_concurrency,
        }
    }

    /// Slots currently held by connections.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Stop handing out slots. Held slots can still be released.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }
}

/// Capacity token for one active connection.
#[derive(Debug)]
pub struct ConnectionSlot {
    id: u64,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl ConnectionSlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this slot still holds capacity.
    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    /// Return the slot to the pool.
    ///
    /// A second call is rejected with [`SlotError::AlreadyReleased`] and
    /// leaves the pool untouched.
    pub fn release(&mut self) -> Result<(), SlotError> {
        match self.permit.take() {
            Some(permit) => {
                // Decrement before the permit goes back so `outstanding`
                // never reads above the maximum.
                self.pool.outstanding.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
                Ok(())
            }
            None => Err(SlotError::AlreadyReleased(self.id)),
        }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        if self.permit.is_some() {
            let _ = self.release();
            tracing::trace!(slot = self.id, "Connection slot released on drop");
        }
    }
}
