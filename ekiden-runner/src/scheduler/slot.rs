//! Bounded pool of numbered worker slots
//!
//! A semaphore bounds how many workers are alive; a free list hands each
//! admitted worker a slot number unique among live workers. Dropping the
//! lease returns the number before the permit.

use anyhow::{Context, Result, anyhow};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct SlotPool {
    permits: Arc<Semaphore>,
    free: Arc<Mutex<Vec<usize>>>,
    size: usize,
}

impl SlotPool {
    /// Creates a pool with slots `0..size`
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            // Reversed so the lowest number is handed out first
            free: Arc::new(Mutex::new((0..size).rev().collect())),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots not currently leased
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free slot
    pub async fn acquire(&self) -> Result<SlotLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("Slot pool closed")?;

        let id = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .ok_or_else(|| anyhow!("No free slot number despite an available permit"))?;

        Ok(SlotLease {
            id,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }
}

/// Exclusive use of one slot until dropped
#[derive(Debug)]
pub struct SlotLease {
    id: usize,
    free: Arc<Mutex<Vec<usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl SlotLease {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(self.id);
    }
}
