//! Bounded slot pool for concurrently open chat surfaces.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::ChatError;

/// Default number of concurrently open chat surfaces.
pub const DEFAULT_POOL_CAPACITY: usize = 5;

/// Fixed-capacity pool of numbered session slots.
///
/// Slots are numbered `1..=capacity` and handed out lowest-free first, so a
/// released number is reused before a higher one is ever touched. Acquisition
/// fails closed when the pool is full.
#[derive(Debug)]
pub struct SlotPool {
    occupied: Mutex<Vec<bool>>,
}

impl SlotPool {
    /// Pool with the given capacity. Zero capacity means every acquire fails.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            occupied: Mutex::new(vec![false; capacity]),
        })
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.occupied.lock().len()
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.occupied.lock().iter().filter(|o| **o).count()
    }

    /// Claim the lowest free slot. The lease releases it on drop.
    pub fn acquire(self: &Arc<Self>) -> Result<SlotLease, ChatError> {
        let mut occupied = self.occupied.lock();
        match occupied.iter().position(|o| !o) {
            Some(index) => {
                occupied[index] = true;
                Ok(SlotLease {
                    pool: Arc::clone(self),
                    number: index + 1,
                })
            }
            None => Err(ChatError::PoolExhausted {
                capacity: occupied.len(),
            }),
        }
    }

    /// Return a slot to the pool. Releasing a free or out-of-range slot is
    /// a no-op, so a release is safe to issue at most once per acquire and
    /// harmless beyond that.
    pub fn release(&self, number: usize) {
        let mut occupied = self.occupied.lock();
        match occupied.get_mut(number.wrapping_sub(1)) {
            Some(slot) if *slot => *slot = false,
            _ => debug!(number, "release of unallocated slot ignored"),
        }
    }
}

/// Holds one slot; returns it to the pool on drop.
#[derive(Debug)]
pub struct SlotLease {
    pool: Arc<SlotPool>,
    number: usize,
}

impl SlotLease {
    /// The slot number, `1..=capacity`.
    pub fn number(&self) -> usize {
        self.number
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.pool.release(self.number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn hands_out_lowest_free_first() {
        let pool = SlotPool::new(3);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(a.number(), 1);
        assert_eq!(b.number(), 2);

        drop(a);
        let c = pool.acquire().unwrap();
        assert_eq!(c.number(), 1, "released low slot is reused first");
    }

    #[test]
    fn fails_closed_when_full() {
        let pool = SlotPool::new(2);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert_matches!(err, ChatError::PoolExhausted { capacity: 2 });
    }

    #[test]
    fn drop_frees_the_slot() {
        let pool = SlotPool::new(1);
        let lease = pool.acquire().unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(lease);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.acquire().unwrap().number(), 1);
    }

    #[test]
    fn double_release_is_harmless() {
        let pool = SlotPool::new(2);
        let lease = pool.acquire().unwrap();
        let number = lease.number();
        drop(lease);
        pool.release(number);
        pool.release(99);
        assert_eq!(pool.in_use(), 0);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!((a.number(), b.number()), (1, 2));
    }

    #[test]
    fn zero_capacity_pool_rejects_everything() {
        let pool = SlotPool::new(0);
        assert_matches!(pool.acquire(), Err(ChatError::PoolExhausted { capacity: 0 }));
    }
}
