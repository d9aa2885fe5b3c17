//! Bounded free-list of reusable marker elements.

use serde::Serialize;

/// Lifetime counters of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub pooled: usize,
}

/// Elements returned beyond `max_size` are dropped instead of kept.
#[derive(Debug)]
pub struct ElementPool<T> {
    free: Vec<T>,
    max_size: usize,
    created: u64,
    reused: u64,
    discarded: u64,
}

impl<T> ElementPool<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            free: Vec::new(),
            max_size,
            created: 0,
            reused: 0,
            discarded: 0,
        }
    }

    /// Take a pooled element, or build a fresh one when the pool is empty.
    pub fn acquire(&mut self, make: impl FnOnce() -> T) -> T {
        match self.free.pop() {
            Some(item) => {
                self.reused += 1;
                item
            }
            None => {
                self.created += 1;
                make()
            }
        }
    }

    /// Return an element. Returns `false` if it was discarded because the
    /// pool is full.
    pub fn release(&mut self, item: T) -> bool {
        if self.free.len() >= self.max_size {
            self.discarded += 1;
            return false;
        }
        self.free.push(item);
        true
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created,
            reused: self.reused,
            discarded: self.discarded,
            pooled: self.free.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_never_exceeds_max() {
        let mut pool: ElementPool<u32> = ElementPool::new(3);
        let mut kept = 0;
        for i in 0..10 {
            if pool.release(i) {
                kept += 1;
            }
            assert!(pool.len() <= 3);
        }
        assert_eq!(kept, 3);
        assert_eq!(pool.stats().discarded, 7);
    }

    #[test]
    fn test_acquire_prefers_pooled() {
        let mut pool = ElementPool::new(2);
        let first = pool.acquire(|| "fresh");
        assert_eq!(first, "fresh");
        pool.release("pooled");
        assert_eq!(pool.acquire(|| "fresh"), "pooled");

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.pooled, 0);
    }
}
