//! Busy flags for the fixed set of DVB adapters.

use tracing::debug;

/// Tracks which adapters are held by a running capture.
///
/// Acquisition never waits: a held adapter makes `try_acquire` fail
/// immediately and the caller decides what to do with the loser.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    busy: Vec<bool>,
}

impl ResourcePool {
    pub fn new(adapter_count: usize) -> Self {
        Self {
            busy: vec![false; adapter_count],
        }
    }

    /// Mark `adapter` busy. Returns `false` if it is already held or does
    /// not exist.
    pub fn try_acquire(&mut self, adapter: usize) -> bool {
        match self.busy.get_mut(adapter) {
            Some(flag) if !*flag => {
                *flag = true;
                debug!(adapter, "adapter acquired");
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self, adapter: usize) {
        if let Some(flag) = self.busy.get_mut(adapter) {
            *flag = false;
            debug!(adapter, "adapter released");
        }
    }

    /// Busy flag of every adapter, indexed by adapter number.
    pub fn snapshot(&self) -> Vec<bool> {
        self.busy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let mut pool = ResourcePool::new(2);
        assert!(pool.try_acquire(0));
        assert!(!pool.try_acquire(0));
        assert_eq!(pool.snapshot(), vec![true, false]);
        pool.release(0);
        assert_eq!(pool.snapshot(), vec![false, false]);
        assert!(pool.try_acquire(0));
    }

    #[test]
    fn adapters_are_independent() {
        let mut pool = ResourcePool::new(2);
        assert!(pool.try_acquire(0));
        assert!(pool.try_acquire(1));
        assert_eq!(pool.snapshot(), vec![true, true]);
    }

    #[test]
    fn out_of_range_never_acquired() {
        let mut pool = ResourcePool::new(1);
        assert!(!pool.try_acquire(1));
        // releasing an unknown adapter is harmless
        pool.release(5);
        assert_eq!(pool.snapshot(), vec![false]);
    }
}
