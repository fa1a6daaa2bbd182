#![cfg_attr(not(any(test, feature = "std")), no_std)]

// Re-export spin crate types as our lock API.
// Callers serialize access to the frame table through these; the mm core
// itself takes no locks.
pub use spin::{Mutex, MutexGuard};

pub use hashbrown::HashMap;

/// Fixed-size per-processor storage, indexed by processor id.
///
/// The scheduler owns one of these for its per-core execution contexts and
/// hands out the slot for the processor a batch runs on.
pub struct PerCpu<T, const N: usize> {
    slots: [T; N],
}

impl<T: Default, const N: usize> Default for PerCpu<T, N> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T, const N: usize> PerCpu<T, N> {
    /// [P1] Build every slot from its processor id
    pub fn from_fn(f: impl FnMut(usize) -> T) -> Self {
        Self {
            slots: core::array::from_fn(f),
        }
    }

    /// Number of processor slots.
    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// [P2] Slot for `cpu`, [P3] None past the last processor
    pub fn get(&self, cpu: usize) -> Option<&T> {
        self.slots.get(cpu)
    }

    pub fn get_mut(&mut self, cpu: usize) -> Option<&mut T> {
        self.slots.get_mut(cpu)
    }

    /// [P4] Visit slots in processor order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().enumerate()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots.iter_mut().enumerate()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests: exclusive access, release on drop, read/write through the guard
    #[test]
    fn test_spinlock_basic() {
        let lock = Mutex::new(42);
        {
            let mut guard = lock.lock();
            assert_eq!(*guard, 42);
            *guard = 43;
        }
        assert_eq!(*lock.lock(), 43);
    }

    /// Tests: [P1] slots built from processor id, [P2] lookup
    #[test]
    fn test_per_cpu_from_fn() {
        let cpus: PerCpu<usize, 4> = PerCpu::from_fn(|id| id * 10);
        assert_eq!(cpus.len(), 4);
        assert_eq!(cpus.get(0), Some(&0));
        assert_eq!(cpus.get(3), Some(&30));
    }

    /// Tests: [P3] out-of-range processor id
    #[test]
    fn test_per_cpu_out_of_range() {
        let mut cpus: PerCpu<bool, 2> = PerCpu::default();
        assert!(cpus.get(2).is_none());
        assert!(cpus.get_mut(7).is_none());
    }

    /// Tests: [P4] iteration order and mutation through get_mut
    #[test]
    fn test_per_cpu_iter_mut() {
        let mut cpus: PerCpu<bool, 3> = PerCpu::default();
        if let Some(flag) = cpus.get_mut(1) {
            *flag = true;
        }
        let set: std::vec::Vec<usize> = cpus
            .iter()
            .filter(|(_, flag)| **flag)
            .map(|(id, _)| id)
            .collect();
        assert_eq!(set, std::vec![1]);

        for (_, flag) in cpus.iter_mut() {
            *flag = false;
        }
        assert!(cpus.iter().all(|(_, flag)| !*flag));
    }

    #[test]
    fn test_hashmap_basic() {
        let mut map = HashMap::new();
        map.insert(7usize, "frame");
        assert_eq!(map.get(&7), Some(&"frame"));
        assert_eq!(map.get(&8), None);
    }
}
