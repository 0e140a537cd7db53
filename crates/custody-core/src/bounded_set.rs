//! Fixed-capacity ordered set.
//!
//! [`BoundedSortedSet`] keeps its keys sorted in contiguous storage, so
//! membership is a binary search and insert/remove shift the tail. Storage is
//! allocated lazily on the first insertion (or by [`BoundedSortedSet::initialize`])
//! and released again once the set becomes empty.
//!
//! The set has no lock of its own: it is only ever reached through the
//! registry lock, and `&mut self` on every mutation is what guarantees
//! exclusive access.

use crate::error::{AddError, AddResult};

#[derive(Debug)]
pub struct BoundedSortedSet<T> {
    capacity: usize,
    items: Option<Vec<T>>,
}

impl<T> BoundedSortedSet<T>
where
    T: Copy + Ord + Default,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: None,
        }
    }

    /// Allocate storage for the full capacity up front.
    pub fn initialize(&mut self) -> AddResult {
        if self.items.is_some() {
            return Ok(());
        }
        let mut items = Vec::new();
        items
            .try_reserve_exact(self.capacity)
            .map_err(|_| AddError::Uninitialized)?;
        self.items = Some(items);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.items.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Whether one more key would fit.
    pub fn has_room(&self) -> bool {
        self.count() < self.capacity
    }

    pub fn contains(&self, key: T) -> bool {
        self.position(key).is_some()
    }

    pub fn add(&mut self, key: T) -> AddResult {
        let capacity = self.capacity;
        if self.items.is_none() {
            self.initialize()?;
        }
        let Some(items) = self.items.as_mut() else {
            return Err(AddError::Uninitialized);
        };
        match items.binary_search(&key) {
            Ok(_) => Err(AddError::AlreadyExists),
            Err(_) if items.len() >= capacity => Err(AddError::CapacityExhausted),
            Err(index) => {
                items.insert(index, key);
                Ok(())
            }
        }
    }

    /// Remove `key`, returning whether it was present.
    pub fn remove(&mut self, key: T) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        if let Some(items) = self.items.as_mut() {
            items.remove(index);
            if items.is_empty() {
                self.items = None;
            }
        }
        true
    }

    /// Copy as many keys as fit into `buf`, in ascending order, and fill the
    /// rest of `buf` with `T::default()`. Returns the number of keys copied.
    pub fn copy_to(&self, buf: &mut [T]) -> usize {
        let items = self.items.as_deref().unwrap_or_default();
        let copied = items.len().min(buf.len());
        buf[..copied].copy_from_slice(&items[..copied]);
        buf[copied..].fill(T::default());
        copied
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.items.iter().flatten().copied()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone().unwrap_or_default()
    }

    /// Whether the set holds exactly the keys in `keys` (which must be sorted).
    pub fn equals(&self, keys: &[T]) -> bool {
        self.items.as_deref().unwrap_or_default() == keys
    }

    /// Release storage and forget every key.
    pub fn destroy(&mut self) {
        self.items = None;
    }

    fn position(&self, key: T) -> Option<usize> {
        self.items.as_ref()?.binary_search(&key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_keys_sorted() {
        let mut set = BoundedSortedSet::new(8);
        for key in [5u32, 1, 9, 3] {
            set.add(key).unwrap();
        }
        assert_eq!(set.to_vec(), vec![1, 3, 5, 9]);
        assert!(set.contains(9));
        assert!(!set.contains(4));
    }

    #[test]
    fn rejects_duplicates_before_capacity() {
        let mut set = BoundedSortedSet::new(2);
        set.add(1u32).unwrap();
        set.add(2).unwrap();
        assert_eq!(set.add(2), Err(AddError::AlreadyExists));
        assert_eq!(set.add(3), Err(AddError::CapacityExhausted));
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn zero_capacity_is_always_full() {
        let mut set = BoundedSortedSet::new(0);
        assert_eq!(set.add(1u32), Err(AddError::CapacityExhausted));
        assert!(!set.has_room());
    }

    #[test]
    fn remove_compacts_and_releases() {
        let mut set = BoundedSortedSet::new(4);
        set.add(1u32).unwrap();
        set.add(2).unwrap();
        assert!(set.remove(1));
        assert!(!set.remove(1));
        assert_eq!(set.to_vec(), vec![2]);
        assert!(set.remove(2));
        assert!(set.is_empty());
        // storage is allocated again on demand
        set.add(7).unwrap();
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn copy_to_truncates_and_pads() {
        let mut set = BoundedSortedSet::new(4);
        for key in [30u32, 10, 20] {
            set.add(key).unwrap();
        }

        let mut small = [99u32; 2];
        assert_eq!(set.copy_to(&mut small), 2);
        assert_eq!(small, [10, 20]);

        let mut large = [99u32; 5];
        assert_eq!(set.copy_to(&mut large), 3);
        assert_eq!(large, [10, 20, 30, 0, 0]);

        let empty: BoundedSortedSet<u32> = BoundedSortedSet::new(4);
        let mut buf = [99u32; 2];
        assert_eq!(empty.copy_to(&mut buf), 0);
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn destroy_resets_count() {
        let mut set = BoundedSortedSet::new(4);
        set.initialize().unwrap();
        set.add(3u64).unwrap();
        set.destroy();
        assert_eq!(set.count(), 0);
        assert!(!set.contains(3));
    }
}
