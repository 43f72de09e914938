use super::supervisor::Worker;
use std::collections::VecDeque;

/// Capacity-bounded, oldest-first collection of live workers.
///
/// Inserting into a full set is refused; callers evict the oldest member
/// (and retire it) first.
#[derive(Debug)]
pub struct WorkerSlots<W = Worker> {
    capacity: usize,
    workers: VecDeque<W>,
}

impl<W> WorkerSlots<W> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            workers: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.workers.len() >= self.capacity
    }

    /// Change the capacity. Members beyond the new capacity are returned
    /// oldest first so the caller can retire them.
    pub fn resize(&mut self, capacity: usize) -> Vec<W> {
        self.capacity = capacity.max(1);
        let excess = self.workers.len().saturating_sub(self.capacity);
        self.workers.drain(..excess).collect()
    }

    /// Remove the oldest member if the set is full.
    pub fn evict_oldest_if_full(&mut self) -> Option<W> {
        if self.is_full() {
            self.workers.pop_front()
        } else {
            None
        }
    }

    /// Append as newest member; hands the worker back if there is no room.
    pub fn push(&mut self, worker: W) -> Result<(), W> {
        if self.is_full() {
            return Err(worker);
        }
        self.workers.push_back(worker);
        Ok(())
    }

    pub fn newest(&self) -> Option<&W> {
        self.workers.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &W> {
        self.workers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut W> {
        self.workers.iter_mut()
    }

    /// Take every member, oldest first.
    pub fn drain(&mut self) -> Vec<W> {
        self.workers.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_refuses_beyond_capacity() {
        let mut slots = WorkerSlots::new(2);
        assert!(slots.push(1).is_ok());
        assert!(slots.push(2).is_ok());
        assert_eq!(slots.push(3), Err(3));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut slots = WorkerSlots::new(2);
        assert_eq!(slots.evict_oldest_if_full(), None);
        slots.push("a").unwrap();
        slots.push("b").unwrap();

        assert_eq!(slots.evict_oldest_if_full(), Some("a"));
        slots.push("c").unwrap();
        assert_eq!(slots.evict_oldest_if_full(), Some("b"));
        slots.push("d").unwrap();

        assert_eq!(slots.iter().copied().collect::<Vec<_>>(), vec!["c", "d"]);
        assert_eq!(slots.newest(), Some(&"d"));
    }

    #[test]
    fn never_exceeds_capacity_under_rotation() {
        let mut slots = WorkerSlots::new(3);
        for i in 0..20 {
            let _ = slots.evict_oldest_if_full();
            slots.push(i).unwrap();
            assert!(slots.len() <= slots.capacity());
        }
        assert_eq!(slots.drain(), vec![17, 18, 19]);
        assert!(slots.is_empty());
    }

    #[test]
    fn shrinking_returns_oldest_excess() {
        let mut slots = WorkerSlots::new(3);
        for i in 0..3 {
            slots.push(i).unwrap();
        }
        assert_eq!(slots.resize(1), vec![0, 1]);
        assert_eq!(slots.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert!(slots.resize(4).is_empty());
        assert!(!slots.is_full());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let slots: WorkerSlots<u8> = WorkerSlots::new(0);
        assert_eq!(slots.capacity(), 1);
    }
}
