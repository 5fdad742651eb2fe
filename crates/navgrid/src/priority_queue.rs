use std::collections::{BTreeMap, VecDeque};

/// A min-priority queue over integer priorities.
///
/// Values with equal priority are popped in insertion order, which keeps searches
/// built on top of it deterministic.
#[derive(Debug, Clone)]
pub struct BucketQueue<T> {
    buckets: BTreeMap<i32, VecDeque<T>>,
    len: usize,
}

impl<T> Default for BucketQueue<T> {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            len: 0,
        }
    }
}

impl<T> BucketQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` behind every other value of the same `priority`.
    pub fn push(&mut self, value: T, priority: i32) {
        self.buckets.entry(priority).or_default().push_back(value);
        self.len += 1;
    }

    /// Removes the oldest value with the lowest priority.
    pub fn pop(&mut self) -> Option<T> {
        let mut bucket = self.buckets.first_entry()?;
        let value = bucket.get_mut().pop_front();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    /// Whether the queue holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of queued values.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
}
