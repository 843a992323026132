use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, RingBuffer};

pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

/// Chronological ring buffer that drops entries once they fall out of the
/// retention window, and overwrites the oldest entry when full.
pub struct TimedRing<T> {
    buffer: HeapRb<T>,
    retention: f64,
}

impl<T: Timestamped> TimedRing<T> {
    pub fn new(capacity: usize, retention: f64) -> Self {
        Self {
            buffer: HeapRb::new(capacity.max(1)),
            retention,
        }
    }

    /// Appends an entry, evicting anything older than the retention window
    /// measured from the new entry.
    pub fn push(&mut self, item: T) {
        self.evict_before(item.timestamp() - self.retention);
        self.buffer.push_overwrite(item);
    }

    pub fn evict_before(&mut self, cutoff: f64) {
        let stale = self
            .buffer
            .iter()
            .take_while(|item| item.timestamp() < cutoff)
            .count();
        if stale > 0 {
            self.buffer.skip(stale);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    /// Entries strictly newer than `start`.
    pub fn since(&self, start: f64) -> impl Iterator<Item = &T> {
        self.buffer
            .iter()
            .filter(move |item| item.timestamp() > start)
    }

    pub fn last(&self) -> Option<&T> {
        self.buffer.iter().last()
    }

    pub fn len(&self) -> usize {
        self.buffer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl<T: Timestamped + Clone> TimedRing<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }
}
