//! Fixed-capacity circular buffer decoupling packet reception from processing.
//!
//! The buffer is a slot array of `CAPACITY` entries with head/tail indices.
//! It never grows and never blocks: when full, `push` rejects the *newest*
//! item and returns `false`, leaving the queued items untouched.
//!
//! All operations take `&self`; an internal mutex serialises them, so one
//! producer and one consumer may call `push`/`pop` concurrently (additional
//! producers are serialised by the same lock).

use std::sync::{Mutex, MutexGuard};

/// Reference capacity for packet queues.
pub const DEFAULT_CAPACITY: usize = 1024;

struct Slots<T> {
    buffer: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    count: usize,
}

pub struct RingBuffer<T, const CAPACITY: usize = DEFAULT_CAPACITY> {
    slots: Mutex<Slots<T>>,
}

impl<T, const CAPACITY: usize> RingBuffer<T, CAPACITY> {
    pub fn new() -> Self {
        assert!(CAPACITY > 0, "ring buffer capacity must be non-zero");
        let buffer = (0..CAPACITY).map(|_| None).collect::<Vec<_>>().into_boxed_slice();
        Self {
            slots: Mutex::new(Slots {
                buffer,
                head: 0,
                tail: 0,
                count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        // indices are only written after the slot, so a poisoned guard is consistent
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends an item. Returns false and drops `item` if the buffer is full.
    pub fn push(&self, item: T) -> bool {
        let mut slots = self.lock();
        if slots.count == CAPACITY {
            return false;
        }
        let head = slots.head;
        slots.buffer[head] = Some(item);
        slots.head = (head + 1) % CAPACITY;
        slots.count += 1;
        true
    }

    /// Removes the oldest item, if any. Ownership moves to the caller.
    pub fn pop(&self) -> Option<T> {
        let mut slots = self.lock();
        if slots.count == 0 {
            return None;
        }
        let tail = slots.tail;
        let item = slots.buffer[tail].take();
        slots.tail = (tail + 1) % CAPACITY;
        slots.count -= 1;
        item
    }

    /// Pops everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut slots = self.lock();
        let mut items = Vec::with_capacity(slots.count);
        while slots.count > 0 {
            let tail = slots.tail;
            if let Some(item) = slots.buffer[tail].take() {
                items.push(item);
            }
            slots.tail = (tail + 1) % CAPACITY;
            slots.count -= 1;
        }
        items
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == CAPACITY
    }

    pub const fn capacity() -> usize {
        CAPACITY
    }
}

impl<T, const CAPACITY: usize> Default for RingBuffer<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> std::fmt::Debug for RingBuffer<T, CAPACITY> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.len())
            .field("capacity", &CAPACITY)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_pop() {
        let buffer: RingBuffer<u32, 4> = RingBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_fifo_order() {
        let buffer: RingBuffer<u32, 8> = RingBuffer::new();
        for i in 0..8 {
            assert!(buffer.push(i));
        }
        for i in 0..8 {
            assert_eq!(buffer.pop(), Some(i));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_rejects_newest() {
        let buffer: RingBuffer<u32, 4> = RingBuffer::new();
        for i in 0..4 {
            assert!(buffer.push(i));
        }
        assert!(buffer.is_full());
        assert!(!buffer.push(99));
        assert_eq!(buffer.len(), 4);

        let drained = buffer.drain();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_default_capacity_overflow() {
        let buffer: RingBuffer<usize> = RingBuffer::new();
        assert_eq!(RingBuffer::<usize, DEFAULT_CAPACITY>::capacity(), 1024);

        for i in 0..1024 {
            assert!(buffer.push(i));
        }
        assert!(!buffer.push(1024));
        assert_eq!(buffer.len(), 1024);

        for i in 0..1024 {
            assert_eq!(buffer.pop(), Some(i));
        }
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_wraparound() {
        let buffer: RingBuffer<u32, 3> = RingBuffer::new();
        for round in 0..10 {
            assert!(buffer.push(round * 2));
            assert!(buffer.push(round * 2 + 1));
            assert_eq!(buffer.pop(), Some(round * 2));
            assert_eq!(buffer.pop(), Some(round * 2 + 1));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_single_producer_single_consumer() {
        let buffer: Arc<RingBuffer<u32, 64>> = Arc::new(RingBuffer::new());
        let total = 10_000u32;

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut next = 0;
                while next < total {
                    if buffer.push(next) {
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < total {
            match buffer.pop() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert!(buffer.is_empty());
    }
}
