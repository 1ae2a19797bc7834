//! Lock-free single-producer/single-consumer ring buffer for path requests
//! (spec §4.7; capacity-rounding and padding confirmed by
//! `original_source/include/ai/internal/RequestQueue.hpp`).
//!
//! Capacity rounds up to a power of two so index wrapping is a mask instead
//! of a modulo. Head and tail counters live in separate cache lines so the
//! producer writing `tail` never invalidates the consumer's cache line for
//! `head`, and vice versa. SPSC is a hard invariant in the original; here
//! it's enforced by the type system instead of a comment: [`Producer`] and
//! [`Consumer`] are `Send` (one of each can live on its own thread) but not
//! `Sync`, so a second concurrent producer doesn't compile.

use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct CachePadded<T>(T);

struct Slot<T> {
    item: UnsafeCell<MaybeUninit<T>>,
}

struct Shared<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: access to `buffer` slots is partitioned by the head/tail protocol
// below — the producer only ever writes the slot at `tail`, the consumer
// only ever reads (and drops) the slot at `head`, and the release/acquire
// pair on tail/head ensures a written slot is visible before its index is.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let mut head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        while head != tail {
            let index = head & self.mask;
            unsafe {
                (*self.buffer[index].item.get()).assume_init_drop();
            }
            head = head.wrapping_add(1);
        }
    }
}

/// The single allowed submission side. Not `Sync` — only reachable from one
/// thread at a time without going through `&mut`.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: std::marker::PhantomData<Cell<()>>,
}

/// The single allowed consumption side. Same non-`Sync` marker as
/// [`Producer`].
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: std::marker::PhantomData<Cell<()>>,
}

/// Builds a producer/consumer pair backed by a buffer of `capacity.next_power_of_two()` slots.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.next_power_of_two().max(2);
    let mut buffer = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        buffer.push(Slot {
            item: UnsafeCell::new(MaybeUninit::uninit()),
        });
    }
    let shared = Arc::new(Shared {
        buffer: buffer.into_boxed_slice(),
        mask: capacity - 1,
        head: CachePadded(AtomicUsize::new(0)),
        tail: CachePadded(AtomicUsize::new(0)),
    });
    (
        Producer {
            shared: shared.clone(),
            _not_sync: std::marker::PhantomData,
        },
        Consumer {
            shared,
            _not_sync: std::marker::PhantomData,
        },
    )
}

impl<T> Producer<T> {
    /// Non-blocking push. Returns the item back on overflow so the caller
    /// can back off and retry next frame, per spec's overflow policy.
    pub fn push(&self, item: T) -> Result<(), T> {
        let tail = self.shared.tail.0.load(Ordering::Relaxed);
        let head = self.shared.head.0.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.shared.mask + 1 {
            return Err(item);
        }
        let index = tail & self.shared.mask;
        unsafe {
            (*self.shared.buffer[index].item.get()).write(item);
        }
        self.shared.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }
}

impl<T> Consumer<T> {
    /// Non-blocking pop; `None` if the buffer is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.shared.head.0.load(Ordering::Relaxed);
        let tail = self.shared.tail.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let index = head & self.shared.mask;
        let item = unsafe { (*self.shared.buffer[index].item.get()).assume_init_read() };
        self.shared.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips_in_order() {
        let (producer, consumer) = channel::<u32>(4);
        for i in 0..4 {
            producer.push(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(consumer.pop(), Some(i));
        }
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let (producer, _consumer) = channel::<u32>(5);
        assert_eq!(producer.capacity(), 8);
    }

    #[test]
    fn overflow_returns_the_item_back() {
        let (producer, _consumer) = channel::<u32>(2);
        producer.push(1).unwrap();
        producer.push(2).unwrap();
        assert_eq!(producer.push(3), Err(3));
    }

    #[test]
    fn drop_with_pending_items_does_not_leak_or_panic() {
        use std::sync::Arc as StdArc;
        let marker = StdArc::new(());
        let (producer, consumer) = channel::<StdArc<()>>(4);
        producer.push(marker.clone()).unwrap();
        producer.push(marker.clone()).unwrap();
        assert_eq!(StdArc::strong_count(&marker), 3);
        drop(producer);
        drop(consumer);
        assert_eq!(StdArc::strong_count(&marker), 1);
    }

    #[test]
    fn cross_thread_producer_then_consumer_sees_all_items() {
        let (producer, consumer) = channel::<u32>(64);
        let handle = std::thread::spawn(move || {
            for i in 0..50 {
                while producer.push(i).is_err() {
                    std::thread::yield_now();
                }
            }
        });
        let mut received = Vec::new();
        while received.len() < 50 {
            if let Some(item) = consumer.pop() {
                received.push(item);
            }
        }
        handle.join().unwrap();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }
}
