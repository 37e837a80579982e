//! Unbounded single-producer single-consumer byte queue
//!
//! A forward-linked chain of bounded segments. The producer never fails a
//! write: when the current segment cannot host a record it allocates a larger
//! one and links it. The consumer drains segment by segment, frees each
//! segment it leaves behind, and surfaces one [`AllocationInfo`] per
//! transition so the backend can report the allocation.

use crate::BoundedSpscQueue;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Segment {
    queue: BoundedSpscQueue,
    next: AtomicPtr<Segment>,
}

impl Segment {
    fn allocate(capacity: usize) -> NonNull<Segment> {
        let segment = Box::new(Segment {
            queue: BoundedSpscQueue::new(capacity),
            next: AtomicPtr::new(std::ptr::null_mut()),
        });
        // The chain owns the segment; freed by the consumer on transition or
        // by Drop.
        unsafe { NonNull::new_unchecked(Box::into_raw(segment)) }
    }
}

/// Reported once per segment transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    pub new_capacity: usize,
    pub previous_capacity: usize,
}

pub struct ReadResult<'a> {
    pub bytes: Option<&'a [u8]>,
    pub allocation: Option<AllocationInfo>,
}

pub struct UnboundedSpscQueue {
    producer_segment: UnsafeCell<NonNull<Segment>>,
    consumer_segment: UnsafeCell<NonNull<Segment>>,
    /// When set, growth past this segment capacity is refused and the write
    /// fails instead.
    max_capacity: Option<usize>,
}

unsafe impl Send for UnboundedSpscQueue {}
unsafe impl Sync for UnboundedSpscQueue {}

impl UnboundedSpscQueue {
    pub fn new(initial_capacity: usize, max_capacity: Option<usize>) -> Self {
        let capacity = initial_capacity.next_power_of_two();
        let first = Segment::allocate(capacity);
        Self {
            producer_segment: UnsafeCell::new(first),
            consumer_segment: UnsafeCell::new(first),
            max_capacity,
        }
    }

    /// Capacity of the segment the consumer is currently draining; the
    /// backend bounds each drain round by it.
    pub fn capacity(&self) -> usize {
        unsafe { (*self.consumer_segment.get()).as_ref() }
            .queue
            .capacity()
    }

    /// Reserve a contiguous slot for one record of `n` payload bytes,
    /// growing the chain if needed. Fails only in `max_capacity` mode.
    ///
    /// Producer thread only.
    #[allow(clippy::mut_from_ref)]
    pub fn prepare_write(&self, n: usize) -> Option<&mut [u8]> {
        let segment = unsafe { (*self.producer_segment.get()).as_ref() };
        if let Some(slot) = segment.queue.prepare_write(n) {
            return Some(slot);
        }

        // Either the segment is full or the record can never fit in it.
        let new_capacity = BoundedSpscQueue::min_capacity_for(n).max(2 * segment.queue.capacity());
        if let Some(limit) = self.max_capacity {
            if new_capacity > limit {
                return None;
            }
        }

        let new_segment = Segment::allocate(new_capacity);
        let slot = unsafe { new_segment.as_ref() }.queue.prepare_write(n);
        debug_assert!(slot.is_some(), "fresh segment must host the record");
        // The release store on the link also publishes every record committed
        // to the old segment before it.
        segment.next.store(new_segment.as_ptr(), Ordering::Release);
        unsafe { *self.producer_segment.get() = new_segment };
        slot
    }

    /// Producer thread only.
    pub fn finish_write(&self, n: usize) {
        unsafe { (*self.producer_segment.get()).as_ref() }
            .queue
            .finish_write(n);
    }

    /// Expose the next complete record. On segment transition the drained
    /// segment is freed and the allocation is reported even when the new
    /// segment has nothing left to read.
    ///
    /// Consumer thread only.
    pub fn prepare_read(&self) -> ReadResult<'_> {
        let segment = unsafe { (*self.consumer_segment.get()).as_ref() };
        if let Some(bytes) = segment.queue.prepare_read() {
            return ReadResult {
                bytes: Some(bytes),
                allocation: None,
            };
        }

        let next = segment.next.load(Ordering::Acquire);
        let Some(next) = NonNull::new(next) else {
            return ReadResult {
                bytes: None,
                allocation: None,
            };
        };

        // The acquire above synchronizes with the link store, so a record
        // committed to this segment right before the link became visible is
        // observable now. Re-check before abandoning the segment.
        if let Some(bytes) = segment.queue.prepare_read() {
            return ReadResult {
                bytes: Some(bytes),
                allocation: None,
            };
        }

        // The producer stopped writing to this segment before linking its
        // successor, and it is now proven drained.
        let previous_capacity = segment.queue.capacity();
        let drained = unsafe { *self.consumer_segment.get() };
        unsafe {
            *self.consumer_segment.get() = next;
            drop(Box::from_raw(drained.as_ptr()));
        }

        let new_segment = unsafe { next.as_ref() };
        ReadResult {
            bytes: new_segment.queue.prepare_read(),
            allocation: Some(AllocationInfo {
                new_capacity: new_segment.queue.capacity(),
                previous_capacity,
            }),
        }
    }

    /// Consumer thread only.
    pub fn finish_read(&self, n: usize) {
        unsafe { (*self.consumer_segment.get()).as_ref() }
            .queue
            .finish_read(n);
    }

    /// Consumer thread only.
    pub fn commit_read(&self) {
        unsafe { (*self.consumer_segment.get()).as_ref() }
            .queue
            .commit_read();
    }

    /// True when no committed record remains anywhere in the chain. A linked
    /// successor always carries at least one record the consumer has not
    /// transitioned to yet.
    pub fn empty(&self) -> bool {
        let segment = unsafe { (*self.consumer_segment.get()).as_ref() };
        segment.queue.empty() && segment.next.load(Ordering::Acquire).is_null()
    }
}

impl Drop for UnboundedSpscQueue {
    fn drop(&mut self) {
        let mut current = unsafe { *self.consumer_segment.get() }.as_ptr();
        while !current.is_null() {
            let segment = unsafe { Box::from_raw(current) };
            current = segment.next.load(Ordering::Relaxed);
        }
    }
}
