//! Bounded single-producer single-consumer byte queue
//!
//! One producer thread reserves contiguous slots, writes a complete encoded
//! record, and publishes it; the backend worker is the only consumer. The
//! presence of a single published byte implies a complete record.
//!
//! Records are length-prefixed inside the ring and never wrap around the end
//! of the storage: when a record does not fit in the tail, the producer
//! stamps a wrap marker and skips to the start. Both sides apply the same
//! skip rule, so the consumer always sees each record as one contiguous
//! window.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

const FRAME_HEADER_SIZE: usize = std::mem::size_of::<u32>();
const WRAP_MARKER: u32 = u32::MAX;

/// Keeps the producer and consumer index groups on separate cache lines.
#[repr(align(64))]
struct CacheAligned<T>(T);

/// State owned by the producer thread. Positions are absolute byte counts;
/// the ring index is `pos & mask`.
struct ProducerState {
    write_pos: UnsafeCell<u64>,
    cached_read_pos: UnsafeCell<u64>,
    /// (record start including frame header, payload length) of the slot
    /// handed out by the last `prepare_write`.
    pending: UnsafeCell<Option<(u64, usize)>>,
}

/// State owned by the consumer thread.
struct ConsumerState {
    read_pos: UnsafeCell<u64>,
    cached_write_pos: UnsafeCell<u64>,
    pending: UnsafeCell<Option<(u64, usize)>>,
}

pub struct BoundedSpscQueue {
    storage: Box<[UnsafeCell<u8>]>,
    mask: u64,
    producer: CacheAligned<ProducerState>,
    shared_write_pos: CacheAligned<AtomicU64>,
    consumer: CacheAligned<ConsumerState>,
    shared_read_pos: CacheAligned<AtomicU64>,
}

// One thread writes, one thread reads; the atomic positions carry the
// release/acquire edges between them.
unsafe impl Send for BoundedSpscQueue {}
unsafe impl Sync for BoundedSpscQueue {}

impl BoundedSpscQueue {
    /// `capacity` is a byte count and must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        assert!(capacity >= 4 * FRAME_HEADER_SIZE, "capacity too small");
        let storage: Vec<UnsafeCell<u8>> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            storage: storage.into_boxed_slice(),
            mask: capacity as u64 - 1,
            producer: CacheAligned(ProducerState {
                write_pos: UnsafeCell::new(0),
                cached_read_pos: UnsafeCell::new(0),
                pending: UnsafeCell::new(None),
            }),
            shared_write_pos: CacheAligned(AtomicU64::new(0)),
            consumer: CacheAligned(ConsumerState {
                read_pos: UnsafeCell::new(0),
                cached_write_pos: UnsafeCell::new(0),
                pending: UnsafeCell::new(None),
            }),
            shared_read_pos: CacheAligned(AtomicU64::new(0)),
        }
    }

    /// Smallest power-of-two capacity whose size limit admits a record of
    /// `n` payload bytes.
    pub fn min_capacity_for(n: usize) -> usize {
        (2 * (FRAME_HEADER_SIZE + n)).next_power_of_two()
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Largest payload this queue will ever accept. Bounding records to half
    /// the capacity guarantees that a record which fails now can still
    /// succeed once the consumer catches up, whatever the wrap padding.
    pub fn max_record_size(&self) -> usize {
        self.capacity() / 2 - FRAME_HEADER_SIZE
    }

    /// True when every published record has also been committed as read.
    pub fn empty(&self) -> bool {
        self.shared_read_pos.0.load(Ordering::Acquire)
            == self.shared_write_pos.0.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn slot_ptr(&self, pos: u64) -> *mut u8 {
        self.storage[(pos & self.mask) as usize].get()
    }

    #[inline(always)]
    unsafe fn write_frame_header(&self, pos: u64, value: u32) {
        let bytes = value.to_le_bytes();
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.slot_ptr(pos), FRAME_HEADER_SIZE);
    }

    #[inline(always)]
    unsafe fn read_frame_header(&self, pos: u64) -> u32 {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        std::ptr::copy_nonoverlapping(self.slot_ptr(pos), bytes.as_mut_ptr(), FRAME_HEADER_SIZE);
        u32::from_le_bytes(bytes)
    }

    /// Reserve a contiguous slot for one record of `n` payload bytes.
    /// Returns `None` when the queue cannot host the record; the caller's
    /// policy decides whether that drops, blocks, or grows.
    ///
    /// Producer thread only.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn prepare_write(&self, n: usize) -> Option<&mut [u8]> {
        if n > self.max_record_size() {
            return None;
        }
        let framed = (FRAME_HEADER_SIZE + n) as u64;
        let capacity = self.capacity() as u64;

        let write_pos = unsafe { *self.producer.0.write_pos.get() };
        let contiguous = capacity - (write_pos & self.mask);
        let skip = if contiguous < framed { contiguous } else { 0 };
        let needed = skip + framed;

        let mut read_pos = unsafe { *self.producer.0.cached_read_pos.get() };
        if write_pos + needed - read_pos > capacity {
            read_pos = self.shared_read_pos.0.load(Ordering::Acquire);
            unsafe { *self.producer.0.cached_read_pos.get() = read_pos };
            if write_pos + needed - read_pos > capacity {
                return None;
            }
        }

        let record_start = if skip > 0 {
            if contiguous >= FRAME_HEADER_SIZE as u64 {
                unsafe { self.write_frame_header(write_pos, WRAP_MARKER) };
            }
            // a tail shorter than the marker itself is skipped implicitly by
            // both sides
            write_pos + skip
        } else {
            write_pos
        };

        unsafe {
            self.write_frame_header(record_start, n as u32);
            *self.producer.0.pending.get() = Some((record_start, n));
            let payload = record_start + FRAME_HEADER_SIZE as u64;
            Some(std::slice::from_raw_parts_mut(self.slot_ptr(payload), n))
        }
    }

    /// Publish the record reserved by the last `prepare_write`. After this
    /// store the consumer may observe the full record.
    ///
    /// Producer thread only.
    #[inline(always)]
    pub fn finish_write(&self, n: usize) {
        let (record_start, reserved) = unsafe { (*self.producer.0.pending.get()).take() }
            .expect("finish_write without a matching prepare_write");
        debug_assert_eq!(n, reserved);
        let end = record_start + (FRAME_HEADER_SIZE + n) as u64;
        unsafe { *self.producer.0.write_pos.get() = end };
        self.shared_write_pos.0.store(end, Ordering::Release);
    }

    /// Expose the next complete record, if any. The returned window covers
    /// exactly one record. Calling `prepare_read` again without an
    /// intervening `finish_read` re-reads the same record, which is how the
    /// strict-ordering guard defers a record to the next round.
    ///
    /// Consumer thread only.
    #[inline(always)]
    pub fn prepare_read(&self) -> Option<&[u8]> {
        let capacity = self.capacity() as u64;
        let mut read_pos = unsafe { *self.consumer.0.read_pos.get() };

        let mut write_pos = unsafe { *self.consumer.0.cached_write_pos.get() };
        if read_pos == write_pos {
            write_pos = self.shared_write_pos.0.load(Ordering::Acquire);
            unsafe { *self.consumer.0.cached_write_pos.get() = write_pos };
            if read_pos == write_pos {
                return None;
            }
        }

        // Skip ring-tail padding. Padding is only ever published together
        // with the record that follows it, so data is guaranteed after the
        // skip.
        let contiguous = capacity - (read_pos & self.mask);
        if contiguous < FRAME_HEADER_SIZE as u64
            || unsafe { self.read_frame_header(read_pos) } == WRAP_MARKER
        {
            read_pos += contiguous;
            unsafe { *self.consumer.0.read_pos.get() = read_pos };
        }

        let len = unsafe { self.read_frame_header(read_pos) } as usize;
        debug_assert!(FRAME_HEADER_SIZE + len <= self.capacity() / 2);
        unsafe {
            *self.consumer.0.pending.get() = Some((read_pos, len));
            let payload = read_pos + FRAME_HEADER_SIZE as u64;
            Some(std::slice::from_raw_parts(
                self.slot_ptr(payload).cast_const(),
                len,
            ))
        }
    }

    /// Advance the local read position past the record handed out by
    /// `prepare_read`. `n` must cover the whole record. The producer does not
    /// see the space until `commit_read`.
    ///
    /// Consumer thread only.
    #[inline(always)]
    pub fn finish_read(&self, n: usize) {
        let (record_start, len) = unsafe { (*self.consumer.0.pending.get()).take() }
            .expect("finish_read without a matching prepare_read");
        debug_assert_eq!(n, len);
        unsafe {
            *self.consumer.0.read_pos.get() = record_start + (FRAME_HEADER_SIZE + len) as u64;
        }
    }

    /// Publish all reads performed since the last commit. Committing once
    /// per drain amortizes the cache-coherence cost over many records.
    ///
    /// Consumer thread only.
    #[inline(always)]
    pub fn commit_read(&self) {
        let read_pos = unsafe { *self.consumer.0.read_pos.get() };
        self.shared_read_pos.0.store(read_pos, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn write_record(queue: &BoundedSpscQueue, payload: &[u8]) -> bool {
        match queue.prepare_write(payload.len()) {
            Some(slot) => {
                slot.copy_from_slice(payload);
                queue.finish_write(payload.len());
                true
            }
            None => false,
        }
    }

    fn read_record(queue: &BoundedSpscQueue) -> Option<Vec<u8>> {
        let bytes = queue.prepare_read()?.to_vec();
        queue.finish_read(bytes.len());
        queue.commit_read();
        Some(bytes)
    }

    #[test]
    fn test_records_round_trip_in_order() {
        let queue = BoundedSpscQueue::new(256);
        assert!(write_record(&queue, b"first"));
        assert!(write_record(&queue, b"second record"));
        assert!(write_record(&queue, b"3"));

        assert_eq!(read_record(&queue).unwrap(), b"first");
        assert_eq!(read_record(&queue).unwrap(), b"second record");
        assert_eq!(read_record(&queue).unwrap(), b"3");
        assert!(read_record(&queue).is_none());
        assert!(queue.empty());
    }

    #[test]
    fn test_out_of_space_then_recovers() {
        let queue = BoundedSpscQueue::new(64);
        let payload = [7u8; 20];
        assert!(write_record(&queue, &payload));
        assert!(write_record(&queue, &payload));
        // 2 * (4 + 20) committed, a third does not fit in 64 bytes
        assert!(!write_record(&queue, &payload));

        assert_eq!(read_record(&queue).unwrap(), payload);
        assert!(write_record(&queue, &payload));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let queue = BoundedSpscQueue::new(64);
        assert_eq!(queue.max_record_size(), 28);
        assert!(queue.prepare_write(29).is_none());
        assert!(write_record(&queue, &[0u8; 28]));
    }

    #[test]
    fn test_wraparound_preserves_record_contents() {
        let queue = BoundedSpscQueue::new(128);
        // odd sizes force the write position through every tail alignment
        for round in 0..1000u32 {
            let len = (round % 23 + 1) as usize;
            let byte = (round % 251) as u8;
            let payload = vec![byte; len];
            assert!(write_record(&queue, &payload), "round {round}");
            assert_eq!(read_record(&queue).unwrap(), payload, "round {round}");
        }
        assert!(queue.empty());
    }

    #[test]
    fn test_uncommitted_reads_do_not_free_space() {
        let queue = BoundedSpscQueue::new(64);
        assert!(write_record(&queue, &[1u8; 24]));

        let bytes = queue.prepare_read().unwrap();
        let len = bytes.len();
        queue.finish_read(len);
        // not committed: the producer still sees a full queue
        assert!(queue.prepare_write(24).is_none());
        queue.commit_read();
        assert!(write_record(&queue, &[2u8; 24]));
    }

    #[test]
    fn test_deferred_record_is_reread() {
        let queue = BoundedSpscQueue::new(128);
        assert!(write_record(&queue, b"deferred"));

        // first observation without finish_read leaves the record in place
        assert_eq!(queue.prepare_read().unwrap(), b"deferred");
        assert_eq!(read_record(&queue).unwrap(), b"deferred");
    }

    #[test]
    fn test_cross_thread_stream() {
        let queue = Arc::new(BoundedSpscQueue::new(1024));
        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..10_000u32 {
                let payload = i.to_le_bytes();
                loop {
                    if let Some(slot) = producer_queue.prepare_write(payload.len()) {
                        slot.copy_from_slice(&payload);
                        producer_queue.finish_write(payload.len());
                        break;
                    }
                    std::hint::spin_loop();
                }
            }
        });

        let mut next = 0u32;
        while next < 10_000 {
            if let Some(bytes) = queue.prepare_read() {
                assert_eq!(bytes, next.to_le_bytes());
                queue.finish_read(bytes.len());
                queue.commit_read();
                next += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert!(queue.empty());
    }
}
