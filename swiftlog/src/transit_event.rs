//! Re-usable decoded-record slots and their per-thread FIFO buffer
//!
//! Slots are recycled in place: a popped event's storage (notably the
//! formatted-message buffer) is reused by a later record. Decode overwrites
//! or explicitly clears every field it cares about and never assumes a slot
//! still holds default values.

use crate::levels::LogLevel;
use crate::logger::Logger;
use crate::metadata::EventMetadata;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// A decoded record owned by its thread's [`TransitEventBuffer`], awaiting
/// dispatch by the backend.
pub struct TransitEvent {
    /// Always wall-clock nanoseconds after decode, whatever the producer's
    /// clock source.
    pub timestamp_ns: u64,
    pub thread_id: u32,
    pub thread_name: Arc<str>,
    pub metadata: Option<&'static EventMetadata>,
    pub logger: Option<Arc<Logger>>,
    pub formatted: String,
    pub named_args: Option<Vec<(String, String)>>,
    pub dynamic_level: LogLevel,
    /// Producer-owned completion flag of a flush record. Cleared after
    /// signalling: the slot is reused and a stale handle would signal the
    /// wrong producer later.
    pub flush_flag: Option<Arc<AtomicBool>>,
}

impl Default for TransitEvent {
    fn default() -> Self {
        Self {
            timestamp_ns: 0,
            thread_id: 0,
            thread_name: Arc::from(""),
            metadata: None,
            logger: None,
            formatted: String::new(),
            named_args: None,
            dynamic_level: LogLevel::None,
            flush_flag: None,
        }
    }
}

impl TransitEvent {
    /// The effective severity: the static level, or the per-record level for
    /// `Dynamic` call sites.
    pub fn log_level(&self) -> LogLevel {
        match self.metadata {
            Some(metadata) if metadata.level == LogLevel::Dynamic => self.dynamic_level,
            Some(metadata) => metadata.level,
            None => LogLevel::None,
        }
    }
}

/// Growable FIFO of recycled [`TransitEvent`] slots. Capacity doubles on
/// exhaustion; elements keep their identity (and their allocations) across
/// push/pop cycles.
pub struct TransitEventBuffer {
    slots: Vec<TransitEvent>,
    mask: usize,
    read: usize,
    write: usize,
}

impl TransitEventBuffer {
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(2).next_power_of_two();
        Self {
            slots: (0..capacity).map(|_| TransitEvent::default()).collect(),
            mask: capacity - 1,
            read: 0,
            write: 0,
        }
    }

    /// The next write slot, growing the buffer when full. The slot keeps
    /// whatever its previous occupant left behind.
    pub fn back(&mut self) -> &mut TransitEvent {
        if self.write - self.read == self.slots.len() {
            self.grow();
        }
        let index = self.write & self.mask;
        &mut self.slots[index]
    }

    /// Commit the slot returned by the last `back`.
    pub fn push_back(&mut self) {
        debug_assert!(self.write - self.read < self.slots.len());
        self.write += 1;
    }

    pub fn front(&self) -> Option<&TransitEvent> {
        (self.read != self.write).then(|| &self.slots[self.read & self.mask])
    }

    pub fn front_mut(&mut self) -> Option<&mut TransitEvent> {
        (self.read != self.write).then(|| &mut self.slots[self.read & self.mask])
    }

    pub fn pop_front(&mut self) {
        debug_assert!(self.read != self.write, "pop_front on an empty buffer");
        self.read += 1;
    }

    pub fn len(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn grow(&mut self) {
        let len = self.len();
        let mut slots: Vec<TransitEvent> = (0..self.slots.len() * 2)
            .map(|_| TransitEvent::default())
            .collect();
        for (index, slot) in slots.iter_mut().enumerate().take(len) {
            *slot = std::mem::take(&mut self.slots[(self.read + index) & self.mask]);
        }
        self.mask = slots.len() - 1;
        self.slots = slots;
        self.read = 0;
        self.write = len;
    }
}
