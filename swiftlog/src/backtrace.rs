//! Deferred per-logger record storage
//!
//! Backtrace-level records are moved here instead of being dispatched; a
//! later high-severity record (or an explicit flush request) drains the ring
//! to the sinks in FIFO order. Owned by the backend thread only.

use crate::transit_event::TransitEvent;
use std::collections::{HashMap, VecDeque};

struct BacktraceRing {
    capacity: usize,
    events: VecDeque<TransitEvent>,
}

#[derive(Default)]
pub struct BacktraceStorage {
    rings: HashMap<String, BacktraceRing>,
}

impl BacktraceStorage {
    /// Install (or resize) the ring for `logger_name`. Resizing drops the
    /// currently stored records; setting the same capacity keeps them.
    pub fn set_capacity(&mut self, logger_name: &str, capacity: usize) {
        match self.rings.get(logger_name) {
            Some(ring) if ring.capacity == capacity => {}
            _ => {
                self.rings.insert(
                    logger_name.to_owned(),
                    BacktraceRing {
                        capacity,
                        events: VecDeque::with_capacity(capacity),
                    },
                );
            }
        }
    }

    /// Append a record, evicting the oldest when full. Records for a logger
    /// whose ring was never initialised are discarded.
    pub fn store(&mut self, logger_name: &str, event: TransitEvent) {
        let Some(ring) = self.rings.get_mut(logger_name) else {
            return;
        };
        if ring.capacity == 0 {
            return;
        }
        if ring.events.len() == ring.capacity {
            ring.events.pop_front();
        }
        ring.events.push_back(event);
    }

    /// Drain the ring in FIFO order, handing each record to `writer`.
    /// A second call after a drain is a no-op.
    pub fn process(&mut self, logger_name: &str, mut writer: impl FnMut(&TransitEvent)) {
        if let Some(ring) = self.rings.get_mut(logger_name) {
            for event in ring.events.drain(..) {
                writer(&event);
            }
        }
    }

    pub fn erase(&mut self, logger_name: &str) {
        self.rings.remove(logger_name);
    }
}
