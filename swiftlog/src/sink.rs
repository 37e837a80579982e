//! The sink-handle abstraction the backend dispatches to
//!
//! Concrete sinks (file, console, network) live outside the core; the
//! backend only needs filtering, delivery, flushing and periodic
//! housekeeping. All sink operations run on the backend thread; failures are
//! routed to the error notifier and never stop the worker or the other
//! sinks.

use crate::levels::LogLevel;
use crate::metadata::EventMetadata;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Everything a sink (and the pattern formatter) can reference about one
/// record, minus the rendered text.
pub struct RecordContext<'a> {
    pub metadata: &'static EventMetadata,
    pub timestamp_ns: u64,
    pub thread_id: u32,
    pub thread_name: &'a str,
    pub process_id: &'a str,
    pub logger_name: &'a str,
    pub level: LogLevel,
}

pub trait Sink: Send + Sync {
    /// Record-level filtering; a false verdict skips `write_message` for
    /// this sink only.
    fn apply_filters(&self, _record: &RecordContext<'_>, _rendered: &str) -> bool {
        true
    }

    fn write_message(
        &self,
        record: &RecordContext<'_>,
        named_args: Option<&[(String, String)]>,
        rendered: &str,
    ) -> Result<()>;

    fn flush_sink(&self) -> Result<()>;

    /// Housekeeping run only on idle loops.
    fn run_periodic_tasks(&self) {}
}

/// Deduplicates sink handles by name so loggers can share them, and drops
/// handles nothing references anymore.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Mutex<HashMap<String, Arc<dyn Sink>>>,
}

impl SinkRegistry {
    pub fn get_or_create(
        &self,
        name: &str,
        factory: impl FnOnce() -> Arc<dyn Sink>,
    ) -> Arc<dyn Sink> {
        let mut sinks = self.sinks.lock().unwrap();
        Arc::clone(sinks.entry(name.to_owned()).or_insert_with(factory))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Sink>> {
        self.sinks.lock().unwrap().get(name).map(Arc::clone)
    }

    /// Drop every sink only the registry still references. Called by the
    /// backend after logger removal; expensive enough to be worth gating.
    pub fn cleanup_unused_sinks(&self) -> usize {
        let mut sinks = self.sinks.lock().unwrap();
        let before = sinks.len();
        sinks.retain(|_, sink| Arc::strong_count(sink) > 1);
        before - sinks.len()
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.lock().unwrap().is_empty()
    }
}

/// One dispatched record, as captured by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct CapturedRecord {
    pub timestamp_ns: u64,
    pub thread_id: u32,
    pub thread_name: String,
    pub logger_name: String,
    pub level: LogLevel,
    pub rendered: String,
    pub named_args: Option<Vec<(String, String)>>,
}

/// In-memory capturing sink for tests.
#[derive(Default)]
pub struct MemorySink {
    min_level: Option<LogLevel>,
    records: Mutex<Vec<CapturedRecord>>,
    flush_count: AtomicUsize,
    periodic_count: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter out records below `level` through `apply_filters`.
    pub fn with_min_level(level: LogLevel) -> Self {
        Self {
            min_level: Some(level),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count.load(Ordering::Relaxed)
    }

    pub fn periodic_count(&self) -> usize {
        self.periodic_count.load(Ordering::Relaxed)
    }
}

impl Sink for MemorySink {
    fn apply_filters(&self, record: &RecordContext<'_>, _rendered: &str) -> bool {
        self.min_level.map_or(true, |level| record.level >= level)
    }

    fn write_message(
        &self,
        record: &RecordContext<'_>,
        named_args: Option<&[(String, String)]>,
        rendered: &str,
    ) -> Result<()> {
        self.records.lock().unwrap().push(CapturedRecord {
            timestamp_ns: record.timestamp_ns,
            thread_id: record.thread_id,
            thread_name: record.thread_name.to_owned(),
            logger_name: record.logger_name.to_owned(),
            level: record.level,
            rendered: rendered.to_owned(),
            named_args: named_args.map(<[(String, String)]>::to_vec),
        });
        Ok(())
    }

    fn flush_sink(&self) -> Result<()> {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn run_periodic_tasks(&self) {
        self.periodic_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EventKind, EventMetadata};

    static METADATA: EventMetadata = EventMetadata::new(
        EventKind::Log,
        LogLevel::Info,
        "m",
        module_path!(),
        file!(),
        line!(),
        false,
    );

    fn record(level: LogLevel) -> RecordContext<'static> {
        RecordContext {
            metadata: &METADATA,
            timestamp_ns: 1,
            thread_id: 2,
            thread_name: "t",
            process_id: "3",
            logger_name: "root",
            level,
        }
    }

    #[test]
    fn test_registry_deduplicates_by_name() {
        let registry = SinkRegistry::default();
        let first = registry.get_or_create("a", || Arc::new(MemorySink::new()));
        let second = registry.get_or_create("a", || Arc::new(MemorySink::new()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cleanup_drops_only_unreferenced_sinks() {
        let registry = SinkRegistry::default();
        let kept = registry.get_or_create("kept", || Arc::new(MemorySink::new()));
        registry.get_or_create("dropped", || Arc::new(MemorySink::new()));
        assert_eq!(registry.cleanup_unused_sinks(), 1);
        assert!(registry.get("kept").is_some());
        assert!(registry.get("dropped").is_none());
        drop(kept);
    }

    #[test]
    fn test_memory_sink_level_filter() {
        let sink = MemorySink::with_min_level(LogLevel::Warning);
        assert!(!sink.apply_filters(&record(LogLevel::Info), ""));
        assert!(sink.apply_filters(&record(LogLevel::Error), ""));
    }
}
