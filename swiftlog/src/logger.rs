//! Logger descriptors and their registry
//!
//! A logger bundles the formatting configuration and sink handles a record
//! dispatches through. Records reference their logger by a stable id carried
//! on the wire; removal is therefore deferred until no record referencing
//! the logger remains in any queue or transit buffer.

use crate::levels::LogLevel;
use crate::pattern::{PatternFormatter, Timezone};
use crate::sink::Sink;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// Wall-clock nanoseconds since the Unix epoch.
    System,
    /// Raw CPU cycle counts, converted by the backend at decode time.
    Tsc,
    /// Caller-supplied ticks, dispatched as-is.
    User,
}

pub const DEFAULT_FORMAT_PATTERN: &str =
    "%(time) [%(thread_id)] %(source_location) %(level) %(logger) %(message)";
pub const DEFAULT_TIME_PATTERN: &str = "%H:%M:%S%.3f";

pub struct LoggerConfig {
    pub name: String,
    pub format_pattern: String,
    pub time_pattern: String,
    pub timezone: Timezone,
    pub clock_source: ClockSource,
    pub sinks: Vec<Arc<dyn Sink>>,
}

impl LoggerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format_pattern: DEFAULT_FORMAT_PATTERN.to_owned(),
            time_pattern: DEFAULT_TIME_PATTERN.to_owned(),
            timezone: Timezone::Utc,
            clock_source: ClockSource::System,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_format_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.format_pattern = pattern.into();
        self
    }

    pub fn with_time_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.time_pattern = pattern.into();
        self
    }

    pub fn with_timezone(mut self, timezone: Timezone) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_clock_source(mut self, clock_source: ClockSource) -> Self {
        self.clock_source = clock_source;
        self
    }
}

pub struct Logger {
    id: u64,
    name: String,
    format_pattern: String,
    time_pattern: String,
    timezone: Timezone,
    clock_source: ClockSource,
    sinks: Vec<Arc<dyn Sink>>,
    backtrace_flush_level: AtomicU8,
    pattern_formatter: OnceLock<Arc<PatternFormatter>>,
    valid: AtomicBool,
}

impl Logger {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format_pattern(&self) -> &str {
        &self.format_pattern
    }

    pub fn time_pattern(&self) -> &str {
        &self.time_pattern
    }

    pub fn timezone(&self) -> Timezone {
        self.timezone
    }

    pub fn clock_source(&self) -> ClockSource {
        self.clock_source
    }

    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }

    /// Records at or above this severity flush the logger's backtrace after
    /// their own dispatch. Defaults to `None`, which never triggers.
    pub fn backtrace_flush_level(&self) -> LogLevel {
        LogLevel::from_u8(self.backtrace_flush_level.load(Ordering::Relaxed))
            .unwrap_or(LogLevel::None)
    }

    pub fn set_backtrace_flush_level(&self, level: LogLevel) {
        self.backtrace_flush_level
            .store(level as u8, Ordering::Relaxed);
    }

    /// The shared formatter, installed lazily by the backend on the first
    /// record this logger dispatches.
    pub fn pattern_formatter(&self) -> Option<&Arc<PatternFormatter>> {
        self.pattern_formatter.get()
    }

    pub(crate) fn install_pattern_formatter(&self, formatter: Arc<PatternFormatter>) {
        let _ = self.pattern_formatter.set(formatter);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct LoggerMap {
    by_id: HashMap<u64, Arc<Logger>>,
    next_id: u64,
}

/// Enumerates live loggers and reports invalidation. Mutation is
/// mutex-guarded; the backend copies what it needs under short lock holds.
#[derive(Default)]
pub struct LoggerRegistry {
    inner: Mutex<LoggerMap>,
}

impl LoggerRegistry {
    pub fn create(&self, config: LoggerConfig) -> Arc<Logger> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        let logger = Arc::new(Logger {
            id,
            name: config.name,
            format_pattern: config.format_pattern,
            time_pattern: config.time_pattern,
            timezone: config.timezone,
            clock_source: config.clock_source,
            sinks: config.sinks,
            backtrace_flush_level: AtomicU8::new(LogLevel::None as u8),
            pattern_formatter: OnceLock::new(),
            valid: AtomicBool::new(true),
        });
        inner.by_id.insert(id, Arc::clone(&logger));
        logger
    }

    pub fn get(&self, id: u64) -> Option<Arc<Logger>> {
        self.inner.lock().unwrap().by_id.get(&id).map(Arc::clone)
    }

    /// Mark a logger for removal. Actual deletion happens on the backend
    /// once nothing references the logger anymore.
    pub fn invalidate(&self, logger: &Arc<Logger>) {
        logger.invalidate();
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<Logger>)) {
        let inner = self.inner.lock().unwrap();
        for logger in inner.by_id.values() {
            f(logger);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().by_id.is_empty()
    }

    /// Remove invalidated loggers. `can_remove` is re-checked before every
    /// removal so a record still referencing the logger in some queue keeps
    /// it alive until the next cleanup. Returns the removed names.
    pub fn cleanup_invalidated(&self, mut can_remove: impl FnMut() -> bool) -> Vec<String> {
        let invalid: Vec<Arc<Logger>> = {
            let inner = self.inner.lock().unwrap();
            inner
                .by_id
                .values()
                .filter(|logger| !logger.is_valid())
                .map(Arc::clone)
                .collect()
        };

        let mut removed = Vec::new();
        for logger in invalid {
            if !can_remove() {
                break;
            }
            self.inner.lock().unwrap().by_id.remove(&logger.id());
            removed.push(logger.name().to_owned());
        }
        removed
    }
}
