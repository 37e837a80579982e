//! swiftlog
//!
//! Asynchronous low-latency application logging. Producer threads encode
//! records onto per-thread single-producer/single-consumer byte queues with
//! minimal work on the hot path; one dedicated backend thread drains the
//! queues, decodes and orders records by timestamp, renders them and
//! delivers the result to sinks.
//!
//! # Examples
//! ```no_run
//! use std::sync::Arc;
//! use swiftlog::frontend;
//! use swiftlog::levels::LogLevel;
//! use swiftlog::logger::LoggerConfig;
//! use swiftlog::metadata::{EventKind, EventMetadata};
//! use swiftlog::options::BackendOptions;
//! use swiftlog::runtime::LoggingRuntime;
//! use swiftlog::sink::MemorySink;
//! use swiftlog::Value;
//!
//! static HELLO: EventMetadata = EventMetadata::new(
//!     EventKind::Log,
//!     LogLevel::Info,
//!     "hello {}",
//!     module_path!(),
//!     file!(),
//!     line!(),
//!     false,
//! );
//!
//! let runtime = LoggingRuntime::new();
//! runtime.start(BackendOptions::default()).unwrap();
//!
//! let sink = Arc::new(MemorySink::new());
//! let logger = runtime.create_logger(LoggerConfig::new("root").with_sink(sink.clone()));
//!
//! frontend::log(&runtime, &logger, &HELLO, &[Value::from("world")]);
//! frontend::flush(&runtime, &logger);
//! assert_eq!(sink.record_count(), 1);
//! runtime.stop();
//! ```

// crate-specific lint exceptions:
#![allow(unsafe_code, clippy::missing_errors_doc, clippy::inline_always)]

pub mod backend;
pub mod backtrace;
pub mod errors;
pub mod format;
pub mod frontend;
pub mod levels;
pub mod logger;
pub mod metadata;
pub mod options;
pub mod pattern;
pub mod runtime;
pub mod sink;
pub mod thread_context;
pub mod time;
pub mod transit_event;

pub use swiftlog_transit::Value;

pub mod prelude {
    pub use crate::errors::{Error, Result};
    pub use crate::frontend::{self, flush, flush_backtrace, init_backtrace, log, log_at, log_dynamic};
    pub use crate::levels::LogLevel;
    pub use crate::logger::{ClockSource, Logger, LoggerConfig};
    pub use crate::metadata::{EventKind, EventMetadata};
    pub use crate::options::{BackendOptions, FrontendOptions, QueueKind};
    pub use crate::pattern::Timezone;
    pub use crate::runtime::LoggingRuntime;
    pub use crate::sink::{MemorySink, RecordContext, Sink};
    pub use crate::Value;
}
