//! End-to-end scenarios through the full path: frontend encode, SPSC queue,
//! backend decode, timestamp ordering, sink dispatch.

mod utils;

use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use swiftlog::frontend;
use swiftlog::levels::LogLevel;
use swiftlog::logger::{ClockSource, LoggerConfig};
use swiftlog::metadata::{EventKind, EventMetadata};
use swiftlog::options::{BackendOptions, FrontendOptions, QueueKind};
use swiftlog::runtime::LoggingRuntime;
use swiftlog::sink::MemorySink;
use swiftlog::time::{now_tsc, wall_clock_ns};
use swiftlog::Value;
use utils::{wait_until, NotifierCapture};

static MESSAGE: EventMetadata = EventMetadata::new(
    EventKind::Log,
    LogLevel::Info,
    "{}",
    module_path!(),
    file!(),
    line!(),
    false,
);

static BACKTRACE_MESSAGE: EventMetadata = EventMetadata::new(
    EventKind::Log,
    LogLevel::Backtrace,
    "{}",
    module_path!(),
    file!(),
    line!(),
    false,
);

static ERROR_MESSAGE: EventMetadata = EventMetadata::new(
    EventKind::Log,
    LogLevel::Error,
    "{}",
    module_path!(),
    file!(),
    line!(),
    false,
);

fn message_only_logger(
    runtime: &LoggingRuntime,
    sink: &Arc<MemorySink>,
) -> Arc<swiftlog::logger::Logger> {
    runtime.create_logger(
        LoggerConfig::new("root")
            .with_format_pattern("%(message)")
            .with_sink(Arc::clone(sink) as Arc<dyn swiftlog::sink::Sink>),
    )
}

fn options_with(capture: &NotifierCapture) -> BackendOptions {
    BackendOptions {
        error_notifier: capture.notifier(),
        ..BackendOptions::default()
    }
}

#[test]
fn test_single_producer_dispatches_in_commit_order() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, &sink);

    for timestamp in [10u64, 20, 30] {
        frontend::log_at(
            &runtime,
            &logger,
            &MESSAGE,
            timestamp,
            &[Value::from(timestamp)],
        );
    }

    runtime.start(options_with(&capture)).unwrap();
    frontend::flush(&runtime, &logger);

    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(
        records.iter().map(|r| r.timestamp_ns).collect::<Vec<_>>(),
        vec![10, 20, 30]
    );
    assert_eq!(records[0].rendered, "10");
    assert!(!capture.contains("Dropped"));
    runtime.stop();
}

#[test]
#[serial]
fn test_two_producers_interleave_by_timestamp() {
    let capture = NotifierCapture::new();
    let runtime = Arc::new(LoggingRuntime::new());
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, &sink);

    let producer_a = {
        let runtime = Arc::clone(&runtime);
        let logger = Arc::clone(&logger);
        std::thread::spawn(move || {
            for timestamp in [100u64, 150] {
                frontend::log_at(&runtime, &logger, &MESSAGE, timestamp, &[Value::from(timestamp)]);
            }
        })
    };
    let producer_b = {
        let runtime = Arc::clone(&runtime);
        let logger = Arc::clone(&logger);
        std::thread::spawn(move || {
            for timestamp in [50u64, 200] {
                frontend::log_at(&runtime, &logger, &MESSAGE, timestamp, &[Value::from(timestamp)]);
            }
        })
    };
    producer_a.join().unwrap();
    producer_b.join().unwrap();

    let options = BackendOptions {
        enable_strict_log_timestamp_order: true,
        ..options_with(&capture)
    };
    runtime.start(options).unwrap();
    frontend::flush(&runtime, &logger);

    assert_eq!(
        sink.records()
            .iter()
            .map(|r| r.timestamp_ns)
            .collect::<Vec<_>>(),
        vec![50, 100, 150, 200]
    );
    runtime.stop();
}

#[test]
#[serial]
fn test_bounded_dropping_queue_overflow() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::with_options(FrontendOptions {
        queue_kind: QueueKind::BoundedDropping,
        queue_capacity: 128,
        unbounded_max_capacity: None,
    });
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, &sink);

    // 58 byte records (62 framed): exactly two fit in the 128 byte queue
    let payload = "12345678901234567890";
    for _ in 0..4 {
        frontend::log(&runtime, &logger, &MESSAGE, &[Value::from(payload)]);
    }

    runtime.start(options_with(&capture)).unwrap();
    frontend::flush(&runtime, &logger);

    assert_eq!(sink.record_count(), 2);
    assert!(wait_until(Duration::from_secs(2), || {
        capture.contains("Dropped 2 log messages from thread")
    }));
    runtime.stop();
}

#[test]
fn test_flush_dispatches_pending_records_and_flushes_sinks() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, &sink);

    runtime.start(options_with(&capture)).unwrap();
    frontend::log(&runtime, &logger, &MESSAGE, &[Value::from("first")]);
    frontend::log(&runtime, &logger, &MESSAGE, &[Value::from("second")]);
    frontend::flush(&runtime, &logger);

    assert_eq!(sink.record_count(), 2);
    assert!(sink.flush_count() >= 1);
    runtime.stop();
}

#[test]
fn test_backtrace_flush_on_high_severity_record() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, &sink);
    logger.set_backtrace_flush_level(LogLevel::Error);

    runtime.start(options_with(&capture)).unwrap();
    frontend::init_backtrace(&runtime, &logger, 2);
    for name in ["R1", "R2", "R3"] {
        frontend::log(&runtime, &logger, &BACKTRACE_MESSAGE, &[Value::from(name)]);
    }
    frontend::log(&runtime, &logger, &ERROR_MESSAGE, &[Value::from("trigger")]);
    frontend::flush(&runtime, &logger);

    let rendered: Vec<String> = sink.records().iter().map(|r| r.rendered.clone()).collect();
    // the triggering record first, then the retained ring (R1 was evicted)
    assert_eq!(rendered, vec!["trigger", "R2", "R3"]);
    runtime.stop();
}

#[test]
fn test_explicit_backtrace_flush() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, &sink);

    runtime.start(options_with(&capture)).unwrap();
    frontend::init_backtrace(&runtime, &logger, 4);
    frontend::log(&runtime, &logger, &BACKTRACE_MESSAGE, &[Value::from("held")]);
    frontend::flush(&runtime, &logger);
    assert_eq!(sink.record_count(), 0);

    frontend::flush_backtrace(&runtime, &logger);
    frontend::flush(&runtime, &logger);
    let rendered: Vec<String> = sink.records().iter().map(|r| r.rendered.clone()).collect();
    assert_eq!(rendered, vec!["held"]);
    runtime.stop();
}

#[test]
#[serial]
fn test_tsc_clock_lazy_init_and_conversion() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = runtime.create_logger(
        LoggerConfig::new("tsc")
            .with_format_pattern("%(message)")
            .with_clock_source(ClockSource::Tsc)
            .with_sink(Arc::clone(&sink) as Arc<dyn swiftlog::sink::Sink>),
    );

    let options = BackendOptions {
        rdtsc_resync_interval: Duration::from_millis(50),
        ..options_with(&capture)
    };
    runtime.start(options).unwrap();

    // before the first TSC record the clock does not exist
    assert_eq!(runtime.time_since_epoch(now_tsc()), 0);

    frontend::log(&runtime, &logger, &MESSAGE, &[Value::from("tick")]);
    frontend::flush(&runtime, &logger);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let wall = wall_clock_ns();
    assert!(records[0].timestamp_ns.abs_diff(wall) < 5_000_000_000);

    // the lazily constructed clock is now shared with the runtime handle
    let converted = runtime.time_since_epoch(now_tsc());
    assert!(converted.abs_diff(wall_clock_ns()) < 5_000_000_000);

    assert!(converted > 0);

    // idle iterations keep resyncing past the interval
    std::thread::sleep(Duration::from_millis(200));
    assert!(runtime.time_since_epoch(now_tsc()).abs_diff(wall_clock_ns()) < 5_000_000_000);
    runtime.stop();
}

#[test]
fn test_stop_drains_committed_records() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, &sink);

    runtime.start(options_with(&capture)).unwrap();
    for index in 0..100u64 {
        frontend::log(&runtime, &logger, &MESSAGE, &[Value::from(index)]);
    }
    runtime.stop();

    assert_eq!(sink.record_count(), 100);
    assert!(!runtime.is_running());
}
