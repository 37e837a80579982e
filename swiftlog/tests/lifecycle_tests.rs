//! Lifecycle and policy behavior: strict ordering, queue policies, option
//! validation, deferred cleanup of loggers and sinks.

mod utils;

use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use swiftlog::errors::Error;
use swiftlog::frontend;
use swiftlog::levels::LogLevel;
use swiftlog::logger::LoggerConfig;
use swiftlog::metadata::{EventKind, EventMetadata};
use swiftlog::options::{BackendOptions, FrontendOptions, QueueKind};
use swiftlog::runtime::LoggingRuntime;
use swiftlog::sink::{MemorySink, Sink};
use swiftlog::time::wall_clock_ns;
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

static NAMED_MESSAGE: EventMetadata = EventMetadata::new(
    EventKind::Log,
    LogLevel::Info,
    "user={user} id={id}",
    module_path!(),
    file!(),
    line!(),
    true,
);

static DYNAMIC_MESSAGE: EventMetadata = EventMetadata::new(
    EventKind::Log,
    LogLevel::Dynamic,
    "{}",
    module_path!(),
    file!(),
    line!(),
    false,
);

static TWO_ARGS_MESSAGE: EventMetadata = EventMetadata::new(
    EventKind::Log,
    LogLevel::Info,
    "a={} b={}",
    module_path!(),
    file!(),
    line!(),
    false,
);

fn message_only_logger(
    runtime: &LoggingRuntime,
    name: &str,
    sink: Arc<dyn Sink>,
) -> Arc<swiftlog::logger::Logger> {
    runtime.create_logger(
        LoggerConfig::new(name)
            .with_format_pattern("%(message)")
            .with_sink(sink),
    )
}

fn options_with(capture: &NotifierCapture) -> BackendOptions {
    BackendOptions {
        error_notifier: capture.notifier(),
        ..BackendOptions::default()
    }
}

#[test]
#[serial]
fn test_strict_order_defers_future_records() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    let options = BackendOptions {
        enable_strict_log_timestamp_order: true,
        ..options_with(&capture)
    };
    runtime.start(options).unwrap();

    // half a second in the future: the strict guard leaves it in the queue
    let future = wall_clock_ns() + 500_000_000;
    frontend::log_at(&runtime, &logger, &MESSAGE, future, &[Value::from("later")]);
    runtime.notify();

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(sink.record_count(), 0);

    assert!(wait_until(Duration::from_secs(2), || sink.record_count() == 1));
    runtime.stop();
}

#[test]
fn test_zero_transit_limits_are_clamped() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    let options = BackendOptions {
        transit_events_soft_limit: 0,
        transit_events_hard_limit: 0,
        ..options_with(&capture)
    };
    runtime.start(options).unwrap();

    for index in 0..10u64 {
        frontend::log(&runtime, &logger, &MESSAGE, &[Value::from(index)]);
    }
    frontend::flush(&runtime, &logger);
    assert_eq!(sink.record_count(), 10);
    runtime.stop();
}

#[test]
fn test_resync_interval_below_sleep_is_a_config_error() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();

    let options = BackendOptions {
        sleep_duration: Duration::from_millis(10),
        rdtsc_resync_interval: Duration::from_millis(1),
        ..options_with(&capture)
    };
    match runtime.start(options) {
        Err(Error::Config(_)) => {}
        other => panic!("expected a config error, got {other:?}"),
    }
    assert!(!runtime.is_running());
    assert!(capture.contains("rdtsc_resync_interval"));
}

#[test]
#[serial]
fn test_blocking_queue_counts_blocking_occurrences() {
    let capture = NotifierCapture::new();
    let runtime = Arc::new(LoggingRuntime::with_options(FrontendOptions {
        queue_kind: QueueKind::BoundedBlocking,
        queue_capacity: 128,
        unbounded_max_capacity: None,
    }));
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    let producer = {
        let runtime = Arc::clone(&runtime);
        let logger = Arc::clone(&logger);
        std::thread::spawn(move || {
            // two fit, the third blocks until the backend drains
            let payload = "12345678901234567890";
            for _ in 0..3 {
                frontend::log(&runtime, &logger, &MESSAGE, &[Value::from(payload)]);
            }
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    runtime.start(options_with(&capture)).unwrap();
    producer.join().unwrap();
    frontend::flush(&runtime, &logger);

    assert_eq!(sink.record_count(), 3);
    assert!(wait_until(Duration::from_secs(2), || {
        capture.contains("Experienced 1 blocking occurrences on thread")
    }));
    runtime.stop();
}

#[test]
fn test_unbounded_growth_reports_allocation() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::with_options(FrontendOptions {
        queue_kind: QueueKind::Unbounded,
        queue_capacity: 64,
        unbounded_max_capacity: None,
    });
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    runtime.start(options_with(&capture)).unwrap();
    for index in 0..20u64 {
        frontend::log(&runtime, &logger, &MESSAGE, &[Value::from(index)]);
    }
    frontend::flush(&runtime, &logger);

    assert_eq!(sink.record_count(), 20);
    assert!(capture.contains("A new SPSC queue has been allocated"));
    runtime.stop();
}

#[test]
fn test_named_args_are_captured_and_rendered() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    runtime.start(options_with(&capture)).unwrap();
    frontend::log(
        &runtime,
        &logger,
        &NAMED_MESSAGE,
        &[Value::from("alice"), Value::from(7u64)],
    );
    frontend::flush(&runtime, &logger);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rendered, "user=alice id=7");
    assert_eq!(
        records[0].named_args.as_deref(),
        Some(
            &[
                ("user".to_owned(), "alice".to_owned()),
                ("id".to_owned(), "7".to_owned())
            ][..]
        )
    );
    runtime.stop();
}

#[test]
fn test_dynamic_level_travels_with_the_record() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    runtime.start(options_with(&capture)).unwrap();
    frontend::log_dynamic(
        &runtime,
        &logger,
        &DYNAMIC_MESSAGE,
        LogLevel::Warning,
        &[Value::from("w")],
    );
    frontend::log_dynamic(
        &runtime,
        &logger,
        &DYNAMIC_MESSAGE,
        LogLevel::Critical,
        &[Value::from("c")],
    );
    frontend::flush(&runtime, &logger);

    let levels: Vec<LogLevel> = sink.records().iter().map(|r| r.level).collect();
    assert_eq!(levels, vec![LogLevel::Warning, LogLevel::Critical]);
    runtime.stop();
}

#[test]
fn test_sink_filter_skips_low_severity() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::with_min_level(LogLevel::Error));
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    runtime.start(options_with(&capture)).unwrap();
    frontend::log(&runtime, &logger, &MESSAGE, &[Value::from("info")]);
    frontend::flush(&runtime, &logger);

    assert_eq!(sink.record_count(), 0);
    assert!(sink.flush_count() >= 1);
    runtime.stop();
}

#[test]
fn test_format_failure_produces_diagnostic_and_continues() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let logger = message_only_logger(&runtime, "root", Arc::clone(&sink) as Arc<dyn Sink>);

    runtime.start(options_with(&capture)).unwrap();
    // only one argument for a two-argument template
    frontend::log(&runtime, &logger, &TWO_ARGS_MESSAGE, &[Value::from(1u64)]);
    frontend::log(&runtime, &logger, &MESSAGE, &[Value::from("after")]);
    frontend::flush(&runtime, &logger);

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert!(records[0]
        .rendered
        .starts_with("[Could not format log statement."));
    assert_eq!(records[1].rendered, "after");
    assert!(capture.contains("Could not format log statement"));
    runtime.stop();
}

#[test]
fn test_pattern_formatters_are_shared_per_triple() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();
    let sink = Arc::new(MemorySink::new());
    let first = message_only_logger(&runtime, "first", Arc::clone(&sink) as Arc<dyn Sink>);
    let second = message_only_logger(&runtime, "second", Arc::clone(&sink) as Arc<dyn Sink>);
    let distinct = runtime.create_logger(
        LoggerConfig::new("distinct")
            .with_format_pattern("%(level) %(message)")
            .with_sink(Arc::clone(&sink) as Arc<dyn Sink>),
    );

    runtime.start(options_with(&capture)).unwrap();
    for logger in [&first, &second, &distinct] {
        frontend::log(&runtime, logger, &MESSAGE, &[Value::from("x")]);
        frontend::flush(&runtime, logger);
    }

    let formatter_a = first.pattern_formatter().unwrap();
    let formatter_b = second.pattern_formatter().unwrap();
    let formatter_c = distinct.pattern_formatter().unwrap();
    assert!(Arc::ptr_eq(formatter_a, formatter_b));
    assert!(!Arc::ptr_eq(formatter_a, formatter_c));
    runtime.stop();
}

#[test]
#[serial]
fn test_logger_removal_is_deferred_and_compacts_sinks() {
    let capture = NotifierCapture::new();
    let runtime = LoggingRuntime::new();

    let kept_sink = runtime
        .sinks()
        .get_or_create("kept", || Arc::new(MemorySink::new()));
    let doomed_sink = runtime
        .sinks()
        .get_or_create("doomed", || Arc::new(MemorySink::new()));
    let kept = message_only_logger(&runtime, "kept", kept_sink);
    let doomed = message_only_logger(&runtime, "doomed", doomed_sink);

    runtime.start(options_with(&capture)).unwrap();
    frontend::log(&runtime, &kept, &MESSAGE, &[Value::from("a")]);
    frontend::log(&runtime, &doomed, &MESSAGE, &[Value::from("b")]);
    frontend::flush(&runtime, &kept);
    assert_eq!(runtime.logger_count(), 2);

    runtime.remove_logger(doomed);
    assert!(wait_until(Duration::from_secs(2), || {
        runtime.logger_count() == 1
    }));
    assert!(runtime.sinks().get("kept").is_some());
    assert!(runtime.sinks().get("doomed").is_none());
    runtime.stop();
}
