//! Frontend ingestion: encoding records onto the calling thread's queue
//!
//! The hot path computes the record size, reserves a contiguous slot in the
//! thread's SPSC queue, writes the fixed header and payload, and commits.
//! Producers never observe errors here; bounded-queue failures feed the
//! per-context counters the backend reports periodically.

use crate::levels::LogLevel;
use crate::logger::{ClockSource, Logger};
use crate::metadata::{EventKind, EventMetadata};
use crate::runtime::LoggingRuntime;
use crate::thread_context::{FrontendQueue, QueuePolicy, ThreadContext};
use crate::time::{now_tsc, wall_clock_ns};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swiftlog_transit::{encode_args, encoded_args_size, ArgStore, ReadCursor, Value, WriteCursor};

/// Decodes a record payload into the backend's argument store. The function
/// pointer travels inside the record, so each call site can ship its own
/// decoder; the frontend installs [`swiftlog_transit::decode_args`].
pub type DecoderFn = fn(&mut ReadCursor<'_>, &mut ArgStore) -> anyhow::Result<()>;

static FLUSH_METADATA: EventMetadata = EventMetadata::new(
    EventKind::Flush,
    LogLevel::None,
    "",
    "swiftlog",
    file!(),
    line!(),
    false,
);

static INIT_BACKTRACE_METADATA: EventMetadata = EventMetadata::new(
    EventKind::InitBacktrace,
    LogLevel::None,
    "{}",
    "swiftlog",
    file!(),
    line!(),
    false,
);

static FLUSH_BACKTRACE_METADATA: EventMetadata = EventMetadata::new(
    EventKind::FlushBacktrace,
    LogLevel::None,
    "",
    "swiftlog",
    file!(),
    line!(),
    false,
);

const FIXED_HEADER_SIZE: usize =
    std::mem::size_of::<u64>() + 2 * std::mem::size_of::<usize>() + std::mem::size_of::<u64>();

fn timestamp_now(logger: &Logger) -> u64 {
    match logger.clock_source() {
        ClockSource::System | ClockSource::User => wall_clock_ns(),
        ClockSource::Tsc => now_tsc(),
    }
}

/// Commit one record stamped with the logger's clock source.
pub fn log(
    runtime: &LoggingRuntime,
    logger: &Arc<Logger>,
    metadata: &'static EventMetadata,
    args: &[Value],
) {
    enqueue(
        runtime,
        logger,
        metadata,
        timestamp_now(logger),
        args,
        None,
        None,
    );
}

/// Commit one record with an explicit timestamp (nanoseconds for system
/// clocks, raw ticks for TSC and user clocks).
pub fn log_at(
    runtime: &LoggingRuntime,
    logger: &Arc<Logger>,
    metadata: &'static EventMetadata,
    timestamp: u64,
    args: &[Value],
) {
    enqueue(runtime, logger, metadata, timestamp, args, None, None);
}

/// Commit one record whose severity is chosen at the call, for `Dynamic`
/// call sites.
pub fn log_dynamic(
    runtime: &LoggingRuntime,
    logger: &Arc<Logger>,
    metadata: &'static EventMetadata,
    level: LogLevel,
    args: &[Value],
) {
    debug_assert_eq!(metadata.level, LogLevel::Dynamic);
    enqueue(
        runtime,
        logger,
        metadata,
        timestamp_now(logger),
        args,
        Some(level),
        None,
    );
}

/// Blocking flush: returns once the backend has dispatched every record this
/// thread committed before the call and flushed the sinks. A no-op when the
/// backend is not running.
pub fn flush(runtime: &LoggingRuntime, logger: &Arc<Logger>) {
    if !runtime.is_running() {
        return;
    }
    let done = Arc::new(AtomicBool::new(false));
    // the flush record must land even on a momentarily full dropping queue
    while !enqueue(
        runtime,
        logger,
        &FLUSH_METADATA,
        timestamp_now(logger),
        &[],
        None,
        Some(Arc::clone(&done)),
    ) {
        if !runtime.is_running() {
            return;
        }
        runtime.notify();
        std::thread::sleep(Duration::from_micros(100));
    }
    runtime.notify();
    while !done.load(Ordering::Acquire) {
        if !runtime.is_running() {
            return;
        }
        std::thread::sleep(Duration::from_micros(100));
    }
}

/// Install (or resize) the logger's backtrace ring. Ordered with the log
/// records around it because it travels through the same queue.
pub fn init_backtrace(runtime: &LoggingRuntime, logger: &Arc<Logger>, capacity: usize) {
    let args = [Value::from(capacity as u64)];
    enqueue(
        runtime,
        logger,
        &INIT_BACKTRACE_METADATA,
        timestamp_now(logger),
        &args,
        None,
        None,
    );
}

/// Drain the logger's stored backtrace records to its sinks.
pub fn flush_backtrace(runtime: &LoggingRuntime, logger: &Arc<Logger>) {
    enqueue(
        runtime,
        logger,
        &FLUSH_BACKTRACE_METADATA,
        timestamp_now(logger),
        &[],
        None,
        None,
    );
}

fn enqueue(
    runtime: &LoggingRuntime,
    logger: &Arc<Logger>,
    metadata: &'static EventMetadata,
    timestamp: u64,
    args: &[Value],
    dynamic_level: Option<LogLevel>,
    flush_flag: Option<Arc<AtomicBool>>,
) -> bool {
    let mut record_size = FIXED_HEADER_SIZE;
    if metadata.kind == EventKind::Flush {
        record_size += std::mem::size_of::<usize>();
    } else {
        record_size += encoded_args_size(args);
        if dynamic_level.is_some() {
            record_size += 1;
        }
    }

    runtime.with_thread_context(|context| {
        write_record(context, record_size, |cursor| {
            cursor.write_pod(&timestamp);
            cursor.write_pod(&metadata.as_wire_id());
            cursor.write_pod(&logger.id());
            let decoder: DecoderFn = swiftlog_transit::decode_args;
            cursor.write_pod(&(decoder as usize));
            if metadata.kind == EventKind::Flush {
                // ownership of one reference moves into the queue; the
                // backend reconstitutes it at decode time
                let flag = flush_flag.expect("flush records carry a completion flag");
                cursor.write_pod(&(Arc::into_raw(flag) as usize));
            } else {
                encode_args(cursor, args);
                if let Some(level) = dynamic_level {
                    cursor.write_pod(&(level as u8));
                }
            }
        })
    })
}

/// Reserve, fill and commit one record under the context's full-queue
/// policy. Returns false when the record was dropped.
fn write_record(
    context: &ThreadContext,
    record_size: usize,
    fill: impl FnOnce(&mut WriteCursor<'_>),
) -> bool {
    fn fill_slot(slot: &mut [u8], record_size: usize, fill: impl FnOnce(&mut WriteCursor<'_>)) {
        let mut cursor = WriteCursor::new(slot);
        fill(&mut cursor);
        debug_assert_eq!(cursor.written(), record_size);
    }

    match context.queue() {
        FrontendQueue::Bounded {
            queue,
            policy: QueuePolicy::Drop,
        } => match queue.prepare_write(record_size) {
            Some(slot) => {
                fill_slot(slot, record_size, fill);
                queue.finish_write(record_size);
                true
            }
            None => {
                context.bump_failure_counter();
                false
            }
        },
        FrontendQueue::Bounded {
            queue,
            policy: QueuePolicy::Block,
        } => {
            if record_size > queue.max_record_size() {
                // can never fit; blocking would spin forever
                context.bump_failure_counter();
                return false;
            }
            let mut blocked = false;
            let slot = loop {
                if let Some(slot) = queue.prepare_write(record_size) {
                    break slot;
                }
                if !blocked {
                    blocked = true;
                    context.bump_failure_counter();
                }
                std::hint::spin_loop();
            };
            fill_slot(slot, record_size, fill);
            queue.finish_write(record_size);
            true
        }
        FrontendQueue::Unbounded(queue) => match queue.prepare_write(record_size) {
            Some(slot) => {
                fill_slot(slot, record_size, fill);
                queue.finish_write(record_size);
                true
            }
            None => {
                // growth refused by the max-capacity limit
                context.bump_failure_counter();
                false
            }
        },
    }
}
