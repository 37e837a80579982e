//! The backend worker: ingest, order, format, dispatch
//!
//! One dedicated thread drains every producer's SPSC queue into per-thread
//! transit-event buffers, picks the event with the minimum timestamp across
//! all buffers, renders it and hands it to the logger's sinks. Idle loops
//! flush sinks, report producer failures, resync the TSC correlation and
//! collect invalidated contexts and loggers. The worker never terminates on
//! a recoverable error; everything is reported through the error notifier
//! and the loop continues.

use crate::backtrace::BacktraceStorage;
use crate::errors::{Error, Result};
use crate::format::{parse_named_template, vformat};
use crate::frontend::DecoderFn;
use crate::levels::LogLevel;
use crate::logger::{ClockSource, Logger};
use crate::metadata::{EventKind, EventMetadata};
use crate::options::{BackendOptions, ErrorNotifier};
use crate::pattern::PatternFormatter;
use crate::runtime::RuntimeInner;
use crate::sink::{RecordContext, Sink};
use crate::thread_context::{FailureKind, FrontendQueue, ThreadContext};
use crate::time::{wall_clock_ns, RdtscClock};
use crate::transit_event::{TransitEvent, TransitEventBuffer};
use chrono::Local;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};
use swiftlog_transit::{AllocationInfo, ArgStore, ReadCursor};

/// Coalesced wake-up channel between producers and the sleeping worker.
pub(crate) struct WakeUp {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl WakeUp {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        {
            let mut flag = self.flag.lock().unwrap();
            *flag = true;
        }
        self.cv.notify_one();
    }
}

/// Backend state shared with the runtime handle (and through it, with any
/// thread).
pub(crate) struct BackendShared {
    pub(crate) is_running: AtomicBool,
    pub(crate) worker_thread_id: AtomicU32,
    pub(crate) wake_up: WakeUp,
    /// Published by the worker on lazy construction so `time_since_epoch`
    /// works from any thread.
    pub(crate) rdtsc_clock: Mutex<Option<Arc<RdtscClock>>>,
}

impl BackendShared {
    pub(crate) fn new() -> Self {
        Self {
            is_running: AtomicBool::new(false),
            worker_thread_id: AtomicU32::new(0),
            wake_up: WakeUp::new(),
            rdtsc_clock: Mutex::new(None),
        }
    }
}

/// Spawn the worker thread and wait for its setup to finish, so wake-ups
/// sent right after `start` are never lost.
pub(crate) fn start(runtime: &Arc<RuntimeInner>, mut options: BackendOptions) -> Result<()> {
    if runtime.backend.is_running.load(Ordering::SeqCst) {
        return Err(Error::Config("backend worker already running".to_owned()));
    }

    // zero limits cannot make progress; clamp silently
    options.transit_events_soft_limit = options.transit_events_soft_limit.max(1);
    options.transit_events_hard_limit = options.transit_events_hard_limit.max(1);
    if options.rdtsc_resync_interval < options.sleep_duration {
        let error = Error::Config(
            "rdtsc_resync_interval must be at least sleep_duration".to_owned(),
        );
        (options.error_notifier)(&error.to_string());
        return Err(error);
    }

    let worker_runtime = Arc::clone(runtime);
    let worker_options = options.clone();
    let handle = std::thread::Builder::new()
        .name(options.thread_name.clone())
        .spawn(move || worker_entry(worker_runtime, worker_options))
        .map_err(|error| Error::Spawn(error.to_string()))?;
    *runtime.worker_join.lock().unwrap() = Some(handle);

    while !runtime.backend.is_running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_micros(100));
    }
    Ok(())
}

fn worker_entry(runtime: Arc<RuntimeInner>, options: BackendOptions) {
    if let Some(cpu) = options.backend_cpu_affinity {
        if let Err(error) = set_cpu_affinity(cpu) {
            // best effort; never fatal
            (options.error_notifier)(&format!("could not set backend cpu affinity: {error}"));
        }
    }
    runtime
        .backend
        .worker_thread_id
        .store(thread_id::get() as u32, Ordering::Relaxed);
    runtime.thread_contexts.mark_new_context();
    runtime.backend.is_running.store(true, Ordering::SeqCst);

    BackendWorker::new(runtime, options).run();
}

#[cfg(target_os = "linux")]
fn set_cpu_affinity(cpu: usize) -> anyhow::Result<()> {
    let mut cpu_set = nix::sched::CpuSet::new();
    cpu_set.set(cpu)?;
    nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &cpu_set)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(_cpu: usize) -> anyhow::Result<()> {
    anyhow::bail!("cpu affinity is not supported on this platform")
}

enum DecodeOutcome {
    Committed,
    /// Strict-order guard: the record's timestamp has not passed yet; leave
    /// it in the queue for the next round.
    Deferred,
}

struct BackendWorker {
    runtime: Arc<RuntimeInner>,
    options: BackendOptions,
    process_id: String,
    active_contexts: Vec<Arc<ThreadContext>>,
    pattern_formatters: Vec<Weak<PatternFormatter>>,
    active_sinks: Vec<Weak<dyn Sink>>,
    backtrace_storage: BacktraceStorage,
    /// Parsed named-argument templates, keyed by template string.
    named_args_templates: HashMap<String, (String, Vec<String>)>,
    /// Reused across records to avoid steady-state allocation.
    arg_store: ArgStore,
    render_buffer: String,
    rdtsc_clock: Option<Arc<RdtscClock>>,
    last_rdtsc_resync: Instant,
}

impl BackendWorker {
    fn new(runtime: Arc<RuntimeInner>, options: BackendOptions) -> Self {
        Self {
            runtime,
            options,
            process_id: std::process::id().to_string(),
            active_contexts: Vec::new(),
            pattern_formatters: Vec::new(),
            active_sinks: Vec::new(),
            backtrace_storage: BacktraceStorage::default(),
            named_args_templates: HashMap::new(),
            arg_store: ArgStore::default(),
            render_buffer: String::new(),
            rdtsc_clock: None,
            last_rdtsc_resync: Instant::now(),
        }
    }

    fn run(mut self) {
        while self.runtime.backend.is_running.load(Ordering::Relaxed) {
            self.main_loop();
        }
        self.exit();
        *self.runtime.backend.rdtsc_clock.lock().unwrap() = None;
    }

    fn main_loop(&mut self) {
        self.refresh_active_contexts();

        let cached = self.drain_frontend_queues();
        if cached > 0 {
            if cached < self.options.transit_events_soft_limit {
                // one event, then give the frontend queues another turn
                self.process_next_event();
            } else {
                while self.process_next_event() {}
            }
        } else {
            self.flush_active_sinks(true);
            self.report_failure_counters();
            self.resync_rdtsc_if_due();

            if self.queues_and_buffers_empty() {
                self.cleanup_invalidated_contexts();
                self.cleanup_invalidated_loggers();

                if !self.options.sleep_duration.is_zero() {
                    self.sleep_until_notified();
                    self.resync_rdtsc_if_due();
                } else if self.options.enable_yield_when_idle {
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Drain-to-completion path after `stop()`.
    fn exit(&mut self) {
        self.refresh_active_contexts();
        loop {
            let cached = self.drain_frontend_queues();
            if cached > 0 {
                if cached < self.options.transit_events_soft_limit {
                    self.process_next_event();
                } else {
                    while self.process_next_event() {}
                }
            } else {
                let drained = !self.options.wait_for_queues_to_empty_before_exit
                    || self.queues_and_buffers_empty();
                if drained {
                    self.report_failure_counters();
                    // final flush, without periodic tasks
                    self.flush_active_sinks(false);
                    break;
                }
            }
        }
        self.rdtsc_clock = None;
    }

    fn sleep_until_notified(&self) {
        let wake_up = &self.runtime.backend.wake_up;
        let guard = wake_up.flag.lock().unwrap();
        let (mut woken, _) = wake_up
            .cv
            .wait_timeout_while(guard, self.options.sleep_duration, |woken| !*woken)
            .unwrap();
        *woken = false;
    }

    /// Cheap unless the registry reports a new context.
    fn refresh_active_contexts(&mut self) {
        if !self.runtime.thread_contexts.take_new_context_flag() {
            return;
        }
        self.active_contexts.clear();
        let initial_capacity = self.options.transit_event_buffer_initial_capacity;
        let active_contexts = &mut self.active_contexts;
        self.runtime.thread_contexts.for_each(|context| {
            {
                let mut buffer = context.transit_buffer();
                if buffer.is_none() {
                    *buffer = Some(TransitEventBuffer::new(initial_capacity));
                }
            }
            // invalidated-but-nonempty contexts stay cached until cleanup
            active_contexts.push(Arc::clone(context));
        });
    }

    /// Phase 1: read every frontend queue into transit events. Returns the
    /// total number of cached events across all buffers.
    fn drain_frontend_queues(&mut self) -> usize {
        let ts_now_us = if self.options.enable_strict_log_timestamp_order {
            wall_clock_ns() / 1_000
        } else {
            0
        };

        let mut cached = 0;
        for index in 0..self.active_contexts.len() {
            let context = Arc::clone(&self.active_contexts[index]);
            cached += self.drain_one_queue(&context, ts_now_us);
        }
        cached
    }

    /// Reads at most one full queue capacity per round so a hot producer
    /// cannot starve the others, bounded also by the transit-event hard
    /// limit. Returns the context's cached-event count.
    fn drain_one_queue(&mut self, context: &Arc<ThreadContext>, ts_now_us: u64) -> usize {
        let mut buffer_guard = context.transit_buffer();
        let Some(buffer) = buffer_guard.as_mut() else {
            return 0;
        };

        let queue_capacity = context.queue().capacity();
        let mut total_bytes = 0usize;

        while total_bytes < queue_capacity
            && buffer.len() < self.options.transit_events_hard_limit
        {
            let (bytes, allocation) = match context.queue() {
                FrontendQueue::Bounded { queue, .. } => (queue.prepare_read(), None),
                FrontendQueue::Unbounded(queue) => {
                    let result = queue.prepare_read();
                    (result.bytes, result.allocation)
                }
            };
            if let Some(info) = allocation {
                self.report_queue_allocation(context, info);
            }
            let Some(bytes) = bytes else { break };
            let record_len = bytes.len();

            let event = buffer.back();
            event.thread_id = context.thread_id();
            event.thread_name = Arc::clone(context.thread_name());

            match self.decode_record(event, bytes, ts_now_us) {
                Ok(DecodeOutcome::Committed) => {
                    buffer.push_back();
                    context.queue().finish_read(record_len);
                    total_bytes += record_len;
                }
                Ok(DecodeOutcome::Deferred) => break,
                Err(error) => {
                    // the framing knows the record boundary, so a record the
                    // decoder rejects is skipped, not wedged
                    (self.options.error_notifier)(&format!("could not decode record: {error:#}"));
                    context.queue().finish_read(record_len);
                    total_bytes += record_len;
                }
            }
        }

        if total_bytes > 0 {
            // one commit per drain amortizes the shared-index update
            context.queue().commit_read();
        }
        buffer.len()
    }

    fn decode_record(
        &mut self,
        event: &mut TransitEvent,
        bytes: &[u8],
        ts_now_us: u64,
    ) -> anyhow::Result<DecodeOutcome> {
        let mut cursor = ReadCursor::new(bytes);
        let raw_timestamp: u64 = cursor.read_pod()?;
        let metadata_id: usize = cursor.read_pod()?;
        let logger_id: u64 = cursor.read_pod()?;
        let decoder_id: usize = cursor.read_pod()?;

        let metadata = unsafe { EventMetadata::from_wire_id(metadata_id) };
        let logger = self
            .runtime
            .loggers
            .get(logger_id)
            .ok_or_else(|| anyhow::anyhow!("record references unknown logger {logger_id}"))?;
        let decoder: DecoderFn = unsafe { std::mem::transmute::<usize, DecoderFn>(decoder_id) };

        if logger.pattern_formatter().is_none() {
            self.install_pattern_formatter(&logger);
        }

        // transit events always hold wall-clock nanoseconds, so loggers with
        // different clock sources still order correctly
        event.timestamp_ns = raw_timestamp;
        match logger.clock_source() {
            ClockSource::Tsc => {
                if self.rdtsc_clock.is_none() {
                    // lazy: calibration costs a sampling window, paid only
                    // once a TSC-sourced record shows up
                    let clock = Arc::new(RdtscClock::new());
                    *self.runtime.backend.rdtsc_clock.lock().unwrap() = Some(Arc::clone(&clock));
                    self.rdtsc_clock = Some(clock);
                    self.last_rdtsc_resync = Instant::now();
                }
                if let Some(clock) = &self.rdtsc_clock {
                    event.timestamp_ns = clock.time_since_epoch(raw_timestamp);
                }
                if ts_now_us != 0 && event.timestamp_ns / 1_000 >= ts_now_us {
                    return Ok(DecodeOutcome::Deferred);
                }
            }
            ClockSource::System => {
                if ts_now_us != 0 && event.timestamp_ns / 1_000 >= ts_now_us {
                    return Ok(DecodeOutcome::Deferred);
                }
            }
            // user-supplied ticks cannot be compared against our clock
            ClockSource::User => {}
        }

        event.metadata = Some(metadata);
        event.logger = Some(Arc::clone(&logger));

        if metadata.kind == EventKind::Flush {
            let flag_id: usize = cursor.read_pod()?;
            event.flush_flag = Some(unsafe { Arc::from_raw(flag_id as *const AtomicBool) });
            event.formatted.clear();
            event.named_args = None;
            event.dynamic_level = LogLevel::None;
            return Ok(DecodeOutcome::Committed);
        }

        // the slot is recycled; a stale flush flag must never survive into a
        // non-flush record
        event.flush_flag = None;

        if !metadata.has_named_args {
            decoder(&mut cursor, &mut self.arg_store)?;
            event.named_args = None;
            event.formatted.clear();
            if let Err(error) = vformat(&mut event.formatted, metadata.format, self.arg_store.values())
            {
                self.replace_with_format_diagnostic(event, metadata, &error);
            }
        } else {
            if !self.named_args_templates.contains_key(metadata.format) {
                self.named_args_templates.insert(
                    metadata.format.to_owned(),
                    parse_named_template(metadata.format),
                );
            }
            decoder(&mut cursor, &mut self.arg_store)?;

            let (stripped, keys) = &self.named_args_templates[metadata.format];
            let named_args = event.named_args.get_or_insert_with(Vec::new);
            named_args.clear();
            for (index, key) in keys.iter().enumerate() {
                let value = self
                    .arg_store
                    .values()
                    .get(index)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                named_args.push((key.clone(), value));
            }

            event.formatted.clear();
            if let Err(error) = vformat(&mut event.formatted, stripped, self.arg_store.values()) {
                self.replace_with_format_diagnostic(event, metadata, &error);
            }
        }

        if metadata.level == LogLevel::Dynamic {
            let level: u8 = cursor.read_pod()?;
            event.dynamic_level = LogLevel::from_u8(level)
                .ok_or_else(|| anyhow::anyhow!("invalid dynamic log level {level}"))?;
        } else {
            // recycled slot: without this a stale dynamic level could leak
            // into a later record
            event.dynamic_level = LogLevel::None;
        }

        Ok(DecodeOutcome::Committed)
    }

    fn replace_with_format_diagnostic(
        &self,
        event: &mut TransitEvent,
        metadata: &EventMetadata,
        error: &Error,
    ) {
        let detail = match error {
            Error::Format(detail) => detail.clone(),
            other => other.to_string(),
        };
        let diagnostic = format!(
            "[Could not format log statement. message: \"{}\", location: \"{}\", error: \"{}\"]",
            metadata.format,
            metadata.short_source_location(),
            detail
        );
        event.formatted.clear();
        event.formatted.push_str(&diagnostic);
        (self.options.error_notifier)(&diagnostic);
    }

    /// O(N) scan for the minimum front timestamp across all transit
    /// buffers; dispatches that event. Returns false when every buffer is
    /// empty.
    fn process_next_event(&mut self) -> bool {
        let mut min_timestamp = u64::MAX;
        let mut chosen: Option<Arc<ThreadContext>> = None;
        for context in &self.active_contexts {
            let buffer_guard = context.transit_buffer();
            if let Some(front) = buffer_guard.as_ref().and_then(TransitEventBuffer::front) {
                if front.timestamp_ns < min_timestamp {
                    min_timestamp = front.timestamp_ns;
                    chosen = Some(Arc::clone(context));
                }
            }
        }
        let Some(context) = chosen else {
            return false;
        };

        let mut buffer_guard = context.transit_buffer();
        let Some(buffer) = buffer_guard.as_mut() else {
            return false;
        };
        self.dispatch_front_event(buffer);
        if let Some(event) = buffer.front_mut() {
            // release the descriptor references before the slot is recycled;
            // a stale Arc would keep a removed logger alive past the sink
            // and formatter compaction that follows its deletion
            event.logger = None;
            event.metadata = None;
        }
        buffer.pop_front();
        true
    }

    fn dispatch_front_event(&mut self, buffer: &mut TransitEventBuffer) {
        let Some(event) = buffer.front_mut() else {
            return;
        };
        let Some(metadata) = event.metadata else {
            return;
        };

        match metadata.kind {
            EventKind::Log => {
                if event.log_level() != LogLevel::Backtrace {
                    Self::write_event_to_sinks(
                        &self.process_id,
                        &self.options.error_notifier,
                        &mut self.render_buffer,
                        event,
                    );

                    if let Some(logger) = &event.logger {
                        if event.log_level() >= logger.backtrace_flush_level() {
                            let logger_name = logger.name().to_owned();
                            let process_id = &self.process_id;
                            let error_notifier = &self.options.error_notifier;
                            let render_buffer = &mut self.render_buffer;
                            self.backtrace_storage.process(&logger_name, |stored| {
                                Self::write_event_to_sinks(
                                    process_id,
                                    error_notifier,
                                    render_buffer,
                                    stored,
                                );
                            });
                        }
                    }
                } else {
                    // move the record into the ring; the vacated slot is
                    // recycled by the buffer
                    let stored = std::mem::take(event);
                    let logger_name = stored.logger.as_ref().map(|l| l.name().to_owned());
                    if let Some(logger_name) = logger_name {
                        self.backtrace_storage.store(&logger_name, stored);
                    }
                }
            }
            EventKind::InitBacktrace => {
                // the requested capacity travels as the formatted payload
                match event.formatted.trim().parse::<usize>() {
                    Ok(capacity) => {
                        if let Some(logger) = &event.logger {
                            self.backtrace_storage.set_capacity(logger.name(), capacity);
                        }
                    }
                    Err(error) => (self.options.error_notifier)(&format!(
                        "invalid backtrace capacity \"{}\": {}",
                        event.formatted, error
                    )),
                }
            }
            EventKind::FlushBacktrace => {
                if let Some(logger) = &event.logger {
                    let logger_name = logger.name().to_owned();
                    let process_id = &self.process_id;
                    let error_notifier = &self.options.error_notifier;
                    let render_buffer = &mut self.render_buffer;
                    self.backtrace_storage.process(&logger_name, |stored| {
                        Self::write_event_to_sinks(process_id, error_notifier, render_buffer, stored);
                    });
                }
            }
            EventKind::Flush => {
                self.flush_active_sinks(false);
                // signal, then clear: the slot is recycled and a stale flag
                // would complete the wrong flush later
                if let Some(flag) = event.flush_flag.take() {
                    flag.store(true, Ordering::Release);
                }
            }
        }
    }

    fn write_event_to_sinks(
        process_id: &str,
        error_notifier: &ErrorNotifier,
        render_buffer: &mut String,
        event: &TransitEvent,
    ) {
        let Some(metadata) = event.metadata else {
            return;
        };
        let Some(logger) = &event.logger else {
            return;
        };
        let Some(formatter) = logger.pattern_formatter() else {
            return;
        };

        let record = RecordContext {
            metadata,
            timestamp_ns: event.timestamp_ns,
            thread_id: event.thread_id,
            thread_name: &event.thread_name,
            process_id,
            logger_name: logger.name(),
            level: event.log_level(),
        };
        formatter.format(render_buffer, &record, &event.formatted);

        for sink in logger.sinks() {
            if sink.apply_filters(&record, render_buffer) {
                if let Err(error) =
                    sink.write_message(&record, event.named_args.as_deref(), render_buffer)
                {
                    // one failing sink never blocks the others
                    error_notifier(&format!("sink write failed: {error:#}"));
                }
            }
        }
    }

    /// Flush every sink of every valid logger, deduplicated, optionally
    /// running periodic tasks. The cache holds weak references so it never
    /// extends a sink's lifetime.
    fn flush_active_sinks(&mut self, run_periodic_tasks: bool) {
        self.active_sinks.clear();
        let active_sinks = &mut self.active_sinks;
        self.runtime.loggers.for_each(|logger| {
            if !logger.is_valid() {
                return;
            }
            for sink in logger.sinks() {
                let known = active_sinks
                    .iter()
                    .any(|weak| weak.upgrade().is_some_and(|s| Arc::ptr_eq(&s, sink)));
                if !known {
                    active_sinks.push(Arc::downgrade(sink));
                }
            }
        });

        for weak in &self.active_sinks {
            let Some(sink) = weak.upgrade() else { continue };
            if let Err(error) = sink.flush_sink() {
                (self.options.error_notifier)(&format!("sink flush failed: {error:#}"));
            }
            if run_periodic_tasks {
                sink.run_periodic_tasks();
            }
        }
    }

    /// Producer-side failures surface here, stamped like
    /// `"12:30:05 INFO: Dropped 7 log messages from thread 4321"`.
    fn report_failure_counters(&self) {
        for context in &self.active_contexts {
            let failed = context.take_failure_count();
            if failed == 0 {
                continue;
            }
            let stamp = Local::now().format("%H:%M:%S");
            let message = match context.failure_kind() {
                FailureKind::Dropped => format!(
                    "{stamp} INFO: Dropped {failed} log messages from thread {}",
                    context.thread_id()
                ),
                FailureKind::Blocking => format!(
                    "{stamp} INFO: Experienced {failed} blocking occurrences on thread {}",
                    context.thread_id()
                ),
            };
            (self.options.error_notifier)(&message);
        }
    }

    /// One notice per unbounded-segment transition.
    fn report_queue_allocation(&self, context: &ThreadContext, info: AllocationInfo) {
        let stamp = Local::now().format("%H:%M:%S");
        (self.options.error_notifier)(&format!(
            "{stamp} INFO: A new SPSC queue has been allocated with a new capacity of {} bytes \
             and a previous capacity of {} bytes from thread {}",
            info.new_capacity,
            info.previous_capacity,
            context.thread_id()
        ));
    }

    fn resync_rdtsc_if_due(&mut self) {
        if let Some(clock) = &self.rdtsc_clock {
            if self.last_rdtsc_resync.elapsed() > self.options.rdtsc_resync_interval {
                if clock.resync(2_500) {
                    self.last_rdtsc_resync = Instant::now();
                }
            }
        }
    }

    fn queues_and_buffers_empty(&mut self) -> bool {
        self.refresh_active_contexts();
        self.active_contexts.iter().all(|context| {
            context.queue().empty()
                && context
                    .transit_buffer()
                    .as_ref()
                    .map_or(true, TransitEventBuffer::is_empty)
        })
    }

    /// Remove contexts whose thread exited, once their queue and transit
    /// buffer are fully drained.
    fn cleanup_invalidated_contexts(&mut self) {
        if !self.runtime.thread_contexts.has_invalid() {
            return;
        }
        let registry = Arc::clone(&self.runtime.thread_contexts);
        self.active_contexts.retain(|context| {
            if context.is_valid() {
                return true;
            }
            let queue_empty = context.queue().empty();
            let buffer_empty = context
                .transit_buffer()
                .as_ref()
                .map_or(true, TransitEventBuffer::is_empty);
            if queue_empty && buffer_empty {
                registry.remove(context);
                false
            } else {
                true
            }
        });
    }

    /// Deferred logger deletion, followed by compaction of everything keyed
    /// off loggers: unused sinks, expired formatters, backtrace rings.
    fn cleanup_invalidated_loggers(&mut self) {
        let runtime = Arc::clone(&self.runtime);
        // the emptiness re-check prevents deleting a logger a queued record
        // still references
        let removed = runtime
            .loggers
            .cleanup_invalidated(|| self.queues_and_buffers_empty());
        if removed.is_empty() {
            return;
        }

        runtime.sinks.cleanup_unused_sinks();
        self.pattern_formatters
            .retain(|weak| weak.strong_count() > 0);
        for logger_name in &removed {
            self.backtrace_storage.erase(logger_name);
        }
    }

    /// Shared formatters keyed by (pattern, time pattern, timezone); at most
    /// one live instance per triple.
    fn install_pattern_formatter(&mut self, logger: &Arc<Logger>) {
        let existing = self.pattern_formatters.iter().find_map(|weak| {
            weak.upgrade().filter(|formatter| {
                formatter.matches(
                    logger.format_pattern(),
                    logger.time_pattern(),
                    logger.timezone(),
                )
            })
        });
        let formatter = match existing {
            Some(formatter) => formatter,
            None => {
                let formatter = Arc::new(PatternFormatter::new(
                    logger.format_pattern(),
                    logger.time_pattern(),
                    logger.timezone(),
                ));
                self.pattern_formatters.push(Arc::downgrade(&formatter));
                formatter
            }
        };
        logger.install_pattern_formatter(formatter);
    }
}
