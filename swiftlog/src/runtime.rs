//! The logging runtime: an explicit handle tying the registries and the
//! backend worker together
//!
//! Producer-thread-local state is keyed by runtime identity, so several
//! runtimes can coexist in one process and tests can spin one up per case.

use crate::backend::{self, BackendShared};
use crate::errors::Result;
use crate::logger::{Logger, LoggerConfig, LoggerRegistry};
use crate::options::{BackendOptions, FrontendOptions};
use crate::sink::SinkRegistry;
use crate::thread_context::{with_current_thread_context, ThreadContext, ThreadContextRegistry};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub(crate) struct RuntimeInner {
    pub(crate) id: uuid::Uuid,
    pub(crate) frontend_options: FrontendOptions,
    pub(crate) thread_contexts: Arc<ThreadContextRegistry>,
    pub(crate) loggers: LoggerRegistry,
    pub(crate) sinks: SinkRegistry,
    pub(crate) backend: BackendShared,
    pub(crate) worker_join: Mutex<Option<JoinHandle<()>>>,
}

pub struct LoggingRuntime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl LoggingRuntime {
    pub fn new() -> Self {
        Self::with_options(FrontendOptions::default())
    }

    pub fn with_options(frontend_options: FrontendOptions) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                id: uuid::Uuid::new_v4(),
                frontend_options,
                thread_contexts: Arc::new(ThreadContextRegistry::default()),
                loggers: LoggerRegistry::default(),
                sinks: SinkRegistry::default(),
                backend: BackendShared::new(),
                worker_join: Mutex::new(None),
            }),
        }
    }

    /// Spawn the backend worker. Returns once the worker finished its setup,
    /// so a `notify` sent right after never races it.
    pub fn start(&self, options: BackendOptions) -> Result<()> {
        backend::start(&self.inner, options)
    }

    /// Stop the worker and join it. With
    /// `wait_for_queues_to_empty_before_exit` set (the default), every
    /// record committed before this call is dispatched before it returns.
    pub fn stop(&self) {
        if !self.inner.backend.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify();
        let handle = self.inner.worker_join.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Wake the backend worker. Safe from any thread; wake-ups coalesce.
    pub fn notify(&self) {
        self.inner.backend.wake_up.notify();
    }

    pub fn is_running(&self) -> bool {
        self.inner.backend.is_running.load(Ordering::Relaxed)
    }

    pub fn backend_thread_id(&self) -> u32 {
        self.inner.backend.worker_thread_id.load(Ordering::Relaxed)
    }

    /// Convert a raw cycle count to nanoseconds since the Unix epoch.
    /// Returns 0 until the backend has seen its first TSC-sourced record.
    pub fn time_since_epoch(&self, tsc: u64) -> u64 {
        let clock = self.inner.backend.rdtsc_clock.lock().unwrap();
        clock.as_ref().map_or(0, |clock| clock.time_since_epoch(tsc))
    }

    pub fn create_logger(&self, config: LoggerConfig) -> Arc<Logger> {
        self.inner.loggers.create(config)
    }

    /// Mark a logger for removal, consuming the handle: the backend compacts
    /// sinks and formatters right after deletion, so a handle surviving the
    /// removal would keep them alive past that pass. Deletion itself is
    /// deferred until no record referencing the logger remains in any queue
    /// or buffer.
    pub fn remove_logger(&self, logger: Arc<Logger>) {
        self.inner.loggers.invalidate(&logger);
        drop(logger);
        self.notify();
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.inner.sinks
    }

    /// Live loggers, including invalidated ones not yet collected.
    pub fn logger_count(&self) -> usize {
        self.inner.loggers.len()
    }

    pub(crate) fn with_thread_context<R>(&self, f: impl FnOnce(&ThreadContext) -> R) -> R {
        with_current_thread_context(
            self.inner.id,
            &self.inner.thread_contexts,
            &self.inner.frontend_options,
            f,
        )
    }
}

impl Default for LoggingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoggingRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
