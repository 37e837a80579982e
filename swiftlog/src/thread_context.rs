//! Per-producer thread state and its registry
//!
//! A thread context is created the first time a thread logs through a
//! runtime. It owns that thread's SPSC queue and (lazily, attached by the
//! backend) the transit-event buffer of decoded records. The registry hands
//! the backend a consistent snapshot of live contexts and tracks lifecycle
//! through two atomic hints: "a new context appeared" and "an invalidated
//! context is present".

use crate::options::{FrontendOptions, QueueKind};
use crate::transit_event::TransitEventBuffer;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use swiftlog_transit::{BoundedSpscQueue, UnboundedSpscQueue};

/// What a producer does when its bounded queue cannot host a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    Drop,
    Block,
}

pub enum FrontendQueue {
    Bounded {
        queue: BoundedSpscQueue,
        policy: QueuePolicy,
    },
    Unbounded(UnboundedSpscQueue),
}

impl FrontendQueue {
    pub(crate) fn from_options(options: &FrontendOptions) -> Self {
        let capacity = options.queue_capacity.next_power_of_two();
        match options.queue_kind {
            QueueKind::BoundedDropping => FrontendQueue::Bounded {
                queue: BoundedSpscQueue::new(capacity),
                policy: QueuePolicy::Drop,
            },
            QueueKind::BoundedBlocking => FrontendQueue::Bounded {
                queue: BoundedSpscQueue::new(capacity),
                policy: QueuePolicy::Block,
            },
            QueueKind::Unbounded => FrontendQueue::Unbounded(UnboundedSpscQueue::new(
                capacity,
                options.unbounded_max_capacity,
            )),
        }
    }

    pub fn empty(&self) -> bool {
        match self {
            FrontendQueue::Bounded { queue, .. } => queue.empty(),
            FrontendQueue::Unbounded(queue) => queue.empty(),
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            FrontendQueue::Bounded { queue, .. } => queue.capacity(),
            FrontendQueue::Unbounded(queue) => queue.capacity(),
        }
    }

    /// Backend thread only.
    pub(crate) fn finish_read(&self, n: usize) {
        match self {
            FrontendQueue::Bounded { queue, .. } => queue.finish_read(n),
            FrontendQueue::Unbounded(queue) => queue.finish_read(n),
        }
    }

    /// Backend thread only.
    pub(crate) fn commit_read(&self) {
        match self {
            FrontendQueue::Bounded { queue, .. } => queue.commit_read(),
            FrontendQueue::Unbounded(queue) => queue.commit_read(),
        }
    }
}

/// How this context's failures read in the counter report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    Dropped,
    Blocking,
}

pub struct ThreadContext {
    thread_id: u32,
    thread_name: Arc<str>,
    queue: FrontendQueue,
    /// Dropped records, or blocking occurrences under the blocking policy.
    failure_counter: AtomicUsize,
    /// Cleared when the owning thread exits; the backend destroys the
    /// context only once the queue and transit buffer are also empty.
    valid: AtomicBool,
    /// Backend-only. Lazily attached when the backend first caches this
    /// context.
    transit_buffer: Mutex<Option<TransitEventBuffer>>,
}

impl ThreadContext {
    pub(crate) fn new(queue: FrontendQueue) -> Self {
        let thread = std::thread::current();
        Self {
            thread_id: thread_id::get() as u32,
            thread_name: Arc::from(thread.name().unwrap_or("")),
            queue,
            failure_counter: AtomicUsize::new(0),
            valid: AtomicBool::new(true),
            transit_buffer: Mutex::new(None),
        }
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn thread_name(&self) -> &Arc<str> {
        &self.thread_name
    }

    pub fn queue(&self) -> &FrontendQueue {
        &self.queue
    }

    pub(crate) fn failure_kind(&self) -> FailureKind {
        match &self.queue {
            FrontendQueue::Bounded {
                policy: QueuePolicy::Block,
                ..
            } => FailureKind::Blocking,
            _ => FailureKind::Dropped,
        }
    }

    pub(crate) fn bump_failure_counter(&self) {
        self.failure_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn take_failure_count(&self) -> usize {
        self.failure_counter.swap(0, Ordering::Relaxed)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Backend thread only; producers never take this lock.
    pub(crate) fn transit_buffer(&self) -> MutexGuard<'_, Option<TransitEventBuffer>> {
        self.transit_buffer.lock().unwrap()
    }
}

#[derive(Default)]
pub struct ThreadContextRegistry {
    contexts: Mutex<Vec<Arc<ThreadContext>>>,
    new_context: AtomicBool,
    has_invalid: AtomicBool,
}

impl ThreadContextRegistry {
    pub(crate) fn register(&self, context: Arc<ThreadContext>) {
        self.contexts.lock().unwrap().push(context);
        self.new_context.store(true, Ordering::Release);
    }

    /// Observe-and-clear the "new context" hint; the backend refreshes its
    /// cache only when this returns true.
    pub(crate) fn take_new_context_flag(&self) -> bool {
        self.new_context.swap(false, Ordering::AcqRel)
    }

    /// Force the next cache refresh; a freshly started worker must see the
    /// contexts registered before it existed.
    pub(crate) fn mark_new_context(&self) {
        self.new_context.store(true, Ordering::Release);
    }

    pub(crate) fn mark_invalid_present(&self) {
        self.has_invalid.store(true, Ordering::Release);
    }

    pub(crate) fn has_invalid(&self) -> bool {
        self.has_invalid.load(Ordering::Acquire)
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<ThreadContext>)) {
        let contexts = self.contexts.lock().unwrap();
        for context in contexts.iter() {
            f(context);
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().unwrap().is_empty()
    }

    /// Backend-only removal of a drained, invalidated context.
    pub(crate) fn remove(&self, context: &Arc<ThreadContext>) {
        let mut contexts = self.contexts.lock().unwrap();
        contexts.retain(|candidate| !Arc::ptr_eq(candidate, context));
        if contexts.iter().all(|candidate| candidate.is_valid()) {
            self.has_invalid.store(false, Ordering::Release);
        }
    }
}

/// Producer-side handle kept in thread-local storage; invalidates the
/// context when the owning thread exits.
struct OwnedThreadContext {
    context: Arc<ThreadContext>,
    registry: Arc<ThreadContextRegistry>,
}

impl Drop for OwnedThreadContext {
    fn drop(&mut self) {
        self.context.invalidate();
        self.registry.mark_invalid_present();
    }
}

thread_local! {
    /// One context per (thread, runtime) pair, keyed by runtime identity so
    /// several runtimes can coexist in one process.
    static THREAD_CONTEXTS: RefCell<HashMap<uuid::Uuid, OwnedThreadContext>> =
        RefCell::new(HashMap::new());
}

pub(crate) fn with_current_thread_context<R>(
    runtime_id: uuid::Uuid,
    registry: &Arc<ThreadContextRegistry>,
    frontend_options: &FrontendOptions,
    f: impl FnOnce(&ThreadContext) -> R,
) -> R {
    THREAD_CONTEXTS.with(|cell| {
        let mut map = cell.borrow_mut();
        let owned = map.entry(runtime_id).or_insert_with(|| {
            let context = Arc::new(ThreadContext::new(FrontendQueue::from_options(
                frontend_options,
            )));
            registry.register(Arc::clone(&context));
            OwnedThreadContext {
                context,
                registry: Arc::clone(registry),
            }
        });
        f(&owned.context)
    })
}
