#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use swiftlog::options::ErrorNotifier;

/// Captures everything the backend reports through the error notifier.
#[derive(Clone, Default)]
pub struct NotifierCapture {
    messages: Arc<Mutex<Vec<String>>>,
}

impl NotifierCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifier(&self) -> ErrorNotifier {
        let messages = Arc::clone(&self.messages);
        Arc::new(move |message| messages.lock().unwrap().push(message.to_owned()))
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.contains(needle))
    }
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    predicate()
}
