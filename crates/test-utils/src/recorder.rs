//! Thread-safe sink for new-lines callbacks.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tailor::{ClientId, MessageType};

/// One callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub client_id: ClientId,
    pub msg_type: MessageType,
    pub lines: Vec<String>,
}

impl Received {
    pub fn started(client_id: ClientId, lines: &[&str]) -> Self {
        Self::new(client_id, MessageType::NewFileStarted, lines)
    }

    pub fn added(client_id: ClientId, lines: &[&str]) -> Self {
        Self::new(client_id, MessageType::NewLinesAdded, lines)
    }

    fn new(client_id: ClientId, msg_type: MessageType, lines: &[&str]) -> Self {
        Self {
            client_id,
            msg_type,
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Collects every callback invocation and lets tests wait for them.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<(Mutex<Vec<Received>>, Condvar)>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback suitable for `Tailor::set_new_lines_callback`.
    pub fn callback(&self) -> impl Fn(ClientId, MessageType, &[String]) + Send + Sync + 'static {
        let inner = Arc::clone(&self.inner);
        move |client_id, msg_type, lines| {
            let (log, cvar) = &*inner;
            log.lock().unwrap().push(Received {
                client_id,
                msg_type,
                lines: lines.to_vec(),
            });
            cvar.notify_all();
        }
    }

    pub fn snapshot(&self) -> Vec<Received> {
        self.inner.0.lock().unwrap().clone()
    }

    pub fn for_client(&self, client_id: ClientId) -> Vec<Received> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.client_id == client_id)
            .collect()
    }

    /// Every `NewLinesAdded` line for `client_id`, flattened in order.
    pub fn added_lines(&self, client_id: ClientId) -> Vec<String> {
        self.for_client(client_id)
            .into_iter()
            .filter(|r| r.msg_type == MessageType::NewLinesAdded)
            .flat_map(|r| r.lines)
            .collect()
    }

    pub fn clear(&self) {
        self.inner.0.lock().unwrap().clear();
    }

    /// Block until `pred` holds for the received log or `timeout` passes.
    /// Returns whether the predicate was satisfied.
    pub fn wait_until<P>(&self, timeout: Duration, pred: P) -> bool
    where
        P: Fn(&[Received]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let (log, cvar) = &*self.inner;
        let mut guard = log.lock().unwrap();
        loop {
            if pred(&guard) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = cvar.wait_timeout(guard, deadline - now).unwrap().0;
        }
    }

    /// Wait until `client_id` has received at least `count` invocations.
    pub fn wait_for(&self, client_id: ClientId, count: usize) -> bool {
        self.wait_until(crate::DEFAULT_WAIT, |log| {
            log.iter().filter(|r| r.client_id == client_id).count() >= count
        })
    }

    /// Wait until the flattened added lines of `client_id` reach `count`.
    pub fn wait_for_lines(&self, client_id: ClientId, count: usize) -> bool {
        self.wait_until(crate::DEFAULT_WAIT, |log| {
            log.iter()
                .filter(|r| r.client_id == client_id && r.msg_type == MessageType::NewLinesAdded)
                .map(|r| r.lines.len())
                .sum::<usize>()
                >= count
        })
    }
}
