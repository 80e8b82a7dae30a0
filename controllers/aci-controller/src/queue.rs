//! Deduplicating work queues.
//!
//! Each resource kind has its own queue of string keys. A key sits in the
//! queue at most once, and is handed to at most one worker at a time: a key
//! added while a worker holds it is parked in the dirty set and queued again
//! when the worker calls [`WorkQueue::done`].
//!
//! Failed keys are re-added after a per-key Fibonacci backoff; a key that
//! reconciles cleanly is forgotten, which resets its backoff.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::reconciler::Action;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error};

const BACKOFF_MIN_SECONDS: u64 = 1;
const BACKOFF_MAX_SECONDS: u64 = 300;

/// Which pipeline a queue feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Service,
    Snat,
    Netflow,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Service => "service",
            QueueKind::Snat => "snat",
            QueueKind::Netflow => "netflow",
        }
    }
}

/// Backoff state for a key
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(BACKOFF_MIN_SECONDS, BACKOFF_MAX_SECONDS),
            error_count: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<String>,
    // queued or waiting for the current holder to finish
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, BackoffState>,
    shutting_down: bool,
}

#[derive(Debug)]
pub struct WorkQueue {
    kind: QueueKind,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` unless it is already waiting
    pub fn add(&self, key: &str) {
        let mut inner = self.lock();
        if inner.shutting_down || !inner.dirty.insert(key.to_string()) {
            return;
        }
        if inner.processing.contains(key) {
            return;
        }
        inner.queue.push_back(key.to_string());
        drop(inner);
        self.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a shutdown between the check and
            // the await still wakes us
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.shutting_down {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    let more = !inner.queue.is_empty();
                    drop(inner);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release `key` after processing, queueing it again if it was re-added
    /// in the meantime
    pub fn done(&self, key: &str) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Re-add `key` after its next backoff delay
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut inner = self.lock();
            if inner.shutting_down {
                return;
            }
            let state = inner.failures.entry(key.to_string()).or_insert_with(BackoffState::new);
            state.error_count += 1;
            let delay = state.backoff.next_backoff();
            debug!(
                "Requeue {} {} in {:?} (attempt {})",
                self.kind.as_str(),
                key,
                delay,
                state.error_count
            );
            delay
        };

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Reset the backoff of `key`. The next failure starts again from the
    /// minimum delay.
    pub fn forget(&self, key: &str) {
        self.lock().failures.remove(key);
    }

    /// Stop handing out keys; blocked workers wake up and see `None`
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Keys waiting to be processed
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pop keys until shutdown, feeding each to `handler`.
///
/// `Done` resets the key's backoff; `Requeue` and errors re-add it with
/// backoff. The handler never re-submits keys itself.
pub async fn run_worker<F, Fut>(queue: Arc<WorkQueue>, handler: F)
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Action, ControllerError>>,
{
    debug!("Starting {} worker", queue.kind().as_str());
    while let Some(key) = queue.get().await {
        match handler(key.clone()).await {
            Ok(Action::Done) => queue.forget(&key),
            Ok(Action::Requeue) => queue.add_rate_limited(&key),
            Err(e) => {
                error!("Error processing {} {}: {}", queue.kind().as_str(), key, e);
                queue.add_rate_limited(&key);
            }
        }
        queue.done(&key);
    }
    debug!("{} worker stopped", queue.kind().as_str());
}
