//! Session-level concurrency control
//!
//! Caps the number of simultaneous end-to-end pipeline sessions. Excess
//! submissions queue and are released strictly FIFO as slots free up; queued
//! (not yet started) sessions can be cancelled, running ones cannot.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{Error, Result};

/// A queued session waiting for a free slot
struct Waiter {
    session_id: String,
    slot_tx: oneshot::Sender<Result<SlotGuard>>,
}

/// Active set and overflow queue; the controller exclusively owns both
struct ControllerInner {
    active: HashSet<String>,
    queue: VecDeque<Waiter>,
}

struct Shared {
    max_concurrent: usize,
    inner: Mutex<ControllerInner>,
}

/// Bounded-concurrency gate for pipeline sessions
///
/// Cheap to clone; all clones share the same active set and queue.
#[derive(Clone)]
pub struct ConcurrencyController {
    shared: Arc<Shared>,
}

impl ConcurrencyController {
    /// Create a controller admitting at most `max_concurrent` sessions
    ///
    /// # Errors
    ///
    /// Returns an error if `max_concurrent` is zero.
    pub fn new(max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(Error::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                max_concurrent,
                inner: Mutex::new(ControllerInner {
                    active: HashSet::new(),
                    queue: VecDeque::new(),
                }),
            }),
        })
    }

    /// Run an operation under the concurrency cap
    ///
    /// Starts immediately when a slot is free, otherwise suspends in FIFO
    /// order until one frees up. The slot is released on every settle path,
    /// including drop of the returned future.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the session is cancelled while
    /// queued, otherwise whatever the operation returns.
    pub async fn execute<F, Fut, T>(&self, session_id: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _slot = match self.admit(session_id) {
            Admission::Started(guard) => guard,
            Admission::Queued(rx) => match rx.await {
                Ok(Ok(guard)) => guard,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(Error::Internal(
                        "concurrency controller dropped while session queued".to_string(),
                    ));
                }
            },
        };

        op().await
    }

    /// Cancel a still-queued session
    ///
    /// Returns `false` when the session is not in the queue — unknown ids
    /// and already-running sessions are left untouched.
    pub fn cancel_queued(&self, session_id: &str) -> bool {
        let waiter = {
            let mut inner = self.shared.inner.lock();
            let Some(pos) = inner
                .queue
                .iter()
                .position(|w| w.session_id == session_id)
            else {
                return false;
            };
            inner.queue.remove(pos)
        };

        if let Some(waiter) = waiter {
            debug!(session = session_id, "Cancelled queued session");
            let _ = waiter.slot_tx.send(Err(Error::Cancelled {
                session: session_id.to_string(),
            }));
            true
        } else {
            false
        }
    }

    /// Whether a session currently holds a slot
    pub fn is_active(&self, session_id: &str) -> bool {
        self.shared.inner.lock().active.contains(session_id)
    }

    /// Number of sessions currently holding slots
    pub fn active_count(&self) -> usize {
        self.shared.inner.lock().active.len()
    }

    /// Number of sessions waiting in the queue
    pub fn queue_length(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Get a status snapshot for observability
    pub fn status(&self) -> ControllerStatus {
        let inner = self.shared.inner.lock();
        let mut active_sessions: Vec<String> = inner.active.iter().cloned().collect();
        active_sessions.sort();
        ControllerStatus {
            max_concurrent: self.shared.max_concurrent,
            active_count: inner.active.len(),
            queue_length: inner.queue.len(),
            active_sessions,
            queued_sessions: inner.queue.iter().map(|w| w.session_id.clone()).collect(),
        }
    }

    /// Claim a slot now or join the queue
    fn admit(&self, session_id: &str) -> Admission {
        let mut inner = self.shared.inner.lock();
        if inner.active.len() < self.shared.max_concurrent {
            inner.active.insert(session_id.to_string());
            debug!(session = session_id, "Session started");
            Admission::Started(self.guard(session_id))
        } else {
            let (slot_tx, rx) = oneshot::channel();
            inner.queue.push_back(Waiter {
                session_id: session_id.to_string(),
                slot_tx,
            });
            debug!(
                session = session_id,
                queue_length = inner.queue.len(),
                "Session queued"
            );
            Admission::Queued(rx)
        }
    }

    /// Free a slot and hand the head of the queue its turn
    fn release(&self, session_id: &str) {
        let mut inner = self.shared.inner.lock();
        inner.active.remove(session_id);

        while inner.active.len() < self.shared.max_concurrent {
            let Some(waiter) = inner.queue.pop_front() else {
                break;
            };
            inner.active.insert(waiter.session_id.clone());
            let session_id = waiter.session_id;
            if let Err(unsent) = waiter.slot_tx.send(Ok(self.guard(&session_id))) {
                // Receiver dropped before its turn came; the guard must not
                // re-enter this lock on drop
                if let Ok(mut guard) = unsent {
                    guard.armed = false;
                }
                inner.active.remove(&session_id);
                continue;
            }
            debug!(session = %session_id, "Dequeued session started");
        }
    }

    fn guard(&self, session_id: &str) -> SlotGuard {
        SlotGuard {
            controller: self.clone(),
            session_id: session_id.to_string(),
            armed: true,
        }
    }
}

/// Outcome of an admission attempt
enum Admission {
    Started(SlotGuard),
    Queued(oneshot::Receiver<Result<SlotGuard>>),
}

/// RAII slot ownership; releasing drains the queue
struct SlotGuard {
    controller: ConcurrencyController,
    session_id: String,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            self.controller.release(&self.session_id);
        }
    }
}

/// Concurrency controller status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    /// Configured session cap
    pub max_concurrent: usize,
    /// Sessions currently holding slots
    pub active_count: usize,
    /// Sessions waiting in the queue
    pub queue_length: usize,
    /// Ids of running sessions (sorted)
    pub active_sessions: Vec<String>,
    /// Ids of queued sessions in FIFO order
    pub queued_sessions: Vec<String>,
}
