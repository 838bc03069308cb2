//! Fiber runtime: cancellation and first-error propagation.
//!
//! Fibers are plain OS threads. A `FiberGroup` tracks every spawned fiber,
//! records the first non-success result, and cancels a shared `CancelToken`
//! so that blocked fibers unwind. `wait` joins until no fibers remain;
//! fibers may spawn further fibers while the join is in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::errors::CallError;

/// Cancellation signal shared by every fiber of a simulation run.
///
/// Cancellation is observable two ways: a flag for synchronous checks, and a
/// channel that disconnects on cancel so blocked receivers wake immediately.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    // Dropping the sender disconnects every subscribed receiver.
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> CancelToken {
        let (sender, receiver) = unbounded();
        CancelToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Cancel the token. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.sender.lock().unwrap().take();
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A receiver that disconnects when the token is cancelled. Nothing is
    /// ever sent on it; waiters select on disconnection.
    pub(crate) fn subscribe(&self) -> Receiver<()> {
        self.inner.receiver.clone()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A group of fibers sharing one cancellation token.
///
/// The first fiber to return an error records it and cancels the token,
/// mirroring the behavior of an error group: every other fiber observes the
/// cancellation and winds down.
pub(crate) struct FiberGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    cancel: CancelToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    first_err: Mutex<Option<CallError>>,
}

impl FiberGroup {
    pub fn new(cancel: CancelToken) -> FiberGroup {
        FiberGroup {
            inner: Arc::new(GroupInner {
                cancel,
                handles: Mutex::new(Vec::new()),
                first_err: Mutex::new(None),
            }),
        }
    }

    /// Spawn a fiber. An `Err` return records the group's first error and
    /// cancels the shared token.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() -> Result<(), CallError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::spawn(move || {
            if let Err(err) = f() {
                inner.fail(err);
            }
        });
        self.inner.handles.lock().unwrap().push(handle);
    }

    /// Join every fiber, including ones spawned while joining, then return
    /// the first recorded error. A panicking fiber cancels the run and the
    /// panic is re-raised here once all fibers have been joined.
    pub fn wait(&self) -> Option<CallError> {
        let mut panic_payload = None;
        loop {
            let handle = self.inner.handles.lock().unwrap().pop();
            let Some(handle) = handle else { break };
            if let Err(payload) = handle.join() {
                self.inner.cancel.cancel();
                if panic_payload.is_none() {
                    panic_payload = Some(payload);
                }
            }
        }
        if let Some(payload) = panic_payload {
            std::panic::resume_unwind(payload);
        }
        self.inner.first_err.lock().unwrap().clone()
    }
}

impl GroupInner {
    fn fail(&self, err: CallError) {
        {
            let mut slot = self.first_err.lock().unwrap();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
    }
}
