//! Single-assignment completion slots for out-of-band results.

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::services::{CompletionListener, RequestId};
use crate::types::{InstallResult, UpdaterError};

/// Write-once handle. The first `fulfill` wins; later calls are no-ops.
pub struct CompletionSlot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionSlot<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Returns false if the slot was already fulfilled or closed.
    pub fn fulfill(&self, value: T) -> bool {
        match self.sender.lock().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the sender without a value; the waiting side observes closure.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.lock().is_none()
    }
}

enum Tracking {
    /// Submission has not returned an id yet; notifications are held.
    Awaiting(Vec<RequestId>),
    Target(RequestId),
}

/// Listener correlating the queue's broadcast notifications to one request.
///
/// Registered before the request is submitted. Notifications that arrive
/// before the id is known are buffered and re-checked once it is.
pub struct PendingDownload {
    tracking: Mutex<Tracking>,
    slot: CompletionSlot<RequestId>,
}

impl PendingDownload {
    pub fn new() -> (Self, oneshot::Receiver<RequestId>) {
        let (slot, rx) = CompletionSlot::new();
        (
            Self {
                tracking: Mutex::new(Tracking::Awaiting(Vec::new())),
                slot,
            },
            rx,
        )
    }

    /// Bind to the id returned by the queue.
    pub fn track(&self, id: RequestId) {
        let mut tracking = self.tracking.lock();
        let seen_early = matches!(&*tracking, Tracking::Awaiting(early) if early.contains(&id));
        *tracking = Tracking::Target(id);
        drop(tracking);

        if seen_early {
            debug!(request = %id, "Completion arrived before submission returned");
            self.slot.fulfill(id);
        }
    }

    pub fn target(&self) -> Option<RequestId> {
        match &*self.tracking.lock() {
            Tracking::Target(id) => Some(*id),
            Tracking::Awaiting(_) => None,
        }
    }

    pub fn abandon(&self) {
        self.slot.close();
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }
}

impl CompletionListener for PendingDownload {
    fn on_complete(&self, id: RequestId) {
        let target = {
            let mut tracking = self.tracking.lock();
            match &mut *tracking {
                Tracking::Awaiting(early) => {
                    early.push(id);
                    return;
                }
                Tracking::Target(target) => *target,
            }
        };

        if target != id {
            debug!(request = %id, tracking = %target, "Ignoring unrelated completion");
            return;
        }
        if !self.slot.fulfill(id) {
            debug!(request = %id, "Duplicate completion ignored");
        }
    }
}

/// The install request currently awaiting its result.
pub struct PendingInstall {
    pub request_code: i32,
    slot: CompletionSlot<InstallResult>,
}

/// Routes install results, keyed by request code, to the pending install.
#[derive(Default)]
pub struct InstallResultRouter {
    pending: Mutex<Option<PendingInstall>>,
}

impl InstallResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the slot for `request_code`. Fails if an install is already pending.
    pub fn arm(
        &self,
        request_code: i32,
    ) -> Result<oneshot::Receiver<InstallResult>, UpdaterError> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(UpdaterError::InstallInProgress);
        }
        let (slot, rx) = CompletionSlot::new();
        *pending = Some(PendingInstall { request_code, slot });
        Ok(rx)
    }

    /// Deliver a result. Unknown request codes and repeated deliveries are ignored.
    pub fn deliver(&self, request_code: i32, result: InstallResult) -> bool {
        let install = {
            let mut pending = self.pending.lock();
            let matches = pending
                .as_ref()
                .is_some_and(|install| install.request_code == request_code);
            if !matches {
                debug!(request_code, "No pending install for result");
                return false;
            }
            pending.take()
        };
        install.is_some_and(|install| install.slot.fulfill(result))
    }

    /// Clear the pending install. Any waiter observes a closed channel.
    pub fn disarm(&self) -> bool {
        self.pending.lock().take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.pending.lock().is_some()
    }
}
