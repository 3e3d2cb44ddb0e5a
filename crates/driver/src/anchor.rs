//! Tracking set for outstanding outbound requests
//!
//! Requests are registered before submission and removed by their
//! completion, so the set always covers everything a drain or detach might
//! need to cancel.

use crate::sync::Monitor;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use transport::{RequestId, Transport};

pub(crate) struct Anchor {
    monitor: Monitor<HashSet<RequestId>>,
}

impl Anchor {
    pub(crate) fn new() -> Self {
        Self {
            monitor: Monitor::new(HashSet::new()),
        }
    }

    /// Track `id` until its completion removes it
    ///
    /// The registration is undone on drop unless [`Registration::commit`]
    /// hands it over to the completion path.
    pub(crate) fn register(&self, id: RequestId) -> Registration<'_> {
        self.monitor.lock().insert(id);
        Registration {
            anchor: self,
            id,
            committed: false,
        }
    }

    /// Drop `id` from the set; safe from completion context
    pub(crate) fn remove(&self, id: RequestId) -> bool {
        let mut set = self.monitor.lock();
        let removed = set.remove(&id);
        let now_empty = set.is_empty();
        drop(set);

        if now_empty {
            self.monitor.notify_all();
        }
        removed
    }

    pub(crate) fn contains(&self, id: RequestId) -> bool {
        self.monitor.lock().contains(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.monitor.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.monitor.lock().is_empty()
    }

    /// Wait until no requests are outstanding; false on timeout
    pub(crate) fn wait_empty_timeout(&self, timeout: Duration) -> bool {
        let set = self.monitor.lock();
        let (_set, empty) = self
            .monitor
            .wait_timeout_until(set, timeout, |set| set.is_empty());
        empty
    }

    /// Cancel every tracked request and wait for the completions
    ///
    /// Waits at most `grace` for the transport to deliver them. Returns
    /// whether the set drained.
    pub(crate) fn kill_all(&self, transport: &dyn Transport, grace: Duration) -> bool {
        let ids: Vec<RequestId> = self.monitor.lock().iter().copied().collect();
        if ids.is_empty() {
            return true;
        }

        debug!("Cancelling {} outstanding writes", ids.len());
        for id in ids {
            transport.cancel(id);
        }

        let drained = self.wait_empty_timeout(grace);
        if !drained {
            warn!(
                "{} writes still outstanding {:?} after cancellation",
                self.len(),
                grace
            );
        }
        drained
    }
}

/// Pending membership of one request in an [`Anchor`]
pub(crate) struct Registration<'a> {
    anchor: &'a Anchor,
    id: RequestId,
    committed: bool,
}

impl Registration<'_> {
    /// The request was submitted; its completion will remove it
    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.anchor.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_registration_rolls_back() {
        let anchor = Anchor::new();
        {
            let _registration = anchor.register(RequestId(1));
            assert_eq!(anchor.len(), 1);
        }
        assert!(anchor.is_empty());
    }

    #[test]
    fn test_commit_keeps_entry() {
        let anchor = Anchor::new();
        anchor.register(RequestId(7)).commit();
        assert_eq!(anchor.len(), 1);

        assert!(anchor.remove(RequestId(7)));
        assert!(!anchor.remove(RequestId(7)));
        assert!(anchor.is_empty());
    }

    #[test]
    fn test_wait_empty_timeout() {
        let anchor = Arc::new(Anchor::new());
        anchor.register(RequestId(1)).commit();
        assert!(!anchor.wait_empty_timeout(Duration::from_millis(20)));

        let remover = {
            let anchor = Arc::clone(&anchor);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                anchor.remove(RequestId(1));
            })
        };
        assert!(anchor.wait_empty_timeout(Duration::from_secs(5)));
        remover.join().unwrap();
    }
}
