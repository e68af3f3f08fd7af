//! RepublishCoordinator - debounced republish and entry reload
//!
//! Two independent single-shot timers:
//! - republish+reload: reload the store, send `reload` to every device, then
//!   publish fresh configs
//! - entry reload: rebuild per-device adapters after the member set changed
//!
//! Scheduling while a timer is pending is a no-op. When a timer expires it
//! only *notifies* the bridge task over a channel; the bridge calls
//! [`RepublishCoordinator::take_fired`], which clears the pending handle
//! before the body runs, so the body is never entered twice for one timer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    RepublishReload,
    EntryReload,
}

struct Pending {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    reasons: Vec<String>,
}

struct Debouncer {
    kind: TimerKind,
    delay: Duration,
    pending: Option<Pending>,
}

impl Debouncer {
    fn new(kind: TimerKind, delay: Duration) -> Self {
        Self {
            kind,
            delay,
            pending: None,
        }
    }

    fn schedule(&mut self, reason: &str, fired: &mpsc::Sender<TimerKind>, parent: &CancellationToken) -> bool {
        if let Some(pending) = self.pending.as_mut() {
            if !reason.is_empty() {
                pending.reasons.push(reason.to_string());
            }
            return false;
        }
        let cancel = parent.child_token();
        let token = cancel.clone();
        let tx = fired.clone();
        let delay = self.delay;
        let kind = self.kind;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if tx.send(kind).await.is_err() {
                        debug!("{:?} fired after bridge task exited", kind);
                    }
                }
            }
        });
        self.pending = Some(Pending {
            handle,
            cancel,
            reasons: if reason.is_empty() {
                Vec::new()
            } else {
                vec![reason.to_string()]
            },
        });
        true
    }

    fn take(&mut self) -> Option<Vec<String>> {
        self.pending.take().map(|p| p.reasons)
    }

    fn cancel(&mut self) {
        if let Some(p) = self.pending.take() {
            p.cancel.cancel();
            p.handle.abort();
        }
    }
}

/// Owned by the bridge task; never shared
pub struct RepublishCoordinator {
    republish: Debouncer,
    entry: Debouncer,
    fired: mpsc::Sender<TimerKind>,
    shutdown: CancellationToken,
}

impl RepublishCoordinator {
    /// `fired` receives a [`TimerKind`] each time a timer expires
    pub fn new(
        republish_delay: Duration,
        entry_delay: Duration,
        fired: mpsc::Sender<TimerKind>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            republish: Debouncer::new(TimerKind::RepublishReload, republish_delay),
            entry: Debouncer::new(TimerKind::EntryReload, entry_delay),
            fired,
            shutdown,
        }
    }

    fn timer(&mut self, kind: TimerKind) -> &mut Debouncer {
        match kind {
            TimerKind::RepublishReload => &mut self.republish,
            TimerKind::EntryReload => &mut self.entry,
        }
    }

    /// Arm the timer unless it is already pending. Returns true if armed.
    pub fn schedule(&mut self, kind: TimerKind, reason: &str) -> bool {
        let fired = self.fired.clone();
        let shutdown = self.shutdown.clone();
        let armed = self.timer(kind).schedule(reason, &fired, &shutdown);
        if armed {
            debug!("scheduled {:?} (reason={})", kind, reason);
        } else {
            debug!("{:?} already pending; coalesced (reason={})", kind, reason);
        }
        armed
    }

    pub fn schedule_republish_reload(&mut self, reason: &str) -> bool {
        self.schedule(TimerKind::RepublishReload, reason)
    }

    pub fn schedule_entry_reload(&mut self, reason: &str) -> bool {
        self.schedule(TimerKind::EntryReload, reason)
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::RepublishReload => self.republish.pending.is_some(),
            TimerKind::EntryReload => self.entry.pending.is_some(),
        }
    }

    /// Clear the pending handle for a fired timer and return the coalesced
    /// reasons. None means the notification is stale and must be ignored.
    pub fn take_fired(&mut self, kind: TimerKind) -> Option<Vec<String>> {
        self.timer(kind).take()
    }

    pub fn cancel_all(&mut self) {
        self.republish.cancel();
        self.entry.cancel();
    }
}

impl Drop for RepublishCoordinator {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(20);

    fn coordinator() -> (RepublishCoordinator, mpsc::Receiver<TimerKind>) {
        let (tx, rx) = mpsc::channel(8);
        (
            RepublishCoordinator::new(DELAY, DELAY, tx, CancellationToken::new()),
            rx,
        )
    }

    #[tokio::test]
    async fn test_schedule_coalesces_while_pending() {
        let (mut coord, mut rx) = coordinator();
        assert!(coord.schedule_republish_reload("a"));
        assert!(!coord.schedule_republish_reload("b"));
        assert!(!coord.schedule_republish_reload(""));

        let kind = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kind, TimerKind::RepublishReload);
        assert_eq!(coord.take_fired(kind), Some(vec!["a".to_string(), "b".to_string()]));

        // single fire only
        tokio::time::sleep(DELAY * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_cleared_before_body() {
        let (mut coord, mut rx) = coordinator();
        coord.schedule_entry_reload("roster");
        let kind = rx.recv().await.unwrap();
        assert!(coord.take_fired(kind).is_some());
        assert!(!coord.is_pending(TimerKind::EntryReload));
        // a second take for the same fire is stale
        assert!(coord.take_fired(kind).is_none());
        // re-arm works after fire
        assert!(coord.schedule_entry_reload("again"));
    }

    #[tokio::test]
    async fn test_timers_are_independent() {
        let (mut coord, mut rx) = coordinator();
        assert!(coord.schedule_republish_reload("x"));
        assert!(coord.schedule_entry_reload("y"));
        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort_by_key(|k| *k == TimerKind::EntryReload);
        assert_eq!(seen, vec![TimerKind::RepublishReload, TimerKind::EntryReload]);
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let (mut coord, mut rx) = coordinator();
        coord.schedule_republish_reload("x");
        coord.cancel_all();
        tokio::time::sleep(DELAY * 3).await;
        assert!(rx.try_recv().is_err());
        assert!(!coord.is_pending(TimerKind::RepublishReload));
    }
}
