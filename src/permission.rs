//! Permission gate for subscribe requests.
//!
//! Decides whether a watcher can start right away, must wait for the user
//! to answer a prompt, or must be refused. Requests waiting on a prompt are
//! parked here, outside the registry, so an unsubscribe before the answer
//! simply removes them and the late answer finds nothing to revive.

use crate::error::PluginError;
use crate::platform::{PermissionRequest, PermissionState};
use crate::watcher::{WatcherEvent, WatcherOptions};
use crossbeam_channel::Sender;

/// What to do with a subscribe request given the current permission state.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Permission is sufficient; create and start the watcher.
    Proceed,
    /// Start the watcher now and ask for background access without waiting.
    ProceedAndEscalate,
    /// Show this prompt and park the request until the answer arrives.
    RequestAndWait(PermissionRequest),
    /// Refuse the request.
    Reject(PluginError),
}

/// A subscribe request waiting for a permission answer.
#[derive(Debug)]
pub struct PendingSubscribe {
    pub id: String,
    pub options: WatcherOptions,
    pub subscriber: Sender<WatcherEvent>,
}

#[derive(Debug, Default)]
pub struct PermissionGate {
    pending: Vec<PendingSubscribe>,
    prompt_outstanding: bool,
    paused_without_permission: bool,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a subscribe request against the current permission state.
    pub fn evaluate(state: PermissionState, options: &WatcherOptions) -> GateDecision {
        match state {
            PermissionState::NotDetermined
            | PermissionState::Denied
            | PermissionState::Restricted => {
                if !options.request_permissions {
                    GateDecision::Reject(PluginError::permission_denied())
                } else if options.wants_background() {
                    GateDecision::RequestAndWait(PermissionRequest::Background)
                } else {
                    GateDecision::RequestAndWait(PermissionRequest::Foreground)
                }
            }
            PermissionState::ForegroundOnly if options.wants_background() => {
                GateDecision::ProceedAndEscalate
            }
            PermissionState::ForegroundOnly | PermissionState::Full => GateDecision::Proceed,
        }
    }

    /// Park a request. Returns true if the caller must show the prompt;
    /// false if a prompt is already on screen and its answer will cover
    /// this request too.
    pub fn park(&mut self, request: PendingSubscribe) -> bool {
        self.pending.push(request);
        if self.prompt_outstanding {
            false
        } else {
            self.prompt_outstanding = true;
            true
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|p| p.id == id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop the first parked request for `id`, closing its channel.
    /// Returns false if none matched.
    pub fn cancel(&mut self, id: &str) -> bool {
        let Some(index) = self.pending.iter().position(|p| p.id == id) else {
            return false;
        };
        self.pending.remove(index);
        if self.pending.is_empty() {
            self.prompt_outstanding = false;
        }
        true
    }

    /// Apply the user's answer.
    ///
    /// On denial every parked request is failed with NOT_AUTHORIZED and
    /// nothing is returned. On grant the parked requests are handed back so
    /// the caller can create their watchers.
    pub fn resolve(&mut self, granted: bool) -> Vec<PendingSubscribe> {
        self.prompt_outstanding = false;
        let parked = std::mem::take(&mut self.pending);
        if granted {
            return parked;
        }
        for request in parked {
            tracing::debug!(id = %request.id, "permission denied for pending watcher");
            let _ = request
                .subscriber
                .send(WatcherEvent::Error(PluginError::user_denied()));
        }
        Vec::new()
    }

    /// Fail every parked request with `error`. Used on teardown.
    pub fn fail_all(&mut self, error: PluginError) -> usize {
        self.prompt_outstanding = false;
        let parked = std::mem::take(&mut self.pending);
        let count = parked.len();
        for request in parked {
            let _ = request.subscriber.send(WatcherEvent::Error(error.clone()));
        }
        count
    }

    /// Remember whether the host went to the background without permission.
    pub fn note_paused(&mut self, state: PermissionState) {
        self.paused_without_permission = !state.is_sufficient();
    }

    /// On resume, report whether permission was granted while the host was
    /// away (for instance from the settings screen).
    pub fn granted_while_paused(&mut self, state: PermissionState) -> bool {
        let granted = self.paused_without_permission && state.is_sufficient();
        if granted {
            self.paused_without_permission = false;
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn background() -> WatcherOptions {
        WatcherOptions {
            background_message: Some("Tracking".to_string()),
            ..WatcherOptions::default()
        }
    }

    #[test]
    fn test_undetermined_requests_matching_prompt() {
        assert_eq!(
            PermissionGate::evaluate(PermissionState::NotDetermined, &WatcherOptions::default()),
            GateDecision::RequestAndWait(PermissionRequest::Foreground)
        );
        assert_eq!(
            PermissionGate::evaluate(PermissionState::Denied, &background()),
            GateDecision::RequestAndWait(PermissionRequest::Background)
        );
    }

    #[test]
    fn test_opted_out_is_rejected() {
        let options = WatcherOptions {
            request_permissions: false,
            ..WatcherOptions::default()
        };
        match PermissionGate::evaluate(PermissionState::Restricted, &options) {
            GateDecision::Reject(err) => assert_eq!(err.code(), "NOT_AUTHORIZED"),
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_foreground_only_escalates_for_background() {
        assert_eq!(
            PermissionGate::evaluate(PermissionState::ForegroundOnly, &background()),
            GateDecision::ProceedAndEscalate
        );
        assert_eq!(
            PermissionGate::evaluate(PermissionState::ForegroundOnly, &WatcherOptions::default()),
            GateDecision::Proceed
        );
        assert_eq!(
            PermissionGate::evaluate(PermissionState::Full, &background()),
            GateDecision::Proceed
        );
    }

    #[test]
    fn test_one_prompt_for_concurrent_requests() {
        let mut gate = PermissionGate::new();
        let (tx, _rx) = unbounded();
        assert!(gate.park(PendingSubscribe {
            id: "a".into(),
            options: WatcherOptions::default(),
            subscriber: tx.clone(),
        }));
        assert!(!gate.park(PendingSubscribe {
            id: "b".into(),
            options: WatcherOptions::default(),
            subscriber: tx,
        }));
        assert_eq!(gate.resolve(true).len(), 2);
        assert_eq!(gate.pending_count(), 0);
    }

    #[test]
    fn test_denial_fails_parked_requests() {
        let mut gate = PermissionGate::new();
        let (tx, rx) = unbounded();
        gate.park(PendingSubscribe {
            id: "a".into(),
            options: WatcherOptions::default(),
            subscriber: tx,
        });

        assert!(gate.resolve(false).is_empty());
        match rx.recv().unwrap() {
            WatcherEvent::Error(err) => assert_eq!(err.code(), "NOT_AUTHORIZED"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_cancelled_request_is_not_revived() {
        let mut gate = PermissionGate::new();
        let (tx, rx) = unbounded();
        gate.park(PendingSubscribe {
            id: "a".into(),
            options: WatcherOptions::default(),
            subscriber: tx,
        });

        assert!(gate.cancel("a"));
        assert!(!gate.cancel("a"));
        assert!(gate.resolve(true).is_empty());
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_cancel_drops_first_match_only() {
        let mut gate = PermissionGate::new();
        let (first_tx, first_rx) = unbounded();
        let (second_tx, second_rx) = unbounded();
        for subscriber in [first_tx, second_tx] {
            gate.park(PendingSubscribe {
                id: "dup".into(),
                options: WatcherOptions::default(),
                subscriber,
            });
        }

        assert!(gate.cancel("dup"));
        assert!(first_rx.recv().is_err());
        assert!(gate.is_pending("dup"));

        let approved = gate.resolve(true);
        assert_eq!(approved.len(), 1);
        drop(approved);
        assert!(second_rx.recv().is_err());
    }

    #[test]
    fn test_granted_while_paused() {
        let mut gate = PermissionGate::new();
        gate.note_paused(PermissionState::Denied);
        assert!(!gate.granted_while_paused(PermissionState::Denied));
        assert!(gate.granted_while_paused(PermissionState::Full));
        assert!(!gate.granted_while_paused(PermissionState::Full));
    }
}
