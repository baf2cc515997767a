//! Routing of native callbacks to their watchers.
//!
//! Every callback carries the [`StreamToken`] of the stream that raised it.
//! The dispatcher resolves the token in the registry, applies the watcher's
//! validity policy and delivers to the subscriber. Callbacks for tokens that
//! no longer resolve are dropped without a trace beyond the counters.

use crate::diagnostics::SharedDiagnosticsLog;
use crate::error::PluginError;
use crate::forwarder::{ForwardRequest, GeoPoint, RemoteLogForwarder};
use crate::platform::{
    LocationPlatform, LocationRecord, PermissionState, PlatformError, RawFix, StreamToken,
};
use crate::watcher::{WatcherEvent, WatcherRegistry};

/// What happened to one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// Empty fix batch.
    Empty,
    /// No watcher owns the stream.
    Unmapped,
    /// The fix predates the watcher.
    Stale,
    /// Transient condition swallowed on purpose.
    Ignored,
    /// The subscriber went away; its watcher was stopped and removed.
    SubscriberGone,
    /// The watcher was stopped and removed after a permission failure.
    Revoked,
}

pub struct FixDispatcher {
    diagnostics: SharedDiagnosticsLog,
}

impl FixDispatcher {
    pub fn new(diagnostics: SharedDiagnosticsLog) -> Self {
        Self { diagnostics }
    }

    /// Handle a batch of new fixes. Only the most recent one is current.
    pub fn on_fixes(
        &self,
        registry: &mut WatcherRegistry,
        platform: &mut dyn LocationPlatform,
        forwarder: Option<&RemoteLogForwarder>,
        token: StreamToken,
        fixes: &[RawFix],
    ) -> Dispatch {
        self.diagnostics.record_fixes_received();

        let Some(fix) = fixes.last() else {
            return Dispatch::Empty;
        };

        let Some(watcher) = registry.find_by_token(token) else {
            self.diagnostics.record_unmapped_dropped();
            return Dispatch::Unmapped;
        };

        if !watcher.is_valid(fix) {
            self.diagnostics.record_stale_dropped();
            return Dispatch::Stale;
        }

        let delivered = watcher.deliver(WatcherEvent::Location(LocationRecord::from(fix)));
        let forward = watcher.session_id().map(|session_id| ForwardRequest {
            session_id: session_id.to_string(),
            point: GeoPoint {
                latitude: fix.latitude,
                longitude: fix.longitude,
            },
            address_key: watcher.address_key().map(str::to_string),
        });

        if !delivered {
            return self.subscriber_gone(registry, platform, token);
        }
        self.diagnostics.record_fix_delivered();

        if let (Some(forwarder), Some(request)) = (forwarder, forward) {
            // Detached, nothing flows back.
            let _ = forwarder.forward(request);
        }

        Dispatch::Delivered
    }

    /// Deliver the last known fix requested by a stale subscribe.
    ///
    /// The subscriber explicitly asked for an old reading, so the staleness
    /// check does not apply.
    pub fn on_last_known(
        &self,
        registry: &mut WatcherRegistry,
        platform: &mut dyn LocationPlatform,
        token: StreamToken,
        fix: Option<&RawFix>,
    ) -> Dispatch {
        let Some(fix) = fix else {
            return Dispatch::Empty;
        };
        let Some(watcher) = registry.find_by_token(token) else {
            return Dispatch::Unmapped;
        };
        if !watcher.deliver(WatcherEvent::Location(LocationRecord::from(fix))) {
            return self.subscriber_gone(registry, platform, token);
        }
        self.diagnostics.record_fix_delivered();
        Dispatch::Delivered
    }

    /// Handle a stream failure.
    ///
    /// A permission failure stops and removes the watcher. Any other error
    /// is passed to the subscriber and the watcher keeps running, so it can
    /// still deliver later fixes.
    pub fn on_error(
        &self,
        registry: &mut WatcherRegistry,
        platform: &mut dyn LocationPlatform,
        token: StreamToken,
        error: &PlatformError,
    ) -> Dispatch {
        if *error == PlatformError::NoFixYet {
            return Dispatch::Ignored;
        }

        let Some(watcher) = registry.find_by_token(token) else {
            return Dispatch::Unmapped;
        };

        let event = match error {
            PlatformError::PermissionDenied => {
                watcher.deliver(WatcherEvent::Error(PluginError::permission_denied()));
                registry.remove_by_token(token, platform);
                self.diagnostics.record_permission_denial();
                return Dispatch::Revoked;
            }
            PlatformError::LocationDisabled => PluginError::ServiceUnavailable(error.to_string()),
            other => PluginError::Native(other.to_string()),
        };

        self.diagnostics.record_native_error();
        if watcher.deliver(WatcherEvent::Error(event)) {
            Dispatch::Delivered
        } else {
            self.subscriber_gone(registry, platform, token)
        }
    }

    /// Start the watcher behind `token` once the user has decided and
    /// permission is sufficient. Returns true if a stream was started.
    pub fn on_authorization_change(
        &self,
        registry: &mut WatcherRegistry,
        platform: &mut dyn LocationPlatform,
        token: StreamToken,
        state: PermissionState,
    ) -> bool {
        if !state.is_determined() || !state.is_sufficient() {
            return false;
        }
        registry
            .find_by_token_mut(token)
            .map(|watcher| watcher.start(platform))
            .unwrap_or(false)
    }

    /// The subscriber's receiver is gone; stop and drop its watcher.
    fn subscriber_gone(
        &self,
        registry: &mut WatcherRegistry,
        platform: &mut dyn LocationPlatform,
        token: StreamToken,
    ) -> Dispatch {
        if let Some(id) = registry.remove_by_token(token, platform) {
            tracing::debug!(%id, "subscriber closed, watcher stopped");
        }
        Dispatch::SubscriberGone
    }
}
