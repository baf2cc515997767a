//! The plugin surface: subscribe, unsubscribe, open settings, and the
//! entry point for every native callback.
//!
//! `GeolocationPlugin` is not thread-safe by design of the native APIs it
//! drives. Run it on one thread, normally through
//! [`Coordinator`](crate::coordinator::Coordinator).

use crate::config::NotificationDefaults;
use crate::diagnostics::SharedDiagnosticsLog;
use crate::dispatcher::{Dispatch, FixDispatcher};
use crate::error::PluginError;
use crate::forwarder::RemoteLogForwarder;
use crate::notification::BackgroundNotification;
use crate::permission::{GateDecision, PendingSubscribe, PermissionGate};
use crate::platform::{
    LocationPlatform, PermissionRequest, PlatformEvent, PlatformFlavor, StreamOptions,
    StreamToken,
};
use crate::watcher::{Watcher, WatcherEvent, WatcherOptions, WatcherRegistry};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// Result of a successful subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeOutcome {
    /// The watcher exists and is streaming.
    Started,
    /// A permission prompt is on screen; the watcher is created once it is
    /// granted, or the subscriber receives NOT_AUTHORIZED if it is denied.
    AwaitingPermission,
}

pub struct GeolocationPlugin {
    platform: Box<dyn LocationPlatform>,
    registry: WatcherRegistry,
    gate: PermissionGate,
    dispatcher: FixDispatcher,
    forwarder: Option<RemoteLogForwarder>,
    notification_defaults: NotificationDefaults,
    diagnostics: SharedDiagnosticsLog,
}

impl GeolocationPlugin {
    pub fn new(platform: Box<dyn LocationPlatform>, diagnostics: SharedDiagnosticsLog) -> Self {
        Self {
            platform,
            registry: WatcherRegistry::new(),
            gate: PermissionGate::new(),
            dispatcher: FixDispatcher::new(diagnostics.clone()),
            forwarder: None,
            notification_defaults: NotificationDefaults::default(),
            diagnostics,
        }
    }

    /// Forward accepted fixes of watchers with a session id.
    pub fn with_forwarder(mut self, forwarder: RemoteLogForwarder) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn with_notification_defaults(mut self, defaults: NotificationDefaults) -> Self {
        self.notification_defaults = defaults;
        self
    }

    pub fn diagnostics(&self) -> &SharedDiagnosticsLog {
        &self.diagnostics
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    pub fn watcher_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Whether a subscribe request for `id` is waiting on a permission answer.
    pub fn is_pending(&self, id: &str) -> bool {
        self.gate.is_pending(id)
    }

    /// Subscribe `subscriber` to location fixes under `id`.
    pub fn add_watcher(
        &mut self,
        id: &str,
        options: WatcherOptions,
        subscriber: Sender<WatcherEvent>,
    ) -> Result<SubscribeOutcome, PluginError> {
        if id.is_empty() {
            return Err(PluginError::MissingId);
        }
        if !self.platform.service_available() {
            return Err(PluginError::ServiceUnavailable(
                "Service not running.".to_string(),
            ));
        }

        let state = self.platform.permission_state();
        match PermissionGate::evaluate(state, &options) {
            GateDecision::Reject(err) => Err(err),
            GateDecision::RequestAndWait(request) => {
                tracing::debug!(%id, ?request, "watcher waiting for permission");
                let prompt = self.gate.park(PendingSubscribe {
                    id: id.to_string(),
                    options,
                    subscriber,
                });
                if prompt {
                    self.platform.request_permission(request);
                }
                Ok(SubscribeOutcome::AwaitingPermission)
            }
            GateDecision::Proceed => {
                self.ensure_location_enabled()?;
                self.create_and_start(id.to_string(), &options, subscriber);
                Ok(SubscribeOutcome::Started)
            }
            GateDecision::ProceedAndEscalate => {
                self.ensure_location_enabled()?;
                self.create_and_start(id.to_string(), &options, subscriber);
                // The answer arrives later and does not gate this watcher.
                self.platform.request_permission(PermissionRequest::Background);
                Ok(SubscribeOutcome::Started)
            }
        }
    }

    /// Unsubscribe `id`, stopping its stream and closing its channel.
    ///
    /// Running watchers are matched first. Otherwise a request still
    /// waiting on a permission prompt is dropped, and the prompt's answer
    /// will then find nothing to start.
    pub fn remove_watcher(&mut self, id: &str) -> Result<(), PluginError> {
        if id.is_empty() {
            return Err(PluginError::MissingId);
        }
        match self.registry.remove(id, self.platform.as_mut()) {
            Ok(()) => {
                tracing::debug!(%id, "watcher removed");
                Ok(())
            }
            Err(PluginError::NotFound(_)) if self.gate.cancel(id) => {
                tracing::debug!(%id, "pending watcher cancelled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn open_settings(&mut self) -> Result<(), PluginError> {
        self.platform.open_settings().map_err(|e| {
            tracing::warn!("Could not open settings: {}", e);
            PluginError::CannotOpenSettings
        })
    }

    /// Entry point for every native callback.
    pub fn handle_platform_event(&mut self, event: PlatformEvent) -> Dispatch {
        match event {
            PlatformEvent::Fixes { token, fixes } => self.dispatcher.on_fixes(
                &mut self.registry,
                self.platform.as_mut(),
                self.forwarder.as_ref(),
                token,
                &fixes,
            ),
            PlatformEvent::LastKnown { token, fix } => self.dispatcher.on_last_known(
                &mut self.registry,
                self.platform.as_mut(),
                token,
                fix.as_ref(),
            ),
            PlatformEvent::Error { token, error } => {
                self.dispatcher
                    .on_error(&mut self.registry, self.platform.as_mut(), token, &error)
            }
            PlatformEvent::AuthorizationChanged { token, state } => {
                // iOS reports prompt answers through authorization changes.
                if self.platform.flavor() == PlatformFlavor::Ios
                    && state.is_determined()
                    && self.gate.pending_count() > 0
                {
                    self.handle_permission_result(state.is_sufficient());
                }
                let started = self.dispatcher.on_authorization_change(
                    &mut self.registry,
                    self.platform.as_mut(),
                    token,
                    state,
                );
                if started {
                    Dispatch::Delivered
                } else {
                    Dispatch::Ignored
                }
            }
            PlatformEvent::PermissionResult { granted } => {
                self.handle_permission_result(granted);
                Dispatch::Ignored
            }
        }
    }

    /// Apply the answer to a permission prompt.
    pub fn handle_permission_result(&mut self, granted: bool) {
        let approved = self.gate.resolve(granted);
        if !granted {
            return;
        }

        for request in approved {
            if !self.platform.location_enabled() {
                let _ = request
                    .subscriber
                    .send(WatcherEvent::Error(location_disabled()));
                continue;
            }
            self.create_and_start(request.id, &request.options, request.subscriber);
        }
        self.start_all();
    }

    /// The host app moved to the background.
    pub fn on_host_paused(&mut self) {
        self.gate.note_paused(self.platform.permission_state());
    }

    /// The host app returned to the foreground. Watchers are restarted if
    /// permission was granted in the meantime.
    pub fn on_host_resumed(&mut self) {
        if self.gate.granted_while_paused(self.platform.permission_state()) {
            tracing::debug!("permission granted while paused, restarting watchers");
            self.start_all();
        }
    }

    /// Stop every watcher and fail every waiting request.
    pub fn shutdown(&mut self) {
        let stopped = self.registry.drain(self.platform.as_mut());
        let failed = self.gate.fail_all(PluginError::ServiceUnavailable(
            "Plugin shut down".to_string(),
        ));
        tracing::debug!(stopped, failed, "plugin shut down");
    }

    fn ensure_location_enabled(&self) -> Result<(), PluginError> {
        if self.platform.location_enabled() {
            Ok(())
        } else {
            Err(location_disabled())
        }
    }

    fn start_all(&mut self) {
        let platform = self.platform.as_mut();
        for watcher in self.registry.iter_mut() {
            watcher.start(&mut *platform);
        }
    }

    fn create_and_start(
        &mut self,
        id: String,
        options: &WatcherOptions,
        subscriber: Sender<WatcherEvent>,
    ) -> StreamToken {
        let stream = self.registry.allocate_stream();
        let token = stream.token();

        let notification = options.background_message.as_deref().map(|message| {
            BackgroundNotification::new(
                message,
                options.background_title.as_deref(),
                &self.notification_defaults,
            )
        });
        self.platform.create_stream(
            token,
            &StreamOptions {
                distance_filter: options.effective_distance_filter(),
                notification,
            },
        );

        let mut watcher = Watcher::new(
            id,
            stream,
            self.platform.now(),
            options.stale,
            subscriber,
        )
        .with_session(options.session_id.clone(), options.w3w_api_key.clone());
        watcher.start(self.platform.as_mut());
        tracing::debug!(id = %watcher.id(), %token, "watcher started");
        self.registry.add(watcher);

        if options.stale {
            self.platform.request_last_known(token);
        }
        token
    }
}

fn location_disabled() -> PluginError {
    PluginError::ServiceUnavailable("Location services disabled.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::create_shared_log;
    use crate::platform::{PermissionState, RawFix, SimPlatform};
    use crossbeam_channel::unbounded;

    fn plugin() -> (GeolocationPlugin, SimPlatform) {
        let probe = SimPlatform::at_millis(PlatformFlavor::Android, 100).unwrap();
        let plugin = GeolocationPlugin::new(Box::new(probe.clone()), create_shared_log());
        (plugin, probe)
    }

    #[test]
    fn test_add_watcher_starts_stream() {
        let (mut plugin, probe) = plugin();
        let (tx, _rx) = unbounded();

        let outcome = plugin
            .add_watcher("w-1", WatcherOptions::default(), tx)
            .unwrap();

        assert_eq!(outcome, SubscribeOutcome::Started);
        assert_eq!(plugin.watcher_ids(), vec!["w-1".to_string()]);
        assert_eq!(probe.active_streams().len(), 1);
    }

    #[test]
    fn test_empty_id_is_missing() {
        let (mut plugin, _probe) = plugin();
        let (tx, _rx) = unbounded();
        assert_eq!(
            plugin.add_watcher("", WatcherOptions::default(), tx),
            Err(PluginError::MissingId)
        );
        assert_eq!(plugin.remove_watcher(""), Err(PluginError::MissingId));
    }

    #[test]
    fn test_service_unavailable() {
        let (mut plugin, probe) = plugin();
        probe.set_service_available(false);
        let (tx, _rx) = unbounded();
        let err = plugin
            .add_watcher("w", WatcherOptions::default(), tx)
            .unwrap_err();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
        assert!(plugin.registry().is_empty());
    }

    #[test]
    fn test_location_disabled_rejects() {
        let (mut plugin, probe) = plugin();
        probe.set_location_enabled(false);
        let (tx, _rx) = unbounded();
        let err = plugin
            .add_watcher("w", WatcherOptions::default(), tx)
            .unwrap_err();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
        assert!(probe.streams().is_empty());
    }

    #[test]
    fn test_background_message_builds_notification() {
        let (mut plugin, probe) = plugin();
        let (tx, _rx) = unbounded();
        let options = WatcherOptions {
            background_message: Some("Sharing your walk".to_string()),
            distance_filter: Some(50.0),
            ..WatcherOptions::default()
        };
        plugin.add_watcher("w", options, tx).unwrap();

        let (_, stream) = probe.streams().into_iter().next().unwrap();
        assert_eq!(stream.options.distance_filter, Some(50.0));
        let notification = stream.options.notification.unwrap();
        assert_eq!(notification.message, "Sharing your walk");
        assert_eq!(notification.title, "Using your location");
    }

    #[test]
    fn test_stale_subscribe_delivers_last_known() {
        let (mut plugin, probe) = plugin();
        probe.set_last_known(Some(RawFix::at_millis(5.0, 6.0, 10).unwrap()));
        let (tx, rx) = unbounded();
        let options = WatcherOptions {
            stale: true,
            ..WatcherOptions::default()
        };
        plugin.add_watcher("w", options, tx).unwrap();

        for event in probe.take_events() {
            plugin.handle_platform_event(event);
        }
        match rx.try_recv().unwrap() {
            WatcherEvent::Location(record) => assert_eq!(record.time, 10),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_ios_authorization_change_resolves_prompt() {
        let probe = SimPlatform::at_millis(PlatformFlavor::Ios, 0).unwrap();
        probe.set_permission(PermissionState::NotDetermined);
        let mut plugin = GeolocationPlugin::new(Box::new(probe.clone()), create_shared_log());
        let (tx, _rx) = unbounded();

        assert_eq!(
            plugin.add_watcher("w", WatcherOptions::default(), tx),
            Ok(SubscribeOutcome::AwaitingPermission)
        );

        probe.set_permission(PermissionState::ForegroundOnly);
        plugin.handle_platform_event(PlatformEvent::AuthorizationChanged {
            token: StreamToken(0),
            state: PermissionState::ForegroundOnly,
        });

        assert_eq!(plugin.watcher_ids(), vec!["w".to_string()]);
        assert_eq!(probe.active_streams().len(), 1);
    }

    #[test]
    fn test_ios_authorization_denial_fails_pending() {
        let probe = SimPlatform::at_millis(PlatformFlavor::Ios, 0).unwrap();
        probe.set_permission(PermissionState::NotDetermined);
        let mut plugin = GeolocationPlugin::new(Box::new(probe.clone()), create_shared_log());
        let (tx, rx) = unbounded();

        assert_eq!(
            plugin.add_watcher("w", WatcherOptions::default(), tx),
            Ok(SubscribeOutcome::AwaitingPermission)
        );

        probe.set_permission(PermissionState::Denied);
        plugin.handle_platform_event(PlatformEvent::AuthorizationChanged {
            token: StreamToken(0),
            state: PermissionState::Denied,
        });

        match rx.recv().unwrap() {
            WatcherEvent::Error(err) => assert_eq!(err.code(), "NOT_AUTHORIZED"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.recv().is_err());
        assert!(!plugin.is_pending("w"));
        assert!(plugin.registry().is_empty());
        assert!(probe.streams().is_empty());
    }

    #[test]
    fn test_android_waits_for_permission_result() {
        let (mut plugin, probe) = plugin();
        probe.set_permission(PermissionState::NotDetermined);
        let (tx, _rx) = unbounded();
        plugin.add_watcher("w", WatcherOptions::default(), tx).unwrap();

        probe.set_permission(PermissionState::Full);
        plugin.handle_platform_event(PlatformEvent::AuthorizationChanged {
            token: StreamToken(0),
            state: PermissionState::Full,
        });
        assert!(plugin.is_pending("w"));
        assert!(plugin.registry().is_empty());

        plugin.handle_platform_event(PlatformEvent::PermissionResult { granted: true });
        assert!(!plugin.is_pending("w"));
        assert_eq!(plugin.watcher_ids(), vec!["w".to_string()]);
    }

    #[test]
    fn test_remove_prefers_running_watcher_over_pending() {
        let (mut plugin, probe) = plugin();
        let (running_tx, running_rx) = unbounded();
        plugin
            .add_watcher("dup", WatcherOptions::default(), running_tx)
            .unwrap();
        let token = *probe.streams().keys().next().unwrap();

        probe.set_permission(PermissionState::NotDetermined);
        let (pending_tx, pending_rx) = unbounded();
        assert_eq!(
            plugin.add_watcher("dup", WatcherOptions::default(), pending_tx),
            Ok(SubscribeOutcome::AwaitingPermission)
        );

        plugin.remove_watcher("dup").unwrap();
        assert!(plugin.registry().is_empty());
        assert!(probe.active_streams().is_empty());
        assert!(probe.stream(token).unwrap().released);
        assert!(running_rx.recv().is_err());
        assert!(plugin.is_pending("dup"));

        plugin.remove_watcher("dup").unwrap();
        assert!(!plugin.is_pending("dup"));
        assert!(pending_rx.recv().is_err());
        assert_eq!(
            plugin.remove_watcher("dup"),
            Err(PluginError::NotFound("dup".to_string()))
        );
    }

    #[test]
    fn test_resume_restarts_after_settings_grant() {
        let (mut plugin, probe) = plugin();
        let (tx, _rx) = unbounded();
        plugin.add_watcher("w", WatcherOptions::default(), tx).unwrap();
        let token = *probe.streams().keys().next().unwrap();

        plugin.handle_platform_event(PlatformEvent::Error {
            token,
            error: crate::platform::PlatformError::Other("interrupted".to_string()),
        });
        probe.set_permission(PermissionState::Denied);
        plugin.on_host_paused();
        probe.set_permission(PermissionState::Full);
        plugin.on_host_resumed();

        // Already streaming, so no redundant begin call.
        assert_eq!(probe.stream(token).unwrap().begin_calls, 1);
    }

    #[test]
    fn test_open_settings() {
        let (mut plugin, probe) = plugin();
        assert!(plugin.open_settings().is_ok());
        assert_eq!(probe.settings_opened(), 1);

        probe.set_settings_available(false);
        assert_eq!(plugin.open_settings(), Err(PluginError::CannotOpenSettings));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (mut plugin, probe) = plugin();
        let (tx, rx) = unbounded();
        plugin.add_watcher("w", WatcherOptions::default(), tx).unwrap();

        probe.set_permission(PermissionState::NotDetermined);
        let (pending_tx, pending_rx) = unbounded();
        plugin
            .add_watcher("p", WatcherOptions::default(), pending_tx)
            .unwrap();

        plugin.shutdown();

        assert!(plugin.registry().is_empty());
        assert!(!plugin.is_pending("p"));
        assert!(probe.active_streams().is_empty());
        assert!(rx.recv().is_err());
        assert!(matches!(pending_rx.recv(), Ok(WatcherEvent::Error(_))));
    }
}
