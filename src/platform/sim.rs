//! Scripted in-process location platform.
//!
//! `SimPlatform` records every call the core makes and lets the driver
//! control permission state, the clock and device settings. Clones share
//! state, so a test can keep one clone as a probe after moving the other
//! into the plugin.

use super::types::{
    PermissionRequest, PermissionState, PlatformError, PlatformEvent, PlatformFlavor, RawFix,
    StreamOptions, StreamToken,
};
use super::LocationPlatform;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Recorded state of one simulated native stream.
#[derive(Debug, Clone, Default)]
pub struct SimStream {
    pub options: StreamOptions,
    pub streaming: bool,
    pub begin_calls: u32,
    pub end_calls: u32,
    pub released: bool,
}

#[derive(Debug)]
struct SimState {
    flavor: PlatformFlavor,
    now: DateTime<Utc>,
    service_available: bool,
    location_enabled: bool,
    permission: PermissionState,
    permission_requests: Vec<PermissionRequest>,
    streams: BTreeMap<StreamToken, SimStream>,
    last_known: Option<RawFix>,
    outbox: Vec<PlatformEvent>,
    settings_available: bool,
    settings_opened: u32,
}

/// A location platform driven entirely by the caller.
#[derive(Debug, Clone)]
pub struct SimPlatform {
    state: Arc<Mutex<SimState>>,
}

impl SimPlatform {
    /// Create a platform with full permission and the clock at `now`.
    pub fn new(flavor: PlatformFlavor, now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                flavor,
                now,
                service_available: true,
                location_enabled: true,
                permission: PermissionState::Full,
                permission_requests: Vec::new(),
                streams: BTreeMap::new(),
                last_known: None,
                outbox: Vec::new(),
                settings_available: true,
                settings_opened: 0,
            })),
        }
    }

    /// Create a platform whose clock reads `millis` after the Unix epoch,
    /// or `None` if that instant is out of range.
    pub fn at_millis(flavor: PlatformFlavor, millis: i64) -> Option<Self> {
        let now = Utc.timestamp_millis_opt(millis).single()?;
        Some(Self::new(flavor, now))
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_permission(&self, state: PermissionState) {
        self.lock().permission = state;
    }

    pub fn set_location_enabled(&self, enabled: bool) {
        self.lock().location_enabled = enabled;
    }

    pub fn set_service_available(&self, available: bool) {
        self.lock().service_available = available;
    }

    pub fn set_settings_available(&self, available: bool) {
        self.lock().settings_available = available;
    }

    /// Fix returned by the next last-known request.
    pub fn set_last_known(&self, fix: Option<RawFix>) {
        self.lock().last_known = fix;
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.lock().now = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.now += by;
    }

    /// Permission prompts shown so far, oldest first.
    pub fn permission_requests(&self) -> Vec<PermissionRequest> {
        self.lock().permission_requests.clone()
    }

    pub fn stream(&self, token: StreamToken) -> Option<SimStream> {
        self.lock().streams.get(&token).cloned()
    }

    pub fn streams(&self) -> BTreeMap<StreamToken, SimStream> {
        self.lock().streams.clone()
    }

    /// Tokens of streams that are currently delivering updates.
    pub fn active_streams(&self) -> Vec<StreamToken> {
        self.lock()
            .streams
            .iter()
            .filter(|(_, s)| s.streaming)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn settings_opened(&self) -> u32 {
        self.lock().settings_opened
    }

    /// Drain callbacks the platform has queued for the core.
    pub fn take_events(&self) -> Vec<PlatformEvent> {
        std::mem::take(&mut self.lock().outbox)
    }
}

impl LocationPlatform for SimPlatform {
    fn flavor(&self) -> PlatformFlavor {
        self.lock().flavor
    }

    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn service_available(&self) -> bool {
        self.lock().service_available
    }

    fn location_enabled(&self) -> bool {
        self.lock().location_enabled
    }

    fn permission_state(&self) -> PermissionState {
        self.lock().permission
    }

    fn request_permission(&mut self, request: PermissionRequest) {
        self.lock().permission_requests.push(request);
    }

    fn create_stream(&mut self, token: StreamToken, options: &StreamOptions) {
        self.lock().streams.insert(
            token,
            SimStream {
                options: options.clone(),
                ..SimStream::default()
            },
        );
    }

    fn begin_updates(&mut self, token: StreamToken) {
        if let Some(stream) = self.lock().streams.get_mut(&token) {
            stream.begin_calls += 1;
            stream.streaming = true;
        }
    }

    fn end_updates(&mut self, token: StreamToken) {
        if let Some(stream) = self.lock().streams.get_mut(&token) {
            stream.end_calls += 1;
            stream.streaming = false;
        }
    }

    fn release_stream(&mut self, token: StreamToken) {
        if let Some(stream) = self.lock().streams.get_mut(&token) {
            stream.released = true;
        }
    }

    fn request_last_known(&mut self, token: StreamToken) {
        let mut state = self.lock();
        let fix = state.last_known.clone();
        state.outbox.push(PlatformEvent::LastKnown { token, fix });
    }

    fn open_settings(&mut self) -> Result<(), PlatformError> {
        let mut state = self.lock();
        if !state.settings_available {
            return Err(PlatformError::Other("No settings activity".to_string()));
        }
        state.settings_opened += 1;
        Ok(())
    }
}
