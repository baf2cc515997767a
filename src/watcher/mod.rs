//! Watchers: one native location stream per subscription.

pub mod options;
pub mod registry;

pub use options::WatcherOptions;
pub use registry::WatcherRegistry;

use crate::error::PluginError;
use crate::platform::{LocationPlatform, LocationRecord, RawFix, StreamToken};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// Something delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WatcherEvent {
    Location(LocationRecord),
    Error(PluginError),
}

/// Exclusive ownership of one native stream.
///
/// Not `Clone`: only the owning watcher can stop its stream.
#[derive(Debug, PartialEq, Eq)]
pub struct NativeStream {
    token: StreamToken,
}

impl NativeStream {
    pub(crate) fn new(token: StreamToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> StreamToken {
        self.token
    }
}

/// An active location subscription and its filtering policy.
#[derive(Debug)]
pub struct Watcher {
    id: String,
    created_at: DateTime<Utc>,
    allow_stale: bool,
    is_streaming: bool,
    stream: NativeStream,
    subscriber: Sender<WatcherEvent>,
    session_id: Option<String>,
    address_key: Option<String>,
}

impl Watcher {
    pub fn new(
        id: impl Into<String>,
        stream: NativeStream,
        created_at: DateTime<Utc>,
        allow_stale: bool,
        subscriber: Sender<WatcherEvent>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            allow_stale,
            is_streaming: false,
            stream,
            subscriber,
            session_id: None,
            address_key: None,
        }
    }

    /// Attach the remote session this watcher's fixes are logged to.
    pub fn with_session(mut self, session_id: Option<String>, address_key: Option<String>) -> Self {
        self.session_id = session_id;
        self.address_key = address_key;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn allow_stale(&self) -> bool {
        self.allow_stale
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn token(&self) -> StreamToken {
        self.stream.token()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn address_key(&self) -> Option<&str> {
        self.address_key.as_deref()
    }

    /// Begin streaming. Returns false if the watcher was already streaming,
    /// in which case the platform is not called.
    pub fn start(&mut self, platform: &mut dyn LocationPlatform) -> bool {
        if self.is_streaming {
            return false;
        }
        platform.begin_updates(self.stream.token());
        self.is_streaming = true;
        true
    }

    /// Stop streaming. Returns false if the watcher was not streaming.
    pub fn stop(&mut self, platform: &mut dyn LocationPlatform) -> bool {
        if !self.is_streaming {
            return false;
        }
        platform.end_updates(self.stream.token());
        self.is_streaming = false;
        true
    }

    /// Whether `fix` may be surfaced to the subscriber.
    pub fn is_valid(&self, fix: &RawFix) -> bool {
        self.allow_stale || fix.timestamp >= self.created_at
    }

    /// Send an event to the subscriber. Returns false if the receiver is gone.
    pub fn deliver(&self, event: WatcherEvent) -> bool {
        self.subscriber.send(event).is_ok()
    }

    /// Stop the stream and hand it back to the platform, closing the
    /// subscriber channel.
    pub(crate) fn release(mut self, platform: &mut dyn LocationPlatform) {
        self.stop(platform);
        platform.release_stream(self.stream.token());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformFlavor, SimPlatform, StreamOptions};
    use crossbeam_channel::unbounded;

    fn watcher_at(platform: &mut SimPlatform, created_millis: i64, allow_stale: bool) -> Watcher {
        let token = StreamToken(1);
        platform.create_stream(token, &StreamOptions::default());
        let (tx, _rx) = unbounded();
        let created_at = RawFix::at_millis(0.0, 0.0, created_millis).unwrap().timestamp;
        Watcher::new("w-1", NativeStream::new(token), created_at, allow_stale, tx)
    }

    #[test]
    fn test_double_start_begins_once() {
        let mut platform = SimPlatform::at_millis(PlatformFlavor::Ios, 0).unwrap();
        let mut watcher = watcher_at(&mut platform, 0, false);

        assert!(watcher.start(&mut platform));
        assert!(!watcher.start(&mut platform));

        assert_eq!(platform.stream(StreamToken(1)).unwrap().begin_calls, 1);
        assert!(watcher.is_streaming());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut platform = SimPlatform::at_millis(PlatformFlavor::Ios, 0).unwrap();
        let mut watcher = watcher_at(&mut platform, 0, false);

        assert!(!watcher.stop(&mut platform));
        watcher.start(&mut platform);
        assert!(watcher.stop(&mut platform));
        assert!(!watcher.stop(&mut platform));

        assert_eq!(platform.stream(StreamToken(1)).unwrap().end_calls, 1);
    }

    #[test]
    fn test_staleness_cutoff() {
        let mut platform = SimPlatform::at_millis(PlatformFlavor::Android, 0).unwrap();
        let watcher = watcher_at(&mut platform, 100, false);

        assert!(!watcher.is_valid(&RawFix::at_millis(0.0, 0.0, 90).unwrap()));
        assert!(watcher.is_valid(&RawFix::at_millis(0.0, 0.0, 100).unwrap()));
        assert!(watcher.is_valid(&RawFix::at_millis(0.0, 0.0, 110).unwrap()));
    }

    #[test]
    fn test_allow_stale_accepts_everything() {
        let mut platform = SimPlatform::at_millis(PlatformFlavor::Android, 0).unwrap();
        let watcher = watcher_at(&mut platform, 100, true);

        assert!(watcher.is_valid(&RawFix::at_millis(0.0, 0.0, 1).unwrap()));
    }

    #[test]
    fn test_release_stops_and_closes_channel() {
        let mut platform = SimPlatform::at_millis(PlatformFlavor::Android, 0).unwrap();
        platform.create_stream(StreamToken(4), &StreamOptions::default());
        let (tx, rx) = unbounded();
        let mut watcher = Watcher::new(
            "w-4",
            NativeStream::new(StreamToken(4)),
            platform.now(),
            false,
            tx,
        );
        watcher.start(&mut platform);
        watcher.release(&mut platform);

        let stream = platform.stream(StreamToken(4)).unwrap();
        assert!(!stream.streaming);
        assert!(stream.released);
        assert!(rx.recv().is_err());
    }
}
