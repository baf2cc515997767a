//! Background Geolocation - watcher lifecycle core for a mobile location plugin.
//!
//! This library manages location subscriptions ("watchers") on behalf of a
//! host app runtime. Native sensor access and OS permission prompts stay
//! with the host; the core decides when streams start and stop, which fixes
//! reach subscribers, and which fixes are logged to a remote session.
//!
//! # Guarantees
//!
//! - **One stream per watcher**: each watcher owns exactly one native stream,
//!   started at most once and always stopped before it is dropped
//! - **No stale fixes**: unless a subscriber opts in, fixes older than the
//!   watcher are never delivered
//! - **Delivery first**: remote logging runs detached and can never block or
//!   suppress delivery to the subscriber
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Coordinator (single thread)                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐    ┌────────────┐    ┌────────────┐             │
//! │  │ Permission │───▶│  Watcher   │◀───│    Fix     │◀── native   │
//! │  │    Gate    │    │  Registry  │    │ Dispatcher │    callbacks│
//! │  └────────────┘    └────────────┘    └─────┬──────┘             │
//! │                                            │                    │
//! │                                            ▼                    │
//! │                subscriber channel + Remote Log Forwarder        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use background_geolocation::{
//!     create_shared_log, Coordinator, GeolocationPlugin, PlatformFlavor, SimPlatform,
//!     WatcherOptions,
//! };
//!
//! let platform = SimPlatform::new(PlatformFlavor::Android, chrono::Utc::now());
//! let plugin = GeolocationPlugin::new(Box::new(platform), create_shared_log());
//! let coordinator = Coordinator::spawn(plugin).expect("Failed to start coordinator");
//!
//! let subscription = coordinator
//!     .handle()
//!     .add_watcher("watcher-1", WatcherOptions::default())
//!     .expect("Failed to add watcher");
//!
//! // Fixes and errors arrive on subscription.events
//! ```

pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod notification;
pub mod permission;
pub mod platform;
pub mod plugin;
pub mod watcher;

// Re-export key types at crate root for convenience
pub use config::{ConfigError, PluginConfig};
pub use coordinator::{Coordinator, CoordinatorHandle, PlatformEventSink, Subscription};
pub use diagnostics::{create_shared_log, DiagnosticsLog, DiagnosticsStats, SharedDiagnosticsLog};
pub use dispatcher::{Dispatch, FixDispatcher};
pub use error::PluginError;
pub use forwarder::{
    AddressLookup, ForwardError, ForwardRequest, RemoteLogForwarder, SessionStore, SessionUpdate,
};
pub use permission::{GateDecision, PermissionGate};
pub use platform::{
    LocationPlatform, LocationRecord, PermissionRequest, PermissionState, PlatformError,
    PlatformEvent, PlatformFlavor, RawFix, SimPlatform, StreamToken,
};
pub use plugin::{GeolocationPlugin, SubscribeOutcome};
pub use watcher::{Watcher, WatcherEvent, WatcherOptions, WatcherRegistry};

// HTTP-backed collaborators (when enabled)
#[cfg(feature = "remote")]
pub use forwarder::{FirestoreStore, What3WordsClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
