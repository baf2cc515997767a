//! Native location layer abstraction.
//!
//! The plugin core never talks to CoreLocation or the fused location
//! provider directly. Host bindings implement [`LocationPlatform`] and feed
//! callbacks back as [`PlatformEvent`]s. [`SimPlatform`] is a scripted
//! implementation used by tests and the replay CLI.

pub mod sim;
pub mod types;

pub use sim::{SimPlatform, SimStream};
pub use types::{
    LocationRecord, PermissionRequest, PermissionState, PlatformError, PlatformEvent,
    PlatformFlavor, RawFix, StreamOptions, StreamToken,
};

use chrono::{DateTime, Utc};

/// Calls the core makes into the native location layer.
///
/// All methods are invoked from the single coordinating thread. Results of
/// asynchronous requests (permission prompts, last-known lookups) come back
/// later as [`PlatformEvent`]s.
pub trait LocationPlatform: Send {
    /// Host operating system.
    fn flavor(&self) -> PlatformFlavor;

    /// Clock used for watcher creation times; fixes are stamped by the same clock.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Whether the background location service is bound and usable.
    fn service_available(&self) -> bool {
        true
    }

    /// Whether device-wide location services are switched on.
    fn location_enabled(&self) -> bool;

    fn permission_state(&self) -> PermissionState;

    /// Show a permission prompt. The answer arrives as
    /// [`PlatformEvent::PermissionResult`].
    fn request_permission(&mut self, request: PermissionRequest);

    /// Create the native stream behind `token` without starting it.
    fn create_stream(&mut self, token: StreamToken, options: &StreamOptions);

    fn begin_updates(&mut self, token: StreamToken);

    fn end_updates(&mut self, token: StreamToken);

    /// Release the native stream once it has been stopped.
    fn release_stream(&mut self, token: StreamToken);

    /// Ask for the last known fix. Answered with [`PlatformEvent::LastKnown`].
    fn request_last_known(&mut self, token: StreamToken);

    fn open_settings(&mut self) -> Result<(), PlatformError>;
}
