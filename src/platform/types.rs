//! Data exchanged with the native location layer.
//!
//! Native APIs report readings with capability flags (Android) or sentinel
//! negative values (iOS). Both shapes are normalized into [`RawFix`] with
//! optional fields, then formatted into the canonical [`LocationRecord`].

use crate::notification::BackgroundNotification;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Opaque token identifying one native location stream.
///
/// Tokens are allocated by the registry and never reused, so a callback
/// carrying a token for a removed watcher simply resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamToken(pub u64);

impl std::fmt::Display for StreamToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Which host operating system the plugin is running inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFlavor {
    #[default]
    Android,
    Ios,
}

/// Coarse location authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    NotDetermined,
    Denied,
    Restricted,
    /// Granted while the app is in use only.
    ForegroundOnly,
    /// Granted including background use.
    Full,
}

impl PermissionState {
    /// Whether a watcher may run at all in this state.
    pub fn is_sufficient(self) -> bool {
        matches!(self, PermissionState::ForegroundOnly | PermissionState::Full)
    }

    /// Whether the user has made a decision yet.
    pub fn is_determined(self) -> bool {
        self != PermissionState::NotDetermined
    }
}

/// Which permission prompt to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionRequest {
    Foreground,
    Background,
}

/// Errors reported by the native location layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum PlatformError {
    /// The sensor has no fix yet; retried by the platform on its own.
    NoFixYet,
    /// The user revoked or denied location access.
    PermissionDenied,
    /// Device-wide location services are switched off.
    LocationDisabled,
    Other(String),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::NoFixYet => write!(f, "No location fix available yet"),
            PlatformError::PermissionDenied => write!(f, "Location permission denied"),
            PlatformError::LocationDisabled => write!(f, "Location services disabled"),
            PlatformError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Parameters for creating one native stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    /// Minimum movement in meters between fixes; `None` means every fix.
    pub distance_filter: Option<f64>,
    /// Present when the stream must keep running in the background.
    pub notification: Option<BackgroundNotification>,
}

/// A single reading as reported by the native layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub altitude_accuracy: Option<f64>,
    #[serde(default)]
    pub simulated: bool,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RawFix {
    /// A fix with only a position and timestamp.
    pub fn at(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            altitude: None,
            altitude_accuracy: None,
            simulated: false,
            speed: None,
            bearing: None,
            timestamp,
        }
    }

    /// A fix timestamped `millis` after the Unix epoch, or `None` if that
    /// instant is out of range.
    pub fn at_millis(latitude: f64, longitude: f64, millis: i64) -> Option<Self> {
        let timestamp = Utc.timestamp_millis_opt(millis).single()?;
        Some(Self::at(latitude, longitude, timestamp))
    }
}

/// Canonical record delivered to subscribers for every accepted fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub altitude_accuracy: Option<f64>,
    pub simulated: bool,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
}

impl From<&RawFix> for LocationRecord {
    fn from(fix: &RawFix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: non_negative(fix.accuracy),
            altitude: fix.altitude,
            altitude_accuracy: non_negative(fix.altitude_accuracy),
            simulated: fix.simulated,
            speed: non_negative(fix.speed),
            bearing: non_negative(fix.bearing),
            time: fix.timestamp.timestamp_millis(),
        }
    }
}

// Negative values are the native "unavailable" sentinel.
fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v >= 0.0 && v.is_finite())
}

/// Callbacks raised by the native layer, marshaled onto the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// One or more new fixes for a stream; only the last one counts.
    Fixes { token: StreamToken, fixes: Vec<RawFix> },
    /// Result of a last-known-location request made for a stale subscribe.
    LastKnown { token: StreamToken, fix: Option<RawFix> },
    /// The stream's location manager failed.
    Error { token: StreamToken, error: PlatformError },
    /// The authorization state seen by a stream's location manager changed.
    AuthorizationChanged { token: StreamToken, state: PermissionState },
    /// The user answered a permission prompt.
    PermissionResult { granted: bool },
}
