//! Subscribe request options.

use serde::{Deserialize, Serialize};

/// Options supplied by the caller when adding a watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherOptions {
    /// Remote session document that accepted fixes are appended to
    pub session_id: Option<String>,
    /// Minimum movement in meters between fixes; 0 or absent disables filtering
    pub distance_filter: Option<f64>,
    /// Accept fixes older than the watcher and deliver the last known fix
    pub stale: bool,
    /// Prompt for permission instead of failing when it is missing
    pub request_permissions: bool,
    /// Presence implies background operation
    pub background_message: Option<String>,
    pub background_title: Option<String>,
    /// Overrides the configured what3words key for this watcher
    #[serde(rename = "w3wApiKey")]
    pub w3w_api_key: Option<String>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            distance_filter: None,
            stale: false,
            request_permissions: true,
            background_message: None,
            background_title: None,
            w3w_api_key: None,
        }
    }
}

impl WatcherOptions {
    pub fn wants_background(&self) -> bool {
        self.background_message.is_some()
    }

    /// Distance filter to pass to the platform, `None` meaning every fix.
    pub fn effective_distance_filter(&self) -> Option<f64> {
        self.distance_filter.filter(|d| *d > 0.0)
    }
}
