//! Error types surfaced to plugin callers and subscribers.

use serde::{Deserialize, Serialize};

/// Errors returned by plugin calls or delivered on a subscriber channel.
///
/// Every variant maps to a stable [`code`](PluginError::code) that callers
/// can branch on without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginError {
    /// Location permission is missing, was denied, or was revoked.
    NotAuthorized(String),
    /// The background service is not bound or location services are off.
    ServiceUnavailable(String),
    /// No watcher is registered under the given id.
    NotFound(String),
    /// The request did not carry a watcher id.
    MissingId,
    /// The platform could not show the app's settings screen.
    CannotOpenSettings,
    /// Any other error reported by the native location layer.
    Native(String),
}

impl PluginError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::NotAuthorized(_) => "NOT_AUTHORIZED",
            PluginError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            PluginError::NotFound(_) => "NOT_FOUND",
            PluginError::MissingId => "MISSING_ID",
            PluginError::CannotOpenSettings => "CANNOT_OPEN_SETTINGS",
            PluginError::Native(_) => "NATIVE_ERROR",
        }
    }

    pub(crate) fn permission_denied() -> Self {
        PluginError::NotAuthorized("Permission denied.".to_string())
    }

    pub(crate) fn user_denied() -> Self {
        PluginError::NotAuthorized("User denied location permission".to_string())
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginError::NotAuthorized(msg) => write!(f, "Not authorized: {msg}"),
            PluginError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {msg}"),
            PluginError::NotFound(id) => write!(f, "No watcher found for id '{id}'"),
            PluginError::MissingId => write!(f, "Missing id."),
            PluginError::CannotOpenSettings => write!(f, "Cannot open settings"),
            PluginError::Native(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PluginError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(PluginError::permission_denied().code(), "NOT_AUTHORIZED");
        assert_eq!(PluginError::NotFound("a".into()).code(), "NOT_FOUND");
        assert_eq!(PluginError::MissingId.code(), "MISSING_ID");
        assert_eq!(PluginError::Native("x".into()).code(), "NATIVE_ERROR");
    }

    #[test]
    fn test_native_error_display_is_verbatim() {
        let err = PluginError::Native("kCLErrorNetwork".to_string());
        assert_eq!(err.to_string(), "kCLErrorNetwork");
    }
}
