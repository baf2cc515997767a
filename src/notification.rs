//! Descriptor for the persistent notification that keeps a background
//! stream alive on Android.
//!
//! The core only decides *whether* a notification is needed and what it
//! says; the host binding turns the descriptor into a real notification.

use crate::config::NotificationDefaults;
use serde::{Deserialize, Serialize};

/// What the host should show while a background stream is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundNotification {
    pub title: String,
    pub message: String,
    /// Ongoing notifications cannot be swiped away.
    pub ongoing: bool,
    pub channel_id: String,
    pub channel_name: String,
}

impl BackgroundNotification {
    /// Build a descriptor from the subscriber's message and optional title.
    pub fn new(message: &str, title: Option<&str>, defaults: &NotificationDefaults) -> Self {
        Self {
            title: title.unwrap_or(&defaults.title).to_string(),
            message: message.to_string(),
            ongoing: true,
            channel_id: defaults.channel_id.clone(),
            channel_name: defaults.channel_name.clone(),
        }
    }
}
