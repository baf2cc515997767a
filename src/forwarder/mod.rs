//! Remote logging for accepted fixes.
//!
//! Each accepted fix is resolved to a what3words address and appended to
//! the subscriber's remote session document. This runs as a detached task
//! on a tokio runtime: nothing flows back into the plugin core, failures
//! are logged and counted, and there is no retry. The task only touches the
//! atomic diagnostics counters, never the watcher registry.

#[cfg(feature = "remote")]
pub mod firestore;
#[cfg(feature = "remote")]
pub mod what3words;

#[cfg(feature = "remote")]
pub use firestore::FirestoreStore;
#[cfg(feature = "remote")]
pub use what3words::What3WordsClient;

use crate::diagnostics::SharedDiagnosticsLog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored in place of a street address for tracked fixes.
pub const ADDRESS_PLACEHOLDER: &str = "Not available when tracking";

/// Stored when the address lookup fails.
pub const WORDS_PLACEHOLDER: &str = "Unable to ascertain";

/// Author recorded on every log entry.
pub const LOG_AUTHOR: &str = "Guardian";

/// Resolves a coordinate to a words-based address.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn words_for(
        &self,
        latitude: f64,
        longitude: f64,
        api_key: Option<&str>,
    ) -> Result<String, ForwardError>;
}

/// Appends tracking records to a remote session document.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(&self, session_id: &str, update: &SessionUpdate) -> Result<(), ForwardError>;
}

/// Remote logging error types.
#[derive(Debug)]
pub enum ForwardError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
    /// JSON (de)serialization error
    Serialization(String),
    /// Lookup response carried no words
    MissingWords,
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Config(msg) => write!(f, "Forwarder config error: {msg}"),
            ForwardError::Network(msg) => write!(f, "Forwarder network error: {msg}"),
            ForwardError::Server { status, message } => {
                write!(f, "Remote service error ({status}): {message}")
            }
            ForwardError::Serialization(msg) => write!(f, "Forwarder serialization error: {msg}"),
            ForwardError::MissingWords => write!(f, "Address lookup returned no words"),
        }
    }
}

impl std::error::Error for ForwardError {}

/// A latitude/longitude pair as stored remotely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One entry in the session's `locations` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEntry {
    #[serde(rename = "type")]
    pub kind: String,
    /// Client time in milliseconds since the epoch
    pub timestamp: i64,
    pub geopoint: GeoPoint,
    pub address: String,
    pub w3w: String,
}

/// One entry in the session's `logs` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub created_by: String,
    pub timestamp: i64,
    pub text: String,
}

/// Everything appended to a session document for one accepted fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub location: LocationEntry,
    pub log: LogEntry,
}

impl SessionUpdate {
    pub fn new(point: GeoPoint, words: &str, now: DateTime<Utc>) -> Self {
        let timestamp = now.timestamp_millis();
        Self {
            location: LocationEntry {
                kind: "tracked".to_string(),
                timestamp,
                geopoint: point,
                address: ADDRESS_PLACEHOLDER.to_string(),
                w3w: words.to_string(),
            },
            log: LogEntry {
                created_by: LOG_AUTHOR.to_string(),
                timestamp,
                text: format!(
                    "Latest location received: {}:{}. ///what3words: {}",
                    point.latitude, point.longitude, words
                ),
            },
        }
    }
}

/// One accepted fix to log remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRequest {
    pub session_id: String,
    pub point: GeoPoint,
    /// Per-watcher lookup key, if the subscriber supplied one
    pub address_key: Option<String>,
}

enum Executor {
    Owned(Option<tokio::runtime::Runtime>),
    Borrowed(tokio::runtime::Handle),
}

impl Executor {
    fn handle(&self) -> Option<tokio::runtime::Handle> {
        match self {
            Executor::Owned(runtime) => runtime.as_ref().map(|rt| rt.handle().clone()),
            Executor::Borrowed(handle) => Some(handle.clone()),
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Never block the coordinating thread on in-flight requests.
        if let Executor::Owned(runtime) = self {
            if let Some(rt) = runtime.take() {
                rt.shutdown_background();
            }
        }
    }
}

/// Spawns fire-and-forget remote logging tasks.
pub struct RemoteLogForwarder {
    lookup: Arc<dyn AddressLookup>,
    store: Arc<dyn SessionStore>,
    executor: Executor,
    diagnostics: SharedDiagnosticsLog,
}

impl RemoteLogForwarder {
    /// Create a forwarder with its own worker runtime.
    pub fn new(
        lookup: Arc<dyn AddressLookup>,
        store: Arc<dyn SessionStore>,
        diagnostics: SharedDiagnosticsLog,
    ) -> Result<Self, ForwardError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("geolocation-forwarder")
            .enable_all()
            .build()
            .map_err(|e| ForwardError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            lookup,
            store,
            executor: Executor::Owned(Some(runtime)),
            diagnostics,
        })
    }

    /// Create a forwarder that spawns onto an existing runtime.
    pub fn with_handle(
        lookup: Arc<dyn AddressLookup>,
        store: Arc<dyn SessionStore>,
        diagnostics: SharedDiagnosticsLog,
        handle: tokio::runtime::Handle,
    ) -> Self {
        Self {
            lookup,
            store,
            executor: Executor::Borrowed(handle),
            diagnostics,
        }
    }

    /// Build a forwarder from configuration using the HTTP-backed clients.
    #[cfg(feature = "remote")]
    pub fn from_config(
        config: &crate::config::PluginConfig,
        diagnostics: SharedDiagnosticsLog,
    ) -> Result<Self, ForwardError> {
        let lookup = What3WordsClient::new(&config.address_lookup, config.request_timeout)?;
        let store = FirestoreStore::new(&config.session_store, config.request_timeout)?;
        Self::new(Arc::new(lookup), Arc::new(store), diagnostics)
    }

    /// Log one fix in the background.
    ///
    /// The returned handle may be dropped; the task keeps running detached.
    pub fn forward(&self, request: ForwardRequest) -> Option<tokio::task::JoinHandle<()>> {
        let handle = self.executor.handle()?;
        let lookup = self.lookup.clone();
        let store = self.store.clone();
        let diagnostics = self.diagnostics.clone();
        Some(handle.spawn(run_forward(lookup, store, diagnostics, request)))
    }
}

async fn run_forward(
    lookup: Arc<dyn AddressLookup>,
    store: Arc<dyn SessionStore>,
    diagnostics: SharedDiagnosticsLog,
    request: ForwardRequest,
) {
    let point = request.point;
    let words = match lookup
        .words_for(point.latitude, point.longitude, request.address_key.as_deref())
        .await
    {
        Ok(words) => words,
        Err(e) => {
            tracing::warn!("Address lookup failed, using placeholder: {}", e);
            diagnostics.record_lookup_fallback();
            WORDS_PLACEHOLDER.to_string()
        }
    };

    let update = SessionUpdate::new(point, &words, Utc::now());
    match store.append(&request.session_id, &update).await {
        Ok(()) => {
            tracing::debug!(session = %request.session_id, "session document updated");
            diagnostics.record_forward_succeeded();
        }
        Err(e) => {
            tracing::warn!("Error updating session {}: {}", request.session_id, e);
            diagnostics.record_forward_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::create_shared_log;
    use std::sync::Mutex;

    struct FailingLookup;

    #[async_trait]
    impl AddressLookup for FailingLookup {
        async fn words_for(&self, _: f64, _: f64, _: Option<&str>) -> Result<String, ForwardError> {
            Err(ForwardError::Network("offline".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        updates: Mutex<Vec<(String, SessionUpdate)>>,
    }

    #[async_trait]
    impl SessionStore for RecordingStore {
        async fn append(&self, session_id: &str, update: &SessionUpdate) -> Result<(), ForwardError> {
            self.updates
                .lock()
                .unwrap()
                .push((session_id.to_string(), update.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_session_update_contents() {
        let now = Utc::now();
        let update = SessionUpdate::new(
            GeoPoint {
                latitude: 51.5,
                longitude: -0.1,
            },
            "filled.count.soap",
            now,
        );

        assert_eq!(update.location.kind, "tracked");
        assert_eq!(update.location.address, ADDRESS_PLACEHOLDER);
        assert_eq!(update.location.timestamp, now.timestamp_millis());
        assert_eq!(update.log.created_by, "Guardian");
        assert_eq!(
            update.log.text,
            "Latest location received: 51.5:-0.1. ///what3words: filled.count.soap"
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_placeholder() {
        let store = Arc::new(RecordingStore::default());
        let diagnostics = create_shared_log();
        let forwarder = RemoteLogForwarder::with_handle(
            Arc::new(FailingLookup),
            store.clone(),
            diagnostics.clone(),
            tokio::runtime::Handle::current(),
        );

        let task = forwarder
            .forward(ForwardRequest {
                session_id: "s-1".to_string(),
                point: GeoPoint {
                    latitude: 1.0,
                    longitude: 2.0,
                },
                address_key: None,
            })
            .unwrap();
        task.await.unwrap();

        let updates = store.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "s-1");
        assert_eq!(updates[0].1.location.w3w, WORDS_PLACEHOLDER);

        let stats = diagnostics.stats();
        assert_eq!(stats.lookup_fallbacks, 1);
        assert_eq!(stats.forwards_succeeded, 1);
    }
}
