//! Firestore session store over the REST API.
//!
//! Appends use a single `documents:commit` with `appendMissingElements`
//! transforms, the REST equivalent of `FieldValue.arrayUnion`, guarded by
//! an exists precondition so a mistyped session id never creates a document.

use super::{ForwardError, LocationEntry, LogEntry, SessionStore, SessionUpdate};
use crate::config::SessionStoreConfig;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Session store backed by a Firestore database.
pub struct FirestoreStore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    collection: String,
    auth_token: Option<String>,
}

impl FirestoreStore {
    pub fn new(config: &SessionStoreConfig, timeout: Duration) -> Result<Self, ForwardError> {
        if config.project_id.is_empty() {
            return Err(ForwardError::Config(
                "Session store project id is not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            collection: config.collection.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn database_path(&self) -> String {
        format!("projects/{}/databases/(default)", self.project_id)
    }

    /// Full resource name of a session document.
    pub fn document_name(&self, session_id: &str) -> String {
        format!(
            "{}/documents/{}/{}",
            self.database_path(),
            self.collection,
            session_id
        )
    }

    pub fn commit_url(&self) -> String {
        format!("{}/v1/{}/documents:commit", self.base_url, self.database_path())
    }

    /// Request body appending one location and one log entry.
    pub fn commit_body(&self, session_id: &str, update: &SessionUpdate) -> Value {
        json!({
            "writes": [{
                "transform": {
                    "document": self.document_name(session_id),
                    "fieldTransforms": [
                        {
                            "fieldPath": "locations",
                            "appendMissingElements": { "values": [location_value(&update.location)] }
                        },
                        {
                            "fieldPath": "logs",
                            "appendMissingElements": { "values": [log_value(&update.log)] }
                        }
                    ]
                },
                "currentDocument": { "exists": true }
            }]
        })
    }
}

fn string_value(s: &str) -> Value {
    json!({ "stringValue": s })
}

// Firestore encodes 64-bit integers as JSON strings.
fn integer_value(n: i64) -> Value {
    json!({ "integerValue": n.to_string() })
}

fn location_value(entry: &LocationEntry) -> Value {
    json!({
        "mapValue": {
            "fields": {
                "type": string_value(&entry.kind),
                "timestamp": integer_value(entry.timestamp),
                "geopoint": {
                    "geoPointValue": {
                        "latitude": entry.geopoint.latitude,
                        "longitude": entry.geopoint.longitude
                    }
                },
                "address": string_value(&entry.address),
                "w3w": string_value(&entry.w3w)
            }
        }
    })
}

fn log_value(entry: &LogEntry) -> Value {
    json!({
        "mapValue": {
            "fields": {
                "createdBy": string_value(&entry.created_by),
                "timestamp": integer_value(entry.timestamp),
                "text": string_value(&entry.text)
            }
        }
    })
}

#[async_trait]
impl SessionStore for FirestoreStore {
    async fn append(&self, session_id: &str, update: &SessionUpdate) -> Result<(), ForwardError> {
        let mut request = self
            .client
            .post(self.commit_url())
            .json(&self.commit_body(session_id, update));

        if let Some(ref token) = self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ForwardError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
