//! what3words address lookup over HTTP.

use super::{AddressLookup, ForwardError};
use crate::config::AddressLookupConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    words: Option<String>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

/// Extract the three-word address from a `convert-to-3wa` response body.
pub fn parse_words(body: &str) -> Result<String, ForwardError> {
    let response: ConvertResponse =
        serde_json::from_str(body).map_err(|e| ForwardError::Serialization(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(ForwardError::Server {
            status: 200,
            message: format!("{}: {}", error.code, error.message),
        });
    }

    response
        .words
        .filter(|w| !w.is_empty())
        .ok_or(ForwardError::MissingWords)
}

/// Client for the what3words `convert-to-3wa` endpoint.
pub struct What3WordsClient {
    client: reqwest::Client,
    base_url: String,
    default_key: Option<String>,
}

impl What3WordsClient {
    pub fn new(config: &AddressLookupConfig, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_key: config.api_key.clone(),
        })
    }

    pub fn convert_url(&self) -> String {
        format!("{}/v3/convert-to-3wa", self.base_url)
    }
}

#[async_trait]
impl AddressLookup for What3WordsClient {
    async fn words_for(
        &self,
        latitude: f64,
        longitude: f64,
        api_key: Option<&str>,
    ) -> Result<String, ForwardError> {
        let key = api_key
            .or(self.default_key.as_deref())
            .ok_or_else(|| ForwardError::Config("No what3words API key".to_string()))?;

        let coordinates = format!("{latitude},{longitude}");
        let response = self
            .client
            .get(self.convert_url())
            .query(&[("coordinates", coordinates.as_str()), ("key", key)])
            .send()
            .await
            .map_err(|e| ForwardError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ForwardError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ForwardError::Server {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_words(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_words() {
        let body = r#"{"country":"GB","words":"filled.count.soap","language":"en"}"#;
        assert_eq!(parse_words(body).unwrap(), "filled.count.soap");
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"error":{"code":"InvalidKey","message":"Authentication failed"}}"#;
        match parse_words(body) {
            Err(ForwardError::Server { message, .. }) => assert!(message.contains("InvalidKey")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(matches!(
            parse_words("<html>"),
            Err(ForwardError::Serialization(_))
        ));
        assert!(matches!(parse_words("{}"), Err(ForwardError::MissingWords)));
    }

    #[test]
    fn test_convert_url_trims_slash() {
        let config = AddressLookupConfig {
            base_url: "http://127.0.0.1:9999/".to_string(),
            api_key: None,
        };
        let client = What3WordsClient::new(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(client.convert_url(), "http://127.0.0.1:9999/v3/convert-to-3wa");
    }
}
