use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::{prelude::*, Error};

/// HTTP status codes that indicate transient server errors (retryable)
const RETRYABLE_STATUS_CODES: &[u16] = &[502, 503, 504];

/// Maximum number of retry attempts for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds (doubles with each retry)
const INITIAL_BACKOFF_MS: u64 = 100;

/// Error body shape shared by the Safe service and most JSON-RPC gateways.
#[derive(Deserialize, Debug)]
struct ErrorData {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default, alias = "message", alias = "detail")]
    msg: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub base_url: String,
}

async fn parse_response(response: Response) -> Result<String> {
    let status_code = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| Error::GenericRequest(e.to_string()))?;

    if status_code < 400 {
        return Ok(text);
    }
    let error_data = serde_json::from_str::<ErrorData>(&text);
    if (400..500).contains(&status_code) {
        let client_error = match error_data {
            Ok(error_data) => Error::ClientRequest {
                status_code,
                error_code: error_data.code,
                error_message: error_data.msg.unwrap_or_else(|| text.clone()),
                error_data: Some(text),
            },
            Err(err) => Error::ClientRequest {
                status_code,
                error_message: text,
                error_code: None,
                error_data: Some(err.to_string()),
            },
        };
        return Err(client_error);
    }

    Err(Error::ServerRequest {
        status_code,
        error_message: text,
    })
}

impl HttpClient {
    pub fn new(client: Option<Client>, base_url: impl Into<String>) -> Self {
        Self {
            client: client.unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Send a POST request with automatic retry for transient server errors (502, 503, 504).
    ///
    /// Uses exponential backoff: 100ms, 200ms, 400ms between retries.
    pub async fn post(&self, url_path: &str, data: String) -> Result<String> {
        let full_url = format!("{}{url_path}", self.base_url);
        self.send_with_retry(url_path, || {
            self.client
                .post(&full_url)
                .header("Content-Type", "application/json")
                .body(data.clone())
        })
        .await
    }

    /// Send a GET request with the same retry policy as [`HttpClient::post`].
    pub async fn get(&self, url_path: &str) -> Result<String> {
        let full_url = format!("{}{url_path}", self.base_url);
        self.send_with_retry(url_path, || self.client.get(&full_url))
            .await
    }

    async fn send_with_retry<F>(&self, url_path: &str, build: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        for attempt in 0..=MAX_RETRIES {
            let request = build()
                .build()
                .map_err(|e| Error::GenericRequest(e.to_string()))?;

            let result = self
                .client
                .execute(request)
                .await
                .map_err(|e| Error::GenericRequest(e.to_string()))?;

            let status = result.status().as_u16();

            if RETRYABLE_STATUS_CODES.contains(&status) && attempt < MAX_RETRIES {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    status = status,
                    attempt = attempt + 1,
                    max_attempts = MAX_RETRIES + 1,
                    backoff_ms = backoff.as_millis(),
                    url = %url_path,
                    "Retryable HTTP error, backing off"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            return parse_response(result).await;
        }

        Err(Error::GenericRequest(format!(
            "Max retries ({MAX_RETRIES}) exceeded for {url_path}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpClient::new(None, "https://safe-transaction-mainnet.safe.global/");
        assert_eq!(client.base_url, "https://safe-transaction-mainnet.safe.global");
    }

    #[test]
    fn test_error_data_accepts_detail_field() {
        let data: ErrorData = serde_json::from_str(r#"{"code": 1, "detail": "Not found"}"#).unwrap();
        assert_eq!(data.code, Some(1));
        assert_eq!(data.msg.as_deref(), Some("Not found"));
    }
}
