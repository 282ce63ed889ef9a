//! HTTP client abstraction for the generation backend.
//!
//! The generation adapter talks to its backend through [`HttpClient`] so that
//! tests can substitute canned replies without making network requests.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for HTTP communication with external APIs.
///
/// # Example
///
/// ```ignore
/// use metaprogrammer::http_client::{HttpClient, ReqwestHttpClient};
///
/// let client = ReqwestHttpClient::new();
/// let response = client.post_json(
///     "https://api.example.com/endpoint",
///     &[("content-type", "application/json")],
///     &serde_json::json!({"key": "value"}),
/// ).await?;
/// assert!(response.is_success());
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body.
    ///
    /// Non-2xx statuses are returned as a normal [`HttpResponse`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the body cannot be read.
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse>;
}

/// HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse> {
        let mut request = self.client.post(url);

        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.json(body).send().await?;
        let status = response.status().as_u16();
        Ok(HttpResponse {
            status,
            body: response.text().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        let ok = HttpResponse { status: 200, body: String::new() };
        let created = HttpResponse { status: 201, body: String::new() };
        let unauthorized = HttpResponse { status: 401, body: String::new() };
        let outage = HttpResponse { status: 503, body: String::new() };

        assert!(ok.is_success());
        assert!(created.is_success());
        assert!(!unauthorized.is_success());
        assert!(!outage.is_success());
    }
}
