//! # HTTP Retrieval Utilities
//!
//! An asynchronous `GET` client around `reqwest`, with middleware-driven
//! exponential backoff retries and standardized JSON response handling.

use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

/// Retries applied to transient failures (connect errors, 5xx, 429).
const MAX_RETRIES: u32 = 3;

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

/// A flexible asynchronous HTTP client.
///
/// Handles the base URL and automatic retries.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient` with a retry policy and a per-attempt timeout.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the TLS backend cannot be
    /// initialised.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)
            .with_context(|| format!("invalid base URL (must be absolute): {base_url}"))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lib_relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
        })
    }

    /// The base every request path is joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a `GET` and handles the response.
    ///
    /// # Arguments
    /// * `path` - The relative path to append to the base URL.
    /// * `query` - Query string pairs.
    ///
    /// # Errors
    /// Returns an error if URL joining, network execution or decoding of a
    /// successful body fails. Non-2xx statuses are *not* errors; they come back
    /// with `success == false` and the raw `error_body`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<ApiResponse<T>> {
        // 1. Construct the full absolute URL
        let mut full_url = self.base_url.join(path)?;
        if !query.is_empty() {
            full_url.query_pairs_mut().extend_pairs(query.iter().copied());
        }

        // 2. Execute and capture the status
        let response: reqwest::Response = self.inner.get(full_url).send().await?;
        let status = response.status();

        // 3. Decode on success, keep the raw text otherwise
        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }
}
