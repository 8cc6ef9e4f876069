//! Shared HTTP client and status mapping.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::ParleyError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .pool_max_idle_per_host(10)
}

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        client_builder()
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Build a dedicated client that sends every request through `proxy_url`.
pub fn proxied_client(proxy_url: &str) -> Result<reqwest::Client, ParleyError> {
    let proxy = reqwest::Proxy::all(proxy_url)
        .map_err(|e| ParleyError::Configuration(format!("invalid proxy URL: {e}")))?;
    Ok(client_builder().proxy(proxy).build()?)
}

/// Default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Map a non-success status to an error. 429 becomes [`ParleyError::RateLimited`].
pub fn status_to_error(status: u16, retry_after: Option<&str>, body: &str) -> ParleyError {
    match status {
        429 => ParleyError::RateLimited {
            retry_after_ms: retry_after
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|secs| (secs * 1000.0) as u64)
                .or_else(|| retry_after_from_body(body)),
        },
        _ => ParleyError::api(status, body),
    }
}

fn retry_after_from_body(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}
