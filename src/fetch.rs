//! Shared HTTP clients and fetch helpers for widget refreshes

use crate::errors::{DashboardError, FetchError, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Timeout applied by the general-purpose client to every request.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 10;

fn user_agent() -> String {
    format!("dashgrid/{}", env!("CARGO_PKG_VERSION"))
}

/// The HTTP clients shared by all widgets.
///
/// `default` carries a global timeout and is used for feed and lookup style
/// requests. The monitor clients carry no global timeout because site checks
/// set a per-request deadline of their own, and the insecure variant skips
/// certificate verification for sites that ask for it.
#[derive(Debug, Clone)]
pub struct HttpClients {
    pub default: Client,
    pub monitor: Client,
    pub monitor_insecure: Client,
}

impl HttpClients {
    pub fn new() -> Result<Self> {
        let default = Client::builder()
            .timeout(DEFAULT_CLIENT_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
            .user_agent(user_agent())
            .build()
            .map_err(DashboardError::Http)?;

        let monitor = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
            .user_agent(user_agent())
            .build()
            .map_err(DashboardError::Http)?;

        let monitor_insecure = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
            .user_agent(user_agent())
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(DashboardError::Http)?;

        Ok(Self {
            default,
            monitor,
            monitor_insecure,
        })
    }
}

/// Send a prepared request and decode the body as JSON.
///
/// Responses with a status other than 200 become a `FetchError::Status`
/// carrying a truncated copy of the body for diagnostics.
pub async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> std::result::Result<T, FetchError> {
    let response = request.send().await.map_err(FetchError::Http)?;
    let status = response.status();
    let url = response.url().to_string();
    let body = response.bytes().await.map_err(FetchError::Http)?;

    if status != StatusCode::OK {
        let text = String::from_utf8_lossy(&body);
        let (truncated, _) = limit_str(&text, 256);
        return Err(FetchError::Status {
            code: status.as_u16(),
            url,
            body: truncated,
        });
    }

    serde_json::from_slice(&body).map_err(FetchError::Json)
}

/// Read at most `cap` bytes of a response body, discarding the rest.
pub async fn read_body_limited(
    mut response: Response,
    cap: usize,
) -> std::result::Result<Vec<u8>, FetchError> {
    let mut buf = Vec::new();

    while let Some(chunk) = response.chunk().await.map_err(FetchError::Http)? {
        if buf.len() + chunk.len() >= cap {
            let take = cap - buf.len();
            buf.extend_from_slice(&chunk[..take]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

/// Truncate a string to `max_chars` characters. The boolean reports whether
/// anything was cut off.
pub fn limit_str(s: &str, max_chars: usize) -> (String, bool) {
    let mut end = s.len();
    for (count, (index, _)) in s.char_indices().enumerate() {
        if count == max_chars {
            end = index;
            break;
        }
    }

    if end == s.len() {
        (s.to_string(), false)
    } else {
        (s[..end].to_string(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(serde::Deserialize)]
    struct Payload {
        name: String,
    }

    #[test]
    fn test_clients_creation() {
        let clients = HttpClients::new();
        assert!(clients.is_ok());
    }

    #[test]
    fn test_limit_str() {
        assert_eq!(limit_str("hello", 10), ("hello".to_string(), false));
        assert_eq!(limit_str("hello", 3), ("hel".to_string(), true));
        assert_eq!(limit_str("", 3), (String::new(), false));
        // Multi-byte characters are kept whole
        assert_eq!(limit_str("héllo", 2), ("hé".to_string(), true));
    }

    #[tokio::test]
    async fn test_fetch_json_decodes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"widget"}"#))
            .mount(&server)
            .await;

        let clients = HttpClients::new().unwrap();
        let payload: Payload = fetch_json(clients.default.get(format!("{}/data", server.uri())))
            .await
            .unwrap();
        assert_eq!(payload.name, "widget");
    }

    #[tokio::test]
    async fn test_fetch_json_rejects_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let clients = HttpClients::new().unwrap();
        let result: std::result::Result<Payload, FetchError> =
            fetch_json(clients.default.get(format!("{}/data", server.uri()))).await;

        match result {
            Err(FetchError::Status { code, body, .. }) => {
                assert_eq!(code, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected status error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_read_body_limited_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a".repeat(1024)))
            .mount(&server)
            .await;

        let clients = HttpClients::new().unwrap();
        let response = clients
            .default
            .get(format!("{}/big", server.uri()))
            .send()
            .await
            .unwrap();
        let body = read_body_limited(response, 100).await.unwrap();
        assert_eq!(body.len(), 100);
    }
}
