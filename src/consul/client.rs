//! HTTP transport to a Consul agent.

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ConsulError, Result};
use crate::config::ConsulConfig;

/// Longest response body excerpt kept in a status error.
const STATUS_BODY_LIMIT: usize = 200;

/// Consul HTTP API client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: Client,
    address: String,
    base: Url,
}

impl ConsulClient {
    /// Create a client for the agent at `address` with default settings.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Self::from_config(&ConsulConfig {
            address: address.into(),
            ..Default::default()
        })
    }

    /// Create a client from configuration.
    pub fn from_config(config: &ConsulConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let address = normalize_address(&config.address);
        let base = Url::parse(&address)
            .map_err(|e| ConsulError::InvalidAddress(format!("{}: {}", address, e)))?;

        Ok(Self {
            http,
            address,
            base,
        })
    }

    /// Base address of the agent, including scheme.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// API URL for `path`, one entry per path segment.
    ///
    /// Each segment is percent-encoded, so names holding `/`, `?`, `#` or
    /// `%` stay inside their segment.
    pub(crate) fn endpoint(&self, path: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ConsulError::InvalidAddress(self.address.clone()))?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "Consul GET");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        parse_response(status, &body)
    }

    pub(crate) async fn put_json<B, T>(
        &self,
        path: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (status, body) = self.put(path, query, body).await?;
        parse_response(status, &body)
    }

    /// PUT that only cares about the status code.
    pub(crate) async fn put_empty(&self, path: &[&str]) -> Result<()> {
        let (status, body) = self.put::<()>(path, &[], None).await?;
        check_status(status, &body)
    }

    async fn put<B>(
        &self,
        path: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<(StatusCode, bytes::Bytes)>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(path)?;
        debug!(url = %url, "Consul PUT");

        let mut request = self.http.put(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body))
    }
}

/// Prepend `http://` when the configured address has no scheme and strip
/// any trailing slash.
fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let body = String::from_utf8_lossy(body)
        .chars()
        .take(STATUS_BODY_LIMIT)
        .collect::<String>();
    Err(ConsulError::Status {
        code: status.as_u16(),
        body,
    })
}

fn parse_response<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T> {
    check_status(status, body)?;
    serde_json::from_slice(body).map_err(|e| ConsulError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_address_adds_scheme() {
        assert_eq!(normalize_address("127.0.0.1:8500"), "http://127.0.0.1:8500");
        assert_eq!(
            normalize_address("http://127.0.0.1:8500/"),
            "http://127.0.0.1:8500"
        );
        assert_eq!(
            normalize_address("https://consul.internal"),
            "https://consul.internal"
        );
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let client = ConsulClient::new("consul:8500").unwrap();
        assert_eq!(
            client.endpoint(&["v1", "catalog", "services"]).unwrap().as_str(),
            "http://consul:8500/v1/catalog/services"
        );
    }

    #[test]
    fn test_endpoint_encodes_reserved_characters() {
        let client = ConsulClient::new("consul:8500").unwrap();
        assert_eq!(
            client.endpoint(&["v1", "kv", "a?b#c%d"]).unwrap().as_str(),
            "http://consul:8500/v1/kv/a%3Fb%23c%25d"
        );
        assert_eq!(
            client.endpoint(&["v1", "catalog", "service", "a/b"]).unwrap().as_str(),
            "http://consul:8500/v1/catalog/service/a%2Fb"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = ConsulClient::new("https://proxy.internal/consul/").unwrap();
        assert_eq!(
            client.endpoint(&["v1", "status", "leader"]).unwrap().as_str(),
            "https://proxy.internal/consul/v1/status/leader"
        );
    }

    #[test]
    fn test_unparseable_address_is_rejected() {
        let err = ConsulClient::new("http://[::1").unwrap_err();
        assert!(matches!(err, ConsulError::InvalidAddress(_)));
    }

    #[test]
    fn test_parse_success_body() {
        let body = br#"{"echo":["v1"],"redis":["v1","cache"]}"#;
        let services: HashMap<String, Vec<String>> =
            parse_response(StatusCode::OK, body).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services["redis"], vec!["v1", "cache"]);
    }

    #[test]
    fn test_parse_status_error_carries_code() {
        let result: Result<bool> =
            parse_response(StatusCode::INTERNAL_SERVER_ERROR, b"invalid session");
        match result {
            Err(ConsulError::Status { code, body }) => {
                assert_eq!(code, 500);
                assert_eq!(body, "invalid session");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_body_is_decode_error() {
        let result: Result<bool> = parse_response(StatusCode::OK, b"<html>");
        assert!(matches!(result, Err(ConsulError::Decode(_))));
    }

    #[test]
    fn test_status_error_body_is_truncated() {
        let long = vec![b'x'; 1000];
        let err = check_status(StatusCode::BAD_GATEWAY, &long).unwrap_err();
        match err {
            ConsulError::Status { body, .. } => assert_eq!(body.len(), STATUS_BODY_LIMIT),
            other => panic!("expected status error, got {:?}", other),
        }
    }
}
