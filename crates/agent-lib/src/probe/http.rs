//! HTTP/HTTPS service checks

use crate::models::{CheckResult, CheckStatus, ServiceTarget};
use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use url::Url;

/// User agent sent with every probe
pub const USER_AGENT: &str = "Monitor-Agent/1.0";

/// Redirects followed before a probe fails
pub const MAX_REDIRECTS: usize = 5;

/// Status expected when a target does not name one
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Probes HTTP endpoints with a GET request
#[derive(Debug, Clone)]
pub struct HttpChecker {
    client: Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .context("Failed to create HTTP checker client")?;

        Ok(Self { client })
    }

    /// Probe one target
    ///
    /// Transport failures become a `down` result. Only an endpoint that is
    /// not a URL at all is returned as an error.
    pub async fn check(&self, target: &ServiceTarget) -> Result<CheckResult> {
        let url = Url::parse(&target.endpoint)
            .with_context(|| format!("Invalid URL '{}'", target.endpoint))?;
        let timeout = Duration::from_secs(target.timeout_seconds.max(1));

        let started = Instant::now();
        let response = self.client.get(url).timeout(timeout).send().await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let result = match response {
            Ok(response) => {
                let actual = response.status().as_u16();
                let expected = target
                    .expected_status_code
                    .unwrap_or(DEFAULT_EXPECTED_STATUS);
                let (status, error_message) = classify_status(expected, actual);

                CheckResult {
                    service_id: target.id,
                    status,
                    response_time_ms,
                    status_code: Some(actual),
                    error_message,
                }
            }
            Err(e) => CheckResult {
                service_id: target.id,
                status: CheckStatus::Down,
                response_time_ms,
                status_code: None,
                error_message: Some(describe_error(&e)),
            },
        };

        Ok(result)
    }
}

/// Compare an actual status against the expected one
///
/// Any 5xx is `down`, even when it was the expected status.
pub fn classify_status(expected: u16, actual: u16) -> (CheckStatus, Option<String>) {
    if actual >= 500 {
        (CheckStatus::Down, Some(format!("Server error: {}", actual)))
    } else if actual != expected {
        (
            CheckStatus::Degraded,
            Some(format!("Expected status {}, got {}", expected, actual)),
        )
    } else {
        (CheckStatus::Up, None)
    }
}

/// Short operator-facing description of a transport failure
///
/// Well-known causes get a fixed label; anything else is reported as the
/// full error chain.
pub fn describe_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "Request timeout".to_string();
    }

    let mut chain = Vec::new();
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused => return "Connection refused".to_string(),
                ErrorKind::TimedOut => return "Request timeout".to_string(),
                _ => {}
            }
        }

        let message = e.to_string();
        if let Some(label) = classify_message(&message) {
            return label.to_string();
        }
        chain.push(message);
        source = e.source();
    }

    chain.join(": ")
}

/// Map an error message to a fixed label, if it is a well-known cause
pub fn classify_message(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();

    if lower.contains("connection refused") {
        Some("Connection refused")
    } else if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
    {
        Some("DNS lookup failed")
    } else if lower.contains("timed out") || lower.contains("deadline has elapsed") {
        Some("Request timeout")
    } else if lower.contains("certificate") && lower.contains("expired") {
        Some("SSL certificate expired")
    } else if lower.contains("unknownissuer")
        || lower.contains("self signed")
        || lower.contains("self-signed")
    {
        Some("Self-signed SSL certificate")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceType;

    fn target(endpoint: &str, expected: Option<u16>) -> ServiceTarget {
        ServiceTarget {
            id: 7,
            service_type: ServiceType::Http,
            endpoint: endpoint.to_string(),
            expected_status_code: expected,
            timeout_seconds: 2,
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200, 200), (CheckStatus::Up, None));

        let (status, message) = classify_status(200, 404);
        assert_eq!(status, CheckStatus::Degraded);
        assert_eq!(message.as_deref(), Some("Expected status 200, got 404"));

        let (status, message) = classify_status(200, 503);
        assert_eq!(status, CheckStatus::Down);
        assert_eq!(message.as_deref(), Some("Server error: 503"));

        // 5xx stays down even when expected
        assert_eq!(classify_status(503, 503).0, CheckStatus::Down);
        assert_eq!(classify_status(301, 301).0, CheckStatus::Up);
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            classify_message("tcp connect error: Connection refused (os error 111)"),
            Some("Connection refused")
        );
        assert_eq!(
            classify_message("dns error: failed to lookup address information"),
            Some("DNS lookup failed")
        );
        assert_eq!(
            classify_message("invalid peer certificate: Expired"),
            Some("SSL certificate expired")
        );
        assert_eq!(
            classify_message("invalid peer certificate: UnknownIssuer"),
            Some("Self-signed SSL certificate")
        );
        assert_eq!(classify_message("connection closed before message completed"), None);
    }

    #[tokio::test]
    async fn test_check_expected_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .match_header("user-agent", USER_AGENT)
            .with_status(200)
            .create_async()
            .await;

        let checker = HttpChecker::new().unwrap();
        let result = checker
            .check(&target(&format!("{}/health", server.url()), None))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.service_id, 7);
        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.status_code, Some(200));
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_check_unexpected_and_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/broken")
            .with_status(503)
            .create_async()
            .await;

        let checker = HttpChecker::new().unwrap();

        let degraded = checker
            .check(&target(&format!("{}/missing", server.url()), Some(200)))
            .await
            .unwrap();
        assert_eq!(degraded.status, CheckStatus::Degraded);
        assert_eq!(degraded.status_code, Some(404));

        let down = checker
            .check(&target(&format!("{}/broken", server.url()), None))
            .await
            .unwrap();
        assert_eq!(down.status, CheckStatus::Down);
        assert_eq!(down.error_message.as_deref(), Some("Server error: 503"));
    }

    #[tokio::test]
    async fn test_check_connection_refused() {
        // Reserve a port, then free it so nothing is listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = HttpChecker::new().unwrap();
        let result = checker
            .check(&target(&format!("http://127.0.0.1:{}/", port), None))
            .await
            .unwrap();

        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.status_code, None);
        assert_eq!(result.error_message.as_deref(), Some("Connection refused"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        let checker = HttpChecker::new().unwrap();
        assert!(checker.check(&target("not a url", None)).await.is_err());
    }
}
