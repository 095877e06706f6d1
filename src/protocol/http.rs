//! HTTP protocol backed by reqwest
//!
//! Redirects are not followed: a redirect is a fetch outcome of its own, and
//! the scheduler decides which URL represents the page.

use crate::config::HttpConfig;
use crate::fetch::FetchTask;
use crate::protocol::{Protocol, ProtocolOutput, ProtocolStatus};
use async_trait::async_trait;
use reqwest::{header::LOCATION, redirect::Policy, Client, Response, StatusCode};
use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::Duration;
use url::Url;

/// Fetches `http` and `https` URLs
#[derive(Debug, Clone)]
pub struct HttpProtocol {
    client: Client,
}

impl HttpProtocol {
    /// Builds the protocol's HTTP client
    ///
    /// # Arguments
    ///
    /// * `config` - User agent and timeouts
    ///
    /// # Returns
    ///
    /// * `Ok(HttpProtocol)` - Successfully built client
    /// * `Err(reqwest::Error)` - Failed to build client
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(Policy::none())
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }

    async fn read_response(task: &FetchTask, response: Response) -> ProtocolOutput {
        let code = response.status();
        let status = classify_status(code);

        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        let location = if status.is_redirect() {
            response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| resolve_location(&task.url, v))
        } else {
            None
        };

        let mut output = ProtocolOutput {
            status,
            status_code: Some(code.as_u16()),
            headers,
            location,
            content: None,
        };

        if status != ProtocolStatus::Success {
            return output;
        }

        match response.bytes().await {
            Ok(body) => output.content = Some(body.to_vec()),
            Err(e) => {
                tracing::debug!("Failed to read body of {}: {}", task.url, e);
                output.status = ProtocolStatus::Exception;
            }
        }

        output
    }
}

#[async_trait]
impl Protocol for HttpProtocol {
    async fn fetch(&self, task: &FetchTask) -> ProtocolOutput {
        match self.client.get(task.url.clone()).send().await {
            Ok(response) => Self::read_response(task, response).await,
            Err(e) => {
                let status = classify_error(&e);
                tracing::debug!("Fetch of {} failed ({}): {}", task.url, status, e);
                ProtocolOutput::status(status)
            }
        }
    }
}

/// Maps an HTTP status code to a fetch outcome
pub fn classify_status(code: StatusCode) -> ProtocolStatus {
    match code.as_u16() {
        200..=299 => ProtocolStatus::Success,
        304 => ProtocolStatus::NotModified,
        301 | 308 => ProtocolStatus::Moved,
        302 | 303 | 307 => ProtocolStatus::TempMoved,
        401 | 403 => ProtocolStatus::AccessDenied,
        404 => ProtocolStatus::NotFound,
        410 => ProtocolStatus::Gone,
        429 => ProtocolStatus::Blocked,
        500..=599 => ProtocolStatus::Retry,
        other => ProtocolStatus::Other(other),
    }
}

fn classify_error(error: &reqwest::Error) -> ProtocolStatus {
    if error.is_timeout() {
        ProtocolStatus::Timeout
    } else if error.is_connect() {
        if is_dns_failure(error) {
            ProtocolStatus::UnknownHost
        } else {
            ProtocolStatus::Timeout
        }
    } else {
        ProtocolStatus::Exception
    }
}

// hyper reports resolver failures as "dns error" somewhere down the source chain
fn is_dns_failure(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(err) = source {
        let message = err.to_string().to_lowercase();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return true;
        }
        source = err.source();
    }
    false
}

fn resolve_location(base: &Url, location: &str) -> Option<String> {
    base.join(location).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config() -> HttpConfig {
        HttpConfig {
            user_agent: "tidepool-test/1.0".to_string(),
            timeout_secs: 1,
            connect_timeout_secs: 1,
        }
    }

    fn task_for(url: &str) -> FetchTask {
        FetchTask::new(1, 0, url, 1).unwrap()
    }

    #[test]
    fn test_classify_status() {
        let cases = [
            (200, ProtocolStatus::Success),
            (204, ProtocolStatus::Success),
            (304, ProtocolStatus::NotModified),
            (301, ProtocolStatus::Moved),
            (308, ProtocolStatus::Moved),
            (302, ProtocolStatus::TempMoved),
            (307, ProtocolStatus::TempMoved),
            (403, ProtocolStatus::AccessDenied),
            (404, ProtocolStatus::NotFound),
            (410, ProtocolStatus::Gone),
            (429, ProtocolStatus::Blocked),
            (503, ProtocolStatus::Retry),
            (418, ProtocolStatus::Other(418)),
        ];

        for (code, expected) in cases {
            let code = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(code), expected, "status {}", code);
        }
    }

    #[test]
    fn test_resolve_location() {
        let base = Url::parse("http://a.com/dir/page").unwrap();
        assert_eq!(
            resolve_location(&base, "/other").as_deref(),
            Some("http://a.com/other")
        );
        assert_eq!(
            resolve_location(&base, "https://b.com/").as_deref(),
            Some("https://b.com/")
        );
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>hi</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let protocol = HttpProtocol::new(&create_test_config()).unwrap();
        let output = protocol
            .fetch(&task_for(&format!("{}/page", server.uri())))
            .await;

        assert_eq!(output.status, ProtocolStatus::Success);
        assert_eq!(output.status_code, Some(200));
        assert_eq!(output.content_type(), Some("text/html"));
        assert_eq!(output.content.as_deref(), Some(&b"<html>hi</html>"[..]));
    }

    #[tokio::test]
    async fn test_fetch_redirect_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;

        let protocol = HttpProtocol::new(&create_test_config()).unwrap();
        let output = protocol
            .fetch(&task_for(&format!("{}/old", server.uri())))
            .await;

        assert_eq!(output.status, ProtocolStatus::Moved);
        assert_eq!(output.location, Some(format!("{}/new", server.uri())));
        assert!(output.content.is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let protocol = HttpProtocol::new(&create_test_config()).unwrap();

        let output = protocol
            .fetch(&task_for(&format!("{}/missing", server.uri())))
            .await;
        assert_eq!(output.status, ProtocolStatus::NotFound);

        let output = protocol
            .fetch(&task_for(&format!("{}/busy", server.uri())))
            .await;
        assert_eq!(output.status, ProtocolStatus::Retry);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let protocol = HttpProtocol::new(&create_test_config()).unwrap();
        let output = protocol
            .fetch(&task_for(&format!("{}/slow", server.uri())))
            .await;

        assert_eq!(output.status, ProtocolStatus::Timeout);
        assert!(output.status_code.is_none());
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let protocol = HttpProtocol::new(&create_test_config()).unwrap();
        let output = protocol.fetch(&task_for("http://127.0.0.1:1/")).await;
        assert_eq!(output.status, ProtocolStatus::Timeout);
    }
}
