//! Credentialed re-fetch of attachment downloads.
//!
//! Some Outlook deployments serve attachments from a stable download URL
//! instead of minting `blob:` handles. The browser's own request is
//! intercepted and aborted, then replayed here with the session cookies.

use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::error::CaptureError;

/// Headers never copied from the intercepted request.
const SKIPPED_HEADERS: &[&str] = &["cookie", "host", "content-length", "connection", "accept-encoding"];

/// The outbound request as the browser was about to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

/// `name=value; name=value`
pub fn cookie_header(cookies: &[SessionCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct CredentialedFetcher {
    client: reqwest::Client,
    pattern: Regex,
    timeout: Duration,
}

impl CredentialedFetcher {
    pub fn new(pattern: &str, timeout: Duration) -> Result<Self, CaptureError> {
        let pattern = Regex::new(pattern).map_err(|e| CaptureError::Http(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CaptureError::Http(e.to_string()))?;
        Ok(Self {
            client,
            pattern,
            timeout,
        })
    }

    /// Whether `url` is an attachment download.
    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    pub async fn fetch(
        &self,
        request: &InterceptedRequest,
        cookies: &[SessionCookie],
    ) -> Result<Vec<u8>, CaptureError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if SKIPPED_HEADERS.contains(&name.to_lowercase().as_str()) {
                continue;
            }
            match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => warn!(header = %name, "Skipping unrepresentable header"),
            }
        }
        if !cookies.is_empty() {
            let value = HeaderValue::from_str(&cookie_header(cookies))
                .map_err(|e| CaptureError::Http(e.to_string()))?;
            headers.insert(reqwest::header::COOKIE, value);
        }

        let response = self
            .client
            .get(&request.url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CaptureError::Timeout {
                        what: format!("download of {}", request.url),
                        timeout: self.timeout,
                    }
                } else {
                    CaptureError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::Http(format!("{} returned {status}", request.url)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CaptureError::Http(e.to_string()))?;
        debug!(url = %request.url, bytes = bytes.len(), "Attachment downloaded");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn cookies() -> Vec<SessionCookie> {
        vec![
            SessionCookie {
                name: "session".into(),
                value: "abc".into(),
            },
            SessionCookie {
                name: "canary".into(),
                value: "x1".into(),
            },
        ]
    }

    #[test]
    fn pattern_matching() {
        let fetcher = CredentialedFetcher::new(r"/service\.svc/s/GetFileAttachment", Duration::from_secs(5)).unwrap();
        assert!(fetcher.matches("https://outlook.office.com/owa/service.svc/s/GetFileAttachment?id=1"));
        assert!(!fetcher.matches("https://outlook.office.com/owa/service.svc?action=GetItem"));
    }

    #[test]
    fn cookie_header_format() {
        assert_eq!(cookie_header(&cookies()), "session=abc; canary=x1");
        assert_eq!(cookie_header(&[]), "");
    }

    #[tokio::test]
    async fn replays_with_session_cookies_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachment/1"))
            .and(header("cookie", "session=abc; canary=x1"))
            .and(header("x-owa-canary", "x1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.5".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = CredentialedFetcher::new("/attachment/", Duration::from_secs(5)).unwrap();
        let request = InterceptedRequest {
            url: format!("{}/attachment/1", server.uri()),
            headers: vec![
                ("X-OWA-Canary".into(), "x1".into()),
                ("Cookie".into(), "stale=1".into()),
            ],
        };
        let bytes = fetcher.fetch(&request, &cookies()).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.5");
    }

    #[tokio::test]
    async fn error_status_is_a_capture_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fetcher = CredentialedFetcher::new("/attachment/", Duration::from_secs(5)).unwrap();
        let request = InterceptedRequest {
            url: format!("{}/attachment/2", server.uri()),
            headers: vec![],
        };
        let err = fetcher.fetch(&request, &cookies()).await.unwrap_err();
        assert!(matches!(err, CaptureError::Http(msg) if msg.contains("401")));
    }
}
