use crate::domain::errors::FetchError;
use crate::domain::selector::UrlMatcher;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;
use tokio::sync::oneshot;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Point-in-time view of one element: its visible text and attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub text: String,
    pub attributes: BTreeMap<String, String>,
}

impl ElementSnapshot {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A network response observed while the page was driven.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    pub fn json_ok(url: impl Into<String>, body: &Value) -> Self {
        Self::new(url, 200, body.to_string().into_bytes())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON. Bodies that still carry a gzip header (the
    /// transport did not inflate them) are inflated first.
    pub fn json(&self) -> Result<Value, FetchError> {
        let decode_err = |reason: String| FetchError::Decode {
            url: self.url.clone(),
            reason,
        };

        if self.body.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::new();
            GzDecoder::new(self.body.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|e| decode_err(format!("gzip: {}", e)))?;
            serde_json::from_slice(&inflated).map_err(|e| decode_err(e.to_string()))
        } else {
            serde_json::from_slice(&self.body).map_err(|e| decode_err(e.to_string()))
        }
    }
}

/// Pending interest in one response, registered before the page action that
/// triggers it.
#[derive(Debug)]
pub struct ResponseCapture {
    matcher: UrlMatcher,
    rx: oneshot::Receiver<CapturedResponse>,
}

impl ResponseCapture {
    pub fn new(matcher: UrlMatcher) -> (Self, oneshot::Sender<CapturedResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { matcher, rx }, tx)
    }

    pub fn matcher(&self) -> &UrlMatcher {
        &self.matcher
    }

    /// Wait for the matching response. `None` when the window expires or the
    /// page dropped the capture.
    pub async fn wait(self, timeout: Duration) -> Option<CapturedResponse> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(response)) => Some(response),
            _ => None,
        }
    }
}

/// Cookie as persisted in the profile file and replayed into the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    /// Whether the cookie would be sent to `host`.
    pub fn applies_to(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        host == domain || host.ends_with(&format!(".{}", domain))
    }
}
