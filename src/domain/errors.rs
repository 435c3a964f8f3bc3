use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a browser automation backend
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser connection lost")]
    Disconnected,

    #[error("Browser call {method} timed out after {duration_ms}ms")]
    Timeout { method: String, duration_ms: u64 },

    #[error("DevTools error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Page script failed: {message}")]
    Script { message: String },

    #[error("Browser page already closed")]
    Closed,
}

/// Errors related to the login and two-factor flow
#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("Required login control missing: {what}")]
    MissingControl { what: String },

    #[error("Login failed due to an unknown page state: {url}")]
    UnknownPageState { url: String },

    #[error("Landing page not reached after {waited_secs}s")]
    Timeout { waited_secs: u64 },

    #[error("Phone suffix must be exactly four digits, got {suffix:?}")]
    InvalidPhoneSuffix { suffix: String },

    #[error("Malformed two-factor options: {reason}")]
    Decode { reason: String },

    #[error("No two-factor destination ends with {suffix} (offered: {offered:?})")]
    PhoneSuffixNotFound { suffix: String, offered: Vec<String> },

    #[error("Session is not waiting for a two-factor code")]
    NotAwaitingCode,

    #[error("Session is closed")]
    SessionClosed,
}

/// Errors related to intercepted data retrieval and payload decoding
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Malformed payload from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Payload is missing field {field}")]
    MissingField { field: String },

    #[error("No {what} data received")]
    NoData { what: String },

    #[error("Session is not authenticated")]
    NotAuthenticated,
}

/// Errors related to order placement
#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("{what} not found, cannot continue")]
    MissingControl { what: String },

    #[error("Order endpoint {endpoint} returned {status}: {body}")]
    Gateway {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Order request failed: {0}")]
    Transport(String),

    #[error("Malformed order response: {0}")]
    Decode(String),

    #[error("Session is not authenticated")]
    NotAuthenticated,
}

/// Errors related to the persisted per-profile storage state
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Profile {profile} is already in use (lock file {lock_path:?})")]
    InUse { profile: String, lock_path: PathBuf },

    #[error("Invalid profile name: {0:?}")]
    InvalidName(String),

    #[error("Profile storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Profile state is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_error_formatting() {
        let err = LoginError::PhoneSuffixNotFound {
            suffix: "1234".to_string(),
            offered: vec!["xxx-xxx-9876".to_string()],
        };

        let msg = err.to_string();
        assert!(msg.contains("1234"));
        assert!(msg.contains("xxx-xxx-9876"));
    }

    #[test]
    fn test_browser_error_converts_into_login_error() {
        let err: LoginError = BrowserError::ElementNotFound {
            selector: "css:#signin-button".to_string(),
        }
        .into();

        assert!(matches!(err, LoginError::Browser(_)));
        assert!(err.to_string().contains("#signin-button"));
    }
}
