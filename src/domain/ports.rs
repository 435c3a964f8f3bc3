use crate::domain::browser::{ElementSnapshot, ResponseCapture, StoredCookie};
use crate::domain::errors::{BrowserError, OrderError};
use crate::domain::order::{ExecutionReply, OrderPayload, ValidationReply};
use crate::domain::selector::{Selector, UrlMatcher};
use async_trait::async_trait;
use std::time::Duration;

/// One browser tab driven by an automation backend.
///
/// Lookups never wait unless a timeout is passed: `wait_for` is the only
/// blocking probe, and it reports absence as `Ok(false)` so callers can treat a
/// missing challenge variant as a signal rather than a failure. Actions on a
/// missing element fail with `BrowserError::ElementNotFound`.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;
    async fn reload(&self) -> Result<(), BrowserError>;
    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn wait_for(&self, selector: &Selector, timeout: Duration) -> Result<bool, BrowserError>;
    async fn wait_hidden(&self, selector: &Selector, timeout: Duration)
    -> Result<bool, BrowserError>;

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError>;
    async fn click_nth(&self, selector: &Selector, index: usize) -> Result<(), BrowserError>;
    /// Replace the value of an input.
    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError>;
    /// Append keystrokes to an input without clearing it.
    async fn send_keys(&self, selector: &Selector, text: &str) -> Result<(), BrowserError>;
    async fn press(&self, selector: &Selector, key: &str) -> Result<(), BrowserError>;

    async fn text_content(&self, selector: &Selector) -> Result<Option<String>, BrowserError>;
    async fn attribute(&self, selector: &Selector, name: &str)
    -> Result<Option<String>, BrowserError>;
    /// Set an attribute and dispatch a bubbling `change` event.
    async fn set_attribute(
        &self,
        selector: &Selector,
        name: &str,
        value: &str,
    ) -> Result<(), BrowserError>;
    async fn elements(&self, selector: &Selector) -> Result<Vec<ElementSnapshot>, BrowserError>;

    async fn scroll_by(&self, delta_y: i64) -> Result<(), BrowserError>;
    async fn mouse_click_at(&self, x: f64, y: f64) -> Result<(), BrowserError>;

    /// Register interest in the next response whose URL matches. Must be
    /// called before the action that triggers the request.
    async fn capture_response(&self, matcher: UrlMatcher) -> Result<ResponseCapture, BrowserError>;

    async fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError>;
    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// HTTP surface of the API-driven order flow.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn validate(&self, payload: &OrderPayload) -> Result<ValidationReply, OrderError>;
    async fn execute(
        &self,
        payload: &OrderPayload,
        exchange_order_id: &str,
    ) -> Result<ExecutionReply, OrderError>;
}
