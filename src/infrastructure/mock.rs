//! Scripted stand-ins for the browser and the order API.
//!
//! `ScriptedPage` models the page as a set of visible selectors plus a queue
//! of network responses. Waits never sleep: an element is either visible when
//! probed or absent. Each registered response capture consumes exactly one
//! queued delivery on the next navigation, reload or key press, which makes
//! retry counts deterministic.

use crate::domain::browser::{CapturedResponse, ElementSnapshot, ResponseCapture, StoredCookie};
use crate::domain::errors::{BrowserError, OrderError};
use crate::domain::order::{ExecutionReply, OrderPayload, ValidationReply};
use crate::domain::ports::{BrowserPage, OrderGateway};
use crate::domain::selector::{Selector, UrlMatcher};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Side effect of clicking an element.
#[derive(Debug, Clone)]
pub enum Effect {
    NavigateTo(String),
    Show(Selector),
    Hide(Selector),
}

/// Next network response the page produces for a pending capture.
#[derive(Debug, Clone)]
pub enum Delivery {
    Respond(CapturedResponse),
    /// The application issued no matching request this time.
    Silent,
}

/// Interaction recorded by the scripted page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageCall {
    Goto(String),
    Reload,
    Click(String),
    ClickNth(String, usize),
    Fill(String, String),
    SendKeys(String, String),
    Press(String, String),
    SetAttribute(String, String, String),
    Scroll(i64),
    MouseClick,
    CaptureRegistered(String),
    Close,
}

struct PendingCapture {
    matcher: UrlMatcher,
    tx: Option<oneshot::Sender<CapturedResponse>>,
}

#[derive(Default)]
struct PageState {
    url: String,
    visible: HashSet<String>,
    texts: HashMap<String, String>,
    attributes: HashMap<(String, String), String>,
    values: HashMap<String, String>,
    elements: HashMap<String, Vec<ElementSnapshot>>,
    click_effects: HashMap<String, Vec<Effect>>,
    url_switch: Option<(usize, String)>,
    url_polls: usize,
    deliveries: VecDeque<Delivery>,
    pending: Vec<PendingCapture>,
    calls: Vec<PageCall>,
    cookies: Vec<StoredCookie>,
    closed: bool,
}

impl PageState {
    fn require_open(&self) -> Result<(), BrowserError> {
        if self.closed {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    fn require_visible(&self, selector: &Selector) -> Result<String, BrowserError> {
        self.require_open()?;
        let key = selector.key();
        if self.visible.contains(&key) {
            Ok(key)
        } else {
            Err(BrowserError::ElementNotFound { selector: key })
        }
    }

    fn apply(&mut self, key: &str) {
        let effects = self.click_effects.get(key).cloned().unwrap_or_default();
        for effect in effects {
            match effect {
                Effect::NavigateTo(url) => self.url = url,
                Effect::Show(sel) => {
                    self.visible.insert(sel.key());
                }
                Effect::Hide(sel) => {
                    self.visible.remove(&sel.key());
                }
            }
        }
    }

    /// Hand the next queued delivery to the oldest capture still waiting.
    fn trigger_network(&mut self) {
        let Some(capture) = self.pending.iter_mut().find(|c| c.tx.is_some()) else {
            return;
        };
        let Some(tx) = capture.tx.take() else {
            return;
        };
        if let Some(Delivery::Respond(response)) = self.deliveries.pop_front() {
            if capture.matcher.matches(&response.url) {
                let _ = tx.send(response);
            }
        }
        self.pending.retain(|c| c.tx.is_some());
    }
}

/// Fake `BrowserPage`. Clones share state, so a test can keep a handle
/// while a session owns the page.
#[derive(Clone, Default)]
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
}

impl ScriptedPage {
    pub fn new(url: impl Into<String>) -> Self {
        let page = Self::default();
        page.state().url = url.into();
        page
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn show(self, selector: Selector) -> Self {
        self.state().visible.insert(selector.key());
        self
    }

    pub fn with_text(self, selector: Selector, text: impl Into<String>) -> Self {
        {
            let mut state = self.state();
            let key = selector.key();
            state.texts.insert(key.clone(), text.into());
            state.visible.insert(key);
        }
        self
    }

    pub fn with_attribute(self, selector: Selector, name: &str, value: impl Into<String>) -> Self {
        {
            let mut state = self.state();
            let key = selector.key();
            state
                .attributes
                .insert((key.clone(), name.to_string()), value.into());
            state.visible.insert(key);
        }
        self
    }

    pub fn with_elements(self, selector: Selector, elements: Vec<ElementSnapshot>) -> Self {
        self.state().elements.insert(selector.key(), elements);
        self
    }

    pub fn on_click(self, selector: Selector, effect: Effect) -> Self {
        self.state()
            .click_effects
            .entry(selector.key())
            .or_default()
            .push(effect);
        self
    }

    pub fn on_click_nth(self, selector: Selector, index: usize, effect: Effect) -> Self {
        self.state()
            .click_effects
            .entry(nth_key(&selector, index))
            .or_default()
            .push(effect);
        self
    }

    /// Report `url` from the `polls`-th `current_url` call onwards.
    pub fn url_after_polls(self, polls: usize, url: impl Into<String>) -> Self {
        self.state().url_switch = Some((polls, url.into()));
        self
    }

    pub fn respond(self, response: CapturedResponse) -> Self {
        self.state().deliveries.push_back(Delivery::Respond(response));
        self
    }

    pub fn silent(self) -> Self {
        self.state().deliveries.push_back(Delivery::Silent);
        self
    }

    pub fn with_cookies(self, cookies: Vec<StoredCookie>) -> Self {
        self.state().cookies = cookies;
        self
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.state().calls.clone()
    }

    /// Calls that change the page or the account (everything but captures).
    pub fn interaction_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| !matches!(c, PageCall::CaptureRegistered(_)))
            .count()
    }

    pub fn value_of(&self, selector: &Selector) -> Option<String> {
        self.state().values.get(&selector.key()).cloned()
    }

    pub fn attribute_of(&self, selector: &Selector, name: &str) -> Option<String> {
        self.state()
            .attributes
            .get(&(selector.key(), name.to_string()))
            .cloned()
    }

    pub fn clicked(&self, selector: &Selector) -> bool {
        let key = selector.key();
        self.state()
            .calls
            .iter()
            .any(|c| matches!(c, PageCall::Click(k) if *k == key))
    }

    pub fn stored_cookies(&self) -> Vec<StoredCookie> {
        self.state().cookies.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn remaining_deliveries(&self) -> usize {
        self.state().deliveries.len()
    }
}

fn nth_key(selector: &Selector, index: usize) -> String {
    format!("{}[{}]", selector.key(), index)
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        state.calls.push(PageCall::Goto(url.to_string()));
        state.url = url.to_string();
        state.trigger_network();
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        state.calls.push(PageCall::Reload);
        state.trigger_network();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        state.url_polls += 1;
        if let Some((after, url)) = state.url_switch.clone() {
            if state.url_polls >= after {
                state.url = url;
                state.url_switch = None;
            }
        }
        Ok(state.url.clone())
    }

    async fn wait_for(&self, selector: &Selector, _timeout: Duration) -> Result<bool, BrowserError> {
        let state = self.state();
        state.require_open()?;
        Ok(state.visible.contains(&selector.key()))
    }

    async fn wait_hidden(
        &self,
        selector: &Selector,
        _timeout: Duration,
    ) -> Result<bool, BrowserError> {
        let state = self.state();
        state.require_open()?;
        Ok(!state.visible.contains(&selector.key()))
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        let mut state = self.state();
        let key = state.require_visible(selector)?;
        state.calls.push(PageCall::Click(key.clone()));
        state.apply(&key);
        Ok(())
    }

    async fn click_nth(&self, selector: &Selector, index: usize) -> Result<(), BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        let key = selector.key();
        let count = state.elements.get(&key).map_or(0, Vec::len);
        if index >= count {
            return Err(BrowserError::ElementNotFound {
                selector: nth_key(selector, index),
            });
        }
        state.calls.push(PageCall::ClickNth(key, index));
        state.apply(&nth_key(selector, index));
        Ok(())
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        let mut state = self.state();
        let key = state.require_visible(selector)?;
        state.calls.push(PageCall::Fill(key.clone(), text.to_string()));
        state.values.insert(key, text.to_string());
        Ok(())
    }

    async fn send_keys(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        let mut state = self.state();
        let key = state.require_visible(selector)?;
        state
            .calls
            .push(PageCall::SendKeys(key.clone(), text.to_string()));
        state.values.entry(key).or_default().push_str(text);
        Ok(())
    }

    async fn press(&self, selector: &Selector, key_name: &str) -> Result<(), BrowserError> {
        let mut state = self.state();
        let key = state.require_visible(selector)?;
        state.calls.push(PageCall::Press(key, key_name.to_string()));
        state.trigger_network();
        Ok(())
    }

    async fn text_content(&self, selector: &Selector) -> Result<Option<String>, BrowserError> {
        let state = self.state();
        state.require_open()?;
        let key = selector.key();
        if !state.visible.contains(&key) {
            return Ok(None);
        }
        Ok(Some(state.texts.get(&key).cloned().unwrap_or_default()))
    }

    async fn attribute(
        &self,
        selector: &Selector,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let state = self.state();
        state.require_open()?;
        Ok(state
            .attributes
            .get(&(selector.key(), name.to_string()))
            .cloned())
    }

    async fn set_attribute(
        &self,
        selector: &Selector,
        name: &str,
        value: &str,
    ) -> Result<(), BrowserError> {
        let mut state = self.state();
        let key = state.require_visible(selector)?;
        state.calls.push(PageCall::SetAttribute(
            key.clone(),
            name.to_string(),
            value.to_string(),
        ));
        state
            .attributes
            .insert((key, name.to_string()), value.to_string());
        Ok(())
    }

    async fn elements(&self, selector: &Selector) -> Result<Vec<ElementSnapshot>, BrowserError> {
        let state = self.state();
        state.require_open()?;
        Ok(state.elements.get(&selector.key()).cloned().unwrap_or_default())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<(), BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        state.calls.push(PageCall::Scroll(delta_y));
        Ok(())
    }

    async fn mouse_click_at(&self, _x: f64, _y: f64) -> Result<(), BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        state.calls.push(PageCall::MouseClick);
        Ok(())
    }

    async fn capture_response(&self, matcher: UrlMatcher) -> Result<ResponseCapture, BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        let (capture, tx) = ResponseCapture::new(matcher.clone());
        state
            .calls
            .push(PageCall::CaptureRegistered(matcher.pattern().to_string()));
        state.pending.push(PendingCapture {
            matcher,
            tx: Some(tx),
        });
        Ok(capture)
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
        let state = self.state();
        state.require_open()?;
        Ok(state.cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        for cookie in cookies {
            state
                .cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let mut state = self.state();
        state.require_open()?;
        state.calls.push(PageCall::Close);
        state.closed = true;
        state.pending.clear();
        Ok(())
    }
}

/// Call made against the recording gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Validate(OrderPayload),
    Execute(OrderPayload, String),
}

/// `OrderGateway` replaying queued replies and recording every call.
#[derive(Default)]
pub struct RecordingOrderGateway {
    validations: Mutex<VecDeque<Result<ValidationReply, OrderError>>>,
    executions: Mutex<VecDeque<Result<ExecutionReply, OrderError>>>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl RecordingOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validation(self, reply: Result<ValidationReply, OrderError>) -> Self {
        lock(&self.validations).push_back(reply);
        self
    }

    pub fn with_execution(self, reply: Result<ExecutionReply, OrderError>) -> Self {
        lock(&self.executions).push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn executed(&self) -> bool {
        lock(&self.calls)
            .iter()
            .any(|c| matches!(c, GatewayCall::Execute(..)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl OrderGateway for RecordingOrderGateway {
    async fn validate(&self, payload: &OrderPayload) -> Result<ValidationReply, OrderError> {
        lock(&self.calls).push(GatewayCall::Validate(payload.clone()));
        lock(&self.validations)
            .pop_front()
            .unwrap_or_else(|| Err(OrderError::Transport("no scripted validation".to_string())))
    }

    async fn execute(
        &self,
        payload: &OrderPayload,
        exchange_order_id: &str,
    ) -> Result<ExecutionReply, OrderError> {
        lock(&self.calls).push(GatewayCall::Execute(
            payload.clone(),
            exchange_order_id.to_string(),
        ));
        lock(&self.executions)
            .pop_front()
            .unwrap_or_else(|| Err(OrderError::Transport("no scripted execution".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_capture_receives_delivery_on_navigation() {
        let page = ScriptedPage::new("about:blank")
            .respond(CapturedResponse::json_ok("https://x/data", &json!({"a": 1})));
        let capture = page
            .capture_response(UrlMatcher::Exact("https://x/data".to_string()))
            .await
            .unwrap();
        page.goto("https://x/page").await.unwrap();

        let response = capture.wait(Duration::from_millis(50)).await.unwrap();
        assert_eq!(response.json().unwrap(), json!({"a": 1}));
        assert_eq!(page.remaining_deliveries(), 0);
    }

    #[tokio::test]
    async fn test_navigation_without_capture_keeps_queue() {
        let page = ScriptedPage::new("about:blank")
            .respond(CapturedResponse::json_ok("https://x/data", &json!({})));
        page.goto("https://x/page").await.unwrap();
        assert_eq!(page.remaining_deliveries(), 1);
    }

    #[tokio::test]
    async fn test_click_effects_and_closed_page() {
        let button = Selector::css("#go");
        let page = ScriptedPage::new("https://x/a")
            .show(button.clone())
            .on_click(button.clone(), Effect::NavigateTo("https://x/b".to_string()));

        page.click(&button).await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://x/b");

        page.close().await.unwrap();
        assert!(matches!(page.click(&button).await, Err(BrowserError::Closed)));
    }

    #[tokio::test]
    async fn test_missing_element_click_fails() {
        let page = ScriptedPage::new("https://x/a");
        let err = page.click(&Selector::css("#nope")).await.unwrap_err();
        assert!(matches!(err, BrowserError::ElementNotFound { .. }));
    }
}
