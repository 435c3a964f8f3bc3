//! `BrowserPage` over a raw DevTools connection.
//!
//! Element work is done in page script: every selector kind resolves to a
//! list of elements through one resolver (CSS descends into open shadow roots,
//! XPath uses `document.evaluate`, text picks the innermost matching element),
//! then a small body acts on that list. Typing and key presses go through the
//! Input domain so the page sees trusted events.

use super::connection::{CdpConnection, CdpEvent};
use super::launcher;
use crate::config::BrowserConfig;
use crate::domain::browser::{CapturedResponse, ElementSnapshot, ResponseCapture, StoredCookie};
use crate::domain::errors::BrowserError;
use crate::domain::ports::BrowserPage;
use crate::domain::selector::{Selector, UrlMatcher};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const RESOLVER: &str = r#"
const __visible = (el) => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
const __deep = (root, css) => {
  const found = [...root.querySelectorAll(css)];
  for (const host of root.querySelectorAll('*')) {
    if (host.shadowRoot) found.push(...__deep(host.shadowRoot, css));
  }
  return found;
};
const __resolve = (kind, expr) => {
  if (kind === 'css') return __deep(document, expr);
  if (kind === 'xpath') {
    const snap = document.evaluate(expr, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const out = [];
    for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
    return out;
  }
  const needle = expr.toLowerCase();
  const has = (el) => (el.innerText || '').toLowerCase().includes(needle);
  return [...document.querySelectorAll('body *')].filter((el) => has(el) && ![...el.children].some(has));
};
"#;

/// Build a self-contained expression that resolves `selector` into `els` and
/// evaluates `body` with it in scope.
fn element_script(selector: &Selector, body: &str) -> String {
    format!(
        "(() => {{{resolver}\nconst els = __resolve({kind}, {expr});\n{body}\n}})()",
        resolver = RESOLVER,
        kind = js_string(selector.kind()),
        expr = js_string(selector.expression()),
        body = body,
    )
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Key definition for `Input.dispatchKeyEvent`: (key, code, keyCode, text).
fn key_definition(key: &str) -> (&str, &str, u32, Option<&'static str>) {
    match key {
        "Enter" => ("Enter", "Enter", 13, Some("\r")),
        "Tab" => ("Tab", "Tab", 9, None),
        "Escape" => ("Escape", "Escape", 27, None),
        "Backspace" => ("Backspace", "Backspace", 8, None),
        other => (other, other, 0, None),
    }
}

/// Cookies as reported by `Network.getAllCookies`. Session cookies carry
/// `expires: -1`, which is dropped rather than replayed.
fn cookies_from_reply(reply: &Value) -> Result<Vec<StoredCookie>, BrowserError> {
    let raw = reply.get("cookies").cloned().unwrap_or_else(|| json!([]));
    let mut cookies: Vec<StoredCookie> =
        serde_json::from_value(raw).map_err(|e| BrowserError::Script {
            message: format!("unexpected cookie shape: {}", e),
        })?;
    for cookie in &mut cookies {
        if cookie.expires.is_some_and(|e| e < 0.0) {
            cookie.expires = None;
        }
    }
    Ok(cookies)
}

/// Body of a `Network.getResponseBody` reply.
fn response_body(reply: &Value) -> Result<Vec<u8>, BrowserError> {
    let body = reply.get("body").and_then(Value::as_str).unwrap_or_default();
    if reply
        .get("base64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        BASE64.decode(body).map_err(|e| BrowserError::Script {
            message: format!("response body is not valid base64: {}", e),
        })
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

pub struct CdpPage {
    conn: CdpConnection,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
}

impl CdpPage {
    /// Start a browser as configured and attach to its first tab.
    pub async fn launch(config: &BrowserConfig) -> anyhow::Result<Self> {
        let launched = launcher::launch(config).await?;
        let page = Self::attach(&launched.ws_url).await?;
        *page.child.lock().await = Some(launched.child);
        Ok(page)
    }

    /// Attach to an already running tab by its DevTools websocket URL.
    pub async fn attach(ws_url: &str) -> anyhow::Result<Self> {
        let conn = CdpConnection::connect(ws_url).await?;
        for domain in ["Page", "Network", "Runtime"] {
            conn.call(&format!("{}.enable", domain), json!({}), CALL_TIMEOUT)
                .await?;
        }
        Ok(Self {
            conn,
            child: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        self.conn.call(method, params, CALL_TIMEOUT).await
    }

    /// Evaluate an expression and return its value.
    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let reply = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = reply.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script exception")
                .to_string();
            return Err(BrowserError::Script { message });
        }
        Ok(reply.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    async fn on_elements(&self, selector: &Selector, body: &str) -> Result<Value, BrowserError> {
        self.evaluate(&element_script(selector, body)).await
    }

    /// Run `body`, which returns `false` when it found nothing to act on.
    async fn act(&self, selector: &Selector, body: &str) -> Result<(), BrowserError> {
        match self.on_elements(selector, body).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::ElementNotFound {
                selector: selector.key(),
            }),
        }
    }

    async fn focus(&self, selector: &Selector) -> Result<(), BrowserError> {
        self.act(
            selector,
            "const el = els.find(__visible) || els[0]; if (!el) return false; el.focus(); return true;",
        )
        .await
    }

    async fn poll(
        &self,
        selector: &Selector,
        body: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.on_elements(selector, body).await? == Value::Bool(true) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Issue a navigation call and wait for the next load event.
    async fn navigate(&self, method: &str, params: Value) -> Result<(), BrowserError> {
        let mut events = self.conn.subscribe();
        let reply = self.call(method, params).await?;
        if let Some(error) = reply
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
        {
            return Err(BrowserError::Script {
                message: format!("navigation failed: {}", error),
            });
        }

        let loaded = tokio::time::timeout(NAVIGATION_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(event) if event.method == "Page.loadEventFired" => return true,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await;

        match loaded {
            Ok(true) => Ok(()),
            Ok(false) => Err(BrowserError::Disconnected),
            Err(_) => {
                warn!(
                    "{} did not fire a load event within {}s",
                    method,
                    NAVIGATION_TIMEOUT.as_secs()
                );
                Ok(())
            }
        }
    }

    async fn insert_text(&self, text: &str) -> Result<(), BrowserError> {
        self.call("Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }
}

/// Follow network events until a response matching `matcher` has finished
/// loading, then fetch its body.
async fn deliver_response(
    conn: CdpConnection,
    mut events: broadcast::Receiver<CdpEvent>,
    matcher: UrlMatcher,
    mut tx: oneshot::Sender<CapturedResponse>,
) {
    let mut matched: Option<(String, String, u16)> = None;

    loop {
        let event = tokio::select! {
            _ = tx.closed() => return,
            event = events.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Response capture for {} skipped {} events", matcher, n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let request_id = event.params.get("requestId").and_then(Value::as_str);
        match (event.method.as_str(), &matched) {
            ("Network.responseReceived", None) => {
                let url = event
                    .params
                    .pointer("/response/url")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if matcher.matches(url)
                    && let Some(id) = request_id
                {
                    let status = event
                        .params
                        .pointer("/response/status")
                        .and_then(Value::as_u64)
                        .unwrap_or_default() as u16;
                    debug!("Captured {} ({}) as request {}", url, status, id);
                    matched = Some((id.to_string(), url.to_string(), status));
                }
            }
            ("Network.loadingFinished", Some((id, url, status))) if request_id == Some(id.as_str()) => {
                let body = match conn
                    .call(
                        "Network.getResponseBody",
                        json!({ "requestId": id }),
                        CALL_TIMEOUT,
                    )
                    .await
                    .and_then(|reply| response_body(&reply))
                {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Could not read body of {}: {}", url, e);
                        return;
                    }
                };
                let _ = tx.send(CapturedResponse::new(url.clone(), *status, body));
                return;
            }
            ("Network.loadingFailed", Some((id, url, _))) if request_id == Some(id.as_str()) => {
                warn!("Request for {} failed before completing", url);
                return;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!("goto {}", url);
        self.navigate("Page.navigate", json!({ "url": url })).await
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.navigate("Page.reload", json!({})).await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .evaluate("location.href")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn wait_for(&self, selector: &Selector, timeout: Duration) -> Result<bool, BrowserError> {
        self.poll(selector, "return els.some(__visible);", timeout)
            .await
    }

    async fn wait_hidden(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        self.poll(selector, "return !els.some(__visible);", timeout)
            .await
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        self.act(
            selector,
            "const el = els.find(__visible) || els[0]; if (!el) return false; \
             el.scrollIntoView({block: 'center'}); el.click(); return true;",
        )
        .await
    }

    async fn click_nth(&self, selector: &Selector, index: usize) -> Result<(), BrowserError> {
        self.act(
            selector,
            &format!(
                "const el = els[{}]; if (!el) return false; \
                 el.scrollIntoView({{block: 'center'}}); el.click(); return true;",
                index
            ),
        )
        .await
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        self.act(
            selector,
            "const el = els.find(__visible) || els[0]; if (!el) return false; el.focus(); \
             el.value = ''; el.dispatchEvent(new Event('input', {bubbles: true})); return true;",
        )
        .await?;
        self.insert_text(text).await
    }

    async fn send_keys(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        self.focus(selector).await?;
        self.insert_text(text).await
    }

    async fn press(&self, selector: &Selector, key: &str) -> Result<(), BrowserError> {
        self.focus(selector).await?;
        let (key, code, key_code, text) = key_definition(key);

        let mut down = json!({
            "type": "keyDown",
            "key": key,
            "code": code,
            "windowsVirtualKeyCode": key_code,
        });
        if let Some(text) = text {
            down["text"] = json!(text);
        }
        self.call("Input.dispatchKeyEvent", down).await?;
        self.call(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key,
                "code": code,
                "windowsVirtualKeyCode": key_code,
            }),
        )
        .await?;
        Ok(())
    }

    async fn text_content(&self, selector: &Selector) -> Result<Option<String>, BrowserError> {
        let value = self
            .on_elements(
                selector,
                "const el = els.find(__visible); return el ? el.innerText : null;",
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn attribute(
        &self,
        selector: &Selector,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let value = self
            .on_elements(
                selector,
                &format!(
                    "return els[0] ? els[0].getAttribute({}) : null;",
                    js_string(name)
                ),
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn set_attribute(
        &self,
        selector: &Selector,
        name: &str,
        value: &str,
    ) -> Result<(), BrowserError> {
        self.act(
            selector,
            &format!(
                "const el = els[0]; if (!el) return false; el.setAttribute({}, {}); \
                 el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;",
                js_string(name),
                js_string(value)
            ),
        )
        .await
    }

    async fn elements(&self, selector: &Selector) -> Result<Vec<ElementSnapshot>, BrowserError> {
        let value = self
            .on_elements(
                selector,
                "return els.map((el) => ({ \
                   text: el.innerText || el.textContent || '', \
                   attributes: Object.fromEntries([...el.attributes].map((a) => [a.name, a.value])) \
                 }));",
            )
            .await?;
        serde_json::from_value(value).map_err(|e| BrowserError::Script {
            message: format!("unexpected element snapshot: {}", e),
        })
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<(), BrowserError> {
        self.evaluate(&format!("window.scrollBy(0, {})", delta_y))
            .await
            .map(|_| ())
    }

    async fn mouse_click_at(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        for kind in ["mousePressed", "mouseReleased"] {
            self.call(
                "Input.dispatchMouseEvent",
                json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
            )
            .await?;
        }
        Ok(())
    }

    async fn capture_response(&self, matcher: UrlMatcher) -> Result<ResponseCapture, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        // Subscribe now so nothing the next action triggers is missed
        let events = self.conn.subscribe();
        let (capture, tx) = ResponseCapture::new(matcher.clone());
        tokio::spawn(deliver_response(self.conn.clone(), events, matcher, tx));
        Ok(capture)
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
        let reply = self.call("Network.getAllCookies", json!({})).await?;
        cookies_from_reply(&reply)
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
        if cookies.is_empty() {
            return Ok(());
        }
        self.call("Network.setCookies", json!({ "cookies": cookies }))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self
            .conn
            .call("Browser.close", json!({}), Duration::from_secs(5))
            .await
        {
            debug!("Browser.close: {}", e);
        }
        self.conn.shutdown().await;

        if let Some(mut child) = self.child.lock().await.take()
            && let Err(e) = child.kill().await
        {
            debug!("Browser process already gone: {}", e);
        }
        info!("Browser closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_script_embeds_quoted_selector() {
        let script = element_script(&Selector::css("a[title=\"x\"]"), "return els.length;");
        assert!(script.contains(r#"__resolve("css", "a[title=\"x\"]")"#));
        assert!(script.trim_end().ends_with("})()"));
    }

    #[test]
    fn test_key_definition_enter_produces_text() {
        assert_eq!(key_definition("Enter"), ("Enter", "Enter", 13, Some("\r")));
        assert_eq!(key_definition("a"), ("a", "a", 0, None));
    }

    #[test]
    fn test_cookies_drop_session_expiry() {
        let reply = json!({"cookies": [
            {"name": "s", "value": "1", "domain": ".chase.com", "path": "/",
             "expires": -1, "size": 2, "httpOnly": true, "secure": true, "session": true},
            {"name": "p", "value": "2", "domain": "secure.chase.com", "path": "/",
             "expires": 1900000000.5, "httpOnly": false, "secure": true, "sameSite": "Lax"}
        ]});
        let cookies = cookies_from_reply(&reply).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].expires, None);
        assert!(cookies[0].http_only);
        assert_eq!(cookies[1].expires, Some(1_900_000_000.5));
        assert_eq!(cookies[1].same_site.as_deref(), Some("Lax"));
    }

    #[test]
    fn test_response_body_decodes_base64() {
        let reply = json!({"body": BASE64.encode(b"{\"a\":1}"), "base64Encoded": true});
        assert_eq!(response_body(&reply).unwrap(), b"{\"a\":1}".to_vec());

        let plain = json!({"body": "{}", "base64Encoded": false});
        assert_eq!(response_body(&plain).unwrap(), b"{}".to_vec());

        let broken = json!({"body": "***", "base64Encoded": true});
        assert!(response_body(&broken).is_err());
    }
}
