//! Intercepted-response retrieval.
//!
//! The site fills its pages from background API calls. Rather than scrape the
//! rendered markup, the fetcher registers interest in one of those calls,
//! drives the page so the application issues it, and decodes the captured
//! JSON body.

use crate::application::retry::RetryPolicy;
use crate::config::TimeoutConfig;
use crate::domain::errors::{BrowserError, FetchError};
use crate::domain::ports::BrowserPage;
use crate::domain::selector::{Selector, UrlMatcher};
use serde_json::Value;
use tracing::{debug, info, warn};

pub(crate) const BUY_LABEL: &str = "Buy";
pub(crate) const SYMBOL_LOOKUP_INPUT: &str =
    "#equitySymbolLookup-block-autocomplete-validate-input-field";

/// What to do to the page so that the application issues the request.
#[derive(Debug, Clone, PartialEq)]
pub enum PageAction {
    Navigate(String),
    Reload,
    NavigateAndReload(String),
    /// Open the trade ticket and look a symbol up; the ticket then requests
    /// a quote.
    LookupSymbol { url: String, symbol: String },
}

impl PageAction {
    pub async fn perform<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        timeouts: &TimeoutConfig,
    ) -> Result<(), BrowserError> {
        match self {
            PageAction::Navigate(url) => page.goto(url).await,
            PageAction::Reload => page.reload().await,
            PageAction::NavigateAndReload(url) => {
                page.goto(url).await?;
                page.reload().await
            }
            PageAction::LookupSymbol { url, symbol } => {
                page.goto(url).await?;
                let buy = Selector::label(BUY_LABEL);
                if !page.wait_for(&buy, timeouts.order_page_load).await? {
                    return Err(BrowserError::ElementNotFound {
                        selector: buy.key(),
                    });
                }
                let input = Selector::css(SYMBOL_LOOKUP_INPUT);
                page.fill(&input, symbol).await?;
                page.press(&input, "Enter").await
            }
        }
    }
}

/// Captures one JSON response per call, with bounded retry.
pub struct InterceptFetcher<'a, P: BrowserPage + ?Sized> {
    page: &'a P,
    retry: &'a RetryPolicy,
    timeouts: &'a TimeoutConfig,
}

impl<'a, P: BrowserPage + ?Sized> InterceptFetcher<'a, P> {
    pub fn new(page: &'a P, retry: &'a RetryPolicy, timeouts: &'a TimeoutConfig) -> Self {
        Self {
            page,
            retry,
            timeouts,
        }
    }

    /// Body of the first successful response matching `matcher` after
    /// `action`, or `None` once every attempt came back empty.
    ///
    /// A capture that times out, or a response with a non-2xx status, is
    /// absence. A body that is not JSON is an error and is not retried.
    pub async fn fetch(
        &self,
        matcher: &UrlMatcher,
        action: &PageAction,
    ) -> Result<Option<Value>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.attempt(matcher, action).await {
                Ok(Some(body)) => {
                    info!("Captured response for {} (attempt {})", matcher, attempt);
                    return Ok(Some(body));
                }
                Ok(None) => {
                    if !self.retry.retry_on_absence || !self.retry.has_attempts_left(attempt) {
                        warn!(
                            "No response for {} after {} attempt(s)",
                            matcher, attempt
                        );
                        return Ok(None);
                    }
                    debug!("No response for {} on attempt {}, retrying", matcher, attempt);
                }
                Err(FetchError::Browser(e))
                    if self.retry.is_retryable(&e) && self.retry.has_attempts_left(attempt) =>
                {
                    warn!("Attempt {} for {} failed: {}. Retrying", attempt, matcher, e);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.retry.backoff(attempt)).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        matcher: &UrlMatcher,
        action: &PageAction,
    ) -> Result<Option<Value>, FetchError> {
        // Registered before the action so a fast response is not missed.
        let capture = self.page.capture_response(matcher.clone()).await?;
        action.perform(self.page, self.timeouts).await?;

        match capture.wait(self.timeouts.response).await {
            None => Ok(None),
            Some(response) if !response.is_success() => {
                debug!(
                    "Ignoring {} response from {}",
                    response.status, response.url
                );
                Ok(None)
            }
            Some(response) => response.json().map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::browser::CapturedResponse;
    use crate::infrastructure::mock::{PageCall, ScriptedPage};
    use serde_json::json;

    const URL: &str = "https://secure.chase.com/svc/rr/accounts/secure/v1/dashboard/data/list";

    fn matcher() -> UrlMatcher {
        UrlMatcher::Prefix(URL.to_string())
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .without_backoff()
    }

    #[tokio::test]
    async fn test_absence_is_retried_until_a_response_arrives() {
        let page = ScriptedPage::new("about:blank")
            .silent()
            .silent()
            .respond(CapturedResponse::json_ok(URL, &json!({"ok": true})));
        let retry = fast_retry(3);
        let timeouts = TimeoutConfig::default();

        let body = InterceptFetcher::new(&page, &retry, &timeouts)
            .fetch(&matcher(), &PageAction::Navigate("https://x/landing".to_string()))
            .await
            .unwrap();

        assert_eq!(body, Some(json!({"ok": true})));
        assert_eq!(page.remaining_deliveries(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_yield_none() {
        let page = ScriptedPage::new("about:blank").silent().silent().silent();
        let retry = fast_retry(2);
        let timeouts = TimeoutConfig::default();

        let body = InterceptFetcher::new(&page, &retry, &timeouts)
            .fetch(&matcher(), &PageAction::Reload)
            .await
            .unwrap();

        assert_eq!(body, None);
        // Third delivery was never consumed
        assert_eq!(page.remaining_deliveries(), 1);
    }

    #[tokio::test]
    async fn test_capture_is_registered_before_navigation() {
        let page = ScriptedPage::new("about:blank")
            .respond(CapturedResponse::json_ok(URL, &json!([])));
        let retry = fast_retry(1);
        let timeouts = TimeoutConfig::default();

        InterceptFetcher::new(&page, &retry, &timeouts)
            .fetch(&matcher(), &PageAction::Navigate("https://x/landing".to_string()))
            .await
            .unwrap();

        let calls = page.calls();
        assert_eq!(calls[0], PageCall::CaptureRegistered(URL.to_string()));
        assert_eq!(calls[1], PageCall::Goto("https://x/landing".to_string()));
    }

    #[tokio::test]
    async fn test_error_status_counts_as_absence() {
        let page = ScriptedPage::new("about:blank")
            .respond(CapturedResponse::new(URL, 503, b"{}".to_vec()))
            .respond(CapturedResponse::json_ok(URL, &json!({"n": 2})));
        let retry = fast_retry(2);
        let timeouts = TimeoutConfig::default();

        let body = InterceptFetcher::new(&page, &retry, &timeouts)
            .fetch(&matcher(), &PageAction::Reload)
            .await
            .unwrap();
        assert_eq!(body, Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_retried() {
        let page = ScriptedPage::new("about:blank")
            .respond(CapturedResponse::new(URL, 200, b"<html>".to_vec()))
            .respond(CapturedResponse::json_ok(URL, &json!({})));
        let retry = fast_retry(3);
        let timeouts = TimeoutConfig::default();

        let err = InterceptFetcher::new(&page, &retry, &timeouts)
            .fetch(&matcher(), &PageAction::Reload)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Decode { .. }));
        assert_eq!(page.remaining_deliveries(), 1);
    }

    #[tokio::test]
    async fn test_lookup_without_ticket_is_retried_then_reported() {
        // The Buy label never shows, so every attempt fails to find it
        let page = ScriptedPage::new("about:blank");
        let retry = fast_retry(2);
        let timeouts = TimeoutConfig::default();
        let action = PageAction::LookupSymbol {
            url: "https://x/trade".to_string(),
            symbol: "INTC".to_string(),
        };

        let err = InterceptFetcher::new(&page, &retry, &timeouts)
            .fetch(&matcher(), &action)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Browser(BrowserError::ElementNotFound { .. })
        ));
        let gotos = page
            .calls()
            .into_iter()
            .filter(|c| matches!(c, PageCall::Goto(_)))
            .count();
        assert_eq!(gotos, 2);
    }
}
