//! Account, holdings, quote and order-status readers.
//!
//! Each reader drives the page to the screen that loads its data, captures
//! the backing API response and parses it into the domain model.

mod accounts;
mod holdings;
mod order_status;
mod quotes;

use crate::application::fetcher::{InterceptFetcher, PageAction};
use crate::application::retry::RetryPolicy;
use crate::config::{EndpointConfig, TimeoutConfig};
use crate::domain::errors::FetchError;
use crate::domain::ports::BrowserPage;
use crate::domain::selector::UrlMatcher;
use serde_json::Value;

pub use accounts::account_details;

pub struct DataReader<'a, P: BrowserPage + ?Sized> {
    fetcher: InterceptFetcher<'a, P>,
    endpoints: &'a EndpointConfig,
}

impl<'a, P: BrowserPage + ?Sized> DataReader<'a, P> {
    pub fn new(
        page: &'a P,
        endpoints: &'a EndpointConfig,
        retry: &'a RetryPolicy,
        timeouts: &'a TimeoutConfig,
    ) -> Self {
        Self {
            fetcher: InterceptFetcher::new(page, retry, timeouts),
            endpoints,
        }
    }

    async fn capture(
        &self,
        matcher: UrlMatcher,
        action: PageAction,
    ) -> Result<Option<Value>, FetchError> {
        self.fetcher.fetch(&matcher, &action).await
    }
}
