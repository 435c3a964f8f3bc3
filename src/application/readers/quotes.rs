use super::DataReader;
use crate::application::fetcher::PageAction;
use crate::domain::envelope::{EndpointKind, unwrap_payload};
use crate::domain::errors::FetchError;
use crate::domain::ports::BrowserPage;
use crate::domain::quote::Quote;
use crate::domain::selector::UrlMatcher;

impl<P: BrowserPage + ?Sized> DataReader<'_, P> {
    /// Quote shown on the trade ticket after looking `symbol` up.
    /// Unlike the other readers, absence is an error.
    pub async fn fetch_quote(&self, account_id: &str, symbol: &str) -> Result<Quote, FetchError> {
        let url = self.endpoints.quote_url(symbol);
        let no_data = || FetchError::NoData {
            what: format!("quote for {}", symbol),
        };

        let body = self
            .capture(
                UrlMatcher::Exact(url.clone()),
                PageAction::LookupSymbol {
                    url: self.endpoints.order_page_url(account_id),
                    symbol: symbol.to_string(),
                },
            )
            .await?
            .ok_or_else(no_data)?;

        let payload = unwrap_payload(&body, EndpointKind::Quotes, &self.endpoints.envelope_paths)
            .ok_or_else(no_data)?;
        Quote::from_payload(&url, &payload)
    }
}
