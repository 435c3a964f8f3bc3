use super::DataReader;
use crate::application::fetcher::PageAction;
use crate::domain::envelope::{EndpointKind, unwrap_payload};
use crate::domain::errors::FetchError;
use crate::domain::holdings::Holdings;
use crate::domain::ports::BrowserPage;
use crate::domain::selector::UrlMatcher;
use tracing::info;

impl<P: BrowserPage + ?Sized> DataReader<'_, P> {
    /// Positions of one account, captured while its portfolio page loads.
    pub async fn fetch_holdings(&self, account_id: &str) -> Result<Option<Holdings>, FetchError> {
        let body = self
            .capture(
                UrlMatcher::Prefix(self.endpoints.holdings_json.clone()),
                PageAction::Navigate(self.endpoints.account_holdings_url(account_id)),
            )
            .await?;
        let Some(body) = body else {
            return Ok(None);
        };

        let Some(payload) =
            unwrap_payload(&body, EndpointKind::Positions, &self.endpoints.envelope_paths)
        else {
            return Ok(None);
        };
        let holdings = Holdings::from_payload(&payload)?;
        info!(
            "Read {} position(s) for account {}",
            holdings.positions.len(),
            account_id
        );
        Ok(Some(holdings))
    }
}
