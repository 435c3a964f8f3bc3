use super::DataReader;
use crate::application::fetcher::PageAction;
use crate::domain::account::{AccountSummary, AccountsOverview};
use crate::domain::envelope::{EndpointKind, Envelope};
use crate::domain::errors::FetchError;
use crate::domain::ports::BrowserPage;
use crate::domain::selector::UrlMatcher;
use serde_json::Value;
use tracing::{debug, info};

impl<P: BrowserPage + ?Sized> DataReader<'_, P> {
    /// Account list from the dashboard envelope. The configured dashboard
    /// data URLs are tried in order; `None` when none of them carried the
    /// investment accounts entry.
    pub async fn fetch_accounts(&self) -> Result<Option<AccountsOverview>, FetchError> {
        let landing = self.endpoints.landing_page.clone();

        for url in &self.endpoints.account_info {
            let body = self
                .capture(
                    UrlMatcher::Prefix(url.clone()),
                    PageAction::NavigateAndReload(landing.clone()),
                )
                .await?;
            let Some(body) = body else {
                continue;
            };

            match self.investments(&body) {
                Some(investments) => {
                    let overview = AccountsOverview::from_investments(&investments)?;
                    info!(
                        "Read {} account(s) from {}",
                        overview.accounts.len(),
                        url
                    );
                    return Ok(Some(overview));
                }
                None => debug!("No investment accounts in envelope from {}", url),
            }
        }
        Ok(None)
    }

    fn investments(&self, body: &Value) -> Option<Value> {
        match Envelope::parse(body, &self.endpoints.envelope_paths) {
            Some(envelope) => {
                let found = envelope.find(EndpointKind::InvestmentAccounts).cloned();
                if found.is_none() {
                    debug!("Envelope entries not recognised: {:?}", envelope.unknown_urls());
                }
                found
            }
            None if body.get("chaseInvestments").is_some() => Some(body.clone()),
            None => None,
        }
    }
}

/// Details of one account, if the overview lists it.
pub fn account_details<'o>(
    overview: &'o AccountsOverview,
    account_id: &str,
) -> Option<&'o AccountSummary> {
    overview.account(account_id)
}
