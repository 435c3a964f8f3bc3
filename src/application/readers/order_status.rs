use super::DataReader;
use crate::application::fetcher::PageAction;
use crate::domain::envelope::{EndpointKind, unwrap_payload};
use crate::domain::errors::FetchError;
use crate::domain::order::OrderStatusSummary;
use crate::domain::ports::BrowserPage;
use crate::domain::selector::UrlMatcher;

impl<P: BrowserPage + ?Sized> DataReader<'_, P> {
    pub async fn fetch_order_statuses(
        &self,
        account_id: &str,
    ) -> Result<Option<Vec<OrderStatusSummary>>, FetchError> {
        let body = self
            .capture(
                UrlMatcher::Prefix(self.endpoints.order_info.clone()),
                PageAction::Navigate(self.endpoints.order_status_url(account_id)),
            )
            .await?;

        body.and_then(|b| {
            unwrap_payload(&b, EndpointKind::OrderSummaries, &self.endpoints.envelope_paths)
        })
        .map(|payload| OrderStatusSummary::list_from_payload(&payload))
        .transpose()
    }
}
