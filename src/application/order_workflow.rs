//! Order placement through the trade ticket.
//!
//! Each decision point on the ticket records its text under a fixed label.
//! Optional screens that do not appear are recorded as such and the flow
//! moves on; a missing control the flow cannot continue without is an error.

use crate::application::fetcher::{BUY_LABEL, SYMBOL_LOOKUP_INPUT};
use crate::config::{EndpointConfig, TimeoutConfig};
use crate::domain::errors::{BrowserError, OrderError};
use crate::domain::order::{
    MessageLabel, OrderDuration, OrderMessages, OrderRequest, OrderResult, OrderStage,
};
use crate::domain::ports::BrowserPage;
use crate::domain::selector::Selector;
use tracing::{info, warn};

const PAGE_LOAD_ATTEMPTS: u32 = 4;

const QUOTE_NOTE: &str = ".NOTE";
const LOADING_SPINNER: &str = "#element-id";
const LIMIT_PRICE_INPUT: &str = "#tradeLimitPrice-text-input-field";
const STOP_PRICE_INPUT: &str = "#tradeStopPrice-text-input-field";
const QUANTITY_INPUT: &str = "#tradeQuantity-text-input-field";
const EXECUTION_OPTIONS: &str = "#tradeExecutionOptions-iconwrap";
const PREVIEW_BUTTON: &str = "#previewOrder";
const INVALID_ORDER_TEXT: &str = "#entry-trade-wrapper > div > div:nth-child(1) > div > div";
const WARNING_OVERLAY: &str = "#equityOverlayContent > div > div";
const SOFT_WARNING_TEXT: &str = "#equityOverlayContent #previewSoftWarning > ul";
const ACCEPT_WARNING_BUTTON: &str = "#equityOverlayContent .button--primary";
const ORDER_PREVIEW: &str = ".trade-wrapper";
const SUBMIT_BUTTON: &str = "#submitOrder";
const AFTER_HOURS_TEXT: &str = "#afterHoursModal > div.markets-message > div";
const AFTER_HOURS_CONFIRM: &str = "#confirmAfterHoursOrder";
const CONFIRMATION: &str = "#equityConfirmation > div";
const CONFIRMATION_TITLE: &str = "#equityConfirmation > div .alert__title-text";

const PAGE_LOADED: &str = "Order page loaded correctly.";
const NO_INVALID_MESSAGE: &str = "No invalid order message found.";
const NO_WARNING: &str = "No warning page found.";
const NO_PREVIEW: &str = "No order preview page found.";
const NO_AFTER_HOURS: &str = "No after hours warning page found.";
const NO_ALERT_TEXT: &str = "Alert Text not found.";
const NO_CONFIRMATION: &str = "No order confirmation page found. Order Failed.";

pub struct OrderWorkflow<'a, P: BrowserPage + ?Sized> {
    page: &'a P,
    endpoints: &'a EndpointConfig,
    timeouts: &'a TimeoutConfig,
}

impl<'a, P: BrowserPage + ?Sized> OrderWorkflow<'a, P> {
    pub fn new(page: &'a P, endpoints: &'a EndpointConfig, timeouts: &'a TimeoutConfig) -> Self {
        Self {
            page,
            endpoints,
            timeouts,
        }
    }

    pub async fn place(&self, request: &OrderRequest) -> Result<OrderResult, OrderError> {
        if let Err(reason) = request.validate() {
            warn!("Refusing order for {}: {}", request.symbol, reason);
            return Ok(OrderResult::invalid(reason.to_string()));
        }

        let mut messages = OrderMessages::default();
        if !self.load_ticket(request, &mut messages).await? {
            return Ok(OrderResult::new(OrderStage::PageNotLoaded, messages));
        }

        self.fill_ticket(request).await?;

        let preview = Selector::css(PREVIEW_BUTTON);
        self.click_required(&preview, "Preview button").await?;

        // Rejected by the site
        let invalid = Selector::css(INVALID_ORDER_TEXT);
        if self.page.wait_for(&invalid, self.timeouts.probe).await? {
            let text = self.text(&invalid).await?;
            info!("Order rejected on preview: {}", text);
            messages.set(MessageLabel::OrderInvalid, text);
            return Ok(OrderResult::new(OrderStage::Invalid, messages));
        }
        messages.set(MessageLabel::OrderInvalid, NO_INVALID_MESSAGE);

        // Soft warning
        if let Some(warning) = self.soft_warning().await? {
            messages.set(MessageLabel::Warning, warning);
            if !request.accept_warning {
                return Ok(OrderResult::new(OrderStage::WarningShown, messages));
            }
            self.click_required(
                &Selector::css(ACCEPT_WARNING_BUTTON),
                "Warning accept button",
            )
            .await?;
        } else {
            messages.set(MessageLabel::Warning, NO_WARNING);
        }

        // Preview, then the irrevocable submit
        let order_preview = Selector::css(ORDER_PREVIEW);
        if !self.page.wait_for(&order_preview, self.timeouts.probe).await? {
            messages.set(MessageLabel::OrderPreview, NO_PREVIEW);
            return Ok(OrderResult::new(OrderStage::Unconfirmed, messages));
        }
        messages.set(MessageLabel::OrderPreview, self.text(&order_preview).await?);
        if request.dry_run {
            info!("Dry run for {} stopped at preview", request.symbol);
            return Ok(OrderResult::new(OrderStage::PreviewShown, messages));
        }
        self.click_required(&Selector::css(SUBMIT_BUTTON), "Place order button")
            .await?;
        info!(
            "Submitted {} {} x{} for account {}",
            request.side, request.symbol, request.quantity, request.account_id
        );

        let mut result = self.after_submit(request, messages).await?;
        result.submitted = true;
        Ok(result)
    }

    /// Open the ticket and look the symbol up, reloading up to four times.
    async fn load_ticket(
        &self,
        request: &OrderRequest,
        messages: &mut OrderMessages,
    ) -> Result<bool, OrderError> {
        let url = self.endpoints.order_page_url(&request.account_id);

        for attempt in 1..=PAGE_LOAD_ATTEMPTS {
            match self.try_load_ticket(&url, &request.symbol).await {
                Ok(true) => {
                    messages.set(MessageLabel::OrderInvalid, PAGE_LOADED);
                    return Ok(true);
                }
                Ok(false) | Err(BrowserError::ElementNotFound { .. }) => {}
                Err(BrowserError::Timeout { method, .. }) => {
                    warn!("Order page load call {} timed out", method);
                }
                Err(e) => return Err(e.into()),
            }
            let text = format!(
                "Order page did not load correctly cannot continue. Tried {} times.",
                attempt
            );
            warn!("{}", text);
            messages.set(MessageLabel::OrderInvalid, text);
        }
        Ok(false)
    }

    async fn try_load_ticket(&self, url: &str, symbol: &str) -> Result<bool, BrowserError> {
        self.page.goto(url).await?;
        self.page.reload().await?;

        let t = self.timeouts;
        if !self
            .page
            .wait_for(&Selector::label(BUY_LABEL), t.order_page_load)
            .await?
        {
            return Ok(false);
        }
        let lookup = Selector::css(SYMBOL_LOOKUP_INPUT);
        self.page.fill(&lookup, symbol).await?;
        self.page.press(&lookup, "Enter").await?;

        Ok(self
            .page
            .wait_for(&Selector::css(QUOTE_NOTE), t.symbol_lookup)
            .await?
            && self
                .page
                .wait_hidden(&Selector::css(LOADING_SPINNER), t.order_page_load)
                .await?)
    }

    async fn fill_ticket(&self, request: &OrderRequest) -> Result<(), OrderError> {
        self.click_required(
            &Selector::label(request.side.ticket_label()),
            request.side.ticket_label(),
        )
        .await?;
        self.click_required(
            &Selector::label(request.price_type.ticket_label()),
            request.price_type.ticket_label(),
        )
        .await?;

        if let Some(limit) = request.limit_price.filter(|_| request.price_type.needs_limit_price()) {
            self.fill_required(LIMIT_PRICE_INPUT, &limit.to_string(), "Limit price field")
                .await?;
        }
        if let Some(stop) = request.stop_price.filter(|_| request.price_type.needs_stop_price()) {
            self.fill_required(STOP_PRICE_INPUT, &stop.to_string(), "Stop price field")
                .await?;
        }
        self.fill_required(QUANTITY_INPUT, &request.quantity.to_string(), "Quantity field")
            .await?;

        if request.duration == OrderDuration::ImmediateOrCancel {
            self.click_required(&Selector::css(EXECUTION_OPTIONS), "Execution options")
                .await?;
        }
        self.click_required(
            &Selector::label(request.duration.ticket_label()),
            request.duration.ticket_label(),
        )
        .await
    }

    /// Text of the soft warning, when the overlay carries one.
    async fn soft_warning(&self) -> Result<Option<String>, OrderError> {
        if !self
            .page
            .wait_for(&Selector::css(WARNING_OVERLAY), self.timeouts.probe)
            .await?
        {
            return Ok(None);
        }
        Ok(self
            .page
            .text_content(&Selector::css(SOFT_WARNING_TEXT))
            .await?
            .map(|t| t.trim().to_string()))
    }

    async fn after_submit(
        &self,
        request: &OrderRequest,
        mut messages: OrderMessages,
    ) -> Result<OrderResult, OrderError> {
        let after_hours = Selector::css(AFTER_HOURS_TEXT);
        if self.page.wait_for(&after_hours, self.timeouts.probe).await? {
            messages.set(MessageLabel::AfterHoursWarning, self.text(&after_hours).await?);
            if !request.after_hours {
                return Ok(OrderResult::new(OrderStage::AfterHoursPrompt, messages));
            }
            self.click_required(
                &Selector::css(AFTER_HOURS_CONFIRM),
                "After-hours confirm button",
            )
            .await?;
        } else {
            messages.set(MessageLabel::AfterHoursWarning, NO_AFTER_HOURS);
        }

        if !self
            .page
            .wait_for(&Selector::css(CONFIRMATION), self.timeouts.probe)
            .await?
        {
            messages.set(MessageLabel::OrderConfirmation, NO_CONFIRMATION);
            return Ok(OrderResult::new(OrderStage::Unconfirmed, messages));
        }

        match self
            .page
            .text_content(&Selector::css(CONFIRMATION_TITLE))
            .await?
        {
            Some(title) => {
                let title = title.replace('\n', " ").trim().to_string();
                info!("Order confirmation: {}", title);
                messages.set(MessageLabel::OrderConfirmation, title);
                Ok(OrderResult::new(OrderStage::ConfirmationShown, messages))
            }
            None => {
                messages.set(MessageLabel::OrderConfirmation, NO_ALERT_TEXT);
                Ok(OrderResult::new(OrderStage::Unconfirmed, messages))
            }
        }
    }

    async fn click_required(&self, selector: &Selector, what: &str) -> Result<(), OrderError> {
        if !self.page.wait_for(selector, self.timeouts.probe).await? {
            return Err(OrderError::MissingControl {
                what: what.to_string(),
            });
        }
        self.page.click(selector).await?;
        Ok(())
    }

    async fn fill_required(&self, css: &str, value: &str, what: &str) -> Result<(), OrderError> {
        let selector = Selector::css(css);
        if !self.page.wait_for(&selector, self.timeouts.probe).await? {
            return Err(OrderError::MissingControl {
                what: what.to_string(),
            });
        }
        self.page.fill(&selector, value).await?;
        Ok(())
    }

    async fn text(&self, selector: &Selector) -> Result<String, OrderError> {
        Ok(self
            .page
            .text_content(selector)
            .await?
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}
