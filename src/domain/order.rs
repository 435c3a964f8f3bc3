use crate::domain::errors::FetchError;
use crate::domain::lenient;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
    SellAll,
}

impl OrderSide {
    pub fn code(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
            OrderSide::SellAll => "SELL_ALL",
        }
    }

    /// Text of the radio label on the trade ticket.
    pub fn ticket_label(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
            OrderSide::SellAll => "Sell All",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl PriceType {
    pub const ALL: [PriceType; 4] = [
        PriceType::Market,
        PriceType::Limit,
        PriceType::Stop,
        PriceType::StopLimit,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            PriceType::Market => "MARKET",
            PriceType::Limit => "LIMIT",
            PriceType::Stop => "STOP",
            PriceType::StopLimit => "STOP_LIMIT",
        }
    }

    pub fn ticket_label(&self) -> &'static str {
        match self {
            PriceType::Market => "Market",
            PriceType::Limit => "Limit",
            PriceType::Stop => "Stop",
            PriceType::StopLimit => "Stop Limit",
        }
    }

    pub fn needs_limit_price(&self) -> bool {
        matches!(self, PriceType::Limit | PriceType::StopLimit)
    }

    pub fn needs_stop_price(&self) -> bool {
        matches!(self, PriceType::Stop | PriceType::StopLimit)
    }

    /// Durations the site accepts for this price type.
    pub fn allows(&self, duration: OrderDuration) -> bool {
        match self {
            PriceType::Market => {
                matches!(duration, OrderDuration::Day | OrderDuration::OnTheClose)
            }
            PriceType::Stop | PriceType::StopLimit => matches!(
                duration,
                OrderDuration::Day | OrderDuration::GoodTillCancelled
            ),
            PriceType::Limit => true,
        }
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderDuration {
    Day,
    GoodTillCancelled,
    OnTheOpen,
    OnTheClose,
    ImmediateOrCancel,
}

impl OrderDuration {
    pub const ALL: [OrderDuration; 5] = [
        OrderDuration::Day,
        OrderDuration::GoodTillCancelled,
        OrderDuration::OnTheOpen,
        OrderDuration::OnTheClose,
        OrderDuration::ImmediateOrCancel,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            OrderDuration::Day => "DAY",
            OrderDuration::GoodTillCancelled => "GOOD_TILL_CANCELLED",
            OrderDuration::OnTheOpen => "ON_THE_OPEN",
            OrderDuration::OnTheClose => "ON_THE_CLOSE",
            OrderDuration::ImmediateOrCancel => "IMMEDIATE_OR_CANCEL",
        }
    }

    pub fn ticket_label(&self) -> &'static str {
        match self {
            OrderDuration::Day => "Day",
            OrderDuration::GoodTillCancelled => "Good 'til canceled",
            OrderDuration::OnTheOpen => "On open",
            OrderDuration::OnTheClose => "On close",
            OrderDuration::ImmediateOrCancel => "Immediate or Cancel",
        }
    }
}

impl fmt::Display for OrderDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeCode {
    #[default]
    Cash,
    Margin,
}

/// Reasons an order is refused before anything is sent to the site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidOrder {
    #[error("Market orders must be DAY or ON THE CLOSE.")]
    MarketDuration,
    #[error("Stop orders must be DAY or GOOD TILL CANCELLED.")]
    StopDuration,
    #[error("Limit orders must have a limit price.")]
    MissingLimitPrice,
    #[error("Stop orders must have a stop price.")]
    MissingStopPrice,
    #[error("Order quantity must be greater than zero.")]
    ZeroQuantity,
}

/// A declarative equity order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub price_type: PriceType,
    pub duration: OrderDuration,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub type_code: TypeCode,
    /// Confirm the after-hours prompt when it appears.
    pub after_hours: bool,
    /// Stop after the preview, before the irrevocable submit.
    pub dry_run: bool,
    /// Dismiss soft warnings instead of halting on them.
    pub accept_warning: bool,
}

impl OrderRequest {
    /// A DAY market order. Dry run is on until `live()` is called.
    pub fn market(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: u64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            price_type: PriceType::Market,
            duration: OrderDuration::Day,
            limit_price: None,
            stop_price: None,
            type_code: TypeCode::Cash,
            after_hours: true,
            dry_run: true,
            accept_warning: true,
        }
    }

    pub fn limit(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: u64,
        limit_price: Decimal,
    ) -> Self {
        Self {
            price_type: PriceType::Limit,
            limit_price: Some(limit_price),
            ..Self::market(account_id, symbol, side, quantity)
        }
    }

    pub fn with_price_type(mut self, price_type: PriceType) -> Self {
        self.price_type = price_type;
        self
    }

    pub fn with_duration(mut self, duration: OrderDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop_price(mut self, price: Decimal) -> Self {
        self.stop_price = Some(price);
        self
    }

    pub fn with_type_code(mut self, type_code: TypeCode) -> Self {
        self.type_code = type_code;
        self
    }

    pub fn with_after_hours(mut self, after_hours: bool) -> Self {
        self.after_hours = after_hours;
        self
    }

    pub fn with_accept_warning(mut self, accept: bool) -> Self {
        self.accept_warning = accept;
        self
    }

    pub fn live(mut self) -> Self {
        self.dry_run = false;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidOrder> {
        if self.quantity == 0 {
            return Err(InvalidOrder::ZeroQuantity);
        }
        if !self.price_type.allows(self.duration) {
            return Err(match self.price_type {
                PriceType::Market => InvalidOrder::MarketDuration,
                _ => InvalidOrder::StopDuration,
            });
        }
        if self.price_type.needs_limit_price() && self.limit_price.is_none() {
            return Err(InvalidOrder::MissingLimitPrice);
        }
        if self.price_type.needs_stop_price() && self.stop_price.is_none() {
            return Err(InvalidOrder::MissingStopPrice);
        }
        Ok(())
    }
}

/// Fixed labels under which each decision point records its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageLabel {
    OrderInvalid,
    Warning,
    OrderPreview,
    AfterHoursWarning,
    OrderConfirmation,
}

impl MessageLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLabel::OrderInvalid => "ORDER INVALID",
            MessageLabel::Warning => "WARNING",
            MessageLabel::OrderPreview => "ORDER PREVIEW",
            MessageLabel::AfterHoursWarning => "AFTER HOURS WARNING",
            MessageLabel::OrderConfirmation => "ORDER CONFIRMATION",
        }
    }
}

impl fmt::Display for MessageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderMessages(BTreeMap<MessageLabel, String>);

impl OrderMessages {
    pub fn set(&mut self, label: MessageLabel, text: impl Into<String>) {
        self.0.insert(label, text.into());
    }

    pub fn get(&self, label: MessageLabel) -> Option<&str> {
        self.0.get(&label).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MessageLabel, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for OrderMessages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, text) in self.iter() {
            writeln!(f, "{}: {}", label, text)?;
        }
        Ok(())
    }
}

/// Where an order attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStage {
    /// Refused locally or by the site.
    Invalid,
    /// The order page never loaded.
    PageNotLoaded,
    /// Soft warning shown and `accept_warning` was off.
    WarningShown,
    /// Dry run stopped at the preview.
    PreviewShown,
    /// After-hours prompt shown and `after_hours` was off.
    AfterHoursPrompt,
    /// Submitted; the result page was read.
    ConfirmationShown,
    /// Submitted but no confirmation was found.
    Unconfirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub stage: OrderStage,
    pub messages: OrderMessages,
    pub submitted: bool,
    pub order_id: Option<String>,
}

impl OrderResult {
    pub fn new(stage: OrderStage, messages: OrderMessages) -> Self {
        Self {
            stage,
            messages,
            submitted: false,
            order_id: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        let mut messages = OrderMessages::default();
        messages.set(MessageLabel::OrderInvalid, reason);
        Self::new(OrderStage::Invalid, messages)
    }

    pub fn message(&self, label: MessageLabel) -> Option<&str> {
        self.messages.get(label)
    }

    pub fn is_confirmed(&self) -> bool {
        self.stage == OrderStage::ConfirmationShown
    }
}

/// Request body shared by the validate and execute endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub account_id: String,
    pub security_symbol_code: String,
    pub trade_action_code: OrderSide,
    pub order_quantity: u64,
    pub order_type_code: PriceType,
    pub time_in_force_code: OrderDuration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price_amount: Option<Decimal>,
    pub account_type_code: TypeCode,
    pub market_session_type_code: &'static str,
}

impl From<&OrderRequest> for OrderPayload {
    fn from(req: &OrderRequest) -> Self {
        Self {
            account_id: req.account_id.clone(),
            security_symbol_code: req.symbol.to_uppercase(),
            trade_action_code: req.side,
            order_quantity: req.quantity,
            order_type_code: req.price_type,
            time_in_force_code: req.duration,
            limit_price_amount: req.limit_price.filter(|_| req.price_type.needs_limit_price()),
            stop_price_amount: req.stop_price.filter(|_| req.price_type.needs_stop_price()),
            account_type_code: req.type_code,
            market_session_type_code: if req.after_hours {
                "EXTENDED"
            } else {
                "REGULAR"
            },
        }
    }
}

/// A message attached to a validate or execute reply.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotice {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "messageText", alias = "text")]
    pub message: String,
    #[serde(default, alias = "severityCode")]
    pub severity: Option<String>,
}

impl OrderNotice {
    /// Notices without a severity are treated as errors.
    pub fn is_error(&self) -> bool {
        !self.is_warning()
            && !matches!(
                self.severity.as_deref().map(str::to_ascii_uppercase).as_deref(),
                Some("INFO") | Some("INFORMATION")
            )
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self.severity.as_deref().map(str::to_ascii_uppercase).as_deref(),
            Some("WARNING") | Some("WARN")
        )
    }
}

/// Keys under which the endpoints return their message lists.
const NOTICE_KEYS: [&str; 3] = ["orderMessages", "errorResponses", "messages"];

/// Error notices carried by a raw reply body, whatever key holds them.
pub fn error_notices(body: &Value) -> Vec<OrderNotice> {
    NOTICE_KEYS
        .iter()
        .filter_map(|key| body.get(*key))
        .filter_map(|list| serde_json::from_value::<Vec<OrderNotice>>(list.clone()).ok())
        .flatten()
        .filter(OrderNotice::is_error)
        .collect()
}

fn join_notices<'a>(notices: impl Iterator<Item = &'a OrderNotice>) -> String {
    notices
        .map(|n| match &n.code {
            Some(code) => format!("{} ({})", n.message, code),
            None => n.message.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReply {
    #[serde(
        default,
        alias = "financialInformationExchangeSystemOrderIdentifier"
    )]
    pub exchange_order_identifier: Option<String>,
    #[serde(default, alias = "errorResponses", alias = "messages")]
    pub order_messages: Vec<OrderNotice>,
    #[serde(default, deserialize_with = "lenient::opt_f64_lenient")]
    pub estimated_order_amount: Option<f64>,
}

impl ValidationReply {
    /// A reply with neither messages nor an exchange identifier is not one
    /// the validate endpoint produces.
    pub fn is_recognized(&self) -> bool {
        self.exchange_order_identifier.is_some() || !self.order_messages.is_empty()
    }

    pub fn errors(&self) -> Vec<&OrderNotice> {
        self.order_messages.iter().filter(|n| n.is_error()).collect()
    }

    pub fn warnings(&self) -> Vec<&OrderNotice> {
        self.order_messages.iter().filter(|n| n.is_warning()).collect()
    }

    pub fn error_text(&self) -> String {
        join_notices(self.order_messages.iter().filter(|n| n.is_error()))
    }

    pub fn warning_text(&self) -> String {
        join_notices(self.order_messages.iter().filter(|n| n.is_warning()))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReply {
    #[serde(default, alias = "orderIdentifier")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_status_code: Option<String>,
    #[serde(default, alias = "errorResponses", alias = "messages")]
    pub order_messages: Vec<OrderNotice>,
}

impl ExecutionReply {
    pub fn is_recognized(&self) -> bool {
        self.order_id.is_some()
            || self.order_status_code.is_some()
            || !self.order_messages.is_empty()
    }

    pub fn error_text(&self) -> Option<String> {
        let text = join_notices(self.order_messages.iter().filter(|n| n.is_error()));
        (!text.is_empty()).then_some(text)
    }
}

/// One row of the order status page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusSummary {
    #[serde(rename = "orderIdentifier", deserialize_with = "lenient::string_or_number")]
    pub order_id: String,
    #[serde(default)]
    pub trade_action_code: Option<String>,
    #[serde(default)]
    pub order_status_code: Option<String>,
    #[serde(default)]
    pub security_symbol_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64_lenient")]
    pub order_quantity: Option<f64>,
    #[serde(skip)]
    pub raw: Value,
}

impl OrderStatusSummary {
    pub fn list_from_payload(payload: &Value) -> Result<Vec<Self>, FetchError> {
        let rows = payload
            .get("orderSummaries")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::MissingField {
                field: "orderSummaries".to_string(),
            })?;

        rows.iter()
            .map(|row| {
                let mut summary: OrderStatusSummary = serde_json::from_value(row.clone())
                    .map_err(|e| FetchError::Decode {
                        url: "orderSummaries".to_string(),
                        reason: e.to_string(),
                    })?;
                summary.raw = row.clone();
                Ok(summary)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn request(price_type: PriceType, duration: OrderDuration) -> OrderRequest {
        OrderRequest::market("A1", "INTC", OrderSide::Buy, 1)
            .with_price_type(price_type)
            .with_duration(duration)
            .with_limit_price(dec!(20.00))
            .with_stop_price(dec!(19.50))
    }

    #[test]
    fn test_duration_table() {
        for price_type in PriceType::ALL {
            for duration in OrderDuration::ALL {
                let expected_ok = match price_type {
                    PriceType::Market => {
                        matches!(duration, OrderDuration::Day | OrderDuration::OnTheClose)
                    }
                    PriceType::Stop | PriceType::StopLimit => matches!(
                        duration,
                        OrderDuration::Day | OrderDuration::GoodTillCancelled
                    ),
                    PriceType::Limit => true,
                };
                let result = request(price_type, duration).validate();
                assert_eq!(
                    result.is_ok(),
                    expected_ok,
                    "{} / {} gave {:?}",
                    price_type,
                    duration,
                    result
                );
            }
        }
    }

    #[test]
    fn test_market_gtc_message() {
        let err = request(PriceType::Market, OrderDuration::GoodTillCancelled)
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "Market orders must be DAY or ON THE CLOSE.");
    }

    #[test]
    fn test_price_requirements() {
        let mut req = OrderRequest::market("A1", "INTC", OrderSide::Buy, 1)
            .with_price_type(PriceType::StopLimit)
            .with_stop_price(dec!(10));
        assert_eq!(req.validate(), Err(InvalidOrder::MissingLimitPrice));

        req = req.with_limit_price(dec!(10.5));
        assert_eq!(req.validate(), Ok(()));

        let stop = OrderRequest::market("A1", "INTC", OrderSide::Sell, 1)
            .with_price_type(PriceType::Stop);
        assert_eq!(stop.validate(), Err(InvalidOrder::MissingStopPrice));

        let zero = OrderRequest::market("A1", "INTC", OrderSide::Sell, 0);
        assert_eq!(zero.validate(), Err(InvalidOrder::ZeroQuantity));
    }

    #[test]
    fn test_payload_drops_unused_prices() {
        let req = OrderRequest::market("A1", "intc", OrderSide::Buy, 3)
            .with_limit_price(dec!(20))
            .with_after_hours(false);
        let body = serde_json::to_value(OrderPayload::from(&req)).unwrap();

        assert_eq!(body["securitySymbolCode"], "INTC");
        assert_eq!(body["orderTypeCode"], "MARKET");
        assert_eq!(body["timeInForceCode"], "DAY");
        assert_eq!(body["marketSessionTypeCode"], "REGULAR");
        assert!(body.get("limitPriceAmount").is_none());
    }

    #[test]
    fn test_validation_reply_splits_errors_and_warnings() {
        let reply: ValidationReply = serde_json::from_value(json!({
            "financialInformationExchangeSystemOrderIdentifier": "X-1",
            "errorResponses": [
                {"code": "W12", "message": "Order exceeds 10% of position", "severity": "WARNING"},
                {"code": "E7", "messageText": "Insufficient buying power"}
            ]
        }))
        .unwrap();

        assert_eq!(reply.exchange_order_identifier.as_deref(), Some("X-1"));
        assert_eq!(reply.errors().len(), 1);
        assert_eq!(reply.error_text(), "Insufficient buying power (E7)");
        assert_eq!(reply.warnings().len(), 1);
    }

    #[test]
    fn test_unrelated_bodies_are_not_recognized_replies() {
        let validation: ValidationReply =
            serde_json::from_value(json!({"error": "Not Found"})).unwrap();
        assert!(!validation.is_recognized());

        let execution: ExecutionReply =
            serde_json::from_value(json!({"error": "rejected"})).unwrap();
        assert!(!execution.is_recognized());

        let received: ExecutionReply =
            serde_json::from_value(json!({"orderStatusCode": "RECEIVED"})).unwrap();
        assert!(received.is_recognized());
    }

    #[test]
    fn test_error_notices_under_any_key() {
        let body = json!({"messages": [
            {"message": "Market closed", "severity": "ERROR"},
            {"message": "Heads up", "severity": "WARNING"}
        ]});
        let notices = error_notices(&body);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, "Market closed");

        assert!(error_notices(&json!({"error": "rejected"})).is_empty());
        assert!(error_notices(&json!({"orderMessages": "oops"})).is_empty());
    }

    #[test]
    fn test_order_status_rows() {
        let rows = OrderStatusSummary::list_from_payload(&json!({
            "orderSummaries": [
                {"orderIdentifier": 1001, "tradeActionCode": "BUY", "orderStatusCode": "FILLED"},
                {"orderIdentifier": "1002", "orderStatusCode": "OPEN", "orderQuantity": "5"}
            ]
        }))
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].order_id, "1001");
        assert_eq!(rows[1].order_quantity, Some(5.0));
        assert_eq!(rows[1].raw["orderStatusCode"], "OPEN");
    }

    #[test]
    fn test_messages_display_in_label_order() {
        let mut messages = OrderMessages::default();
        messages.set(MessageLabel::OrderPreview, "Buy 1 INTC");
        messages.set(MessageLabel::OrderInvalid, "No invalid order message found.");
        let text = messages.to_string();
        assert!(text.find("ORDER INVALID").unwrap() < text.find("ORDER PREVIEW").unwrap());
    }
}
