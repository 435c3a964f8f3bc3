use crate::domain::errors::FetchError;
use crate::domain::lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of the equity quote shown on the trade ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(rename = "securitySymbolCode")]
    pub symbol: String,
    #[serde(rename = "securityDescriptionText", default)]
    pub description: String,

    #[serde(rename = "askPriceAmount", deserialize_with = "lenient::f64_lenient")]
    pub ask_price: f64,
    #[serde(default)]
    pub ask_exchange_code: String,
    #[serde(deserialize_with = "lenient::u64_lenient")]
    pub ask_quantity: u64,

    #[serde(rename = "bidPriceAmount", deserialize_with = "lenient::f64_lenient")]
    pub bid_price: f64,
    #[serde(default)]
    pub bid_exchange_code: String,
    #[serde(deserialize_with = "lenient::u64_lenient")]
    pub bid_quantity: u64,

    #[serde(rename = "lastTradePriceAmount", deserialize_with = "lenient::f64_lenient")]
    pub last_trade_price: f64,
    #[serde(deserialize_with = "lenient::u64_lenient")]
    pub last_trade_quantity: u64,
    #[serde(rename = "lastTradeExchangeCode", default)]
    pub last_exchange_code: String,

    #[serde(deserialize_with = "lenient::f64_lenient")]
    pub change_amount: f64,
    #[serde(rename = "changePercent", deserialize_with = "lenient::f64_lenient")]
    pub change_percentage: f64,

    #[serde(rename = "asOfTimestamp", deserialize_with = "lenient::timestamp")]
    pub as_of_time: DateTime<Utc>,

    #[serde(skip)]
    pub raw: Value,
}

impl Quote {
    pub fn from_payload(url: &str, payload: &Value) -> Result<Self, FetchError> {
        let mut quote: Quote =
            serde_json::from_value(payload.clone()).map_err(|e| FetchError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        quote.raw = payload.clone();
        Ok(quote)
    }

    pub fn spread(&self) -> f64 {
        self.ask_price - self.bid_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "askPriceAmount": 31.25,
            "askExchangeCode": "Q",
            "askQuantity": 300,
            "bidPriceAmount": "31.20",
            "bidExchangeCode": "P",
            "bidQuantity": "200",
            "changeAmount": -0.15,
            "lastTradePriceAmount": 31.22,
            "lastTradeQuantity": 100,
            "lastTradeExchangeCode": "Q",
            "changePercent": -0.48,
            "asOfTimestamp": "2024-03-15T14:30:05.123Z",
            "securityDescriptionText": "INTEL CORP",
            "securitySymbolCode": "INTC"
        })
    }

    #[test]
    fn test_quote_parses_mixed_number_encodings() {
        let quote = Quote::from_payload("q", &payload()).unwrap();
        assert_eq!(quote.symbol, "INTC");
        assert_eq!(quote.bid_price, 31.20);
        assert_eq!(quote.bid_quantity, 200);
        assert_eq!(quote.description, "INTEL CORP");
        assert!((quote.spread() - 0.05).abs() < 1e-9);
        assert_eq!(quote.raw["askExchangeCode"], "Q");
    }

    #[test]
    fn test_quote_missing_price_is_decode_error() {
        let mut body = payload();
        body.as_object_mut().unwrap().remove("askPriceAmount");
        let err = Quote::from_payload("https://q", &body).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }
}
