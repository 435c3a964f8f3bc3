use crate::domain::errors::FetchError;
use crate::domain::lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CASH_SWEEP_NAME: &str = "Cash and Sweep Funds";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketValue {
    #[serde(default, deserialize_with = "lenient::opt_f64_lenient")]
    pub base_value_amount: Option<f64>,
}

/// One line of the positions table. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(default)]
    pub instrument_long_name: Option<String>,
    #[serde(default)]
    pub asset_category_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64_lenient")]
    pub traded_unit_quantity: Option<f64>,
    #[serde(default)]
    pub market_value: MarketValue,
    #[serde(default)]
    pub position_components: Vec<Value>,
    #[serde(default)]
    pub security_id_detail: Option<Value>,
}

impl Position {
    pub fn is_cash_sweep(&self) -> bool {
        self.instrument_long_name.as_deref() == Some(CASH_SWEEP_NAME)
    }

    pub fn is_equity(&self) -> bool {
        self.asset_category_name.as_deref() == Some("EQUITY")
    }

    /// Ticker of the first component, falling back to the CUSIP.
    pub fn symbol(&self) -> Option<String> {
        let ticker = self
            .position_components
            .first()
            .and_then(|c| c.get("securityIdDetail"))
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("symbolSecurityIdentifier"))
            .and_then(Value::as_str);

        let cusip = || {
            self.security_id_detail
                .as_ref()
                .and_then(|d| d.get("cusipIdentifier"))
                .and_then(Value::as_str)
        };

        ticker.or_else(cusip).map(str::to_string)
    }

    /// Label used when listing holdings: the ticker, or the long name for
    /// cash sweep lines.
    pub fn display_name(&self) -> Option<String> {
        if self.is_cash_sweep() {
            self.instrument_long_name.clone()
        } else {
            self.symbol().or_else(|| self.instrument_long_name.clone())
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.market_value.base_value_amount
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holdings {
    #[serde(default, rename = "asOfTimestamp", deserialize_with = "lenient::opt_timestamp")]
    pub as_of_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::bool_lenient")]
    pub asset_allocation_tool_eligible_indicator: bool,
    #[serde(default, deserialize_with = "lenient::bool_lenient")]
    pub custom_position_allowed_indicator: bool,
    #[serde(default, deserialize_with = "lenient::bool_lenient")]
    pub performance_allowed_indicator: bool,
    #[serde(default)]
    pub cash_sweep_position_summary: Value,
    #[serde(default)]
    pub positions_summary: Value,
    #[serde(default)]
    pub error_responses: Vec<Value>,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl Holdings {
    pub fn from_payload(payload: &Value) -> Result<Self, FetchError> {
        serde_json::from_value(payload.clone()).map_err(|e| FetchError::Decode {
            url: "positions".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn equities(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_equity())
    }

    pub fn cash(&self) -> Option<f64> {
        self.positions
            .iter()
            .filter(|p| p.is_cash_sweep())
            .filter_map(Position::value)
            .reduce(|a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_symbol_prefers_component_ticker() {
        let pos: Position = serde_json::from_value(json!({
            "assetCategoryName": "EQUITY",
            "tradedUnitQuantity": "10",
            "marketValue": {"baseValueAmount": 301.5},
            "positionComponents": [{"securityIdDetail": [{"symbolSecurityIdentifier": "INTC"}]}],
            "securityIdDetail": {"cusipIdentifier": "458140100"}
        }))
        .unwrap();

        assert_eq!(pos.symbol().as_deref(), Some("INTC"));
        assert_eq!(pos.traded_unit_quantity, Some(10.0));
        assert!(pos.is_equity());
    }

    #[test]
    fn test_position_symbol_falls_back_to_cusip() {
        let pos: Position = serde_json::from_value(json!({
            "assetCategoryName": "EQUITY",
            "securityIdDetail": {"cusipIdentifier": "458140100"}
        }))
        .unwrap();

        assert_eq!(pos.symbol().as_deref(), Some("458140100"));
        assert_eq!(pos.value(), None);
    }

    #[test]
    fn test_holdings_tolerate_missing_fields() {
        let holdings = Holdings::from_payload(&json!({
            "asOfTimestamp": "2024-03-15T14:30:05.123Z",
            "positions": [
                {"instrumentLongName": "Cash and Sweep Funds", "marketValue": {"baseValueAmount": 500.0}},
                {"instrumentLongName": "Cash and Sweep Funds", "marketValue": {"baseValueAmount": 25.5}}
            ]
        }))
        .unwrap();

        assert!(holdings.as_of_time.is_some());
        assert_eq!(holdings.cash(), Some(525.5));
        assert_eq!(holdings.equities().count(), 0);
        assert!(holdings.error_responses.is_empty());
        assert_eq!(
            holdings.positions[0].display_name().as_deref(),
            Some(CASH_SWEEP_NAME)
        );
    }
}
