use crate::domain::errors::FetchError;
use crate::domain::lenient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One brokerage account as listed on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(rename = "accountId", deserialize_with = "lenient::string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string_or_number")]
    pub mask: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub detail_type: String,
    #[serde(rename = "accountValue", default, deserialize_with = "lenient::opt_f64_lenient")]
    pub value: Option<f64>,
    #[serde(
        rename = "accountValueChange",
        default,
        deserialize_with = "lenient::opt_f64_lenient"
    )]
    pub value_change: Option<f64>,
    #[serde(default, deserialize_with = "lenient::bool_lenient")]
    pub eda: bool,
    #[serde(default, deserialize_with = "lenient::bool_lenient")]
    pub ira: bool,
    #[serde(default, deserialize_with = "lenient::bool_lenient")]
    pub view_balance: bool,
    #[serde(default, deserialize_with = "lenient::bool_lenient")]
    pub prior_year_ira: bool,
    #[serde(rename = "showXfer", default, deserialize_with = "lenient::bool_lenient")]
    pub transferable: bool,
}

/// All investment accounts plus the portfolio totals shown above them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountsOverview {
    pub total_value: Option<f64>,
    pub total_value_change: Option<f64>,
    pub accounts: Vec<AccountSummary>,
}

impl AccountsOverview {
    /// Parse the `chaseInvestments` object found in the dashboard envelope.
    /// The wrapper key is optional.
    pub fn from_investments(payload: &Value) -> Result<Self, FetchError> {
        let investments = payload.get("chaseInvestments").unwrap_or(payload);

        let summary = investments.get("investmentSummary");
        let total_value = summary
            .and_then(|s| s.get("accountValue"))
            .and_then(lenient::f64_value);
        let total_value_change = summary
            .and_then(|s| s.get("accountValueChange"))
            .and_then(lenient::f64_value);

        let raw_accounts = investments
            .get("accounts")
            .ok_or_else(|| FetchError::MissingField {
                field: "accounts".to_string(),
            })?;
        let accounts: Vec<AccountSummary> =
            serde_json::from_value(raw_accounts.clone()).map_err(|e| FetchError::Decode {
                url: "accounts".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            total_value,
            total_value_change,
            accounts,
        })
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountSummary> {
        self.accounts.iter().find(|a| a.id == account_id)
    }

    /// Account id to masked number.
    pub fn connectors(&self) -> BTreeMap<String, String> {
        self.accounts
            .iter()
            .map(|a| (a.id.clone(), a.mask.clone()))
            .collect()
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.id.clone()).collect()
    }
}
