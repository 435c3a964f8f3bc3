//! Endpoint table for the brokerage site.
//!
//! Every URL the session, the readers and the order flows touch comes from
//! here. Account-specific pages are templates with an `{account_id}`
//! placeholder. The table can be replaced wholesale from a TOML file when the
//! site moves its endpoints.

use crate::domain::envelope::EnvelopePaths;
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

const ACCOUNT_PLACEHOLDER: &str = "{account_id}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub login_page: String,
    pub auth_code_page: String,
    pub landing_page: String,
    pub opt_out_verification_page: String,
    /// Dashboard data URLs carrying the account envelope, tried in order.
    pub account_info: Vec<String>,
    pub account_holdings_page: String,
    pub holdings_json: String,
    pub order_page: String,
    pub quote_endpoint: String,
    pub order_status_page: String,
    pub order_info: String,
    pub order_validate: String,
    pub order_execute: String,
    pub envelope_paths: EnvelopePaths,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        let gateway = "https://secure.chase.com/svc/wr/dwm/secure/gateway/investments/servicing/inquiry-maintenance";
        Self {
            login_page: "https://secure05c.chase.com/web/auth/#/logon/logon/chaseOnline"
                .to_string(),
            auth_code_page:
                "https://secure05c.chase.com/web/auth/#/logon/recognizeUser/provideAuthenticationCode"
                    .to_string(),
            landing_page: "https://secure.chase.com/web/auth/dashboard#/dashboard/overview"
                .to_string(),
            opt_out_verification_page:
                "https://secure.chase.com/web/auth/#/logon/recognizeUser/esasOptOutVerification"
                    .to_string(),
            account_info: vec![
                "https://secure.chase.com/svc/rl/accounts/secure/v1/dashboard/data/list"
                    .to_string(),
                "https://secure09ea.chase.com/svc/rl/accounts/secure/v1/dashboard/data/list"
                    .to_string(),
            ],
            account_holdings_page: format!(
                "https://secure.chase.com/web/auth/dashboard#/dashboard/oi-portfolio/positions/render;ai={}",
                ACCOUNT_PLACEHOLDER
            ),
            holdings_json: format!("{}/digital-investment-positions/v1/positions", gateway),
            order_page: format!(
                "https://secure.chase.com/web/auth/dashboard#/dashboard/trade/equity/entry;ai={};sym=",
                ACCOUNT_PLACEHOLDER
            ),
            quote_endpoint: format!("{}/digital-equity-quote/v1/quotes", gateway),
            order_status_page: format!(
                "https://secure.chase.com/web/auth/dashboard#/dashboard/trade/order/status;ai={};orderStatus=ALL",
                ACCOUNT_PLACEHOLDER
            ),
            order_info: format!("{}/digital-trade-orders/v1/summaries", gateway),
            order_validate: format!("{}/digital-equity-trades/v1/validations", gateway),
            order_execute: format!("{}/digital-equity-trades/v1/executions", gateway),
            envelope_paths: EnvelopePaths::default(),
        }
    }
}

impl EndpointConfig {
    /// Defaults, replaced by the TOML table named in
    /// `RUSTCHASE_ENDPOINTS_FILE` when set, then by single-URL overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var("RUSTCHASE_ENDPOINTS_FILE") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(url) = env::var("RUSTCHASE_LOGIN_URL") {
            config.login_page = url;
        }
        if let Ok(url) = env::var("RUSTCHASE_LANDING_URL") {
            config.landing_page = url;
        }
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read endpoint table {:?}", path))?;
        Self::from_toml_str(&content)
    }

    /// Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse endpoint table")
    }

    fn for_account(template: &str, account_id: &str) -> String {
        template.replace(ACCOUNT_PLACEHOLDER, account_id)
    }

    pub fn is_landing(&self, url: &str) -> bool {
        url.contains(&self.landing_page)
    }

    pub fn is_opt_out(&self, url: &str) -> bool {
        url.contains(&self.opt_out_verification_page)
    }

    pub fn account_holdings_url(&self, account_id: &str) -> String {
        Self::for_account(&self.account_holdings_page, account_id)
    }

    pub fn order_page_url(&self, account_id: &str) -> String {
        Self::for_account(&self.order_page, account_id)
    }

    pub fn order_status_url(&self, account_id: &str) -> String {
        Self::for_account(&self.order_status_page, account_id)
    }

    pub fn quote_url(&self, symbol: &str) -> String {
        build_url_with_query(
            &self.quote_endpoint,
            &[
                ("securitySymbolCode", symbol),
                ("securityValidateIndicator", "true"),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_templates() {
        let config = EndpointConfig::default();
        assert!(config.order_page_url("123").contains("entry;ai=123;sym="));
        assert!(config.account_holdings_url("9").ends_with("render;ai=9"));
        assert!(config.order_status_url("9").contains("status;ai=9;orderStatus=ALL"));
    }

    #[test]
    fn test_quote_url_carries_symbol() {
        let config = EndpointConfig::default();
        let url = config.quote_url("INTC");
        assert!(url.ends_with("/quotes?securitySymbolCode=INTC&securityValidateIndicator=true"));
    }

    #[test]
    fn test_landing_detection_is_substring() {
        let config = EndpointConfig::default();
        assert!(config.is_landing(
            "https://secure.chase.com/web/auth/dashboard#/dashboard/overview?x=1"
        ));
        assert!(!config.is_landing(&config.login_page));
    }

    #[test]
    fn test_toml_override_keeps_other_defaults() {
        let config = EndpointConfig::from_toml_str(
            r#"
            landing_page = "https://example.test/home"
            account_info = ["https://example.test/data"]

            [envelope_paths]
            positions = "/v2/positions"
            "#,
        )
        .unwrap();

        assert_eq!(config.landing_page, "https://example.test/home");
        assert_eq!(config.account_info, vec!["https://example.test/data"]);
        assert_eq!(config.envelope_paths.positions, "/v2/positions");
        assert_eq!(config.login_page, EndpointConfig::default().login_page);
        assert_eq!(
            config.envelope_paths.quotes,
            EnvelopePaths::default().quotes
        );
    }
}
