//! The dashboard bundles several cached API responses into one payload:
//!
//! ```json
//! {"cache": [{"url": "/svc/.../inv/list", "response": {...}}, ...]}
//! ```
//!
//! Entries are classified by their originating endpoint path into a tagged
//! union; anything unrecognised is kept as `Unknown` instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Endpoint paths used to classify cache entries. A cache URL belongs to an
/// endpoint when, stripped of its query string, it ends with the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopePaths {
    pub investment_accounts: String,
    pub positions: String,
    pub order_summaries: String,
    pub quotes: String,
}

impl Default for EnvelopePaths {
    fn default() -> Self {
        Self {
            investment_accounts: "/svc/rr/accounts/secure/v1/account/detail/inv/list".to_string(),
            positions: "/positions".to_string(),
            order_summaries: "/summaries".to_string(),
            quotes: "/quotes".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    InvestmentAccounts,
    Positions,
    OrderSummaries,
    Quotes,
}

impl EnvelopePaths {
    pub fn classify(&self, url: &str) -> Option<EndpointKind> {
        let path = url.split('?').next().unwrap_or(url);
        [
            (&self.investment_accounts, EndpointKind::InvestmentAccounts),
            (&self.positions, EndpointKind::Positions),
            (&self.order_summaries, EndpointKind::OrderSummaries),
            (&self.quotes, EndpointKind::Quotes),
        ]
        .into_iter()
        .find(|(suffix, _)| !suffix.is_empty() && path.ends_with(suffix.as_str()))
        .map(|(_, kind)| kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeEntry {
    InvestmentAccounts(Value),
    Positions(Value),
    OrderSummaries(Value),
    Quotes(Value),
    Unknown { url: String, response: Value },
}

impl EnvelopeEntry {
    pub fn kind(&self) -> Option<EndpointKind> {
        match self {
            EnvelopeEntry::InvestmentAccounts(_) => Some(EndpointKind::InvestmentAccounts),
            EnvelopeEntry::Positions(_) => Some(EndpointKind::Positions),
            EnvelopeEntry::OrderSummaries(_) => Some(EndpointKind::OrderSummaries),
            EnvelopeEntry::Quotes(_) => Some(EndpointKind::Quotes),
            EnvelopeEntry::Unknown { .. } => None,
        }
    }

    pub fn response(&self) -> &Value {
        match self {
            EnvelopeEntry::InvestmentAccounts(v)
            | EnvelopeEntry::Positions(v)
            | EnvelopeEntry::OrderSummaries(v)
            | EnvelopeEntry::Quotes(v) => v,
            EnvelopeEntry::Unknown { response, .. } => response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    entries: Vec<EnvelopeEntry>,
}

impl Envelope {
    /// `None` when `body` has no `cache` array. Items without a string `url`
    /// are skipped.
    pub fn parse(body: &Value, paths: &EnvelopePaths) -> Option<Self> {
        let cache = body.get("cache")?.as_array()?;
        let entries = cache
            .iter()
            .filter_map(|item| {
                let url = item.get("url")?.as_str()?;
                let response = item.get("response").cloned().unwrap_or(Value::Null);
                Some(match paths.classify(url) {
                    Some(EndpointKind::InvestmentAccounts) => {
                        EnvelopeEntry::InvestmentAccounts(response)
                    }
                    Some(EndpointKind::Positions) => EnvelopeEntry::Positions(response),
                    Some(EndpointKind::OrderSummaries) => EnvelopeEntry::OrderSummaries(response),
                    Some(EndpointKind::Quotes) => EnvelopeEntry::Quotes(response),
                    None => EnvelopeEntry::Unknown {
                        url: url.to_string(),
                        response,
                    },
                })
            })
            .collect();
        Some(Self { entries })
    }

    pub fn entries(&self) -> &[EnvelopeEntry] {
        &self.entries
    }

    pub fn find(&self, kind: EndpointKind) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.kind() == Some(kind))
            .map(EnvelopeEntry::response)
    }

    pub fn unknown_urls(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                EnvelopeEntry::Unknown { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Payload for `kind`, whether `body` is an envelope or already the bare
/// endpoint response.
pub fn unwrap_payload(body: &Value, kind: EndpointKind, paths: &EnvelopePaths) -> Option<Value> {
    match Envelope::parse(body, paths) {
        Some(envelope) => envelope.find(kind).cloned(),
        None => Some(body.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_classifies_known_and_unknown_entries() {
        let body = json!({"cache": [
            {"url": "/svc/rr/accounts/secure/v1/account/detail/inv/list", "response": {"chaseInvestments": {}}},
            {"url": "/svc/rl/accounts/secure/v1/user/metadata/list", "response": {"a": 1}},
            {"response": {"orphan": true}}
        ]});

        let env = Envelope::parse(&body, &EnvelopePaths::default()).unwrap();
        assert_eq!(env.entries().len(), 2);
        assert_eq!(
            env.find(EndpointKind::InvestmentAccounts),
            Some(&json!({"chaseInvestments": {}}))
        );
        assert_eq!(
            env.unknown_urls(),
            vec!["/svc/rl/accounts/secure/v1/user/metadata/list"]
        );
        assert!(env.find(EndpointKind::Positions).is_none());
    }

    #[test]
    fn test_classify_ignores_query_string() {
        let paths = EnvelopePaths::default();
        assert_eq!(
            paths.classify("https://h/digital-equity-quote/v1/quotes?securitySymbolCode=INTC"),
            Some(EndpointKind::Quotes)
        );
        assert_eq!(paths.classify("/positions"), Some(EndpointKind::Positions));
        assert_eq!(paths.classify("/positions/other"), None);
    }

    #[test]
    fn test_unwrap_payload_passes_bare_body_through() {
        let bare = json!({"positions": []});
        let paths = EnvelopePaths::default();
        assert_eq!(
            unwrap_payload(&bare, EndpointKind::Positions, &paths),
            Some(bare.clone())
        );

        let wrapped = json!({"cache": [{"url": "/positions", "response": bare}]});
        assert_eq!(
            unwrap_payload(&wrapped, EndpointKind::Positions, &paths),
            Some(json!({"positions": []}))
        );
        assert_eq!(
            unwrap_payload(&wrapped, EndpointKind::Quotes, &paths),
            None
        );
    }
}
