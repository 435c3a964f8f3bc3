use serde::{Deserialize, Serialize};
use std::fmt;

/// How an element on the page is located.
///
/// CSS selectors also pierce open shadow roots, which the login options list
/// relies on. `Text` matches the innermost element whose visible text contains
/// the given needle, case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    Css(String),
    XPath(String),
    Text(String),
}

impl Selector {
    pub fn css(expr: impl Into<String>) -> Self {
        Selector::Css(expr.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Selector::XPath(expr.into())
    }

    pub fn text(needle: impl Into<String>) -> Self {
        Selector::Text(needle.into())
    }

    /// `<label>` whose text is exactly `text`.
    pub fn label(text: &str) -> Self {
        Selector::XPath(format!("//label[text()={}]", xpath_literal(text)))
    }

    /// `<button>` containing `text` anywhere in its subtree.
    pub fn button_containing(text: &str) -> Self {
        Selector::XPath(format!("//button[contains(., {})]", xpath_literal(text)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Selector::Css(_) => "css",
            Selector::XPath(_) => "xpath",
            Selector::Text(_) => "text",
        }
    }

    pub fn expression(&self) -> &str {
        match self {
            Selector::Css(e) | Selector::XPath(e) | Selector::Text(e) => e,
        }
    }

    /// Stable string key, used by the scripted page and in log lines.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind(), self.expression())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Quote a string for use inside an XPath expression. Strings holding both
/// quote kinds are split with `concat()`.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Predicate over the URL of an intercepted network response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlMatcher {
    Exact(String),
    Prefix(String),
}

impl UrlMatcher {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Exact(expected) => url == expected,
            UrlMatcher::Prefix(prefix) => url.starts_with(prefix.as_str()),
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            UrlMatcher::Exact(p) | UrlMatcher::Prefix(p) => p,
        }
    }
}

impl fmt::Display for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlMatcher::Exact(p) => write!(f, "={}", p),
            UrlMatcher::Prefix(p) => write!(f, "{}*", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_quotes_apostrophes() {
        let sel = Selector::label("Good 'til canceled");
        assert_eq!(sel.expression(), "//label[text()=\"Good 'til canceled\"]");

        let plain = Selector::label("Buy");
        assert_eq!(plain.expression(), "//label[text()='Buy']");
    }

    #[test]
    fn test_xpath_literal_with_both_quotes() {
        let lit = xpath_literal("a'b\"c");
        assert_eq!(lit, "concat('a', \"'\", 'b\"c')");
    }

    #[test]
    fn test_url_matcher() {
        let exact = UrlMatcher::Exact("https://x/a?b=1".to_string());
        assert!(exact.matches("https://x/a?b=1"));
        assert!(!exact.matches("https://x/a?b=12"));

        let prefix = UrlMatcher::Prefix("https://x/a".to_string());
        assert!(prefix.matches("https://x/a?b=12"));
        assert!(!prefix.matches("https://y/a"));
    }

    #[test]
    fn test_selector_key_is_kind_qualified() {
        assert_eq!(Selector::css("#otpInput").key(), "css:#otpInput");
        assert_eq!(Selector::text("approve").key(), "text:approve");
    }
}
