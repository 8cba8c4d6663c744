//! Detector plugins: classify a `CollectorInfo` as illegal/legal via an
//! external reviewer. Two variants (`safety`, `custom`) share the
//! [`ReviewerClient`] capability surface and the HTML-prefix/keyword-rule
//! request shape.

pub mod custom;
pub mod fake;
pub mod safety;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A keyword rule loaded from the external relational table the custom
/// detector consults, handed to the reviewer so the external model can
/// reason about operator-maintained terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomKeywordRule {
    pub rule_type: String,
    pub keywords: Vec<String>,
    pub description: String,
}

impl CustomKeywordRule {
    /// Parses the external table's comma-separated keyword column.
    pub fn from_row(rule_type: impl Into<String>, keywords_csv: &str, description: impl Into<String>) -> Self {
        Self {
            rule_type: rule_type.into(),
            keywords: keywords_csv.split(',').map(|k| k.trim().to_string()).filter(|k| !k.is_empty()).collect(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub html_prefix: String,
    pub screenshot: Vec<u8>,
    pub keyword_rules: Vec<CustomKeywordRule>,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewVerdict {
    pub is_illegal: bool,
    pub description: String,
    pub keywords: Vec<String>,
}

/// The external, model-backed reviewer. Concrete HTTP wire format is out of
/// scope — this is the capability surface both detector variants depend on.
#[async_trait]
pub trait ReviewerClient: Send + Sync {
    async fn review(&self, request: ReviewRequest) -> anyhow::Result<ReviewVerdict>;
}

/// Maximum number of `char`s of HTML sent to the reviewer; truncation is
/// marked so the reviewer knows the prefix isn't the whole document.
const HTML_PREFIX_MAX_CHARS: usize = 10_000;
const TRUNCATION_MARKER: &str = "...[truncated]";

pub fn truncate_html(html: &str) -> String {
    if html.chars().count() <= HTML_PREFIX_MAX_CHARS {
        return html.to_string();
    }
    let prefix: String = html.chars().take(HTML_PREFIX_MAX_CHARS).collect();
    format!("{prefix}{TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_html_is_not_truncated() {
        let html = "<html></html>";
        assert_eq!(truncate_html(html), html);
    }

    #[test]
    fn long_html_is_truncated_with_marker() {
        let html = "x".repeat(HTML_PREFIX_MAX_CHARS + 500);
        let truncated = truncate_html(&html);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert_eq!(truncated.chars().count(), HTML_PREFIX_MAX_CHARS + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn keyword_rule_parses_comma_separated_keywords_and_trims_whitespace() {
        let rule = CustomKeywordRule::from_row("gambling", "poker, casino ,bet", "gambling terms");
        assert_eq!(rule.keywords, vec!["poker", "casino", "bet"]);
    }

    #[test]
    fn keyword_rule_drops_empty_entries_from_trailing_commas() {
        let rule = CustomKeywordRule::from_row("gambling", "poker,,", "gambling terms");
        assert_eq!(rule.keywords, vec!["poker"]);
    }
}
