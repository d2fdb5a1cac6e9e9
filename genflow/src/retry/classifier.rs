//! Keyword-table error classification.
//!
//! Classification is policy data: three ordered tables decide retryability,
//! presentation severity and the user-facing message. Swapping a table
//! changes classification without touching the retry executor.

use crate::errors::{GenflowError, Severity};
use serde::{Deserialize, Serialize};

/// Fragments that always make an error permanent.
pub const DEFAULT_PERMANENT_KEYWORDS: [&str; 6] = [
    "not found",
    "invalid",
    "unauthorized",
    "forbidden",
    "authentication",
    "authorization",
];

/// Maps any of `keywords` to `severity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityRule {
    /// Lower-case fragments; any match selects this rule.
    pub keywords: Vec<String>,
    /// Severity assigned on match.
    pub severity: Severity,
}

impl SeverityRule {
    /// Creates a severity rule.
    #[must_use]
    pub fn new(keywords: &[&str], severity: Severity) -> Self {
        Self {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            severity,
        }
    }
}

/// Replaces messages containing `keyword` with `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRule {
    /// Lower-case fragment.
    pub keyword: String,
    /// User-facing replacement text.
    pub message: String,
}

impl MessageRule {
    /// Creates a message rule.
    #[must_use]
    pub fn new(keyword: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            message: message.into(),
        }
    }
}

/// The outcome of classifying one error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Whether another attempt may succeed.
    pub retryable: bool,
    /// Presentation severity.
    pub severity: Severity,
    /// Text suitable for display.
    pub user_message: String,
}

/// Classifies raw error messages.
///
/// The retryable keyword set belongs to the [`RetryPolicy`](super::RetryPolicy)
/// of a run and is passed in per call; the classifier owns the permanent set
/// and the severity and message tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassifier {
    permanent_keywords: Vec<String>,
    severity_rules: Vec<SeverityRule>,
    message_rules: Vec<MessageRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            permanent_keywords: DEFAULT_PERMANENT_KEYWORDS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
            severity_rules: vec![
                SeverityRule::new(&["timeout", "network", "connection"], Severity::Medium),
                SeverityRule::new(&["validation"], Severity::High),
                SeverityRule::new(&["authentication", "authorization"], Severity::Critical),
            ],
            message_rules: vec![
                MessageRule::new(
                    "network",
                    "Unable to connect to the render service. Please check your connection and try again.",
                ),
                MessageRule::new(
                    "timeout",
                    "The operation took too long to complete. Please try again.",
                ),
                MessageRule::new("not found", "The requested resource was not found."),
                MessageRule::new(
                    "unauthorized",
                    "You are not authorized to perform this action.",
                ),
                MessageRule::new(
                    "rate limit",
                    "Too many requests. Please wait a moment before trying again.",
                ),
            ],
        }
    }
}

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}

impl ErrorClassifier {
    /// Creates a classifier with the default tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the permanent keyword set.
    #[must_use]
    pub fn with_permanent_keywords(mut self, keywords: Vec<String>) -> Self {
        self.permanent_keywords = keywords;
        self
    }

    /// Replaces the ordered severity table.
    #[must_use]
    pub fn with_severity_rules(mut self, rules: Vec<SeverityRule>) -> Self {
        self.severity_rules = rules;
        self
    }

    /// Replaces the ordered message table.
    #[must_use]
    pub fn with_message_rules(mut self, rules: Vec<MessageRule>) -> Self {
        self.message_rules = rules;
        self
    }

    /// Returns whether `message` is retryable under `retryable_keywords`.
    ///
    /// Matching is case-insensitive. A permanent keyword always wins.
    #[must_use]
    pub fn is_retryable(&self, message: &str, retryable_keywords: &[String]) -> bool {
        let lower = message.to_lowercase();
        if contains_any(&lower, &self.permanent_keywords) {
            return false;
        }
        contains_any(&lower, retryable_keywords)
    }

    /// Returns the first matching severity, `Medium` when nothing matches.
    #[must_use]
    pub fn severity(&self, message: &str) -> Severity {
        let lower = message.to_lowercase();
        self.severity_rules
            .iter()
            .find(|rule| contains_any(&lower, &rule.keywords))
            .map_or(Severity::Medium, |rule| rule.severity)
    }

    fn message_rule(&self, message: &str) -> Option<&MessageRule> {
        let lower = message.to_lowercase();
        self.message_rules
            .iter()
            .find(|rule| lower.contains(&rule.keyword.to_lowercase()))
    }

    /// Maps a raw message to display text; the first matching rule wins and
    /// unmatched messages pass through unchanged.
    #[must_use]
    pub fn user_friendly_message(&self, message: &str) -> String {
        self.message_rule(message)
            .map_or_else(|| message.to_string(), |rule| rule.message.clone())
    }

    /// Display text for a typed error.
    ///
    /// Rules match [`GenflowError::classification_text`] only; an unmatched
    /// error passes through with its full display text, ids included.
    #[must_use]
    pub fn user_message_for(&self, err: &GenflowError) -> String {
        self.message_rule(&err.classification_text())
            .map_or_else(|| err.to_string(), |rule| rule.message.clone())
    }

    /// Classifies a raw message under `retryable_keywords`.
    #[must_use]
    pub fn classify(&self, message: &str, retryable_keywords: &[String]) -> Classification {
        Classification {
            retryable: self.is_retryable(message, retryable_keywords),
            severity: self.severity(message),
            user_message: self.user_friendly_message(message),
        }
    }

    /// Classifies a typed error under `retryable_keywords`.
    ///
    /// Project, unit and job ids carried by the error never take part in
    /// keyword matching.
    #[must_use]
    pub fn classify_error(&self, err: &GenflowError, retryable_keywords: &[String]) -> Classification {
        let text = err.classification_text();
        Classification {
            retryable: self.is_retryable(&text, retryable_keywords),
            severity: self.severity(&text),
            user_message: self.user_message_for(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    fn defaults() -> Vec<String> {
        RetryPolicy::default().retryable_keywords
    }

    #[test]
    fn test_retryable_keywords_case_insensitive() {
        let classifier = ErrorClassifier::new();
        assert!(classifier.is_retryable("Network timeout", &defaults()));
        assert!(classifier.is_retryable("CONNECTION reset by peer", &defaults()));
        assert!(classifier.is_retryable("Rate Limit exceeded", &defaults()));
        assert!(classifier.is_retryable("503 Service Unavailable", &defaults()));
        assert!(classifier.is_retryable("temporary glitch", &defaults()));
    }

    #[test]
    fn test_unknown_message_not_retryable() {
        let classifier = ErrorClassifier::new();
        assert!(!classifier.is_retryable("disk full", &defaults()));
    }

    #[test]
    fn test_permanent_overrides_retryable() {
        let classifier = ErrorClassifier::new();
        assert!(!classifier.is_retryable("Unauthorized: connection refused", &defaults()));
        assert!(!classifier.is_retryable("Invalid response after timeout", &defaults()));
        assert!(!classifier.is_retryable("model NOT FOUND", &defaults()));
    }

    #[test]
    fn test_policy_keywords_replace_defaults() {
        let classifier = ErrorClassifier::new();
        let custom = vec!["flaky".to_string()];
        assert!(classifier.is_retryable("Flaky GPU", &custom));
        assert!(!classifier.is_retryable("Network timeout", &custom));
    }

    #[test]
    fn test_severity_first_match() {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.severity("Network down"), Severity::Medium);
        assert_eq!(classifier.severity("Validation error: no units"), Severity::High);
        assert_eq!(classifier.severity("Authentication failed"), Severity::Critical);
        // timeout appears in an earlier rule than authorization
        assert_eq!(classifier.severity("authorization timeout"), Severity::Medium);
        assert_eq!(classifier.severity("something odd"), Severity::Medium);
    }

    #[test]
    fn test_severity_does_not_affect_retry() {
        let classifier = ErrorClassifier::new();
        let c = classifier.classify("Authentication failed", &defaults());
        assert_eq!(c.severity, Severity::Critical);
        assert!(!c.retryable);

        let c = classifier.classify("Validation error: connection field missing", &defaults());
        assert_eq!(c.severity, Severity::Medium);
        assert!(c.retryable);
    }

    #[test]
    fn test_user_friendly_message_table_order() {
        let classifier = ErrorClassifier::new();
        assert!(classifier
            .user_friendly_message("Network timeout")
            .starts_with("Unable to connect"));
        assert!(classifier
            .user_friendly_message("request timeout")
            .contains("took too long"));
        assert!(classifier
            .user_friendly_message("Model not found")
            .contains("not found"));
        assert!(classifier
            .user_friendly_message("401 Unauthorized")
            .contains("not authorized"));
        assert!(classifier
            .user_friendly_message("rate limit hit")
            .starts_with("Too many"));
    }

    #[test]
    fn test_user_friendly_message_passthrough() {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.user_friendly_message("GPU melted"), "GPU melted");
    }

    #[test]
    fn test_custom_message_table() {
        let classifier = ErrorClassifier::new()
            .with_message_rules(vec![MessageRule::new("gpu", "Renderer is busy.")]);
        assert_eq!(classifier.user_friendly_message("GPU OOM"), "Renderer is busy.");
        assert_eq!(classifier.user_friendly_message("Network down"), "Network down");
    }

    #[test]
    fn test_ids_do_not_drive_classification() {
        let classifier = ErrorClassifier::new();
        let err = GenflowError::validation("project has no units to generate")
            .with_subject("project 'network-promo'");
        let c = classifier.classify_error(&err, &defaults());
        assert_eq!(c.severity, Severity::High);
        assert!(!c.retryable);
        assert!(c.user_message.contains("network-promo"));
        assert!(!c.user_message.starts_with("Unable to connect"));

        let err = GenflowError::timeout("render job unfinished")
            .with_subject("job job-1, unit 'invalid-lighting-test'");
        let c = classifier.classify_error(&err, &defaults());
        assert!(c.retryable);
        assert_eq!(c.severity, Severity::Medium);
    }

    #[test]
    fn test_classify_error_matches_backend_text() {
        let classifier = ErrorClassifier::new();
        let err = GenflowError::backend("promote_unit", "Unauthorized");
        let c = classifier.classify_error(&err, &defaults());
        assert!(!c.retryable);
        assert!(c.user_message.contains("not authorized"));
    }
}
