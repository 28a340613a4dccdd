//! Error classification for failed scrape attempts.
//!
//! An ordered rule table maps raw error text to a category with a
//! retryability verdict. Non-retryable categories are matched first so a
//! message carrying both an auth marker and a network marker is never
//! mistaken for a transient failure.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Authentication,
    Network,
    Timeout,
    RateLimit,
    UpstreamSystem,
    Script,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "AUTHENTICATION",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::UpstreamSystem => "UPSTREAM_SYSTEM",
            ErrorCategory::Script => "SCRIPT",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }

    pub fn retryable(self) -> bool {
        match self {
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::RateLimit
            | ErrorCategory::UpstreamSystem => true,
            ErrorCategory::Authentication | ErrorCategory::Script | ErrorCategory::Unknown => {
                false
            }
        }
    }

    fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::Authentication => {
                "Tribunal rejected the configured credentials. Review the credential before running again."
            }
            ErrorCategory::Network => {
                "Could not reach the tribunal portal. The collection will be retried automatically."
            }
            ErrorCategory::Timeout => {
                "The tribunal portal took too long to respond. The collection will be retried automatically."
            }
            ErrorCategory::RateLimit => {
                "The tribunal portal is limiting requests. The collection will be retried automatically."
            }
            ErrorCategory::UpstreamSystem => {
                "The tribunal portal reported an internal problem. The collection will be retried automatically."
            }
            ErrorCategory::Script => {
                "The collection script failed unexpectedly. The team has been notified."
            }
            ErrorCategory::Unknown => "The collection failed for an unrecognized reason.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub retryable: bool,
    /// Safe for end users; never carries upstream detail.
    pub user_message: String,
    /// Raw detail for logs and diagnostics.
    pub technical_message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Ordered rule table. Non-retryable categories come first; within the
/// retryable block, more specific markers precede generic network ones so a
/// `504 gateway timeout` lands on UPSTREAM_SYSTEM rather than NETWORK.
static RULES: LazyLock<Vec<(Regex, ErrorCategory)>> = LazyLock::new(|| {
    [
        (
            r"(?i)\b401\b|\b403\b|unauthori[sz]ed|forbidden|invalid (credential|password|token|login)|authentication fail|login fail|senha inv|sess[aã]o expirada",
            ErrorCategory::Authentication,
        ),
        (
            r"(?i)typeerror|referenceerror|syntaxerror|cannot read propert|undefined is not|null pointer|panicked at|unhandled (exception|rejection)|assertion fail",
            ErrorCategory::Script,
        ),
        (
            r"(?i)\b429\b|rate.?limit|too many requests|quota exceeded",
            ErrorCategory::RateLimit,
        ),
        (
            r"(?i)\b50[0234]\b|bad gateway|service unavailable|internal server error|gateway time.?out",
            ErrorCategory::UpstreamSystem,
        ),
        (
            r"(?i)timed?.?out|etimedout|esockettimedout|deadline exceeded",
            ErrorCategory::Timeout,
        ),
        (
            r"(?i)econnrefused|econnreset|enotfound|ehostunreach|enetunreach|eai_again|epipe|socket hang up|connection (refused|reset|closed)|dns|network error",
            ErrorCategory::Network,
        ),
    ]
    .into_iter()
    .map(|(pattern, category)| {
        // Patterns are compile-time constants; a bad one is a programmer error.
        (Regex::new(pattern).unwrap(), category)
    })
    .collect()
});

/// Maps raw error text to a classified error. Falls back to UNKNOWN
/// (non-retryable) when no rule matches.
pub fn classify(raw: &str, context: Option<serde_json::Value>) -> ClassifiedError {
    let category = RULES
        .iter()
        .find(|(re, _)| re.is_match(raw))
        .map(|(_, category)| *category)
        .unwrap_or(ErrorCategory::Unknown);

    ClassifiedError {
        category,
        retryable: category.retryable(),
        user_message: category.user_message().to_string(),
        technical_message: raw.to_string(),
        timestamp: chrono::Utc::now(),
        context,
    }
}
