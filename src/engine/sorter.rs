//! Deterministic execution ordering for tribunal targets.
//!
//! Numbered tribunals (TRT15, TRF3...) run before unnumbered ones (STJ, TST),
//! ordered by their ordinal and then by instance degree. The order only
//! decides dispatch sequence; completion order is up to the concurrency
//! ceilings.

use std::sync::LazyLock;

use regex::Regex;

use crate::storage::types::{JobTargetRecord, TargetConfig};

static ORDINAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// First number embedded in a tribunal code, if any.
pub fn ordinal(code: &str) -> Option<u32> {
    ORDINAL
        .find(code)
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

/// Sort key: numbered targets first (by ordinal, then degree), unnumbered
/// after (alphabetical by code, then degree).
fn sort_key(code: &str, degree: u8) -> (u8, u32, String, u8) {
    match ordinal(code) {
        Some(n) => (0, n, String::new(), degree),
        None => (1, 0, code.to_string(), degree),
    }
}

/// Idempotent, stable total order over target configurations.
pub fn order(mut targets: Vec<TargetConfig>) -> Vec<TargetConfig> {
    targets.sort_by_key(|t| sort_key(&t.code, t.degree));
    targets
}

/// Same order applied to persisted job target rows.
pub fn order_records(mut targets: Vec<JobTargetRecord>) -> Vec<JobTargetRecord> {
    targets.sort_by_key(|t| sort_key(&t.code, t.degree));
    targets
}
