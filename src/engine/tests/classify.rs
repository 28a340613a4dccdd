use crate::engine::classify::{ErrorCategory, classify};

#[test]
fn connection_refused_is_retryable_network() {
    let err = classify("connect ECONNREFUSED 10.0.0.1:443", None);
    assert_eq!(err.category, ErrorCategory::Network);
    assert!(err.retryable);
}

#[test]
fn http_401_is_non_retryable_authentication() {
    let err = classify("Request failed with status code 401", None);
    assert_eq!(err.category, ErrorCategory::Authentication);
    assert!(!err.retryable);
}

#[test]
fn auth_marker_wins_over_network_marker() {
    // A message carrying both markers must land on the non-retryable side.
    let err = classify("network error while validating: 401 unauthorized", None);
    assert_eq!(err.category, ErrorCategory::Authentication);
    assert!(!err.retryable);
}

#[test]
fn gateway_timeout_is_upstream_not_timeout() {
    let err = classify("upstream returned 504 gateway timeout", None);
    assert_eq!(err.category, ErrorCategory::UpstreamSystem);
    assert!(err.retryable);
}

#[test]
fn plain_timeout_is_timeout() {
    let err = classify("navigation timed out after 30000 ms", None);
    assert_eq!(err.category, ErrorCategory::Timeout);
    assert!(err.retryable);
}

#[test]
fn script_crash_is_non_retryable() {
    let err = classify(
        "TypeError: Cannot read properties of undefined (reading 'rows')",
        None,
    );
    assert_eq!(err.category, ErrorCategory::Script);
    assert!(!err.retryable);
}

#[test]
fn rate_limit_is_retryable() {
    let err = classify("429 Too Many Requests", None);
    assert_eq!(err.category, ErrorCategory::RateLimit);
    assert!(err.retryable);
}

#[test]
fn unrecognized_text_defaults_to_unknown_non_retryable() {
    let err = classify("the moon was in the wrong phase", None);
    assert_eq!(err.category, ErrorCategory::Unknown);
    assert!(!err.retryable);
    assert_eq!(err.technical_message, "the moon was in the wrong phase");
}

#[test]
fn user_message_never_leaks_technical_detail() {
    let err = classify("connect ECONNREFUSED 10.0.0.1:443", None);
    assert!(!err.user_message.contains("ECONNREFUSED"));
    assert!(!err.user_message.contains("10.0.0.1"));
}

#[test]
fn context_is_carried_through() {
    let err = classify(
        "socket hang up",
        Some(serde_json::json!({ "tribunal": "TRT15" })),
    );
    assert_eq!(
        err.context.unwrap()["tribunal"],
        serde_json::json!("TRT15")
    );
}
