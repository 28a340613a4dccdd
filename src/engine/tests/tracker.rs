use std::sync::Arc;
use std::time::Duration;

use crate::engine::tracker::{
    AlertSeverity, AlertThresholds, ExecutionOutcome, PerformanceTracker,
};
use crate::storage::test_storage;
use crate::storage::types::TargetConfig;

fn thresholds() -> AlertThresholds {
    AlertThresholds {
        slow_duration: Duration::from_secs(60),
        failure_streak: 3,
        degradation_min_samples: 5,
        degradation_window: 20,
    }
}

fn tracker() -> PerformanceTracker {
    PerformanceTracker::with_thresholds(Arc::new(test_storage()), thresholds())
}

fn outcome(duration: Duration, success: bool) -> ExecutionOutcome {
    ExecutionOutcome {
        target: TargetConfig::new("TRT15", 1),
        scrape_type: "general_docket".to_string(),
        duration,
        success,
        result_count: if success { 10 } else { 0 },
        error_type: if success {
            None
        } else {
            Some("NETWORK".to_string())
        },
    }
}

#[tokio::test]
async fn slow_execution_draws_a_warning() {
    let tracker = tracker();
    let alerts = tracker
        .record(&outcome(Duration::from_secs(120), true))
        .await
        .unwrap();
    let slow = alerts
        .iter()
        .find(|a| a.alert_type == "slow_execution")
        .expect("slow_execution alert");
    assert_eq!(slow.severity, AlertSeverity::Warning);
    assert_eq!(slow.target_key, "TRT15:1");
}

#[tokio::test]
async fn fast_execution_is_quiet() {
    let tracker = tracker();
    let alerts = tracker
        .record(&outcome(Duration::from_secs(10), true))
        .await
        .unwrap();
    assert!(alerts.is_empty());
}

#[tokio::test]
async fn third_consecutive_failure_fires_recurring_failure() {
    let tracker = tracker();
    let fail = outcome(Duration::from_secs(5), false);

    assert!(tracker.record(&fail).await.unwrap().is_empty());
    assert!(tracker.record(&fail).await.unwrap().is_empty());
    let alerts = tracker.record(&fail).await.unwrap();
    let recurring = alerts
        .iter()
        .find(|a| a.alert_type == "recurring_failure")
        .expect("recurring_failure alert");
    assert_eq!(recurring.severity, AlertSeverity::Error);
    assert_eq!(recurring.data["last_error_type"], "NETWORK");
}

#[tokio::test]
async fn recovery_after_a_streak_fires_an_info_alert() {
    let tracker = tracker();
    let fail = outcome(Duration::from_secs(5), false);
    let ok = outcome(Duration::from_secs(5), true);

    for _ in 0..3 {
        tracker.record(&fail).await.unwrap();
    }
    tracker.record(&ok).await.unwrap();
    tracker.record(&ok).await.unwrap();
    let alerts = tracker.record(&ok).await.unwrap();
    let recovered = alerts
        .iter()
        .find(|a| a.alert_type == "recovered")
        .expect("recovered alert");
    assert_eq!(recovered.severity, AlertSeverity::Info);
}

#[tokio::test]
async fn recovery_fires_once_per_streak() {
    let tracker = tracker();
    let fail = outcome(Duration::from_secs(5), false);
    let ok = outcome(Duration::from_secs(5), true);

    for _ in 0..3 {
        tracker.record(&fail).await.unwrap();
    }
    tracker.record(&ok).await.unwrap();
    tracker.record(&ok).await.unwrap();
    let alerts = tracker.record(&ok).await.unwrap();
    assert!(alerts.iter().any(|a| a.alert_type == "recovered"));

    // The old failures are still inside the history window; further
    // successes must stay quiet.
    for _ in 0..4 {
        let alerts = tracker.record(&ok).await.unwrap();
        assert!(alerts.iter().all(|a| a.alert_type != "recovered"));
    }
}

#[tokio::test]
async fn recovery_needs_a_prior_failure() {
    // An all-green history must never report a recovery.
    let tracker = tracker();
    let ok = outcome(Duration::from_secs(5), true);
    for _ in 0..5 {
        let alerts = tracker.record(&ok).await.unwrap();
        assert!(alerts.iter().all(|a| a.alert_type != "recovered"));
    }
}

#[tokio::test]
async fn outlier_duration_fires_degradation() {
    let tracker = tracker();
    // Stable baseline, then a 50x outlier.
    for _ in 0..6 {
        tracker
            .record(&outcome(Duration::from_millis(200), true))
            .await
            .unwrap();
    }
    let alerts = tracker
        .record(&outcome(Duration::from_secs(10), true))
        .await
        .unwrap();
    let degraded = alerts
        .iter()
        .find(|a| a.alert_type == "performance_degradation")
        .expect("performance_degradation alert");
    assert_eq!(degraded.severity, AlertSeverity::Warning);
    assert!(degraded.data["slowdown_pct"].as_f64().unwrap() > 100.0);
}

#[tokio::test]
async fn degradation_needs_enough_samples() {
    let tracker = tracker();
    for _ in 0..3 {
        tracker
            .record(&outcome(Duration::from_millis(200), true))
            .await
            .unwrap();
    }
    let alerts = tracker
        .record(&outcome(Duration::from_secs(10), true))
        .await
        .unwrap();
    assert!(
        alerts
            .iter()
            .all(|a| a.alert_type != "performance_degradation")
    );
}

#[tokio::test]
async fn failed_executions_never_count_as_degradation() {
    let tracker = tracker();
    for _ in 0..6 {
        tracker
            .record(&outcome(Duration::from_millis(200), true))
            .await
            .unwrap();
    }
    let alerts = tracker
        .record(&outcome(Duration::from_secs(10), false))
        .await
        .unwrap();
    assert!(
        alerts
            .iter()
            .all(|a| a.alert_type != "performance_degradation")
    );
}

#[tokio::test]
async fn targets_track_independently() {
    let tracker = tracker();
    let fail = outcome(Duration::from_secs(5), false);
    let other = ExecutionOutcome {
        target: TargetConfig::new("TJSP", 2),
        ..outcome(Duration::from_secs(5), false)
    };

    tracker.record(&fail).await.unwrap();
    tracker.record(&fail).await.unwrap();
    // Two failures on TRT15:1 plus one on TJSP:2 is not a streak anywhere.
    let alerts = tracker.record(&other).await.unwrap();
    assert!(
        alerts
            .iter()
            .all(|a| a.alert_type != "recurring_failure")
    );
}