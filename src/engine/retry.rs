use std::time::Duration;

/// Delay before the retry that follows `failed_attempt` (1-based). Attempts
/// beyond the table are clamped to its last entry; an empty table retries
/// immediately.
pub fn retry_delay(backoff: &[Duration], failed_attempt: u32) -> Duration {
    if backoff.is_empty() {
        return Duration::ZERO;
    }
    let index = (failed_attempt.max(1) as usize - 1).min(backoff.len() - 1);
    backoff[index]
}
