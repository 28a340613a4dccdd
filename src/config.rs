use std::time::Duration;

use tracing::warn;

/// Engine-wide tunables. Every knob is read from a `JUSCRON_*` environment
/// variable so deployments can be retuned without a rebuild.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max jobs executing simultaneously across the whole instance.
    pub max_concurrent_jobs: usize,
    /// Max targets executing simultaneously within a single job.
    pub max_targets_per_job: usize,
    /// Hard ceiling on scraper processes across all jobs.
    pub max_worker_processes: usize,
    /// Attempts per target, first try included.
    pub max_attempts: u32,
    /// Retry delays indexed by attempt number; clamped to the last entry.
    pub backoff: Vec<Duration>,
    /// Wall-clock limit for one scraper attempt.
    pub attempt_timeout: Duration,
    /// Grace between SIGTERM and the forced kill on timeout/cancel.
    pub kill_grace: Duration,
    /// Interval of the stuck-job sweeper.
    pub poll_interval: Duration,
    /// A job running longer than this is swept to failed.
    pub stuck_job_timeout: Duration,
    /// Command used to launch one scraper attempt.
    pub scraper_command: String,
    /// Entrypoint script handed to the scraper command.
    pub scraper_script: String,
    /// Timezone substituted when a definition carries an invalid one.
    pub default_timezone: String,
    /// Retained log lines per job.
    pub log_buffer_capacity: usize,
    /// Directory holding the sqlite database.
    pub data_dir: String,
    pub api_host: String,
    pub api_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_targets_per_job: 3,
            max_worker_processes: 4,
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
            attempt_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
            stuck_job_timeout: Duration::from_secs(3600),
            scraper_command: "node".to_string(),
            scraper_script: "scrapers/run.js".to_string(),
            default_timezone: "America/Sao_Paulo".to_string(),
            log_buffer_capacity: 500,
            data_dir: "data".to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 8710,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Invalid value for {}: '{}', using default", key, raw);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

fn env_secs(key: &str, fallback: Duration) -> Duration {
    Duration::from_secs(env_parsed(key, fallback.as_secs()))
}

fn env_string(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Comma-separated seconds, e.g. `30,60,120`. Any bad element voids the list.
fn env_backoff(key: &str, fallback: Vec<Duration>) -> Vec<Duration> {
    let Ok(raw) = std::env::var(key) else {
        return fallback;
    };
    let parsed: Result<Vec<u64>, _> = raw.split(',').map(|p| p.trim().parse()).collect();
    match parsed {
        Ok(secs) if !secs.is_empty() => secs.into_iter().map(Duration::from_secs).collect(),
        _ => {
            warn!("Invalid value for {}: '{}', using default", key, raw);
            fallback
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_concurrent_jobs: env_parsed("JUSCRON_MAX_CONCURRENT_JOBS", d.max_concurrent_jobs)
                .max(1),
            max_targets_per_job: env_parsed("JUSCRON_MAX_TARGETS_PER_JOB", d.max_targets_per_job)
                .max(1),
            max_worker_processes: env_parsed(
                "JUSCRON_MAX_WORKER_PROCESSES",
                d.max_worker_processes,
            )
            .max(1),
            max_attempts: env_parsed("JUSCRON_MAX_ATTEMPTS", d.max_attempts).max(1),
            backoff: env_backoff("JUSCRON_BACKOFF_SECONDS", d.backoff),
            attempt_timeout: env_secs("JUSCRON_ATTEMPT_TIMEOUT_SECONDS", d.attempt_timeout),
            kill_grace: env_secs("JUSCRON_KILL_GRACE_SECONDS", d.kill_grace),
            poll_interval: env_secs("JUSCRON_POLL_INTERVAL_SECONDS", d.poll_interval),
            stuck_job_timeout: env_secs("JUSCRON_STUCK_JOB_TIMEOUT_SECONDS", d.stuck_job_timeout),
            scraper_command: env_string("JUSCRON_SCRAPER_COMMAND", &d.scraper_command),
            scraper_script: env_string("JUSCRON_SCRAPER_SCRIPT", &d.scraper_script),
            default_timezone: env_string("JUSCRON_DEFAULT_TIMEZONE", &d.default_timezone),
            log_buffer_capacity: env_parsed(
                "JUSCRON_LOG_BUFFER_CAPACITY",
                d.log_buffer_capacity,
            )
            .max(1),
            data_dir: env_string("JUSCRON_DATA_DIR", &d.data_dir),
            api_host: env_string("JUSCRON_API_HOST", &d.api_host),
            api_port: env_parsed("JUSCRON_API_PORT", d.api_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.max_concurrent_jobs >= 1);
        assert_eq!(cfg.backoff.len(), 3);
        assert!(cfg.backoff.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn backoff_parsing_rejects_garbage() {
        let fallback = vec![Duration::from_secs(30)];
        // No env var set for this key, fallback wins.
        assert_eq!(
            env_backoff("JUSCRON_TEST_UNSET_BACKOFF", fallback.clone()),
            fallback
        );
    }
}
