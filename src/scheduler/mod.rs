//! Cron scheduler: turns active job definitions into engine submissions.
//!
//! Each registered definition owns one timer in the runtime scheduler. The
//! registry map (definition id to runtime timer id) is the single sync point
//! between the store and the runtime; every mutation goes through it.

pub mod frequency;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::engine::{ExecutionEngine, JobRequest};
use crate::storage::Storage;
use crate::storage::types::JobDefinitionRecord;

#[derive(Clone)]
pub struct Scheduler {
    storage: Arc<Storage>,
    engine: ExecutionEngine,
    default_timezone: String,
    runtime: Arc<Mutex<JobScheduler>>,
    registry: Arc<Mutex<HashMap<String, uuid::Uuid>>>,
}

impl Scheduler {
    pub async fn new(
        storage: Arc<Storage>,
        engine: ExecutionEngine,
        default_timezone: &str,
    ) -> Result<Self> {
        let runtime = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("failed to create runtime scheduler: {}", e))?;
        runtime
            .start()
            .await
            .map_err(|e| anyhow!("failed to start runtime scheduler: {}", e))?;
        Ok(Self {
            storage,
            engine,
            default_timezone: default_timezone.to_string(),
            runtime: Arc::new(Mutex::new(runtime)),
            registry: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Registers timers for every active definition. A definition with a bad
    /// cron expression is skipped with a warning; only an unreachable store
    /// aborts startup.
    pub async fn load_active_on_startup(&self) -> Result<usize> {
        let definitions = self.storage.list_active_definitions().await?;
        let mut registered = 0;
        for definition in &definitions {
            match self.register(definition).await {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!(
                        "Skipping definition {} ('{}'): {}",
                        definition.definition_id, definition.name, e
                    );
                }
            }
        }
        info!(
            "Scheduler loaded {}/{} active definition(s)",
            registered,
            definitions.len()
        );
        Ok(registered)
    }

    /// Adds (or replaces) the runtime timer for a definition. The timer fires
    /// in the definition's timezone; an unknown timezone falls back to the
    /// configured default.
    pub async fn register(&self, definition: &JobDefinitionRecord) -> Result<()> {
        let cron6 = frequency::normalize(&definition.cron)?;
        let timezone = match frequency::parse_timezone(&definition.timezone) {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    "Definition {} has unknown timezone '{}', using {}",
                    definition.definition_id, definition.timezone, self.default_timezone
                );
                frequency::parse_timezone(&self.default_timezone)?
            }
        };

        let scheduler = self.clone();
        let definition_id = definition.definition_id.clone();
        let job = Job::new_async_tz(cron6.as_str(), timezone, move |_uuid, _lock| {
            let scheduler = scheduler.clone();
            let definition_id = definition_id.clone();
            Box::pin(async move {
                scheduler.fire(&definition_id).await;
            })
        })
        .map_err(|e| anyhow!("failed to build cron timer: {}", e))?;

        // Lock order is registry then runtime, everywhere.
        let mut registry = self.registry.lock().await;
        let runtime_id = self
            .runtime
            .lock()
            .await
            .add(job)
            .await
            .map_err(|e| anyhow!("failed to register cron timer: {}", e))?;
        if let Some(old_id) = registry.insert(definition.definition_id.clone(), runtime_id) {
            if let Err(e) = self.runtime.lock().await.remove(&old_id).await {
                warn!(
                    "Failed to remove replaced timer {} for definition {}: {}",
                    old_id, definition.definition_id, e
                );
            }
        }
        Ok(())
    }

    /// Pauses a definition by dropping its timer; the stored row and its run
    /// history are untouched.
    pub async fn pause(&self, definition_id: &str) -> Result<()> {
        self.unregister(definition_id).await
    }

    /// Stops the timer for a definition. A definition without a timer is a
    /// no-op, so pause and delete are idempotent.
    pub async fn unregister(&self, definition_id: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if let Some(runtime_id) = registry.remove(definition_id) {
            self.runtime
                .lock()
                .await
                .remove(&runtime_id)
                .await
                .map_err(|e| anyhow!("failed to remove cron timer: {}", e))?;
        }
        Ok(())
    }

    /// Re-reads the definition and registers its timer; used when a paused
    /// definition is reactivated.
    pub async fn resume(&self, definition_id: &str) -> Result<()> {
        let Some(definition) = self.storage.get_definition(definition_id).await? else {
            bail!("definition {} not found", definition_id);
        };
        self.register(&definition).await
    }

    /// Next-occurrence stamp for a definition's schedule, for API responses
    /// and fire bookkeeping.
    pub fn next_run_stamp(&self, cron: &str, timezone: &str) -> Option<String> {
        frequency::next_run_stamp(cron, timezone, &self.default_timezone)
    }

    pub fn default_timezone(&self) -> &str {
        &self.default_timezone
    }

    /// One timer tick: re-read the definition (it may have been edited or
    /// paused since registration), submit a job, record the fire. Failures
    /// are logged and never cancel the timer.
    async fn fire(&self, definition_id: &str) {
        let definition = match self.storage.get_definition(definition_id).await {
            Ok(Some(definition)) => definition,
            Ok(None) => {
                warn!("Timer fired for missing definition {}", definition_id);
                return;
            }
            Err(e) => {
                error!("Failed to load definition {}: {}", definition_id, e);
                return;
            }
        };
        if !definition.active {
            return;
        }

        let request = JobRequest {
            targets: definition.targets.clone(),
            scrape_type: definition.scrape_type.clone(),
            scrape_subtype: definition.scrape_subtype.clone(),
            credential_ref: definition.credential_ref.clone(),
        };
        match self.engine.submit(request).await {
            Ok(job_id) => {
                info!(
                    "Definition '{}' fired job {}",
                    definition.name, job_id
                );
                let next = self.next_run_stamp(&definition.cron, &definition.timezone);
                if let Err(e) = self
                    .storage
                    .record_definition_fired(definition_id, &job_id, next.as_deref())
                    .await
                {
                    error!(
                        "Failed to record fire of definition {}: {}",
                        definition_id, e
                    );
                }
            }
            Err(e) => {
                error!(
                    "Definition '{}' failed to create job: {}",
                    definition.name, e
                );
            }
        }
    }
}
