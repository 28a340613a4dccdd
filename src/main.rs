mod config;
mod engine;
mod interfaces;
mod scheduler;
mod storage;

use std::sync::Arc;

use anyhow::Result;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::config::EngineConfig;
use crate::engine::ExecutionEngine;
use crate::engine::logstream::LogStream;
use crate::engine::runner::ProcessRunner;
use crate::interfaces::web::ApiServer;
use crate::scheduler::Scheduler;
use crate::storage::Storage;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    if let Err(e) = run().await {
        error!("juscron failed to start: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = EngineConfig::from_env();
    let storage = Arc::new(Storage::new(&config.data_dir).await?);

    let logs = LogStream::new(config.log_buffer_capacity);
    let runner = Arc::new(ProcessRunner::new(
        &config.scraper_command,
        &config.scraper_script,
    ));
    let api_host = config.api_host.clone();
    let api_port = config.api_port;
    let default_timezone = config.default_timezone.clone();
    let poll_interval = config.poll_interval;
    let engine = ExecutionEngine::new(storage.clone(), config, logs, runner);

    let scheduler = Scheduler::new(storage.clone(), engine.clone(), &default_timezone).await?;
    scheduler.load_active_on_startup().await?;

    // Background sweep for jobs stuck past the configured timeout.
    let sweeper = engine.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.sweep_stuck_jobs().await {
                warn!("Stuck-job sweep failed: {}", e);
            }
        }
    });

    info!("juscron up");
    ApiServer::new(engine, scheduler, storage, &api_host, api_port)
        .serve()
        .await
}
