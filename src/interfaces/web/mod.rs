mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::engine::ExecutionEngine;
use crate::scheduler::Scheduler;
use crate::storage::Storage;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: ExecutionEngine,
    pub(crate) scheduler: Scheduler,
    pub(crate) storage: Arc<Storage>,
    pub(crate) api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
}

impl ApiServer {
    pub fn new(
        engine: ExecutionEngine,
        scheduler: Scheduler,
        storage: Arc<Storage>,
        api_host: &str,
        api_port: u16,
    ) -> Self {
        Self {
            state: AppState {
                engine,
                scheduler,
                storage,
                api_port,
            },
            api_host: api_host.to_string(),
        }
    }

    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.state.api_port);
        let app = router::build_api_router(self.state);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server running at http://{}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
