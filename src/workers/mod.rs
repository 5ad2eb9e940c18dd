use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{error, info};

use crate::{
    jobs::{self, JobQueueError},
    state::AppState,
};

pub mod fulfillment;

pub struct Worker {
    state: Arc<AppState>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(state: Arc<AppState>, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("fulfillment worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn tick(&self) -> Result<bool, JobQueueError> {
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };

        let run_opt = jobs::reserve_run(&mut conn)?;
        drop(conn);

        if let Some(run) = run_opt {
            info!(run_id = %run.id, group_id = %run.message_group_id, "run reserved");
            if let Err(err) = fulfillment::execute(self.state.clone(), &run).await {
                // Errors surfacing here happened before any format rendered;
                // per-format failures are recorded inside execute.
                error!(run_id = %run.id, error = %err, "run aborted");
                if let Ok(mut conn) = self.state.db() {
                    jobs::fail_run(&mut conn, run.id, &err.to_string())?;
                } else {
                    error!("failed to mark run failed due to pool error");
                }
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
