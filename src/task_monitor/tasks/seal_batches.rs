use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, instrument};

use crate::app::App;
use crate::database::methods::DbMethods as _;
use crate::shutdown::Shutdown;

/// Polls the pending-proof queue and seals a batch whenever it fills up or
/// the oldest pending proof has waited past `batch.batch_timeout`.
#[instrument(skip_all)]
pub async fn run(app: Arc<App>, shutdown: Shutdown) -> anyhow::Result<()> {
    loop {
        if shutdown.is_shutting_down() {
            return Ok(());
        }

        let force = oldest_pending_is_overdue(&app).await?;

        if let Some(batch) = app.seal_batch_now(force).await? {
            info!(batch_id = batch.id, leaf_count = batch.leaf_count, force, "sealed batch");
        }

        tokio::select! {
            () = sleep(app.config.batch.poll_interval) => {}
            () = shutdown.await_shutdown_begin() => return Ok(()),
        }
    }
}

async fn oldest_pending_is_overdue(app: &App) -> anyhow::Result<bool> {
    let oldest = app.database.list_pending_proofs(1).await?;
    Ok(oldest.first().is_some_and(|proof| {
        let age = Utc::now() - proof.server_timestamp;
        age.to_std().map(|age| age > app.config.batch.batch_timeout).unwrap_or(true)
    }))
}
