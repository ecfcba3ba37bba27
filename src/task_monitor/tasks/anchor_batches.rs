use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, info, instrument};

use crate::app::App;
use crate::database::methods::DbMethods as _;
use crate::database::types::Chain;
use crate::shutdown::Shutdown;

/// Finds sealed batches with no anchor yet on `chain` and broadcasts one.
#[instrument(skip_all, fields(%chain))]
pub async fn run(app: Arc<App>, chain: Chain, shutdown: Shutdown) -> anyhow::Result<()> {
    loop {
        if shutdown.is_shutting_down() {
            return Ok(());
        }

        let backlog = app.database.list_unanchored_batches(chain, 10).await?;
        for batch in backlog {
            match app.anchor_batch(batch.id, chain).await {
                Ok(anchor) => info!(batch_id = batch.id, tx_id = ?anchor.tx_id, "broadcast anchor"),
                Err(error) => error!(batch_id = batch.id, %error, "failed to broadcast anchor"),
            }
        }

        tokio::select! {
            () = sleep(app.config.batch.poll_interval) => {}
            () = shutdown.await_shutdown_begin() => return Ok(()),
        }
    }
}
