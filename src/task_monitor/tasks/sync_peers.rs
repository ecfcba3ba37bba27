use std::sync::Arc;

use tokio::time::sleep;
use tracing::instrument;

use crate::app::App;
use crate::shutdown::Shutdown;

/// Periodically asks the federation layer to reconcile Merkle roots with
/// every known peer.
#[instrument(skip_all)]
pub async fn run(app: Arc<App>, shutdown: Shutdown) -> anyhow::Result<()> {
    loop {
        if shutdown.is_shutting_down() {
            return Ok(());
        }

        if let Some(sync) = &app.sync {
            sync.sync_all().await;
        }

        tokio::select! {
            () = sleep(app.config.federation.sync_interval) => {}
            () = shutdown.await_shutdown_begin() => return Ok(()),
        }
    }
}
