use std::sync::Arc;

use tokio::time::sleep;
use tracing::{info, instrument};

use crate::app::App;
use crate::database::types::Chain;
use crate::shutdown::Shutdown;

/// Periodically checks every broadcast-but-unconfirmed anchor on `chain` for
/// new confirmations.
#[instrument(skip_all, fields(%chain))]
pub async fn run(app: Arc<App>, chain: Chain, shutdown: Shutdown) -> anyhow::Result<()> {
    loop {
        if shutdown.is_shutting_down() {
            return Ok(());
        }

        let updated = app.poll_confirmations(chain).await?;
        if updated > 0 {
            info!(updated, "polled anchor confirmations");
        }

        tokio::select! {
            () = sleep(app.config.anchor.confirmation_poll_interval) => {}
            () = shutdown.await_shutdown_begin() => return Ok(()),
        }
    }
}
