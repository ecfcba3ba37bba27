use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::select;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::app::App;
use crate::shutdown::Shutdown;

pub mod tasks;

const SEAL_BATCHES_BACKOFF: Duration = Duration::from_secs(5);
const ANCHOR_BATCHES_BACKOFF: Duration = Duration::from_secs(5);
const POLL_CONFIRMATIONS_BACKOFF: Duration = Duration::from_secs(5);
const SYNC_PEERS_BACKOFF: Duration = Duration::from_secs(5);

/// A task manager for all long running background jobs: batch sealing,
/// chain anchoring, confirmation polling, and peer synchronization.
///
/// It's assumed that there is only one instance at a time. Spawning multiple
/// `TaskMonitor`s will result in duplicated anchors and batches.
pub struct TaskMonitor;

impl TaskMonitor {
    /// Initialize and run the task monitor.
    #[instrument(level = "debug", skip_all)]
    pub async fn init(main_app: Arc<App>, shutdown: Shutdown) {
        let handles = FuturesUnordered::new();

        let app = main_app.clone();
        let sd = shutdown.clone();
        let seal_batches = move || tasks::seal_batches::run(app.clone(), sd.clone());
        handles.push(crate::utils::spawn_with_backoff_cancel_on_shutdown(
            seal_batches,
            SEAL_BATCHES_BACKOFF,
            shutdown.clone(),
        ));

        for &chain in main_app.broadcasters.keys() {
            let app = main_app.clone();
            let sd = shutdown.clone();
            let anchor_batches = move || tasks::anchor_batches::run(app.clone(), chain, sd.clone());
            handles.push(crate::utils::spawn_with_backoff_cancel_on_shutdown(
                anchor_batches,
                ANCHOR_BATCHES_BACKOFF,
                shutdown.clone(),
            ));

            let app = main_app.clone();
            let sd = shutdown.clone();
            let poll_confirmations = move || tasks::poll_confirmations::run(app.clone(), chain, sd.clone());
            handles.push(crate::utils::spawn_with_backoff_cancel_on_shutdown(
                poll_confirmations,
                POLL_CONFIRMATIONS_BACKOFF,
                shutdown.clone(),
            ));
        }

        if main_app.sync.is_some() {
            let app = main_app.clone();
            let sd = shutdown.clone();
            let sync_peers = move || tasks::sync_peers::run(app.clone(), sd.clone());
            handles.push(crate::utils::spawn_with_backoff_cancel_on_shutdown(
                sync_peers,
                SYNC_PEERS_BACKOFF,
                shutdown.clone(),
            ));
        }

        tokio::spawn(Self::monitor_shutdown(handles, shutdown));
    }

    async fn monitor_shutdown(mut handles: FuturesUnordered<JoinHandle<()>>, shutdown: Shutdown) {
        select! {
            _ = shutdown.await_shutdown_begin() => {}
            _ = Self::await_task_panic(&mut handles, shutdown.clone()) => {}
        };
    }

    async fn await_task_panic(handles: &mut FuturesUnordered<JoinHandle<()>>, shutdown: Shutdown) {
        while let Some(result) = handles.next().await {
            if !shutdown.is_shutting_down() {
                match result {
                    Ok(()) => info!("task exited"),
                    Err(error) => {
                        error!(?error, "task panicked");
                        shutdown.clone().shutdown();
                        return;
                    }
                }
            }
        }
        warn!("all tasks have returned unexpectedly");
    }
}
