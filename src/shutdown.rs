use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

/// Cooperative shutdown signal shared across background tasks.
///
/// `Shutdown` is cheaply cloneable. Calling [`Shutdown::spawn`] installs a
/// SIGTERM/SIGINT handler and returns a handle that tasks can poll to learn
/// when a shutdown has begun, and a second stage that fires once the
/// configured grace period has elapsed so tasks that ignored the first
/// signal get forcibly cancelled.
#[derive(Debug, Clone)]
pub struct Shutdown {
    begin: watch::Receiver<bool>,
    done:  watch::Receiver<bool>,
}

impl Shutdown {
    /// Installs signal handlers and starts the shutdown timers.
    ///
    /// `timeout` is the maximum time tasks are given to wind down after the
    /// first signal before `await_shutdown` also resolves. `delay` is a
    /// minimum grace period observed even if every task finishes instantly,
    /// giving in-flight requests a chance to drain.
    pub fn spawn(timeout: Duration, delay: Duration) -> Self {
        let (begin_tx, begin_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received");
            let _ = begin_tx.send(true);

            tokio::select! {
                () = tokio::time::sleep(timeout) => {
                    info!("Shutdown timeout elapsed");
                }
                () = wait_for_signal() => {
                    info!("Second shutdown signal received, forcing exit");
                }
            }

            tokio::time::sleep(delay).await;
            let _ = done_tx.send(true);
        });

        Self {
            begin: begin_rx,
            done: done_rx,
        }
    }

    /// Resolves as soon as a shutdown signal has been received.
    pub async fn await_shutdown_begin(&self) {
        let mut rx = self.begin.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Resolves once the shutdown grace period has fully elapsed.
    pub async fn await_shutdown(&self) {
        let mut rx = self.done.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.begin.borrow()
    }
}

async fn wait_for_signal() {
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn begin_resolves_immediately_once_flagged() {
        let (tx, rx) = watch::channel(true);
        drop(tx);
        let shutdown = Shutdown {
            begin: rx.clone(),
            done:  rx,
        };
        shutdown.await_shutdown_begin().await;
    }

    #[tokio::test]
    async fn not_shutting_down_by_default() {
        let (_tx, rx) = watch::channel(false);
        let shutdown = Shutdown {
            begin: rx.clone(),
            done:  rx,
        };
        assert!(!shutdown.is_shutting_down());
        let result =
            tokio::time::timeout(Duration::from_millis(50), shutdown.await_shutdown_begin()).await;
        assert!(result.is_err());
    }
}
