//! Blockchain anchoring: broadcasts a sealed batch's Merkle root to each
//! configured chain and tracks confirmations.
//!
//! Each chain gets one serial worker (see `task_monitor::tasks::anchor_batches`
//! and `...::poll_confirmations`); this module holds the per-chain broadcast
//! algorithm and the shared retry/backoff wrapper, grounded on the
//! `spawn_with_backoff` family's exponential-retry idiom in `utils::mod`,
//! generalized here from "retry forever" to "retry N times then fail".

pub mod bitcoin;
pub mod ethereum;

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::database::types::AnchorErrorKind;

/// A chain-specific broadcaster. `bitcoin::Broadcaster` and
/// `ethereum::Broadcaster` both implement this; the confirmation poller and
/// retry wrapper are chain-agnostic.
#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    /// Broadcasts a transaction committing `merkle_root` (32 bytes) tagged
    /// with `registry_tag`, returning the chain's transaction id.
    async fn broadcast(&self, merkle_root: &[u8; 32], registry_tag: &str) -> Result<String, AnchorError>;

    /// Returns confirmation count for a previously broadcast transaction.
    async fn confirmations(&self, tx_id: &str) -> Result<u32, AnchorError>;
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AnchorError {
    pub kind:    AnchorErrorKind,
    pub message: String,
}

impl AnchorError {
    #[must_use]
    pub fn new(kind: AnchorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn remediation_hint(&self) -> &'static str {
        self.kind.remediation_hint()
    }
}

/// Runs `attempt` up to `max_attempts` times with exponential backoff
/// (base `base_delay`, factor 2) plus jitter, reattempting only the failed
/// step rather than the whole pipeline — each `attempt` call is expected to
/// be idempotent up to the point it failed.
#[instrument(skip(attempt), level = "debug")]
pub async fn broadcast_with_retry<F, Fut>(
    base_delay: Duration,
    max_attempts: u32,
    mut attempt: F,
) -> Result<String, AnchorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, AnchorError>>,
{
    let mut last_err = None;

    for attempt_number in 0..max_attempts.max(1) {
        match attempt().await {
            Ok(tx_id) => return Ok(tx_id),
            Err(err) => {
                warn!(attempt = attempt_number, kind = %err.kind, "anchor broadcast attempt failed");
                let fatal = matches!(err.kind, AnchorErrorKind::InvalidKey | AnchorErrorKind::InsufficientFunds);
                last_err = Some(err);
                if fatal {
                    break;
                }
                if attempt_number + 1 < max_attempts {
                    let backoff = base_delay * 2u32.saturating_pow(attempt_number);
                    let jitter = Duration::from_millis(fastrand_jitter_ms(backoff));
                    sleep(backoff + jitter).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AnchorError::new(AnchorErrorKind::Unknown, "no attempts made")))
}

/// Small deterministic-enough jitter without pulling in a dedicated RNG
/// crate: salted by the backoff duration itself so consecutive retries
/// don't collide, bounded to 10% of the backoff.
fn fastrand_jitter_ms(backoff: Duration) -> u64 {
    let ms = backoff.as_millis() as u64;
    (ms.wrapping_mul(2_654_435_761) % (ms / 10 + 1)).min(ms / 10 + 1)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = broadcast_with_retry(Duration::from_millis(1), 3, move || {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AnchorError::new(AnchorErrorKind::RpcUnreachable, "timeout"))
                } else {
                    Ok("0xtx".to_owned())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "0xtx");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_key_does_not_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = broadcast_with_retry(Duration::from_millis(1), 3, move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(AnchorError::new(AnchorErrorKind::InvalidKey, "no key configured"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
