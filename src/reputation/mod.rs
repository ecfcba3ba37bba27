//! Per-identity behavioral scoring and sliding-window rate admission.
//!
//! Single-writer-per-identity is implemented by sharding a map of per-shard
//! mutexes keyed by a hash of the identity id, the same discipline the rest
//! of this tree uses for exclusive per-resource writers. Reads clone the
//! current state out from under the lock, so readers never block writers
//! for longer than a pointer copy.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::ReputationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Denial {
    RateLimited { current_rate: u32 },
    TooSoon,
    ScoreTooLow { score: u8 },
}

#[derive(Debug, Clone)]
struct IdentityState {
    window:        Vec<DateTime<Utc>>,
    score:         u8,
    success_count: u64,
    failure_count: u64,
    last_activity: DateTime<Utc>,
    anomaly_log:   Vec<(DateTime<Utc>, String)>,
}

impl IdentityState {
    fn new(neutral_score: u8, now: DateTime<Utc>) -> Self {
        Self {
            window: Vec::new(),
            score: neutral_score,
            success_count: 0,
            failure_count: 0,
            last_activity: now,
            anomaly_log: Vec::new(),
        }
    }
}

/// A read-only snapshot of an identity's reputation state, safe to hand to
/// callers outside the engine's lock.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub score:         u8,
    pub success_count:  u64,
    pub failure_count:  u64,
    pub last_activity:  DateTime<Utc>,
    pub current_rate:   u32,
}

/// Sharded, single-writer-per-identity reputation and rate engine.
pub struct ReputationEngine {
    config: ReputationConfig,
    shards: Vec<Mutex<HashMap<String, IdentityState>>>,
}

impl ReputationEngine {
    #[must_use]
    pub fn new(config: ReputationConfig) -> Self {
        let shard_count = config.shards.max(1);
        let shards = (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect();

        Self { config, shards }
    }

    fn shard_for(&self, identity_did: &str) -> &Mutex<HashMap<String, IdentityState>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        identity_did.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Applies decay toward the neutral score proportional to how long the
    /// identity has been idle, then prunes the sliding window to `now -
    /// rate_limit_window`.
    fn settle(&self, state: &mut IdentityState, now: DateTime<Utc>) {
        let idle = now - state.last_activity;
        let idle_days = idle.num_seconds() as f64 / 86_400.0;
        if idle_days > 0.0 {
            let neutral = f64::from(self.config.neutral_score);
            let decay = f64::from(self.config.decay_rate_percent) / 100.0 * idle_days;
            let current = f64::from(state.score);
            let moved = current + (neutral - current) * decay.min(1.0);
            state.score = moved.round().clamp(0.0, 100.0) as u8;
        }

        let window_start = now - self.config.rate_limit_window;
        state.window.retain(|ts| *ts >= window_start);
    }

    /// Admission contract: deny on window cap, sub-floor spacing, or a score
    /// below the refusal threshold (fixed at the engine's neutral-minus-half
    /// band so a consistently-anomalous identity self-throttles).
    pub fn allow(&self, identity_did: &str, now: DateTime<Utc>) -> Result<Admission, Denial> {
        const REFUSAL_THRESHOLD: u8 = 5;

        let shard = self.shard_for(identity_did);
        let mut shard = shard.lock().expect("reputation shard mutex poisoned");
        let state = shard
            .entry(identity_did.to_owned())
            .or_insert_with(|| IdentityState::new(self.config.neutral_score, now));

        self.settle(state, now);

        if state.score < REFUSAL_THRESHOLD {
            state.anomaly_log.push((now, "denied: score below refusal threshold".into()));
            state.score = state.score.saturating_sub(1);
            return Err(Denial::ScoreTooLow { score: state.score });
        }

        if let Some(last) = state.window.last() {
            if now - *last < self.config.min_interval {
                state.anomaly_log.push((now, "denied: submission too soon after previous".into()));
                state.score = state.score.saturating_sub(1);
                return Err(Denial::TooSoon);
            }
        }

        let current_rate = state.window.len() as u32;
        if current_rate >= self.config.rate_limit_cap {
            state.anomaly_log.push((now, "denied: rate limit window exceeded".into()));
            state.score = state.score.saturating_sub(1);
            return Err(Denial::RateLimited { current_rate });
        }

        state.window.push(now);
        state.last_activity = now;

        Ok(Admission::Allow)
    }

    pub fn record_success(&self, identity_did: &str, now: DateTime<Utc>) {
        let shard = self.shard_for(identity_did);
        let mut shard = shard.lock().expect("reputation shard mutex poisoned");
        let state = shard
            .entry(identity_did.to_owned())
            .or_insert_with(|| IdentityState::new(self.config.neutral_score, now));

        self.settle(state, now);
        state.success_count += 1;
        state.score = state.score.saturating_add(1).min(100);
    }

    pub fn record_failure(&self, identity_did: &str, now: DateTime<Utc>, reason: &str) {
        let shard = self.shard_for(identity_did);
        let mut shard = shard.lock().expect("reputation shard mutex poisoned");
        let state = shard
            .entry(identity_did.to_owned())
            .or_insert_with(|| IdentityState::new(self.config.neutral_score, now));

        self.settle(state, now);
        state.failure_count += 1;
        state.score = state.score.saturating_sub(1);
        state.anomaly_log.push((now, reason.to_owned()));
    }

    #[must_use]
    pub fn snapshot(&self, identity_did: &str, now: DateTime<Utc>) -> Option<Snapshot> {
        let shard = self.shard_for(identity_did);
        let shard = shard.lock().expect("reputation shard mutex poisoned");
        shard.get(identity_did).map(|state| Snapshot {
            score:         state.score,
            success_count: state.success_count,
            failure_count: state.failure_count,
            last_activity: state.last_activity,
            current_rate:  state.window.iter().filter(|ts| **ts >= now - self.config.rate_limit_window).count() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;

    fn engine() -> ReputationEngine {
        ReputationEngine::new(ReputationConfig {
            rate_limit_window: StdDuration::from_secs(60),
            rate_limit_cap: 10,
            min_interval: StdDuration::from_secs(0),
            neutral_score: 50,
            decay_rate_percent: 5,
            decay_interval: StdDuration::from_secs(60),
            shards: 4,
        })
    }

    #[test]
    fn allows_up_to_cap_then_denies() {
        let engine = engine();
        let now = Utc::now();

        for _ in 0..10 {
            assert!(engine.allow("did:pohw:flood", now).is_ok());
        }

        match engine.allow("did:pohw:flood", now) {
            Err(Denial::RateLimited { current_rate }) => assert!(current_rate >= 10),
            other => panic!("expected rate limited, got {other:?}"),
        }
    }

    #[test]
    fn fresh_identity_starts_at_neutral_score() {
        let engine = engine();
        let now = Utc::now();
        engine.allow("did:pohw:u1", now).unwrap();
        let snapshot = engine.snapshot("did:pohw:u1", now).unwrap();
        assert_eq!(snapshot.score, 50);
    }

    #[test]
    fn failures_decrement_score_and_log_anomaly() {
        let engine = engine();
        let now = Utc::now();
        engine.allow("did:pohw:u1", now).unwrap();
        engine.record_failure("did:pohw:u1", now, "bad signature");
        let snapshot = engine.snapshot("did:pohw:u1", now).unwrap();
        assert_eq!(snapshot.score, 49);
    }
}
