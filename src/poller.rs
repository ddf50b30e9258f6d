//! Poll/delta cache.
//!
//! One background task re-fetches `/trades` on a fixed interval, diffs the ids
//! against the previous cycle and publishes the result. Readers only take the
//! state mutex for the duration of a clone; no reader ever waits on the network.
//!
//! Cycles (background or `trigger_once`) are serialized by an async gate so
//! two fetches never race to replace the known-id set.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PollerConfig, MAX_DURATION_SECONDS};
use crate::graceful_shutdown::{self, ShutdownTx};
use crate::health::PollHealth;
use crate::latest::{normalize_trades, STATUS_BAD_GATEWAY};
use crate::ordering::sort_by_display_time;
use crate::timestamps::utc_now_iso;
use crate::types::NormalizedRecord;
use crate::upstream::{fetch_trades, Upstream, UpstreamError};

/// Point-in-time copy of the cache handed to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollSnapshot {
    pub initialized: bool,
    pub poll_interval_seconds: f64,
    pub last_poll_started: Option<String>,
    pub last_poll_completed: Option<String>,
    pub last_error: Option<String>,
    pub recent_trades: Vec<NormalizedRecord>,
    /// Trades whose id was absent from the previous cycle. Empty until the
    /// second successful cycle.
    pub new_trades: Vec<NormalizedRecord>,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll failed: {0}")]
    Fetch(#[from] UpstreamError),
}

impl PollError {
    pub fn http_status(&self) -> u16 {
        STATUS_BAD_GATEWAY
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PollerSettings {
    pub interval: Duration,
    pub min_wait: Duration,
    pub cache_limit: usize,
    pub stop_timeout: Duration,
}

impl PollerSettings {
    /// Applies the interval floor and cache-limit floor from `cfg`.
    pub fn from_config(cfg: &PollerConfig) -> Self {
        Self {
            interval: seconds(cfg.effective_interval_seconds()),
            min_wait: seconds(cfg.min_wait_seconds),
            cache_limit: cfg.effective_cache_limit(),
            stop_timeout: Duration::from_millis(cfg.stop_timeout_ms),
        }
    }
}

/// Out-of-range input (unvalidated config) is clamped instead of panicking.
fn seconds(v: f64) -> Duration {
    Duration::try_from_secs_f64(v.clamp(0.0, MAX_DURATION_SECONDS)).unwrap_or_default()
}

/// Pause before the next cycle: the rest of the interval, but never less
/// than `min_wait`, so a slow upstream shortens the pause without removing it.
pub fn next_wait(interval: Duration, elapsed: Duration, min_wait: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(min_wait)
}

#[derive(Default)]
struct CacheState {
    initialized: bool,
    known_trade_ids: HashSet<String>,
    recent_trades: Vec<NormalizedRecord>,
    new_trades: Vec<NormalizedRecord>,
    last_poll_started: Option<String>,
    last_poll_completed: Option<String>,
    last_error: Option<String>,
}

struct Inner {
    upstream: Arc<dyn Upstream>,
    settings: PollerSettings,
    state: Mutex<CacheState>,
    cycle_gate: tokio::sync::Mutex<()>,
    health: Arc<PollHealth>,
}

struct Runner {
    shutdown: ShutdownTx,
    handle: JoinHandle<()>,
}

pub struct TradePoller {
    inner: Arc<Inner>,
    runner: Mutex<Option<Runner>>,
}

/// A panic while holding the lock cannot leave `CacheState` half-written
/// (every publish is a single block of assignments), so poisoning is ignored.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl TradePoller {
    pub fn new(upstream: Arc<dyn Upstream>, settings: PollerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                upstream,
                settings,
                state: Mutex::new(CacheState::default()),
                cycle_gate: tokio::sync::Mutex::new(()),
                health: Arc::new(PollHealth::default()),
            }),
            runner: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.inner.settings
    }

    pub fn health(&self) -> Arc<PollHealth> {
        self.inner.health.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.runner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawn the cycle loop on the current tokio runtime. No-op while running.
    pub fn start(&self) {
        let mut runner = lock(&self.runner);
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }
        let (shutdown, rx) = graceful_shutdown::channel();
        let handle = tokio::spawn(run_loop(self.inner.clone(), rx));
        info!(
            interval_s = self.inner.settings.interval.as_secs_f64(),
            cache_limit = self.inner.settings.cache_limit,
            "trade poller started"
        );
        *runner = Some(Runner { shutdown, handle });
    }

    /// Ask the loop to exit and wait up to `stop_timeout` for it. An in-flight
    /// fetch is not interrupted; if it outlives the timeout the task finishes
    /// on its own afterwards.
    pub async fn stop(&self) {
        let runner = lock(&self.runner).take();
        let Some(runner) = runner else {
            return;
        };
        graceful_shutdown::request(&runner.shutdown);
        match tokio::time::timeout(self.inner.settings.stop_timeout, runner.handle).await {
            Ok(Ok(())) => info!("trade poller stopped"),
            Ok(Err(e)) => warn!(error = %e, "trade poller task failed"),
            Err(_) => warn!(
                timeout_ms = self.inner.settings.stop_timeout.as_millis() as u64,
                "trade poller did not stop in time; leaving cycle to finish"
            ),
        }
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.inner.snapshot()
    }

    /// Run one cycle now on the caller's task (explicit refresh). A failed
    /// fetch is returned to the caller; the cache keeps its last good data.
    pub async fn trigger_once(&self) -> Result<PollSnapshot, PollError> {
        run_cycle(&self.inner).await?;
        Ok(self.inner.snapshot())
    }
}

impl Inner {
    /// Diff `summaries` against the previous cycle and replace the whole
    /// cache state under one lock. Returns the new trades.
    fn publish(&self, started_at: String, mut summaries: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
        let incoming_ids: HashSet<String> = summaries.iter().map(|r| r.id.clone()).collect();
        let limit = self.settings.cache_limit.max(1);

        let mut st = lock(&self.state);
        let mut new_trades: Vec<NormalizedRecord> = if st.initialized {
            summaries
                .iter()
                .filter(|r| !st.known_trade_ids.contains(&r.id))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        new_trades.truncate(limit);
        summaries.truncate(limit);

        st.recent_trades = summaries;
        st.new_trades = new_trades.clone();
        st.known_trade_ids = incoming_ids;
        st.initialized = true;
        st.last_poll_started = Some(started_at);
        st.last_poll_completed = Some(utc_now_iso());
        st.last_error = None;
        new_trades
    }

    /// Record a failed cycle; trades and the known-id set stay as they were.
    fn publish_failure(&self, started_at: String, err: &UpstreamError) {
        let mut st = lock(&self.state);
        st.last_poll_started = Some(started_at);
        st.last_poll_completed = Some(utc_now_iso());
        st.last_error = Some(err.to_string());
    }

    fn snapshot(&self) -> PollSnapshot {
        let st = lock(&self.state);
        PollSnapshot {
            initialized: st.initialized,
            poll_interval_seconds: self.settings.interval.as_secs_f64(),
            last_poll_started: st.last_poll_started.clone(),
            last_poll_completed: st.last_poll_completed.clone(),
            last_error: st.last_error.clone(),
            recent_trades: st.recent_trades.clone(),
            new_trades: st.new_trades.clone(),
        }
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: graceful_shutdown::ShutdownRx) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let t0 = Instant::now();
        if let Err(e) = run_cycle(&inner).await {
            warn!(error = %e, "trade poll cycle failed; keeping last good state");
        }

        let wait = next_wait(inner.settings.interval, t0.elapsed(), inner.settings.min_wait);
        debug!(wait_ms = wait.as_millis() as u64, "next poll scheduled");
        tokio::select! {
            _ = graceful_shutdown::requested(&mut shutdown) => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

async fn run_cycle(inner: &Inner) -> Result<(), PollError> {
    let _gate = inner.cycle_gate.lock().await;
    let t0 = Instant::now();
    let started_at = utc_now_iso();

    let raw = match fetch_trades(inner.upstream.as_ref()).await {
        Ok(raw) => raw,
        Err(e) => {
            inner.publish_failure(started_at, &e);
            inner.health.record_failure(t0.elapsed().as_millis() as u64);
            return Err(e.into());
        }
    };

    let mut summaries = normalize_trades(&raw);
    sort_by_display_time(&mut summaries);
    let new_trades = inner.publish(started_at, summaries);

    for t in &new_trades {
        info!(
            id = %t.id,
            model_id = t.model_id.as_deref().unwrap_or(""),
            symbol = t.symbol.as_deref().unwrap_or(""),
            side = t.side.as_deref().unwrap_or(""),
            "new trade"
        );
    }
    let cycle_ms = t0.elapsed().as_millis() as u64;
    inner.health.record_success(new_trades.len(), cycle_ms);
    info!(
        fetched = raw.len(),
        new = new_trades.len(),
        cycle_ms,
        "trade poll cycle complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_is_remaining_interval() {
        let w = next_wait(
            Duration::from_secs(60),
            Duration::from_secs(15),
            Duration::from_secs(1),
        );
        assert_eq!(w, Duration::from_secs(45));
    }

    #[test]
    fn slow_cycle_still_waits_the_floor() {
        let w = next_wait(
            Duration::from_secs(60),
            Duration::from_secs(90),
            Duration::from_secs(1),
        );
        assert_eq!(w, Duration::from_secs(1));
    }

    #[test]
    fn settings_apply_floors() {
        let cfg = PollerConfig {
            interval_seconds: 1.0,
            cache_limit: 0,
            ..PollerConfig::default()
        };
        let s = PollerSettings::from_config(&cfg);
        assert_eq!(s.interval, Duration::from_secs(10));
        assert_eq!(s.cache_limit, 1);
        assert_eq!(s.min_wait, Duration::from_secs(1));
    }

    #[test]
    fn unvalidated_huge_or_negative_durations_are_clamped() {
        let cfg = PollerConfig {
            interval_seconds: 1e20,
            min_wait_seconds: -3.0,
            ..PollerConfig::default()
        };
        let s = PollerSettings::from_config(&cfg);
        assert_eq!(s.interval, Duration::from_secs(u32::MAX as u64));
        assert_eq!(s.min_wait, Duration::ZERO);
    }
}
