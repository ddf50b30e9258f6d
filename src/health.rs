use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::graceful_shutdown::{self, ShutdownRx};
use crate::types::now_ms;

/// Lock-free poller counters, readable without touching the cache lock.
#[derive(Default)]
pub struct PollHealth {
    cycles_ok: AtomicU64,
    cycles_failed: AtomicU64,
    new_trades_total: AtomicU64,
    last_cycle_ms: AtomicU64,
    last_success_ms: AtomicU64,
}

impl PollHealth {
    pub fn record_success(&self, new_trades: usize, cycle_ms: u64) {
        self.cycles_ok.fetch_add(1, Ordering::Relaxed);
        self.new_trades_total
            .fetch_add(new_trades as u64, Ordering::Relaxed);
        self.last_cycle_ms.store(cycle_ms, Ordering::Relaxed);
        self.last_success_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_failure(&self, cycle_ms: u64) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_ms.store(cycle_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            ts_ms: now_ms(),
            cycles_ok: self.cycles_ok.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            new_trades_total: self.new_trades_total.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            last_success_ms: self.last_success_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub ts_ms: u64,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub new_trades_total: u64,
    pub last_cycle_ms: u64,
    /// Wall-clock ms of the last successful cycle; `0` before the first.
    pub last_success_ms: u64,
}

/// Log a heartbeat line every `period` until shutdown is requested or the
/// sender is dropped.
pub fn spawn_heartbeat(
    health: Arc<PollHealth>,
    period: Duration,
    mut shutdown: ShutdownRx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        // The first tick fires immediately; skip it so the first line has data.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = graceful_shutdown::requested(&mut shutdown) => break,
                _ = tick.tick() => {
                    let snap = health.snapshot();
                    info!(
                        cycles_ok = snap.cycles_ok,
                        cycles_failed = snap.cycles_failed,
                        new_trades_total = snap.new_trades_total,
                        last_cycle_ms = snap.last_cycle_ms,
                        last_success_ms = snap.last_success_ms,
                        "poller heartbeat"
                    );
                }
            }
        }
    })
}
