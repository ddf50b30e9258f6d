use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;

pub const ENV_BASE_URL: &str = "NOF1_BASE_URL";
pub const ENV_TRADE_LIMIT: &str = "TRADE_DISPLAY_LIMIT";
pub const ENV_POSITION_LIMIT: &str = "POSITION_DISPLAY_LIMIT";
pub const ENV_POLL_INTERVAL: &str = "TRADE_POLL_INTERVAL_SECONDS";
pub const ENV_CACHE_LIMIT: &str = "TRADE_CACHE_LIMIT";

/// Upper bound for any poller duration in seconds (about 136 years).
pub const MAX_DURATION_SECONDS: f64 = u32::MAX as f64;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub poller: PollerConfig,
}

impl Config {
    /// Read `path` if it exists (defaults otherwise), then apply environment
    /// overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut cfg: Config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?
        } else {
            Config::default()
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Environment-style overrides. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup(ENV_BASE_URL) {
            self.upstream.base_url = v;
        }
        if let Some(v) = lookup(ENV_TRADE_LIMIT) {
            self.display.trade_limit = parse_env(ENV_TRADE_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_POSITION_LIMIT) {
            self.display.position_limit = parse_env(ENV_POSITION_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_POLL_INTERVAL) {
            self.poller.interval_seconds = parse_env(ENV_POLL_INTERVAL, &v)?;
        }
        if let Some(v) = lookup(ENV_CACHE_LIMIT) {
            self.poller.cache_limit = parse_env(ENV_CACHE_LIMIT, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            anyhow::bail!("invalid upstream.base_url (must be non-empty)");
        }
        if self.upstream.http_timeout_ms == 0 {
            anyhow::bail!("invalid upstream.http_timeout_ms=0 (must be > 0)");
        }
        if self.upstream.http_connect_timeout_ms == 0 {
            anyhow::bail!("invalid upstream.http_connect_timeout_ms=0 (must be > 0)");
        }
        check_seconds("poller.interval_seconds", self.poller.interval_seconds, false)?;
        check_seconds("poller.min_interval_seconds", self.poller.min_interval_seconds, true)?;
        check_seconds("poller.min_wait_seconds", self.poller.min_wait_seconds, true)?;
        Ok(())
    }
}

fn check_seconds(name: &str, v: f64, positive: bool) -> anyhow::Result<()> {
    if !v.is_finite() || v > MAX_DURATION_SECONDS {
        anyhow::bail!("invalid {name} (must be finite and <= {MAX_DURATION_SECONDS}), got {v}");
    }
    if positive && v <= 0.0 {
        anyhow::bail!("invalid {name} (must be > 0), got {v}");
    }
    Ok(())
}

fn parse_env<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("parse env {key}={raw:?}"))
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default timeout applied to all HTTP requests (ms).
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// TCP connect timeout for HTTP requests (ms).
    #[serde(default = "default_http_connect_timeout_ms")]
    pub http_connect_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            http_timeout_ms: default_http_timeout_ms(),
            http_connect_timeout_ms: default_http_connect_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://nof1.ai/api".to_string()
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_http_connect_timeout_ms() -> u64 {
    5_000
}

fn default_user_agent() -> String {
    concat!("arena-ticker/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct DisplayConfig {
    /// Closed trades returned by the one-shot read path.
    #[serde(default = "default_trade_limit")]
    pub trade_limit: usize,
    /// Open positions returned by the one-shot read path.
    #[serde(default = "default_position_limit")]
    pub position_limit: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            trade_limit: default_trade_limit(),
            position_limit: default_position_limit(),
        }
    }
}

impl DisplayConfig {
    pub fn effective_trade_limit(&self) -> usize {
        self.trade_limit.max(1)
    }

    pub fn effective_position_limit(&self) -> usize {
        self.position_limit.max(1)
    }
}

fn default_trade_limit() -> usize {
    60
}

fn default_position_limit() -> usize {
    100
}

#[derive(Clone, Debug, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,
    /// Most recent trades kept in the cache (and cap on new trades per cycle).
    #[serde(default = "default_cache_limit")]
    pub cache_limit: usize,
    /// Floor applied to `interval_seconds`.
    #[serde(default = "default_min_interval_seconds")]
    pub min_interval_seconds: f64,
    /// Shortest pause between cycles, even when a cycle overran the interval.
    #[serde(default = "default_min_wait_seconds")]
    pub min_wait_seconds: f64,
    /// How long `stop()` waits for an in-flight cycle.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Heartbeat log period in the main binary; `0` disables it.
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            cache_limit: default_cache_limit(),
            min_interval_seconds: default_min_interval_seconds(),
            min_wait_seconds: default_min_wait_seconds(),
            stop_timeout_ms: default_stop_timeout_ms(),
            heartbeat_seconds: default_heartbeat_seconds(),
        }
    }
}

impl PollerConfig {
    pub fn effective_interval_seconds(&self) -> f64 {
        self.interval_seconds.max(self.min_interval_seconds)
    }

    pub fn effective_cache_limit(&self) -> usize {
        self.cache_limit.max(1)
    }
}

fn default_interval_seconds() -> f64 {
    60.0
}

fn default_cache_limit() -> usize {
    50
}

fn default_min_interval_seconds() -> f64 {
    10.0
}

fn default_min_wait_seconds() -> f64 {
    1.0
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_seconds() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.upstream.base_url, "https://nof1.ai/api");
        assert_eq!(cfg.display.trade_limit, 60);
        assert_eq!(cfg.poller.cache_limit, 50);
        assert_eq!(cfg.poller.effective_interval_seconds(), 60.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [poller]
            interval_seconds = 2.5
            cache_limit = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.poller.effective_interval_seconds(), 10.0);
        assert_eq!(cfg.poller.effective_cache_limit(), 1);
        assert_eq!(cfg.poller.stop_timeout_ms, 5_000);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://localhost:9000/api/"),
            (ENV_TRADE_LIMIT, "25"),
            (ENV_POLL_INTERVAL, "30"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.upstream.base_url, "http://localhost:9000/api/");
        assert_eq!(cfg.display.trade_limit, 25);
        assert_eq!(cfg.poller.interval_seconds, 30.0);
        assert_eq!(cfg.display.position_limit, 100);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|k| (k == ENV_CACHE_LIMIT).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CACHE_LIMIT));
    }

    #[test]
    fn validate_rejects_empty_base_and_zero_timeout() {
        let mut cfg = Config::default();
        cfg.upstream.base_url = " ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.upstream.http_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_durations() {
        let mut cfg = Config::default();
        cfg.apply_env(|k| (k == ENV_POLL_INTERVAL).then(|| "1e20".to_string()))
            .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("poller.interval_seconds"));

        let mut cfg = Config::default();
        cfg.poller.min_wait_seconds = 1e30;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.poller.min_interval_seconds = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.poller.interval_seconds = MAX_DURATION_SECONDS;
        cfg.validate().unwrap();
    }
}
