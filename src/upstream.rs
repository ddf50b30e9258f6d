//! Arena REST API access.
//!
//! The `Upstream` trait is the only seam that touches the network; the
//! normalizer, reconciliation and poller all take `&dyn Upstream` so tests can
//! script responses.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::UpstreamConfig;

pub const PATH_TRADES: &str = "/trades";
pub const PATH_POSITIONS: &str = "/positions";
pub const PATH_ACCOUNT_TOTALS: &str = "/account-totals";

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// DNS, connect, TLS or timeout failure; no HTTP response was read.
    #[error("failed to reach {url}: {message}")]
    Transport { url: String, message: String },
    /// Upstream answered with a non-2xx status.
    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },
    /// Body was not JSON, or not the shape we expect.
    #[error("unexpected payload from {url}: {message}")]
    Schema { url: String, message: String },
}

impl UpstreamError {
    pub fn schema(url: &str, message: impl Into<String>) -> Self {
        Self::Schema {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// GET `path` (relative to the API base, may carry a query string) and
    /// decode the body as JSON.
    async fn get_json(&self, path: &str) -> UpstreamResult<Value>;
}

pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(cfg: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_millis(cfg.http_connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn get_json(&self, path: &str) -> UpstreamResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Http {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|e| UpstreamError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::schema(&url, e.to_string()))
    }
}

/// `{"trades": [...]}`; anything else is a schema error.
pub fn extract_trades(payload: Value, url: &str) -> UpstreamResult<Vec<Value>> {
    match payload {
        Value::Object(mut obj) => match obj.remove("trades") {
            Some(Value::Array(list)) => Ok(list),
            _ => Err(UpstreamError::schema(url, "missing trades list")),
        },
        _ => Err(UpstreamError::schema(url, "trades payload is not an object")),
    }
}

/// `{"positions": [...]}`, `{"data": [...]}` or a bare list.
pub fn extract_positions(payload: Value, url: &str) -> UpstreamResult<Vec<Value>> {
    match payload {
        Value::Array(list) => Ok(list),
        Value::Object(mut obj) => {
            for key in ["positions", "data"] {
                if let Some(Value::Array(list)) = obj.remove(key) {
                    return Ok(list);
                }
            }
            Err(UpstreamError::schema(url, "missing positions list"))
        }
        _ => Err(UpstreamError::schema(url, "positions payload is not a list")),
    }
}

/// `{"accountTotals": [...]}` or `{"accounts": [...]}`.
pub fn extract_accounts(payload: Value, url: &str) -> UpstreamResult<Vec<Value>> {
    let Value::Object(mut obj) = payload else {
        return Err(UpstreamError::schema(url, "account totals payload is not an object"));
    };
    for key in ["accountTotals", "accounts"] {
        if let Some(Value::Array(list)) = obj.remove(key) {
            return Ok(list);
        }
    }
    Err(UpstreamError::schema(url, "missing accountTotals list"))
}

pub async fn fetch_trades(upstream: &dyn Upstream) -> UpstreamResult<Vec<Value>> {
    let payload = upstream.get_json(PATH_TRADES).await?;
    extract_trades(payload, PATH_TRADES)
}

pub async fn fetch_positions(upstream: &dyn Upstream, path: &str) -> UpstreamResult<Vec<Value>> {
    let payload = upstream.get_json(path).await?;
    extract_positions(payload, path)
}

pub async fn fetch_account_totals(upstream: &dyn Upstream) -> UpstreamResult<Vec<Value>> {
    let payload = upstream.get_json(PATH_ACCOUNT_TOTALS).await?;
    extract_accounts(payload, PATH_ACCOUNT_TOTALS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trades_shape() {
        assert_eq!(extract_trades(json!({"trades": [1, 2]}), "/t").unwrap().len(), 2);
        assert!(matches!(
            extract_trades(json!({"data": []}), "/t"),
            Err(UpstreamError::Schema { .. })
        ));
        assert!(extract_trades(json!([1]), "/t").is_err());
    }

    #[test]
    fn positions_accept_three_shapes() {
        assert_eq!(extract_positions(json!({"positions": [1]}), "/p").unwrap().len(), 1);
        assert_eq!(extract_positions(json!({"data": [1, 2]}), "/p").unwrap().len(), 2);
        assert_eq!(extract_positions(json!([1, 2, 3]), "/p").unwrap().len(), 3);
        assert!(extract_positions(json!({"positions": {}}), "/p").is_err());
        assert!(extract_positions(json!("x"), "/p").is_err());
    }

    #[test]
    fn account_keys() {
        assert_eq!(extract_accounts(json!({"accountTotals": [{}]}), "/a").unwrap().len(), 1);
        assert_eq!(extract_accounts(json!({"accounts": []}), "/a").unwrap().len(), 0);
        assert!(extract_accounts(json!([]), "/a").is_err());
    }

    #[test]
    fn error_messages_name_the_url() {
        let e = UpstreamError::Http {
            url: "https://x/trades".to_string(),
            status: 503,
        };
        assert_eq!(e.to_string(), "HTTP 503 for https://x/trades");
    }
}
