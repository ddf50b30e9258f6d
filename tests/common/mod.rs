#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use arena_ticker::upstream::{Upstream, UpstreamError, UpstreamResult};
use async_trait::async_trait;
use serde_json::{json, Value};

/// In-memory upstream: each path plays back a queue of responses, and the
/// last response of a queue repeats forever. Unknown paths fail with a 404.
#[derive(Default)]
pub struct ScriptedUpstream {
    routes: Mutex<HashMap<String, VecDeque<UpstreamResult<Value>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, path: &str, resp: UpstreamResult<Value>) -> Self {
        self.push(path, resp);
        self
    }

    pub fn push(&self, path: &str, resp: UpstreamResult<Value>) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(resp);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn get_json(&self, path: &str) -> UpstreamResult<Value> {
        self.calls.lock().unwrap().push(path.to_string());
        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(path) else {
            return Err(http_error(path, 404));
        };
        if queue.len() > 1 {
            return queue.pop_front().unwrap();
        }
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| Err(http_error(path, 404)))
    }
}

pub fn http_error(path: &str, status: u16) -> UpstreamError {
    UpstreamError::Http {
        url: format!("https://arena.test/api{path}"),
        status,
    }
}

pub fn transport_error(path: &str) -> UpstreamError {
    UpstreamError::Transport {
        url: format!("https://arena.test/api{path}"),
        message: "connection refused".to_string(),
    }
}

pub fn trade(id: &str, model: &str, symbol: &str, exit_time: u64) -> Value {
    json!({
        "id": id,
        "model_id": model,
        "symbol": symbol,
        "side": "long",
        "leverage": 10,
        "entry_time": exit_time - 3_600,
        "exit_time": exit_time,
        "entry_price": "100.0",
        "exit_price": 101.5,
        "realized_net_pnl": 12.25,
    })
}

pub fn trades_payload(trades: Vec<Value>) -> Value {
    json!({ "trades": trades })
}
