use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use incident_relay::{build_state, AppConfig, AppState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Pattern admitting the loopback stub upstreams used in tests.
#[allow(dead_code)]
pub const LOCAL_PATTERN: &str = r"^http://127\.0\.0\.1:\d+/.+";

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// A stub automation webhook answering every POST with a fixed status and
/// body, remembering the last JSON payload it received.
#[allow(dead_code)]
pub struct StubUpstream {
    pub url: String,
    pub received: Arc<Mutex<Option<serde_json::Value>>>,
    _handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl StubUpstream {
    pub async fn start(status: u16, body: &str) -> Self {
        let received = Arc::new(Mutex::new(None));
        let seen = received.clone();
        let reply = body.to_string();
        let status = StatusCode::from_u16(status).unwrap();
        let app = Router::new().route(
            "/hook",
            post(move |Json(v): Json<serde_json::Value>| {
                let seen = seen.clone();
                let reply = reply.clone();
                async move {
                    *seen.lock().unwrap() = Some(v);
                    (status, reply)
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{}/hook", addr),
            received,
            _handle: handle,
        }
    }

    pub fn last_payload(&self) -> Option<serde_json::Value> {
        self.received.lock().unwrap().clone()
    }
}

/// Config accepting loopback webhooks, with nothing configured yet.
#[allow(dead_code)]
pub fn local_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.webhooks.url_pattern = LOCAL_PATTERN.to_string();
    cfg.upstream_timeout_ms = 2_000;
    cfg
}

#[allow(dead_code)]
pub fn state_with(cfg: AppConfig) -> AppState {
    build_state(cfg).expect("valid test configuration")
}
