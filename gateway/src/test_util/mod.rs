pub mod scripted_backend;

pub use scripted_backend::{ndjson, Script, ScriptedBackend};

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::access_log::AccessLog;
use crate::config::{AccessLogConfig, BackendConfig, Config, HealthConfig, RateLimitConfig};
use crate::AppState;

/// Config for tests: no rate limit, no access log, short probe timings.
pub fn test_config(backends: Vec<BackendConfig>) -> Config {
    Config {
        backends,
        health: HealthConfig {
            interval_secs: 1,
            timeout_secs: 1,
        },
        access_log: AccessLogConfig {
            enabled: false,
            ..AccessLogConfig::default()
        },
        rate_limit: RateLimitConfig { per_minute: 0 },
        ..Config::default()
    }
}

pub fn create_test_state(backends: Vec<BackendConfig>) -> Arc<AppState> {
    Arc::new(AppState::new(test_config(backends), AccessLog::disabled()))
}

/// Backend entry pointing at a mock server URI such as `http://127.0.0.1:4321`.
pub fn backend_from_uri(name: &str, uri: &str) -> BackendConfig {
    let authority = uri
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let (host, port) = authority
        .rsplit_once(':')
        .expect("mock server URI has no port");
    BackendConfig::new(name, host, port.parse().expect("invalid port in mock server URI"))
}

/// Backend entry for an address nobody listens on.
pub async fn refused_backend(name: &str) -> BackendConfig {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind probe port");
    let addr = listener.local_addr().expect("listener has no address");
    drop(listener);
    BackendConfig::new(name, &addr.ip().to_string(), addr.port())
}
