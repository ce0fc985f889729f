pub mod access_log;
pub mod balancer;
pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod routes;
pub mod test_util;

pub use access_log::{AccessLog, AccessRecord};
pub use balancer::{BalancedRouter, HealthProber, Registry};
pub use config::Config;
pub use error::GatewayError;

use std::sync::Arc;

use axum::{http::HeaderValue, middleware, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::balancer::BackendClient;
use crate::config::CorsConfig;
use crate::rate_limit::ClientRateLimiter;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Backend pool, shared with the router and the prober.
    pub registry: Arc<Registry>,
    pub router: BalancedRouter,
    pub access_log: AccessLog,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<ClientRateLimiter>,
}

impl AppState {
    pub fn new(config: Config, access_log: AccessLog) -> Self {
        let registry = Arc::new(Registry::new(&config.backends));
        let client = BackendClient::new(config.balancer.generate_timeout(), config.health.timeout());
        let router = BalancedRouter::new(
            Arc::clone(&registry),
            client,
            config.balancer.max_attempts,
        );
        let rate_limiter = ClientRateLimiter::per_minute(config.rate_limit.per_minute);

        Self {
            config,
            registry,
            router,
            access_log,
            rate_limiter,
        }
    }

    /// Health prober over this state's registry.
    pub fn prober(&self) -> HealthProber {
        HealthProber::new(
            Arc::clone(&self.registry),
            self.router.client().clone(),
            self.config.health.interval(),
        )
    }
}

/// Build the HTTP application: all routes plus the shared middleware stack.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .merge(routes::generate::router(state.clone()))
        .merge(routes::health::router(state.clone()))
        .merge(routes::servers::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.origins.trim() == "*" {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
