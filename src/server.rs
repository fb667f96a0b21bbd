use crate::admission::AdmissionGate;
use crate::backends::{BackendKind, FileBackend, MemoryBackend, RateBackend, RedisBackend};
use crate::config::Config;
use crate::constraints::ConstraintSet;
use crate::error::GatewayError;
use crate::handlers::{health_check, metrics, submit_form, AppState};
use crate::health::HealthChecker;
use crate::key_generator::KeyGenerator;
use crate::mail::Mailer;
use crate::metrics::AdmissionMetrics;
use crate::middleware::logging_middleware;
use crate::rate_limiter::RateLimiter;
use crate::validation::ConstraintValidator;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Open the configured rate-limit store.
pub fn build_backend(config: &Config) -> Result<Arc<dyn RateBackend>, GatewayError> {
    let backend: Arc<dyn RateBackend> = match config.rate_backend {
        BackendKind::Redis => Arc::new(
            RedisBackend::new(&config.redis_url, config.backend_timeout())
                .map_err(|e| GatewayError::Configuration(format!("redis backend: {}", e)))?,
        ),
        BackendKind::File => Arc::new(
            FileBackend::new(&config.rate_limit_dir)
                .map_err(|e| GatewayError::Configuration(format!("file backend: {}", e)))?
                .with_lock_timeout(config.backend_timeout()),
        ),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    Ok(backend)
}

/// Wire limiter, validator, metrics and mailer into handler state.
pub fn build_state(
    config: &Config,
    constraints: ConstraintSet,
    mailer: Arc<dyn Mailer>,
) -> Result<AppState, GatewayError> {
    let metrics = Arc::new(AdmissionMetrics::new());
    let limiter = RateLimiter::new(build_backend(config)?)
        .with_diagnostics(metrics.clone())
        .with_timeout(config.backend_timeout());

    let gate = AdmissionGate::new(
        limiter.clone(),
        ConstraintValidator::new(constraints),
        config.rate_settings(),
    );

    Ok(AppState {
        gate: Arc::new(gate),
        mailer,
        keys: KeyGenerator::default(),
        envelope: config.envelope(),
        metrics,
        health: Arc::new(HealthChecker::new(limiter)),
    })
}

pub fn router(state: AppState, endpoint_path: &str) -> Router {
    Router::new()
        .route(endpoint_path, post(submit_form))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

/// Create the application router from configuration.
pub fn create_app(
    config: &Config,
    constraints: ConstraintSet,
    mailer: Arc<dyn Mailer>,
) -> Result<Router, GatewayError> {
    let state = build_state(config, constraints, mailer)?;
    Ok(router(state, &config.endpoint_path))
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    limiter: RateLimiter,
    window_secs: u64,
    cleanup_interval: Duration,
}

impl Server {
    pub fn new(
        config: &Config,
        constraints: ConstraintSet,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, GatewayError> {
        let state = build_state(config, constraints, mailer)?;
        let limiter = state.gate.limiter().clone();

        Ok(Self {
            app: router(state, &config.endpoint_path),
            bind_addr: config.bind_addr,
            limiter,
            window_secs: config.rate_window_secs,
            cleanup_interval: config.cleanup_interval(),
        })
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!(
            addr = %self.bind_addr,
            backend = %self.limiter.backend_kind(),
            "formgate server starting"
        );
        tracing::info!("Health check available at /health");

        let purge = spawn_purge_task(self.limiter, self.window_secs, self.cleanup_interval);

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        purge.abort();
        served
    }
}

/// Periodically drop expired rate windows.
pub fn spawn_purge_task(limiter: RateLimiter, window_secs: u64, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.purge_expired(window_secs).await;
            if removed > 0 {
                tracing::debug!(removed, backend = %limiter.backend_kind(), "purged expired rate windows");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
