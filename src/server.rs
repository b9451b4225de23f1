use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::client_identifier::ClientIdentifier;
use crate::config::{Config, StoreBackend};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::handlers::{check_rate_limit, current_config, health_check, stats, AppState, SharedState};
use crate::middleware::{cors_layer, logging_middleware, request_id_middleware};
use crate::rate_limiter::{now_millis, RateLimitEngine};
use crate::response::ServerSection;
use crate::store::{InMemoryStore, RedisStore, SlidingWindowStore};

/// Build the router around already-constructed state.
pub fn create_app(state: SharedState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/check", post(check_rate_limit))
        .route("/health", get(health_check))
        .route("/admin/stats", get(stats))
        .route("/admin/config", get(current_config))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(logging_middleware))
                .layer(CatchPanicLayer::new())
                .layer(cors_layer())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    sweeper: Option<JoinHandle<()>>,
}

impl Server {
    /// Connect to the configured store, register the rate limit procedure and
    /// assemble the HTTP application.
    pub async fn new(config: Config) -> ThrottlerResult<Self> {
        let (store, memory): (Arc<dyn SlidingWindowStore>, Option<InMemoryStore>) =
            match config.store_backend {
                StoreBackend::Redis => {
                    let store =
                        RedisStore::connect(&config.redis_connection_url(), &config.redis_key_prefix)
                            .await?;
                    (Arc::new(store), None)
                }
                StoreBackend::Memory => {
                    warn!("using in-memory store; limits are not shared between instances");
                    let store = InMemoryStore::new();
                    (Arc::new(store.clone()), Some(store))
                }
            };

        let engine = Arc::new(RateLimitEngine::connect(store, config.store_timeout()).await?);
        let policy = config.quota_policy()?;

        // Spawned after every fallible step above.
        let sweeper = memory.map(|store| spawn_sweeper(store, config.cleanup_interval()));

        info!(
            store = engine.store().backend_name(),
            default_limit = policy.default_quota.limit,
            default_window = ?policy.default_quota.window,
            overrides = policy.overrides.len(),
            "rate limit engine ready"
        );

        let state = Arc::new(AppState::new(
            engine,
            ClientIdentifier::new(config.forwarded_hop()),
            policy,
            config.region.clone(),
            ServerSection {
                bind_addr: config.bind_addr.to_string(),
                region: config.region.clone(),
                request_timeout: config.request_timeout(),
            },
        ));

        Ok(Self {
            app: create_app(state, config.request_timeout()),
            bind_addr: config.bind_addr,
            sweeper,
        })
    }

    pub async fn run(self) -> ThrottlerResult<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| ThrottlerError::InternalError(format!("Failed to bind {}: {}", self.bind_addr, e)))?;

        info!("Rate limit server listening on {}", self.bind_addr);
        info!("Health check available at /health");

        let result = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ThrottlerError::InternalError(format!("Server error: {}", e)));

        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
        info!("Server stopped, store connection released");

        result
    }
}

/// Periodically drop idle keys from the in-memory store, standing in for
/// Redis key expiry.
fn spawn_sweeper(store: InMemoryStore, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.sweep_expired(now_millis()) {
                Ok(removed) => debug!(removed, "in-memory sweep finished"),
                Err(e) => warn!(error = %e, "in-memory sweep failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
