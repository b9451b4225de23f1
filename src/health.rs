use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::rate_limiter::RateLimitEngine;
use crate::response::HealthResponse;

/// Reports whether the shared store answers within the engine's timeout.
#[derive(Clone)]
pub struct HealthChecker {
    engine: Arc<RateLimitEngine>,
}

impl HealthChecker {
    pub fn new(engine: Arc<RateLimitEngine>) -> Self {
        Self { engine }
    }

    pub async fn check_health(&self) -> HealthResponse {
        let backend = self.engine.store().backend_name();
        let started = Instant::now();

        match self.engine.ping().await {
            Ok(()) => HealthResponse::healthy(backend),
            Err(e) => {
                warn!(
                    backend,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "store health check failed"
                );
                HealthResponse::unhealthy(backend)
            }
        }
    }
}
