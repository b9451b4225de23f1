pub mod client_identifier;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;

pub use client_identifier::{ClientIdentifier, RateLimitKey, RequestSignals};
pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use rate_limiter::{Decision, RateLimitEngine};
pub use response::{DecisionResponseBuilder, RateLimitResponse};
pub use server::create_app;
pub use store::{InMemoryStore, RedisStore, SlidingWindowStore};
