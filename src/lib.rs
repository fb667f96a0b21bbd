pub mod admission;
pub mod backends;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod constraints;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod mail;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod sanitizer;
pub mod server;
pub mod submission;
pub mod validation;

pub use admission::{Admission, AdmissionGate, AdmissionStage, RateSettings, Rejection};
pub use config::Config;
pub use constraints::{ConstraintSet, InputRule, PhoneMode};
pub use error::{GatewayError, GatewayResult};
pub use rate_limiter::{Decision, RateLimiter};
pub use server::create_app;
pub use validation::{ConstraintValidator, ValidationFailure};
