//! Resilience primitives shared by the HTTP-backed providers: circuit
//! breaker, retry-with-backoff executor, and token-bucket rate limiting.
//!
//! Composition per call: rate-limiter wait, then the circuit-breaker gate,
//! then the HTTP attempt with backoff retries inside. The breaker wraps the
//! whole retry loop, so an exhausted retry sequence counts as a single
//! breaker-visible failure.

mod breaker;
mod ratelimit;
mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, api_error_from_response, send_idempotent, with_retries};
