//! Switchboard gateway: one uniform chat-completion interface over
//! heterogeneous LLM vendors.
//!
//! The [`Manager`] aggregates provider catalogs, routes each request to the
//! adapter owning the model, and surfaces normalized responses. HTTP-backed
//! adapters share a resilience stack (circuit breaker, jittered backoff
//! retries, token-bucket rate limiting), and the [`stream`] module folds
//! incremental chunk sequences back into complete messages.
//!
//! Purely an outbound client: no server, no persistence, no conversation
//! memory.

pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod providers;
pub mod resilience;
pub mod stream;

pub use config::{GatewayConfig, ProviderSettings, ProvidersConfig, RoleModels, RoutingConfig};
pub use error::{GatewayError, Result};
pub use manager::{Manager, RoutingDecision, RoutingHook};
pub use providers::{
    AnthropicProvider, ChunkStream, GoogleProvider, LiteLlmProvider, OllamaProvider,
    OpenAiProvider, OpenRouterProvider, Provider, build_providers,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig, RateLimiter, RetryConfig,
};
pub use stream::{
    AccumulatorPool, SseFramer, StreamAccumulator, filter_tool_call_tokens,
    parse_tool_calls_from_content,
};
