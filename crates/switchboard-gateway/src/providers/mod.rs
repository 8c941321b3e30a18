//! Provider abstraction and the concrete vendor adapters.

mod anthropic;
mod google;
mod litellm;
mod ollama;
mod openai;
mod openai_wire;
mod openrouter;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use switchboard_models::{ChatRequest, ChatResponse, ModelCatalog, ModelInfo, StreamChunk};

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use litellm::LiteLlmProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use openrouter::OpenRouterProvider;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::http::build_http_client;
use crate::resilience::{CircuitBreaker, RateLimiter};

/// Stream of uniform chunks; errors travel in-band and terminate the stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Capability set implemented once per vendor.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider identifier, used as the model-ID prefix.
    fn id(&self) -> &str;

    /// Advertised model catalog (served from a TTL cache where the vendor
    /// has a discovery endpoint).
    async fn fetch_catalog(&self) -> Result<ModelCatalog>;

    /// Metadata for a single model.
    async fn model_info(&self, model: &str) -> Result<ModelInfo> {
        let id = qualified_model_id(self.id(), model);
        let catalog = self.fetch_catalog().await?;
        catalog
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::ModelNotFound(id))
    }

    /// Non-streaming completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion. The producer stops when the returned stream is
    /// dropped.
    fn chat_stream(&self, request: ChatRequest) -> ChunkStream;
}

/// Strip this provider's own `provider/` prefix before calling the vendor.
pub(crate) fn strip_provider_prefix<'a>(provider_id: &str, model: &'a str) -> &'a str {
    match model.split_once('/') {
        Some((head, rest)) if head == provider_id => rest,
        _ => model,
    }
}

/// Re-add the `provider/` prefix on synthesized IDs. Vendor IDs that
/// already carry a prefix (aggregator catalogs) are kept as-is.
pub(crate) fn qualified_model_id(provider_id: &str, model: &str) -> String {
    if model.contains('/') {
        model.to_string()
    } else {
        format!("{provider_id}/{model}")
    }
}

pub(crate) const CATALOG_TTL: Duration = Duration::from_secs(300);

/// TTL cache wrapping a provider's catalog fetch.
pub(crate) struct CatalogCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, ModelCatalog)>>,
}

impl CatalogCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> Option<ModelCatalog> {
        let slot = self.slot.lock();
        match slot.as_ref() {
            Some((fetched_at, catalog)) if fetched_at.elapsed() < self.ttl => {
                Some(catalog.clone())
            }
            _ => None,
        }
    }

    pub(crate) fn store(&self, catalog: ModelCatalog) {
        *self.slot.lock() = Some((Instant::now(), catalog));
    }
}

/// Build the configured provider set.
///
/// The set is closed: each enabled entry constructs one known adapter, and
/// a missing required API key fails construction up front.
pub fn build_providers(config: &GatewayConfig) -> Result<HashMap<String, Arc<dyn Provider>>> {
    let client = build_http_client();
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();

    let resilience = |config: &GatewayConfig| {
        (
            Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            Arc::new(RateLimiter::new(config.rate_limit.clone())),
            config.retry.clone(),
        )
    };

    let settings = &config.providers;
    if settings.openrouter.enabled {
        let (breaker, limiter, retry) = resilience(config);
        let provider =
            OpenRouterProvider::new(&settings.openrouter, client.clone(), breaker, limiter, retry)?;
        providers.insert(provider.id().to_string(), Arc::new(provider));
    }
    if settings.openai.enabled {
        let (breaker, limiter, retry) = resilience(config);
        let provider =
            OpenAiProvider::new(&settings.openai, client.clone(), breaker, limiter, retry)?;
        providers.insert(provider.id().to_string(), Arc::new(provider));
    }
    if settings.anthropic.enabled {
        let (breaker, limiter, retry) = resilience(config);
        let provider =
            AnthropicProvider::new(&settings.anthropic, client.clone(), breaker, limiter, retry)?;
        providers.insert(provider.id().to_string(), Arc::new(provider));
    }
    if settings.google.enabled {
        let (breaker, limiter, retry) = resilience(config);
        let provider =
            GoogleProvider::new(&settings.google, client.clone(), breaker, limiter, retry)?;
        providers.insert(provider.id().to_string(), Arc::new(provider));
    }
    if settings.ollama.enabled {
        let (breaker, limiter, retry) = resilience(config);
        let provider = OllamaProvider::new(&settings.ollama, client.clone(), breaker, limiter, retry);
        providers.insert(provider.id().to_string(), Arc::new(provider));
    }
    if settings.litellm.enabled {
        let (breaker, limiter, retry) = resilience(config);
        let provider =
            LiteLlmProvider::new(&settings.litellm, client.clone(), breaker, limiter, retry);
        providers.insert(provider.id().to_string(), Arc::new(provider));
    }

    Ok(providers)
}

pub(crate) fn require_api_key(settings: &crate::config::ProviderSettings, provider: &str) -> Result<String> {
    settings
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| GatewayError::Config(format!("{provider} provider requires an API key")))
}

/// Fail fast on features the text-only adapters cannot serve, rather than
/// silently dropping data.
pub(crate) fn reject_tool_features(provider: &str, request: &ChatRequest) -> Result<()> {
    use switchboard_models::{ContentPart, MessageContent, Role};

    if request.wants_tools() {
        return Err(GatewayError::unsupported(provider, "tool calling"));
    }
    for message in &request.messages {
        if message.role == Role::Tool || message.tool_call_id.is_some() {
            return Err(GatewayError::unsupported(provider, "tool result messages"));
        }
        if message.tool_calls.is_some() {
            return Err(GatewayError::unsupported(provider, "tool calling"));
        }
        if let MessageContent::Parts(parts) = &message.content
            && parts
                .iter()
                .any(|part| matches!(part, ContentPart::ImageUrl { .. }))
        {
            return Err(GatewayError::unsupported(provider, "image content"));
        }
    }
    Ok(())
}
