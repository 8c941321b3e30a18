//! OpenRouter aggregator adapter.
//!
//! An API proxy exposing many vendors through one OpenAI-compatible
//! endpoint. Its catalog is the richest in the fleet: context windows,
//! per-token pricing, modalities and supported parameters.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use switchboard_models::{ChatRequest, ChatResponse, ModelCatalog};

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::providers::openai_wire::CompatEndpoint;
use crate::providers::{
    CATALOG_TTL, CatalogCache, ChunkStream, Provider, require_api_key, strip_provider_prefix,
};
use crate::resilience::{CircuitBreaker, RateLimiter, RetryConfig};

const PROVIDER_ID: &str = "openrouter";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterProvider {
    endpoint: CompatEndpoint,
    catalog: CatalogCache,
}

impl OpenRouterProvider {
    pub fn new(
        settings: &ProviderSettings,
        client: Client,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> Result<Self> {
        let api_key = require_api_key(settings, PROVIDER_ID)?;

        let mut extra_headers = Vec::new();
        if let Some(referer) = &settings.referer {
            extra_headers.push(("HTTP-Referer".to_string(), referer.clone()));
        }
        if let Some(title) = &settings.app_title {
            extra_headers.push(("X-Title".to_string(), title.clone()));
        }

        Ok(Self {
            endpoint: CompatEndpoint {
                provider: PROVIDER_ID.to_string(),
                client,
                base_url: settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                api_key: Some(api_key),
                extra_headers,
                breaker,
                limiter,
                retry,
            },
            catalog: CatalogCache::new(CATALOG_TTL),
        })
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch_catalog(&self) -> Result<ModelCatalog> {
        if let Some(cached) = self.catalog.get() {
            return Ok(cached);
        }
        // Aggregator model IDs already carry a vendor prefix and are kept
        // verbatim.
        let models = self.endpoint.list_models().await?;
        let catalog = ModelCatalog::new(
            models
                .into_iter()
                .map(|model| model.into_model_info(PROVIDER_ID))
                .collect(),
        );
        self.catalog.store(catalog.clone());
        Ok(catalog)
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let model = strip_provider_prefix(PROVIDER_ID, &request.model).to_string();
        self.endpoint.chat(&request, &model).await
    }

    fn chat_stream(&self, request: ChatRequest) -> ChunkStream {
        let model = strip_provider_prefix(PROVIDER_ID, &request.model).to_string();
        self.endpoint.chat_stream(&request, &model)
    }
}
