//! Routing, catalog aggregation and role-model repair.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use switchboard_models::{ChatRequest, ChatResponse, ModelInfo, ModelPricing, Usage};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{GatewayConfig, RoleModels, RoutingConfig};
use crate::error::{GatewayError, Result};
use crate::providers::{ChunkStream, Provider, build_providers, strip_provider_prefix};

/// Mutable routing context folded through the registered hooks.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub requested_model: String,
    pub selected_model: String,
    pub reason: String,
    pub context: HashMap<String, String>,
}

impl RoutingDecision {
    fn new(requested_model: &str) -> Self {
        Self {
            requested_model: requested_model.to_string(),
            selected_model: requested_model.to_string(),
            reason: "requested".to_string(),
            context: HashMap::new(),
        }
    }
}

/// External routing policy. Applied in registration order; returning `None`
/// leaves the decision unchanged.
pub type RoutingHook = Box<dyn Fn(&RoutingDecision) -> Option<RoutingDecision> + Send + Sync>;

#[derive(Default)]
struct CatalogIndex {
    models: HashMap<String, ModelInfo>,
    /// Provider ID to its sorted model IDs.
    by_provider: HashMap<String, Vec<String>>,
    /// Model ID to owning provider. Catalogs are disjoint by prefix in
    /// practice; on collision the last writer wins (undefined precedence).
    owner: HashMap<String, String>,
}

/// Aggregates provider catalogs and dispatches requests to the owning
/// adapter.
///
/// The catalog index is built during [`initialize`](Manager::initialize)
/// and swapped in as one immutable snapshot; request-serving tasks only
/// ever read a snapshot, so a later refresh cannot race them.
pub struct Manager {
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Provider IDs in stable sorted order.
    provider_order: Vec<String>,
    routing: RoutingConfig,
    roles: RwLock<RoleModels>,
    index: RwLock<Arc<CatalogIndex>>,
    hooks: Vec<RoutingHook>,
}

impl Manager {
    pub fn new(
        providers: HashMap<String, Arc<dyn Provider>>,
        routing: RoutingConfig,
        roles: RoleModels,
    ) -> Self {
        let mut provider_order: Vec<String> = providers.keys().cloned().collect();
        provider_order.sort();
        Self {
            providers,
            provider_order,
            routing,
            roles: RwLock::new(roles),
            index: RwLock::new(Arc::new(CatalogIndex::default())),
            hooks: Vec::new(),
        }
    }

    /// Construct the configured provider set and wrap it in a manager.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let providers = build_providers(config)?;
        Ok(Self::new(
            providers,
            config.routing.clone(),
            config.roles.clone(),
        ))
    }

    /// Register a routing hook. Hooks run in registration order before
    /// every dispatch.
    pub fn add_routing_hook(&mut self, hook: RoutingHook) {
        self.hooks.push(hook);
    }

    /// Fetch every provider's catalog concurrently, aggregate the union,
    /// and repair the configured role models.
    ///
    /// Any provider failure fails initialization entirely; no partial
    /// catalog is accepted.
    pub async fn initialize(&self) -> Result<()> {
        let mut tasks = JoinSet::new();
        for (id, provider) in &self.providers {
            let id = id.clone();
            let provider = provider.clone();
            tasks.spawn(async move { (id, provider.fetch_catalog().await) });
        }

        let mut index = CatalogIndex::default();
        for id in &self.provider_order {
            index.by_provider.insert(id.clone(), Vec::new());
        }
        while let Some(joined) = tasks.join_next().await {
            let (id, fetched) = joined
                .map_err(|err| GatewayError::Config(format!("catalog fetch task failed: {err}")))?;
            let catalog = fetched?;
            debug!(provider = %id, models = catalog.len(), "aggregated provider catalog");
            for model in catalog.models {
                index.owner.insert(model.id.clone(), id.clone());
                index
                    .by_provider
                    .entry(id.clone())
                    .or_default()
                    .push(model.id.clone());
                index.models.insert(model.id.clone(), model);
            }
        }
        for ids in index.by_provider.values_mut() {
            ids.sort();
        }

        *self.index.write() = Arc::new(index);
        self.ensure_configured_models()
    }

    fn snapshot(&self) -> Arc<CatalogIndex> {
        self.index.read().clone()
    }

    /// Validate the three role slots against the aggregated catalog,
    /// overwriting missing or unknown models with a fallback.
    fn ensure_configured_models(&self) -> Result<()> {
        let index = self.snapshot();
        let current = self.roles.read().clone();
        let mut repaired = current.clone();

        for (name, value) in current.slots() {
            if !value.is_empty() && index.models.contains_key(value) {
                continue;
            }
            let fallback = self.fallback_model(&index).ok_or_else(|| {
                GatewayError::Config("no models available from any provider".to_string())
            })?;
            warn!(
                role = name,
                rejected = %value,
                fallback = %fallback,
                "configured role model unavailable, using fallback"
            );
            *repaired.slot_mut(name) = fallback;
        }

        *self.roles.write() = repaired;
        Ok(())
    }

    /// Fallback precedence: first model of the default provider, then the
    /// first model of any provider in sorted order, then the first catalog
    /// entry.
    fn fallback_model(&self, index: &CatalogIndex) -> Option<String> {
        if let Some(default_id) = &self.routing.default_provider
            && let Some(first) = index
                .by_provider
                .get(default_id)
                .and_then(|models| models.first())
        {
            return Some(first.clone());
        }
        for id in &self.provider_order {
            if let Some(first) = index.by_provider.get(id).and_then(|models| models.first()) {
                return Some(first.clone());
            }
        }
        let mut ids: Vec<&String> = index.models.keys().collect();
        ids.sort();
        ids.first().map(|id| (*id).clone())
    }

    /// Resolve the provider serving a model ID. Total over any input as
    /// long as at least one provider is configured: explicit prefix route,
    /// then the default provider, then catalog ownership in sorted provider
    /// order, then the first provider as a last resort.
    pub fn provider_for_model(&self, model: &str) -> Result<Arc<dyn Provider>> {
        if let Some((head, _)) = model.split_once('/')
            && let Some(provider_id) = self.routing.prefixes.get(head)
            && let Some(provider) = self.providers.get(provider_id)
        {
            return Ok(provider.clone());
        }

        if let Some(default_id) = &self.routing.default_provider
            && let Some(provider) = self.providers.get(default_id)
        {
            return Ok(provider.clone());
        }

        let index = self.snapshot();
        for id in &self.provider_order {
            if index
                .by_provider
                .get(id)
                .is_some_and(|models| models.iter().any(|m| m == model))
            {
                return Ok(self.providers[id].clone());
            }
        }

        self.provider_order
            .first()
            .and_then(|id| self.providers.get(id))
            .cloned()
            .ok_or_else(|| GatewayError::NoProvider(model.to_string()))
    }

    /// Owning provider recorded during catalog aggregation.
    pub fn provider_id_for_model(&self, model: &str) -> Option<String> {
        self.snapshot().owner.get(model).cloned()
    }

    fn route(&self, requested_model: &str) -> Result<(Arc<dyn Provider>, RoutingDecision)> {
        let mut decision = RoutingDecision::new(requested_model);
        for hook in &self.hooks {
            if let Some(updated) = hook(&decision) {
                decision = updated;
            }
        }
        let provider = self.provider_for_model(&decision.selected_model)?;
        debug!(
            requested = %decision.requested_model,
            selected = %decision.selected_model,
            provider = provider.id(),
            reason = %decision.reason,
            "routing chat request"
        );
        Ok((provider, decision))
    }

    /// Dispatch a completion to the owning adapter. Adapter errors are
    /// surfaced unwrapped; retries happen inside the HTTP-backed adapters.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let (provider, decision) = self.route(&request.model)?;
        let mut request = request;
        request.model = strip_provider_prefix(provider.id(), &decision.selected_model).to_string();
        provider.chat(request).await
    }

    /// Dispatch a streaming completion to the owning adapter.
    pub fn chat_completion_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
        let (provider, decision) = self.route(&request.model)?;
        let mut request = request;
        request.model = strip_provider_prefix(provider.id(), &decision.selected_model).to_string();
        Ok(provider.chat_stream(request))
    }

    /// All aggregated models, sorted by ID.
    pub fn catalog(&self) -> Vec<ModelInfo> {
        let index = self.snapshot();
        let mut models: Vec<ModelInfo> = index.models.values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub fn model_info(&self, model: &str) -> Option<ModelInfo> {
        self.snapshot().models.get(model).cloned()
    }

    pub fn pricing(&self, model: &str) -> Option<ModelPricing> {
        self.model_info(model).and_then(|info| info.pricing)
    }

    /// Cost in USD for a completed call, when pricing is known.
    pub fn cost_for_usage(&self, model: &str, usage: &Usage) -> Option<f64> {
        self.pricing(model).map(|pricing| pricing.cost_for(usage))
    }

    pub fn supports_vision(&self, model: &str) -> bool {
        self.model_info(model)
            .is_some_and(|info| info.supports_vision())
    }

    pub fn supports_tools(&self, model: &str) -> bool {
        self.model_info(model)
            .is_some_and(|info| info.supports_tools())
    }

    pub fn supports_reasoning(&self, model: &str) -> bool {
        self.model_info(model)
            .is_some_and(|info| info.supports_reasoning())
    }

    pub fn context_length(&self, model: &str) -> Option<u32> {
        self.model_info(model).and_then(|info| info.context_length)
    }

    /// Role slots after initialization-time repair.
    pub fn role_models(&self) -> RoleModels {
        self.roles.read().clone()
    }

    /// Model IDs owned by one provider, sorted.
    pub fn models_for_provider(&self, provider_id: &str) -> Vec<String> {
        self.snapshot()
            .by_provider
            .get(provider_id)
            .cloned()
            .unwrap_or_default()
    }
}
