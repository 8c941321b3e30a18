//! Configuration surface.
//!
//! Plain structs filled by an external config loader; nothing here reads
//! files or the environment.

use std::collections::HashMap;

use serde::Deserialize;

use crate::resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub providers: ProvidersConfig,
    pub routing: RoutingConfig,
    pub roles: RoleModels,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
}

/// Per-vendor settings. Disabled providers are never constructed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openrouter: ProviderSettings,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub google: ProviderSettings,
    pub ollama: ProviderSettings,
    pub litellm: ProviderSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Static model list for vendors without a discovery endpoint.
    pub models: Vec<String>,
    /// Attribution referer sent by the aggregator adapter.
    pub referer: Option<String>,
    /// Attribution application title sent by the aggregator adapter.
    pub app_title: Option<String>,
}

impl ProviderSettings {
    pub fn enabled_with_key(key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            api_key: Some(key.into()),
            ..Default::default()
        }
    }
}

/// Model routing table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Model-ID prefix (the part before the first `/`) to provider ID.
    pub prefixes: HashMap<String, String>,
    pub default_provider: Option<String>,
}

/// Named configuration slots bound to specific model IDs.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoleModels {
    pub planning: String,
    pub execution: String,
    pub review: String,
}

impl RoleModels {
    /// Slot name / value pairs, in a fixed order.
    pub fn slots(&self) -> [(&'static str, &str); 3] {
        [
            ("planning", self.planning.as_str()),
            ("execution", self.execution.as_str()),
            ("review", self.review.as_str()),
        ]
    }

    pub(crate) fn slot_mut(&mut self, name: &str) -> &mut String {
        match name {
            "planning" => &mut self.planning,
            "execution" => &mut self.execution,
            "review" => &mut self.review,
            other => unreachable!("unknown role slot {other}"),
        }
    }
}
