//! Vendor-advertised model metadata.

use serde::{Deserialize, Deserializer, Serialize};

use crate::chat::Usage;

/// Pricing per one million tokens (USD).
///
/// Vendor catalogs quote a price per single token; adapter wire types decode
/// those with [`per_token_price`] before building this struct.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelPricing {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

impl ModelPricing {
    pub fn new(prompt_per_million: f64, completion_per_million: f64) -> Self {
        Self {
            prompt_per_million,
            completion_per_million,
        }
    }

    /// Cost in USD for the given token usage.
    pub fn cost_for(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1_000_000.0) * self.prompt_per_million
            + (usage.completion_tokens as f64 / 1_000_000.0) * self.completion_per_million
    }
}

/// Decode a per-token price (number or string-encoded number) and normalize
/// to a per-million-token price.
pub fn per_token_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let per_token = match Raw::deserialize(deserializer)? {
        Raw::Number(value) => value,
        Raw::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|err| serde::de::Error::custom(format!("invalid price {text:?}: {err}")))?,
    };
    Ok(per_token * 1_000_000.0)
}

/// Modality description from the vendor catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelArchitecture {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub output_modalities: Vec<String>,
}

/// One catalog entry, keyed by `provider/model` ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<ModelPricing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<ModelArchitecture>,
    #[serde(default)]
    pub supported_parameters: Vec<String>,
}

impl ModelInfo {
    /// Bare entry with nothing but an ID, for vendors whose discovery
    /// endpoint reports no metadata.
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            context_length: None,
            pricing: None,
            architecture: None,
            supported_parameters: Vec::new(),
        }
    }

    /// Whether the model accepts image input.
    pub fn supports_vision(&self) -> bool {
        let Some(arch) = &self.architecture else {
            return false;
        };
        arch.input_modalities.iter().any(|m| m == "image")
            || arch
                .modality
                .as_deref()
                .is_some_and(|m| m.split(['+', '-', '>']).any(|part| part == "image"))
    }

    /// Whether the model accepts tool definitions.
    pub fn supports_tools(&self) -> bool {
        self.supported_parameters
            .iter()
            .any(|p| p == "tools" || p == "tool_choice")
    }

    /// Whether the model can return reasoning text.
    pub fn supports_reasoning(&self) -> bool {
        self.supported_parameters
            .iter()
            .any(|p| p == "reasoning" || p == "include_reasoning")
    }
}

/// The set of models a provider advertises as callable.
///
/// Entries are unique by ID; inserting an existing ID overwrites it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelInfo>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        let mut catalog = Self::default();
        for model in models {
            catalog.insert(model);
        }
        catalog
    }

    pub fn insert(&mut self, model: ModelInfo) {
        match self.models.iter_mut().find(|m| m.id == model.id) {
            Some(existing) => *existing = model,
            None => self.models.push(model),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }
}
