//! Incremental streaming response types.
//!
//! These mirror the OpenAI-compatible wire shape; adapters for vendors with
//! their own streaming protocols synthesize chunks in this shape.

use serde::{Deserialize, Serialize};

use crate::chat::{FinishReason, Role, Usage};

/// One increment of a streaming response.
///
/// Ephemeral: consumed in arrival order and never replayed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    /// Conventionally present only on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: MessageDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Partial message fragment carried by one chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "reasoning_content"
    )]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Fragment of a structured tool call, keyed by index.
///
/// Vendors split a single logical call's id, name and argument string across
/// many chunks token by token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl StreamChunk {
    /// Chunk carrying a single content fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self::with_delta(MessageDelta {
            content: Some(content.into()),
            ..Default::default()
        })
    }

    /// Chunk carrying a reasoning fragment.
    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self::with_delta(MessageDelta {
            reasoning: Some(reasoning.into()),
            ..Default::default()
        })
    }

    /// Chunk announcing the assistant role, optionally with message metadata.
    pub fn role(role: Role) -> Self {
        Self::with_delta(MessageDelta {
            role: Some(role),
            ..Default::default()
        })
    }

    /// Chunk carrying one tool-call fragment.
    pub fn tool_delta(
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Self {
        Self::with_delta(MessageDelta {
            tool_calls: Some(vec![ToolCallDelta {
                index,
                id,
                kind: None,
                function: Some(FunctionCallDelta { name, arguments }),
            }]),
            ..Default::default()
        })
    }

    /// Terminal chunk with a finish reason and optional usage.
    pub fn finish(reason: FinishReason, usage: Option<Usage>) -> Self {
        Self {
            id: None,
            model: None,
            choices: vec![StreamChoice {
                index: 0,
                delta: MessageDelta::default(),
                finish_reason: Some(reason),
            }],
            usage,
        }
    }

    fn with_delta(delta: MessageDelta) -> Self {
        Self {
            id: None,
            model: None,
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }
}
