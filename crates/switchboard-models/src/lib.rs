//! Shared data model for the Switchboard gateway.
//!
//! Pure serde types with no I/O: chat requests and responses, streaming
//! chunks, and provider catalog metadata. The wire shapes follow the
//! OpenAI-compatible convention; adapters for other vendors normalize into
//! these types.

mod catalog;
mod chat;
mod stream;

pub use catalog::{ModelArchitecture, ModelCatalog, ModelInfo, ModelPricing, per_token_price};
pub use chat::{
    ChatRequest, ChatResponse, Choice, ContentPart, FinishReason, FunctionCall, FunctionSpec,
    ImageUrl, Message, MessageContent, PromptCacheHint, Role, ToolCall, ToolDefinition, Usage,
};
pub use stream::{FunctionCallDelta, MessageDelta, StreamChoice, StreamChunk, ToolCallDelta};
