//! Folding an incremental chunk sequence into one complete message.

use parking_lot::Mutex;
use switchboard_models::{
    ChatResponse, Choice, FinishReason, Message, MessageContent, Role, StreamChunk, ToolCall,
    Usage,
};

use crate::stream::tool_tokens::{filter_tool_call_tokens, parse_tool_calls_from_content};

/// One tool call under construction.
///
/// Vendors split the id, name and argument string of a single logical call
/// across many chunks, so every field is append-only.
#[derive(Debug, Clone, Default, PartialEq)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reduces a chunk sequence to one logical message.
///
/// Chunks must be fed in arrival order. The accumulator is reusable through
/// [`AccumulatorPool`]; one instance is never shared across concurrent
/// streams.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    model: Option<String>,
    role: Option<Role>,
    content: String,
    reasoning: String,
    tool_calls: Vec<PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk into the accumulated state.
    pub fn add(&mut self, chunk: &StreamChunk) {
        if self.id.is_none() {
            self.id = chunk.id.clone();
        }
        if self.model.is_none() {
            self.model = chunk.model.clone();
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(role) = choice.delta.role {
                self.role = Some(role);
            }
            if let Some(content) = &choice.delta.content {
                self.content.push_str(content);
            }
            if let Some(reasoning) = &choice.delta.reasoning {
                self.reasoning.push_str(reasoning);
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    if self.tool_calls.len() <= delta.index {
                        self.tool_calls
                            .resize_with(delta.index + 1, PartialToolCall::default);
                    }
                    let call = &mut self.tool_calls[delta.index];
                    if let Some(id) = &delta.id {
                        call.id.push_str(id);
                    }
                    if let Some(function) = &delta.function {
                        if let Some(name) = &function.name {
                            call.name.push_str(name);
                        }
                        if let Some(arguments) = &function.arguments {
                            call.arguments.push_str(arguments);
                        }
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        // Conventionally only the final chunk carries usage.
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Structured tool calls accumulated from deltas.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .map(|call| ToolCall::function(&call.id, &call.name, &call.arguments))
            .collect()
    }

    /// Build the final assistant message.
    ///
    /// Structured deltas are authoritative when present; the embedded token
    /// grammar is only consulted otherwise. Visible content is scrubbed of
    /// leaked grammar tokens in both cases.
    pub fn finalize_message(&self) -> Message {
        let (tool_calls, content) = if self.has_tool_calls() {
            (self.tool_calls(), self.content.clone())
        } else {
            parse_tool_calls_from_content(&self.content)
        };
        let content = filter_tool_call_tokens(&content);

        let mut message = Message {
            role: self.role.unwrap_or(Role::Assistant),
            content: MessageContent::Text(content),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            name: None,
            reasoning: None,
        };
        if !self.reasoning.is_empty() {
            message.reasoning = Some(self.reasoning.clone());
        }
        message
    }

    /// Build a complete response from the accumulated stream.
    pub fn finalize_response(&self) -> ChatResponse {
        let finish_reason = self.finish_reason.or_else(|| {
            self.has_tool_calls()
                .then_some(FinishReason::ToolCalls)
                .or(Some(FinishReason::Stop))
        });
        ChatResponse {
            id: self.id.clone().unwrap_or_default(),
            model: self.model.clone().unwrap_or_default(),
            choices: vec![Choice {
                index: 0,
                message: self.finalize_message(),
                finish_reason,
            }],
            usage: self.usage,
        }
    }

    /// Clear all accumulated state for reuse.
    pub fn reset(&mut self) {
        self.id = None;
        self.model = None;
        self.role = None;
        self.content.clear();
        self.reasoning.clear();
        self.tool_calls.clear();
        self.finish_reason = None;
        self.usage = None;
    }
}

/// Free-list of accumulators to avoid per-stream allocation churn under
/// high concurrency. Reuse is an optimization: acquiring from an empty pool
/// just allocates.
pub struct AccumulatorPool {
    free: Mutex<Vec<StreamAccumulator>>,
    max_idle: usize,
}

impl AccumulatorPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    pub fn acquire(&self) -> StreamAccumulator {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Return an accumulator to the pool. State is reset here so acquire
    /// always hands out a clean instance.
    pub fn release(&self, mut accumulator: StreamAccumulator) {
        accumulator.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(accumulator);
        }
    }
}

impl Default for AccumulatorPool {
    fn default() -> Self {
        Self::new(32)
    }
}
