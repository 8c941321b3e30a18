//! Streaming reconstruction: SSE framing, chunk accumulation, and the
//! embedded tool-call token grammar.

mod accumulator;
mod sse;
mod tool_tokens;

pub use accumulator::{AccumulatorPool, StreamAccumulator};
pub use sse::SseFramer;
pub use tool_tokens::{filter_tool_call_tokens, parse_tool_calls_from_content};
