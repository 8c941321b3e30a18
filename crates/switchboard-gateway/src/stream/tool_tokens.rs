//! Legacy embedded tool-call token grammar.
//!
//! Some models emit tool calls as inline control tokens instead of
//! structured deltas:
//!
//! ```text
//! <|tool_calls_section_begin|>
//!   <|tool_call_begin|> functions.NAME:INDEX
//!   <|tool_call_argument_begin|> ARGS <|tool_call_end|>
//! <|tool_calls_section_end|>
//! ```
//!
//! [`parse_tool_calls_from_content`] extracts whole sections;
//! [`filter_tool_call_tokens`] scrubs partial marker fragments that leak
//! into streamed text even when the structured delta path already produced
//! the calls.

use once_cell::sync::Lazy;
use regex::Regex;
use switchboard_models::ToolCall;

const SECTION_BEGIN: &str = "<|tool_calls_section_begin|>";

static SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<\|tool_calls_section_begin\|>(.*?)<\|tool_calls_section_end\|>")
        .expect("section regex")
});

static CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<\|tool_call_begin\|>\s*(?P<id>functions\.[\w.\-]+:\d+)\s*<\|tool_call_argument_begin\|>\s*(?P<args>.*?)\s*<\|tool_call_end\|>",
    )
    .expect("call regex")
});

static FRAGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        <\|[a-z_]*\|?>?           # marker, or a marker head truncated mid-token
      | [a-z_]+\|>                # marker tail fragment
      | \|>                       # bare closer
      | functions\.[\w.\-]+:\d+   # leaked call-id remnant
    ",
    )
    .expect("fragment regex")
});

/// Extract every embedded tool-call section from `content`.
///
/// Returns the parsed calls and the content with the matched sections
/// removed. Content without a section marker passes through untouched.
pub fn parse_tool_calls_from_content(content: &str) -> (Vec<ToolCall>, String) {
    if !content.contains(SECTION_BEGIN) {
        return (Vec::new(), content.to_string());
    }

    let mut calls = Vec::new();
    for section in SECTION_RE.captures_iter(content) {
        for call in CALL_RE.captures_iter(&section[1]) {
            let id = &call["id"];
            calls.push(ToolCall::function(id, tool_name_from_id(id), &call["args"]));
        }
    }

    let residual = SECTION_RE.replace_all(content, "").into_owned();
    (calls, residual)
}

/// `functions.get_weather:0` names the tool `get_weather`.
fn tool_name_from_id(id: &str) -> String {
    let stripped = id.strip_prefix("functions.").unwrap_or(id);
    stripped
        .rsplit_once(':')
        .map(|(name, _index)| name)
        .unwrap_or(stripped)
        .to_string()
}

/// Remove stray grammar tokens and their boundary fragments from visible
/// content. Re-running on its own output is a no-op.
pub fn filter_tool_call_tokens(content: &str) -> String {
    if !content.contains('|') && !content.contains("functions.") {
        return content.to_string();
    }

    // Removing one fragment can butt two halves of another together, so
    // scrub until a pass changes nothing.
    let mut current = content.to_string();
    loop {
        let next = FRAGMENT_RE.replace_all(&current, "").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_embedded_call() {
        let content = r#"<|tool_calls_section_begin|><|tool_call_begin|>functions.get_weather:0<|tool_call_argument_begin|>{"city":"Beijing"}<|tool_call_end|><|tool_calls_section_end|>"#;
        let (calls, residual) = parse_tool_calls_from_content(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Beijing"}"#);
        assert_eq!(calls[0].id, "functions.get_weather:0");
        assert!(residual.is_empty());
    }

    #[test]
    fn parses_multiple_calls_and_keeps_surrounding_text() {
        let content = "Let me check.<|tool_calls_section_begin|><|tool_call_begin|>functions.a:0<|tool_call_argument_begin|>{}<|tool_call_end|><|tool_call_begin|>functions.b:1<|tool_call_argument_begin|>{\"x\":1}<|tool_call_end|><|tool_calls_section_end|> Done.";
        let (calls, residual) = parse_tool_calls_from_content(content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "a");
        assert_eq!(calls[1].function.name, "b");
        assert_eq!(calls[1].function.arguments, "{\"x\":1}");
        assert_eq!(residual, "Let me check. Done.");
    }

    #[test]
    fn content_without_sections_passes_through() {
        let (calls, residual) = parse_tool_calls_from_content("plain answer");
        assert!(calls.is_empty());
        assert_eq!(residual, "plain answer");
    }

    #[test]
    fn tool_name_strips_prefix_and_index() {
        assert_eq!(tool_name_from_id("functions.get_weather:0"), "get_weather");
        assert_eq!(tool_name_from_id("functions.fs.read:12"), "fs.read");
    }

    #[test]
    fn filter_removes_whole_markers() {
        let filtered = filter_tool_call_tokens(
            "before <|tool_calls_section_begin|><|tool_calls_section_end|> after",
        );
        assert_eq!(filtered, "before  after");
    }

    #[test]
    fn filter_removes_partial_fragments_and_id_remnants() {
        assert_eq!(filter_tool_call_tokens("text <|tool_call_beg"), "text ");
        assert_eq!(filter_tool_call_tokens("argument_begin|> text"), " text");
        assert_eq!(
            filter_tool_call_tokens("calling functions.get_weather:0 now"),
            "calling  now"
        );
    }

    #[test]
    fn filter_leaves_ordinary_text_alone() {
        let text = "The ratio is 3:1 and the pipe is | here.";
        assert_eq!(filter_tool_call_tokens(text), text);
    }

    #[test]
    fn filter_is_idempotent() {
        let inputs = [
            "plain",
            "text <|tool_call_beg",
            "<functions.a:1|tool_call_end|>",
            "a <| b |> c functions.f:9",
            "<|tool_calls_section_begin|>junk<|tool_calls_section_end|>",
        ];
        for input in inputs {
            let once = filter_tool_call_tokens(input);
            let twice = filter_tool_call_tokens(&once);
            assert_eq!(once, twice, "not a fixed point for {input:?}");
        }
    }
}
