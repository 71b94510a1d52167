//! Parsing of literal tool-request blocks from model output.
//!
//! The model emits invocations as:
//!
//! ```text
//! <<<[TOOL_REQUEST]>>>
//! agentType: 「始」arcana「末」
//! agent_name: 「始」the_hermit「末」
//! query: 「始」plan a path to markov chains「末」
//! <<<[END_TOOL_REQUEST]>>>
//! ```
//!
//! Additional `key: 「始」value「末」` lines become string arguments.
//! Malformed blocks are reported back to the model, never dropped.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Literal block format, rendered into the tool catalogue section.
pub const TOOL_REQUEST_TEMPLATE: &str = "```\n<<<[TOOL_REQUEST]>>>\nagentType: 「始」<kind>「末」\nagent_name: 「始」<name>「末」\nquery: 「始」<task description>「末」\n<<<[END_TOOL_REQUEST]>>>\n```\n";

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<<<\[TOOL_REQUEST\]>>>(.*?)<<<\[END_TOOL_REQUEST\]>>>")
        .expect("valid block regex")
});

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)([A-Za-z_][A-Za-z0-9_]*)\s*:\s*「始」(.*?)「末」").expect("valid field regex")
});

/// A well-formed tool invocation parsed from model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub agent_type: String,
    pub agent_name: String,
    pub query: String,
    /// Extra `key: 「始」value「末」` lines
    pub arguments: BTreeMap<String, String>,
    /// The raw text span of the whole block
    pub raw: String,
}

/// A parsed block: either a usable request or a malformed block carried
/// with its error so the loop can report it as a tool observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBlock {
    Request(ToolRequest),
    Malformed { raw: String, error: String },
}

/// Scan model output for tool-request blocks in document order.
pub fn parse_tool_requests(content: &str) -> Vec<ParsedBlock> {
    BLOCK
        .captures_iter(content)
        .map(|capture| {
            let raw = capture[0].to_string();
            let inner = &capture[1];

            let mut fields = BTreeMap::new();
            for field in FIELD.captures_iter(inner) {
                fields.insert(field[1].to_string(), field[2].trim().to_string());
            }

            let Some(agent_type) = fields.remove("agentType") else {
                return ParsedBlock::Malformed {
                    raw,
                    error: "missing required field 'agentType'".into(),
                };
            };
            let Some(agent_name) = fields.remove("agent_name") else {
                return ParsedBlock::Malformed {
                    raw,
                    error: "missing required field 'agent_name'".into(),
                };
            };
            let Some(query) = fields.remove("query") else {
                return ParsedBlock::Malformed {
                    raw,
                    error: "missing required field 'query'".into(),
                };
            };

            ParsedBlock::Request(ToolRequest {
                agent_type,
                agent_name,
                query,
                arguments: fields,
                raw,
            })
        })
        .collect()
}
