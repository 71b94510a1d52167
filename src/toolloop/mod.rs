//! Bounded tool-call loop: LLM turns interleaved with tool dispatch.
//!
//! Written as iteration, not recursion — stack depth is independent of the
//! configured ceiling. Every invocation (including malformed and failed
//! ones) lands in the history with both its request text and observation;
//! the model must see its mistakes to correct them.

mod parse;

pub use parse::{parse_tool_requests, ParsedBlock, ToolRequest, TOOL_REQUEST_TEMPLATE};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::History;
use crate::error::MentorResult;
use crate::llm::{CompletionOptions, LlmClient};
use crate::types::ChatMessage;

/// Instruction appended when the recursion ceiling is reached.
const FORCED_FINAL_INSTRUCTION: &str = "Please provide a final response based on the tool execution results above. Do not make any more tool calls.";

/// A dispatchable tool (agent or auxiliary).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    async fn handle(&self, request: &ToolRequest) -> MentorResult<String>;
}

/// Fixed set of handlers available to the loop.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.push(handler);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    /// (name, description) pairs for the prompt catalogue.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.handlers
            .iter()
            .map(|h| (h.name().to_string(), h.description().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Record of one tool invocation inside a loop run.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub query: String,
    pub observation: String,
    pub is_error: bool,
    pub execution_time_ms: u64,
}

/// Result of a complete loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// The model's final answer
    pub content: String,
    /// Tool rounds executed
    pub depth: usize,
    pub calls: Vec<ToolCallRecord>,
    /// Whether the ceiling forced the final answer
    pub forced_final: bool,
}

/// Drives the bounded loop of completions and tool dispatches.
pub struct ToolLoop {
    registry: ToolRegistry,
    max_depth: usize,
}

impl ToolLoop {
    pub fn new(registry: ToolRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the loop to completion. `messages` is the working message list
    /// (system prompt first); `history` receives every turn.
    pub async fn run(
        &self,
        client: &LlmClient,
        options: &CompletionOptions,
        mut messages: Vec<ChatMessage>,
        history: &mut History,
    ) -> MentorResult<LoopOutcome> {
        let mut depth = 0usize;
        let mut calls = Vec::new();

        loop {
            let completion = client.complete(&messages, options).await?;
            let blocks = parse_tool_requests(&completion.content);

            if blocks.is_empty() {
                history.append_assistant(&completion.content);
                return Ok(LoopOutcome {
                    content: completion.content,
                    depth,
                    calls,
                    forced_final: false,
                });
            }

            let mut observations = Vec::with_capacity(blocks.len());
            for block in blocks {
                let record = self.dispatch(block).await;
                observations.push(render_observation(&record));
                calls.push(record);
            }
            let observation_text = format!(
                "Tool Execution Results:\n\n{}",
                observations.join("\n---\n\n")
            );

            history.append_assistant(&completion.content);
            history.append_observation(&observation_text);
            messages.push(ChatMessage::assistant(&completion.content));
            messages.push(ChatMessage::user(&observation_text));

            depth += 1;
            if depth >= self.max_depth {
                warn!(depth, "tool loop ceiling reached, forcing final answer");
                messages.push(ChatMessage::user(FORCED_FINAL_INSTRUCTION));
                history.append_user(FORCED_FINAL_INSTRUCTION);
                let completion = client.complete(&messages, options).await?;
                history.append_assistant(&completion.content);
                return Ok(LoopOutcome {
                    content: completion.content,
                    depth,
                    calls,
                    forced_final: true,
                });
            }
        }
    }

    async fn dispatch(&self, block: ParsedBlock) -> ToolCallRecord {
        match block {
            ParsedBlock::Malformed { raw, error } => ToolCallRecord {
                tool_name: "<malformed>".into(),
                query: raw,
                observation: format!("Tool request could not be parsed: {error}"),
                is_error: true,
                execution_time_ms: 0,
            },
            ParsedBlock::Request(request) => {
                let start = Instant::now();
                let (observation, is_error) = match self.registry.get(&request.agent_name) {
                    None => (
                        format!("Unknown tool: {}", request.agent_name),
                        true,
                    ),
                    Some(handler) => match handler.handle(&request).await {
                        Ok(result) => (result, false),
                        // Full error text goes back to the model so it can
                        // self-correct.
                        Err(e) => (format!("Tool execution failed: {e}"), true),
                    },
                };
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(
                    tool = %request.agent_name,
                    is_error,
                    elapsed_ms = elapsed,
                    "tool dispatched"
                );
                ToolCallRecord {
                    tool_name: request.agent_name,
                    query: request.query,
                    observation,
                    is_error,
                    execution_time_ms: elapsed,
                }
            }
        }
    }
}

fn render_observation(record: &ToolCallRecord) -> String {
    format!(
        "**{}**:\nQuery: {}\nStatus: {}\nResult:\n{}\nExecution Time: {}ms\n",
        record.tool_name,
        record.query,
        if record.is_error { "error" } else { "success" },
        record.observation,
        record.execution_time_ms
    )
}
