//! The five pipeline agents as a closed, tagged enumeration.
//!
//! Each variant carries a name, a prompt fragment and a result parser; a
//! new agent is a new variant, not runtime registration.

mod empress;
mod hermit;
mod justice;
mod magician;
mod priestess;
mod tools;

pub use tools::{register_vault_tools, FindPathTool, ReadNoteTool, SearchNotesTool};

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::{ExternalStore, History, PromptBuilder, RankedNote, UserState};
use crate::error::MentorResult;
use crate::links::SharedLinkEngine;
use crate::llm::{CompletionOptions, LlmClient};
use crate::session::LearningSession;
use crate::toolloop::{LoopOutcome, ToolLoop};
use crate::types::{AgentResult, ChatMessage};
use crate::vault::NoteStore;

/// The five agents, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    HighPriestess,
    Hermit,
    Magician,
    Justice,
    Empress,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::HighPriestess,
        AgentKind::Hermit,
        AgentKind::Magician,
        AgentKind::Justice,
        AgentKind::Empress,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::HighPriestess => "the_high_priestess",
            AgentKind::Hermit => "the_hermit",
            AgentKind::Magician => "the_magician",
            AgentKind::Justice => "justice",
            AgentKind::Empress => "the_empress",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentKind::HighPriestess => {
                "Knowledge assessment - evaluates the current knowledge state through link analysis"
            }
            AgentKind::Hermit => {
                "Learning path planning - sequences concepts within the zone of proximal development"
            }
            AgentKind::Magician => {
                "Content generation - drafts new notes that weave links into the existing graph"
            }
            AgentKind::Justice => {
                "Understanding evaluation - probes comprehension of the newly formed links"
            }
            AgentKind::Empress => {
                "Memory consolidation - persists new knowledge into the vault and its indexes"
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Position in the pipeline (0–4).
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|k| k == self)
            .expect("kind is in ALL")
    }

    /// System-prompt fragment appended to the static prefix for this
    /// agent's turns.
    pub fn prompt_fragment(&self) -> &'static str {
        match self {
            AgentKind::HighPriestess => priestess::PROMPT_FRAGMENT,
            AgentKind::Hermit => hermit::PROMPT_FRAGMENT,
            AgentKind::Magician => magician::PROMPT_FRAGMENT,
            AgentKind::Justice => justice::PROMPT_FRAGMENT,
            AgentKind::Empress => empress::PROMPT_FRAGMENT,
        }
    }

    /// Run this agent for one stage. Execution time and the agent name are
    /// stamped onto the result here.
    pub async fn execute(
        &self,
        ctx: &AgentContext,
        session: &LearningSession,
        history: &mut History,
        query: &str,
    ) -> MentorResult<AgentResult> {
        let start = Instant::now();
        let mut result = match self {
            AgentKind::HighPriestess => priestess::run(ctx, session, history, query).await?,
            AgentKind::Hermit => hermit::run(ctx, session, history, query).await?,
            AgentKind::Magician => magician::run(ctx, session, history, query).await?,
            AgentKind::Justice => justice::run(ctx, session, history, query).await?,
            AgentKind::Empress => empress::run(ctx, session, history, query).await?,
        };
        result.agent = self.name().to_string();
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}

/// Everything an agent needs to run a stage.
pub struct AgentContext {
    pub store: Arc<NoteStore>,
    pub links: SharedLinkEngine,
    pub client: Arc<LlmClient>,
    pub options: CompletionOptions,
    pub prompts: Arc<PromptBuilder>,
    pub externals: ExternalStore,
    pub tool_loop: Arc<ToolLoop>,
}

impl AgentContext {
    /// Rank vault notes against a query and hydrate them for tiering.
    pub async fn ranked_notes(&self, query: &str, limit: usize) -> Vec<RankedNote> {
        let scored = {
            let engine = self.links.read().await;
            engine.keyword_match(query, limit)
        };
        let mut ranked = Vec::with_capacity(scored.len());
        for (slug, relevance) in scored {
            let Ok(note) = self.store.read(&slug).await else {
                continue;
            };
            let outgoing = {
                let engine = self.links.read().await;
                engine.index().outgoing(&slug).to_vec()
            };
            ranked.push(RankedNote::from_note(&note, relevance, outgoing));
        }
        ranked
    }

    /// Build the stage prompt and drive the tool loop to a final answer.
    pub async fn run_turns(
        &self,
        kind: AgentKind,
        ranked: &[RankedNote],
        state: &UserState,
        history: &mut History,
        user_message: &str,
    ) -> MentorResult<LoopOutcome> {
        let system = self
            .prompts
            .build(kind.prompt_fragment(), ranked, state, history, &self.externals)
            .await?;
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(user_message),
        ];
        history.append_user(user_message);
        self.tool_loop
            .run(&self.client, &self.options, messages, history)
            .await
    }
}

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid fence regex"));

/// Pull a JSON object out of model output: fenced block first, then the
/// outermost brace span. Agents degrade to graph-derived defaults when the
/// model returned no parseable structure.
pub(crate) fn extract_json(content: &str) -> Option<serde_json::Value> {
    if let Some(capture) = JSON_FENCE.captures(content) {
        if let Ok(value) = serde_json::from_str(&capture[1]) {
            return Some(value);
        }
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

/// Read a string array out of parsed JSON, tolerating absence.
pub(crate) fn string_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Model-reported confidence, clamped, with a fallback.
pub(crate) fn confidence_or(value: Option<&serde_json::Value>, fallback: f64) -> f64 {
    value
        .and_then(|v| v.get("confidence"))
        .and_then(|c| c.as_f64())
        .unwrap_or(fallback)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_and_order() {
        let names: Vec<&str> = AgentKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec![
                "the_high_priestess",
                "the_hermit",
                "the_magician",
                "justice",
                "the_empress"
            ]
        );
        assert_eq!(AgentKind::Hermit.index(), 1);
        assert_eq!(
            AgentKind::from_name("the_empress"),
            Some(AgentKind::Empress)
        );
        assert_eq!(AgentKind::from_name("the_star"), None);
    }

    #[test]
    fn fragments_are_distinct() {
        let fragments: std::collections::BTreeSet<&str> = AgentKind::ALL
            .iter()
            .map(|k| k.prompt_fragment())
            .collect();
        assert_eq!(fragments.len(), 5);
    }

    #[test]
    fn extract_json_from_fence() {
        let content = "Here you go:\n```json\n{\"path\": [\"a\", \"b\"]}\n```\nDone.";
        let value = extract_json(content).unwrap();
        assert_eq!(value["path"][0], "a");
    }

    #[test]
    fn extract_json_bare_braces() {
        let content = "Result: {\"known_concepts\": [\"probability\"], \"confidence\": 0.8} end";
        let value = extract_json(content).unwrap();
        assert_eq!(value["confidence"], 0.8);
    }

    #[test]
    fn extract_json_absent() {
        assert!(extract_json("no structure here").is_none());
        assert!(extract_json("unbalanced } {").is_none());
    }

    #[test]
    fn string_list_tolerates_shape() {
        let value = serde_json::json!({"items": ["a", 1, "b"], "other": "x"});
        assert_eq!(string_list(&value, "items"), vec!["a", "b"]);
        assert!(string_list(&value, "missing").is_empty());
        assert!(string_list(&value, "other").is_empty());
    }

    #[test]
    fn confidence_clamps() {
        let value = serde_json::json!({"confidence": 1.7});
        assert_eq!(confidence_or(Some(&value), 0.5), 1.0);
        assert_eq!(confidence_or(None, 0.5), 0.5);
    }
}
