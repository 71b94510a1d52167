//! The High Priestess: knowledge assessment.
//!
//! Seeds a keyword match from the learner's query, expands the
//! neighborhood of the strongest hits, and asks the model to separate what
//! the learner already holds from what is within reach.

use serde_json::json;

use super::{confidence_or, extract_json, string_list, AgentContext, AgentKind};
use crate::context::{History, UserState};
use crate::error::MentorResult;
use crate::session::LearningSession;
use crate::types::AgentResult;

pub(super) const PROMPT_FRAGMENT: &str = "## Role: The High Priestess\n\nYou assess the learner's current knowledge. Study the notes provided: what exists in the vault has been encountered; link density signals familiarity. Identify which concepts the learner already knows and which relevant concepts are missing or weakly connected. Watch for cognitive overload: too many new concepts at once.\n\nRespond with a JSON object: {\"known_concepts\": [slugs], \"unknown_concepts\": [slugs or new concept names], \"cognitive_load_flags\": [strings], \"rationale\": string, \"confidence\": 0.0-1.0}";

pub(super) async fn run(
    ctx: &AgentContext,
    _session: &LearningSession,
    history: &mut History,
    query: &str,
) -> MentorResult<AgentResult> {
    let ranked = ctx.ranked_notes(query, 20).await;

    // Graph-derived candidates: the frontier around the strongest matches.
    let (graph_known, graph_candidates, readiness) = {
        let engine = ctx.links.read().await;
        let known: Vec<String> = ranked.iter().take(5).map(|n| n.slug.clone()).collect();
        let mut candidates = Vec::new();
        for slug in &known {
            for layer in engine.neighbors(slug, 2).into_iter().skip(1) {
                for neighbor in layer {
                    if !known.contains(&neighbor) && !candidates.contains(&neighbor) {
                        candidates.push(neighbor);
                    }
                }
            }
        }
        let readiness: Vec<(String, f64)> = known
            .iter()
            .map(|slug| (slug.clone(), engine.learning_readiness(slug)))
            .collect();
        (known, candidates, readiness)
    };

    let state = UserState {
        query: query.to_string(),
        known_concepts: graph_known.clone(),
        target_concepts: Vec::new(),
    };
    let outcome = ctx
        .run_turns(
            AgentKind::HighPriestess,
            &ranked,
            &state,
            history,
            &format!("Assess the learner's knowledge for this goal: {query}"),
        )
        .await?;

    let parsed = extract_json(&outcome.content);
    let mut known = parsed
        .as_ref()
        .map(|v| string_list(v, "known_concepts"))
        .unwrap_or_default();
    let mut unknown = parsed
        .as_ref()
        .map(|v| string_list(v, "unknown_concepts"))
        .unwrap_or_default();
    let load_flags = parsed
        .as_ref()
        .map(|v| string_list(v, "cognitive_load_flags"))
        .unwrap_or_default();
    if known.is_empty() {
        known = graph_known;
    }
    if unknown.is_empty() {
        unknown = graph_candidates;
    }
    // A goal that matches nothing in the vault is still a target: distil it
    // into a concept slug so the path planner has somewhere to aim.
    if unknown.is_empty() {
        unknown.extend(goal_concept(query));
    }

    let rationale = parsed
        .as_ref()
        .and_then(|v| v.get("rationale"))
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| outcome.content.clone());

    Ok(AgentResult::new(AgentKind::HighPriestess.name(), rationale)
        .with_confidence(confidence_or(parsed.as_ref(), 0.6))
        .with_metadata(json!({
            "known_concepts": known,
            "unknown_concepts": unknown,
            "cognitive_load_flags": load_flags,
            "readiness": readiness
                .into_iter()
                .map(|(slug, value)| json!({"slug": slug, "readiness": value}))
                .collect::<Vec<_>>(),
            "tool_calls": outcome.calls.len(),
        })))
}

const GOAL_STOPWORDS: [&str; 14] = [
    "learn", "about", "teach", "study", "understand", "the", "an", "of", "to", "me", "what",
    "is", "how", "explain",
];

/// Distil a learning goal into a single concept slug, dropping filler
/// words: "Learn about Markov chains" becomes "markov_chains".
fn goal_concept(query: &str) -> Option<String> {
    let meaningful: Vec<&str> = query
        .split_whitespace()
        .filter(|word| {
            let lower = word.to_lowercase();
            let lower = lower.trim_matches(|c: char| !c.is_alphanumeric());
            lower.len() > 1 && !GOAL_STOPWORDS.contains(&lower)
        })
        .collect();
    if meaningful.is_empty() {
        return None;
    }
    Some(crate::vault::slugify(&meaningful.join(" ")))
}
