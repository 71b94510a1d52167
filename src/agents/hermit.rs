//! The Hermit: learning path planning.
//!
//! Computes the multi-path context backbone over known ∪ target concepts,
//! asks the model to order the steps, and validates the result against the
//! graph and the configured path-length ceiling.

use serde_json::json;

use super::{confidence_or, extract_json, string_list, AgentContext, AgentKind};
use crate::context::{History, UserState};
use crate::error::{MentorError, MentorResult};
use crate::session::LearningSession;
use crate::types::AgentResult;
use crate::vault::slugify;

pub(super) const PROMPT_FRAGMENT: &str = "## Role: The Hermit\n\nYou plan a learning path inside the learner's zone of proximal development. Order concepts so each step builds on the previous one; prefer small complexity jumps and well-connected waypoints. The path starts from something known and ends at the learning goal.\n\nRespond with a JSON object: {\"path\": [slugs in order], \"rationale\": string, \"confidence\": 0.0-1.0}";

pub(super) async fn run(
    ctx: &AgentContext,
    session: &LearningSession,
    history: &mut History,
    query: &str,
) -> MentorResult<AgentResult> {
    let assessment = session
        .stage_result(AgentKind::HighPriestess.name())
        .ok_or_else(|| MentorError::Agent {
            agent: AgentKind::Hermit.name().into(),
            message: "no assessment result to plan from".into(),
        })?;
    let known = string_list(&assessment.metadata, "known_concepts");
    let targets = string_list(&assessment.metadata, "unknown_concepts");

    let (backbone, graph_path, max_path_length) = {
        let engine = ctx.links.read().await;
        let seeds: Vec<String> = known
            .iter()
            .chain(targets.iter())
            .map(|c| slugify(c))
            .filter(|slug| engine.index().contains(slug))
            .collect();
        let backbone = engine.multi_shortest_paths(&seeds);
        // Longest pairwise path is the default plan: it traverses the most
        // intermediate waypoints between known ground and the frontier.
        let graph_path = backbone
            .paths
            .iter()
            .max_by_key(|p| p.len())
            .cloned()
            .unwrap_or_default();
        (backbone, graph_path, engine.max_path_length())
    };

    let ranked = ctx.ranked_notes(query, 20).await;
    let state = UserState {
        query: query.to_string(),
        known_concepts: known.clone(),
        target_concepts: targets.clone(),
    };
    let backbone_summary = format!(
        "Plan a learning path for: {query}\nContext backbone: {}\nIntersections: {}",
        backbone
            .nodes
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        backbone
            .intersections
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    let outcome = ctx
        .run_turns(AgentKind::Hermit, &ranked, &state, history, &backbone_summary)
        .await?;

    let parsed = extract_json(&outcome.content);
    let mut path: Vec<String> = parsed
        .as_ref()
        .map(|v| string_list(v, "path"))
        .unwrap_or_default()
        .iter()
        .map(|step| slugify(step))
        .collect();
    if path.is_empty() {
        path = graph_path;
    }
    if path.is_empty() {
        // Disconnected vault: march straight through the targets.
        path = targets.iter().map(|t| slugify(t)).collect();
        path.truncate(max_path_length);
    }

    if path.len() > max_path_length {
        return Err(MentorError::Agent {
            agent: AgentKind::Hermit.name().into(),
            message: format!(
                "planned path has {} steps, exceeding the limit of {max_path_length}",
                path.len()
            ),
        });
    }

    let cognitive_weight = {
        let engine = ctx.links.read().await;
        engine.cognitive_weight(&path)
    };
    let rationale = parsed
        .as_ref()
        .and_then(|v| v.get("rationale"))
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| outcome.content.clone());

    Ok(AgentResult::new(AgentKind::Hermit.name(), rationale)
        .with_confidence(confidence_or(parsed.as_ref(), 0.6))
        .with_metadata(json!({
            "path": path,
            "cognitive_weight": cognitive_weight,
            "backbone_nodes": backbone.nodes.iter().cloned().collect::<Vec<_>>(),
            "intersections": backbone.intersections.iter().cloned().collect::<Vec<_>>(),
        })))
}
