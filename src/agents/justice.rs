//! Justice: comprehension check.
//!
//! Derives 3–5 questions from the Magician's drafts, each targeting a link
//! the learner must now form. Scores answers when they are supplied with
//! the query arguments; otherwise the questions are emitted for later.

use serde_json::json;

use super::{confidence_or, extract_json, string_list, AgentContext, AgentKind};
use crate::context::{History, UserState};
use crate::error::{MentorError, MentorResult};
use crate::session::LearningSession;
use crate::types::AgentResult;
use crate::vault::extract_wiki_links;

pub(super) const PROMPT_FRAGMENT: &str = "## Role: Justice\n\nYou evaluate understanding. From the drafted content, write 3 to 5 questions that each probe one link the learner must now form between concepts. Questions should require connecting ideas, not recalling definitions. If learner answers are provided, score each in [0, 1] with a short justification.\n\nRespond with a JSON object: {\"questions\": [{\"prompt\": string, \"target_link\": \"a -> b\"}], \"scores\": [numbers] (only when answers were given), \"rationale\": string, \"confidence\": 0.0-1.0}";

const MIN_QUESTIONS: usize = 3;
const MAX_QUESTIONS: usize = 5;

pub(super) async fn run(
    ctx: &AgentContext,
    session: &LearningSession,
    history: &mut History,
    query: &str,
) -> MentorResult<AgentResult> {
    let generation = session
        .stage_result(AgentKind::Magician.name())
        .ok_or_else(|| MentorError::Agent {
            agent: AgentKind::Justice.name().into(),
            message: "no generated content to evaluate".into(),
        })?;

    // Links present in the drafts are the ones worth probing.
    let mut target_links: Vec<(String, String)> = Vec::new();
    if let Some(drafts) = generation.metadata.get("drafts").and_then(|d| d.as_array()) {
        for draft in drafts {
            let (Some(slug), Some(content)) = (
                draft.get("slug").and_then(|s| s.as_str()),
                draft.get("content").and_then(|c| c.as_str()),
            ) else {
                continue;
            };
            for link in extract_wiki_links(content) {
                let pair = (slug.to_string(), link.slug);
                if !target_links.contains(&pair) {
                    target_links.push(pair);
                }
            }
        }
    }

    let known = session
        .stage_result(AgentKind::HighPriestess.name())
        .map(|r| string_list(&r.metadata, "known_concepts"))
        .unwrap_or_default();
    let ranked = ctx.ranked_notes(query, 20).await;
    let state = UserState {
        query: query.to_string(),
        known_concepts: known,
        target_concepts: string_list(&generation.metadata, "steps"),
    };
    let outcome = ctx
        .run_turns(
            AgentKind::Justice,
            &ranked,
            &state,
            history,
            &format!(
                "Write comprehension questions for the new content.\nLinks to probe: {}\n{query}",
                target_links
                    .iter()
                    .map(|(a, b)| format!("{a} -> {b}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )
        .await?;

    let parsed = extract_json(&outcome.content);
    let mut questions: Vec<serde_json::Value> = parsed
        .as_ref()
        .and_then(|v| v.get("questions"))
        .and_then(|q| q.as_array())
        .cloned()
        .unwrap_or_default();

    // Guarantee the 3–5 band from the probed links when the model fell
    // short.
    if questions.len() < MIN_QUESTIONS {
        for (from, to) in &target_links {
            if questions.len() >= MIN_QUESTIONS {
                break;
            }
            questions.push(json!({
                "prompt": format!(
                    "How does {} relate to {}?",
                    from.replace('_', " "),
                    to.replace('_', " ")
                ),
                "target_link": format!("{from} -> {to}"),
            }));
        }
    }
    questions.truncate(MAX_QUESTIONS);

    let scores = parsed
        .as_ref()
        .and_then(|v| v.get("scores"))
        .and_then(|s| s.as_array())
        .map(|s| {
            s.iter()
                .filter_map(|x| x.as_f64())
                .map(|x| x.clamp(0.0, 1.0))
                .collect::<Vec<f64>>()
        });

    let rationale = parsed
        .as_ref()
        .and_then(|v| v.get("rationale"))
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| outcome.content.clone());

    let mut metadata = json!({
        "questions": questions,
        "target_links": target_links
            .iter()
            .map(|(a, b)| format!("{a} -> {b}"))
            .collect::<Vec<_>>(),
    });
    if let Some(scores) = scores {
        metadata["scores"] = json!(scores);
    }

    Ok(AgentResult::new(AgentKind::Justice.name(), rationale)
        .with_confidence(confidence_or(parsed.as_ref(), 0.6))
        .with_metadata(metadata))
}
