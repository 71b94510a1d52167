//! The Magician: content generation.
//!
//! Drafts one note per path step. Every draft must link to at least one
//! previously-known concept and one path neighbor; drafts that come back
//! without the required links get them appended as a related-concepts line.

use serde_json::json;

use super::{confidence_or, extract_json, string_list, AgentContext, AgentKind};
use crate::context::{History, UserState};
use crate::error::{MentorError, MentorResult};
use crate::session::LearningSession;
use crate::types::AgentResult;
use crate::vault::{extract_wiki_links, slugify};

pub(super) const PROMPT_FRAGMENT: &str = "## Role: The Magician\n\nYou write learning content. For each step of the path, draft a short markdown note that teaches the concept in terms the learner already holds. Weave [[wiki-links]]: every draft must link to at least one known concept and at least one neighboring step on the path. Keep each draft focused on a single concept.\n\nRespond with a JSON object: {\"drafts\": [{\"slug\": string, \"title\": string, \"content\": markdown, \"tags\": [strings]}], \"rationale\": string, \"confidence\": 0.0-1.0}";

/// One generated note, pre-persistence.
#[derive(Debug, Clone)]
pub struct Draft {
    pub slug: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

pub(super) async fn run(
    ctx: &AgentContext,
    session: &LearningSession,
    history: &mut History,
    query: &str,
) -> MentorResult<AgentResult> {
    let plan = session
        .stage_result(AgentKind::Hermit.name())
        .ok_or_else(|| MentorError::Agent {
            agent: AgentKind::Magician.name().into(),
            message: "no learning path to generate content for".into(),
        })?;
    let path = string_list(&plan.metadata, "path");
    if path.is_empty() {
        return Err(MentorError::Agent {
            agent: AgentKind::Magician.name().into(),
            message: "learning path is empty".into(),
        });
    }
    let known = session
        .stage_result(AgentKind::HighPriestess.name())
        .map(|r| string_list(&r.metadata, "known_concepts"))
        .unwrap_or_default();

    let ranked = ctx.ranked_notes(query, 20).await;
    let state = UserState {
        query: query.to_string(),
        known_concepts: known.clone(),
        target_concepts: path.clone(),
    };
    let outcome = ctx
        .run_turns(
            AgentKind::Magician,
            &ranked,
            &state,
            history,
            &format!(
                "Generate one draft note per path step.\nPath: {}\nGoal: {query}",
                path.join(" -> ")
            ),
        )
        .await?;

    let parsed = extract_json(&outcome.content);
    let mut drafts = parse_drafts(parsed.as_ref());

    // One draft per step: synthesize any the model skipped, then enforce
    // the linking requirement on all of them.
    for (index, step) in path.iter().enumerate() {
        let step_slug = slugify(step);
        if !drafts.iter().any(|d| d.slug == step_slug) {
            drafts.push(Draft {
                slug: step_slug.clone(),
                title: step.replace('_', " "),
                content: format!("## {}\n\nA stepping stone toward the goal: {query}.\n", step.replace('_', " ")),
                tags: vec!["generated".into()],
            });
        }
        let draft = drafts
            .iter_mut()
            .find(|d| d.slug == step_slug)
            .expect("just ensured");
        ensure_required_links(draft, index, &path, &known);
    }

    let rationale = parsed
        .as_ref()
        .and_then(|v| v.get("rationale"))
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| outcome.content.clone());

    Ok(AgentResult::new(AgentKind::Magician.name(), rationale)
        .with_confidence(confidence_or(parsed.as_ref(), 0.6))
        .with_metadata(json!({
            "drafts": drafts
                .iter()
                .map(|d| json!({
                    "slug": d.slug,
                    "title": d.title,
                    "content": d.content,
                    "tags": d.tags,
                }))
                .collect::<Vec<_>>(),
            "steps": path,
        })))
}

fn parse_drafts(parsed: Option<&serde_json::Value>) -> Vec<Draft> {
    let Some(items) = parsed
        .and_then(|v| v.get("drafts"))
        .and_then(|d| d.as_array())
    else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let slug = slugify(item.get("slug")?.as_str()?);
            if slug.is_empty() {
                return None;
            }
            let content = item.get("content")?.as_str()?.to_string();
            let title = item
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or(&slug)
                .to_string();
            let tags = item
                .get("tags")
                .and_then(|t| t.as_array())
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some(Draft {
                slug,
                title,
                content,
                tags,
            })
        })
        .collect()
}

/// Append the mandated links when the draft lacks them: one to a known
/// concept, one to a path neighbor.
fn ensure_required_links(draft: &mut Draft, index: usize, path: &[String], known: &[String]) {
    let present: Vec<String> = extract_wiki_links(&draft.content)
        .into_iter()
        .map(|l| l.slug)
        .collect();

    let neighbor = neighbor_of(index, path);
    let mut additions: Vec<String> = Vec::new();

    if let Some(neighbor) = neighbor {
        if !present.contains(&slugify(&neighbor)) {
            additions.push(neighbor);
        }
    }
    let has_known = known.iter().any(|k| present.contains(&slugify(k)));
    if !has_known {
        if let Some(first_known) = known.iter().find(|k| slugify(k) != draft.slug) {
            let first_known = first_known.clone();
            if !additions.contains(&first_known) {
                additions.push(first_known);
            }
        }
    }

    if !additions.is_empty() {
        let links: Vec<String> = additions
            .into_iter()
            .map(|target| format!("[[{target}]]"))
            .collect();
        draft
            .content
            .push_str(&format!("\nRelated: {}\n", links.join(" ")));
    }
}

fn neighbor_of(index: usize, path: &[String]) -> Option<String> {
    if index + 1 < path.len() {
        Some(path[index + 1].clone())
    } else if index > 0 {
        Some(path[index - 1].clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_links_appends_missing() {
        let mut draft = Draft {
            slug: "markov_chain".into(),
            title: "Markov Chain".into(),
            content: "A chain of states.".into(),
            tags: vec![],
        };
        let path = vec!["stochastic_process".into(), "markov_chain".into()];
        let known = vec!["probability".into()];
        ensure_required_links(&mut draft, 1, &path, &known);

        assert!(draft.content.contains("[[stochastic_process]]"));
        assert!(draft.content.contains("[[probability]]"));
    }

    #[test]
    fn ensure_links_keeps_existing() {
        let original = "Builds on [[probability]] and [[stochastic_process]].";
        let mut draft = Draft {
            slug: "markov_chain".into(),
            title: "Markov Chain".into(),
            content: original.into(),
            tags: vec![],
        };
        let path = vec!["stochastic_process".into(), "markov_chain".into()];
        let known = vec!["probability".into()];
        ensure_required_links(&mut draft, 1, &path, &known);
        assert_eq!(draft.content, original);
    }

    #[test]
    fn neighbor_selection() {
        let path: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(neighbor_of(0, &path), Some("b".into()));
        assert_eq!(neighbor_of(1, &path), Some("c".into()));
        assert_eq!(neighbor_of(2, &path), Some("b".into()));
        assert_eq!(neighbor_of(0, &path[..1].to_vec()), None);
    }

    #[test]
    fn parse_drafts_tolerant() {
        let value = serde_json::json!({
            "drafts": [
                {"slug": "Markov Chain", "title": "Markov Chain", "content": "text", "tags": ["math"]},
                {"slug": "", "content": "dropped"},
                {"title": "no slug"},
            ]
        });
        let drafts = parse_drafts(Some(&value));
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].slug, "markov_chain");
        assert_eq!(drafts[0].tags, vec!["math"]);
    }
}
