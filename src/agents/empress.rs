//! The Empress: memory consolidation.
//!
//! Persists the Magician's drafts through the note store and folds each
//! write into the link index. Writes are individually atomic; the group is
//! not transactional — partial progress is reported, not rolled back.

use serde_json::json;
use tracing::{info, warn};

use super::{string_list, AgentContext, AgentKind};
use crate::context::History;
use crate::error::{MentorError, MentorResult};
use crate::session::LearningSession;
use crate::types::AgentResult;
use crate::vault::FrontMatter;

pub(super) const PROMPT_FRAGMENT: &str = "## Role: The Empress\n\nYou consolidate new knowledge into the vault: persist the drafted notes, connect them to the existing graph, and report what changed.";

pub(super) async fn run(
    ctx: &AgentContext,
    session: &LearningSession,
    history: &mut History,
    query: &str,
) -> MentorResult<AgentResult> {
    let generation = session
        .stage_result(AgentKind::Magician.name())
        .ok_or_else(|| MentorError::Agent {
            agent: AgentKind::Empress.name().into(),
            message: "no drafts to consolidate".into(),
        })?;
    let Some(drafts) = generation.metadata.get("drafts").and_then(|d| d.as_array()) else {
        return Err(MentorError::Agent {
            agent: AgentKind::Empress.name().into(),
            message: "draft metadata is malformed".into(),
        });
    };

    let mut created: Vec<String> = Vec::new();
    let mut modified: Vec<String> = Vec::new();
    let mut failed: Vec<String> = Vec::new();
    let mut new_links: Vec<(String, String)> = Vec::new();

    for draft in drafts {
        let (Some(slug), Some(content)) = (
            draft.get("slug").and_then(|s| s.as_str()),
            draft.get("content").and_then(|c| c.as_str()),
        ) else {
            warn!("skipping draft without slug or content");
            continue;
        };
        let title = draft
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or(slug)
            .to_string();
        let tags: Vec<String> = draft
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let existed = ctx.store.read(slug).await.is_ok();
        let front = FrontMatter {
            title: Some(title),
            tags,
            summary: Some(first_line(content)),
            ..Default::default()
        };

        match ctx.store.write(slug, front, content).await {
            Ok(note) => {
                // Index update happens under the write lock, after the file
                // is durably in place.
                ctx.links.apply_write(&note).await;
                let outgoing = {
                    let engine = ctx.links.read().await;
                    engine.index().outgoing(&note.slug).to_vec()
                };
                for target in outgoing {
                    new_links.push((note.slug.clone(), target));
                }
                if existed {
                    modified.push(note.slug);
                } else {
                    created.push(note.slug);
                }
            }
            Err(e) => {
                warn!(slug, error = %e, "draft write failed");
                failed.push(format!("{slug}: {e}"));
            }
        }
    }

    if created.is_empty() && modified.is_empty() && !failed.is_empty() {
        return Err(MentorError::Agent {
            agent: AgentKind::Empress.name().into(),
            message: format!("every draft write failed: {}", failed.join("; ")),
        });
    }

    info!(
        created = created.len(),
        modified = modified.len(),
        failed = failed.len(),
        "consolidation committed"
    );

    let summary = format!(
        "Consolidated learning for \"{query}\": created {} note(s), updated {} note(s), wove {} link(s).",
        created.len(),
        modified.len(),
        new_links.len()
    );
    history.append_assistant(&summary);

    // Completeness of the path steps matters for confidence: partial
    // progress lowers it.
    let steps = string_list(&generation.metadata, "steps");
    let confidence = if steps.is_empty() {
        0.5
    } else {
        (created.len() + modified.len()) as f64 / steps.len() as f64
    };

    Ok(AgentResult::new(AgentKind::Empress.name(), summary)
        .with_confidence(confidence)
        .with_metadata(json!({
            "created": created,
            "modified": modified,
            "failed": failed,
            "new_links": new_links
                .iter()
                .map(|(a, b)| json!([a, b]))
                .collect::<Vec<_>>(),
        })))
}

fn first_line(content: &str) -> String {
    let line = content
        .lines()
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .unwrap_or("")
        .trim();
    let mut summary: String = line.chars().take(200).collect();
    if line.chars().count() > 200 {
        summary.push_str("...");
    }
    summary
}
