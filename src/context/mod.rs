//! Prompt construction under KV-cache discipline.
//!
//! The prompt is: (1) a static system prefix, (2) the tool catalogue
//! serialized deterministically, (3) a tiered note block, (4) user state,
//! (5) bounded recent history. Sections 1–2 are byte-identical across every
//! turn of a session — no timestamps, ids or random tokens appear before
//! the dynamic sections — so provider-side KV caches stay warm.

mod history;

pub use history::{ExternalStore, History, Turn, TurnPayload};

use crate::config::ContextConfig;
use crate::error::MentorResult;
use crate::toolloop::TOOL_REQUEST_TEMPLATE;
use crate::vault::Note;

/// Fixed separator between prompt sections.
pub const SECTION_DELIMITER: &str = "\n\n=====\n\n";

/// One entry in the tool catalogue (an agent or auxiliary tool).
#[derive(Debug, Clone)]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
}

/// A note with its relevance to the current query, ready for tiering.
#[derive(Debug, Clone)]
pub struct RankedNote {
    pub slug: String,
    pub relevance: f64,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub outgoing: Vec<String>,
}

impl RankedNote {
    pub fn from_note(note: &Note, relevance: f64, outgoing: Vec<String>) -> Self {
        Self {
            slug: note.slug.clone(),
            relevance,
            title: note.title().to_string(),
            summary: note.effective_summary(),
            body: note.body.clone(),
            outgoing,
        }
    }
}

/// Short-lived learner state rendered into the dynamic prompt sections.
#[derive(Debug, Clone, Default)]
pub struct UserState {
    pub query: String,
    pub known_concepts: Vec<String>,
    pub target_concepts: Vec<String>,
}

/// Notes grouped into inclusion tiers.
#[derive(Debug, Default)]
pub struct TierSelection<'a> {
    pub full: Vec<&'a RankedNote>,
    pub summary: Vec<&'a RankedNote>,
    pub title: Vec<&'a RankedNote>,
}

/// Builds prompts for every agent turn in a session.
pub struct PromptBuilder {
    config: ContextConfig,
    /// Sections 1 + 2, frozen at construction
    prefix: String,
}

impl PromptBuilder {
    pub fn new(
        config: ContextConfig,
        system_prefix: &str,
        tools: &[ToolCatalogEntry],
    ) -> Self {
        let mut sorted: Vec<&ToolCatalogEntry> = tools.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut catalogue = String::from("## Tools\n\n");
        for tool in &sorted {
            catalogue.push_str(&format!("- **{}**: {}\n", tool.name, tool.description));
        }
        catalogue.push_str("\n**Tool Call Format:**\n");
        catalogue.push_str(TOOL_REQUEST_TEMPLATE);

        let prefix = format!("{system_prefix}{SECTION_DELIMITER}{catalogue}");
        Self { config, prefix }
    }

    /// The byte-stable prompt prefix (static system text + tool catalogue).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Assign ranked notes to tiers: walk by descending relevance, placing
    /// each note in the best tier that still has capacity and whose
    /// threshold it meets. Within each tier the output is slug-sorted.
    pub fn select_tiers<'a>(&self, ranked: &'a [RankedNote]) -> TierSelection<'a> {
        let mut ordered: Vec<&RankedNote> = ranked.iter().collect();
        ordered.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.slug.cmp(&b.slug))
        });

        let mut tiers = TierSelection::default();
        for note in ordered {
            if note.relevance >= self.config.threshold_full
                && tiers.full.len() < self.config.max_full_notes
            {
                tiers.full.push(note);
            } else if note.relevance >= self.config.threshold_summary
                && tiers.summary.len() < self.config.max_summary_notes
            {
                tiers.summary.push(note);
            } else if note.relevance >= self.config.threshold_title
                && tiers.title.len() < self.config.max_title_notes
            {
                tiers.title.push(note);
            }
        }
        tiers.full.sort_by(|a, b| a.slug.cmp(&b.slug));
        tiers.summary.sort_by(|a, b| a.slug.cmp(&b.slug));
        tiers.title.sort_by(|a, b| a.slug.cmp(&b.slug));
        tiers
    }

    /// Render the tiered note block. Bodies above the byte cap are
    /// externalised through `store` and represented by their path plus the
    /// note summary, keeping the block bounded.
    pub async fn render_note_block(
        &self,
        ranked: &[RankedNote],
        store: &ExternalStore,
    ) -> MentorResult<String> {
        let tiers = self.select_tiers(ranked);
        let mut block = String::from("## Notes\n");

        if !tiers.full.is_empty() {
            block.push_str("\n### Full\n");
            for note in &tiers.full {
                block.push_str(&format!("\n#### {}\ntitle: {}\n", note.slug, note.title));
                if note.body.len() > self.config.max_note_bytes {
                    let reference = format!("note-{}", note.slug.replace('/', "_"));
                    let path = store.externalise(&reference, &note.body).await?;
                    block.push_str(&format!(
                        "external: {}\nsummary: {}\n",
                        path.display(),
                        note.summary
                    ));
                } else {
                    block.push_str(&note.body);
                    if !note.body.ends_with('\n') {
                        block.push('\n');
                    }
                }
            }
        }

        if !tiers.summary.is_empty() {
            block.push_str("\n### Summaries\n");
            for note in &tiers.summary {
                block.push_str(&format!(
                    "\n#### {}\ntitle: {}\nsummary: {}\nlinks: {}\n",
                    note.slug,
                    note.title,
                    note.summary,
                    note.outgoing.join(", ")
                ));
            }
        }

        if !tiers.title.is_empty() {
            block.push_str("\n### Titles\n\n");
            for note in &tiers.title {
                let links: Vec<&str> =
                    note.outgoing.iter().take(3).map(String::as_str).collect();
                if links.is_empty() {
                    block.push_str(&format!("- {}: {}\n", note.slug, note.title));
                } else {
                    block.push_str(&format!(
                        "- {}: {} (links: {})\n",
                        note.slug,
                        note.title,
                        links.join(", ")
                    ));
                }
            }
        }

        Ok(block)
    }

    /// Render the learner-state section (stable field order).
    fn render_user_state(state: &UserState) -> String {
        format!(
            "## Learner State\nknown: {}\nquery: {}\ntargets: {}\n",
            state.known_concepts.join(", "),
            state.query,
            state.target_concepts.join(", ")
        )
    }

    /// Assemble the whole prompt: stable prefix, an agent-specific fragment
    /// (constant within one agent's turns), then the dynamic sections.
    pub async fn build(
        &self,
        fragment: &str,
        ranked: &[RankedNote],
        state: &UserState,
        history: &History,
        store: &ExternalStore,
    ) -> MentorResult<String> {
        let notes = self.render_note_block(ranked, store).await?;
        let mut prompt = String::with_capacity(self.prefix.len() + notes.len() + 1024);
        prompt.push_str(&self.prefix);
        if !fragment.is_empty() {
            prompt.push_str(SECTION_DELIMITER);
            prompt.push_str(fragment);
        }
        prompt.push_str(SECTION_DELIMITER);
        prompt.push_str(&notes);
        prompt.push_str(SECTION_DELIMITER);
        prompt.push_str(&Self::render_user_state(state));
        if !history.is_empty() {
            prompt.push_str(SECTION_DELIMITER);
            prompt.push_str("## Recent History\n");
            prompt.push_str(&history.render_recent(self.config.max_history_turns));
        }
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(slug: &str, relevance: f64) -> RankedNote {
        RankedNote {
            slug: slug.into(),
            relevance,
            title: slug.to_uppercase(),
            summary: format!("summary of {slug}"),
            body: format!("body of {slug}"),
            outgoing: vec!["alpha".into(), "beta".into(), "gamma".into(), "delta".into()],
        }
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new(
            ContextConfig::default(),
            "You are a learning orchestrator.",
            &[
                ToolCatalogEntry {
                    name: "the_hermit".into(),
                    description: "plans paths".into(),
                },
                ToolCatalogEntry {
                    name: "justice".into(),
                    description: "checks understanding".into(),
                },
            ],
        )
    }

    fn store() -> (tempfile::TempDir, ExternalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ExternalStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn prefix_is_stable_and_sorted() {
        let b1 = builder();
        let b2 = builder();
        assert_eq!(b1.prefix(), b2.prefix());
        // sorted by name: justice before the_hermit
        let justice = b1.prefix().find("**justice**").unwrap();
        let hermit = b1.prefix().find("**the_hermit**").unwrap();
        assert!(justice < hermit);
        assert!(b1.prefix().contains("TOOL_REQUEST"));
    }

    #[test]
    fn tier_selection_matches_thresholds() {
        // 2 full-qualified, 6 summary-band, 20 title-band
        let mut notes = Vec::new();
        for i in 0..2 {
            notes.push(ranked(&format!("full{i}"), 0.9));
        }
        for i in 0..6 {
            notes.push(ranked(&format!("sum{i}"), 0.6));
        }
        for i in 0..20 {
            notes.push(ranked(&format!("title{i:02}"), 0.3));
        }

        let builder = builder();
        let tiers = builder.select_tiers(&notes);
        assert_eq!(tiers.full.len(), 2);
        assert_eq!(tiers.summary.len(), 5);
        assert_eq!(tiers.title.len(), 10);

        // slug-sorted within tiers
        let summary_slugs: Vec<&str> = tiers.summary.iter().map(|n| n.slug.as_str()).collect();
        let mut sorted = summary_slugs.clone();
        sorted.sort();
        assert_eq!(summary_slugs, sorted);

        // the 6th summary-band note overflows into the title tier
        assert!(tiers.title.iter().any(|n| n.slug.starts_with("sum")));
    }

    #[test]
    fn overflow_full_note_falls_to_summary() {
        let notes: Vec<RankedNote> = (0..5).map(|i| ranked(&format!("n{i}"), 0.95)).collect();
        let builder = builder();
        let tiers = builder.select_tiers(&notes);
        assert_eq!(tiers.full.len(), 3);
        assert_eq!(tiers.summary.len(), 2);
    }

    #[test]
    fn below_title_threshold_omitted() {
        let notes = vec![ranked("noise", 0.1)];
        let builder = builder();
        let tiers = builder.select_tiers(&notes);
        assert!(tiers.full.is_empty());
        assert!(tiers.summary.is_empty());
        assert!(tiers.title.is_empty());
    }

    #[tokio::test]
    async fn note_block_renders_tiers_deterministically() {
        let (_dir, store) = store();
        let notes = vec![
            ranked("zeta", 0.9),
            ranked("alpha", 0.9),
            ranked("mid", 0.6),
            ranked("low", 0.3),
        ];
        let builder = builder();
        let block1 = builder.render_note_block(&notes, &store).await.unwrap();
        let block2 = builder.render_note_block(&notes, &store).await.unwrap();
        assert_eq!(block1, block2);

        // full tier in slug order
        let alpha = block1.find("#### alpha").unwrap();
        let zeta = block1.find("#### zeta").unwrap();
        assert!(alpha < zeta);
        assert!(block1.contains("body of alpha"));
        assert!(block1.contains("summary: summary of mid"));
        // title tier caps outgoing at three
        assert!(block1.contains("- low: LOW (links: alpha, beta, gamma)"));
        assert!(!block1.contains("delta)"));
    }

    #[tokio::test]
    async fn oversized_body_is_externalised() {
        let (_dir, store) = store();
        let mut big = ranked("big", 0.9);
        big.body = "x".repeat(10_000);
        let builder = builder();
        let block = builder.render_note_block(&[big], &store).await.unwrap();

        assert!(block.contains("external: "));
        assert!(block.contains("summary: summary of big"));
        assert!(!block.contains(&"x".repeat(200)));
        let recovered = store.resolve("note-big").await.unwrap();
        assert_eq!(recovered.len(), 10_000);
    }

    #[tokio::test]
    async fn build_starts_with_stable_prefix() {
        let (_dir, store) = store();
        let builder = builder();
        let state = UserState {
            query: "learn markov chains".into(),
            known_concepts: vec!["probability".into()],
            target_concepts: vec!["markov_chain".into()],
        };
        let mut history = History::new();
        history.append_user("start");

        let fragment = "You are the path planner.";
        let prompt1 = builder
            .build(fragment, &[ranked("a", 0.9)], &state, &history, &store)
            .await
            .unwrap();
        history.append_assistant("working");
        let prompt2 = builder
            .build(
                fragment,
                &[ranked("a", 0.9), ranked("b", 0.6)],
                &state,
                &history,
                &store,
            )
            .await
            .unwrap();

        // prefix bytes identical across turns
        assert!(prompt1.starts_with(builder.prefix()));
        assert!(prompt2.starts_with(builder.prefix()));
        assert_eq!(
            &prompt1[..builder.prefix().len()],
            &prompt2[..builder.prefix().len()]
        );
        assert!(prompt2.contains("## Learner State"));
        assert!(prompt2.contains("known: probability"));
        assert!(prompt2.contains("## Recent History"));
    }
}
