//! Vault access: markdown notes with YAML front-matter and `[[wiki-links]]`.
//!
//! The vault directory is the source of truth; every index over it is a
//! cache that can be rebuilt from the files alone.

mod parse;
mod store;

pub use parse::{extract_wiki_links, parse_note, slugify, split_front_matter, WikiLink};
pub use store::NoteStore;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recognised front-matter keys; anything else is preserved in `extra`.
///
/// Field order here is the serialization order, which keeps written
/// front-matter byte-stable across round trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastery_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl FrontMatter {
    pub fn is_empty(&self) -> bool {
        self == &FrontMatter::default()
    }
}

/// A parsed note: slug identity, front-matter and verbatim body.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub slug: String,
    pub front: FrontMatter,
    pub body: String,
}

impl Note {
    /// Display title: front-matter title, or the last slug segment.
    pub fn title(&self) -> &str {
        self.front
            .title
            .as_deref()
            .unwrap_or_else(|| self.slug.rsplit('/').next().unwrap_or(&self.slug))
    }

    /// All wiki-link occurrences in document order.
    pub fn links(&self) -> Vec<WikiLink> {
        extract_wiki_links(&self.body)
    }

    /// Ordered, de-duplicated outgoing link targets (index keys).
    pub fn link_slugs(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for link in self.links() {
            if seen.insert(link.slug.clone()) {
                out.push(link.slug);
            }
        }
        out
    }

    /// Summary for prompt tiers: front-matter summary, else the first
    /// paragraph truncated to 200 characters.
    pub fn effective_summary(&self) -> String {
        if let Some(summary) = &self.front.summary {
            return summary.clone();
        }
        let first_para = self.body.split("\n\n").next().unwrap_or("").trim();
        if first_para.chars().count() > 200 {
            let cut: String = first_para.chars().take(200).collect();
            format!("{cut}...")
        } else {
            first_para.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(slug: &str, body: &str) -> Note {
        Note {
            slug: slug.into(),
            front: FrontMatter::default(),
            body: body.into(),
        }
    }

    #[test]
    fn title_falls_back_to_slug_tail() {
        let n = note("math/markov_chain", "body");
        assert_eq!(n.title(), "markov_chain");

        let mut titled = note("x", "body");
        titled.front.title = Some("Markov Chain".into());
        assert_eq!(titled.title(), "Markov Chain");
    }

    #[test]
    fn link_slugs_deduplicate_in_order() {
        let n = note("a", "[[B]] [[C]] [[B]] [[c]]");
        assert_eq!(n.link_slugs(), vec!["b", "c"]);
    }

    #[test]
    fn effective_summary_prefers_front_matter() {
        let mut n = note("a", "First paragraph here.\n\nSecond.");
        assert_eq!(n.effective_summary(), "First paragraph here.");

        n.front.summary = Some("Curated summary".into());
        assert_eq!(n.effective_summary(), "Curated summary");
    }

    #[test]
    fn effective_summary_truncates_long_paragraph() {
        let n = note("a", &"x".repeat(300));
        let summary = n.effective_summary();
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 203);
    }

    #[test]
    fn front_matter_is_empty() {
        assert!(FrontMatter::default().is_empty());
        let mut front = FrontMatter::default();
        front.tags.push("math".into());
        assert!(!front.is_empty());
    }
}
