//! Append-only conversation history with lossless, reference-substituting
//! compaction.
//!
//! Turns are never rewritten or deleted; indices are stable for the life of
//! a session. Compaction replaces the oldest observation payloads with
//! references to files holding the original content, so nothing the model
//! said or saw is lost.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::MentorResult;
use crate::types::ChatRole;

/// Disk store for externalised payloads, keyed by a stable reference.
#[derive(Debug, Clone)]
pub struct ExternalStore {
    dir: PathBuf,
}

impl ExternalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, reference: &str) -> PathBuf {
        self.dir.join(format!("{reference}.md"))
    }

    /// Write content under a stable reference, returning its path.
    pub async fn externalise(&self, reference: &str, content: &str) -> MentorResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(reference);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Read back an externalised payload.
    pub async fn resolve(&self, reference: &str) -> MentorResult<String> {
        Ok(tokio::fs::read_to_string(self.path_for(reference)).await?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Payload of a single turn: inline text, or a reference to externalised
/// content after compaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnPayload {
    Inline(String),
    External {
        reference: String,
        path: PathBuf,
        preview: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: ChatRole,
    /// Observation turns (tool results fed back to the model) are the only
    /// compactable kind; action text is always preserved verbatim.
    pub is_observation: bool,
    pub payload: TurnPayload,
}

impl Turn {
    pub fn text(&self) -> String {
        match &self.payload {
            TurnPayload::Inline(text) => text.clone(),
            TurnPayload::External {
                reference,
                path,
                preview,
            } => format!(
                "[externalised {reference} -> {}] {preview}",
                path.display()
            ),
        }
    }

    pub fn estimate_tokens(&self) -> usize {
        (self.text().len() + 3) / 4 + 4
    }
}

/// Append-only ordered sequence of turns with structural sharing: untouched
/// turns are shared between pre- and post-compaction views.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<Arc<Turn>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.push(ChatRole::User, false, text.into());
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.push(ChatRole::Assistant, false, text.into());
    }

    /// Append a tool-observation turn (delivered to the model as user role).
    pub fn append_observation(&mut self, text: impl Into<String>) {
        self.push(ChatRole::User, true, text.into());
    }

    fn push(&mut self, role: ChatRole, is_observation: bool, text: String) {
        self.turns.push(Arc::new(Turn {
            role,
            is_observation,
            payload: TurnPayload::Inline(text),
        }));
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Arc<Turn>] {
        &self.turns
    }

    pub fn estimate_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.estimate_tokens()).sum()
    }

    /// Compact oldest observation payloads into external references until
    /// the history fits `budget_tokens × ratio`, or no candidates remain.
    /// Returns how many payloads were externalised. Lossless: originals are
    /// written to `store` keyed by `turn-<index>`.
    pub async fn compact(
        &mut self,
        store: &ExternalStore,
        budget_tokens: usize,
        ratio: f64,
    ) -> MentorResult<usize> {
        let target = (budget_tokens as f64 * ratio.clamp(0.0, 1.0)) as usize;
        if self.estimate_tokens() <= budget_tokens {
            return Ok(0);
        }

        let mut externalised = 0;
        for index in 0..self.turns.len() {
            if self.estimate_tokens() <= target {
                break;
            }
            let (role, content) = {
                let turn = &self.turns[index];
                if !turn.is_observation {
                    continue;
                }
                let TurnPayload::Inline(content) = &turn.payload else {
                    continue;
                };
                (turn.role, content.clone())
            };

            let reference = format!("turn-{index:06}");
            let path = store.externalise(&reference, &content).await?;
            let preview: String = content.chars().take(100).collect();
            self.turns[index] = Arc::new(Turn {
                role,
                is_observation: true,
                payload: TurnPayload::External {
                    reference,
                    path,
                    preview,
                },
            });
            externalised += 1;
        }

        if externalised > 0 {
            debug!(externalised, "history compacted");
        }
        Ok(externalised)
    }

    /// Render the last `max_turns` turns for prompt inclusion.
    pub fn render_recent(&self, max_turns: usize) -> String {
        let start = self.turns.len().saturating_sub(max_turns);
        let mut out = String::new();
        for turn in &self.turns[start..] {
            out.push_str(&format!("[{}] {}\n", turn.role, turn.text()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ExternalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ExternalStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn history_is_append_only() {
        let mut history = History::new();
        history.append_user("ask");
        history.append_assistant("answer");
        let snapshot: Vec<String> = history.turns().iter().map(|t| t.text()).collect();

        history.append_observation("tool said ok");
        // earlier entries are untouched by later appends
        for (i, text) in snapshot.iter().enumerate() {
            assert_eq!(&history.turns()[i].text(), text);
        }
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn compaction_externalises_only_observations() {
        let (_dir, store) = store();
        let mut history = History::new();
        history.append_user("learn about markov chains");
        history.append_assistant("calling the priestess");
        history.append_observation("x".repeat(2000));
        history.append_observation("y".repeat(2000));
        history.append_assistant("final answer");

        let before = history.estimate_tokens();
        let externalised = history.compact(&store, 200, 0.7).await.unwrap();
        assert!(externalised >= 1);
        assert!(history.estimate_tokens() < before);

        // action text untouched
        assert_eq!(history.turns()[0].text(), "learn about markov chains");
        assert_eq!(history.turns()[1].text(), "calling the priestess");
        assert_eq!(history.turns()[4].text(), "final answer");
        // indices preserved
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn compaction_is_lossless() {
        let (_dir, store) = store();
        let mut history = History::new();
        let original = "observation ".repeat(500);
        history.append_observation(original.clone());

        history.compact(&store, 10, 0.5).await.unwrap();
        let TurnPayload::External { reference, .. } = &history.turns()[0].payload else {
            panic!("expected externalised payload");
        };
        let recovered = store.resolve(reference).await.unwrap();
        assert_eq!(recovered, original);
    }

    #[tokio::test]
    async fn compaction_noop_under_budget() {
        let (_dir, store) = store();
        let mut history = History::new();
        history.append_observation("small");
        let externalised = history.compact(&store, 10_000, 0.7).await.unwrap();
        assert_eq!(externalised, 0);
        assert!(matches!(
            history.turns()[0].payload,
            TurnPayload::Inline(_)
        ));
    }

    #[tokio::test]
    async fn compaction_oldest_first() {
        let (_dir, store) = store();
        let mut history = History::new();
        history.append_observation("a".repeat(1000));
        history.append_observation("b".repeat(1000));
        history.append_observation("c".repeat(40));

        // target leaves room for roughly the last two
        history.compact(&store, 500, 0.9).await.unwrap();
        assert!(matches!(
            history.turns()[0].payload,
            TurnPayload::External { .. }
        ));
        assert!(matches!(
            history.turns()[2].payload,
            TurnPayload::Inline(_)
        ));
    }

    #[test]
    fn render_recent_bounds_turns() {
        let mut history = History::new();
        for i in 0..10 {
            history.append_user(format!("turn {i}"));
        }
        let rendered = history.render_recent(3);
        assert!(rendered.contains("turn 7"));
        assert!(rendered.contains("turn 9"));
        assert!(!rendered.contains("turn 6"));
    }

    #[test]
    fn external_payload_renders_reference() {
        let turn = Turn {
            role: ChatRole::User,
            is_observation: true,
            payload: TurnPayload::External {
                reference: "turn-000003".into(),
                path: PathBuf::from("/tmp/ctx/turn-000003.md"),
                preview: "preview text".into(),
            },
        };
        let text = turn.text();
        assert!(text.contains("turn-000003"));
        assert!(text.contains("preview text"));
    }
}
