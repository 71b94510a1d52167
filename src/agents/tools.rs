//! Auxiliary vault tools the agents may invoke mid-turn.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MentorResult;
use crate::links::SharedLinkEngine;
use crate::toolloop::{ToolHandler, ToolRegistry, ToolRequest};
use crate::vault::NoteStore;

/// Rank notes against a free-text query.
pub struct SearchNotesTool {
    links: SharedLinkEngine,
}

impl SearchNotesTool {
    pub fn new(links: SharedLinkEngine) -> Self {
        Self { links }
    }
}

#[async_trait]
impl ToolHandler for SearchNotesTool {
    fn name(&self) -> &str {
        "search_notes"
    }

    fn description(&self) -> &str {
        "Search the vault for notes relevant to a query; returns slugs with scores"
    }

    async fn handle(&self, request: &ToolRequest) -> MentorResult<String> {
        let engine = self.links.read().await;
        let ranked = engine.keyword_match(&request.query, 10);
        if ranked.is_empty() {
            return Ok("No matching notes.".into());
        }
        Ok(ranked
            .into_iter()
            .map(|(slug, score)| format!("{slug} ({score:.2})"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Read one note's body and links.
pub struct ReadNoteTool {
    store: Arc<NoteStore>,
    links: SharedLinkEngine,
}

impl ReadNoteTool {
    pub fn new(store: Arc<NoteStore>, links: SharedLinkEngine) -> Self {
        Self { store, links }
    }
}

#[async_trait]
impl ToolHandler for ReadNoteTool {
    fn name(&self) -> &str {
        "read_note"
    }

    fn description(&self) -> &str {
        "Read a note by slug; returns its body with outgoing and incoming links"
    }

    async fn handle(&self, request: &ToolRequest) -> MentorResult<String> {
        let slug = crate::vault::slugify(request.query.trim());
        let note = self.store.read(&slug).await?;
        let engine = self.links.read().await;
        Ok(format!(
            "# {}\noutgoing: {}\nincoming: {}\n\n{}",
            note.title(),
            engine.index().outgoing(&slug).join(", "),
            engine.index().incoming(&slug).join(", "),
            note.body
        ))
    }
}

/// Shortest path between two slugs, `from -> to` in the query.
pub struct FindPathTool {
    links: SharedLinkEngine,
}

impl FindPathTool {
    pub fn new(links: SharedLinkEngine) -> Self {
        Self { links }
    }
}

#[async_trait]
impl ToolHandler for FindPathTool {
    fn name(&self) -> &str {
        "find_path"
    }

    fn description(&self) -> &str {
        "Find the shortest link path between two slugs, given as 'from -> to'"
    }

    async fn handle(&self, request: &ToolRequest) -> MentorResult<String> {
        let Some((from, to)) = request.query.split_once("->") else {
            return Ok("Expected query of the form 'from -> to'.".into());
        };
        let from = crate::vault::slugify(from.trim());
        let to = crate::vault::slugify(to.trim());
        let engine = self.links.read().await;
        let path = engine.shortest_path(&from, &to, engine.max_search_depth());
        if path.is_empty() {
            Ok(format!("No path between {from} and {to}."))
        } else {
            Ok(path.join(" -> "))
        }
    }
}

/// Register the auxiliary tools shared by every agent stage.
pub fn register_vault_tools(
    registry: &mut ToolRegistry,
    store: Arc<NoteStore>,
    links: SharedLinkEngine,
) {
    registry.register(Arc::new(SearchNotesTool::new(links.clone())));
    registry.register(Arc::new(ReadNoteTool::new(store, links.clone())));
    registry.register(Arc::new(FindPathTool::new(links)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinksConfig;
    use crate::links::LinkEngine;
    use crate::vault::FrontMatter;

    async fn fixture() -> (tempfile::TempDir, Arc<NoteStore>, SharedLinkEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NoteStore::new(dir.path()));
        store
            .write("probability", FrontMatter::default(), "See [[Random Variable]].")
            .await
            .unwrap();
        store
            .write("random_variable", FrontMatter::default(), "Built on [[Probability]].")
            .await
            .unwrap();

        let mut engine = LinkEngine::new(LinksConfig::default());
        engine.rebuild(&store.list().await.unwrap());
        (dir, store, SharedLinkEngine::new(engine))
    }

    fn request(query: &str) -> ToolRequest {
        ToolRequest {
            agent_type: "arcana".into(),
            agent_name: "test".into(),
            query: query.into(),
            arguments: Default::default(),
            raw: String::new(),
        }
    }

    #[tokio::test]
    async fn search_notes_ranks() {
        let (_dir, _store, links) = fixture().await;
        let tool = SearchNotesTool { links };
        let result = tool.handle(&request("probability")).await.unwrap();
        assert!(result.contains("probability"));
    }

    #[tokio::test]
    async fn read_note_includes_links() {
        let (_dir, store, links) = fixture().await;
        let tool = ReadNoteTool { store, links };
        let result = tool.handle(&request("Probability")).await.unwrap();
        assert!(result.contains("outgoing: random_variable"));
        assert!(result.contains("incoming: random_variable"));
        assert!(result.contains("See [[Random Variable]]"));

        assert!(tool.handle(&request("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn find_path_formats() {
        let (_dir, _store, links) = fixture().await;
        let tool = FindPathTool { links };
        let result = tool
            .handle(&request("Probability -> Random Variable"))
            .await
            .unwrap();
        assert_eq!(result, "probability -> random_variable");

        let no_arrow = tool.handle(&request("nonsense")).await.unwrap();
        assert!(no_arrow.contains("Expected query"));
    }
}
