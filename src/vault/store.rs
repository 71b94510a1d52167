//! Path-safe, atomic note persistence under a fixed vault root.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use super::parse;
use super::{FrontMatter, Note};
use crate::error::{MentorError, MentorResult};

/// Reads and writes notes under a vault root directory.
///
/// Slugs map to `<root>/<slug>.md`; any slug whose resolved path would leave
/// the root is rejected with `PathEscape`. Writes go through a temp file in
/// the target directory followed by a rename.
pub struct NoteStore {
    root: PathBuf,
}

impl NoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a slug to its file path, rejecting traversal.
    fn resolve(&self, slug: &str) -> MentorResult<PathBuf> {
        if slug.is_empty() || slug.starts_with('/') {
            return Err(MentorError::PathEscape { path: slug.into() });
        }
        for component in slug.split('/') {
            if component.is_empty()
                || component == "."
                || component == ".."
                || component.contains('\\')
            {
                return Err(MentorError::PathEscape { path: slug.into() });
            }
        }
        Ok(self.root.join(format!("{slug}.md")))
    }

    /// Derive the slug for a markdown file inside the root.
    fn slug_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let rel = rel.to_str()?.strip_suffix(".md")?;
        let slug = rel
            .split('/')
            .map(parse::slugify)
            .collect::<Vec<_>>()
            .join("/");
        Some(slug)
    }

    /// List every note in the vault, sorted by slug.
    ///
    /// Files with malformed front-matter are kept with an empty
    /// front-matter and best-effort link extraction; a rebuild never aborts
    /// on a single bad file.
    pub async fn list(&self) -> MentorResult<Vec<Note>> {
        let mut notes = Vec::new();
        if !self.root.exists() {
            return Ok(notes);
        }

        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|ext| ext == "md") {
                    if let Some(slug) = self.slug_for(&path) {
                        match self.read_at(&slug, &path).await {
                            Ok(note) => notes.push(note),
                            Err(e) => warn!(slug, error = %e, "skipping unreadable note"),
                        }
                    }
                }
            }
        }

        notes.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(notes)
    }

    /// Read a single note.
    pub async fn read(&self, slug: &str) -> MentorResult<Note> {
        let path = self.resolve(slug)?;
        if !path.exists() {
            return Err(MentorError::NoteNotFound(slug.to_string()));
        }
        self.read_at(slug, &path).await
    }

    async fn read_at(&self, slug: &str, path: &Path) -> MentorResult<Note> {
        let content = tokio::fs::read_to_string(path).await?;
        let (front, body) = match parse::parse_note(slug, &content) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Malformed front-matter degrades to an empty one; the body
                // (past the fences, when present) is still usable.
                warn!(slug, error = %e, "malformed front-matter, treating as plain body");
                let (_, body) = parse::split_front_matter(&content);
                (FrontMatter::default(), body.to_string())
            }
        };
        Ok(Note {
            slug: slug.to_string(),
            front,
            body,
        })
    }

    /// Write a note atomically, preserving its creation timestamp on update.
    ///
    /// Returns the note as persisted (timestamps filled in).
    pub async fn write(
        &self,
        slug: &str,
        mut front: FrontMatter,
        body: &str,
    ) -> MentorResult<Note> {
        let path = self.resolve(slug)?;
        let now = Utc::now();

        if front.created.is_none() {
            front.created = match self.read_at(slug, &path).await {
                Ok(existing) => existing.front.created.or(Some(now)),
                Err(_) => Some(now),
            };
        }
        front.modified = Some(now);

        let rendered = render(&front, body)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temp file in the same directory so the rename is atomic.
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("note.md");
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, rendered.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(slug, bytes = body.len(), "note written");
        Ok(Note {
            slug: slug.to_string(),
            front,
            body: body.to_string(),
        })
    }

    /// Delete a note. Missing slugs surface as `NoteNotFound`.
    pub async fn delete(&self, slug: &str) -> MentorResult<()> {
        let path = self.resolve(slug)?;
        if !path.exists() {
            return Err(MentorError::NoteNotFound(slug.to_string()));
        }
        tokio::fs::remove_file(&path).await?;
        debug!(slug, "note deleted");
        Ok(())
    }
}

/// Render front-matter (stable key order) and body into file content.
fn render(front: &FrontMatter, body: &str) -> MentorResult<String> {
    if front.is_empty() {
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(front)?;
    Ok(format!("---\n{yaml}---\n\n{body}"))
}
