//! Front-matter and wiki-link extraction for vault notes.

use std::sync::LazyLock;

use regex::Regex;

use super::FrontMatter;
use crate::error::{MentorError, MentorResult};

static WIKI_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid wiki-link regex"));

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]*`").expect("valid inline-code regex"));

/// A `[[wiki-link]]` occurrence in a note body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLink {
    /// Normalised index key (lower-case, whitespace collapsed to `_`)
    pub slug: String,
    /// Target exactly as written, for rendering
    pub display: String,
    /// Alias after `|`, if present
    pub alias: Option<String>,
}

/// Normalise a link target or path component into an index key.
///
/// Lower-cases and collapses whitespace runs into a single underscore; the
/// display form is kept separately for rendering.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut in_gap = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            in_gap = true;
            continue;
        }
        if in_gap {
            slug.push('_');
            in_gap = false;
        }
        for lower in ch.to_lowercase() {
            slug.push(lower);
        }
    }
    slug
}

/// Split a note file into its YAML front-matter block and body.
///
/// The front-matter is the text between two leading `---` fences; a file
/// without fences has an empty front-matter and the whole content is body.
pub fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let trimmed = content.trim_start_matches('\u{feff}');
    if !trimmed.starts_with("---") {
        return (None, content);
    }
    let after_open = &trimmed[3..];
    let after_open = after_open.strip_prefix('\r').unwrap_or(after_open);
    let Some(after_open) = after_open.strip_prefix('\n') else {
        return (None, content);
    };
    let Some(end) = after_open.find("\n---") else {
        return (None, content);
    };
    let front = &after_open[..end];
    let body = &after_open[end + 4..];
    let body = body.trim_start_matches(['\r', '\n']);
    (Some(front), body)
}

/// Parse a note file into front-matter and body.
///
/// Returns `Parse` on malformed YAML; callers that must never abort (the
/// index rebuild) degrade to an empty front-matter instead.
pub fn parse_note(source_name: &str, content: &str) -> MentorResult<(FrontMatter, String)> {
    let (front_raw, body) = split_front_matter(content);
    let front = match front_raw {
        Some(raw) if !raw.trim().is_empty() => {
            serde_yaml::from_str(raw).map_err(|e| MentorError::Parse {
                source_name: source_name.to_string(),
                message: format!("invalid front-matter: {e}"),
            })?
        }
        _ => FrontMatter::default(),
    };
    Ok((front, body.to_string()))
}

/// Extract the ordered list of wiki-links from a note body.
///
/// Fenced code blocks, indented code blocks and inline code spans are not
/// scanned. Duplicate targets are kept; the index de-duplicates.
pub fn extract_wiki_links(body: &str) -> Vec<WikiLink> {
    let scannable = strip_code(body);
    let mut links = Vec::new();
    for capture in WIKI_LINK.captures_iter(&scannable) {
        let inner = capture[1].trim();
        if inner.is_empty() {
            continue;
        }
        let (target, alias) = match inner.split_once('|') {
            Some((t, a)) => (t.trim(), Some(a.trim().to_string())),
            None => (inner, None),
        };
        if target.is_empty() {
            continue;
        }
        links.push(WikiLink {
            slug: slugify(target),
            display: target.to_string(),
            alias,
        });
    }
    links
}

/// Replace code regions with blanks so link scanning skips them.
fn strip_code(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_fence = false;
    for line in body.lines() {
        let fence = line.trim_start().starts_with("```");
        if fence {
            in_fence = !in_fence;
            out.push('\n');
            continue;
        }
        if in_fence || line.starts_with("    ") || line.starts_with('\t') {
            out.push('\n');
            continue;
        }
        out.push_str(&INLINE_CODE.replace_all(line, ""));
        out.push('\n');
    }
    out
}
