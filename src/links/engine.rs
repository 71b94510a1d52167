//! Link-graph queries: density, neighborhoods, deterministic shortest
//! paths, the multi-path context backbone, keyword ranking and diagnostics.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::index::LinkIndex;
use crate::config::LinksConfig;
use crate::vault::Note;

/// Per-note metadata the queries need without touching the filesystem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteMeta {
    pub title: String,
    pub tags: Vec<String>,
    pub complexity: u8,
    pub summary: String,
    /// Lower-cased body token → occurrence count
    token_counts: HashMap<String, usize>,
}

impl NoteMeta {
    fn from_note(note: &Note) -> Self {
        let mut token_counts = HashMap::new();
        for token in tokenize(&note.body) {
            *token_counts.entry(token).or_insert(0) += 1;
        }
        Self {
            title: note.title().to_string(),
            tags: note.front.tags.clone(),
            complexity: note.front.complexity.unwrap_or(1),
            summary: note.effective_summary(),
            token_counts,
        }
    }
}

/// Aggregate graph diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_notes: usize,
    pub total_links: usize,
    pub avg_links_per_note: f64,
    pub most_connected: Option<String>,
    pub orphan_count: usize,
    pub dangling_count: usize,
}

/// Union of all pairwise shortest paths over a seed set, plus one radius of
/// expansion around every intersection node.
#[derive(Debug, Clone, Default)]
pub struct ContextBackbone {
    pub paths: Vec<Vec<String>>,
    pub nodes: BTreeSet<String>,
    /// Slugs appearing on at least two distinct paths
    pub intersections: BTreeSet<String>,
}

/// The link engine: index plus note metadata, answering every graph query
/// the agents and the context manager need.
#[derive(Debug, Clone, Default)]
pub struct LinkEngine {
    config: LinksConfig,
    index: LinkIndex,
    meta: BTreeMap<String, NoteMeta>,
}

impl LinkEngine {
    pub fn new(config: LinksConfig) -> Self {
        Self {
            config,
            index: LinkIndex::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> &LinkIndex {
        &self.index
    }

    pub fn meta(&self, slug: &str) -> Option<&NoteMeta> {
        self.meta.get(slug)
    }

    /// Clear and re-derive the whole index from the given notes.
    pub fn rebuild(&mut self, notes: &[Note]) {
        self.index.clear();
        self.meta.clear();
        for note in notes {
            self.apply_write(note);
        }
        debug!(
            notes = self.index.note_count(),
            links = self.index.link_count(),
            "link index rebuilt"
        );
    }

    /// Incrementally fold one written note into the index. O(|Δ|).
    pub fn apply_write(&mut self, note: &Note) {
        let links = note.link_slugs();
        self.index.upsert(&note.slug, &links, &note.front.tags);
        self.meta.insert(note.slug.clone(), NoteMeta::from_note(note));
    }

    /// Remove a deleted note from the index.
    pub fn apply_delete(&mut self, slug: &str) {
        self.index.remove(slug);
        self.meta.remove(slug);
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Link density in [0, 1]: `(in + out) / K`, or the configured weighted
    /// form `(w_in·in + w_out·out) / K`.
    pub fn density(&self, slug: &str) -> f64 {
        let incoming = self.index.incoming(slug).len() as f64;
        let outgoing = self.index.outgoing(slug).len() as f64;
        let k = self.config.density_k.max(1) as f64;
        let raw = match self.config.density_weights {
            Some(weights) => weights.incoming * incoming + weights.outgoing * outgoing,
            None => incoming + outgoing,
        };
        (raw / k).clamp(0.0, 1.0)
    }

    /// `min(2 × density, 1)` — how ready the learner is to build outward
    /// from this note.
    pub fn learning_readiness(&self, slug: &str) -> f64 {
        (self.density(slug) * 2.0).min(1.0)
    }

    /// Breadth-first expansion over the undirected graph up to `radius`
    /// hops. Element `d` of the result holds the sorted slugs at distance
    /// `d`; element 0 is the slug itself. Unknown slugs yield an empty vec.
    pub fn neighbors(&self, slug: &str, radius: usize) -> Vec<Vec<String>> {
        if !self.index.contains(slug) {
            return Vec::new();
        }
        let mut layers = vec![vec![slug.to_string()]];
        let mut visited: BTreeSet<String> = [slug.to_string()].into();

        for _ in 0..radius {
            let mut next = BTreeSet::new();
            for node in layers.last().expect("layers never empty") {
                for neighbor in self.index.neighbors_of(node) {
                    if !visited.contains(&neighbor) {
                        next.insert(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            visited.extend(next.iter().cloned());
            layers.push(next.into_iter().collect());
        }
        layers
    }

    /// Deterministic shortest path on the undirected graph via
    /// bidirectional BFS. Ties are broken by expanding in lexicographic
    /// slug order, so the same index state always yields the same path.
    /// Returns `[a, ..., b]`, or empty if no path exists within
    /// `max_depth` edges.
    pub fn shortest_path(&self, a: &str, b: &str, max_depth: usize) -> Vec<String> {
        if !self.index.contains(a) || !self.index.contains(b) {
            return Vec::new();
        }
        if a == b {
            return vec![a.to_string()];
        }

        let mut parent_fwd: HashMap<String, Option<String>> = HashMap::new();
        let mut parent_bwd: HashMap<String, Option<String>> = HashMap::new();
        parent_fwd.insert(a.to_string(), None);
        parent_bwd.insert(b.to_string(), None);
        let mut frontier_fwd: BTreeSet<String> = [a.to_string()].into();
        let mut frontier_bwd: BTreeSet<String> = [b.to_string()].into();
        let mut depth = 0usize;

        while !frontier_fwd.is_empty() && !frontier_bwd.is_empty() && depth < max_depth {
            // Expand the smaller frontier; ties go forward so a→b and b→a
            // explorations mirror each other.
            let forward = frontier_fwd.len() <= frontier_bwd.len();
            let (frontier, parents) = if forward {
                (&mut frontier_fwd, &mut parent_fwd)
            } else {
                (&mut frontier_bwd, &mut parent_bwd)
            };

            let mut next = BTreeSet::new();
            for node in frontier.iter() {
                for neighbor in self.index.neighbors_of(node) {
                    if !parents.contains_key(&neighbor) {
                        parents.insert(neighbor.clone(), Some(node.clone()));
                        next.insert(neighbor);
                    }
                }
            }
            *frontier = next;
            depth += 1;

            let others = if forward { &parent_bwd } else { &parent_fwd };
            let frontier = if forward { &frontier_fwd } else { &frontier_bwd };
            // BTreeSet iteration makes the first meeting node the
            // lexicographically smallest.
            if let Some(meet) = frontier.iter().find(|n| others.contains_key(*n)) {
                return reconstruct(meet, &parent_fwd, &parent_bwd);
            }
        }
        Vec::new()
    }

    /// All-pairs shortest paths over a seed set, unioned into a context
    /// backbone. Nodes on ≥2 distinct paths are intersections; one radius
    /// around each intersection is folded into the backbone.
    pub fn multi_shortest_paths(&self, seeds: &[String]) -> ContextBackbone {
        let seeds: Vec<&String> = {
            let set: BTreeSet<&String> = seeds.iter().collect();
            set.into_iter().collect()
        };

        let mut backbone = ContextBackbone::default();
        let mut appearance: BTreeMap<String, usize> = BTreeMap::new();

        for (i, a) in seeds.iter().enumerate() {
            for b in &seeds[i + 1..] {
                let path = self.shortest_path(a, b, self.config.max_search_depth);
                if path.is_empty() {
                    continue;
                }
                for node in &path {
                    *appearance.entry(node.clone()).or_insert(0) += 1;
                    backbone.nodes.insert(node.clone());
                }
                backbone.paths.push(path);
            }
        }

        backbone.intersections = appearance
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .map(|(node, _)| node)
            .collect();

        for node in backbone.intersections.clone() {
            for layer in self.neighbors(&node, 1) {
                backbone.nodes.extend(layer);
            }
        }
        backbone
    }

    /// Rank notes against a free-text query by tag overlap, then title
    /// token overlap, then body token hits. Scores are normalised so the
    /// best match is 1.0.
    pub fn keyword_match(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(String, f64)> = Vec::new();
        for (slug, meta) in &self.meta {
            let tag_tokens: BTreeSet<String> =
                meta.tags.iter().map(|t| t.to_lowercase()).collect();
            // Slug segments count toward the title signal so untitled
            // notes still rank.
            let mut title_tokens: BTreeSet<String> = tokenize(&meta.title).into_iter().collect();
            title_tokens.extend(
                slug.split(['/', '_'])
                    .filter(|part| part.len() >= 2)
                    .map(str::to_string),
            );

            let mut tag_overlap = 0usize;
            let mut title_overlap = 0usize;
            let mut body_hits = 0usize;
            for token in &tokens {
                if tag_tokens.contains(token) {
                    tag_overlap += 1;
                }
                if title_tokens.contains(token) {
                    title_overlap += 1;
                }
                body_hits += meta.token_counts.get(token).copied().unwrap_or(0).min(5);
            }

            let score = 3.0 * tag_overlap as f64 + 2.0 * title_overlap as f64
                + 0.1 * body_hits.min(10) as f64;
            if score > 0.0 {
                scored.push((slug.clone(), score));
            }
        }

        scored.sort_by(|(slug_a, score_a), (slug_b, score_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| slug_a.cmp(slug_b))
        });
        scored.truncate(limit);

        if let Some(&(_, top)) = scored.first() {
            for entry in &mut scored {
                entry.1 /= top;
            }
        }
        scored
    }

    /// Mean absolute complexity jump along a path. Lower is gentler.
    pub fn cognitive_weight(&self, path: &[String]) -> f64 {
        if path.len() < 2 {
            return 0.0;
        }
        let complexity =
            |slug: &str| self.meta.get(slug).map(|m| m.complexity).unwrap_or(1) as f64;
        let total: f64 = path
            .windows(2)
            .map(|pair| (complexity(&pair[1]) - complexity(&pair[0])).abs())
            .sum();
        total / (path.len() - 1) as f64
    }

    /// Second-degree link suggestions by shared-connection ratio.
    pub fn suggest_links(&self, slug: &str, max_suggestions: usize) -> Vec<(String, f64)> {
        let connected: BTreeSet<String> = self.index.neighbors_of(slug).into_iter().collect();
        if connected.is_empty() {
            return Vec::new();
        }

        let mut suggestions: BTreeMap<String, f64> = BTreeMap::new();
        for neighbor in &connected {
            for candidate in self.index.neighbors_of(neighbor) {
                if candidate == slug || connected.contains(&candidate) {
                    continue;
                }
                let candidate_connected: BTreeSet<String> =
                    self.index.neighbors_of(&candidate).into_iter().collect();
                let shared = connected.intersection(&candidate_connected).count();
                let confidence = shared as f64 / connected.len() as f64;
                suggestions.entry(candidate).or_insert(confidence);
            }
        }

        let mut ranked: Vec<(String, f64)> = suggestions.into_iter().collect();
        ranked.sort_by(|(slug_a, conf_a), (slug_b, conf_b)| {
            conf_b
                .partial_cmp(conf_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| slug_a.cmp(slug_b))
        });
        ranked.truncate(max_suggestions);
        ranked
    }

    pub fn statistics(&self) -> GraphStatistics {
        let total_notes = self.index.note_count();
        let total_links = self.index.link_count();
        let most_connected = self
            .index
            .slugs()
            .max_by_key(|slug| {
                (
                    self.index.outgoing(slug).len() + self.index.incoming(slug).len(),
                    std::cmp::Reverse(slug.to_string()),
                )
            })
            .cloned();
        let orphan_count = self
            .index
            .slugs()
            .filter(|slug| {
                self.index.outgoing(slug).is_empty() && self.index.incoming(slug).is_empty()
            })
            .count();
        GraphStatistics {
            total_notes,
            total_links,
            avg_links_per_note: if total_notes == 0 {
                0.0
            } else {
                total_links as f64 / total_notes as f64
            },
            most_connected,
            orphan_count,
            dangling_count: self.index.dangling_count(),
        }
    }

    pub fn max_path_length(&self) -> usize {
        self.config.max_path_length
    }

    pub fn max_search_depth(&self) -> usize {
        self.config.max_search_depth
    }
}

/// Lower-cased alphanumeric tokens of length ≥ 2.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}

fn reconstruct(
    meet: &str,
    parent_fwd: &HashMap<String, Option<String>>,
    parent_bwd: &HashMap<String, Option<String>>,
) -> Vec<String> {
    let mut front: VecDeque<String> = VecDeque::new();
    let mut cursor = Some(meet.to_string());
    while let Some(node) = cursor {
        cursor = parent_fwd.get(&node).cloned().flatten();
        front.push_front(node);
    }
    let mut path: Vec<String> = front.into_iter().collect();
    let mut cursor = parent_bwd.get(meet).cloned().flatten();
    while let Some(node) = cursor {
        cursor = parent_bwd.get(&node).cloned().flatten();
        path.push(node);
    }
    path
}
