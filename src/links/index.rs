//! Bidirectional link index: the in-memory cache over the vault's link
//! structure. Files are the source of truth; the index is a pure function
//! of the current note set and can always be rebuilt to an identical state.

use std::collections::{BTreeMap, BTreeSet};

/// Forward/backward link maps, tag memberships and dangling-link tracking.
///
/// Invariant: `y ∈ outgoing(x) ⇔ x ∈ incoming(y)` for every pair of known
/// slugs. Links whose target has no note are held in `dangling` and excluded
/// from both maps until the target is created.
///
/// Outgoing lists keep document order; incoming lists are kept sorted so the
/// incremental path and a from-scratch rebuild converge on identical maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkIndex {
    notes: BTreeSet<String>,
    /// slug → existing targets, document order
    outgoing: BTreeMap<String, Vec<String>>,
    /// slug → sources, sorted
    incoming: BTreeMap<String, Vec<String>>,
    /// slug → raw link targets as written (existing or not), document order
    raw_links: BTreeMap<String, Vec<String>>,
    /// slug → tags, sorted
    note_tags: BTreeMap<String, Vec<String>>,
    /// tag → member slugs
    tags: BTreeMap<String, BTreeSet<String>>,
    /// missing target → sources that link to it
    dangling: BTreeMap<String, BTreeSet<String>>,
}

impl LinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.notes.contains(slug)
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn slugs(&self) -> impl Iterator<Item = &String> {
        self.notes.iter()
    }

    pub fn outgoing(&self, slug: &str) -> &[String] {
        self.outgoing.get(slug).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, slug: &str) -> &[String] {
        self.incoming.get(slug).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tags_of(&self, slug: &str) -> &[String] {
        self.note_tags.get(slug).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slugs_with_tag(&self, tag: &str) -> impl Iterator<Item = &String> {
        self.tags.get(tag).into_iter().flatten()
    }

    /// Diagnostic view: missing target → sorted sources linking to it.
    pub fn dangling(&self) -> BTreeMap<String, Vec<String>> {
        self.dangling
            .iter()
            .filter(|(_, sources)| !sources.is_empty())
            .map(|(target, sources)| (target.clone(), sources.iter().cloned().collect()))
            .collect()
    }

    pub fn dangling_count(&self) -> usize {
        self.dangling.values().map(BTreeSet::len).sum()
    }

    /// Total number of resolved (non-dangling) links.
    pub fn link_count(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    /// Insert or update a note's links and tags. O(|Δ|) in the changed
    /// link/tag memberships plus resolution of links that dangled on this
    /// slug.
    pub fn upsert(&mut self, slug: &str, links: &[String], tags: &[String]) {
        let new_links = dedup_preserving_order(links);
        let new_tags: Vec<String> = {
            let set: BTreeSet<&String> = tags.iter().collect();
            set.into_iter().cloned().collect()
        };

        if self.notes.insert(slug.to_string()) {
            self.outgoing.entry(slug.to_string()).or_default();
            self.incoming.entry(slug.to_string()).or_default();
            self.raw_links.entry(slug.to_string()).or_default();
            self.note_tags.entry(slug.to_string()).or_default();
            // Links that previously dangled on this slug become real edges.
            if let Some(sources) = self.dangling.remove(slug) {
                for source in sources {
                    self.refresh_outgoing(&source);
                    insert_sorted(self.incoming.get_mut(slug).expect("just inserted"), &source);
                }
            }
        }

        let old_links = self.raw_links.get(slug).cloned().unwrap_or_default();
        let old_set: BTreeSet<&String> = old_links.iter().collect();
        let new_set: BTreeSet<&String> = new_links.iter().collect();

        for removed in old_set.difference(&new_set) {
            if self.notes.contains(removed.as_str()) {
                if let Some(incoming) = self.incoming.get_mut(removed.as_str()) {
                    incoming.retain(|s| s != slug);
                }
            } else if let Some(sources) = self.dangling.get_mut(removed.as_str()) {
                sources.remove(slug);
                if sources.is_empty() {
                    self.dangling.remove(removed.as_str());
                }
            }
        }
        for added in new_set.difference(&old_set) {
            if added.as_str() == slug || self.notes.contains(added.as_str()) {
                insert_sorted(
                    self.incoming.entry((*added).clone()).or_default(),
                    slug,
                );
            } else {
                self.dangling
                    .entry((*added).clone())
                    .or_default()
                    .insert(slug.to_string());
            }
        }

        self.raw_links.insert(slug.to_string(), new_links);
        self.refresh_outgoing(slug);

        let old_tags = self.note_tags.get(slug).cloned().unwrap_or_default();
        for removed in old_tags.iter().filter(|t| !new_tags.contains(t)) {
            if let Some(members) = self.tags.get_mut(removed) {
                members.remove(slug);
                if members.is_empty() {
                    self.tags.remove(removed);
                }
            }
        }
        for added in new_tags.iter().filter(|t| !old_tags.contains(t)) {
            self.tags
                .entry(added.clone())
                .or_default()
                .insert(slug.to_string());
        }
        self.note_tags.insert(slug.to_string(), new_tags);
    }

    /// Remove a note. Edges pointing at it revert to dangling links.
    pub fn remove(&mut self, slug: &str) {
        if !self.notes.remove(slug) {
            return;
        }

        // Outbound side: drop this slug from its targets.
        for target in self.raw_links.remove(slug).unwrap_or_default() {
            if self.notes.contains(&target) {
                if let Some(incoming) = self.incoming.get_mut(&target) {
                    incoming.retain(|s| s != slug);
                }
            } else if let Some(sources) = self.dangling.get_mut(&target) {
                sources.remove(slug);
                if sources.is_empty() {
                    self.dangling.remove(&target);
                }
            }
        }

        // Inbound side: sources now hold a dangling link.
        for source in self.incoming.remove(slug).unwrap_or_default() {
            self.refresh_outgoing(&source);
            self.dangling
                .entry(slug.to_string())
                .or_default()
                .insert(source);
        }

        self.outgoing.remove(slug);
        for tag in self.note_tags.remove(slug).unwrap_or_default() {
            if let Some(members) = self.tags.get_mut(&tag) {
                members.remove(slug);
                if members.is_empty() {
                    self.tags.remove(&tag);
                }
            }
        }
    }

    /// Recompute a slug's outgoing list from its raw links: raw targets
    /// filtered to existing notes, document order preserved.
    fn refresh_outgoing(&mut self, slug: &str) {
        let resolved: Vec<String> = self
            .raw_links
            .get(slug)
            .map(|raw| {
                raw.iter()
                    .filter(|t| self.notes.contains(t.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.outgoing.insert(slug.to_string(), resolved);
    }

    /// Undirected neighbor set (outgoing ∪ incoming), sorted.
    pub fn neighbors_of(&self, slug: &str) -> Vec<String> {
        let mut set: BTreeSet<&String> = self.outgoing(slug).iter().collect();
        set.extend(self.incoming(slug).iter());
        set.into_iter().cloned().collect()
    }
}

fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

fn insert_sorted(list: &mut Vec<String>, item: &str) {
    if let Err(pos) = list.binary_search_by(|probe| probe.as_str().cmp(item)) {
        list.insert(pos, item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(targets: &[&str]) -> Vec<String> {
        targets.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn two_note_round_trip() {
        let mut index = LinkIndex::new();
        index.upsert("a", &links(&["b"]), &[]);
        index.upsert("b", &links(&["a"]), &[]);

        assert_eq!(index.outgoing("a"), ["b"]);
        assert_eq!(index.incoming("a"), ["b"]);
        assert_eq!(index.outgoing("b"), ["a"]);
        assert_eq!(index.incoming("b"), ["a"]);
        assert!(index.dangling().is_empty());
    }

    #[test]
    fn dangling_link_excluded_until_created() {
        let mut index = LinkIndex::new();
        index.upsert("a", &links(&["ghost"]), &[]);

        assert!(!index.contains("ghost"));
        assert!(index.outgoing("a").is_empty());
        let dangling = index.dangling();
        assert_eq!(dangling.get("ghost").unwrap(), &vec!["a".to_string()]);

        // Creating the target resolves the link.
        index.upsert("ghost", &[], &[]);
        assert_eq!(index.outgoing("a"), ["ghost"]);
        assert_eq!(index.incoming("ghost"), ["a"]);
        assert!(index.dangling().is_empty());
    }

    #[test]
    fn bidirectional_closure_holds() {
        let mut index = LinkIndex::new();
        index.upsert("a", &links(&["b", "c"]), &[]);
        index.upsert("b", &links(&["c"]), &[]);
        index.upsert("c", &[], &[]);

        for x in ["a", "b", "c"] {
            for y in index.outgoing(x).to_vec() {
                assert!(
                    index.incoming(&y).contains(&x.to_string()),
                    "{x} → {y} missing mirror"
                );
            }
            for y in index.incoming(x).to_vec() {
                assert!(
                    index.outgoing(&y).contains(&x.to_string()),
                    "{y} → {x} missing forward edge"
                );
            }
        }
    }

    #[test]
    fn incremental_update_equals_rebuild() {
        let mut incremental = LinkIndex::new();
        incremental.upsert("a", &links(&["b"]), &links(&["math"]));
        incremental.upsert("b", &links(&["a"]), &[]);
        // Update: a drops its link
        incremental.upsert("a", &[], &links(&["math"]));

        let mut rebuilt = LinkIndex::new();
        rebuilt.upsert("a", &[], &links(&["math"]));
        rebuilt.upsert("b", &links(&["a"]), &[]);

        assert_eq!(incremental, rebuilt);
        assert!(incremental.outgoing("a").is_empty());
        assert!(incremental.incoming("b").is_empty());
        assert_eq!(incremental.incoming("a"), ["b"]);
    }

    #[test]
    fn rebuild_is_insertion_order_independent() {
        let mut forward = LinkIndex::new();
        forward.upsert("a", &links(&["b", "c"]), &[]);
        forward.upsert("b", &links(&["c"]), &[]);
        forward.upsert("c", &links(&["a"]), &[]);

        let mut backward = LinkIndex::new();
        backward.upsert("c", &links(&["a"]), &[]);
        backward.upsert("b", &links(&["c"]), &[]);
        backward.upsert("a", &links(&["b", "c"]), &[]);

        assert_eq!(forward, backward);
    }

    #[test]
    fn remove_reverts_edges_to_dangling() {
        let mut index = LinkIndex::new();
        index.upsert("a", &links(&["b"]), &[]);
        index.upsert("b", &links(&["a"]), &[]);

        index.remove("b");
        assert!(!index.contains("b"));
        assert!(index.outgoing("a").is_empty());
        assert!(index.incoming("a").is_empty());
        assert_eq!(index.dangling().get("b").unwrap(), &vec!["a".to_string()]);
        assert_eq!(index.link_count(), 0);
    }

    #[test]
    fn tag_index_tracks_membership() {
        let mut index = LinkIndex::new();
        index.upsert("a", &[], &links(&["math", "intro"]));
        index.upsert("b", &[], &links(&["math"]));

        let math: Vec<_> = index.slugs_with_tag("math").cloned().collect();
        assert_eq!(math, vec!["a", "b"]);

        index.upsert("a", &[], &links(&["advanced"]));
        let math: Vec<_> = index.slugs_with_tag("math").cloned().collect();
        assert_eq!(math, vec!["b"]);
        assert_eq!(index.slugs_with_tag("intro").count(), 0);
        assert_eq!(index.tags_of("a"), ["advanced"]);
    }

    #[test]
    fn duplicate_links_collapse() {
        let mut index = LinkIndex::new();
        index.upsert("a", &links(&["b", "b", "c", "b"]), &[]);
        index.upsert("b", &[], &[]);
        index.upsert("c", &[], &[]);
        assert_eq!(index.outgoing("a"), ["b", "c"]);
    }

    #[test]
    fn self_link_is_kept() {
        let mut index = LinkIndex::new();
        index.upsert("a", &links(&["a"]), &[]);
        assert_eq!(index.outgoing("a"), ["a"]);
        assert_eq!(index.incoming("a"), ["a"]);
    }

    #[test]
    fn neighbors_union_sorted() {
        let mut index = LinkIndex::new();
        index.upsert("m", &links(&["z", "a"]), &[]);
        index.upsert("z", &[], &[]);
        index.upsert("a", &[], &[]);
        index.upsert("q", &links(&["m"]), &[]);

        assert_eq!(index.neighbors_of("m"), ["a", "q", "z"]);
    }
}
