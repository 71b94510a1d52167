//! Single-owner concurrency wrapper for the link engine.
//!
//! Queries take shared read access; writers (the initial rebuild, Empress
//! commits) take exclusive access for the duration of their diff-apply, so
//! readers always observe either the pre-write or post-write index, never a
//! torn state.

use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard};

use super::engine::LinkEngine;
use crate::vault::Note;

/// Cheap-to-clone handle to the process-wide link engine.
#[derive(Clone)]
pub struct SharedLinkEngine {
    inner: Arc<RwLock<LinkEngine>>,
}

impl SharedLinkEngine {
    pub fn new(engine: LinkEngine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// Shared read access for queries and context builds.
    pub async fn read(&self) -> RwLockReadGuard<'_, LinkEngine> {
        self.inner.read().await
    }

    /// Replace the whole index from a fresh vault listing.
    pub async fn rebuild(&self, notes: &[Note]) {
        self.inner.write().await.rebuild(notes);
    }

    /// Fold one written note into the index.
    pub async fn apply_write(&self, note: &Note) {
        self.inner.write().await.apply_write(note);
    }

    /// Remove a deleted note from the index.
    pub async fn apply_delete(&self, slug: &str) {
        self.inner.write().await.apply_delete(slug);
    }
}
