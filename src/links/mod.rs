//! Bidirectional link engine: index maintenance and graph queries over the
//! vault's `[[wiki-link]]` structure.

mod engine;
mod index;
mod shared;

pub use engine::{ContextBackbone, GraphStatistics, LinkEngine, NoteMeta};
pub use index::LinkIndex;
pub use shared::SharedLinkEngine;
