//! # mentor-core
//!
//! Async learning orchestration engine — drives a fixed pipeline of five
//! LLM-backed agents over an Obsidian-style markdown vault, maintaining a
//! bidirectional link graph, KV-cache-friendly prompts and a bounded
//! tool-call loop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mentor_core::config::MentorConfig;
//! use mentor_core::llm::{LlmClient, OpenAiProvider};
//! use mentor_core::orchestrator::Orchestrator;
//!
//! # async fn run() -> mentor_core::error::MentorResult<()> {
//! let config = MentorConfig::default();
//! let client = Arc::new(LlmClient::new(
//!     Arc::new(OpenAiProvider::new(std::env::var("OPENAI_API_KEY").unwrap())),
//!     config.retry.clone(),
//!     Duration::from_secs(config.llm.timeout_s),
//! ));
//!
//! let orchestrator = Orchestrator::new(config, client);
//! orchestrator.initialize().await?;
//!
//! let session_id = orchestrator.orchestrate("Learn about Markov chains").await?;
//! let mut events = orchestrator.subscribe(&session_id).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event.envelope()).unwrap());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`vault`] | Markdown note store: YAML front-matter, `[[wiki-links]]`, atomic path-safe writes |
//! | [`links`] | Bidirectional link index with density, neighborhood, shortest-path and backbone queries |
//! | [`llm`] | Provider-agnostic chat completion with retry, backoff and timeout |
//! | [`context`] | Prompt assembly under KV-cache discipline: stable prefix, tiered notes, append-only history |
//! | [`toolloop`] | Bounded loop of completions interleaved with parsed tool-request dispatch |
//! | [`agents`] | The five pipeline agents as a tagged enum: assessment, planning, generation, evaluation, consolidation |
//! | [`orchestrator`] | Five-stage state machine, session registry, progress broadcast, TTL and cancellation |
//! | [`session`] | Learning-session records and JSON snapshots |
//! | [`config`] | Configuration surface consumed by the engine |
//! | [`error`] | Error taxonomy with `thiserror` |
//!
//! ## The vault is the source of truth
//!
//! Every index is a cache over the markdown files. Link membership is
//! recomputed from note bodies on write, and rebuilding the index from the
//! vault always reproduces the incrementally-maintained state.

pub mod agents;
pub mod config;
pub mod context;
pub mod error;
pub mod links;
pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod toolloop;
pub mod types;
pub mod vault;

pub use error::{MentorError, MentorResult};
pub use types::*;
