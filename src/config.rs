use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration consumed by the engine.
///
/// Loading (files, env) is owned by the host; every field defaults so a
/// `MentorConfig::default()` is a working development setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentorConfig {
    #[serde(default = "default_vault_root")]
    pub vault_root: PathBuf,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tool_loop: ToolLoopConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for MentorConfig {
    fn default() -> Self {
        Self {
            vault_root: default_vault_root(),
            llm: LlmConfig::default(),
            context: ContextConfig::default(),
            tool_loop: ToolLoopConfig::default(),
            links: LinksConfig::default(),
            sessions: SessionsConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_vault_root() -> PathBuf {
    PathBuf::from("./vault")
}

// ─── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_s: default_timeout_s(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4-turbo-preview".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> usize {
    2000
}

fn default_timeout_s() -> u64 {
    30
}

// ─── Context ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Tier sizes: how many notes may enter each inclusion tier
    #[serde(default = "default_max_full_notes")]
    pub max_full_notes: usize,
    #[serde(default = "default_max_summary_notes")]
    pub max_summary_notes: usize,
    #[serde(default = "default_max_title_notes")]
    pub max_title_notes: usize,
    /// Relevance thresholds gating each tier
    #[serde(default = "default_threshold_full")]
    pub threshold_full: f64,
    #[serde(default = "default_threshold_summary")]
    pub threshold_summary: f64,
    #[serde(default = "default_threshold_title")]
    pub threshold_title: f64,
    /// Full-tier bodies larger than this are externalised to a file reference
    #[serde(default = "default_max_note_bytes")]
    pub max_note_bytes: usize,
    /// History token budget; exceeding it triggers compaction
    #[serde(default = "default_context_max_tokens")]
    pub max_tokens: usize,
    /// Fraction of the budget compaction aims to free
    #[serde(default = "default_compression_ratio")]
    pub compression_ratio: f64,
    /// Recent-history bound in turns
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_full_notes: default_max_full_notes(),
            max_summary_notes: default_max_summary_notes(),
            max_title_notes: default_max_title_notes(),
            threshold_full: default_threshold_full(),
            threshold_summary: default_threshold_summary(),
            threshold_title: default_threshold_title(),
            max_note_bytes: default_max_note_bytes(),
            max_tokens: default_context_max_tokens(),
            compression_ratio: default_compression_ratio(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_max_full_notes() -> usize {
    3
}

fn default_max_summary_notes() -> usize {
    5
}

fn default_max_title_notes() -> usize {
    10
}

fn default_threshold_full() -> f64 {
    0.8
}

fn default_threshold_summary() -> f64 {
    0.5
}

fn default_threshold_title() -> f64 {
    0.2
}

fn default_max_note_bytes() -> usize {
    4096
}

fn default_context_max_tokens() -> usize {
    8000
}

fn default_compression_ratio() -> f64 {
    0.7
}

fn default_max_history_turns() -> usize {
    20
}

// ─── Tool Loop ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLoopConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_depth() -> usize {
    5
}

// ─── Links ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinksConfig {
    /// Density normaliser: density = (in + out) / K, clamped to [0, 1]
    #[serde(default = "default_density_k")]
    pub density_k: usize,
    /// Opt-in weighted density: `w_in·in + w_out·out` normalised by K.
    /// `None` keeps the unweighted form.
    #[serde(default)]
    pub density_weights: Option<DensityWeights>,
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
    #[serde(default = "default_max_search_depth")]
    pub max_search_depth: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DensityWeights {
    pub incoming: f64,
    pub outgoing: f64,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            density_k: default_density_k(),
            density_weights: None,
            max_path_length: default_max_path_length(),
            max_search_depth: default_max_search_depth(),
        }
    }
}

fn default_density_k() -> usize {
    10
}

fn default_max_path_length() -> usize {
    8
}

fn default_max_search_depth() -> usize {
    10
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_ttl_min")]
    pub ttl_min: u64,
    /// Optional directory for JSON session snapshots
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            ttl_min: default_ttl_min(),
            snapshot_dir: None,
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

fn default_ttl_min() -> u64 {
    60
}

// ─── Retry ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_spec_defaults() {
        let config = MentorConfig::default();
        assert_eq!(config.context.max_full_notes, 3);
        assert_eq!(config.context.max_summary_notes, 5);
        assert_eq!(config.context.max_title_notes, 10);
        assert_eq!(config.context.threshold_full, 0.8);
        assert_eq!(config.tool_loop.max_depth, 5);
        assert_eq!(config.links.density_k, 10);
        assert!(config.links.density_weights.is_none());
        assert_eq!(config.sessions.max_concurrent, 10);
        assert_eq!(config.sessions.ttl_min, 60);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.llm.timeout_s, 30);
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let json = r#"{"vault_root": "/data/notes", "llm": {"provider": "anthropic"}}"#;
        let config: MentorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.vault_root, PathBuf::from("/data/notes"));
        assert_eq!(config.llm.provider, "anthropic");
        // untouched sections keep defaults
        assert_eq!(config.llm.timeout_s, 30);
        assert_eq!(config.context.max_tokens, 8000);
    }

    #[test]
    fn density_weights_opt_in() {
        let json = r#"{"links": {"density_weights": {"incoming": 0.6, "outgoing": 0.4}}}"#;
        let config: MentorConfig = serde_json::from_str(json).unwrap();
        let weights = config.links.density_weights.unwrap();
        assert_eq!(weights.incoming, 0.6);
        assert_eq!(weights.outgoing, 0.4);
    }

    #[test]
    fn config_roundtrips() {
        let config = MentorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: MentorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.context.max_note_bytes, config.context.max_note_bytes);
    }
}
