use thiserror::Error;

#[derive(Error, Debug)]
pub enum MentorError {
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    #[error("Path escapes vault root: {path}")]
    PathEscape { path: String },

    #[error("Parse error in {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("LLM transient failure: {0}")]
    LlmTransient(String),

    #[error("LLM rate limited: {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("LLM auth error: {0}")]
    Auth(String),

    #[error("LLM request failed: {0}")]
    LlmFatal(String),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Tool request parse error: {message}")]
    ToolParse { message: String },

    #[error("Tool execution error: tool={tool_name}, {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session busy: {active} of {max} sessions already running")]
    SessionBusy { active: usize, max: usize },

    #[error("Session cancelled: {0}")]
    SessionCancelled(String),

    #[error("Stage timed out: {stage} after {timeout_s}s")]
    StageTimeout { stage: String, timeout_s: u64 },

    #[error("Agent failed: agent={agent}, {message}")]
    Agent { agent: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Front-matter error: {0}")]
    FrontMatter(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MentorError {
    /// Whether the LLM client may retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MentorError::LlmTransient(_) | MentorError::RateLimited { .. }
        )
    }
}

pub type MentorResult<T> = Result<T, MentorError>;
