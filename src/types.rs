use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Chat Messages ───────────────────────────────────────────────────────────

/// Role in an LLM conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in an LLM conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }

    /// Estimate token count (rough: 4 chars ≈ 1 token)
    pub fn estimate_tokens(&self) -> usize {
        (self.text.len() + 3) / 4 + 4 // role + framing overhead
    }
}

/// Estimate total tokens in a message list
pub fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.estimate_tokens()).sum()
}

// ─── Token Usage ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn new(input: usize, output: usize) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

// ─── Stage Status ────────────────────────────────────────────────────────────

/// Status of a pipeline stage within a learning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

// ─── Agent Result ────────────────────────────────────────────────────────────

/// Result produced by one agent for one session stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: String,
    /// Self-reported confidence in [0, 1]
    pub confidence: f64,
    pub execution_time_ms: u64,
    /// Narrative content of the result
    pub content: String,
    /// Structured payload specific to the agent kind
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AgentResult {
    pub fn new(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            confidence: 0.0,
            execution_time_ms: 0,
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ─── Session Events ──────────────────────────────────────────────────────────

/// Events emitted on a session's progress channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StageStarted {
        session_id: String,
        stage: String,
        stage_index: usize,
        timestamp: DateTime<Utc>,
    },
    ProgressTick {
        session_id: String,
        stage: String,
        /// Progress of the current stage in [0, 1]
        stage_progress: f64,
        /// Progress of the whole session in [0, 1]
        overall_progress: f64,
        timestamp: DateTime<Utc>,
    },
    StageCompleted {
        session_id: String,
        stage: String,
        stage_index: usize,
        result: AgentResult,
        timestamp: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        session_id: String,
        /// Stable machine-readable code, e.g. "llm_failure"
        code: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::StageStarted { session_id, .. }
            | SessionEvent::ProgressTick { session_id, .. }
            | SessionEvent::StageCompleted { session_id, .. }
            | SessionEvent::SessionCompleted { session_id, .. }
            | SessionEvent::Error { session_id, .. } => session_id,
        }
    }

    /// Render as the transport envelope `{type, session_id, data, timestamp}`
    /// consumed by push-channel hosts.
    pub fn envelope(&self) -> serde_json::Value {
        let (kind, timestamp) = match self {
            SessionEvent::StageStarted { timestamp, .. }
            | SessionEvent::StageCompleted { timestamp, .. }
            | SessionEvent::SessionCompleted { timestamp, .. } => ("status", timestamp),
            SessionEvent::ProgressTick { timestamp, .. } => ("progress", timestamp),
            SessionEvent::Error { timestamp, .. } => ("error", timestamp),
        };
        serde_json::json!({
            "type": kind,
            "session_id": self.session_id(),
            "data": self,
            "timestamp": timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors() {
        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, ChatRole::User);
        assert_eq!(msg.text, "hello");

        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
    }

    #[test]
    fn chat_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatRole::Assistant).unwrap();
        assert_eq!(json, r#""assistant""#);
    }

    #[test]
    fn token_estimation() {
        let msg = ChatMessage::user("hello world!"); // 12 chars → 3 + 4 overhead
        assert_eq!(msg.estimate_tokens(), 7);

        let empty = ChatMessage::user("");
        assert_eq!(empty.estimate_tokens(), 4);
    }

    #[test]
    fn estimate_tokens_sums() {
        let messages = vec![ChatMessage::user("hello"), ChatMessage::assistant("hi")];
        assert_eq!(
            estimate_tokens(&messages),
            messages.iter().map(|m| m.estimate_tokens()).sum::<usize>()
        );
    }

    #[test]
    fn token_usage_total() {
        let usage = TokenUsage::new(100, 50);
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn agent_result_builder() {
        let result = AgentResult::new("the_hermit", "path planned")
            .with_confidence(1.5)
            .with_metadata(serde_json::json!({"path": ["a", "b"]}));
        assert_eq!(result.agent, "the_hermit");
        assert_eq!(result.confidence, 1.0); // clamped
        assert_eq!(result.metadata["path"][0], "a");
    }

    #[test]
    fn stage_status_serializes_snake_case() {
        let json = serde_json::to_string(&StageStatus::Running).unwrap();
        assert_eq!(json, r#""running""#);
    }

    #[test]
    fn session_event_serializes_tagged() {
        let event = SessionEvent::StageStarted {
            session_id: "s1".into(),
            stage: "the_high_priestess".into(),
            stage_index: 0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"stage_started""#));
        assert!(json.contains(r#""session_id":"s1""#));
    }

    #[test]
    fn session_event_envelope() {
        let event = SessionEvent::ProgressTick {
            session_id: "s1".into(),
            stage: "justice".into(),
            stage_progress: 0.5,
            overall_progress: 0.7,
            timestamp: Utc::now(),
        };
        let envelope = event.envelope();
        assert_eq!(envelope["type"], "progress");
        assert_eq!(envelope["session_id"], "s1");
        assert!(envelope["data"]["stage_progress"].is_number());

        let err = SessionEvent::Error {
            session_id: "s2".into(),
            code: "llm_failure".into(),
            message: "boom".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(err.envelope()["type"], "error");
    }
}
