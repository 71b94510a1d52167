//! Learning sessions: the per-pipeline-run state machine record, plus JSON
//! snapshot persistence.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::AgentKind;
use crate::error::{MentorError, MentorResult};
use crate::types::{AgentResult, SessionEvent, StageStatus};

/// Overall session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

/// Record of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    /// Stage progress in [0, 1]; monotone while running
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            progress: 0.0,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// One end-to-end execution of the five-stage pipeline.
///
/// Stages advance strictly in order; exactly one stage is running at any
/// instant; a completed stage's result is immutable within the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSession {
    pub id: String,
    pub query: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Index of the stage currently running or next to run (0–4)
    pub current_stage: usize,
    pub stages: Vec<StageRecord>,
    /// Ordered event log
    pub events: Vec<SessionEvent>,
}

impl LearningSession {
    pub fn new(query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
            current_stage: 0,
            stages: AgentKind::ALL.iter().map(|k| StageRecord::new(k.name())).collect(),
            events: Vec::new(),
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Session progress in [0, 1]: completed stages plus the running
    /// stage's fraction, over the stage count.
    pub fn overall_progress(&self) -> f64 {
        let total = self.stages.len().max(1) as f64;
        let sum: f64 = self
            .stages
            .iter()
            .map(|s| match s.status {
                StageStatus::Completed => 1.0,
                StageStatus::Running => s.progress.clamp(0.0, 1.0),
                _ => 0.0,
            })
            .sum();
        sum / total
    }

    pub fn running_stage(&self) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.status == StageStatus::Running)
    }

    /// Mark a stage running. Enforces strict order: `index` must be the
    /// current stage, every earlier stage completed, and nothing running.
    pub fn begin_stage(&mut self, index: usize) -> MentorResult<()> {
        if index >= self.stages.len() || index != self.current_stage {
            return Err(MentorError::Agent {
                agent: self
                    .stages
                    .get(index)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| format!("stage {index}")),
                message: format!(
                    "stage order violation: expected stage {}, got {index}",
                    self.current_stage
                ),
            });
        }
        if self.running_stage().is_some() {
            return Err(MentorError::Agent {
                agent: self.stages[index].name.clone(),
                message: "another stage is already running".into(),
            });
        }
        if self.stages[..index]
            .iter()
            .any(|s| s.status != StageStatus::Completed)
        {
            return Err(MentorError::Agent {
                agent: self.stages[index].name.clone(),
                message: "earlier stage not completed".into(),
            });
        }

        let stage = &mut self.stages[index];
        stage.status = StageStatus::Running;
        stage.progress = 0.0;
        stage.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Monotone progress update for the running stage.
    pub fn tick_stage(&mut self, index: usize, progress: f64) {
        if let Some(stage) = self.stages.get_mut(index) {
            if stage.status == StageStatus::Running {
                stage.progress = stage.progress.max(progress.clamp(0.0, 1.0));
                self.updated_at = Utc::now();
            }
        }
    }

    /// Store a result and advance. A completed stage's result is immutable.
    pub fn complete_stage(&mut self, index: usize, result: AgentResult) -> MentorResult<()> {
        let stage = self.stages.get_mut(index).ok_or_else(|| MentorError::Agent {
            agent: format!("stage {index}"),
            message: "no such stage".into(),
        })?;
        if stage.status != StageStatus::Running {
            return Err(MentorError::Agent {
                agent: stage.name.clone(),
                message: format!("cannot complete stage in status {:?}", stage.status),
            });
        }
        stage.status = StageStatus::Completed;
        stage.progress = 1.0;
        stage.completed_at = Some(Utc::now());
        stage.result = Some(result);

        self.current_stage = index + 1;
        self.updated_at = Utc::now();
        if self.current_stage >= self.stages.len() {
            self.status = SessionStatus::Completed;
        }
        Ok(())
    }

    /// Record a stage failure and terminate the session.
    pub fn fail_stage(&mut self, index: usize, error: impl Into<String>) {
        let message = error.into();
        if let Some(stage) = self.stages.get_mut(index) {
            stage.status = StageStatus::Error;
            stage.completed_at = Some(Utc::now());
            stage.error = Some(message);
        }
        self.status = SessionStatus::Error;
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) {
        self.status = SessionStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    pub fn record_event(&mut self, event: SessionEvent) {
        self.events.push(event);
        self.updated_at = Utc::now();
    }

    /// Result of a completed stage, by agent name.
    pub fn stage_result(&self, name: &str) -> Option<&AgentResult> {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.result.as_ref())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, SessionStatus::Running)
    }

    /// Age since last update, for TTL garbage collection.
    pub fn idle_minutes(&self) -> i64 {
        (Utc::now() - self.updated_at).num_minutes()
    }
}

/// Pretty-printed JSON snapshots of sessions on disk.
pub struct SessionSnapshotStore {
    dir: PathBuf,
}

impl SessionSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    pub async fn save(&self, session: &LearningSession) -> MentorResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(self.path_for(&session.id), json).await?;
        Ok(())
    }

    pub async fn load(&self, session_id: &str) -> MentorResult<LearningSession> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Err(MentorError::SessionNotFound(session_id.to_string()));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_shape() {
        let session = LearningSession::new("learn about markov chains");
        assert_eq!(session.stages.len(), 5);
        assert_eq!(session.stages[0].name, "the_high_priestess");
        assert_eq!(session.stages[4].name, "the_empress");
        assert_eq!(session.current_stage, 0);
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.overall_progress(), 0.0);
        assert!(session.running_stage().is_none());
    }

    #[test]
    fn stages_advance_monotonically() {
        let mut session = LearningSession::new("q");

        // cannot skip ahead
        assert!(session.begin_stage(1).is_err());

        session.begin_stage(0).unwrap();
        assert_eq!(session.running_stage(), Some(0));
        // exactly one running
        assert!(session.begin_stage(0).is_err());

        session
            .complete_stage(0, AgentResult::new("the_high_priestess", "done"))
            .unwrap();
        assert_eq!(session.current_stage, 1);
        // completed stage cannot be completed again
        assert!(session
            .complete_stage(0, AgentResult::new("the_high_priestess", "again"))
            .is_err());

        session.begin_stage(1).unwrap();
        assert_eq!(session.running_stage(), Some(1));
    }

    #[test]
    fn progress_is_monotone() {
        let mut session = LearningSession::new("q");
        session.begin_stage(0).unwrap();
        session.tick_stage(0, 0.5);
        assert_eq!(session.stages[0].progress, 0.5);
        // regressions are ignored
        session.tick_stage(0, 0.2);
        assert_eq!(session.stages[0].progress, 0.5);
        session.tick_stage(0, 0.9);
        assert_eq!(session.stages[0].progress, 0.9);

        assert!((session.overall_progress() - 0.18).abs() < 1e-9);
    }

    #[test]
    fn completing_all_stages_completes_session() {
        let mut session = LearningSession::new("q");
        for i in 0..5 {
            session.begin_stage(i).unwrap();
            session
                .complete_stage(i, AgentResult::new(session.stages[i].name.clone(), "ok"))
                .unwrap();
        }
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.overall_progress(), 1.0);
        assert!(session.is_terminal());
    }

    #[test]
    fn fail_stage_terminates() {
        let mut session = LearningSession::new("q");
        session.begin_stage(0).unwrap();
        session.fail_stage(0, "llm exploded");
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.stages[0].status, StageStatus::Error);
        assert_eq!(session.stages[0].error.as_deref(), Some("llm exploded"));
        assert!(session.is_terminal());
    }

    #[test]
    fn stage_result_lookup() {
        let mut session = LearningSession::new("q");
        session.begin_stage(0).unwrap();
        session
            .complete_stage(
                0,
                AgentResult::new("the_high_priestess", "assessment")
                    .with_metadata(serde_json::json!({"known_concepts": ["probability"]})),
            )
            .unwrap();
        let result = session.stage_result("the_high_priestess").unwrap();
        assert_eq!(result.metadata["known_concepts"][0], "probability");
        assert!(session.stage_result("the_empress").is_none());
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionSnapshotStore::new(dir.path());

        let mut session = LearningSession::new("persist me");
        session.begin_stage(0).unwrap();
        session
            .complete_stage(0, AgentResult::new("the_high_priestess", "ok"))
            .unwrap();
        store.save(&session).await.unwrap();

        let loaded = store.load(&session.id).await.unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.query, "persist me");
        assert_eq!(loaded.current_stage, 1);
        assert_eq!(loaded.stages[0].status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn snapshot_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionSnapshotStore::new(dir.path());
        assert!(matches!(
            store.load("nope").await,
            Err(MentorError::SessionNotFound(_))
        ));
    }
}
