//! The five-stage pipeline driver: session registry, progress broadcast,
//! concurrency budget, TTL garbage collection and cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::agents::{register_vault_tools, AgentContext, AgentKind};
use crate::config::MentorConfig;
use crate::context::{ExternalStore, History, PromptBuilder, ToolCatalogEntry};
use crate::error::{MentorError, MentorResult};
use crate::links::{LinkEngine, SharedLinkEngine};
use crate::llm::{CompletionOptions, LlmClient};
use crate::session::{LearningSession, SessionSnapshotStore, SessionStatus};
use crate::toolloop::{ToolLoop, ToolRegistry};
use crate::types::{AgentResult, SessionEvent};
use crate::vault::NoteStore;

/// Static system prefix — identical bytes for every prompt of a deployment.
const STATIC_PREFIX: &str = "# Learning Orchestration Engine\n\nYou are part of a personal learning assistant that works over a vault of markdown notes connected by [[wiki-links]]. Five specialised agents cooperate: assessment, path planning, content generation, comprehension checking and consolidation. Ground every statement in the notes provided; never invent vault content. When you need a tool, emit a tool request block exactly in the documented format; otherwise answer directly and concisely.";

/// Capacity of each session's progress channel; slow subscribers lose the
/// oldest events, never slowing the pipeline.
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct SessionSlot {
    snapshot: LearningSession,
    history: History,
    events_tx: broadcast::Sender<SessionEvent>,
    abort: Option<AbortHandle>,
}

/// Owns every running and recently-finished session.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<MentorConfig>,
    store: Arc<NoteStore>,
    links: SharedLinkEngine,
    client: Arc<LlmClient>,
    prompts: Arc<PromptBuilder>,
    tool_loop: Arc<ToolLoop>,
    externals: ExternalStore,
    sessions: Arc<RwLock<HashMap<String, SessionSlot>>>,
    snapshots: Option<Arc<SessionSnapshotStore>>,
}

impl Orchestrator {
    /// Build an orchestrator over an already-constructed LLM client (tests
    /// inject mock providers through this seam).
    pub fn new(config: MentorConfig, client: Arc<LlmClient>) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(NoteStore::new(&config.vault_root));
        let links = SharedLinkEngine::new(LinkEngine::new(config.links.clone()));

        let mut registry = ToolRegistry::new();
        register_vault_tools(&mut registry, store.clone(), links.clone());

        let mut catalogue: Vec<ToolCatalogEntry> = AgentKind::ALL
            .iter()
            .map(|kind| ToolCatalogEntry {
                name: kind.name().to_string(),
                description: kind.description().to_string(),
            })
            .collect();
        catalogue.extend(
            registry
                .descriptions()
                .into_iter()
                .map(|(name, description)| ToolCatalogEntry { name, description }),
        );

        let prompts = Arc::new(PromptBuilder::new(
            config.context.clone(),
            STATIC_PREFIX,
            &catalogue,
        ));
        let tool_loop = Arc::new(ToolLoop::new(registry, config.tool_loop.max_depth));
        let externals = ExternalStore::new(std::env::temp_dir().join("mentor-core-context"));
        let snapshots = config
            .sessions
            .snapshot_dir
            .as_ref()
            .map(|dir| Arc::new(SessionSnapshotStore::new(dir)));

        Self {
            config,
            store,
            links,
            client,
            prompts,
            tool_loop,
            externals,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            snapshots,
        }
    }

    /// Load the vault and build the link index. Call once at startup.
    pub async fn initialize(&self) -> MentorResult<()> {
        let notes = self.store.list().await?;
        info!(notes = notes.len(), "initialising link index");
        self.links.rebuild(&notes).await;
        Ok(())
    }

    pub fn store(&self) -> &Arc<NoteStore> {
        &self.store
    }

    pub fn links(&self) -> &SharedLinkEngine {
        &self.links
    }

    fn agent_context(&self) -> AgentContext {
        AgentContext {
            store: self.store.clone(),
            links: self.links.clone(),
            client: self.client.clone(),
            options: CompletionOptions::from(&self.config.llm),
            prompts: self.prompts.clone(),
            externals: self.externals.clone(),
            tool_loop: self.tool_loop.clone(),
        }
    }

    fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeout_s * 5)
    }

    /// Create a session without running anything; stages are advanced
    /// explicitly via [`execute_agent`](Self::execute_agent).
    pub async fn start(&self, query: impl Into<String>) -> MentorResult<String> {
        self.gc_expired().await;
        let mut sessions = self.sessions.write().await;
        let active = sessions
            .values()
            .filter(|slot| slot.snapshot.status == SessionStatus::Running)
            .count();
        if active >= self.config.sessions.max_concurrent {
            return Err(MentorError::SessionBusy {
                active,
                max: self.config.sessions.max_concurrent,
            });
        }

        let session = LearningSession::new(query);
        let id = session.id.clone();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        sessions.insert(
            id.clone(),
            SessionSlot {
                snapshot: session,
                history: History::new(),
                events_tx,
                abort: None,
            },
        );
        Ok(id)
    }

    /// Run the full five-stage pipeline asynchronously.
    pub async fn orchestrate(&self, query: impl Into<String>) -> MentorResult<String> {
        let query = query.into();
        let id = self.start(query.clone()).await?;

        let orchestrator = self.clone();
        let session_id = id.clone();
        // Hold the registry lock across the spawn: the task's first checkout
        // blocks on it, so the abort handle is in place before any stage
        // runs.
        let mut sessions = self.sessions.write().await;
        let handle = tokio::spawn(async move {
            orchestrator.run_pipeline(&session_id, &query).await;
        });
        if let Some(slot) = sessions.get_mut(&id) {
            slot.abort = Some(handle.abort_handle());
        }
        drop(sessions);
        Ok(id)
    }

    /// Advance a single stage explicitly. The named agent must be the
    /// session's next pending stage.
    pub async fn execute_agent(
        &self,
        session_id: &str,
        agent_name: &str,
        query: &str,
    ) -> MentorResult<AgentResult> {
        let kind = AgentKind::from_name(agent_name).ok_or_else(|| MentorError::Agent {
            agent: agent_name.to_string(),
            message: "unknown agent".into(),
        })?;

        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(session_id) {
                if slot.abort.is_some() {
                    return Err(MentorError::Agent {
                        agent: agent_name.to_string(),
                        message: "session pipeline is already executing".into(),
                    });
                }
            }
        }

        let (mut session, mut history) = self.checkout(session_id).await?;
        let events_tx = self.events_tx(session_id).await?;

        let outcome = self
            .run_stage(&mut session, &mut history, kind.index(), query, &events_tx)
            .await;
        if session.status == SessionStatus::Completed {
            let session_id = session.id.clone();
            self.emit(
                &mut session,
                &events_tx,
                SessionEvent::SessionCompleted {
                    session_id,
                    timestamp: Utc::now(),
                },
            );
        }
        self.checkin(session, history).await;
        outcome
    }

    /// Snapshot of a session's current state.
    pub async fn get(&self, session_id: &str) -> MentorResult<LearningSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|slot| slot.snapshot.clone())
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))
    }

    /// Subscribe to a session's progress events. Lagging receivers skip
    /// ahead to the most recent events.
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> MentorResult<broadcast::Receiver<SessionEvent>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|slot| slot.events_tx.subscribe())
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))
    }

    /// Cancel a session: the in-flight LLM call is abandoned and its result
    /// discarded. Writes already performed are not rolled back.
    pub async fn cancel(&self, session_id: &str) -> MentorResult<()> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))?;
        if let Some(abort) = slot.abort.take() {
            abort.abort();
        }
        if !slot.snapshot.is_terminal() {
            slot.snapshot.cancel();
        }
        warn!(session_id, "session cancelled");
        Ok(())
    }

    /// Drop sessions idle past the TTL; running ones are aborted first.
    pub async fn gc_expired(&self) {
        let ttl = self.config.sessions.ttl_min as i64;
        let mut sessions = self.sessions.write().await;
        sessions.retain(|id, slot| {
            let keep = slot.snapshot.idle_minutes() < ttl;
            if !keep {
                if let Some(abort) = slot.abort.take() {
                    abort.abort();
                }
                info!(session_id = %id, "session expired, collecting");
            }
            keep
        });
    }

    // ─── Pipeline internals ──────────────────────────────────────────────

    async fn run_pipeline(&self, session_id: &str, query: &str) {
        let Ok((mut session, mut history)) = self.checkout(session_id).await else {
            return;
        };
        let Ok(events_tx) = self.events_tx(session_id).await else {
            return;
        };

        for index in 0..session.stage_count() {
            match self
                .run_stage(&mut session, &mut history, index, query, &events_tx)
                .await
            {
                Ok(_) => {
                    // Push intermediate state so `get` observes stage-level
                    // granularity; the terminal state is only published at
                    // check-in, after the session-completed event is logged.
                    if !session.is_terminal() {
                        self.publish_snapshot(session_id, &session).await;
                    }
                }
                Err(e) => {
                    error!(session_id, stage = index, error = %e, "pipeline aborted");
                    break;
                }
            }
        }

        if session.status == SessionStatus::Completed {
            let completed_session_id = session.id.clone();
            self.emit(
                &mut session,
                &events_tx,
                SessionEvent::SessionCompleted {
                    session_id: completed_session_id,
                    timestamp: Utc::now(),
                },
            );
        }
        self.checkin(session, history).await;
        self.clear_abort(session_id).await;
    }

    /// Run one stage against the session, emitting progress along the way.
    async fn run_stage(
        &self,
        session: &mut LearningSession,
        history: &mut History,
        index: usize,
        query: &str,
        events_tx: &broadcast::Sender<SessionEvent>,
    ) -> MentorResult<AgentResult> {
        let kind = AgentKind::ALL[index];
        session.begin_stage(index)?;
        self.emit(
            session,
            events_tx,
            SessionEvent::StageStarted {
                session_id: session.id.clone(),
                stage: kind.name().to_string(),
                stage_index: index,
                timestamp: Utc::now(),
            },
        );
        self.tick(session, events_tx, index, 0.1);

        let ctx = self.agent_context();
        let execution = tokio::time::timeout(
            self.stage_timeout(),
            kind.execute(&ctx, &*session, history, query),
        )
        .await;

        let result = match execution {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.fail(session, events_tx, index, &e);
                return Err(e);
            }
            Err(_) => {
                let e = MentorError::StageTimeout {
                    stage: kind.name().to_string(),
                    timeout_s: self.stage_timeout().as_secs(),
                };
                self.fail(session, events_tx, index, &e);
                return Err(e);
            }
        };

        self.tick(session, events_tx, index, 0.9);
        session.complete_stage(index, result.clone())?;
        self.emit(
            session,
            events_tx,
            SessionEvent::StageCompleted {
                session_id: session.id.clone(),
                stage: kind.name().to_string(),
                stage_index: index,
                result: result.clone(),
                timestamp: Utc::now(),
            },
        );

        // Keep the session history inside its token budget between stages;
        // compaction is lossless (payloads move to disk references).
        if let Err(e) = history
            .compact(
                &self.externals,
                self.config.context.max_tokens,
                self.config.context.compression_ratio,
            )
            .await
        {
            warn!(session_id = %session.id, error = %e, "history compaction failed");
        }

        if let Some(snapshots) = &self.snapshots {
            if let Err(e) = snapshots.save(session).await {
                warn!(session_id = %session.id, error = %e, "snapshot save failed");
            }
        }
        Ok(result)
    }

    fn tick(
        &self,
        session: &mut LearningSession,
        events_tx: &broadcast::Sender<SessionEvent>,
        index: usize,
        progress: f64,
    ) {
        session.tick_stage(index, progress);
        let event = SessionEvent::ProgressTick {
            session_id: session.id.clone(),
            stage: session.stages[index].name.clone(),
            stage_progress: session.stages[index].progress,
            overall_progress: session.overall_progress(),
            timestamp: Utc::now(),
        };
        self.emit(session, events_tx, event);
    }

    fn fail(
        &self,
        session: &mut LearningSession,
        events_tx: &broadcast::Sender<SessionEvent>,
        index: usize,
        error: &MentorError,
    ) {
        session.fail_stage(index, error.to_string());
        let event = SessionEvent::Error {
            session_id: session.id.clone(),
            code: error_code(error).to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        };
        self.emit(session, events_tx, event);
    }

    fn emit(
        &self,
        session: &mut LearningSession,
        events_tx: &broadcast::Sender<SessionEvent>,
        event: SessionEvent,
    ) {
        session.record_event(event.clone());
        let _ = events_tx.send(event);
    }

    /// Take ownership of a session's state for the duration of a stage.
    async fn checkout(&self, session_id: &str) -> MentorResult<(LearningSession, History)> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))?;
        if slot.snapshot.status == SessionStatus::Cancelled {
            return Err(MentorError::SessionCancelled(session_id.to_string()));
        }
        Ok((slot.snapshot.clone(), std::mem::take(&mut slot.history)))
    }

    async fn checkin(&self, session: LearningSession, history: History) {
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get_mut(&session.id) {
            // A cancellation that raced the pipeline wins.
            if slot.snapshot.status != SessionStatus::Cancelled {
                slot.snapshot = session;
            }
            slot.history = history;
        }
    }

    async fn publish_snapshot(&self, session_id: &str, session: &LearningSession) {
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get_mut(session_id) {
            if slot.snapshot.status != SessionStatus::Cancelled {
                slot.snapshot = session.clone();
            }
        }
    }

    async fn events_tx(&self, session_id: &str) -> MentorResult<broadcast::Sender<SessionEvent>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|slot| slot.events_tx.clone())
            .ok_or_else(|| MentorError::SessionNotFound(session_id.to_string()))
    }

    async fn clear_abort(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get_mut(session_id) {
            slot.abort = None;
        }
    }
}

/// Stable machine-readable codes for the `error` event type.
fn error_code(error: &MentorError) -> &'static str {
    match error {
        MentorError::NoteNotFound(_) => "note_not_found",
        MentorError::PathEscape { .. } => "path_escape",
        MentorError::Parse { .. } => "parse_error",
        MentorError::LlmTransient(_)
        | MentorError::RateLimited { .. }
        | MentorError::RetriesExhausted { .. } => "llm_failure",
        MentorError::Auth(_) | MentorError::LlmFatal(_) => "llm_fatal",
        MentorError::ToolParse { .. } => "tool_parse_error",
        MentorError::ToolExecution { .. } => "tool_execution_error",
        MentorError::SessionNotFound(_) => "session_not_found",
        MentorError::SessionBusy { .. } => "session_busy",
        MentorError::SessionCancelled(_) => "session_cancelled",
        MentorError::StageTimeout { .. } => "stage_timeout",
        MentorError::Agent { .. } => "agent_error",
        _ => "internal_error",
    }
}
