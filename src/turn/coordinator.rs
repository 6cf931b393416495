//! Turn coordinator
//!
//! Owns the current [`Turn`], every backend thread, the tab selection and the
//! error banner. Backend jobs run as independent tasks and report back over a
//! channel; only the coordinator (the single writer) folds their outcomes into
//! shared state, so a turn is never mutated concurrently.
//!
//! Every dispatch is tagged with the generation that was current when it was
//! sent. Submitting again, returning to idle or starting a new chat bumps the
//! generation, and outcomes carrying an older tag are handled according to
//! [`StaleResultPolicy`].

use crate::catalog::{display_order, sort_ids, BackendCatalog};
use crate::config::{Config, StaleResultPolicy};
use crate::context::{should_search_for_query, ContextComposer, TurnContext};
use crate::credentials::CredentialStore;
use crate::error::{CoroError, Result};
use crate::metrics::{self, JobMetrics};
use crate::normalizer::{normalize, ErrorKind, NormalizedError};
use crate::providers::{BackendRequest, ClientSet, GenerationParameters, SearchClient};
use crate::storage::{ConversationHandle, PersistenceGateway, SavedConversation, SavedResponse};
use crate::thread::{Message, Role, ThreadStore};
use crate::turn::selection::TabSelection;
use crate::turn::state::{GlobalError, Response, Turn, TurnState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Coordinator settings, usually taken from [`Config`]
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Default generation parameters for a submit
    pub parameters: GenerationParameters,
    /// Guidance text added to every turn's context
    pub guidance: Option<String>,
    /// Always search before dispatch
    pub search_enabled: bool,
    /// Search when the query looks time-sensitive
    pub search_auto_detect: bool,
    /// What to do with results from superseded turns
    pub stale_results: StaleResultPolicy,
    /// How long completion badges stay visible
    pub badge_window: Duration,
    /// Credential keys checked before an automatic retry
    pub credential_keys: Vec<String>,
}

impl CoordinatorSettings {
    /// Derive settings from a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        let mut credential_keys: Vec<String> = config
            .backends
            .iter()
            .filter_map(|b| b.credential.clone())
            .collect();
        credential_keys.sort();
        credential_keys.dedup();

        Self {
            parameters: config.turn.parameters(),
            guidance: config.turn.guidance.clone(),
            search_enabled: config.search.enabled,
            search_auto_detect: config.search.auto_detect,
            stale_results: config.turn.stale_results,
            badge_window: config.turn.badge_window(),
            credential_keys,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Why a job was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Part of a submit
    Submit,
    /// Single-backend or broadcast follow-up
    FollowUp,
    /// Manual or automatic retry of the latest exchange
    Retry,
}

/// Result reported by a finished job
#[derive(Debug, Clone)]
pub(crate) struct JobOutcome {
    pub(crate) job_id: u64,
    pub(crate) generation: u64,
    pub(crate) backend_id: String,
    pub(crate) response: Response,
}

#[derive(Debug, Clone)]
struct JobTicket {
    generation: u64,
    backend_id: String,
    kind: JobKind,
}

/// Notifications for a presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Jobs were dispatched for these backends
    Started {
        generation: u64,
        backend_ids: Vec<String>,
    },
    /// A backend's response was merged into the turn
    Resolved { generation: u64, response: Response },
    /// The shown tab changed automatically
    TabSelected { backend_id: String },
    /// A backend finished while another tab was shown
    BadgeRaised { backend_id: String },
    /// The error banner changed
    BannerRaised(GlobalError),
    /// The error banner was cleared
    BannerCleared,
    /// A result for a superseded turn arrived
    StaleResult {
        generation: u64,
        backend_id: String,
        applied: bool,
    },
    /// Every job of the current generation has resolved
    Settled {
        generation: u64,
        total_latency_ms: u64,
    },
}

/// What a submit did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Jobs were dispatched under this generation
    Dispatched { generation: u64 },
    /// Same prompt and backend set as the settled turn; nothing was sent
    Cached,
}

/// Drives turns from submission to settlement
pub struct TurnCoordinator {
    pub(crate) catalog: Arc<BackendCatalog>,
    clients: ClientSet,
    search: Option<Arc<dyn SearchClient>>,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) settings: CoordinatorSettings,

    composer: ContextComposer,
    pub(crate) threads: ThreadStore,
    pub(crate) turn: Option<Turn>,
    pub(crate) generation: u64,
    outstanding: HashMap<u64, JobTicket>,
    next_job_id: u64,
    pub(crate) job_contexts: HashMap<String, TurnContext>,

    tx: mpsc::UnboundedSender<JobOutcome>,
    rx: mpsc::UnboundedReceiver<JobOutcome>,

    selection: TabSelection,
    pub(crate) global_error: Option<GlobalError>,
    active_record: Option<ConversationHandle>,
    results_visible: bool,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl TurnCoordinator {
    /// Creates an idle coordinator
    pub fn new(
        catalog: Arc<BackendCatalog>,
        clients: ClientSet,
        credentials: Arc<dyn CredentialStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let selection = TabSelection::new(settings.badge_window);

        Self {
            catalog,
            clients,
            search: None,
            persistence: None,
            credentials,
            settings,
            composer: ContextComposer::new(),
            threads: ThreadStore::new(),
            turn: None,
            generation: 0,
            outstanding: HashMap::new(),
            next_job_id: 0,
            job_contexts: HashMap::new(),
            tx,
            rx,
            selection,
            global_error: None,
            active_record: None,
            results_visible: false,
            events: None,
        }
    }

    /// Attach a web search client
    pub fn with_search(mut self, search: Arc<dyn SearchClient>) -> Self {
        self.search = Some(search);
        self
    }

    /// Attach a persistence gateway
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Receive [`TurnEvent`]s; replaces any earlier subscriber
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TurnEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Submit a prompt to a set of backends and wait for every answer
    ///
    /// # Errors
    ///
    /// Returns [`CoroError::Validation`] for an empty prompt or backend set and
    /// [`CoroError::UnknownBackend`] for an id missing from the catalog. In
    /// both cases the turn is left in [`TurnState::Error`] and nothing is sent.
    pub async fn submit(
        &mut self,
        prompt: &str,
        backend_ids: &[String],
        parameters: Option<GenerationParameters>,
    ) -> Result<SubmitOutcome> {
        let outcome = self.begin_submit(prompt, backend_ids, parameters).await?;
        self.settle().await;
        Ok(outcome)
    }

    /// Validate and dispatch a submit without waiting for the answers
    pub async fn begin_submit(
        &mut self,
        prompt: &str,
        backend_ids: &[String],
        parameters: Option<GenerationParameters>,
    ) -> Result<SubmitOutcome> {
        let trimmed = prompt.trim();
        let mut ids: Vec<String> = backend_ids.to_vec();
        sort_ids(&mut ids);
        ids.dedup();

        if trimmed.is_empty() {
            return self.reject(prompt, CoroError::Validation("Prompt cannot be empty".into()));
        }
        if ids.is_empty() {
            return self.reject(
                prompt,
                CoroError::Validation("Select at least one backend".into()),
            );
        }
        if let Some(unknown) = ids.iter().find(|id| !self.catalog.contains(id)) {
            let unknown = unknown.clone();
            return self.reject(prompt, CoroError::UnknownBackend(unknown));
        }

        if self.is_duplicate(trimmed, &ids) {
            tracing::info!("Prompt and backends unchanged, reusing settled turn");
            self.results_visible = true;
            return Ok(SubmitOutcome::Cached);
        }

        self.generation += 1;
        self.selection.reset();
        self.clear_banner();
        self.job_contexts.clear();
        for id in self.threads.backend_ids() {
            if self.threads.abandon_pending(&id) {
                tracing::debug!(backend.id = %id, "Dropped unanswered exchange");
            }
        }

        let search_requested = self.search_requested(trimmed);
        let context = self
            .composer
            .resolve(
                trimmed,
                self.settings.guidance.as_deref(),
                search_requested,
                self.search.as_deref(),
            )
            .await;

        let parameters = parameters.unwrap_or_else(|| self.settings.parameters.clone());
        let mut turn = Turn::new(trimmed, ids.clone(), context.clone(), self.generation);
        turn.parameters = parameters.clone();
        self.turn = Some(turn);
        self.results_visible = true;

        metrics::record_round("submit");
        tracing::info!(
            turn.generation = self.generation,
            backends = ids.len(),
            search = context.search_snippets.is_some(),
            "Dispatching turn"
        );
        self.emit(TurnEvent::Started {
            generation: self.generation,
            backend_ids: ids.clone(),
        });

        for id in &ids {
            self.dispatch_exchange(id, trimmed, &context, &parameters, JobKind::Submit);
        }

        Ok(SubmitOutcome::Dispatched {
            generation: self.generation,
        })
    }

    /// Send a follow-up to one backend of the current turn and wait for it
    pub async fn follow_up(&mut self, backend_id: &str, message: &str) -> Result<()> {
        self.begin_follow_up(backend_id, message).await?;
        self.settle().await;
        Ok(())
    }

    /// Dispatch a single-backend follow-up without waiting
    ///
    /// # Errors
    ///
    /// Fails when there is no active turn, the backend is not part of it,
    /// the message is empty, or the backend still has a job in flight.
    pub async fn begin_follow_up(&mut self, backend_id: &str, message: &str) -> Result<()> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(CoroError::Validation("Message cannot be empty".into()).into());
        }
        let turn = self.active_turn()?;
        if !turn.includes(backend_id) {
            return Err(CoroError::UnknownBackend(backend_id.to_string()).into());
        }
        if self.is_busy(backend_id) {
            return Err(
                CoroError::Validation(format!("{} is still answering", backend_id)).into(),
            );
        }

        let context = self.fresh_context(trimmed).await;
        metrics::record_round("follow_up");
        self.dispatch_round(&[backend_id.to_string()], trimmed, &context);
        Ok(())
    }

    /// Send the same follow-up to every backend of the current turn
    ///
    /// Returns the backends that received it.
    pub async fn broadcast_follow_up(
        &mut self,
        message: &str,
        exclude: Option<&str>,
    ) -> Result<Vec<String>> {
        let targets = self.begin_broadcast_follow_up(message, exclude).await?;
        self.settle().await;
        Ok(targets)
    }

    /// Dispatch a broadcast follow-up without waiting
    ///
    /// Backends with a job still in flight are skipped.
    pub async fn begin_broadcast_follow_up(
        &mut self,
        message: &str,
        exclude: Option<&str>,
    ) -> Result<Vec<String>> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(CoroError::Validation("Message cannot be empty".into()).into());
        }
        let turn = self.active_turn()?;

        let mut targets = Vec::new();
        for id in &turn.selected_backend_ids {
            if Some(id.as_str()) == exclude {
                continue;
            }
            if self.is_busy(id) {
                tracing::warn!(backend.id = %id, "Skipping busy backend for broadcast");
                continue;
            }
            targets.push(id.clone());
        }
        if targets.is_empty() {
            return Err(CoroError::Validation("No backend available for broadcast".into()).into());
        }

        // One context for the whole broadcast.
        let context = self.fresh_context(trimmed).await;
        if let Some(turn) = self.turn.as_mut() {
            turn.displayed_prompt = trimmed.to_string();
        }
        metrics::record_round("broadcast");
        self.dispatch_round(&targets, trimmed, &context);
        Ok(targets)
    }

    /// Abandon the current turn and clear the transcript
    ///
    /// Jobs still in flight finish on their own; their results are stale.
    pub fn return_to_idle(&mut self) {
        self.generation += 1;
        self.turn = None;
        self.threads.clear();
        self.selection.reset();
        self.clear_banner();
        self.job_contexts.clear();
        self.composer.reset();
        self.results_visible = false;
        tracing::info!(turn.generation = self.generation, "Returned to idle");
    }

    /// Return to idle and detach from the persisted record
    pub fn start_new_chat(&mut self) {
        self.return_to_idle();
        self.active_record = None;
    }

    /// Show a backend's tab
    pub fn select_tab(&mut self, backend_id: &str) -> Result<()> {
        let turn = self.active_turn()?;
        if !turn.includes(backend_id) {
            return Err(CoroError::UnknownBackend(backend_id.to_string()).into());
        }
        self.selection.select(backend_id, Instant::now());
        Ok(())
    }

    /// Restore a persisted conversation as the current turn
    ///
    /// Runs the automatic retry afterwards, so backends that failed with an
    /// auth error are re-sent once credentials are available. Returns the
    /// number of backends retried.
    pub async fn load_conversation(&mut self, id: &str) -> Result<usize> {
        let gateway = self
            .persistence
            .clone()
            .ok_or_else(|| CoroError::Storage("No conversation storage configured".into()))?;
        let saved = gateway
            .load(id)?
            .ok_or_else(|| CoroError::Storage(format!("Conversation not found: {}", id)))?;

        self.return_to_idle();

        let threads = saved.threads();
        let mut ids: Vec<String> = saved
            .responses
            .iter()
            .map(|r| r.backend_id.clone())
            .chain(threads.iter().map(|(id, _)| id.clone()))
            .collect();
        sort_ids(&mut ids);
        ids.dedup();

        let mut turn = Turn::new(&saved.prompt, ids, TurnContext::default(), self.generation);
        turn.parameters = self.settings.parameters.clone();
        turn.responses.clear();
        for saved_response in &saved.responses {
            turn.upsert(restore_response(saved_response));
        }
        turn.total_latency_ms = saved.total_latency_ms;
        turn.submitted_at = saved.timestamp;
        turn.state = TurnState::Success;
        if let Some(last_user) = threads
            .iter()
            .find_map(|(_, messages)| messages.iter().rev().find(|m| m.role == Role::User))
        {
            turn.displayed_prompt = last_user.content.clone();
        }

        for (backend_id, messages) in threads {
            self.threads.set_thread(&backend_id, messages);
        }
        self.turn = Some(turn);
        self.active_record = Some(ConversationHandle::new(saved.id.clone()));
        self.results_visible = true;
        self.reevaluate_banner();
        tracing::info!(conversation.id = %saved.id, "Loaded conversation");

        Ok(self.credentials_changed().await)
    }

    /// Wait until every outstanding job has reported
    pub async fn settle(&mut self) {
        while !self.outstanding.is_empty() {
            if !self.step().await {
                break;
            }
        }
    }

    /// Fold the next batch of finished jobs into the turn
    ///
    /// Waits for at least one outcome. Outcomes that arrived together are
    /// applied in display order. Returns `false` when nothing is outstanding.
    pub async fn step(&mut self) -> bool {
        if self.outstanding.is_empty() {
            return false;
        }
        let Some(first) = self.rx.recv().await else {
            return false;
        };

        let mut batch = vec![first];
        while let Ok(outcome) = self.rx.try_recv() {
            batch.push(outcome);
        }
        batch.sort_by(|a, b| display_order(&a.backend_id, &b.backend_id));
        for outcome in batch {
            self.apply_outcome(outcome);
        }
        true
    }

    /// Current turn, if any
    pub fn turn(&self) -> Option<&Turn> {
        self.turn.as_ref()
    }

    /// Messages of one backend's thread
    pub fn thread(&self, backend_id: &str) -> &[Message] {
        self.threads.thread_for(backend_id)
    }

    /// Currently shown tab
    pub fn selected_tab(&self) -> Option<&str> {
        self.selection.selected()
    }

    /// Backends showing a completion badge right now
    pub fn badges(&self) -> Vec<String> {
        self.selection.badges(Instant::now())
    }

    /// The error banner
    pub fn global_error(&self) -> Option<&GlobalError> {
        self.global_error.as_ref()
    }

    /// Whether the results view should be shown
    pub fn results_visible(&self) -> bool {
        self.results_visible
    }

    /// Persisted record the current turn writes to
    pub fn active_record(&self) -> Option<&ConversationHandle> {
        self.active_record.as_ref()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Backend catalog
    pub fn catalog(&self) -> &BackendCatalog {
        &self.catalog
    }

    /// Whether any job is still outstanding
    pub fn is_loading(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Whether `backend_id` has a job in flight for the current generation
    pub fn is_busy(&self, backend_id: &str) -> bool {
        self.outstanding
            .values()
            .any(|t| t.generation == self.generation && t.backend_id == backend_id)
    }

    pub(crate) fn active_turn(&self) -> Result<&Turn> {
        match &self.turn {
            Some(turn) if !matches!(turn.state, TurnState::Error(_)) => Ok(turn),
            _ => Err(CoroError::NoActiveTurn("submit a prompt first".into()).into()),
        }
    }

    fn reject(&mut self, prompt: &str, error: CoroError) -> Result<SubmitOutcome> {
        self.generation += 1;
        let reason = match &error {
            CoroError::Validation(reason) => reason.clone(),
            other => other.to_string(),
        };
        tracing::warn!(turn.generation = self.generation, "Turn rejected: {}", reason);
        self.turn = Some(Turn::rejected(prompt.trim(), &reason, self.generation));
        self.results_visible = false;
        Err(error.into())
    }

    fn is_duplicate(&self, prompt: &str, ids: &[String]) -> bool {
        match &self.turn {
            Some(turn) => {
                turn.state == TurnState::Success
                    && turn.prompt == prompt
                    && turn.selected_backend_ids == ids
                    && !turn.responses.is_empty()
            }
            None => false,
        }
    }

    fn search_requested(&self, query: &str) -> bool {
        self.search.is_some()
            && (self.settings.search_enabled
                || (self.settings.search_auto_detect && should_search_for_query(query)))
    }

    async fn fresh_context(&mut self, query: &str) -> TurnContext {
        let search_requested = self.search_requested(query);
        self.composer
            .resolve(
                query,
                self.settings.guidance.as_deref(),
                search_requested,
                self.search.as_deref(),
            )
            .await
    }

    /// Open a follow-up exchange on each backend and dispatch it
    fn dispatch_round(&mut self, backend_ids: &[String], message: &str, context: &TurnContext) {
        let parameters = self
            .turn
            .as_ref()
            .map(|turn| turn.parameters.clone())
            .unwrap_or_else(|| self.settings.parameters.clone());
        if let Some(turn) = self.turn.as_mut() {
            turn.state = TurnState::Loading;
            for id in backend_ids {
                turn.upsert(Response::placeholder(id));
            }
        }
        self.emit(TurnEvent::Started {
            generation: self.generation,
            backend_ids: backend_ids.to_vec(),
        });
        for id in backend_ids {
            self.dispatch_exchange(id, message, context, &parameters, JobKind::FollowUp);
        }
    }

    fn dispatch_exchange(
        &mut self,
        backend_id: &str,
        message: &str,
        context: &TurnContext,
        parameters: &GenerationParameters,
        kind: JobKind,
    ) {
        let history = self.threads.history_for(backend_id);
        self.threads.begin_exchange(backend_id, message);
        self.job_contexts
            .insert(backend_id.to_string(), context.clone());

        let request = BackendRequest {
            backend_id: backend_id.to_string(),
            prompt: message.to_string(),
            history,
            system_prompt: context.composed_system_prompt.clone(),
            parameters: parameters.clone(),
        };
        self.spawn_job(kind, request);
    }

    /// Run one backend call on its own task
    ///
    /// The call itself runs on an inner task so that a panicking client still
    /// produces an outcome and `settle` never waits forever.
    pub(crate) fn spawn_job(&mut self, kind: JobKind, request: BackendRequest) {
        self.next_job_id += 1;
        let job_id = self.next_job_id;
        let generation = self.generation;
        let backend_id = request.backend_id.clone();
        let client = self.clients.route(self.catalog.is_on_device(&backend_id));
        let tx = self.tx.clone();

        self.outstanding.insert(
            job_id,
            JobTicket {
                generation,
                backend_id: backend_id.clone(),
                kind,
            },
        );
        tracing::debug!(
            turn.generation = generation,
            backend.id = %backend_id,
            job.kind = ?kind,
            "Dispatching job"
        );

        tokio::spawn(async move {
            let started = Instant::now();
            let job_metrics = JobMetrics::new(&backend_id);
            let call = tokio::spawn(async move { client.send(&request).await });
            let joined = call.await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let response = match joined {
                Ok(Ok(reply)) => {
                    job_metrics.record_success(latency_ms);
                    tracing::debug!(backend.id = %backend_id, latency_ms, "Backend answered");
                    Response::success(&backend_id, reply, latency_ms)
                }
                Ok(Err(fault)) => {
                    let normalized = normalize(&fault);
                    job_metrics.record_failure(&normalized.kind.to_string(), latency_ms);
                    tracing::error!(
                        backend.id = %backend_id,
                        error.kind = %normalized.kind,
                        "Backend job failed: {}",
                        fault
                    );
                    Response::failure(&backend_id, &normalized, latency_ms)
                }
                Err(join_error) => {
                    let normalized = NormalizedError {
                        kind: ErrorKind::Unknown,
                        message: ErrorKind::Unknown.user_message(&join_error.to_string()),
                        retryable: false,
                        retry_after_seconds: None,
                    };
                    job_metrics.record_failure(&normalized.kind.to_string(), latency_ms);
                    tracing::error!(backend.id = %backend_id, "Backend job aborted: {}", join_error);
                    Response::failure(&backend_id, &normalized, latency_ms)
                }
            };

            let _ = tx.send(JobOutcome {
                job_id,
                generation,
                backend_id,
                response,
            });
        });
    }

    /// Merge one job outcome into shared state
    pub(crate) fn apply_outcome(&mut self, outcome: JobOutcome) {
        let Some(ticket) = self.outstanding.remove(&outcome.job_id) else {
            tracing::debug!(job.id = outcome.job_id, "Outcome for unknown job ignored");
            return;
        };

        if outcome.generation != self.generation {
            self.apply_stale(outcome);
            return;
        }

        let Some(turn) = self.turn.as_mut() else {
            return;
        };

        let response = outcome.response;
        let backend_id = outcome.backend_id;
        let success = !response.is_error();

        turn.upsert(response.clone());
        let merged = self
            .threads
            .replace_trailing_pending(&backend_id, response.thread_text());
        if !merged && ticket.kind == JobKind::Retry {
            self.threads
                .replace_trailing_assistant(&backend_id, response.thread_text());
        }

        let change = self
            .selection
            .on_resolved(&backend_id, success, Instant::now());
        if change.selected {
            self.emit(TurnEvent::TabSelected {
                backend_id: backend_id.clone(),
            });
        }
        if change.badge_raised {
            self.emit(TurnEvent::BadgeRaised {
                backend_id: backend_id.clone(),
            });
        }

        if success {
            let errors_remain = self.turn.as_ref().map(Turn::has_errors).unwrap_or(false);
            if !errors_remain {
                self.clear_banner();
            }
        } else if self.global_error.is_none() {
            if let Some(banner) = GlobalError::from_response(&response) {
                self.raise_banner(banner);
            }
        }

        self.emit(TurnEvent::Resolved {
            generation: outcome.generation,
            response,
        });

        let still_running = self
            .outstanding
            .values()
            .any(|t| t.generation == self.generation);
        if !still_running {
            self.finalize_round();
        }
    }

    fn apply_stale(&mut self, outcome: JobOutcome) {
        let applied = self.settings.stale_results == StaleResultPolicy::Apply;
        metrics::record_stale_result(applied);
        tracing::debug!(
            turn.generation = outcome.generation,
            current = self.generation,
            backend.id = %outcome.backend_id,
            applied,
            "Result for superseded turn"
        );

        if applied {
            if let Some(turn) = self.turn.as_mut() {
                turn.upsert(outcome.response);
            }
        }
        self.emit(TurnEvent::StaleResult {
            generation: outcome.generation,
            backend_id: outcome.backend_id,
            applied,
        });
    }

    fn finalize_round(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.state == TurnState::Loading {
            turn.state = TurnState::Success;
        }
        let total_latency_ms = turn.total_latency_ms;
        tracing::info!(
            turn.generation = self.generation,
            total_latency_ms,
            "Turn settled"
        );

        self.persist();
        self.emit(TurnEvent::Settled {
            generation: self.generation,
            total_latency_ms,
        });
    }

    /// Save or update the persisted record for the current turn
    ///
    /// Failures are logged and never fail the turn.
    fn persist(&mut self) {
        let Some(gateway) = self.persistence.clone() else {
            return;
        };
        let Some(record) = self.snapshot() else {
            return;
        };

        if let Some(handle) = self.active_record.clone() {
            if let Err(e) = gateway.update(&handle, &record) {
                tracing::warn!(conversation.id = %handle, "Failed to update conversation: {}", e);
            }
            return;
        }
        match gateway.save(&record) {
            Ok(handle) => {
                tracing::debug!(conversation.id = %handle, "Saved conversation");
                self.active_record = Some(handle);
            }
            Err(e) => tracing::warn!("Failed to save conversation: {}", e),
        }
    }

    fn snapshot(&self) -> Option<SavedConversation> {
        let turn = self.turn.as_ref()?;
        if turn.is_placeholder_only() {
            tracing::debug!("Nothing resolved yet, skipping save");
            return None;
        }

        let responses = turn
            .responses_in_order()
            .into_iter()
            .filter(|r| !r.is_placeholder())
            .map(|r| SavedResponse {
                backend_id: r.backend_id.clone(),
                text: r.text.clone(),
                token_count: r.token_count,
                latency_ms: r.latency_ms,
                error_message: r.error_message.clone(),
            })
            .collect();
        let threads: Vec<(String, Vec<Message>)> = self
            .threads
            .backend_ids()
            .into_iter()
            .map(|id| {
                let messages = self.threads.thread_for(&id).to_vec();
                (id, messages)
            })
            .collect();

        Some(SavedConversation {
            id: String::new(),
            prompt: turn.prompt.clone(),
            timestamp: turn.submitted_at,
            total_latency_ms: turn.total_latency_ms,
            responses,
            history: SavedConversation::interleave(&threads),
        })
    }

    pub(crate) fn raise_banner(&mut self, banner: GlobalError) {
        tracing::debug!(backend.id = %banner.backend_id, error.kind = %banner.kind, "Error banner raised");
        self.global_error = Some(banner.clone());
        self.emit(TurnEvent::BannerRaised(banner));
    }

    pub(crate) fn clear_banner(&mut self) {
        if self.global_error.take().is_some() {
            self.emit(TurnEvent::BannerCleared);
        }
    }

    pub(crate) fn emit(&self, event: TurnEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn restore_response(saved: &SavedResponse) -> Response {
    let error_kind = saved
        .error_message
        .as_deref()
        .map(ErrorKind::from_stored_message);
    Response {
        backend_id: saved.backend_id.clone(),
        text: saved.text.clone(),
        token_count: saved.token_count,
        latency_ms: saved.latency_ms,
        error_kind,
        error_message: saved.error_message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SearchSnippet;
    use crate::credentials::MemoryCredentialStore;
    use crate::providers::ClientFault;
    use crate::storage::HistoryEntry;
    use crate::test_utils::{
        default_catalog, invalid_key_fault, FailingPersistence, FakeBackendClient,
        FakeSearchClient, MemoryPersistence,
    };
    use chrono::Utc;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn coordinator(client: Arc<FakeBackendClient>) -> TurnCoordinator {
        coordinator_with(client, CoordinatorSettings::default())
    }

    fn coordinator_with(
        client: Arc<FakeBackendClient>,
        settings: CoordinatorSettings,
    ) -> TurnCoordinator {
        TurnCoordinator::new(
            Arc::new(default_catalog()),
            ClientSet::uniform(client),
            Arc::new(MemoryCredentialStore::new()),
            settings,
        )
    }

    #[tokio::test]
    async fn test_on_device_backend_dispatches_to_local_client() {
        let cloud = Arc::new(FakeBackendClient::new());
        let local = Arc::new(FakeBackendClient::new());
        let mut coord = TurnCoordinator::new(
            Arc::new(default_catalog()),
            ClientSet::new(cloud.clone(), local.clone()),
            Arc::new(MemoryCredentialStore::new()),
            CoordinatorSettings::default(),
        );

        coord
            .submit("Hello", &ids(&["gemini", "on-device"]), None)
            .await
            .unwrap();

        assert_eq!(cloud.calls_for("gemini"), 1);
        assert_eq!(cloud.calls_for("on-device"), 0);
        assert_eq!(local.calls_for("on-device"), 1);
        assert_eq!(local.calls_for("gemini"), 0);
        let turn = coord.turn().unwrap();
        assert_eq!(turn.state, TurnState::Success);
        assert_eq!(turn.responses["on-device"].text, "on-device: Hello");
    }

    #[tokio::test]
    async fn test_submit_three_backends_settles_with_fastest_tab() {
        let client = Arc::new(
            FakeBackendClient::new()
                .reply("gemini", "gemini answer", 600)
                .reply("llama-70b", "big answer", 200)
                .reply("llama-8b", "fast answer", 150),
        );
        let mut coord = coordinator(client.clone());

        let outcome = coord
            .submit("Hello", &ids(&["gemini", "llama-70b", "llama-8b"]), None)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Dispatched { .. }));

        let turn = coord.turn().unwrap();
        assert_eq!(turn.state, TurnState::Success);
        assert_eq!(turn.responses.len(), 3);
        assert!(turn.total_latency_ms >= 600);
        assert!(turn.total_latency_ms < 700);
        assert_eq!(turn.responses["llama-8b"].text, "fast answer");
        assert_eq!(coord.selected_tab(), Some("llama-8b"));
        assert!(coord.global_error().is_none());
        assert!(coord.results_visible());
    }

    #[tokio::test]
    async fn test_placeholders_replaced_in_place() {
        let client = Arc::new(FakeBackendClient::new().reply("gemini", "Hi there", 20));
        let mut coord = coordinator(client);
        let backends = ids(&["gemini", "deepseek"]);

        coord.begin_submit("Hi", &backends, None).await.unwrap();
        for id in &backends {
            assert_eq!(coord.thread(id).len(), 2);
            assert_eq!(coord.threads.pending_count(id), 1);
        }
        assert!(coord.turn().unwrap().is_placeholder_only());

        coord.settle().await;
        for id in &backends {
            let thread = coord.thread(id);
            assert_eq!(thread.len(), 2);
            assert_eq!(coord.threads.pending_count(id), 0);
            assert_eq!(thread[1].content, coord.turn().unwrap().responses[id].text);
        }
    }

    #[tokio::test]
    async fn test_every_job_gets_identical_context() {
        let client = Arc::new(FakeBackendClient::new());
        let search = Arc::new(FakeSearchClient::new(vec![SearchSnippet {
            title: "Release notes".into(),
            snippet: "Version 2 shipped".into(),
            url: "https://example.com".into(),
        }]));
        let settings = CoordinatorSettings {
            guidance: Some("Answer briefly.".into()),
            search_enabled: true,
            ..CoordinatorSettings::default()
        };
        let mut coord = coordinator_with(client.clone(), settings).with_search(search.clone());

        coord
            .submit("What changed?", &ids(&["gemini", "mixtral", "deepseek"]), None)
            .await
            .unwrap();

        assert_eq!(search.calls(), 1);
        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        let prompt = requests[0].system_prompt.clone().unwrap();
        assert!(prompt.contains("Answer briefly."));
        assert!(prompt.contains("Version 2 shipped"));
        assert!(requests
            .iter()
            .all(|r| r.system_prompt.as_deref() == Some(prompt.as_str())));
    }

    #[tokio::test]
    async fn test_validation_rejects_without_dispatch() {
        let client = Arc::new(FakeBackendClient::new());
        let mut coord = coordinator(client.clone());

        assert!(coord.submit("   ", &ids(&["gemini"]), None).await.is_err());
        assert!(matches!(
            coord.turn().unwrap().state,
            TurnState::Error(ref reason) if reason == "Prompt cannot be empty"
        ));

        assert!(coord.submit("Hi", &[], None).await.is_err());
        let err = coord
            .submit("Hi", &ids(&["gpt-9"]), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoroError>(),
            Some(CoroError::UnknownBackend(id)) if id == "gpt-9"
        ));
        assert!(client.requests().is_empty());
        assert!(!coord.results_visible());
    }

    #[tokio::test]
    async fn test_duplicate_submit_is_cached() {
        let client = Arc::new(FakeBackendClient::new());
        let mut coord = coordinator(client.clone());
        let backends = ids(&["gemini", "llama-8b"]);

        coord.submit("Hi", &backends, None).await.unwrap();
        let generation = coord.generation();
        let again = coord.submit(" Hi ", &backends, None).await.unwrap();

        assert_eq!(again, SubmitOutcome::Cached);
        assert_eq!(coord.generation(), generation);
        assert_eq!(client.calls_for("gemini"), 1);

        coord.submit("Hi", &ids(&["gemini"]), None).await.unwrap();
        assert_eq!(client.calls_for("gemini"), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let client = Arc::new(
            FakeBackendClient::new()
                .fail("mixtral", ClientFault::Timeout { after_seconds: 30 }, 5)
                .reply("gemini", "ok", 5),
        );
        let mut coord = coordinator(client);

        coord
            .submit("Hi", &ids(&["gemini", "mixtral"]), None)
            .await
            .unwrap();

        let turn = coord.turn().unwrap();
        assert_eq!(turn.state, TurnState::Success);
        assert_eq!(turn.responses["mixtral"].error_kind, Some(ErrorKind::Timeout));
        assert!(!turn.responses["gemini"].is_error());
        let banner = coord.global_error().unwrap();
        assert_eq!(banner.kind, ErrorKind::Timeout);
        assert!(banner.action.is_none());
        assert_eq!(coord.thread("mixtral")[1].content, banner.message);
    }

    #[tokio::test]
    async fn test_auth_failure_offers_settings() {
        let client = Arc::new(
            FakeBackendClient::new()
                .fail("gemini", invalid_key_fault(), 5)
                .fail("deepseek", invalid_key_fault(), 10),
        );
        let mut coord = coordinator(client);

        coord
            .submit("Hi", &ids(&["gemini", "deepseek", "llama-8b"]), None)
            .await
            .unwrap();

        let banner = coord.global_error().unwrap();
        assert_eq!(banner.kind, ErrorKind::Auth);
        assert_eq!(banner.backend_id, "gemini");
        assert_eq!(banner.action.map(|a| a.label()), Some("Open Settings"));
        assert_eq!(
            coord.turn().unwrap().backends_with_error(ErrorKind::Auth),
            vec!["gemini", "deepseek"]
        );
    }

    #[tokio::test]
    async fn test_follow_up_only_touches_one_thread() {
        let client = Arc::new(FakeBackendClient::new());
        let mut coord = coordinator(client.clone());
        coord
            .submit("Q1", &ids(&["gemini", "llama-8b"]), None)
            .await
            .unwrap();

        coord.follow_up("gemini", "Q2").await.unwrap();

        assert_eq!(coord.thread("gemini").len(), 4);
        assert_eq!(coord.thread("gemini")[3].content, "gemini: Q2");
        assert_eq!(coord.thread("llama-8b").len(), 2);
        let followup = client.requests_for("gemini").pop().unwrap();
        assert_eq!(
            followup.history,
            vec![Message::user("Q1"), Message::assistant("gemini: Q1")]
        );
        assert_eq!(client.calls_for("llama-8b"), 1);
        assert_eq!(coord.turn().unwrap().state, TurnState::Success);
    }

    #[tokio::test]
    async fn test_follow_up_requires_active_turn() {
        let client = Arc::new(FakeBackendClient::new());
        let mut coord = coordinator(client);
        let err = coord.follow_up("gemini", "Q").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoroError>(),
            Some(CoroError::NoActiveTurn(_))
        ));

        coord.submit("Q1", &ids(&["gemini"]), None).await.unwrap();
        assert!(coord.follow_up("deepseek", "Q2").await.is_err());
        assert!(coord.follow_up("gemini", "  ").await.is_err());
    }

    #[tokio::test]
    async fn test_follow_up_rejected_while_backend_busy() {
        let client = Arc::new(FakeBackendClient::new().reply("gemini", "slow", 100));
        let mut coord = coordinator(client);
        coord.begin_submit("Q1", &ids(&["gemini"]), None).await.unwrap();

        assert!(coord.is_busy("gemini"));
        assert!(coord.begin_follow_up("gemini", "Q2").await.is_err());
        coord.settle().await;
        assert!(!coord.is_busy("gemini"));
    }

    #[tokio::test]
    async fn test_broadcast_shares_context_and_skips_excluded() {
        let client = Arc::new(FakeBackendClient::new());
        let search = Arc::new(FakeSearchClient::new(vec![SearchSnippet {
            title: "t".into(),
            snippet: "s".into(),
            url: "u".into(),
        }]));
        let settings = CoordinatorSettings {
            search_enabled: true,
            ..CoordinatorSettings::default()
        };
        let mut coord = coordinator_with(client.clone(), settings).with_search(search.clone());
        coord
            .submit("Q1", &ids(&["gemini", "llama-70b", "llama-8b"]), None)
            .await
            .unwrap();

        let targets = coord
            .broadcast_follow_up("Q2", Some("llama-8b"))
            .await
            .unwrap();

        assert_eq!(targets, vec!["gemini", "llama-70b"]);
        assert_eq!(search.calls(), 2);
        assert_eq!(client.calls_for("llama-8b"), 1);
        let gemini = client.requests_for("gemini").pop().unwrap();
        let llama = client.requests_for("llama-70b").pop().unwrap();
        assert_eq!(gemini.system_prompt, llama.system_prompt);
        assert_eq!(coord.turn().unwrap().displayed_prompt, "Q2");
        assert_eq!(coord.thread("llama-8b").len(), 2);
        assert_eq!(coord.thread("gemini").len(), 4);
    }

    #[tokio::test]
    async fn test_stale_results_discarded() {
        let client = Arc::new(FakeBackendClient::new().reply("gemini", "first {prompt}", 150));
        let mut coord = coordinator(client.clone());

        coord.begin_submit("A", &ids(&["gemini"]), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.set_reply("gemini", "second {prompt}", 5);
        coord.submit("B", &ids(&["gemini"]), None).await.unwrap();

        let turn = coord.turn().unwrap();
        assert_eq!(turn.prompt, "B");
        assert_eq!(turn.responses["gemini"].text, "second B");
        assert_eq!(
            coord.thread("gemini"),
            &[Message::user("B"), Message::assistant("second B")]
        );
        assert!(!coord.is_loading());
    }

    #[tokio::test]
    async fn test_stale_results_applied_when_configured() {
        let client = Arc::new(FakeBackendClient::new().reply("gemini", "first {prompt}", 150));
        let settings = CoordinatorSettings {
            stale_results: StaleResultPolicy::Apply,
            ..CoordinatorSettings::default()
        };
        let mut coord = coordinator_with(client.clone(), settings);
        let mut events = coord.subscribe();

        coord.begin_submit("A", &ids(&["gemini"]), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.set_reply("gemini", "second {prompt}", 5);
        coord.submit("B", &ids(&["gemini"]), None).await.unwrap();

        assert_eq!(coord.turn().unwrap().responses["gemini"].text, "first A");
        assert_eq!(coord.thread("gemini")[1].content, "second B");

        let mut saw_stale = false;
        while let Ok(event) = events.try_recv() {
            if let TurnEvent::StaleResult { applied, .. } = event {
                saw_stale = applied;
            }
        }
        assert!(saw_stale);
    }

    #[tokio::test]
    async fn test_return_to_idle_discards_in_flight() {
        let client = Arc::new(FakeBackendClient::new().reply("gemini", "late", 50));
        let mut coord = coordinator(client);
        coord.begin_submit("A", &ids(&["gemini"]), None).await.unwrap();

        coord.return_to_idle();
        coord.settle().await;

        assert!(coord.turn().is_none());
        assert!(coord.threads.is_empty());
        assert!(!coord.results_visible());
        assert!(coord.selected_tab().is_none());
    }

    #[tokio::test]
    async fn test_badges_raised_for_off_screen_completions() {
        let client = Arc::new(
            FakeBackendClient::new()
                .reply("gemini", "g", 10)
                .reply("llama-70b", "l", 120)
                .reply("llama-8b", "f", 240),
        );
        let mut coord = coordinator(client);
        coord
            .begin_submit("Hi", &ids(&["gemini", "llama-70b", "llama-8b"]), None)
            .await
            .unwrap();

        assert!(coord.step().await);
        assert_eq!(coord.selected_tab(), Some("gemini"));
        coord.select_tab("llama-70b").unwrap();

        assert!(coord.step().await);
        assert!(coord.badges().is_empty());

        assert!(coord.step().await);
        assert_eq!(coord.badges(), vec!["llama-8b"]);
        assert!(!coord.step().await);

        coord.select_tab("llama-8b").unwrap();
        assert!(coord.badges().is_empty());
    }

    #[tokio::test]
    async fn test_persists_then_updates_same_record() {
        let client = Arc::new(FakeBackendClient::new());
        let store = Arc::new(MemoryPersistence::new());
        let mut coord = coordinator(client).with_persistence(store.clone());

        coord
            .submit("Q1", &ids(&["gemini", "llama-8b"]), None)
            .await
            .unwrap();
        assert_eq!(store.saves(), 1);
        let handle = coord.active_record().cloned().unwrap();

        coord.follow_up("gemini", "Q2").await.unwrap();
        assert_eq!(store.saves(), 1);
        assert_eq!(store.updates(), 1);

        let record = store.get(handle.id()).unwrap();
        assert_eq!(record.prompt, "Q1");
        assert_eq!(record.responses.len(), 2);
        assert_eq!(record.history.len(), 6);

        coord.start_new_chat();
        assert!(coord.active_record().is_none());
        coord.submit("Q3", &ids(&["gemini"]), None).await.unwrap();
        assert_eq!(store.saves(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_turn() {
        let client = Arc::new(FakeBackendClient::new());
        let mut coord = coordinator(client).with_persistence(Arc::new(FailingPersistence));

        coord.submit("Q1", &ids(&["gemini"]), None).await.unwrap();
        assert_eq!(coord.turn().unwrap().state, TurnState::Success);
        assert!(coord.active_record().is_none());
    }

    #[tokio::test]
    async fn test_load_conversation_restores_turn_and_threads() {
        let client = Arc::new(FakeBackendClient::new());
        let store = Arc::new(MemoryPersistence::new());
        let threads = vec![
            (
                "gemini".to_string(),
                vec![
                    Message::user("Q1"),
                    Message::assistant("A1"),
                    Message::user("Q2"),
                    Message::assistant("A2"),
                ],
            ),
            (
                "mixtral".to_string(),
                vec![
                    Message::user("Q1"),
                    Message::assistant(ErrorKind::RateLimit.user_message("")),
                ],
            ),
        ];
        let handle = store.insert(SavedConversation {
            id: String::new(),
            prompt: "Q1".into(),
            timestamp: Utc::now(),
            total_latency_ms: 420,
            responses: vec![
                SavedResponse {
                    backend_id: "gemini".into(),
                    text: "A2".into(),
                    token_count: Some(3),
                    latency_ms: 420,
                    error_message: None,
                },
                SavedResponse {
                    backend_id: "mixtral".into(),
                    text: ErrorKind::RateLimit.user_message(""),
                    token_count: None,
                    latency_ms: 80,
                    error_message: Some(ErrorKind::RateLimit.user_message("")),
                },
            ],
            history: SavedConversation::interleave(&threads),
        });
        let mut coord = coordinator(client.clone()).with_persistence(store);

        let retried = coord.load_conversation(handle.short()).await.unwrap();

        assert_eq!(retried, 0);
        let turn = coord.turn().unwrap();
        assert_eq!(turn.state, TurnState::Success);
        assert_eq!(turn.total_latency_ms, 420);
        assert_eq!(turn.selected_backend_ids, vec!["gemini", "mixtral"]);
        assert_eq!(turn.responses["mixtral"].error_kind, Some(ErrorKind::RateLimit));
        assert_eq!(coord.thread("gemini").len(), 4);
        assert_eq!(coord.thread("gemini")[2], Message::user("Q2"));
        assert_eq!(coord.active_record(), Some(&handle));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_load_legacy_history_without_order_index() {
        let client = Arc::new(FakeBackendClient::new());
        let store = Arc::new(MemoryPersistence::new());
        let entry = |backend: &str, role: Role, content: &str| HistoryEntry {
            backend_id: backend.into(),
            role,
            content: content.into(),
            order_index: None,
        };
        let handle = store.insert(SavedConversation {
            id: String::new(),
            prompt: "Q".into(),
            timestamp: Utc::now(),
            total_latency_ms: 0,
            responses: vec![],
            history: vec![
                entry("llama-8b", Role::User, "Q"),
                entry("gemini", Role::User, "Q"),
                entry("llama-8b", Role::Assistant, "fast"),
                entry("gemini", Role::Assistant, "slow"),
            ],
        });
        let mut coord = coordinator(client).with_persistence(store);

        coord.load_conversation(handle.id()).await.unwrap();

        assert_eq!(
            coord.thread("gemini"),
            &[Message::user("Q"), Message::assistant("slow")]
        );
        assert_eq!(coord.thread("llama-8b")[1].content, "fast");
    }

    #[tokio::test]
    async fn test_load_missing_conversation_fails() {
        let client = Arc::new(FakeBackendClient::new());
        let mut coord = coordinator(client).with_persistence(Arc::new(MemoryPersistence::new()));
        assert!(coord.load_conversation("nope").await.is_err());

        let client = Arc::new(FakeBackendClient::new());
        let mut coord = coordinator(client);
        assert!(coord.load_conversation("nope").await.is_err());
    }
}
