//! Retry policy
//!
//! A manual retry re-sends a backend's latest exchange with the context that
//! exchange originally used. The automatic retry runs when credentials change
//! (or a conversation is loaded) and re-sends every backend whose latest
//! response failed with an auth error.

use crate::error::{CoroError, Result};
use crate::metrics;
use crate::normalizer::ErrorKind;
use crate::providers::BackendRequest;
use crate::turn::coordinator::{JobKind, TurnCoordinator};
use crate::turn::state::{GlobalError, Turn};

impl TurnCoordinator {
    /// Retry one backend of the current turn and wait for the answer
    ///
    /// # Errors
    ///
    /// Fails when there is no active turn, the backend is not part of it, or
    /// it still has a job in flight.
    pub async fn retry(&mut self, backend_id: &str) -> Result<()> {
        self.begin_retry(backend_id)?;
        self.settle().await;
        Ok(())
    }

    /// Dispatch a manual retry without waiting
    pub fn begin_retry(&mut self, backend_id: &str) -> Result<()> {
        let turn = self.active_turn()?;
        if !turn.includes(backend_id) {
            return Err(CoroError::UnknownBackend(backend_id.to_string()).into());
        }
        if self.is_busy(backend_id) {
            return Err(
                CoroError::Validation(format!("{} is still answering", backend_id)).into(),
            );
        }

        metrics::record_round("retry");
        tracing::info!(backend.id = backend_id, "Retrying backend");
        self.dispatch_retry(backend_id);
        Ok(())
    }

    /// Called when stored credentials change
    ///
    /// Re-sends, once and concurrently, every backend whose latest response
    /// failed with an auth error, then re-evaluates the error banner. Nothing
    /// happens unless at least one credential is now present. Returns the
    /// number of backends retried.
    pub async fn credentials_changed(&mut self) -> usize {
        let retried = self.begin_auto_retry();
        if retried > 0 {
            self.settle().await;
            self.reevaluate_banner();
        }
        retried
    }

    fn begin_auto_retry(&mut self) -> usize {
        if !self.credentials.any_present(&self.settings.credential_keys) {
            tracing::debug!("No credentials configured, skipping automatic retry");
            return 0;
        }
        let Some(turn) = self.turn.as_ref() else {
            return 0;
        };

        let targets: Vec<String> = ErrorKind::ALL
            .iter()
            .filter(|kind| kind.triggers_auto_retry())
            .flat_map(|kind| turn.backends_with_error(*kind))
            .filter(|id| self.catalog.contains(id) && !self.is_busy(id))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        metrics::record_auto_retries(targets.len());
        tracing::info!(backends = targets.len(), "Automatically retrying after credential change");
        for id in &targets {
            self.dispatch_retry(id);
        }
        targets.len()
    }

    /// Re-send the latest exchange of one backend
    ///
    /// Uses the context the backend's latest exchange was sent with, falling
    /// back to the turn's initial context, and the turn's sampling parameters.
    fn dispatch_retry(&mut self, backend_id: &str) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        let context = self
            .job_contexts
            .get(backend_id)
            .cloned()
            .unwrap_or_else(|| turn.context.clone());
        let (history, prompt) = self
            .threads
            .last_exchange(backend_id)
            .unwrap_or_else(|| (Vec::new(), turn.prompt.clone()));

        let request = BackendRequest {
            backend_id: backend_id.to_string(),
            prompt,
            history,
            system_prompt: context.composed_system_prompt,
            parameters: turn.parameters.clone(),
        };
        self.spawn_job(JobKind::Retry, request);
    }

    /// Make the banner reflect the errors that remain
    ///
    /// Cleared when no backend is errored. Replaced with the first remaining
    /// error (display order) when the backend it named has recovered.
    pub(crate) fn reevaluate_banner(&mut self) {
        let Some(turn) = self.turn.as_ref() else {
            self.clear_banner();
            return;
        };
        if !turn.has_errors() {
            self.clear_banner();
            return;
        }

        let still_valid = self
            .global_error
            .as_ref()
            .map(|banner| banner_still_valid(turn, banner))
            .unwrap_or(false);
        if still_valid {
            return;
        }

        let replacement = turn
            .responses_in_order()
            .into_iter()
            .find(|r| r.is_error())
            .and_then(GlobalError::from_response);
        match replacement {
            Some(banner) => self.raise_banner(banner),
            None => self.clear_banner(),
        }
    }
}

fn banner_still_valid(turn: &Turn, banner: &GlobalError) -> bool {
    turn.responses
        .get(&banner.backend_id)
        .and_then(|r| r.error_kind)
        .map(|kind| kind == banner.kind)
        .unwrap_or(false)
}
