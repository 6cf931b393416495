//! Default-tab selection and completion badges
//!
//! The first backend to resolve after a submission becomes the shown tab. A
//! successful resolution locks that choice; an errored one can still be
//! replaced by the first success that follows. Once the user has moved away
//! from the automatic choice, backends finishing off-screen get a transient
//! badge.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What a resolution changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionChange {
    /// The shown tab moved to the resolved backend
    pub selected: bool,
    /// A completion badge was raised for the resolved backend
    pub badge_raised: bool,
}

/// Tab selection state for one turn
#[derive(Debug, Clone)]
pub struct TabSelection {
    selected: Option<String>,
    locked: bool,
    user_chose: bool,
    navigated_away: bool,
    badges: HashMap<String, Instant>,
    badge_window: Duration,
}

impl TabSelection {
    /// Creates an empty selection with the given badge lifetime
    pub fn new(badge_window: Duration) -> Self {
        Self {
            selected: None,
            locked: false,
            user_chose: false,
            navigated_away: false,
            badges: HashMap::new(),
            badge_window,
        }
    }

    /// Forget everything (new submission)
    pub fn reset(&mut self) {
        self.selected = None;
        self.locked = false;
        self.user_chose = false;
        self.navigated_away = false;
        self.badges.clear();
    }

    /// Currently shown tab
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Whether the automatic choice is final
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    /// Record that `backend_id` resolved
    pub fn on_resolved(&mut self, backend_id: &str, success: bool, now: Instant) -> SelectionChange {
        let mut change = SelectionChange::default();

        if !self.user_chose {
            let take = match self.selected {
                None => true,
                Some(ref current) => !self.locked && success && current != backend_id,
            };
            if take {
                self.selected = Some(backend_id.to_string());
                change.selected = true;
            }
            if success && self.selected.as_deref() == Some(backend_id) {
                self.locked = true;
            }
        }

        if self.navigated_away && self.selected.as_deref() != Some(backend_id) {
            self.badges.insert(backend_id.to_string(), now);
            change.badge_raised = true;
        }

        change
    }

    /// The user picked a tab
    pub fn select(&mut self, backend_id: &str, now: Instant) {
        if self.selected.as_deref() != Some(backend_id) {
            self.navigated_away = true;
        }
        self.selected = Some(backend_id.to_string());
        self.user_chose = true;
        self.locked = true;
        self.badges.remove(backend_id);
        self.expire(now);
    }

    /// Drop badges older than the badge window
    pub fn expire(&mut self, now: Instant) {
        let window = self.badge_window;
        self.badges
            .retain(|_, raised| now.saturating_duration_since(*raised) < window);
    }

    /// Whether `backend_id` currently shows a badge
    #[cfg(test)]
    pub(crate) fn has_badge(&self, backend_id: &str, now: Instant) -> bool {
        self.badges
            .get(backend_id)
            .map(|raised| now.saturating_duration_since(*raised) < self.badge_window)
            .unwrap_or(false)
    }

    /// Backends currently showing a badge, sorted by id
    pub fn badges(&self, now: Instant) -> Vec<String> {
        let mut ids: Vec<String> = self
            .badges
            .iter()
            .filter(|(_, raised)| now.saturating_duration_since(**raised) < self.badge_window)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
