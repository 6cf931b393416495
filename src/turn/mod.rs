//! Turn orchestration
//!
//! - [`state`]: the turn data model (responses, lifecycle, error banner)
//! - [`selection`]: default-tab selection and completion badges
//! - [`coordinator`]: submit, follow-ups, merge-on-completion and lifecycle
//! - [`retry`]: manual and credential-triggered retries

pub mod coordinator;
pub mod retry;
pub mod selection;
pub mod state;

pub use coordinator::{CoordinatorSettings, JobKind, SubmitOutcome, TurnCoordinator, TurnEvent};
pub use selection::{SelectionChange, TabSelection};
pub use state::{BannerAction, GlobalError, Response, Turn, TurnState, AWAITING};
