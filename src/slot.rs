//! Slot lifecycle: states, legal transitions and per-slot records

use crate::error::{ErrorKind, MatteError, Result};
use crate::types::SlotId;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    Requested,
    GeneratingPrimary,
    AwaitingBackgroundSwap,
    Reconciling,
    Compositing,
    Succeeded,
    Failed,
    Cancelled,
}

impl SlotState {
    /// Whether no further transitions are possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Progress label emitted on entering this state
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Requested => "queued",
            Self::GeneratingPrimary => "requesting primary image",
            Self::AwaitingBackgroundSwap => "swapping background",
            Self::Reconciling => "resampling",
            Self::Compositing => "recovering transparency",
            Self::Succeeded => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether `self -> next` is a legal forward step in `mode`
    #[must_use]
    pub fn can_transition_to(self, next: SlotState, mode: PipelineMode) -> bool {
        use SlotState::{
            AwaitingBackgroundSwap, Cancelled, Compositing, Failed, GeneratingPrimary,
            Reconciling, Requested, Succeeded,
        };

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        match (self, next, mode) {
            (Requested, GeneratingPrimary, _)
            | (GeneratingPrimary, AwaitingBackgroundSwap, PipelineMode::Transparent)
            | (GeneratingPrimary, Succeeded, PipelineMode::Opaque)
            | (AwaitingBackgroundSwap, Reconciling, PipelineMode::Transparent)
            | (Reconciling, Compositing, PipelineMode::Transparent)
            | (Compositing, Succeeded, PipelineMode::Transparent) => true,
            _ => false,
        }
    }

    /// Checked step to `next`
    ///
    /// # Errors
    /// - `next` is not a legal successor of `self` in `mode`
    pub fn transition(self, next: SlotState, mode: PipelineMode) -> Result<SlotState> {
        if self.can_transition_to(next, mode) {
            Ok(next)
        } else {
            Err(MatteError::internal(format!(
                "illegal slot transition {:?} -> {:?} ({:?} mode)",
                self, next, mode
            )))
        }
    }
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a slot runs the full dual-render pipeline or a single generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineMode {
    /// White render, black edit, reconcile, recover alpha
    Transparent,
    /// Single generation, opaque result
    Opaque,
}

impl PipelineMode {
    #[must_use]
    pub fn from_transparency(transparent: bool) -> Self {
        if transparent {
            Self::Transparent
        } else {
            Self::Opaque
        }
    }
}

/// Forward-only state holder for one slot
///
/// The current state is only reachable through [`SlotLifecycle::advance`],
/// which refuses anything but a legal forward step, so a recorded history is
/// always a valid lifecycle trace.
#[derive(Debug, Clone)]
pub struct SlotLifecycle {
    mode: PipelineMode,
    history: Vec<SlotState>,
}

impl SlotLifecycle {
    #[must_use]
    pub fn new(mode: PipelineMode) -> Self {
        Self {
            mode,
            history: vec![SlotState::Requested],
        }
    }

    #[must_use]
    pub fn state(&self) -> SlotState {
        // history always starts with Requested
        self.history
            .last()
            .copied()
            .unwrap_or(SlotState::Requested)
    }

    #[must_use]
    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    /// Every state entered so far, oldest first
    #[must_use]
    pub fn history(&self) -> &[SlotState] {
        &self.history
    }

    /// Move to `next`
    ///
    /// # Errors
    /// - `next` is not a legal successor of the current state
    pub fn advance(&mut self, next: SlotState) -> Result<SlotState> {
        let next = self.state().transition(next, self.mode)?;
        self.history.push(next);
        Ok(next)
    }
}

/// Error recorded on a failed (or cancelled) slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&MatteError> for SlotError {
    fn from(error: &MatteError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// One slot's bookkeeping inside a batch
#[derive(Debug, Clone)]
pub struct SlotRecord {
    pub id: SlotId,
    /// Position within the batch; result ordering follows it
    pub ordinal: usize,
    /// 1 for the first attempt, incremented by each caller-driven retry
    pub attempt: u32,
    pub state: SlotState,
    /// Every state the slot went through
    pub history: Vec<SlotState>,
    pub error: Option<SlotError>,
    /// Label of the last state entered
    pub progress_label: Option<String>,
    /// Soft, per-slot stop-before-next-stage flag
    pub cancel: CancellationToken,
}

impl SlotRecord {
    #[must_use]
    pub fn new(id: SlotId, ordinal: usize, attempt: u32) -> Self {
        Self {
            id,
            ordinal,
            attempt,
            state: SlotState::Requested,
            history: vec![SlotState::Requested],
            error: None,
            progress_label: Some(SlotState::Requested.label().to_string()),
            cancel: CancellationToken::new(),
        }
    }

    /// Record the final lifecycle of the slot
    pub fn settle(&mut self, lifecycle: &SlotLifecycle, error: Option<SlotError>) {
        self.state = lifecycle.state();
        self.history = lifecycle.history().to_vec();
        self.progress_label = Some(self.state.label().to_string());
        self.error = error;
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal()
    }
}
