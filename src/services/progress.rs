//! Progress reporting service
//!
//! This module separates progress reporting concerns from the pipeline and
//! scheduler, allowing different frontends to implement their own progress
//! handling.

use crate::error::ErrorKind;
use crate::slot::SlotState;
use crate::types::SlotId;
use instant::Instant;
use tokio::sync::mpsc;

/// One slot entering a new state
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub slot_id: SlotId,
    pub ordinal: usize,
    pub state: SlotState,
    /// Human-readable label for `state`
    pub label: String,
    /// Elapsed time since the slot started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(slot_id: SlotId, ordinal: usize, state: SlotState, start_time: Instant) -> Self {
        Self {
            slot_id,
            ordinal,
            state,
            label: state.label().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

/// How a slot ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

/// A slot reaching a terminal state, surfaced in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSettlement {
    pub slot_id: SlotId,
    pub ordinal: usize,
    pub outcome: SlotOutcome,
    /// Slots settled so far in this batch, including this one
    pub settled: usize,
    pub total: usize,
}

/// Final counts for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchTally {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl BatchTally {
    /// Whether every slot is accounted for exactly once
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.succeeded + self.failed + self.cancelled == self.total
    }
}

/// Trait for reporting progress during batch generation
pub trait ProgressReporter: Send + Sync {
    /// Report a slot state transition
    fn report_progress(&self, update: ProgressUpdate);

    /// Report a slot reaching a terminal state
    fn report_slot_settled(&self, settlement: SlotSettlement) {
        drop(settlement);
    }

    /// Report that every slot of a batch has settled
    fn report_batch_completion(&self, tally: BatchTally) {
        drop(tally);
    }
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {
        // Intentionally empty - discards progress updates
    }
}

/// Progress reporter that emits `tracing` events
pub struct TracingProgressReporter {
    verbose: bool,
}

impl TracingProgressReporter {
    /// # Arguments
    /// * `verbose` - Log every transition at info level instead of debug
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            tracing::info!(
                slot = %update.slot_id,
                ordinal = update.ordinal,
                elapsed_ms = update.elapsed_ms,
                "{}",
                update.label
            );
        } else {
            tracing::debug!(slot = %update.slot_id, "{}", update.label);
        }
    }

    fn report_slot_settled(&self, settlement: SlotSettlement) {
        match &settlement.outcome {
            SlotOutcome::Succeeded => tracing::info!(
                slot = %settlement.slot_id,
                "✅ Slot {}/{} done",
                settlement.settled,
                settlement.total
            ),
            SlotOutcome::Failed { kind, message } => tracing::warn!(
                slot = %settlement.slot_id,
                kind = %kind,
                "❌ Slot failed: {}",
                message
            ),
            SlotOutcome::Cancelled => {
                tracing::info!(slot = %settlement.slot_id, "Slot cancelled");
            },
        }
    }

    fn report_batch_completion(&self, tally: BatchTally) {
        tracing::info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            cancelled = tally.cancelled,
            "Batch settled"
        );
    }
}

/// Event forwarded by [`ChannelProgressReporter`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress(ProgressUpdate),
    Settled(SlotSettlement),
    Completed(BatchTally),
}

/// Forwards every event over an unbounded channel
///
/// Sends never block; events are dropped once the receiver is gone.
pub struct ChannelProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressReporter {
    /// Create a reporter and the receiving end of its channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ProgressEvent) {
        // A closed receiver only means nobody is listening any more
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.send(ProgressEvent::Progress(update));
    }

    fn report_slot_settled(&self, settlement: SlotSettlement) {
        self.send(ProgressEvent::Settled(settlement));
    }

    fn report_batch_completion(&self, tally: BatchTally) {
        self.send(ProgressEvent::Completed(tally));
    }
}

/// Per-slot tracker that stamps timing onto reported transitions
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    slot_id: SlotId,
    ordinal: usize,
    start_time: Instant,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter, slot_id: SlotId, ordinal: usize) -> Self {
        Self {
            reporter,
            slot_id,
            ordinal,
            start_time: Instant::now(),
        }
    }

    /// Report the slot entering `state`
    pub fn report_state(&self, state: SlotState) {
        self.reporter.report_progress(ProgressUpdate::new(
            self.slot_id,
            self.ordinal,
            state,
            self.start_time,
        ));
    }

    /// Elapsed time since the tracker was created
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}
