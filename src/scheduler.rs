//! Batch generation scheduler
//!
//! Runs K independent pipeline slots concurrently from one driving task and
//! aggregates their outcomes. A slot's failure never touches its siblings;
//! only [`BatchHandle::abort`] acts on the whole batch.

use crate::{
    backends::ImageModel,
    config::{BatchConfig, PipelineConfig},
    error::{ErrorKind, MatteError, Result},
    pipeline::{SlotContext, TransparentAssetPipeline},
    request::GenerationRequest,
    services::{BatchTally, ProgressReporter, SlotOutcome, SlotSettlement},
    slot::{PipelineMode, SlotError, SlotRecord, SlotState},
    types::{SlotId, TransparentAsset},
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// A failed slot, with enough context for a caller-driven retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFailure {
    pub slot_id: SlotId,
    pub ordinal: usize,
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
}

/// Slot records indexed by id
#[derive(Debug, Default)]
struct SlotArena {
    records: Vec<SlotRecord>,
    index: HashMap<SlotId, usize>,
}

impl SlotArena {
    fn new(records: Vec<SlotRecord>) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id, position))
            .collect();
        Self { records, index }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn records(&self) -> &[SlotRecord] {
        &self.records
    }

    fn get_mut(&mut self, id: SlotId) -> Option<&mut SlotRecord> {
        let position = *self.index.get(&id)?;
        self.records.get_mut(position)
    }

    fn into_records(self) -> Vec<SlotRecord> {
        self.records
    }
}

/// Outcome of a settled batch
#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Successful assets, in slot ordinal order
    pub assets: Vec<TransparentAsset>,
    /// Failed slots, in slot ordinal order
    pub failures: Vec<SlotFailure>,
    /// Cancelled slots, in slot ordinal order
    pub cancelled: Vec<SlotId>,
    /// Final record of every slot, in ordinal order
    pub slots: Vec<SlotRecord>,
}

impl BatchReport {
    /// Count slots by terminal state
    #[must_use]
    pub fn tally(&self) -> BatchTally {
        let count = |state: SlotState| self.slots.iter().filter(|s| s.state == state).count();
        BatchTally {
            succeeded: count(SlotState::Succeeded),
            failed: count(SlotState::Failed),
            cancelled: count(SlotState::Cancelled),
            total: self.slots.len(),
        }
    }

    #[must_use]
    pub fn slot(&self, id: SlotId) -> Option<&SlotRecord> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Whether every slot succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.assets.len() == self.slots.len()
    }
}

/// Per-slot view shared between a handle and its running batch
#[derive(Debug)]
struct SlotHandle {
    id: SlotId,
    cancel: CancellationToken,
    settled: AtomicBool,
}

/// Cancellation handle for a prepared batch
///
/// Cheap to clone and usable from any task while the batch runs.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    batch_id: Uuid,
    hard: CancellationToken,
    slots: Arc<Vec<SlotHandle>>,
}

impl BatchHandle {
    #[must_use]
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Abort every slot, including requests already in flight
    pub fn abort(&self) {
        info!(batch_id = %self.batch_id, "Aborting batch");
        self.hard.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.hard.is_cancelled()
    }

    /// Stop one slot before its next stage
    ///
    /// Returns `false` when the slot is not part of this batch or has already
    /// settled.
    pub fn cancel_slot(&self, id: SlotId) -> bool {
        match self.slots.iter().find(|slot| slot.id == id) {
            Some(slot) if !slot.settled.load(Ordering::Acquire) => {
                slot.cancel.cancel();
                true
            },
            _ => false,
        }
    }

    /// Slot ids in ordinal order
    #[must_use]
    pub fn slot_ids(&self) -> Vec<SlotId> {
        self.slots.iter().map(|slot| slot.id).collect()
    }
}

/// A batch ready to run
///
/// Owns everything it needs, so the run future can be spawned.
pub struct PreparedBatch {
    batch_id: Uuid,
    model: Arc<dyn ImageModel>,
    pipeline: PipelineConfig,
    template: GenerationRequest,
    mode: PipelineMode,
    arena: SlotArena,
    hard: CancellationToken,
    handles: Arc<Vec<SlotHandle>>,
}

impl std::fmt::Debug for PreparedBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedBatch")
            .field("batch_id", &self.batch_id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl PreparedBatch {
    #[must_use]
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Run every slot to a terminal state and aggregate the results
    pub async fn run(self, reporter: Arc<dyn ProgressReporter>) -> BatchReport {
        let span = info_span!(
            "batch",
            batch_id = %self.batch_id,
            slots = self.arena.len(),
            mode = ?self.mode
        );
        self.drive(reporter).instrument(span).await
    }

    async fn drive(self, reporter: Arc<dyn ProgressReporter>) -> BatchReport {
        let PreparedBatch {
            batch_id,
            model,
            pipeline,
            template,
            mode,
            mut arena,
            hard,
            handles,
        } = self;

        let pipeline = TransparentAssetPipeline::new(model, pipeline);
        let total = arena.len();
        info!(total, prompt = %template.prompt, "Starting batch");

        let contexts: Vec<SlotContext<'_>> = arena
            .records()
            .iter()
            .map(|record| SlotContext {
                slot_id: record.id,
                ordinal: record.ordinal,
                soft_cancel: record.cancel.clone(),
                hard_cancel: hard.clone(),
                reporter: reporter.as_ref(),
            })
            .collect();

        let pipeline_ref = &pipeline;
        let template_ref = &template;
        let mut in_flight: FuturesUnordered<_> = contexts
            .iter()
            .map(|ctx| async move {
                let run = pipeline_ref.run(template_ref, mode, ctx).await;
                (ctx.slot_id, run)
            })
            .collect();

        let mut assets = Vec::new();
        let mut failures = Vec::new();
        let mut cancelled = Vec::new();
        let mut settled = 0;

        // Sole writer of the arena: slots hand their outcome back here
        while let Some((slot_id, run)) = in_flight.next().await {
            settled += 1;
            let Some(record) = arena.get_mut(slot_id) else {
                continue;
            };
            record.settle(&run.lifecycle, run.result.as_ref().err().map(SlotError::from));
            let ordinal = record.ordinal;
            if let Some(handle) = handles.iter().find(|h| h.id == slot_id) {
                handle.settled.store(true, Ordering::Release);
            }

            let outcome = match run.result {
                Ok(asset) => {
                    assets.push(asset);
                    SlotOutcome::Succeeded
                },
                Err(_) if record.state == SlotState::Cancelled => {
                    cancelled.push((ordinal, slot_id));
                    SlotOutcome::Cancelled
                },
                Err(error) => {
                    let failure = SlotFailure {
                        slot_id,
                        ordinal,
                        attempt: record.attempt,
                        kind: error.kind(),
                        message: error.to_string(),
                    };
                    let outcome = SlotOutcome::Failed {
                        kind: failure.kind,
                        message: failure.message.clone(),
                    };
                    failures.push(failure);
                    outcome
                },
            };

            reporter.report_slot_settled(SlotSettlement {
                slot_id,
                ordinal,
                outcome,
                settled,
                total,
            });
        }
        drop(in_flight);

        assets.sort_by_key(|asset| asset.ordinal);
        failures.sort_by_key(|failure| failure.ordinal);
        cancelled.sort_by_key(|(ordinal, _)| *ordinal);

        let report = BatchReport {
            batch_id,
            assets,
            failures,
            cancelled: cancelled.into_iter().map(|(_, id)| id).collect(),
            slots: arena.into_records(),
        };

        let tally = report.tally();
        if !tally.is_balanced() {
            error!(
                succeeded = tally.succeeded,
                failed = tally.failed,
                cancelled = tally.cancelled,
                total = tally.total,
                "Batch settled with unaccounted slots"
            );
        }
        info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            cancelled = tally.cancelled,
            "Batch settled"
        );
        reporter.report_batch_completion(tally);
        report
    }
}

struct SlotSeed {
    id: SlotId,
    ordinal: usize,
    attempt: u32,
}

/// Prepares and runs batches of pipeline slots against one model
pub struct BatchScheduler {
    model: Arc<dyn ImageModel>,
    config: BatchConfig,
    next_slot: AtomicU64,
}

impl BatchScheduler {
    /// # Errors
    /// - Invalid batch configuration
    pub fn new(model: Arc<dyn ImageModel>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            next_slot: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn next_id(&self) -> SlotId {
        SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed))
    }

    fn build(
        &self,
        template: GenerationRequest,
        transparent: bool,
        seeds: Vec<SlotSeed>,
    ) -> (BatchHandle, PreparedBatch) {
        let batch_id = Uuid::new_v4();
        let hard = CancellationToken::new();
        let records: Vec<SlotRecord> = seeds
            .into_iter()
            .map(|seed| SlotRecord::new(seed.id, seed.ordinal, seed.attempt))
            .collect();
        let handles: Arc<Vec<SlotHandle>> = Arc::new(
            records
                .iter()
                .map(|r| SlotHandle {
                    id: r.id,
                    cancel: r.cancel.clone(),
                    settled: AtomicBool::new(false),
                })
                .collect(),
        );
        let handle = BatchHandle {
            batch_id,
            hard: hard.clone(),
            slots: Arc::clone(&handles),
        };
        let prepared = PreparedBatch {
            batch_id,
            model: Arc::clone(&self.model),
            pipeline: self.config.pipeline.clone(),
            template,
            mode: PipelineMode::from_transparency(transparent),
            arena: SlotArena::new(records),
            hard,
            handles,
        };
        (handle, prepared)
    }

    /// Prepare `count` slots sharing one request template
    ///
    /// # Errors
    /// - `count` is zero or above the configured maximum
    /// - The template fails validation
    pub fn prepare(
        &self,
        template: GenerationRequest,
        count: usize,
        transparent: bool,
    ) -> Result<(BatchHandle, PreparedBatch)> {
        self.config.check_count(count)?;
        template.validate()?;

        let seeds = (0..count)
            .map(|ordinal| SlotSeed {
                id: self.next_id(),
                ordinal,
                attempt: 1,
            })
            .collect();
        Ok(self.build(template, transparent, seeds))
    }

    /// Prepare fresh attempts for previously failed slots
    ///
    /// Slot ids and ordinals are kept; attempt numbers are incremented.
    ///
    /// # Errors
    /// - No failures given, or more than the configured maximum
    /// - The same slot id appears more than once
    /// - The template fails validation
    pub fn prepare_retry(
        &self,
        failures: &[SlotFailure],
        template: GenerationRequest,
        transparent: bool,
    ) -> Result<(BatchHandle, PreparedBatch)> {
        if failures.is_empty() {
            return Err(MatteError::invalid_request("nothing to retry"));
        }
        self.config.check_count(failures.len())?;
        let mut seen = HashSet::with_capacity(failures.len());
        if let Some(duplicate) = failures.iter().find(|f| !seen.insert(f.slot_id)) {
            return Err(MatteError::invalid_request(format!(
                "{} appears more than once in the retry set",
                duplicate.slot_id
            )));
        }
        template.validate()?;

        let seeds = failures
            .iter()
            .map(|failure| SlotSeed {
                id: failure.slot_id,
                ordinal: failure.ordinal,
                attempt: failure.attempt.saturating_add(1),
            })
            .collect();
        Ok(self.build(template, transparent, seeds))
    }

    /// Prepare and run a batch in one call
    ///
    /// # Errors
    /// - As [`BatchScheduler::prepare`]
    pub async fn run_batch(
        &self,
        template: GenerationRequest,
        count: usize,
        transparent: bool,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<BatchReport> {
        let (_handle, prepared) = self.prepare(template, count, transparent)?;
        Ok(prepared.run(reporter).await)
    }

    /// Retry one failed slot as a fresh single-slot batch
    ///
    /// # Errors
    /// - As [`BatchScheduler::prepare_retry`]
    pub async fn retry(
        &self,
        failure: &SlotFailure,
        template: &GenerationRequest,
        transparent: bool,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<BatchReport> {
        let (_handle, prepared) =
            self.prepare_retry(std::slice::from_ref(failure), template.clone(), transparent)?;
        Ok(prepared.run(reporter).await)
    }
}
