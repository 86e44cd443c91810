//! Transparent-asset pipeline
//!
//! Drives one slot from request to asset:
//! white-background generation, black-background edit, dimension
//! reconciliation and alpha recovery. Stages run strictly in order; only the
//! two model calls suspend.

use crate::{
    backends::ImageModel,
    compositing::{reconcile, recover_alpha_with},
    config::PipelineConfig,
    error::{MatteError, Result},
    request::{EditRequest, GenerationRequest},
    services::{codec::decode_payload, progress::ProgressTracker, ProgressReporter},
    slot::{PipelineMode, SlotLifecycle, SlotState},
    types::{Provenance, SlotId, TransparentAsset},
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Identity and cancellation handles for one pipeline run
pub struct SlotContext<'a> {
    pub slot_id: SlotId,
    pub ordinal: usize,
    /// Checked only between stages; an in-flight result is discarded
    pub soft_cancel: CancellationToken,
    /// Aborts the in-flight request immediately
    pub hard_cancel: CancellationToken,
    pub reporter: &'a dyn ProgressReporter,
}

impl<'a> SlotContext<'a> {
    /// Context with fresh, untripped tokens
    #[must_use]
    pub fn new(slot_id: SlotId, ordinal: usize, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            slot_id,
            ordinal,
            soft_cancel: CancellationToken::new(),
            hard_cancel: CancellationToken::new(),
            reporter,
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.hard_cancel.is_cancelled() {
            return Err(MatteError::cancelled("batch aborted"));
        }
        if self.soft_cancel.is_cancelled() {
            return Err(MatteError::cancelled("slot cancelled before next stage"));
        }
        Ok(())
    }

    /// Await a model call, racing it against the hard token
    async fn dispatch<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.hard_cancel.cancelled() => {
                Err(MatteError::cancelled("batch aborted while a request was in flight"))
            }
            result = call => {
                if self.soft_cancel.is_cancelled() {
                    debug!(slot = %self.slot_id, "Discarding in-flight result of cancelled slot");
                    return Err(MatteError::cancelled("slot cancelled; in-flight result discarded"));
                }
                result
            }
        }
    }
}

/// Finished run: the full lifecycle trace and the asset or error
#[derive(Debug)]
pub struct PipelineRun {
    pub lifecycle: SlotLifecycle,
    pub result: Result<TransparentAsset>,
}

impl PipelineRun {
    #[must_use]
    pub fn state(&self) -> SlotState {
        self.lifecycle.state()
    }
}

/// Runs slots against one image model
pub struct TransparentAssetPipeline {
    model: Arc<dyn ImageModel>,
    config: PipelineConfig,
}

impl TransparentAssetPipeline {
    #[must_use]
    pub fn new(model: Arc<dyn ImageModel>, config: PipelineConfig) -> Self {
        Self { model, config }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one slot to a terminal state
    ///
    /// Never returns early: every error, including cancellation, is folded
    /// into the returned [`PipelineRun`] with a matching terminal state.
    #[instrument(skip_all, fields(slot = %ctx.slot_id, ordinal = ctx.ordinal, mode = ?mode, model = self.model.name()))]
    pub async fn run(
        &self,
        request: &GenerationRequest,
        mode: PipelineMode,
        ctx: &SlotContext<'_>,
    ) -> PipelineRun {
        let tracker = ProgressTracker::new(ctx.reporter, ctx.slot_id, ctx.ordinal);
        let mut lifecycle = SlotLifecycle::new(mode);
        tracker.report_state(SlotState::Requested);

        let result = self.drive(request, &mut lifecycle, ctx, &tracker).await;
        let terminal = match &result {
            Ok(_) => SlotState::Succeeded,
            Err(e) if e.is_cancellation() => SlotState::Cancelled,
            Err(_) => SlotState::Failed,
        };
        let result = lifecycle.advance(terminal).and(result);
        tracker.report_state(lifecycle.state());

        match &result {
            Ok(_) => debug!(elapsed_ms = tracker.elapsed_ms(), "Slot succeeded"),
            Err(e) if e.is_cancellation() => debug!(reason = %e, "Slot cancelled"),
            Err(e) => warn!(error = %e, kind = %e.kind(), "Slot failed"),
        }

        PipelineRun { lifecycle, result }
    }

    fn enter(
        lifecycle: &mut SlotLifecycle,
        tracker: &ProgressTracker<'_>,
        state: SlotState,
    ) -> Result<()> {
        lifecycle.advance(state)?;
        tracker.report_state(state);
        Ok(())
    }

    async fn drive(
        &self,
        request: &GenerationRequest,
        lifecycle: &mut SlotLifecycle,
        ctx: &SlotContext<'_>,
        tracker: &ProgressTracker<'_>,
    ) -> Result<TransparentAsset> {
        request.validate()?;

        ctx.checkpoint()?;
        Self::enter(lifecycle, tracker, SlotState::GeneratingPrimary)?;
        let primary_request = match lifecycle.mode() {
            PipelineMode::Transparent => {
                request.with_prompt(self.config.white_background_prompt(&request.prompt))
            },
            PipelineMode::Opaque => request.clone(),
        };
        let payload = ctx.dispatch(self.model.generate(&primary_request)).await?;
        let primary = decode_payload(payload, Provenance::Generated)?;

        if lifecycle.mode() == PipelineMode::Opaque {
            return Ok(TransparentAsset::new(
                primary,
                request.prompt.clone(),
                ctx.slot_id,
                ctx.ordinal,
            ));
        }

        ctx.checkpoint()?;
        Self::enter(lifecycle, tracker, SlotState::AwaitingBackgroundSwap)?;
        let edit = EditRequest::from_generation(
            primary.clone(),
            self.config.black_background_instruction.clone(),
            request,
        );
        edit.validate()?;
        let payload = ctx.dispatch(self.model.edit(&edit)).await?;
        let black = decode_payload(payload, Provenance::Edited)?;

        ctx.checkpoint()?;
        Self::enter(lifecycle, tracker, SlotState::Reconciling)?;
        let reconciled = reconcile(&primary, black, self.config.resample_filter)?;

        ctx.checkpoint()?;
        Self::enter(lifecycle, tracker, SlotState::Compositing)?;
        let image = recover_alpha_with(&primary, &reconciled.image, &self.config.recovery)?;

        Ok(TransparentAsset::new(
            image,
            request.prompt.clone(),
            ctx.slot_id,
            ctx.ordinal,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{scene, MockImageModel, MockStep, SUBJECT};
    use crate::error::ErrorKind;
    use crate::services::{ChannelProgressReporter, NoOpProgressReporter, ProgressEvent};
    use crate::types::PixelLayout;
    use std::time::Duration;

    const FULL_TRACE: [SlotState; 6] = [
        SlotState::Requested,
        SlotState::GeneratingPrimary,
        SlotState::AwaitingBackgroundSwap,
        SlotState::Reconciling,
        SlotState::Compositing,
        SlotState::Succeeded,
    ];

    fn pipeline(mock: &MockImageModel) -> TransparentAssetPipeline {
        TransparentAssetPipeline::new(Arc::new(mock.clone()), PipelineConfig::default())
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("a blue robot", "mock-model")
    }

    #[tokio::test]
    async fn test_transparent_run_recovers_subject() {
        let mock = MockImageModel::new();
        let ctx = SlotContext::new(SlotId(1), 0, &NoOpProgressReporter);
        let run = pipeline(&mock).run(&request(), PipelineMode::Transparent, &ctx).await;

        assert_eq!(run.lifecycle.history(), &FULL_TRACE);
        let asset = run.result.unwrap();
        assert!(asset.is_transparent());
        assert_eq!(asset.prompt, "a blue robot");
        assert_eq!(asset.slot_id, SlotId(1));
        assert_eq!(asset.image.pixel(4, 4), Some(&[SUBJECT[0], SUBJECT[1], SUBJECT[2], 255][..]));
        assert_eq!(asset.image.pixel(0, 0), Some(&[0u8, 0, 0, 0][..]));

        let calls = mock.get_call_history();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("generate:a blue robot"));
        assert!(calls[0].contains(&PipelineConfig::default().white_background_directive));
        assert_eq!(
            calls[1],
            format!("edit:{}", PipelineConfig::default().black_background_instruction)
        );
    }

    #[tokio::test]
    async fn test_blank_edit_instruction_fails_before_dispatch() {
        let mock = MockImageModel::new();
        let config = PipelineConfig {
            black_background_instruction: "   ".to_string(),
            ..PipelineConfig::default()
        };
        let pipeline = TransparentAssetPipeline::new(Arc::new(mock.clone()), config);
        let ctx = SlotContext::new(SlotId(5), 0, &NoOpProgressReporter);
        let run = pipeline.run(&request(), PipelineMode::Transparent, &ctx).await;

        assert_eq!(run.state(), SlotState::Failed);
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(
            run.lifecycle.history(),
            &[
                SlotState::Requested,
                SlotState::GeneratingPrimary,
                SlotState::AwaitingBackgroundSwap,
                SlotState::Failed
            ]
        );
        assert_eq!(mock.calls("generate"), 1);
        assert_eq!(mock.calls("edit"), 0);
    }

    #[tokio::test]
    async fn test_opaque_run_skips_edit() {
        let mock = MockImageModel::new();
        let ctx = SlotContext::new(SlotId(2), 0, &NoOpProgressReporter);
        let run = pipeline(&mock).run(&request(), PipelineMode::Opaque, &ctx).await;

        assert_eq!(
            run.lifecycle.history(),
            &[SlotState::Requested, SlotState::GeneratingPrimary, SlotState::Succeeded]
        );
        let asset = run.result.unwrap();
        assert!(!asset.is_transparent());
        assert_eq!(mock.get_call_history(), vec!["generate:a blue robot".to_string()]);
    }

    #[tokio::test]
    async fn test_edit_failure_is_not_retried() {
        let mock = MockImageModel::new().script_edit(vec![MockStep::Fail("503".to_string())]);
        let ctx = SlotContext::new(SlotId(3), 0, &NoOpProgressReporter);
        let run = pipeline(&mock).run(&request(), PipelineMode::Transparent, &ctx).await;

        assert_eq!(run.state(), SlotState::Failed);
        assert_eq!(
            run.lifecycle.history(),
            &[
                SlotState::Requested,
                SlotState::GeneratingPrimary,
                SlotState::AwaitingBackgroundSwap,
                SlotState::Failed
            ]
        );
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::ModelError);
        assert_eq!(mock.calls("generate"), 1);
        assert_eq!(mock.calls("edit"), 1);
    }

    #[tokio::test]
    async fn test_empty_response_is_malformed() {
        let mock = MockImageModel::new().script_generate(vec![MockStep::Empty]);
        let ctx = SlotContext::new(SlotId(4), 0, &NoOpProgressReporter);
        let run = pipeline(&mock).run(&request(), PipelineMode::Transparent, &ctx).await;

        assert_eq!(run.state(), SlotState::Failed);
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::MalformedResponseError);
        assert_eq!(mock.calls("edit"), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_dispatch() {
        let mock = MockImageModel::new();
        let ctx = SlotContext::new(SlotId(5), 0, &NoOpProgressReporter);
        let blank = GenerationRequest::new("   ", "mock-model");
        let run = pipeline(&mock).run(&blank, PipelineMode::Transparent, &ctx).await;

        assert_eq!(run.lifecycle.history(), &[SlotState::Requested, SlotState::Failed]);
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::InvalidInput);
        assert!(mock.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_soft_cancel_before_dispatch() {
        let mock = MockImageModel::new();
        let ctx = SlotContext::new(SlotId(6), 0, &NoOpProgressReporter);
        ctx.soft_cancel.cancel();
        let run = pipeline(&mock).run(&request(), PipelineMode::Transparent, &ctx).await;

        assert_eq!(run.lifecycle.history(), &[SlotState::Requested, SlotState::Cancelled]);
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::UserCancelled);
        assert!(mock.get_call_history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_cancel_discards_in_flight_result() {
        let mock = MockImageModel::new().with_delay(Duration::from_millis(100));
        let pipeline = pipeline(&mock);
        let ctx = SlotContext::new(SlotId(7), 0, &NoOpProgressReporter);

        let cancel_soon = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx.soft_cancel.cancel();
        };
        let req = request();
        let (run, ()) = tokio::join!(
            pipeline.run(&req, PipelineMode::Transparent, &ctx),
            cancel_soon
        );

        assert_eq!(
            run.lifecycle.history(),
            &[SlotState::Requested, SlotState::GeneratingPrimary, SlotState::Cancelled]
        );
        assert!(run.result.unwrap_err().is_cancellation());
        // The in-flight generate completed, but nothing was dispatched after it
        assert_eq!(mock.calls("generate"), 1);
        assert_eq!(mock.calls("edit"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_cancel_aborts_hanging_request() {
        let mock = MockImageModel::new().script_edit(vec![MockStep::Hang]);
        let pipeline = pipeline(&mock);
        let ctx = SlotContext::new(SlotId(8), 0, &NoOpProgressReporter);

        let abort_soon = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.hard_cancel.cancel();
        };
        let req = request();
        let (run, ()) = tokio::join!(
            pipeline.run(&req, PipelineMode::Transparent, &ctx),
            abort_soon
        );

        assert_eq!(run.state(), SlotState::Cancelled);
        assert_eq!(run.lifecycle.history()[2], SlotState::AwaitingBackgroundSwap);
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::UserCancelled);
    }

    #[tokio::test]
    async fn test_mismatched_edit_is_reconciled() {
        let mock = MockImageModel::with_outputs(
            scene([255, 255, 255], 8, 8),
            scene([0, 0, 0], 16, 16),
        );
        let ctx = SlotContext::new(SlotId(9), 0, &NoOpProgressReporter);
        let run = pipeline(&mock).run(&request(), PipelineMode::Transparent, &ctx).await;

        assert_eq!(run.lifecycle.history(), &FULL_TRACE);
        let asset = run.result.unwrap();
        assert_eq!(asset.image.dimensions(), (8, 8));
        assert_eq!(asset.image.layout(), PixelLayout::Rgba8);
    }

    #[tokio::test]
    async fn test_progress_follows_lifecycle() {
        let mock = MockImageModel::new();
        let (reporter, mut events) = ChannelProgressReporter::channel();
        let ctx = SlotContext::new(SlotId(10), 3, &reporter);
        let run = pipeline(&mock).run(&request(), PipelineMode::Transparent, &ctx).await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::Progress(update) = event {
                assert_eq!(update.slot_id, SlotId(10));
                assert_eq!(update.ordinal, 3);
                states.push(update.state);
            }
        }
        assert_eq!(states, run.lifecycle.history());
    }
}
