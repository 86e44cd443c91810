//! Edge services: raster codec and progress reporting

pub mod codec;
pub mod progress;

pub use codec::{decode_payload, RasterCodec};
pub use progress::{
    BatchTally, ChannelProgressReporter, NoOpProgressReporter, ProgressEvent, ProgressReporter,
    ProgressTracker, ProgressUpdate, SlotOutcome, SlotSettlement, TracingProgressReporter,
};
