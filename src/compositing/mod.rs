//! Pixel-level stages of the transparent-asset pipeline
//!
//! - [`alpha`]: dual-composite alpha recovery and re-compositing
//! - [`reconcile`]: sizing the edited twin to the primary render
//!
//! Both operate on plain [`RasterImage`](crate::types::RasterImage) buffers and
//! never suspend.

pub mod alpha;
pub mod reconcile;

pub use alpha::{composite_over, recover_alpha, recover_alpha_with, recover_pixel};
pub use reconcile::{reconcile, resample, Reconciled};
