//! Reducers that turn predictions into per-image scalars.
//!
//! Each reducer returns an independent, un-normalized scalar. Combining them
//! into a single ranking key is left to [`crate::strategy`].

pub mod label_quality;
pub mod variance;

pub use label_quality::{LabelQualityReducer, label_quality_score};
pub use variance::{DEFAULT_VARIANCE_THRESHOLD, UncertaintyMap, VarianceReducer, nan_mean};
