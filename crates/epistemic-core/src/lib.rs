//! # epistemic-core
//!
//! **Rank unlabeled images by how much a model disagrees with itself.**
//!
//! `epistemic-core` scores each unlabeled image in a datastore by running a
//! stochastic (dropout-enabled) segmentation model several times on it and
//! measuring how much the predictions vary. High variance marks images the
//! model is unsure about, which are the ones worth sending to an annotator.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use epistemic_core::{Datastore, EpistemicScoring, InferTask, ScoringRequest};
//!
//! fn run(task: Arc<dyn InferTask>, datastore: &dyn Datastore) -> epistemic_core::Result<()> {
//!     let scoring = EpistemicScoring::new(task);
//!     let request = ScoringRequest {
//!         simulation_size: Some(10),
//!         max_workers: Some(4),
//!         ..Default::default()
//!     };
//!     let summary = scoring.score(&request, datastore)?;
//!     println!("scored {}/{} images", summary.executed, summary.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Datastore → skip already-scored → Worker pool → N stochastic passes →
//! Ensemble → Variance map → Scalar → Datastore
//!
//! Scores are cached per model version: the model file's mtime is written
//! next to each score, and images whose stored tag matches the current model
//! are skipped on the next run. Publishing a new model re-scores everything.
//!
//! The host supplies three collaborators: an [`InferTask`] (one forward pass
//! per call), a [`Datastore`] (image list, URIs and metadata) and, optionally,
//! a [`GroundTruthSource`] enabling label-quality scores. Logging goes through
//! the `log` facade; install any backend to see it.

pub mod config;
pub mod datastore;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod scoring;
pub mod strategy;
pub mod task;
pub mod version;
pub mod volume;

pub use config::{
    DeviceInventory, GpuSelection, RunPlan, ScoringConfig, ScoringRequest, available_cpus,
    resolve_max_workers,
};
pub use datastore::{Datastore, GroundTruthSource, ImageInfo, stored_timestamp};
pub use error::{BoxError, Result, ScoringError};
pub use metrics::{
    LabelQualityReducer, UncertaintyMap, VarianceReducer, label_quality_score, nan_mean,
};
pub use pool::{JobOutcome, WorkerPool};
pub use scoring::{EpistemicScoring, ImageScore, RunSummary};
pub use strategy::{
    EntropyMinusQuality, EntropyOnly, RankedImage, ScoreFusion, normalize_min_max,
    rank_by_entropy,
};
pub use task::{InferOutput, InferRequest, InferTask};
pub use version::{UNTAGGED_MODEL_VERSION, model_version};
pub use volume::{ChannelLayout, Dimension, Ensemble, LabelVolume, ShapeDescriptor};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
