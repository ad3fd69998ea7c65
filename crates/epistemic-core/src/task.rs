//! Inference task abstraction consumed by the scoring engine.
//!
//! The host application owns the network, pre/post transforms and device
//! binding. The engine only needs a single forward pass per call and a few
//! facts about the task: where its model file lives, which output holds the
//! label volume, and whether it works on slices or volumes.

use std::collections::HashMap;
use std::path::PathBuf;

use log::LevelFilter;

use crate::error::BoxError;
use crate::volume::{Dimension, LabelVolume};

/// Named outputs of a single inference call.
pub type InferOutput = HashMap<String, LabelVolume>;

/// Default key under which tasks return the predicted label volume.
pub const DEFAULT_OUTPUT_LABEL_KEY: &str = "pred";

/// Request for one forward pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferRequest {
    /// Resolvable URI of the image to run on.
    pub image: String,
    /// Log level the task should use while serving this request.
    pub logging: LevelFilter,
    /// Whether the task may reuse cached pre-transform results.
    pub cache_transforms: bool,
}

impl InferRequest {
    /// Request used for stochastic scoring passes: quiet logging and no
    /// transform caching, so repeated passes on the same image stay independent.
    pub fn for_scoring(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            logging: LevelFilter::Error,
            cache_transforms: false,
        }
    }
}

/// Trait every inference task must implement.
pub trait InferTask: Send + Sync {
    /// One-line human-readable description.
    fn description(&self) -> &str;

    /// Name of the output holding the predicted label volume.
    fn output_label_key(&self) -> &str {
        DEFAULT_OUTPUT_LABEL_KEY
    }

    /// Spatial dimensionality of the inputs.
    fn dimension(&self) -> Dimension;

    /// Location of the model file, if the task is backed by one.
    fn path(&self) -> Option<PathBuf>;

    /// Drop any memoized state (loaded networks, cached transforms).
    fn clear_cache(&self);

    /// Run one forward pass. `Ok(None)` means the pass produced no output.
    fn infer(&self, request: &InferRequest) -> Result<Option<InferOutput>, BoxError>;

    /// Convenience: run one pass and pick out the label volume.
    fn predict_label(&self, request: &InferRequest) -> Result<Option<LabelVolume>, BoxError> {
        let key = self.output_label_key();
        Ok(self
            .infer(request)?
            .and_then(|mut outputs| outputs.remove(key)))
    }
}
