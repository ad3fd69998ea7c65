//! Label quality: how far a prediction sits from a reference label.
//!
//! The score is the sum of absolute per-element differences, background class
//! included. Larger means the prediction disagrees more with the label.

use crate::error::{Result, ScoringError};
use crate::volume::{LabelVolume, squeezed_shape};

/// Sum-reduced absolute difference between prediction and ground truth.
///
/// Shapes are compared after squeezing unit axes, so `[1, 1, D, H, W]` and
/// `[D, H, W]` are interchangeable.
pub fn label_quality_score(prediction: &LabelVolume, ground_truth: &LabelVolume) -> Result<f64> {
    let pred_shape = squeezed_shape(prediction.shape());
    let truth_shape = squeezed_shape(ground_truth.shape());
    if pred_shape != truth_shape {
        return Err(ScoringError::ShapeMismatch {
            expected: truth_shape,
            found: pred_shape,
        });
    }

    Ok(prediction
        .iter()
        .zip(ground_truth.iter())
        .map(|(&p, &t)| (f64::from(p) - f64::from(t)).abs())
        .sum())
}

/// Reducer wrapper so the routine can hold both reducers the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelQualityReducer;

impl LabelQualityReducer {
    pub fn reduce(&self, prediction: &LabelVolume, ground_truth: &LabelVolume) -> Result<f64> {
        label_quality_score(prediction, ground_truth)
    }
}
