//! Per-voxel variance across stochastic predictions.
//!
//! The uncertainty of a voxel is the population variance (ddof 0) of its value
//! across the trial axis. Before the variance is taken every value at or
//! below zero is lifted to a small threshold, so empty regions of the label
//! volume contribute a constant instead of numerical noise. The scalar score
//! of an image is the NaN-aware mean of the resulting map.

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::error::{Result, ScoringError};
use crate::volume::{Dimension, Ensemble, ShapeDescriptor};

/// Floor applied to non-positive predictions before the variance is taken.
pub const DEFAULT_VARIANCE_THRESHOLD: f64 = 0.0005;

/// Spatial uncertainty map of one image.
///
/// Shape is the squeezed member shape without the background class. For 3-D
/// inputs two leading unit axes are prepended (`[1, 1, ...]`) so the map reads
/// like a batch/channel-first volume.
#[derive(Debug, Clone)]
pub struct UncertaintyMap {
    descriptor: ShapeDescriptor,
    values: ArrayD<f64>,
}

impl UncertaintyMap {
    pub fn descriptor(&self) -> ShapeDescriptor {
        self.descriptor
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn values(&self) -> ArrayViewD<'_, f64> {
        self.values.view()
    }

    pub fn into_values(self) -> ArrayD<f64> {
        self.values
    }

    /// Mean of the map ignoring NaN entries.
    pub fn score(&self) -> Result<f64> {
        nan_mean(self.values.iter()).ok_or(ScoringError::EmptyUncertaintyMap)
    }
}

/// Reduces an [`Ensemble`] to an [`UncertaintyMap`] and a scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarianceReducer {
    threshold: f64,
}

impl Default for VarianceReducer {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_VARIANCE_THRESHOLD,
        }
    }
}

impl VarianceReducer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Per-voxel variance across the trial axis, background excluded.
    pub fn uncertainty_map(&self, ensemble: &Ensemble) -> UncertaintyMap {
        let descriptor = ensemble.descriptor();
        let threshold = self.threshold;
        let lifted = ensemble
            .foreground()
            .mapv(|v| if v <= 0.0 { threshold } else { v });

        let mut values = lifted.var_axis(Axis(0), 0.0);
        if descriptor.dimension == Dimension::Three {
            values = values.insert_axis(Axis(0)).insert_axis(Axis(0));
        }

        UncertaintyMap { descriptor, values }
    }

    /// Scalar uncertainty of the ensemble: NaN-aware mean of the map.
    pub fn reduce(&self, ensemble: &Ensemble) -> Result<f64> {
        self.uncertainty_map(ensemble).score()
    }
}

/// Arithmetic mean of the non-NaN values, `None` when there are none.
pub fn nan_mean<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f64, 0usize), |(sum, n), &v| (sum + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
