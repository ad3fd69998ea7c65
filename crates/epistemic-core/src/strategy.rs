//! Turning stored scores into a labeling order.
//!
//! Scoring writes per-image numbers; an active-learning strategy picks what
//! to label next. [`rank_by_entropy`] reads the persisted entropy back from a
//! datastore. [`ScoreFusion`] combines the in-memory results of a run, and
//! [`EntropyMinusQuality`] is the entropy/label-quality combination.

use std::cmp::Ordering;

use serde::Serialize;

use crate::datastore::Datastore;
use crate::error::{Result, ScoringError};
use crate::scoring::ImageScore;

/// An image and the score it was ranked by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedImage {
    pub image_id: String,
    pub score: f64,
}

/// Rescale values to `[0, 1]`.
///
/// Non-finite values map to 0. When every finite value is equal, all map to 0.
pub fn normalize_min_max(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() || !(range > 0.0) {
                0.0
            } else {
                (v - min) / range
            }
        })
        .collect()
}

/// Combines the scores of a run into one number per image.
pub trait ScoreFusion {
    fn name(&self) -> &str;

    /// One fused value per input score, in input order.
    fn fuse(&self, scores: &[ImageScore]) -> Vec<f64>;

    /// Fused scores sorted highest first.
    fn rank(&self, scores: &[ImageScore]) -> Vec<RankedImage> {
        let fused = self.fuse(scores);
        let ranked = scores
            .iter()
            .zip(fused)
            .map(|(s, score)| RankedImage {
                image_id: s.image_id.clone(),
                score,
            })
            .collect();
        sort_descending(ranked)
    }
}

/// Rank by raw entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyOnly;

impl ScoreFusion for EntropyOnly {
    fn name(&self) -> &str {
        "entropy"
    }

    fn fuse(&self, scores: &[ImageScore]) -> Vec<f64> {
        scores.iter().map(|s| s.entropy).collect()
    }
}

/// Normalized entropy minus normalized label quality.
///
/// High disagreement between passes raises the score; a prediction far from
/// its reference label lowers it. Images without a label-quality score
/// contribute 0 for that term.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyMinusQuality;

impl ScoreFusion for EntropyMinusQuality {
    fn name(&self) -> &str {
        "entropy-minus-quality"
    }

    fn fuse(&self, scores: &[ImageScore]) -> Vec<f64> {
        let entropy: Vec<f64> = scores.iter().map(|s| s.entropy).collect();
        let quality: Vec<f64> = scores
            .iter()
            .map(|s| s.label_quality.unwrap_or(f64::NAN))
            .collect();
        let entropy = normalize_min_max(&entropy);
        let quality = normalize_min_max(&quality);
        entropy.iter().zip(&quality).map(|(e, q)| e - q).collect()
    }
}

/// Rank the datastore's unlabeled images by their stored entropy.
///
/// Images with no stored score rank as 0.
pub fn rank_by_entropy(datastore: &dyn Datastore, entropy_key: &str) -> Result<Vec<RankedImage>> {
    let images = datastore
        .get_unlabeled_images()
        .map_err(|e| ScoringError::datastore("get_unlabeled_images", None, e))?;

    let mut ranked = Vec::with_capacity(images.len());
    for image_id in images {
        let info = datastore
            .get_image_info(&image_id)
            .map_err(|e| ScoringError::datastore("get_image_info", Some(&image_id), e))?;
        let score = info.get(entropy_key).and_then(|v| v.as_f64()).unwrap_or(0.0);
        ranked.push(RankedImage { image_id, score });
    }
    Ok(sort_descending(ranked))
}

/// Highest score first; NaN last; ties keep their input order.
fn sort_descending(mut ranked: Vec<RankedImage>) -> Vec<RankedImage> {
    ranked.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.score.total_cmp(&a.score),
    });
    ranked
}
