//! Datastore and ground-truth collaborators.
//!
//! The datastore owns image records. The engine reads the unlabeled list,
//! resolves URIs, reads metadata and patches two or three keys per image.
//! Implementations must tolerate concurrent calls for different images.

use serde_json::{Map, Value};

use crate::error::BoxError;
use crate::volume::LabelVolume;

/// Per-image metadata mapping.
pub type ImageInfo = Map<String, Value>;

pub trait Datastore: Send + Sync {
    /// Identifiers of every image without a final label, in datastore order.
    fn get_unlabeled_images(&self) -> Result<Vec<String>, BoxError>;

    /// Metadata stored for an image. Unknown images may return an empty map.
    fn get_image_info(&self, image_id: &str) -> Result<ImageInfo, BoxError>;

    /// URI an inference task can resolve to the raw image.
    fn get_image_uri(&self, image_id: &str) -> Result<String, BoxError>;

    /// Merge `info` into the image's metadata, overwriting existing keys.
    fn update_image_info(&self, image_id: &str, info: ImageInfo) -> Result<(), BoxError>;
}

/// Source of reference labels for label-quality scoring.
///
/// Only consulted when one is attached to the scoring engine.
pub trait GroundTruthSource: Send + Sync {
    /// Reference label for the image, `None` when the image has none.
    fn ground_truth(&self, image_id: &str) -> Result<Option<LabelVolume>, BoxError>;
}

/// Read an integer scoring timestamp from image metadata.
///
/// Accepts integral JSON numbers and floats with no fractional part (some
/// stores round-trip integers through `f64`).
pub fn stored_timestamp(info: &ImageInfo, key: &str) -> Option<i64> {
    let value = info.get(key)?;
    if let Some(ts) = value.as_i64() {
        return Some(ts);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.is_finite())
        .map(|f| f as i64)
}
