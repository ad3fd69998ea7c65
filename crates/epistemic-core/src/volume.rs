//! Label volumes, ensemble stacking and the shape descriptor that tells the
//! reducers how to read a stacked ensemble.
//!
//! Inference tasks return label volumes in whatever layout their post
//! transforms leave behind: `[1, 1, D, H, W]`, `[C, D, H, W]`, `[H, W]` and so
//! on. Unit axes carry no information, so every member is squeezed before
//! stacking. What is left is either purely spatial (single channel) or has one
//! leading class axis whose index 0 is the background.

use std::fmt;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};

use crate::error::{Result, ScoringError};

/// A predicted (or ground-truth) label volume as returned by an inference task.
pub type LabelVolume = ArrayD<f32>;

/// Minimum number of ensemble members a variance is computed over.
pub const MIN_ENSEMBLE_SIZE: usize = 2;

/// Spatial dimensionality of the images an inference task works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Slices / 2-D images.
    Two,
    /// Volumes.
    Three,
}

impl Dimension {
    /// Map a numeric dimension (2 or 3) to the enum.
    pub fn from_rank(rank: usize) -> Option<Self> {
        match rank {
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    /// Number of spatial axes.
    pub fn spatial_rank(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Two => write!(f, "2-D"),
            Self::Three => write!(f, "3-D"),
        }
    }
}

/// Channel layout of a squeezed ensemble member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Purely spatial member, no class axis.
    Single,
    /// Leading class axis of `classes` entries, index 0 is the background.
    MultiClass { classes: usize },
}

/// Tagged description of how a stacked ensemble is laid out.
///
/// Classified once per ensemble from the first member and threaded through
/// the reducers instead of re-inspecting tensor ranks at every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeDescriptor {
    pub dimension: Dimension,
    pub channels: ChannelLayout,
}

impl ShapeDescriptor {
    /// Classify a squeezed member shape.
    ///
    /// A member with more axes than the spatial rank carries a class axis in
    /// front. Anything beyond one extra axis cannot be interpreted.
    pub fn classify(dimension: Dimension, squeezed: &[usize]) -> Result<Self> {
        let spatial = dimension.spatial_rank();
        let channels = match squeezed.len() {
            0 => {
                return Err(ScoringError::UnsupportedRank {
                    dimension,
                    rank: 0,
                    shape: squeezed.to_vec(),
                });
            }
            rank if rank <= spatial => ChannelLayout::Single,
            rank if rank == spatial + 1 => ChannelLayout::MultiClass {
                classes: squeezed[0],
            },
            rank => {
                return Err(ScoringError::UnsupportedRank {
                    dimension,
                    rank,
                    shape: squeezed.to_vec(),
                });
            }
        };
        Ok(Self {
            dimension,
            channels,
        })
    }

    /// Whether the background class must be dropped before reduction.
    pub fn has_background(&self) -> bool {
        matches!(self.channels, ChannelLayout::MultiClass { .. })
    }
}

/// Shape with every unit axis removed.
pub fn squeezed_shape(shape: &[usize]) -> Vec<usize> {
    shape.iter().copied().filter(|&d| d != 1).collect()
}

/// Stack of stochastic predictions for one image.
///
/// Layout is `[trials, member...]` where `member` is the squeezed shape of the
/// first prediction. Values are held as `f64`.
#[derive(Debug, Clone)]
pub struct Ensemble {
    descriptor: ShapeDescriptor,
    trials: ArrayD<f64>,
}

impl Ensemble {
    /// Squeeze, cast and stack the predictions collected for `image_id`.
    ///
    /// Every member must have the same shape as the first one.
    pub fn stack(image_id: &str, dimension: Dimension, members: &[LabelVolume]) -> Result<Self> {
        if members.len() < MIN_ENSEMBLE_SIZE {
            return Err(ScoringError::InsufficientEnsemble {
                image_id: image_id.to_string(),
                collected: members.len(),
                required: MIN_ENSEMBLE_SIZE,
            });
        }

        let reference = members[0].shape().to_vec();
        let member_shape = squeezed_shape(&reference);
        let descriptor = ShapeDescriptor::classify(dimension, &member_shape)?;

        let per_member: usize = member_shape.iter().product();
        let mut data = Vec::with_capacity(per_member * members.len());
        for member in members {
            if member.shape() != reference.as_slice() {
                return Err(ScoringError::ShapeMismatch {
                    expected: reference,
                    found: member.shape().to_vec(),
                });
            }
            data.extend(member.iter().map(|&v| f64::from(v)));
        }

        let mut shape = Vec::with_capacity(member_shape.len() + 1);
        shape.push(members.len());
        shape.extend_from_slice(&member_shape);
        let trials = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|_| {
            ScoringError::ShapeMismatch {
                expected: shape.clone(),
                found: reference.clone(),
            }
        })?;

        Ok(Self { descriptor, trials })
    }

    pub fn descriptor(&self) -> ShapeDescriptor {
        self.descriptor
    }

    /// Number of stacked predictions.
    pub fn len(&self) -> usize {
        self.trials.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Squeezed shape of a single member.
    pub fn member_shape(&self) -> &[usize] {
        &self.trials.shape()[1..]
    }

    /// Full stack, background included.
    pub fn trials(&self) -> ArrayViewD<'_, f64> {
        self.trials.view()
    }

    /// Stack with the background class removed for multi-class members.
    pub fn foreground(&self) -> ArrayViewD<'_, f64> {
        if self.descriptor.has_background() {
            self.trials.slice_axis(Axis(1), Slice::from(1usize..))
        } else {
            self.trials.view()
        }
    }
}
