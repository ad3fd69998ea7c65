//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use epistemic_core::{
    BoxError, Datastore, Dimension, GroundTruthSource, ImageInfo, InferOutput, InferRequest,
    InferTask, LabelVolume,
};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn uri_of(image_id: &str) -> String {
    format!("mem://{image_id}")
}

// ---------------------------------------------------------------------------
// Datastore
// ---------------------------------------------------------------------------

/// Unlabeled images with mutable metadata and per-image update counters.
#[derive(Default)]
pub struct MemoryDatastore {
    unlabeled: Vec<String>,
    info: Mutex<HashMap<String, ImageInfo>>,
    updates: Mutex<HashMap<String, usize>>,
}

impl MemoryDatastore {
    pub fn with_images(count: usize) -> Self {
        Self::with_ids((0..count).map(|i| format!("img{i}")))
    }

    pub fn with_ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            unlabeled: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.unlabeled
    }

    pub fn set(&self, image_id: &str, key: &str, value: Value) {
        self.info
            .lock()
            .unwrap()
            .entry(image_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn info(&self, image_id: &str) -> ImageInfo {
        self.info
            .lock()
            .unwrap()
            .get(image_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn updates(&self, image_id: &str) -> usize {
        self.updates
            .lock()
            .unwrap()
            .get(image_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_updates(&self) -> usize {
        self.updates.lock().unwrap().values().sum()
    }
}

impl Datastore for MemoryDatastore {
    fn get_unlabeled_images(&self) -> Result<Vec<String>, BoxError> {
        Ok(self.unlabeled.clone())
    }

    fn get_image_info(&self, image_id: &str) -> Result<ImageInfo, BoxError> {
        Ok(self.info(image_id))
    }

    fn get_image_uri(&self, image_id: &str) -> Result<String, BoxError> {
        if self.unlabeled.iter().any(|id| id == image_id) {
            Ok(uri_of(image_id))
        } else {
            Err(format!("unknown image {image_id}").into())
        }
    }

    fn update_image_info(&self, image_id: &str, info: ImageInfo) -> Result<(), BoxError> {
        self.info
            .lock()
            .unwrap()
            .entry(image_id.to_string())
            .or_default()
            .extend(info);
        *self
            .updates
            .lock()
            .unwrap()
            .entry(image_id.to_string())
            .or_default() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inference task
// ---------------------------------------------------------------------------

/// How the fake task answers for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Uniform random values from the shared seeded generator.
    Random,
    /// Every voxel set to the given value.
    Constant(f32),
    /// Only the first `n` calls return a prediction.
    OutputFirst(usize),
    /// Every call fails.
    Fail,
    /// Every call panics.
    Panic,
}

/// Dropout-like task: repeated calls on the same image give different volumes.
pub struct FakeTask {
    shape: Vec<usize>,
    dimension: Dimension,
    model_path: Option<PathBuf>,
    default: Behavior,
    overrides: HashMap<String, Behavior>,
    delay: Duration,
    rng: Mutex<StdRng>,
    calls: Mutex<HashMap<String, usize>>,
    clears: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTask {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            dimension: Dimension::Two,
            model_path: None,
            default: Behavior::Random,
            overrides: HashMap::new(),
            delay: Duration::ZERO,
            rng: Mutex::new(StdRng::seed_from_u64(7)),
            calls: Mutex::new(HashMap::new()),
            clears: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn with_default(mut self, behavior: Behavior) -> Self {
        self.default = behavior;
        self
    }

    pub fn with_behavior(mut self, image_id: &str, behavior: Behavior) -> Self {
        self.overrides.insert(uri_of(image_id), behavior);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, image_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&uri_of(image_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Most inference calls seen in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn volume(&self, behavior: Behavior) -> LabelVolume {
        match behavior {
            Behavior::Constant(v) => ArrayD::from_elem(IxDyn(&self.shape), v),
            _ => {
                let mut rng = self.rng.lock().unwrap();
                ArrayD::from_shape_simple_fn(IxDyn(&self.shape), || rng.random::<f32>())
            }
        }
    }
}

impl InferTask for FakeTask {
    fn description(&self) -> &str {
        "fake dropout segmentation"
    }

    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn path(&self) -> Option<PathBuf> {
        self.model_path.clone()
    }

    fn clear_cache(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn infer(&self, request: &InferRequest) -> Result<Option<InferOutput>, BoxError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(request.image.clone()).or_default();
            *n += 1;
            *n
        };
        let behavior = self
            .overrides
            .get(&request.image)
            .copied()
            .unwrap_or(self.default);

        let result = match behavior {
            Behavior::Fail => Err(format!("model crashed on {}", request.image).into()),
            Behavior::Panic => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                panic!("device lost while reading {}", request.image);
            }
            Behavior::OutputFirst(n) if call > n => Ok(None),
            other => {
                let mut out = InferOutput::new();
                out.insert("pred".to_string(), self.volume(other));
                Ok(Some(out))
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// Ground truth
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryGroundTruth {
    labels: HashMap<String, LabelVolume>,
}

impl MemoryGroundTruth {
    pub fn with_label(mut self, image_id: &str, label: LabelVolume) -> Self {
        self.labels.insert(image_id.to_string(), label);
        self
    }
}

impl GroundTruthSource for MemoryGroundTruth {
    fn ground_truth(&self, image_id: &str) -> Result<Option<LabelVolume>, BoxError> {
        Ok(self.labels.get(image_id).cloned())
    }
}
