//! Epistemic uncertainty scoring over the unlabeled part of a datastore.
//!
//! Architecture:
//! 1. Derive the model version tag from the model file's mtime
//! 2. Skip images already scored under that tag
//! 3. Run `simulation_size` stochastic passes per remaining image
//! 4. Stack the passes, reduce to a variance map, then to a scalar
//! 5. Write score + tag back to the image's metadata in one update
//! 6. Spread images over a bounded worker pool when there is more than one
//!
//! Every image is scored by exactly one worker and written exactly once.
//! A failed image does not cancel its siblings: the run waits for all of
//! them and then reports the first failure in submission order.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::{DeviceInventory, RunPlan, ScoringConfig, ScoringRequest, available_cpus};
use crate::datastore::{Datastore, GroundTruthSource, ImageInfo, stored_timestamp};
use crate::error::{Result, ScoringError};
use crate::metrics::{LabelQualityReducer, VarianceReducer};
use crate::pool::{WorkerPool, panic_message};
use crate::task::{InferRequest, InferTask};
use crate::version::model_version;
use crate::volume::Ensemble;

/// Scores produced for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageScore {
    pub image_id: String,
    /// NaN-aware mean of the variance map.
    pub entropy: f64,
    /// Label-quality score, when a ground-truth source is attached.
    pub label_quality: Option<f64>,
    /// Stochastic passes that produced a prediction.
    pub predictions: usize,
    /// Model version tag written alongside the score.
    pub model_ts: i64,
    /// Wall-clock seconds spent on the image.
    pub latency: f64,
}

/// Outcome of one scoring run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Unlabeled images found in the datastore.
    pub total: usize,
    /// Images already scored under the current model version.
    pub skipped: usize,
    /// Images scored in this run.
    pub executed: usize,
    /// Wall-clock seconds, rounded to milliseconds.
    pub latency: f64,
    /// Per-image results, in submission order.
    #[serde(skip)]
    pub scores: Vec<ImageScore>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total: {}; skipped: {}; executed: {}; latency: {:.3}",
            self.total, self.skipped, self.executed, self.latency
        )
    }
}

/// Calls `clear_cache` on the task when dropped, whichever way the run ends.
struct ClearCacheOnDrop<'a>(&'a dyn InferTask);

impl Drop for ClearCacheOnDrop<'_> {
    fn drop(&mut self) {
        self.0.clear_cache();
    }
}

/// Dropout-ensemble scoring method bound to one inference task.
pub struct EpistemicScoring {
    task: Arc<dyn InferTask>,
    config: ScoringConfig,
    ground_truth: Option<Arc<dyn GroundTruthSource>>,
    inventory: DeviceInventory,
    cpus: usize,
    variance: VarianceReducer,
    label_quality: LabelQualityReducer,
    description: String,
}

impl EpistemicScoring {
    /// Scoring with default configuration.
    pub fn new(task: Arc<dyn InferTask>) -> Self {
        Self::with_config(task, ScoringConfig::default())
    }

    pub fn with_config(task: Arc<dyn InferTask>, config: ScoringConfig) -> Self {
        let description = format!(
            "Compute initial score based on dropout - {}",
            task.description()
        );
        let variance = VarianceReducer::new(config.variance_threshold);
        Self {
            task,
            config,
            ground_truth: None,
            inventory: DeviceInventory::detect(),
            cpus: available_cpus(),
            variance,
            label_quality: LabelQualityReducer,
            description,
        }
    }

    /// Attach a ground-truth source; enables label-quality scoring.
    pub fn with_ground_truth(mut self, source: Arc<dyn GroundTruthSource>) -> Self {
        self.ground_truth = Some(source);
        self
    }

    /// Override the detected accelerator inventory.
    pub fn with_devices(mut self, inventory: DeviceInventory) -> Self {
        self.inventory = inventory;
        self
    }

    /// Override the detected CPU count used to bound the worker pool.
    pub fn with_cpu_count(mut self, cpus: usize) -> Self {
        self.cpus = cpus.max(1);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    fn target(&self) -> &str {
        &self.config.log_target
    }

    /// Resolve a request into the parameters a run would use.
    pub fn plan(&self, request: &ScoringRequest) -> RunPlan {
        RunPlan::resolve(&self.config, request, self.cpus, &self.inventory)
    }

    /// Score from a JSON request bag.
    pub fn score_value(&self, request: &Value, datastore: &dyn Datastore) -> Result<RunSummary> {
        let request = ScoringRequest::from_value(request)?;
        self.score(&request, datastore)
    }

    /// Score every unlabeled image not yet scored under the current model.
    pub fn score(&self, request: &ScoringRequest, datastore: &dyn Datastore) -> Result<RunSummary> {
        info!(target: self.target(), "Starting Epistemic Uncertainty scoring");

        let model_path = self.task.path();
        let model_ts = model_version(model_path.as_deref())?;
        self.task.clear_cache();
        let _clear_after = ClearCacheOnDrop(self.task.as_ref());

        let unlabeled = datastore
            .get_unlabeled_images()
            .map_err(|e| ScoringError::datastore("get_unlabeled_images", None, e))?;
        let plan = self.plan(request);
        info!(
            target: self.target(),
            "EPISTEMIC:: Total unlabeled images: {}; max_samples: {}; model_ts: {}",
            unlabeled.len(),
            plan.max_samples,
            model_ts
        );
        let started = Instant::now();

        let mut skipped = 0;
        let mut image_ids = Vec::with_capacity(unlabeled.len());
        for image_id in &unlabeled {
            let info = datastore
                .get_image_info(image_id)
                .map_err(|e| ScoringError::datastore("get_image_info", Some(image_id), e))?;
            if stored_timestamp(&info, &self.config.key_output_ts) == Some(model_ts) {
                skipped += 1;
                continue;
            }
            image_ids.push(image_id.clone());
        }
        plan.truncate(&mut image_ids);

        let scores = if image_ids.len() > 1 && plan.max_workers > 1 {
            info!(
                target: self.target(),
                "MultiGpu: {}; Using Device(s): {:?}; Max Workers: {}",
                plan.multi_gpu,
                plan.devices,
                plan.max_workers
            );
            self.score_parallel(&plan, &image_ids, model_ts, datastore)?
        } else {
            image_ids
                .iter()
                .map(|id| self.run_scoring(id, plan.simulation_size, model_ts, datastore))
                .collect::<Result<Vec<_>>>()?
        };

        let summary = RunSummary {
            total: unlabeled.len(),
            skipped,
            executed: image_ids.len(),
            latency: round_millis(started.elapsed().as_secs_f64()),
            scores,
        };
        info!(target: self.target(), "EPISTEMIC:: {summary}");
        Ok(summary)
    }

    fn score_parallel(
        &self,
        plan: &RunPlan,
        image_ids: &[String],
        model_ts: i64,
        datastore: &dyn Datastore,
    ) -> Result<Vec<ImageScore>> {
        let pool = WorkerPool::new(plan.max_workers);
        let outcomes = pool.run_all(image_ids, |image_id| {
            self.run_scoring(image_id, plan.simulation_size, model_ts, datastore)
        });

        let mut scores = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for (image_id, outcome) in image_ids.iter().zip(outcomes) {
            let err = match outcome {
                Ok(Ok(score)) => {
                    scores.push(score);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(payload) => ScoringError::WorkerPanicked {
                    image_id: image_id.clone(),
                    message: panic_message(&*payload),
                },
            };
            warn!(target: self.target(), "EPISTEMIC:: {image_id} => failed: {err}");
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(scores),
        }
    }

    /// Score a single image and persist the result.
    ///
    /// Runs `simulation_size` sequential passes, needs at least two of them to
    /// produce a prediction, and issues exactly one metadata update.
    pub fn run_scoring(
        &self,
        image_id: &str,
        simulation_size: usize,
        model_ts: i64,
        datastore: &dyn Datastore,
    ) -> Result<ImageScore> {
        let started = Instant::now();
        let uri = datastore
            .get_image_uri(image_id)
            .map_err(|e| ScoringError::datastore("get_image_uri", Some(image_id), e))?;
        let request = InferRequest::for_scoring(uri);

        let mut predictions = Vec::with_capacity(simulation_size);
        for i in 0..simulation_size {
            let pred = self
                .task
                .predict_label(&request)
                .map_err(|source| ScoringError::Inference {
                    image_id: image_id.to_string(),
                    source,
                })?;
            match pred {
                Some(pred) => {
                    debug!(
                        target: self.target(),
                        "EPISTEMIC:: {image_id} => {i} => pred: {:?}; sum: {}",
                        pred.shape(),
                        pred.sum()
                    );
                    predictions.push(pred);
                }
                None => info!(target: self.target(), "EPISTEMIC:: {image_id} => {i} => pred: None"),
            }
        }

        let ensemble = Ensemble::stack(image_id, self.task.dimension(), &predictions)?;
        let entropy = self.variance.reduce(&ensemble)?;
        let label_quality = self.score_label_quality(image_id, &predictions)?;

        let latency = started.elapsed().as_secs_f64();
        info!(
            target: self.target(),
            "EPISTEMIC:: {image_id} => iters: {simulation_size}; entropy: {entropy:.4}; latency: {latency:.3};"
        );

        let mut info = ImageInfo::new();
        info.insert(self.config.key_output_entropy.clone(), json!(entropy));
        info.insert(self.config.key_output_ts.clone(), json!(model_ts));
        if let Some(lq) = label_quality {
            info.insert(self.config.key_output_label_quality.clone(), json!(lq));
        }
        datastore
            .update_image_info(image_id, info)
            .map_err(|e| ScoringError::datastore("update_image_info", Some(image_id), e))?;

        Ok(ImageScore {
            image_id: image_id.to_string(),
            entropy,
            label_quality,
            predictions: ensemble.len(),
            model_ts,
            latency,
        })
    }

    /// Label quality of the last prediction, when ground truth is attached.
    fn score_label_quality(
        &self,
        image_id: &str,
        predictions: &[crate::volume::LabelVolume],
    ) -> Result<Option<f64>> {
        let Some(source) = &self.ground_truth else {
            return Ok(None);
        };
        let truth = source
            .ground_truth(image_id)
            .map_err(|e| ScoringError::datastore("ground_truth", Some(image_id), e))?
            .ok_or_else(|| ScoringError::MissingGroundTruth {
                image_id: image_id.to_string(),
            })?;
        predictions
            .last()
            .map(|pred| self.label_quality.reduce(pred, &truth))
            .transpose()
    }
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}
