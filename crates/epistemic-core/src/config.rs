//! Construction-time defaults, the per-run request bag, and how the two are
//! resolved into a concrete run plan.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::metrics::DEFAULT_VARIANCE_THRESHOLD;
use crate::volume::MIN_ENSEMBLE_SIZE;

/// Stochastic passes per image when neither config nor request says otherwise.
pub const DEFAULT_SIMULATION_SIZE: usize = 5;
/// Worker count used when the request does not name one.
pub const DEFAULT_MAX_WORKERS: usize = 2;
/// Device used when scoring on a single device.
pub const DEFAULT_DEVICE: &str = "cuda";

pub const DEFAULT_ENTROPY_KEY: &str = "epistemic_entropy";
pub const DEFAULT_TIMESTAMP_KEY: &str = "epistemic_ts";
pub const DEFAULT_LABEL_QUALITY_KEY: &str = "epistemic_label_quality";
/// Default `log` target for everything the engine emits.
pub const DEFAULT_LOG_TARGET: &str = "epistemic";

/// Engine configuration fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Cap on images scored per run when the request does not set one (0 = no cap).
    pub max_samples: usize,
    /// Stochastic passes per image when the request does not set one.
    pub simulation_size: usize,
    /// Metadata key the entropy score is written under.
    pub key_output_entropy: String,
    /// Metadata key the model version tag is written under.
    pub key_output_ts: String,
    /// Metadata key the label-quality score is written under.
    pub key_output_label_quality: String,
    /// Floor applied to non-positive predictions before the variance.
    pub variance_threshold: f64,
    /// `log` target used for all engine output.
    pub log_target: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_samples: 0,
            simulation_size: DEFAULT_SIMULATION_SIZE,
            key_output_entropy: DEFAULT_ENTROPY_KEY.to_string(),
            key_output_ts: DEFAULT_TIMESTAMP_KEY.to_string(),
            key_output_label_quality: DEFAULT_LABEL_QUALITY_KEY.to_string(),
            variance_threshold: DEFAULT_VARIANCE_THRESHOLD,
            log_target: DEFAULT_LOG_TARGET.to_string(),
        }
    }
}

/// GPU selection in a request: `"all"`, `"0,2"`, or `[0, 2]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GpuSelection {
    Indices(Vec<usize>),
    Spec(String),
}

impl GpuSelection {
    /// Device identifiers for this selection. `"all"` and empty selections
    /// expand to every visible device.
    pub fn device_ids(&self, inventory: &DeviceInventory) -> Vec<String> {
        let indices: Vec<String> = match self {
            Self::Indices(list) if !list.is_empty() => {
                list.iter().map(|i| i.to_string()).collect()
            }
            Self::Spec(spec) if !spec.trim().is_empty() && spec.trim() != "all" => spec
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => (0..inventory.gpu_count()).map(|i| i.to_string()).collect(),
        };
        indices.into_iter().map(|i| format!("cuda:{i}")).collect()
    }
}

impl Default for GpuSelection {
    fn default() -> Self {
        Self::Spec("all".to_string())
    }
}

/// Options a caller may set per scoring run. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringRequest {
    pub max_samples: Option<usize>,
    pub simulation_size: Option<usize>,
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub multi_gpu: bool,
    pub gpus: Option<GpuSelection>,
    pub device: Option<String>,
}

impl ScoringRequest {
    /// Parse a JSON request bag. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(Self::deserialize(value)?)
    }
}

/// Visible accelerator devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInventory {
    gpu_count: usize,
}

impl DeviceInventory {
    pub fn new(gpu_count: usize) -> Self {
        Self { gpu_count }
    }

    /// Count devices listed in `CUDA_VISIBLE_DEVICES` (0 when unset).
    pub fn detect() -> Self {
        let gpu_count = std::env::var("CUDA_VISIBLE_DEVICES")
            .map(|v| count_visible_devices(&v))
            .unwrap_or(0);
        Self { gpu_count }
    }

    pub fn gpu_count(&self) -> usize {
        self.gpu_count
    }
}

fn count_visible_devices(spec: &str) -> usize {
    spec.split(',')
        .map(str::trim)
        .take_while(|s| !s.is_empty() && !s.starts_with('-'))
        .count()
}

/// Number of logical CPUs available to this process.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Concrete parameters of one scoring run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub max_samples: usize,
    pub simulation_size: usize,
    pub max_workers: usize,
    pub multi_gpu: bool,
    /// Advisory device list. Binding happens inside the inference task.
    pub devices: Vec<String>,
}

impl RunPlan {
    /// Resolve request options against config defaults and host resources.
    ///
    /// Logs one warning when the simulation size has to be raised.
    pub fn resolve(
        config: &ScoringConfig,
        request: &ScoringRequest,
        cpus: usize,
        inventory: &DeviceInventory,
    ) -> Self {
        let requested = request.simulation_size.unwrap_or(config.simulation_size);
        let simulation_size = if requested < MIN_ENSEMBLE_SIZE {
            warn!(
                target: config.log_target.as_str(),
                "EPISTEMIC:: Fixing 'simulation_size={MIN_ENSEMBLE_SIZE}' (requested {requested}) as min {MIN_ENSEMBLE_SIZE} simulations are needed to compute entropy"
            );
            MIN_ENSEMBLE_SIZE
        } else {
            requested
        };

        let devices = if request.multi_gpu {
            request
                .gpus
                .clone()
                .unwrap_or_default()
                .device_ids(inventory)
        } else {
            vec![
                request
                    .device
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            ]
        };

        Self {
            max_samples: request.max_samples.unwrap_or(config.max_samples),
            simulation_size,
            max_workers: resolve_max_workers(request.max_workers, cpus),
            multi_gpu: request.multi_gpu,
            devices,
        }
    }

    /// Truncate a work list to `max_samples` (0 keeps everything).
    pub fn truncate<T>(&self, items: &mut Vec<T>) {
        if self.max_samples > 0 {
            items.truncate(self.max_samples);
        }
    }
}

/// Worker count: request value (default 2), 0 meaning half the CPUs, never
/// more than the CPU count and never less than one.
pub fn resolve_max_workers(requested: Option<usize>, cpus: usize) -> usize {
    let cpus = cpus.max(1);
    let workers = match requested.unwrap_or(DEFAULT_MAX_WORKERS) {
        0 => (cpus / 2).max(1),
        n => n,
    };
    workers.min(cpus)
}
