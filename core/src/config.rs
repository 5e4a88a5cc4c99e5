use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::Device;

/// Load a JSON configuration from disk, creating it with the provided initializer if missing.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        Ok(value)
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let value = initializer();
        let serialized = serde_json::to_string_pretty(&value)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(value)
    }
}

/// Experiment description as read from disk: one entry per seed is run.
///
/// Keys that are not part of the fixed schema (memory size, epochs, dataset
/// knobs, ...) land in `params` and are read by the learners and the data
/// manager through [`RunConfig::param_or`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub prefix: String,
    pub dataset: String,
    pub model_name: String,
    pub backbone_type: String,
    pub init_cls: usize,
    pub increment: usize,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default)]
    pub imb_metrics: bool,
    pub seed: Vec<u64>,
    pub device: Vec<i64>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

fn default_shuffle() -> bool {
    true
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        let mut params = Map::new();
        params.insert("memory_size".into(), Value::from(200));
        params.insert("epochs".into(), Value::from(5));
        params.insert("batch_size".into(), Value::from(64));
        params.insert("lr".into(), Value::from(1e-3));

        Self {
            prefix: "reproduce".into(),
            dataset: "gaussian".into(),
            model_name: "replay".into(),
            backbone_type: "mlp".into(),
            init_cls: 10,
            increment: 5,
            shuffle: true,
            imb_metrics: false,
            seed: vec![1993],
            device: vec![-1],
            params,
        }
    }
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.seed.is_empty() {
            bail!("config lists no seeds");
        }
        if self.device.is_empty() {
            bail!("config lists no devices");
        }
        if self.init_cls == 0 || self.increment == 0 {
            bail!(
                "init_cls and increment must be positive (got {} and {})",
                self.init_cls,
                self.increment
            );
        }
        Ok(())
    }

    /// Per-seed configuration. Each call owns its own copy of the device list.
    pub fn for_seed(&self, seed: u64) -> RunConfig {
        RunConfig {
            prefix: self.prefix.clone(),
            dataset: self.dataset.clone(),
            model_name: self.model_name.clone(),
            backbone_type: self.backbone_type.clone(),
            init_cls: self.init_cls,
            increment: self.increment,
            shuffle: self.shuffle,
            imb_metrics: self.imb_metrics,
            seed,
            device: self.device.clone(),
            params: self.params.clone(),
        }
    }
}

/// Immutable configuration of a single seeded run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunConfig {
    pub prefix: String,
    pub dataset: String,
    pub model_name: String,
    pub backbone_type: String,
    pub init_cls: usize,
    pub increment: usize,
    pub shuffle: bool,
    pub imb_metrics: bool,
    pub seed: u64,
    pub device: Vec<i64>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl RunConfig {
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("invalid value for `{key}`: {value}")),
        }
    }

    pub fn param_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.param(key)?.unwrap_or(default))
    }

    /// Flattened `key: value` pairs, in the order they are logged at run start.
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let value = serde_json::to_value(self)?;
        let object = value
            .as_object()
            .ok_or_else(|| anyhow!("run config did not serialize to an object"))?;

        Ok(object
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect())
    }
}

/// Facts derived while a run is being set up. Owned by the driver and handed
/// to the model constructor; the configuration itself is never rewritten.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunContext {
    pub seed: u64,
    pub devices: Vec<Device>,
    pub nb_classes: usize,
    pub nb_tasks: usize,
    pub class_frequencies: Vec<usize>,
    pub input_dim: usize,
}

impl RunContext {
    pub fn primary_device(&self) -> Device {
        self.devices.first().copied().unwrap_or(Device::Cpu)
    }
}
