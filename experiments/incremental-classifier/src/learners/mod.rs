//! Class-incremental learners built on [`IncrementalNet`].

pub mod finetune;
pub mod memory;
pub mod replay;

use std::ops::Range;

use anyhow::{anyhow, bail, Result};
use burn::{
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::Backend, ElementConversion, Int, Tensor, TensorData},
};
use burn_candle::CandleDevice;
use cilrun_core::{
    evaluate_predictions, rank_descending, stream_rng, Criterion, DataManager, EvalResult,
    IncrementalLearner, ModelRegistry, RunConfig, RunContext, TOP_K,
};
use rand::{rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info};

use crate::{
    backend::{candle_device, InferenceBackend, TrainingBackend},
    data::{Samples, Split, TaskDataManager},
    network::{tensor_values, IncrementalNet},
};

pub use finetune::Finetune;
pub use replay::Replay;

const DEFAULT_HIDDEN_DIM: usize = 128;
const DEFAULT_EPOCHS: usize = 5;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_LEARNING_RATE: f64 = 1e-3;
const EVAL_BATCH_SIZE: usize = 256;

const WEIGHT_STREAM: u64 = 1;
const BATCH_STREAM: u64 = 2;

pub type Learner = Box<dyn IncrementalLearner<TaskDataManager>>;

/// Every learner this binary can run, keyed by `model_name`.
pub fn registry() -> ModelRegistry<TaskDataManager> {
    ModelRegistry::new()
        .register("finetune", build_finetune)
        .register("replay", build_replay)
}

fn build_finetune(config: &RunConfig, context: &RunContext) -> Result<Learner> {
    Ok(Box::new(Finetune::new(config, context)?))
}

fn build_replay(config: &RunConfig, context: &RunContext) -> Result<Learner> {
    Ok(Box::new(Replay::new(config, context)?))
}

/// Training knobs shared by all learners.
#[derive(Clone, Debug, PartialEq)]
pub struct LearnerOptions {
    pub hidden_dim: usize,
    pub epochs: usize,
    pub init_epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub freeze_backbone: bool,
    pub balanced_loss: bool,
}

impl LearnerOptions {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        if !config.backbone_type.eq_ignore_ascii_case("mlp") {
            bail!(
                "unsupported backbone `{}` (expected mlp)",
                config.backbone_type
            );
        }

        let epochs = config.param_or("epochs", DEFAULT_EPOCHS)?;
        let batch_size = config.param_or("batch_size", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            bail!("batch_size must be positive");
        }

        Ok(Self {
            hidden_dim: config.param_or("hidden_dim", DEFAULT_HIDDEN_DIM)?,
            epochs,
            init_epochs: config.param_or("init_epochs", epochs)?,
            batch_size,
            lr: config.param_or("lr", DEFAULT_LEARNING_RATE)?,
            freeze_backbone: config.param_or("freeze_backbone", false)?,
            balanced_loss: config.param_or("balanced_loss", false)?,
        })
    }
}

/// Network, optimizer settings and task bookkeeping common to every learner.
pub struct LearnerCore {
    network: IncrementalNet<TrainingBackend>,
    device: CandleDevice,
    options: LearnerOptions,
    weight_rng: StdRng,
    batch_rng: StdRng,
    task: usize,
    known_classes: usize,
    total_classes: usize,
    task_ends: Vec<usize>,
    class_frequencies: Vec<usize>,
    test: Samples,
    frozen: bool,
    cnn_cache: Option<Vec<Vec<usize>>>,
}

impl LearnerCore {
    pub fn new(config: &RunConfig, context: &RunContext) -> Result<Self> {
        let options = LearnerOptions::from_config(config)?;
        if context.input_dim == 0 {
            bail!("dataset has no input features");
        }

        let device = candle_device(context.primary_device())?;
        let mut weight_rng = stream_rng(context.seed, WEIGHT_STREAM);
        let network =
            IncrementalNet::init(&device, &mut weight_rng, context.input_dim, options.hidden_dim);

        Ok(Self {
            network,
            device,
            options,
            weight_rng,
            batch_rng: stream_rng(context.seed, BATCH_STREAM),
            task: 0,
            known_classes: 0,
            total_classes: 0,
            task_ends: Vec::new(),
            class_frequencies: context.class_frequencies.clone(),
            test: Samples::default(),
            frozen: false,
            cnn_cache: None,
        })
    }

    pub fn known_classes(&self) -> usize {
        self.known_classes
    }

    pub fn total_classes(&self) -> usize {
        self.total_classes
    }

    pub fn test_samples(&self) -> &Samples {
        &self.test
    }

    pub fn feature_dim(&self) -> usize {
        self.network.feature_dim()
    }

    /// Widen the head for the next task and return its class range.
    pub fn begin_task(&mut self, data: &TaskDataManager) -> Result<Range<usize>> {
        let size = data
            .task_size(self.task)
            .ok_or_else(|| anyhow!("data manager has no task {}", self.task))?;

        self.total_classes = self.known_classes + size;
        self.network = self.network.clone().expand_head(
            &mut self.weight_rng,
            &self.device,
            self.total_classes,
        )?;
        self.task_ends.push(self.total_classes);
        self.test = data.samples(Split::Test, 0..self.total_classes);
        self.cnn_cache = None;

        info!(
            task = self.task,
            classes = %format!("{}-{}", self.known_classes, self.total_classes),
            "learning task"
        );
        Ok(self.known_classes..self.total_classes)
    }

    /// Fit the network on `samples` with a fresh Adam optimizer.
    pub fn train(&mut self, samples: &Samples) -> Result<()> {
        if samples.is_empty() {
            bail!("no training samples for task {}", self.task);
        }

        let epochs = if self.task == 0 {
            self.options.init_epochs
        } else {
            self.options.epochs
        };
        let loss_fn = CrossEntropyLossConfig::new()
            .with_weights(self.loss_weights())
            .init(&self.device);
        let mut optimizer = AdamConfig::new().init();
        let mut network = self.network.clone();
        let mut order: Vec<usize> = (0..samples.len()).collect();

        for epoch in 0..epochs {
            order.shuffle(&mut self.batch_rng);
            let mut total_loss = 0.0f32;
            let mut total_correct = 0usize;

            for chunk in order.chunks(self.options.batch_size) {
                let batch = samples.select(chunk);
                let inputs = input_tensor::<TrainingBackend>(&batch, &self.device);
                let targets = label_tensor::<TrainingBackend>(batch.labels(), &self.device);

                let features = network.features(inputs);
                let features = if self.frozen {
                    features.detach()
                } else {
                    features
                };
                let logits = network.classify(features)?;
                let loss = loss_fn.forward(logits.clone(), targets.clone());
                let (correct, total) = accuracy_counts(logits, targets);

                total_loss += loss.clone().into_scalar().elem::<f32>() * total as f32;
                total_correct += correct;

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &network);
                network = optimizer.step(self.options.lr, network, grads);
            }

            debug!(
                task = self.task,
                epoch = epoch + 1,
                epochs,
                loss = total_loss / samples.len() as f32,
                train_accuracy = total_correct as f32 / samples.len() as f32 * 100.0,
                "epoch done"
            );
        }

        self.network = network;
        self.cnn_cache = None;
        Ok(())
    }

    /// Top-k class indices of the classifier head for every test sample.
    pub fn cnn_rankings(&mut self) -> Result<Vec<Vec<usize>>> {
        if let Some(ranked) = &self.cnn_cache {
            return Ok(ranked.clone());
        }

        let network = self.network.valid();
        let classes = network.num_classes();
        let mut ranked = Vec::with_capacity(self.test.len());
        for batch in batches(&self.test) {
            let inputs = input_tensor::<InferenceBackend>(&batch, &self.device);
            let logits = tensor_values(network.forward(inputs)?)?;
            ranked.extend(
                logits
                    .chunks(classes)
                    .map(|row| rank_descending(row, TOP_K)),
            );
        }

        self.cnn_cache = Some(ranked.clone());
        Ok(ranked)
    }

    /// Backbone features of `samples`, row-major `[len, feature_dim]`.
    pub fn extract_features(&self, samples: &Samples) -> Result<Vec<f32>> {
        let network = self.network.valid();
        let mut features = Vec::with_capacity(samples.len() * network.feature_dim());
        for batch in batches(samples) {
            let inputs = input_tensor::<InferenceBackend>(&batch, &self.device);
            features.extend(tensor_values(network.features(inputs))?);
        }
        Ok(features)
    }

    pub fn evaluate(&self, criterion: Criterion, ranked: &[Vec<usize>]) -> Result<EvalResult> {
        evaluate_predictions(
            criterion,
            ranked,
            self.test.labels(),
            &self.task_ends,
            self.known_classes,
        )
    }

    pub fn after_task(&mut self) {
        self.known_classes = self.total_classes;
        self.task += 1;
        if self.options.freeze_backbone && !self.frozen {
            self.frozen = true;
            info!("backbone frozen, only the head is trained from now on");
        }
    }

    pub fn count_parameters(&self, trainable_only: bool) -> usize {
        if trainable_only && self.frozen {
            self.network.head_params()
        } else {
            self.network.num_params()
        }
    }

    /// Inverse-frequency class weights when `balanced_loss` is set.
    fn loss_weights(&self) -> Option<Vec<f32>> {
        if !self.options.balanced_loss {
            return None;
        }
        Some(inverse_frequency_weights(
            &self.class_frequencies,
            self.total_classes,
        ))
    }
}

/// `n / (classes * count_c)` for each class; unseen classes get 1.
pub fn inverse_frequency_weights(frequencies: &[usize], classes: usize) -> Vec<f32> {
    let counts: Vec<usize> = (0..classes)
        .map(|class| frequencies.get(class).copied().unwrap_or(0))
        .collect();
    let total: usize = counts.iter().sum();

    counts
        .iter()
        .map(|&count| {
            if count == 0 {
                1.0
            } else {
                total as f32 / (classes as f32 * count as f32)
            }
        })
        .collect()
}

fn batches(samples: &Samples) -> impl Iterator<Item = Samples> + '_ {
    (0..samples.len()).step_by(EVAL_BATCH_SIZE).map(move |start| {
        let end = (start + EVAL_BATCH_SIZE).min(samples.len());
        let indices: Vec<usize> = (start..end).collect();
        samples.select(&indices)
    })
}

fn input_tensor<B: Backend>(samples: &Samples, device: &B::Device) -> Tensor<B, 2> {
    Tensor::<B, 2>::from_floats(
        TensorData::new(samples.inputs().to_vec(), [samples.len(), samples.dim()]),
        device,
    )
}

fn label_tensor<B: Backend>(labels: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let labels: Vec<i64> = labels.iter().map(|&label| label as i64).collect();
    let len = labels.len();
    Tensor::<B, 1, Int>::from_ints(TensorData::new(labels, [len]), device)
}

fn accuracy_counts<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> (usize, usize) {
    let predictions = logits.argmax(1).squeeze(1);
    let correct = predictions
        .equal(targets.clone())
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize;
    let total = targets.dims()[0];

    (correct, total)
}
