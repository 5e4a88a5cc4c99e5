use std::ops::Range;

use anyhow::{anyhow, bail, Context, Result};
use burn_dataset::{vision::MnistDataset, Dataset};
use cilrun_core::{seeded_rng, task_increments, DataManager, RunConfig};
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use tracing::info;

const MNIST_CLASSES: usize = 10;
const MNIST_PIXELS: usize = 28 * 28;

/// Flat row-major feature vectors with one label per row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Samples {
    dim: usize,
    inputs: Vec<f32>,
    labels: Vec<usize>,
}

impl Samples {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            inputs: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn push(&mut self, input: &[f32], label: usize) -> Result<()> {
        if input.len() != self.dim {
            bail!(
                "sample has {} features but the set holds {}",
                input.len(),
                self.dim
            );
        }
        self.inputs.extend_from_slice(input);
        self.labels.push(label);
        Ok(())
    }

    pub fn extend(&mut self, other: &Samples) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() && self.dim == 0 {
            self.dim = other.dim;
        }
        if other.dim != self.dim {
            bail!("cannot merge {}-d samples into a {}-d set", other.dim, self.dim);
        }
        self.inputs.extend_from_slice(&other.inputs);
        self.labels.extend_from_slice(&other.labels);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn inputs(&self) -> &[f32] {
        &self.inputs
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.inputs[index * self.dim..(index + 1) * self.dim]
    }

    pub fn select(&self, indices: &[usize]) -> Samples {
        let mut selected = Samples::new(self.dim);
        for &index in indices {
            selected.inputs.extend_from_slice(self.row(index));
            selected.labels.push(self.labels[index]);
        }
        selected
    }

    pub fn truncate(&mut self, len: usize) {
        self.labels.truncate(len);
        self.inputs.truncate(len * self.dim);
    }

    pub fn filter_classes(&self, classes: Range<usize>) -> Samples {
        let indices: Vec<usize> = (0..self.len())
            .filter(|&index| classes.contains(&self.labels[index]))
            .collect();
        self.select(&indices)
    }

    fn relabel(&mut self, mapping: &[usize]) -> Result<()> {
        for label in &mut self.labels {
            *label = *mapping
                .get(*label)
                .ok_or_else(|| anyhow!("label {} is outside the class order", label))?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// Raw dataset before class ordering.
#[derive(Clone, Debug)]
pub struct SourceData {
    pub nb_classes: usize,
    pub train: Samples,
    pub test: Samples,
}

impl SourceData {
    pub fn load(config: &RunConfig) -> Result<Self> {
        match config.dataset.as_str() {
            "mnist" => load_mnist(config),
            "gaussian" => gaussian_clusters(config, false),
            "gaussian_lt" => gaussian_clusters(config, true),
            other => bail!("unknown dataset `{other}` (expected mnist, gaussian or gaussian_lt)"),
        }
    }
}

/// Orders a dataset's classes and serves them task by task. Labels are
/// positions in the class order, so task `t` always covers a contiguous range.
#[derive(Clone, Debug)]
pub struct TaskDataManager {
    train: Samples,
    test: Samples,
    class_order: Vec<usize>,
    increments: Vec<usize>,
    class_frequencies: Vec<usize>,
}

impl TaskDataManager {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let source = SourceData::load(config)
            .with_context(|| format!("failed to load dataset `{}`", config.dataset))?;
        let manager = Self::new(
            source,
            config.shuffle,
            config.seed,
            config.init_cls,
            config.increment,
        )?;
        info!(
            dataset = %config.dataset,
            classes = manager.nb_classes(),
            tasks = manager.nb_tasks(),
            train = manager.train.len(),
            test = manager.test.len(),
            "dataset ready"
        );
        Ok(manager)
    }

    pub fn new(
        source: SourceData,
        shuffle: bool,
        seed: u64,
        init_cls: usize,
        increment: usize,
    ) -> Result<Self> {
        let SourceData {
            nb_classes,
            mut train,
            mut test,
        } = source;

        let mut class_order: Vec<usize> = (0..nb_classes).collect();
        if shuffle {
            class_order.shuffle(&mut seeded_rng(seed));
        }

        let mut mapping = vec![0; nb_classes];
        for (position, &class) in class_order.iter().enumerate() {
            mapping[class] = position;
        }
        train.relabel(&mapping)?;
        test.relabel(&mapping)?;

        let mut class_frequencies = vec![0; nb_classes];
        for &label in train.labels() {
            class_frequencies[label] += 1;
        }

        Ok(Self {
            train,
            test,
            class_order,
            increments: task_increments(nb_classes, init_cls, increment)?,
            class_frequencies,
        })
    }

    pub fn class_order(&self) -> &[usize] {
        &self.class_order
    }

    pub fn increments(&self) -> &[usize] {
        &self.increments
    }

    /// Samples of `split` whose (ordered) class lies in `classes`.
    pub fn samples(&self, split: Split, classes: Range<usize>) -> Samples {
        match split {
            Split::Train => self.train.filter_classes(classes),
            Split::Test => self.test.filter_classes(classes),
        }
    }
}

impl DataManager for TaskDataManager {
    fn nb_tasks(&self) -> usize {
        self.increments.len()
    }

    fn nb_classes(&self) -> usize {
        self.class_order.len()
    }

    fn input_dim(&self) -> usize {
        self.train.dim()
    }

    fn class_frequencies(&self) -> &[usize] {
        &self.class_frequencies
    }

    fn task_size(&self, task: usize) -> Option<usize> {
        self.increments.get(task).copied()
    }
}

fn load_mnist(config: &RunConfig) -> Result<SourceData> {
    let max_train: Option<usize> = config.param("max_per_class")?;
    let max_test: Option<usize> = config.param("max_test_per_class")?;

    Ok(SourceData {
        nb_classes: MNIST_CLASSES,
        train: mnist_split(&MnistDataset::train(), max_train)?,
        test: mnist_split(&MnistDataset::test(), max_test)?,
    })
}

fn mnist_split(dataset: &MnistDataset, max_per_class: Option<usize>) -> Result<Samples> {
    let mut samples = Samples::new(MNIST_PIXELS);
    let mut counts = [0usize; MNIST_CLASSES];
    let mut pixels = Vec::with_capacity(MNIST_PIXELS);

    for index in 0..dataset.len() {
        let item = dataset
            .get(index)
            .ok_or_else(|| anyhow!("dataset index {} out of bounds", index))?;
        let label = item.label as usize;
        let count = counts
            .get_mut(label)
            .ok_or_else(|| anyhow!("mnist label {} out of range", label))?;
        if max_per_class.is_some_and(|max| *count >= max) {
            continue;
        }

        pixels.clear();
        for row in item.image.iter() {
            for &pixel in row.iter() {
                pixels.push(pixel as f32 / 255.0);
            }
        }
        samples.push(&pixels, label)?;
        *count += 1;
    }

    Ok(samples)
}

/// Training counts decaying from `max` to `max * factor` across the classes.
pub fn long_tail_counts(classes: usize, max: usize, factor: f64) -> Vec<usize> {
    (0..classes)
        .map(|class| {
            let exponent = if classes > 1 {
                class as f64 / (classes - 1) as f64
            } else {
                0.0
            };
            ((max as f64 * factor.powf(exponent)).floor() as usize).max(1)
        })
        .collect()
}

/// Isotropic Gaussian blobs around random class centres. The data is drawn
/// from `data_seed`, so every run seed sees the same samples.
fn gaussian_clusters(config: &RunConfig, long_tail: bool) -> Result<SourceData> {
    let classes: usize = config.param_or("synthetic_classes", 20)?;
    let dim: usize = config.param_or("synthetic_dim", 16)?;
    let train_per_class: usize = config.param_or("train_per_class", 200)?;
    let test_per_class: usize = config.param_or("test_per_class", 50)?;
    let spread: f32 = config.param_or("cluster_spread", 3.0)?;
    let std: f32 = config.param_or("cluster_std", 1.0)?;
    let imb_factor: f64 = config.param_or("imb_factor", 0.1)?;
    let data_seed: u64 = config.param_or("data_seed", 1993)?;

    if classes == 0 || dim == 0 {
        bail!("synthetic_classes and synthetic_dim must be positive");
    }
    if long_tail && !(imb_factor > 0.0 && imb_factor <= 1.0) {
        bail!("imb_factor must be in (0, 1], got {imb_factor}");
    }

    let centre_dist =
        Normal::new(0.0f32, spread).map_err(|err| anyhow!("invalid cluster_spread: {err}"))?;
    let noise = Normal::new(0.0f32, std).map_err(|err| anyhow!("invalid cluster_std: {err}"))?;
    let mut rng = seeded_rng(data_seed);

    let centres: Vec<Vec<f32>> = (0..classes)
        .map(|_| (0..dim).map(|_| centre_dist.sample(&mut rng)).collect())
        .collect();
    let train_counts = if long_tail {
        long_tail_counts(classes, train_per_class, imb_factor)
    } else {
        vec![train_per_class; classes]
    };

    let mut train = Samples::new(dim);
    let mut test = Samples::new(dim);
    let mut point = vec![0.0f32; dim];
    for (class, centre) in centres.iter().enumerate() {
        for (split, count) in [(&mut train, train_counts[class]), (&mut test, test_per_class)] {
            for _ in 0..count {
                for (value, mean) in point.iter_mut().zip(centre) {
                    *value = mean + noise.sample(&mut rng);
                }
                split.push(&point, class)?;
            }
        }
    }

    Ok(SourceData {
        nb_classes: classes,
        train,
        test,
    })
}
