use anyhow::{bail, Result};
use cilrun_core::RunConfig;

use crate::data::Samples;

const DEFAULT_MEMORY_SIZE: usize = 2000;
const EPSILON: f32 = 1e-8;

/// How many exemplars the rehearsal memory may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryBudget {
    /// Shared by all classes seen so far.
    Total(usize),
    PerClass(usize),
}

impl MemoryBudget {
    /// `memory_per_class` wins over `memory_size` when both are set.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        match config.param::<usize>("memory_per_class")? {
            Some(per_class) => Ok(Self::PerClass(per_class)),
            None => Ok(Self::Total(
                config.param_or("memory_size", DEFAULT_MEMORY_SIZE)?,
            )),
        }
    }

    pub fn per_class(&self, classes: usize) -> usize {
        match *self {
            Self::PerClass(per_class) => per_class,
            Self::Total(_) if classes == 0 => 0,
            Self::Total(total) => total / classes,
        }
    }
}

/// Exemplars kept per class, in herding order (best first).
#[derive(Clone, Debug, Default)]
pub struct ExemplarMemory {
    classes: Vec<Samples>,
}

impl ExemplarMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classes(&self) -> usize {
        self.classes.len()
    }

    pub fn len(&self) -> usize {
        self.classes.iter().map(Samples::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn class(&self, class: usize) -> Option<&Samples> {
        self.classes.get(class)
    }

    /// Keep the first `per_class` exemplars of every class.
    pub fn reduce(&mut self, per_class: usize) {
        for exemplars in &mut self.classes {
            exemplars.truncate(per_class);
        }
    }

    /// Store exemplars for the next class label.
    pub fn add_class(&mut self, exemplars: Samples) -> Result<()> {
        let class = self.classes.len();
        if let Some(label) = exemplars.labels().iter().find(|&&label| label != class) {
            bail!("exemplar labelled {} stored as class {}", label, class);
        }
        self.classes.push(exemplars);
        Ok(())
    }

    /// All exemplars as one training set.
    pub fn samples(&self) -> Result<Samples> {
        let mut merged = Samples::default();
        for exemplars in &self.classes {
            merged.extend(exemplars)?;
        }
        Ok(merged)
    }
}

pub fn normalize(row: &[f32]) -> Vec<f32> {
    let norm = row.iter().map(|value| value * value).sum::<f32>().sqrt();
    row.iter().map(|value| value / (norm + EPSILON)).collect()
}

pub fn gather_rows(features: &[f32], dim: usize, indices: &[usize]) -> Vec<f32> {
    indices
        .iter()
        .flat_map(|&index| features[index * dim..(index + 1) * dim].iter().copied())
        .collect()
}

/// Normalized mean of the normalized rows of `features`.
pub fn class_mean(features: &[f32], dim: usize) -> Vec<f32> {
    let mut mean = vec![0.0f32; dim];
    if dim == 0 {
        return mean;
    }
    let rows = features.len() / dim;
    if rows == 0 {
        return mean;
    }

    for row in features.chunks(dim) {
        for (acc, value) in mean.iter_mut().zip(normalize(row)) {
            *acc += value;
        }
    }
    for value in &mut mean {
        *value /= rows as f32;
    }
    normalize(&mean)
}

/// Herding: greedily pick the rows whose running mean stays closest to the
/// class mean. Returns at most `m` distinct row indices in pick order.
pub fn herding_selection(features: &[f32], dim: usize, m: usize) -> Vec<usize> {
    if dim == 0 {
        return Vec::new();
    }
    let rows: Vec<Vec<f32>> = features.chunks(dim).map(normalize).collect();
    let target = {
        let mut mean = vec![0.0f32; dim];
        for row in &rows {
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += value;
            }
        }
        let count = rows.len().max(1) as f32;
        mean.iter_mut().for_each(|value| *value /= count);
        mean
    };

    let mut chosen = Vec::with_capacity(m.min(rows.len()));
    let mut running = vec![0.0f32; dim];
    let mut available = vec![true; rows.len()];

    for step in 1..=m.min(rows.len()) {
        let mut best: Option<(usize, f32)> = None;
        for (index, row) in rows.iter().enumerate() {
            if !available[index] {
                continue;
            }
            let distance: f32 = target
                .iter()
                .zip(running.iter().zip(row))
                .map(|(goal, (sum, value))| {
                    let diff = goal - (sum + value) / step as f32;
                    diff * diff
                })
                .sum();
            if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                best = Some((index, distance));
            }
        }

        let Some((index, _)) = best else {
            break;
        };
        available[index] = false;
        for (sum, value) in running.iter_mut().zip(&rows[index]) {
            *sum += value;
        }
        chosen.push(index);
    }

    chosen
}
