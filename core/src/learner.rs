//! Seams between the experiment driver and the code that actually learns.

use anyhow::{bail, Result};

use crate::{device::Device, metrics::Criterion, metrics::EvalResult};

/// Splits a dataset's classes into an ordered sequence of tasks.
pub trait DataManager {
    fn nb_tasks(&self) -> usize;

    fn nb_classes(&self) -> usize;

    /// Length of one input feature vector.
    fn input_dim(&self) -> usize;

    /// Training samples per class, indexed by position in the class order.
    fn class_frequencies(&self) -> &[usize];

    /// Number of classes introduced by `task`.
    fn task_size(&self, task: usize) -> Option<usize>;
}

/// Result of `eval_task`: the classifier head, and the nearest-mean-of-exemplars
/// head when the learner keeps an exemplar memory.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub cnn: EvalResult,
    pub nme: Option<EvalResult>,
}

/// A class-incremental learning strategy driven one task at a time.
pub trait IncrementalLearner<D: ?Sized> {
    fn count_parameters(&self, trainable_only: bool) -> usize;

    /// Learn the next task of `data`.
    fn incremental_train(&mut self, data: &D) -> Result<()>;

    fn eval_task(&mut self, criterion: Criterion) -> Result<Evaluation>;

    /// Close the current task (memory update, bookkeeping).
    fn after_task(&mut self);
}

/// Backend hooks the driver calls before anything is built.
pub trait Runtime {
    fn seed_all(&mut self, seed: u64);

    /// Prefer reproducible kernels over fast ones.
    fn enable_determinism(&mut self);

    /// Fail if `device` cannot be used by this build.
    fn check_device(&self, device: Device) -> Result<()>;
}

/// Task sizes: `init_cls`, then `increment` until the classes are covered.
/// A remainder smaller than `increment` becomes a final shorter task.
pub fn task_increments(nb_classes: usize, init_cls: usize, increment: usize) -> Result<Vec<usize>> {
    if init_cls == 0 || increment == 0 {
        bail!("init_cls and increment must be positive");
    }
    if init_cls > nb_classes {
        bail!(
            "init_cls {} exceeds the {} classes of the dataset",
            init_cls,
            nb_classes
        );
    }

    let mut increments = vec![init_cls];
    let mut covered = init_cls;
    while covered + increment < nb_classes {
        increments.push(increment);
        covered += increment;
    }
    if nb_classes > covered {
        increments.push(nb_classes - covered);
    }
    Ok(increments)
}
