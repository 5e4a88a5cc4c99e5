use std::ops::Range;

use anyhow::{bail, Result};
use cilrun_core::{
    rank_descending, Criterion, Evaluation, IncrementalLearner, RunConfig, RunContext, TOP_K,
};
use tracing::info;

use super::{
    memory::{class_mean, gather_rows, herding_selection, normalize, ExemplarMemory, MemoryBudget},
    LearnerCore,
};
use crate::data::{Split, TaskDataManager};

/// Rehearsal with a herding-selected exemplar memory and a
/// nearest-mean-of-exemplars classifier next to the linear head.
pub struct Replay {
    core: LearnerCore,
    budget: MemoryBudget,
    memory: ExemplarMemory,
    class_means: Vec<Vec<f32>>,
    nme_cache: Option<Vec<Vec<usize>>>,
}

impl Replay {
    pub fn new(config: &RunConfig, context: &RunContext) -> Result<Self> {
        Ok(Self {
            core: LearnerCore::new(config, context)?,
            budget: MemoryBudget::from_config(config)?,
            memory: ExemplarMemory::new(),
            class_means: Vec::new(),
            nme_cache: None,
        })
    }

    pub fn memory(&self) -> &ExemplarMemory {
        &self.memory
    }

    fn build_rehearsal_memory(
        &mut self,
        data: &TaskDataManager,
        new_classes: Range<usize>,
    ) -> Result<()> {
        let per_class = self.budget.per_class(self.core.total_classes());
        let dim = self.core.feature_dim();

        self.memory.reduce(per_class);
        self.class_means.clear();
        for class in 0..self.memory.classes() {
            let features = match self.memory.class(class) {
                Some(exemplars) => self.core.extract_features(exemplars)?,
                None => Vec::new(),
            };
            self.class_means.push(class_mean(&features, dim));
        }

        for class in new_classes {
            let samples = data.samples(Split::Train, class..class + 1);
            let features = self.core.extract_features(&samples)?;
            let chosen = herding_selection(&features, dim, per_class);

            self.class_means
                .push(class_mean(&gather_rows(&features, dim, &chosen), dim));
            self.memory.add_class(samples.select(&chosen))?;
        }

        info!(
            exemplars = self.memory.len(),
            per_class, "rehearsal memory rebuilt"
        );
        Ok(())
    }

    fn nme_rankings(&mut self) -> Result<Vec<Vec<usize>>> {
        if let Some(ranked) = &self.nme_cache {
            return Ok(ranked.clone());
        }
        if self.class_means.len() != self.core.total_classes() {
            bail!(
                "{} class means for {} classes",
                self.class_means.len(),
                self.core.total_classes()
            );
        }

        let dim = self.core.feature_dim();
        let features = self.core.extract_features(self.core.test_samples())?;
        let ranked: Vec<Vec<usize>> = features
            .chunks(dim)
            .map(|row| {
                let row = normalize(row);
                let scores: Vec<f32> = self
                    .class_means
                    .iter()
                    .map(|mean| -squared_distance(&row, mean))
                    .collect();
                rank_descending(&scores, TOP_K)
            })
            .collect();

        self.nme_cache = Some(ranked.clone());
        Ok(ranked)
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl IncrementalLearner<TaskDataManager> for Replay {
    fn count_parameters(&self, trainable_only: bool) -> usize {
        self.core.count_parameters(trainable_only)
    }

    fn incremental_train(&mut self, data: &TaskDataManager) -> Result<()> {
        let classes = self.core.begin_task(data)?;
        let mut train = data.samples(Split::Train, classes.clone());
        train.extend(&self.memory.samples()?)?;
        self.core.train(&train)?;

        self.build_rehearsal_memory(data, classes)?;
        self.nme_cache = None;
        Ok(())
    }

    fn eval_task(&mut self, criterion: Criterion) -> Result<Evaluation> {
        let cnn_ranked = self.core.cnn_rankings()?;
        let nme_ranked = self.nme_rankings()?;
        Ok(Evaluation {
            cnn: self.core.evaluate(criterion, &cnn_ranked)?,
            nme: Some(self.core.evaluate(criterion, &nme_ranked)?),
        })
    }

    fn after_task(&mut self) {
        self.core.after_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_squared_euclidean() {
        assert_eq!(squared_distance(&[1.0, 2.0], &[4.0, 6.0]), 25.0);
    }
}
