use anyhow::Result;
use cilrun_core::{Criterion, Evaluation, IncrementalLearner, RunConfig, RunContext};

use super::LearnerCore;
use crate::data::{Split, TaskDataManager};

/// Plain fine-tuning: each task is trained on its own classes only.
pub struct Finetune {
    core: LearnerCore,
}

impl Finetune {
    pub fn new(config: &RunConfig, context: &RunContext) -> Result<Self> {
        Ok(Self {
            core: LearnerCore::new(config, context)?,
        })
    }
}

impl IncrementalLearner<TaskDataManager> for Finetune {
    fn count_parameters(&self, trainable_only: bool) -> usize {
        self.core.count_parameters(trainable_only)
    }

    fn incremental_train(&mut self, data: &TaskDataManager) -> Result<()> {
        let classes = self.core.begin_task(data)?;
        let train = data.samples(Split::Train, classes);
        self.core.train(&train)
    }

    fn eval_task(&mut self, criterion: Criterion) -> Result<Evaluation> {
        let ranked = self.core.cnn_rankings()?;
        Ok(Evaluation {
            cnn: self.core.evaluate(criterion, &ranked)?,
            nme: None,
        })
    }

    fn after_task(&mut self) {
        self.core.after_task();
    }
}
