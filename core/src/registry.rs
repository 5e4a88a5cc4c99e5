use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::{
    config::{RunConfig, RunContext},
    learner::IncrementalLearner,
};

pub type LearnerConstructor<D> =
    Box<dyn Fn(&RunConfig, &RunContext) -> Result<Box<dyn IncrementalLearner<D>>>>;

/// Name-keyed constructors for the learners an experiment can run.
/// Lookup ignores ASCII case.
pub struct ModelRegistry<D: ?Sized> {
    constructors: BTreeMap<String, LearnerConstructor<D>>,
}

impl<D: ?Sized> Default for ModelRegistry<D> {
    fn default() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }
}

impl<D: ?Sized> ModelRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: &str, constructor: F) -> Self
    where
        F: Fn(&RunConfig, &RunContext) -> Result<Box<dyn IncrementalLearner<D>>> + 'static,
    {
        self.constructors
            .insert(name.to_ascii_lowercase(), Box::new(constructor));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn build(
        &self,
        name: &str,
        config: &RunConfig,
        context: &RunContext,
    ) -> Result<Box<dyn IncrementalLearner<D>>> {
        let constructor = self
            .constructors
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| {
                anyhow!(
                    "unknown model `{}` (registered: {})",
                    name,
                    self.names().join(", ")
                )
            })?;
        constructor(config, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ExperimentConfig,
        learner::Evaluation,
        metrics::{Criterion, EvalResult, Grouped},
    };

    struct Fixed(usize);

    impl IncrementalLearner<()> for Fixed {
        fn count_parameters(&self, _trainable_only: bool) -> usize {
            self.0
        }

        fn incremental_train(&mut self, _data: &()) -> Result<()> {
            Ok(())
        }

        fn eval_task(&mut self, _criterion: Criterion) -> Result<Evaluation> {
            Ok(Evaluation {
                cnn: EvalResult {
                    top1: 0.0,
                    top5: 0.0,
                    grouped: Grouped::new(),
                },
                nme: None,
            })
        }

        fn after_task(&mut self) {}
    }

    #[test]
    fn build_is_case_insensitive() {
        let registry = ModelRegistry::<()>::new()
            .register("finetune", |_, _| Ok(Box::new(Fixed(3))))
            .register("Replay", |_, _| Ok(Box::new(Fixed(7))));
        let config = ExperimentConfig::default().for_seed(1);
        let context = RunContext::default();

        assert_eq!(registry.names(), vec!["finetune", "replay"]);
        let learner = registry.build("REPLAY", &config, &context).unwrap();
        assert_eq!(learner.count_parameters(false), 7);
    }

    #[test]
    fn unknown_name_lists_registered_models() {
        let registry = ModelRegistry::<()>::new().register("finetune", |_, _| Ok(Box::new(Fixed(0))));
        let config = ExperimentConfig::default().for_seed(1);
        let err = registry
            .build("icarl", &config, &RunContext::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown model `icarl`"));
        assert!(err.to_string().contains("finetune"));
    }
}
