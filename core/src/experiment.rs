//! Experiment runner (one run per seed) and the single-run driver.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::{
    aggregator::MetricsAggregator,
    config::{ExperimentConfig, RunConfig, RunContext},
    device::resolve_devices,
    learner::{DataManager, IncrementalLearner, Runtime},
    metrics::{Criterion, ImbalanceMetric},
    registry::ModelRegistry,
    report::Reporter,
    sink::{log_path, LogSink, SinkFactory},
};

pub type DataBuilder<D> = Box<dyn Fn(&RunConfig) -> Result<D>>;

/// What one seeded run produced.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub seed: u64,
    pub log_path: PathBuf,
    pub context: RunContext,
    pub metrics: MetricsAggregator,
}

pub struct Experiment<D> {
    registry: ModelRegistry<D>,
    data: DataBuilder<D>,
    runtime: Box<dyn Runtime>,
    sinks: Box<dyn SinkFactory>,
    reporter: Reporter,
    log_root: PathBuf,
}

impl<D: DataManager> Experiment<D> {
    pub fn new(
        registry: ModelRegistry<D>,
        data: DataBuilder<D>,
        runtime: Box<dyn Runtime>,
        sinks: Box<dyn SinkFactory>,
        reporter: Reporter,
    ) -> Self {
        Self {
            registry,
            data,
            runtime,
            sinks,
            reporter,
            log_root: PathBuf::from("logs"),
        }
    }

    pub fn with_log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    /// Run every seed of `config` in order. The first failure stops the loop.
    pub fn run(&mut self, config: &ExperimentConfig) -> Result<Vec<RunSummary>> {
        config.validate()?;

        let mut summaries = Vec::with_capacity(config.seed.len());
        for &seed in &config.seed {
            info!(seed, model = %config.model_name, dataset = %config.dataset, "starting run");
            let run = config.for_seed(seed);
            let summary = self
                .run_single(&run)
                .with_context(|| format!("run with seed {seed} failed"))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// One isolated run: log sink, seeding, devices, data, model, task loop.
    pub fn run_single(&mut self, config: &RunConfig) -> Result<RunSummary> {
        let path = log_path(&self.log_root, config);
        let mut log = self.sinks.open(&path)?;
        debug!(path = %path.display(), "opened run log");

        self.runtime.seed_all(config.seed);
        self.runtime.enable_determinism();

        let devices = resolve_devices(&config.device)?;
        for device in &devices {
            self.runtime.check_device(*device)?;
        }

        for (key, value) in config.entries()? {
            log.write_line(&format!("{key}: {value}"))?;
        }

        let data = (self.data)(config)
            .with_context(|| format!("failed to build data manager for `{}`", config.dataset))?;
        let context = RunContext {
            seed: config.seed,
            devices,
            nb_classes: data.nb_classes(),
            nb_tasks: data.nb_tasks(),
            class_frequencies: data.class_frequencies().to_vec(),
            input_dim: data.input_dim(),
        };

        let mut learner = self.registry.build(&config.model_name, config, &context)?;
        let metrics = run_tasks(
            learner.as_mut(),
            &data,
            config.imb_metrics,
            log.as_mut(),
            &mut self.reporter,
        )?;

        Ok(RunSummary {
            seed: config.seed,
            log_path: path,
            context,
            metrics,
        })
    }
}

/// Drive `learner` through every task of `data` and print the results.
pub fn run_tasks<D: DataManager + ?Sized>(
    learner: &mut dyn IncrementalLearner<D>,
    data: &D,
    imb_metrics: bool,
    log: &mut dyn LogSink,
    reporter: &mut Reporter,
) -> Result<MetricsAggregator> {
    let mut metrics = MetricsAggregator::new(imb_metrics);

    for task in 0..data.nb_tasks() {
        log.write_line(&format!("All params: {}", learner.count_parameters(false)))?;
        log.write_line(&format!(
            "Trainable params: {}",
            learner.count_parameters(true)
        ))?;

        learner
            .incremental_train(data)
            .with_context(|| format!("training failed on task {task}"))?;
        let accuracy = learner.eval_task(Criterion::Accuracy)?;
        learner.after_task();

        let imbalance = if imb_metrics {
            ImbalanceMetric::ALL
                .into_iter()
                .map(|metric| Ok((metric, learner.eval_task(Criterion::Imbalance(metric))?)))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        metrics.record(task, &accuracy, &imbalance, log, reporter)?;
    }

    metrics.finish(reporter)?;
    Ok(metrics)
}
