pub mod aggregator;
pub mod classification;
pub mod config;
pub mod device;
pub mod experiment;
pub mod learner;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod rng;
pub mod sink;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregator::MetricsAggregator;
pub use classification::{evaluate_predictions, rank_descending, ConfusionMatrix, TOP_K};
pub use config::{load_or_init, ExperimentConfig, RunConfig, RunContext};
pub use device::{resolve_devices, Device};
pub use experiment::{run_tasks, DataBuilder, Experiment, RunSummary};
pub use learner::{task_increments, DataManager, Evaluation, IncrementalLearner, Runtime};
pub use metrics::{Criterion, Curve, EvalResult, Grouped, ImbalanceMetric, TaskMatrix};
pub use registry::{LearnerConstructor, ModelRegistry};
pub use report::{format_matrix, Reporter};
pub use rng::{seeded_rng, stream_rng};
pub use sink::{log_path, FileConsoleSinks, LogSink, SinkFactory, TeeSink};
#[cfg(any(test, feature = "testing"))]
pub use testing::{MemorySink, MemorySinks, SharedBuffer};
