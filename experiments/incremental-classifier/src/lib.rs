//! Class-incremental learning experiments on burn + candle.

pub mod backend;
pub mod data;
pub mod learners;
pub mod network;

pub use backend::{candle_device, CandleRuntime, InferenceBackend, TrainingBackend};
pub use data::{Samples, SourceData, Split, TaskDataManager};
pub use learners::{registry, Finetune, LearnerOptions, Replay};
pub use network::IncrementalNet;
