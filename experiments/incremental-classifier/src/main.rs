use std::path::PathBuf;

use anyhow::Result;
use cilrun_core::{load_or_init, Experiment, ExperimentConfig, FileConsoleSinks, Reporter};
use cilrun_incremental::{registry, CandleRuntime, TaskDataManager};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cilrun")]
#[command(about = "Run class-incremental learning experiments", long_about = None)]
struct Cli {
    /// Experiment JSON; written with defaults when missing
    #[arg(short, long, default_value = "exps/replay.json")]
    config: PathBuf,

    /// Override the seeds of the config (comma separated)
    #[arg(long, value_delimiter = ',')]
    seed: Option<Vec<u64>>,

    /// Override the devices of the config (-1 is the CPU)
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    device: Option<Vec<i64>>,

    /// Directory the run logs are written under
    #[arg(long, default_value = "logs")]
    log_root: PathBuf,

    /// Default filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config: ExperimentConfig = load_or_init(&cli.config, ExperimentConfig::default)?;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(device) = cli.device {
        config.device = device;
    }

    let mut experiment = Experiment::new(
        registry(),
        Box::new(TaskDataManager::from_config),
        Box::new(CandleRuntime),
        Box::new(FileConsoleSinks::new("trainer")),
        Reporter::stdout(),
    )
    .with_log_root(cli.log_root);

    for summary in experiment.run(&config)? {
        info!(
            seed = summary.seed,
            tasks = summary.context.nb_tasks,
            average_accuracy = summary.metrics.cnn_curve().average_top1().unwrap_or(0.0),
            log = %summary.log_path.display(),
            "run finished"
        );
    }

    Ok(())
}
