//! Run log destinations.
//!
//! Each run writes its log through a [`LogSink`] handed to it by a
//! [`SinkFactory`]. The production factory tees every line to a log file and
//! to stdout.

use std::{
    fs::{self, File, OpenOptions},
    io::{LineWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;

use crate::config::RunConfig;

pub trait LogSink {
    fn write_line(&mut self, line: &str) -> Result<()>;
}

pub trait SinkFactory {
    /// Open the sink for one run, creating the parent directory of `path`.
    fn open(&mut self, path: &Path) -> Result<Box<dyn LogSink>>;
}

/// `{root}/{model}/{dataset}/{init_cls}/{increment}/{prefix}_{seed}_{backbone}.log`
///
/// `init_cls` is written as `0` when the first task is the same size as the
/// following ones.
pub fn log_path(root: &Path, config: &RunConfig) -> PathBuf {
    let init_cls = if config.init_cls == config.increment {
        0
    } else {
        config.init_cls
    };

    root.join(&config.model_name)
        .join(&config.dataset)
        .join(init_cls.to_string())
        .join(config.increment.to_string())
        .join(format!(
            "{}_{}_{}.log",
            config.prefix, config.seed, config.backbone_type
        ))
}

fn format_line(target: &str, line: &str) -> String {
    format!(
        "{} [{}] => {}",
        Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
        target,
        line
    )
}

/// Appends timestamped lines to a file and echoes them to stdout.
pub struct TeeSink {
    file: LineWriter<File>,
    target: String,
}

impl TeeSink {
    pub fn open(path: &Path, target: impl Into<String>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;

        Ok(Self {
            file: LineWriter::new(file),
            target: target.into(),
        })
    }
}

impl LogSink for TeeSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let formatted = format_line(&self.target, line);
        writeln!(self.file, "{formatted}").context("failed to write log line")?;
        println!("{formatted}");
        Ok(())
    }
}

pub struct FileConsoleSinks {
    target: String,
}

impl FileConsoleSinks {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl SinkFactory for FileConsoleSinks {
    fn open(&mut self, path: &Path) -> Result<Box<dyn LogSink>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        Ok(Box::new(TeeSink::open(path, self.target.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ExperimentConfig, testing::MemorySinks};

    fn run_config(init_cls: usize, increment: usize) -> RunConfig {
        let mut config = ExperimentConfig::default();
        config.model_name = "replay".into();
        config.dataset = "mnist".into();
        config.init_cls = init_cls;
        config.increment = increment;
        config.prefix = "reproduce".into();
        config.backbone_type = "mlp".into();
        config.for_seed(1993)
    }

    #[test]
    fn equal_first_task_collapses_to_zero() {
        let path = log_path(Path::new("logs"), &run_config(10, 10));
        assert_eq!(
            path,
            PathBuf::from("logs/replay/mnist/0/10/reproduce_1993_mlp.log")
        );
    }

    #[test]
    fn larger_first_task_is_kept() {
        let path = log_path(Path::new("logs"), &run_config(50, 10));
        assert_eq!(
            path,
            PathBuf::from("logs/replay/mnist/50/10/reproduce_1993_mlp.log")
        );
    }

    #[test]
    fn file_sink_creates_directory_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), &run_config(10, 5));
        let mut factory = FileConsoleSinks::new("trainer");

        let mut sink = factory.open(&path).unwrap();
        sink.write_line("first").unwrap();
        drop(sink);
        let mut sink = factory.open(&path).unwrap();
        sink.write_line("second").unwrap();
        drop(sink);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[trainer] => first"));
        assert!(lines[1].ends_with("[trainer] => second"));
    }

    #[test]
    fn memory_sinks_track_each_open() {
        let mut factory = MemorySinks::default();
        let mut sink = factory.open(Path::new("a.log")).unwrap();
        sink.write_line("hello").unwrap();
        factory.open(Path::new("b.log")).unwrap();

        let opened = factory.opened();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].1.lines(), vec!["hello".to_string()]);
        assert!(opened[1].1.lines().is_empty());
    }
}
