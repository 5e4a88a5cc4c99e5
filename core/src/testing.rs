//! In-memory sinks and writers for inspecting a run without touching the
//! filesystem or stdout. Built for tests and behind the `testing` feature.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};

use crate::sink::{LogSink, SinkFactory};

/// Untimestamped in-memory log, cheap to clone and inspect after a run.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.lines
            .lock()
            .map_err(|_| anyhow!("memory log sink poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

/// Factory handing out one [`MemorySink`] per opened path.
#[derive(Clone, Debug, Default)]
pub struct MemorySinks {
    opened: Arc<Mutex<Vec<(PathBuf, MemorySink)>>>,
}

impl MemorySinks {
    pub fn opened(&self) -> Vec<(PathBuf, MemorySink)> {
        self.opened
            .lock()
            .map(|opened| opened.clone())
            .unwrap_or_default()
    }
}

impl SinkFactory for MemorySinks {
    fn open(&mut self, path: &Path) -> Result<Box<dyn LogSink>> {
        let sink = MemorySink::default();
        self.opened
            .lock()
            .map_err(|_| anyhow!("memory sink registry poisoned"))?
            .push((path.to_path_buf(), sink.clone()));
        Ok(Box::new(sink))
    }
}

/// Clonable in-memory writer for capturing a [`Reporter`](crate::report::Reporter)'s output.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        self.bytes
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "report buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
