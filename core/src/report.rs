use std::{
    fmt::Write as _,
    io::{self, Write},
};

use anyhow::{Context, Result};
use ndarray::Array2;

/// Console output of a run: running averages and per-task matrices.
pub struct Reporter {
    out: Box<dyn Write>,
}

impl Reporter {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{text}").context("failed to write report line")
    }

    pub fn heading(&mut self, title: &str) -> Result<()> {
        self.line(&format!("\n### {title} ###"))
    }

    pub fn value(&mut self, label: &str, value: f64) -> Result<()> {
        self.line(&format!("{label}: {value}"))
    }

    pub fn matrix(&mut self, title: &str, table: &Array2<f64>) -> Result<()> {
        self.heading(title)?;
        self.line(&format_matrix(table))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().context("failed to flush report output")
    }
}

/// Render a table with two decimals and aligned columns:
///
/// ```text
/// [[95.00 80.00]
///  [ 0.00 90.00]]
/// ```
pub fn format_matrix(table: &Array2<f64>) -> String {
    let (rows, cols) = table.dim();
    if rows == 0 || cols == 0 {
        return "[]".to_string();
    }

    let cells: Vec<String> = table.iter().map(|value| format!("{value:.2}")).collect();
    let width = cells.iter().map(String::len).max().unwrap_or(0);

    let mut output = String::new();
    for row in 0..rows {
        output.push_str(if row == 0 { "[[" } else { " [" });
        for col in 0..cols {
            if col > 0 {
                output.push(' ');
            }
            let _ = write!(&mut output, "{:>width$}", cells[row * cols + col]);
        }
        output.push(']');
        if row + 1 == rows {
            output.push(']');
        } else {
            output.push('\n');
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SharedBuffer;
    use ndarray::array;

    #[test]
    fn matrix_columns_are_aligned() {
        let table = array![[95.0, 80.0], [0.0, 100.0]];
        assert_eq!(format_matrix(&table), "[[ 95.00  80.00]\n [  0.00 100.00]]");
    }

    #[test]
    fn empty_matrix() {
        assert_eq!(format_matrix(&Array2::<f64>::zeros((0, 0))), "[]");
    }

    #[test]
    fn reporter_writes_headings_and_values() {
        let buffer = SharedBuffer::default();
        let mut reporter = Reporter::new(Box::new(buffer.clone()));
        reporter.heading("CNN Accuracy Results").unwrap();
        reporter.value("Average Accuracy (CNN)", 0.85).unwrap();
        assert_eq!(
            buffer.contents(),
            "\n### CNN Accuracy Results ###\nAverage Accuracy (CNN): 0.85\n"
        );
    }
}
