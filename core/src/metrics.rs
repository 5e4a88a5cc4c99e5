use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Class-imbalance aware scores reported next to plain accuracy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImbalanceMetric {
    F1Score,
    Mcc,
    Kappa,
    BalancedAccuracy,
}

impl ImbalanceMetric {
    pub const ALL: [Self; 4] = [Self::F1Score, Self::Mcc, Self::Kappa, Self::BalancedAccuracy];

    pub fn name(&self) -> &'static str {
        match self {
            Self::F1Score => "f1_score",
            Self::Mcc => "mcc",
            Self::Kappa => "kappa",
            Self::BalancedAccuracy => "balanced_accuracy",
        }
    }

    pub fn label(&self) -> String {
        self.name().to_uppercase()
    }
}

impl FromStr for ImbalanceMetric {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.name() == value)
            .ok_or_else(|| anyhow!("unknown imbalance metric: {}", value))
    }
}

/// What `eval_task` scores predictions with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Criterion {
    Accuracy,
    Imbalance(ImbalanceMetric),
}

impl Criterion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Imbalance(metric) => metric.name(),
        }
    }
}

impl FromStr for Criterion {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        if value == "accuracy" {
            Ok(Self::Accuracy)
        } else {
            value.parse().map(Self::Imbalance)
        }
    }
}

/// Ordered label -> score breakdown of one evaluation. Class-range labels
/// (`00-09`) are what the per-task matrices are built from; the remaining
/// labels (`total`, `old`, `new`) are summaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Grouped {
    entries: Vec<(String, f64)>,
}

impl Grouped {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, value: f64) {
        let label = label.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == label) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .map(|(label, value)| (label.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scores of the class-range buckets, in insertion order.
    pub fn range_values(&self) -> Vec<f64> {
        self.iter()
            .filter(|(label, _)| label.contains('-'))
            .map(|(_, value)| value)
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Grouped {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut grouped = Self::new();
        for (label, value) in iter {
            grouped.insert(label, value);
        }
        grouped
    }
}

impl fmt::Display for Grouped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (label, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{label}': {value}")?;
        }
        write!(f, "}}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvalResult {
    pub top1: f64,
    pub top5: f64,
    pub grouped: Grouped,
}

/// Running top1/top5 values, one entry per completed task.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Curve {
    pub top1: Vec<f64>,
    pub top5: Vec<f64>,
}

impl Curve {
    pub fn push(&mut self, result: &EvalResult) {
        self.top1.push(result.top1);
        self.top5.push(result.top5);
    }

    pub fn len(&self) -> usize {
        self.top1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.top1.is_empty()
    }

    pub fn average_top1(&self) -> Option<f64> {
        mean(&self.top1)
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Per-task rows of grouped scores. Row `t` holds one score per class range
/// known after task `t`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskMatrix {
    rows: Vec<Vec<f64>>,
}

impl TaskMatrix {
    pub fn push(&mut self, row: Vec<f64>) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Zero-padded `size x size` table, transposed so that column `t` is the
    /// evaluation after task `t` and row `r` follows class range `r` over time.
    pub fn assemble(&self, size: usize) -> Result<Array2<f64>> {
        if self.rows.len() > size {
            bail!(
                "matrix has {} task rows but the table holds {}",
                self.rows.len(),
                size
            );
        }

        let mut table = Array2::<f64>::zeros((size, size));
        for (task, row) in self.rows.iter().enumerate() {
            if row.len() > size {
                bail!(
                    "task {} reports {} class ranges but the table holds {}",
                    task,
                    row.len(),
                    size
                );
            }
            for (column, value) in row.iter().enumerate() {
                table[[task, column]] = *value;
            }
        }

        Ok(table.reversed_axes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn result(top1: f64, ranges: &[f64]) -> EvalResult {
        let mut grouped = Grouped::new();
        grouped.insert("total", top1);
        for (i, value) in ranges.iter().enumerate() {
            grouped.insert(format!("{:02}-{:02}", i * 10, i * 10 + 9), *value);
        }
        grouped.insert("old", 0.0);
        grouped.insert("new", top1);
        EvalResult {
            top1,
            top5: 100.0,
            grouped,
        }
    }

    #[test]
    fn running_average_matches_mean_of_prefix() {
        let mut curve = Curve::default();
        curve.push(&result(0.9, &[0.9]));
        assert_relative_eq!(curve.average_top1().unwrap(), 0.9);
        curve.push(&result(0.8, &[0.85, 0.75]));
        assert_relative_eq!(curve.average_top1().unwrap(), 0.85);
        assert_eq!(curve.top5.len(), 2);
    }

    #[test]
    fn range_values_skip_summary_labels() {
        let grouped = result(80.0, &[90.0, 70.0]).grouped;
        assert_eq!(grouped.range_values(), vec![90.0, 70.0]);
        assert_eq!(grouped.get("total"), Some(80.0));
        assert_eq!(grouped.len(), 5);
    }

    #[test]
    fn insert_replaces_existing_label() {
        let mut grouped: Grouped = [("total", 1.0), ("00-09", 2.0)].into_iter().collect();
        grouped.insert("total", 3.0);
        assert_eq!(grouped.get("total"), Some(3.0));
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped.to_string(), "{'total': 3, '00-09': 2}");
    }

    #[test]
    fn assembled_matrix_is_lower_triangular_before_transpose() {
        let mut matrix = TaskMatrix::default();
        matrix.push(vec![95.0]);
        matrix.push(vec![80.0, 90.0]);
        matrix.push(vec![70.0, 75.0, 88.0]);

        let table = matrix.assemble(3).unwrap();
        assert_eq!(table.dim(), (3, 3));
        let original = table.t();
        for row in 0..3 {
            let filled = (0..3).filter(|&col| original[[row, col]] != 0.0).count();
            assert_eq!(filled, row + 1);
        }
        assert_eq!(table[[0, 2]], 70.0);
        assert_eq!(table[[2, 0]], 0.0);
    }

    #[test]
    fn oversized_rows_are_rejected() {
        let mut matrix = TaskMatrix::default();
        matrix.push(vec![1.0, 2.0, 3.0]);
        assert!(matrix.assemble(2).is_err());
    }

    #[test]
    fn metric_names_parse_back() {
        for metric in ImbalanceMetric::ALL {
            assert_eq!(metric.name().parse::<ImbalanceMetric>().unwrap(), metric);
            assert_eq!(
                metric.name().parse::<Criterion>().unwrap(),
                Criterion::Imbalance(metric)
            );
        }
        assert_eq!("accuracy".parse::<Criterion>().unwrap(), Criterion::Accuracy);
        assert!("auc".parse::<Criterion>().is_err());
        assert_eq!(ImbalanceMetric::F1Score.label(), "F1_SCORE");
    }
}
