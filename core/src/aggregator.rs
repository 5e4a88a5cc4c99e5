use std::collections::BTreeMap;

use anyhow::Result;
use ndarray::Array2;

use crate::{
    learner::Evaluation,
    metrics::{mean, Curve, ImbalanceMetric, TaskMatrix},
    report::Reporter,
    sink::LogSink,
};

/// Accumulates the per-task results of one run and prints them.
#[derive(Clone, Debug, Default)]
pub struct MetricsAggregator {
    imb_metrics: bool,
    cnn_curve: Curve,
    nme_curve: Curve,
    cnn_matrix: TaskMatrix,
    nme_matrix: TaskMatrix,
    imb_curves: BTreeMap<ImbalanceMetric, Vec<f64>>,
    imb_matrices: BTreeMap<ImbalanceMetric, TaskMatrix>,
    last_task: Option<usize>,
}

impl MetricsAggregator {
    pub fn new(imb_metrics: bool) -> Self {
        let mut aggregator = Self {
            imb_metrics,
            ..Self::default()
        };
        if imb_metrics {
            for metric in ImbalanceMetric::ALL {
                aggregator.imb_curves.insert(metric, Vec::new());
                aggregator.imb_matrices.insert(metric, TaskMatrix::default());
            }
        }
        aggregator
    }

    pub fn imb_metrics(&self) -> bool {
        self.imb_metrics
    }

    pub fn cnn_curve(&self) -> &Curve {
        &self.cnn_curve
    }

    pub fn nme_curve(&self) -> &Curve {
        &self.nme_curve
    }

    pub fn cnn_matrix(&self) -> &TaskMatrix {
        &self.cnn_matrix
    }

    pub fn nme_matrix(&self) -> &TaskMatrix {
        &self.nme_matrix
    }

    pub fn imbalance_curve(&self, metric: ImbalanceMetric) -> &[f64] {
        self.imb_curves
            .get(&metric)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn imbalance_matrix(&self, metric: ImbalanceMetric) -> Option<&TaskMatrix> {
        self.imb_matrices.get(&metric)
    }

    /// Side length of the assembled matrices: last task index + 1.
    pub fn table_size(&self) -> usize {
        self.last_task.map_or(0, |task| task + 1)
    }

    /// Record task `task`. `imbalance` holds one evaluation per imbalance
    /// metric and is ignored unless imbalance metrics are enabled.
    ///
    /// Grouped imbalance scores only reach the matrices when the learner has
    /// no NME head.
    pub fn record(
        &mut self,
        task: usize,
        accuracy: &Evaluation,
        imbalance: &[(ImbalanceMetric, Evaluation)],
        log: &mut dyn LogSink,
        reporter: &mut Reporter,
    ) -> Result<()> {
        self.last_task = Some(task);
        let cnn = &accuracy.cnn;

        match &accuracy.nme {
            Some(nme) => {
                log.write_line(&format!("CNN: {}", cnn.grouped))?;
                log.write_line(&format!("NME: {}", nme.grouped))?;

                self.cnn_matrix.push(cnn.grouped.range_values());
                self.nme_matrix.push(nme.grouped.range_values());
                self.cnn_curve.push(cnn);
                self.nme_curve.push(nme);

                reporter.heading("CNN Accuracy Results")?;
                if let Some(average) = self.cnn_curve.average_top1() {
                    reporter.value("Average Accuracy (CNN)", average)?;
                }
                if let Some(average) = self.nme_curve.average_top1() {
                    reporter.value("Average Accuracy (NME)", average)?;
                }

                if self.imb_metrics {
                    reporter.heading("Imbalance Metrics")?;
                    for (metric, evaluation) in imbalance {
                        reporter.value(&format!("{} (CNN)", metric.label()), evaluation.cnn.top1)?;
                        self.imb_curves
                            .entry(*metric)
                            .or_default()
                            .push(evaluation.cnn.top1);
                        // The NME line carries the NME score, not a second copy of the CNN one.
                        if let Some(nme) = &evaluation.nme {
                            reporter.value(&format!("{} (NME)", metric.label()), nme.top1)?;
                        }
                    }
                }
            }
            None => {
                log.write_line("No NME accuracy.")?;

                self.cnn_matrix.push(cnn.grouped.range_values());
                self.cnn_curve.push(cnn);

                reporter.heading("CNN Accuracy Results")?;
                if let Some(average) = self.cnn_curve.average_top1() {
                    reporter.value("Average Accuracy (CNN)", average)?;
                }

                if self.imb_metrics {
                    reporter.heading("Imbalance Metrics")?;
                    for (metric, evaluation) in imbalance {
                        let curve = self.imb_curves.entry(*metric).or_default();
                        curve.push(evaluation.cnn.top1);
                        let average = mean(curve);
                        self.imb_matrices
                            .entry(*metric)
                            .or_default()
                            .push(evaluation.cnn.grouped.range_values());
                        if let Some(average) = average {
                            reporter.value(&format!("Average {} (CNN)", metric.label()), average)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Assembled CNN accuracy table, `None` before the first task.
    pub fn accuracy_table(&self) -> Result<Option<Array2<f64>>> {
        if self.cnn_matrix.is_empty() {
            return Ok(None);
        }
        self.cnn_matrix.assemble(self.table_size()).map(Some)
    }

    /// Print the final matrices and the average imbalance scores.
    pub fn finish(&self, reporter: &mut Reporter) -> Result<()> {
        let size = self.table_size();

        if let Some(table) = self.accuracy_table()? {
            reporter.matrix("Accuracy Matrix (CNN)", &table)?;
        }
        if !self.nme_matrix.is_empty() {
            reporter.matrix("Accuracy Matrix (NME)", &self.nme_matrix.assemble(size)?)?;
        }

        if self.imb_metrics {
            for (metric, curve) in &self.imb_curves {
                if curve.is_empty() {
                    continue;
                }
                let table = match self.imb_matrices.get(metric) {
                    Some(matrix) => matrix.assemble(size)?,
                    None => Array2::zeros((size, size)),
                };
                reporter.matrix(&format!("{} Matrix (CNN)", metric.label()), &table)?;
            }

            reporter.heading("Average Imbalance Metrics (CNN)")?;
            for (metric, curve) in &self.imb_curves {
                if let Some(average) = mean(curve) {
                    reporter.line(&format!("Average {} (CNN): {:.2}", metric.label(), average))?;
                }
            }
        }

        reporter.flush()
    }
}
