//! Classification scores over predicted/true labels.
//!
//! - Confusion matrix with accuracy and top-k accuracy
//! - Macro F1, Matthews correlation, Cohen's kappa, balanced accuracy
//! - Per class-range breakdowns used by `eval_task`

use anyhow::{bail, Result};

use crate::metrics::{Criterion, EvalResult, Grouped, ImbalanceMetric};

/// Number of ranked predictions checked by the top-5 score.
pub const TOP_K: usize = 5;

/// Element [i][j] counts samples of true class i predicted as j.
#[derive(Clone, Debug)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    n_classes: usize,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            matrix: vec![vec![0; n_classes]; n_classes],
            n_classes,
        }
    }

    /// Build from paired labels. The class count grows to cover every label seen.
    pub fn from_predictions(y_pred: &[usize], y_true: &[usize], n_classes: usize) -> Result<Self> {
        if y_pred.len() != y_true.len() {
            bail!(
                "predictions and targets differ in length ({} vs {})",
                y_pred.len(),
                y_true.len()
            );
        }

        let n_classes = y_pred
            .iter()
            .chain(y_true.iter())
            .max()
            .map_or(n_classes, |&max| n_classes.max(max + 1));

        let mut cm = Self::new(n_classes);
        for (&pred, &truth) in y_pred.iter().zip(y_true.iter()) {
            cm.matrix[truth][pred] += 1;
        }
        Ok(cm)
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn get(&self, true_label: usize, predicted_label: usize) -> usize {
        self.matrix[true_label][predicted_label]
    }

    pub fn true_positives(&self, class: usize) -> usize {
        self.matrix[class][class]
    }

    /// Samples whose true label is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    /// Samples predicted as `class`.
    pub fn predicted(&self, class: usize) -> usize {
        self.matrix.iter().map(|row| row[class]).sum()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.n_classes).map(|c| self.matrix[c][c]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.correct() as f64 / total as f64
    }

    /// Classes that occur either as a target or as a prediction.
    fn present_classes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n_classes).filter(|&c| self.support(c) > 0 || self.predicted(c) > 0)
    }

    /// Unweighted mean of per-class F1 over the classes present.
    pub fn f1_macro(&self) -> f64 {
        let scores: Vec<f64> = self
            .present_classes()
            .map(|class| {
                let tp = self.true_positives(class) as f64;
                let fp = self.predicted(class) as f64 - tp;
                let fn_ = self.support(class) as f64 - tp;
                let denominator = 2.0 * tp + fp + fn_;
                if denominator > 0.0 {
                    2.0 * tp / denominator
                } else {
                    0.0
                }
            })
            .collect();

        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    /// Multi-class Matthews correlation coefficient (Gorodkin's R_K).
    pub fn mcc(&self) -> f64 {
        let s = self.total() as f64;
        let c = self.correct() as f64;
        let mut pt = 0.0;
        let mut pp = 0.0;
        let mut tt = 0.0;
        for class in 0..self.n_classes {
            let p = self.predicted(class) as f64;
            let t = self.support(class) as f64;
            pt += p * t;
            pp += p * p;
            tt += t * t;
        }

        let cov_ytyp = c * s - pt;
        let cov_ypyp = s * s - pp;
        let cov_ytyt = s * s - tt;
        let denominator = cov_ypyp * cov_ytyt;
        if denominator <= 0.0 {
            0.0
        } else {
            cov_ytyp / denominator.sqrt()
        }
    }

    /// Cohen's kappa. Zero when chance agreement is already perfect.
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let observed = self.accuracy();
        let expected: f64 = (0..self.n_classes)
            .map(|class| self.predicted(class) as f64 * self.support(class) as f64)
            .sum::<f64>()
            / (total * total);

        if (1.0 - expected).abs() < f64::EPSILON {
            0.0
        } else {
            (observed - expected) / (1.0 - expected)
        }
    }

    /// Mean recall over the classes that have targets.
    pub fn balanced_accuracy(&self) -> f64 {
        let recalls: Vec<f64> = (0..self.n_classes)
            .filter(|&class| self.support(class) > 0)
            .map(|class| self.true_positives(class) as f64 / self.support(class) as f64)
            .collect();

        if recalls.is_empty() {
            0.0
        } else {
            recalls.iter().sum::<f64>() / recalls.len() as f64
        }
    }

    pub fn score(&self, metric: ImbalanceMetric) -> f64 {
        match metric {
            ImbalanceMetric::F1Score => self.f1_macro(),
            ImbalanceMetric::Mcc => self.mcc(),
            ImbalanceMetric::Kappa => self.kappa(),
            ImbalanceMetric::BalancedAccuracy => self.balanced_accuracy(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage of rows whose first `k` ranked predictions contain the target.
pub fn top_k_accuracy(ranked: &[Vec<usize>], y_true: &[usize], k: usize) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let hits = ranked
        .iter()
        .zip(y_true)
        .filter(|(row, truth)| row.iter().take(k).any(|pred| pred == *truth))
        .count();
    round2(hits as f64 * 100.0 / y_true.len() as f64)
}

/// Score the samples whose target satisfies `keep`. Empty subsets score zero.
fn score_subset<F>(
    criterion: Criterion,
    y_pred: &[usize],
    y_true: &[usize],
    n_classes: usize,
    keep: F,
) -> Result<f64>
where
    F: Fn(usize) -> bool,
{
    let (pred, truth): (Vec<usize>, Vec<usize>) = y_pred
        .iter()
        .zip(y_true)
        .filter(|(_, truth)| keep(**truth))
        .map(|(&pred, &truth)| (pred, truth))
        .unzip();

    if truth.is_empty() {
        return Ok(0.0);
    }

    let cm = ConfusionMatrix::from_predictions(&pred, &truth, n_classes)?;
    Ok(match criterion {
        Criterion::Accuracy => round2(cm.accuracy() * 100.0),
        Criterion::Imbalance(metric) => cm.score(metric),
    })
}

/// Score ranked predictions the way every learner reports them.
///
/// `task_ends` holds the exclusive upper class bound of each task seen so far,
/// `known_classes` the number of classes learned before the current task.
/// `grouped` is `total`, one `{start:02}-{end:02}` entry per task range, then
/// `old` and `new`; `top1` is `total` and `top5` the top-5 accuracy.
pub fn evaluate_predictions(
    criterion: Criterion,
    ranked: &[Vec<usize>],
    y_true: &[usize],
    task_ends: &[usize],
    known_classes: usize,
) -> Result<EvalResult> {
    if ranked.len() != y_true.len() {
        bail!(
            "got {} ranked predictions for {} targets",
            ranked.len(),
            y_true.len()
        );
    }
    let y_pred = ranked
        .iter()
        .map(|row| row.first().copied())
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(|| anyhow::anyhow!("empty prediction row"))?;
    let n_classes = task_ends.last().copied().unwrap_or(0);

    let mut grouped = Grouped::new();
    grouped.insert(
        "total",
        score_subset(criterion, &y_pred, y_true, n_classes, |_| true)?,
    );

    let mut start = 0;
    for &end in task_ends {
        if end <= start {
            continue;
        }
        let label = format!("{:02}-{:02}", start, end - 1);
        let value = score_subset(criterion, &y_pred, y_true, n_classes, |c| {
            c >= start && c < end
        })?;
        grouped.insert(label, value);
        start = end;
    }

    grouped.insert(
        "old",
        score_subset(criterion, &y_pred, y_true, n_classes, |c| c < known_classes)?,
    );
    grouped.insert(
        "new",
        score_subset(criterion, &y_pred, y_true, n_classes, |c| c >= known_classes)?,
    );

    let top1 = grouped.get("total").unwrap_or(0.0);
    Ok(EvalResult {
        top1,
        top5: top_k_accuracy(ranked, y_true, TOP_K),
        grouped,
    })
}

/// Indices of the `k` largest scores, best first.
pub fn rank_descending(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn worked_example() -> ConfusionMatrix {
        let y_true = [0, 0, 1, 1, 2, 2];
        let y_pred = [0, 1, 1, 1, 2, 0];
        ConfusionMatrix::from_predictions(&y_pred, &y_true, 3).unwrap()
    }

    #[test]
    fn confusion_counts() {
        let cm = worked_example();
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.get(2, 0), 1);
        assert_eq!(cm.support(1), 2);
        assert_eq!(cm.predicted(1), 3);
        assert_relative_eq!(cm.accuracy(), 4.0 / 6.0);
    }

    #[test]
    fn imbalance_scores_match_hand_computation() {
        let cm = worked_example();
        assert_relative_eq!(cm.f1_macro(), (0.5 + 0.8 + 2.0 / 3.0) / 3.0, epsilon = 1e-12);
        assert_relative_eq!(cm.balanced_accuracy(), 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(cm.kappa(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(cm.mcc(), 12.0 / 528f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn perfect_predictions_score_one() {
        let labels = [0, 1, 2, 2, 1];
        let cm = ConfusionMatrix::from_predictions(&labels, &labels, 3).unwrap();
        for metric in ImbalanceMetric::ALL {
            assert_relative_eq!(cm.score(metric), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn labels_beyond_declared_classes_extend_the_matrix() {
        let cm = ConfusionMatrix::from_predictions(&[4], &[1], 2).unwrap();
        assert_eq!(cm.n_classes(), 5);
        assert_eq!(cm.get(1, 4), 1);
    }

    #[test]
    fn mismatched_lengths_fail() {
        assert!(ConfusionMatrix::from_predictions(&[0, 1], &[0], 2).is_err());
    }

    #[test]
    fn grouped_accuracy_follows_task_ranges() {
        let ranked = vec![vec![0, 1], vec![0, 1], vec![2, 3], vec![2, 3]];
        let y_true = [0, 1, 2, 3];
        let result =
            evaluate_predictions(Criterion::Accuracy, &ranked, &y_true, &[2, 4], 2).unwrap();

        let labels: Vec<&str> = result.grouped.iter().map(|(label, _)| label).collect();
        assert_eq!(labels, vec!["total", "00-01", "02-03", "old", "new"]);
        assert_eq!(result.top1, 50.0);
        assert_eq!(result.top5, 100.0);
        assert_eq!(result.grouped.range_values(), vec![50.0, 50.0]);
    }

    #[test]
    fn first_task_has_no_old_samples() {
        let ranked = vec![vec![0], vec![1], vec![1]];
        let result =
            evaluate_predictions(Criterion::Accuracy, &ranked, &[0, 1, 0], &[2], 0).unwrap();
        assert_eq!(result.grouped.get("old"), Some(0.0));
        assert_eq!(result.grouped.get("new"), Some(66.67));
        assert_eq!(result.grouped.range_values(), vec![66.67]);
    }

    #[test]
    fn imbalance_criterion_scores_each_range() {
        let ranked = vec![vec![0], vec![1], vec![1], vec![1]];
        let y_true = [0, 0, 1, 1];
        let result = evaluate_predictions(
            Criterion::Imbalance(ImbalanceMetric::BalancedAccuracy),
            &ranked,
            &y_true,
            &[1, 2],
            1,
        )
        .unwrap();
        assert_relative_eq!(result.top1, 0.75);
        assert_eq!(result.grouped.range_values(), vec![0.5, 1.0]);
    }

    #[test]
    fn rank_descending_orders_scores() {
        assert_eq!(rank_descending(&[0.1, 0.7, 0.3, 0.9], 3), vec![3, 1, 2]);
        assert_eq!(rank_descending(&[0.5], 5), vec![0]);
    }

    proptest! {
        #[test]
        fn scores_stay_in_range(pairs in prop::collection::vec((0usize..6, 0usize..6), 1..64)) {
            let (y_pred, y_true): (Vec<usize>, Vec<usize>) = pairs.into_iter().unzip();
            let cm = ConfusionMatrix::from_predictions(&y_pred, &y_true, 6).unwrap();
            let eps = 1e-9;
            prop_assert!(cm.accuracy() >= 0.0 && cm.accuracy() <= 1.0 + eps);
            prop_assert!(cm.f1_macro() >= 0.0 && cm.f1_macro() <= 1.0 + eps);
            prop_assert!(cm.balanced_accuracy() >= 0.0 && cm.balanced_accuracy() <= 1.0 + eps);
            prop_assert!(cm.mcc() >= -1.0 - eps && cm.mcc() <= 1.0 + eps);
            prop_assert!(cm.kappa() <= 1.0 + eps);
        }
    }
}
