//! Classification metrics: accuracy, confusion matrices, binary rates and a per-class
//! precision/recall report.

use std::fmt;

use anyhow::bail;
use ndarray::Array2;

use crate::utils::unique_labels;

fn check_lengths(y_true: &[usize], y_pred: &[usize]) -> anyhow::Result<()> {
    if y_true.len() != y_pred.len() {
        bail!(
            "Found inconsistent numbers of samples: {} true labels, {} predictions",
            y_true.len(),
            y_pred.len()
        );
    }
    if y_true.is_empty() {
        bail!("Cannot score an empty prediction set");
    }
    Ok(())
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> anyhow::Result<f64> {
    check_lengths(y_true, y_pred)?;
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    Ok(correct as f64 / y_true.len() as f64)
}

/// Rows are actual classes and columns predicted classes, both in `labels` order. Samples
/// whose true or predicted label is not listed are ignored.
pub fn confusion_matrix(
    y_true: &[usize],
    y_pred: &[usize],
    labels: &[usize],
) -> anyhow::Result<Array2<usize>> {
    check_lengths(y_true, y_pred)?;
    if labels.is_empty() {
        bail!("At least one label must be given");
    }
    let position = |l: usize| labels.iter().position(|&x| x == l);
    let mut cm = Array2::<usize>::zeros((labels.len(), labels.len()));
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        if let (Some(i), Some(j)) = (position(t), position(p)) {
            cm[[i, j]] += 1;
        }
    }
    Ok(cm)
}

/// Rates of a two-class confusion matrix laid out `[[TP, FN], [FP, TN]]`, i.e. built with
/// the positive label first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryRates {
    pub tp: usize,
    pub fn_: usize,
    pub fp: usize,
    pub tn: usize,
    pub tpr: f64,
    pub fnr: f64,
    pub fpr: f64,
    pub tnr: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

impl BinaryRates {
    pub fn from_confusion(cm: &Array2<usize>) -> anyhow::Result<Self> {
        if cm.dim() != (2, 2) {
            bail!("Binary rates need a 2x2 confusion matrix, got {:?}", cm.dim());
        }
        let (tp, fn_, fp, tn) = (cm[[0, 0]], cm[[0, 1]], cm[[1, 0]], cm[[1, 1]]);
        Ok(BinaryRates {
            tp,
            fn_,
            fp,
            tn,
            tpr: ratio(tp, tp + fn_),
            fnr: ratio(fn_, tp + fn_),
            fpr: ratio(fp, fp + tn),
            tnr: ratio(tn, fp + tn),
        })
    }

    /// Rates in confusion-matrix cell order.
    pub fn cell_rates(&self) -> [f64; 4] {
        [self.tpr, self.fnr, self.fpr, self.tnr]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
    pub label: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AverageScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision, recall and F1 with accuracy, macro and support-weighted averages.
/// A zero denominator scores 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassScores>,
    pub accuracy: f64,
    pub macro_avg: AverageScores,
    pub weighted_avg: AverageScores,
}

impl ClassificationReport {
    pub fn new(y_true: &[usize], y_pred: &[usize]) -> anyhow::Result<Self> {
        check_lengths(y_true, y_pred)?;
        let mut all: Vec<usize> = y_true.to_vec();
        all.extend_from_slice(y_pred);
        let labels = unique_labels(&all);

        let classes: Vec<ClassScores> = labels
            .iter()
            .map(|&label| {
                let tp = y_true
                    .iter()
                    .zip(y_pred.iter())
                    .filter(|&(&t, &p)| t == label && p == label)
                    .count();
                let predicted = y_pred.iter().filter(|&&p| p == label).count();
                let support = y_true.iter().filter(|&&t| t == label).count();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassScores {
                    label,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total = y_true.len();
        let n = classes.len() as f64;
        let macro_avg = AverageScores {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };
        let weighted = |f: fn(&ClassScores) -> f64| {
            classes
                .iter()
                .map(|c| f(c) * c.support as f64)
                .sum::<f64>()
                / total as f64
        };
        let weighted_avg = AverageScores {
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
            support: total,
        };

        Ok(ClassificationReport {
            accuracy: accuracy(y_true, y_pred)?,
            classes,
            macro_avg,
            weighted_avg,
        })
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.to_string().len())
            .max()
            .unwrap_or(0)
            .max("weighted avg".len());
        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support",
            width = width
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.label, c.precision, c.recall, c.f1, c.support,
                width = width
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support,
            width = width
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, avg.support,
                width = width
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_accuracy() {
        assert_relative_eq!(accuracy(&[1, 0, 1, 1], &[1, 0, 0, 1]).unwrap(), 0.75);
        assert!(accuracy(&[1], &[1, 0]).is_err());
        assert!(accuracy(&[], &[]).is_err());
    }

    #[test]
    fn test_confusion_matrix_positive_first() {
        let y_true = [1, 1, 1, 0, 0];
        let y_pred = [1, 0, 1, 1, 0];
        let cm = confusion_matrix(&y_true, &y_pred, &[1, 0]).unwrap();
        assert_eq!(cm, array![[2, 1], [1, 1]]);

        let rates = BinaryRates::from_confusion(&cm).unwrap();
        assert_eq!((rates.tp, rates.fn_, rates.fp, rates.tn), (2, 1, 1, 1));
        assert_relative_eq!(rates.tpr, 2.0 / 3.0);
        assert_relative_eq!(rates.fnr, 1.0 / 3.0);
        assert_relative_eq!(rates.fpr, 0.5);
        assert_relative_eq!(rates.tnr, 0.5);
    }

    #[test]
    fn test_rates_zero_denominator() {
        let cm = array![[0, 0], [1, 3]];
        let rates = BinaryRates::from_confusion(&cm).unwrap();
        assert_eq!(rates.tpr, 0.0);
        assert_eq!(rates.fnr, 0.0);
        assert!(BinaryRates::from_confusion(&array![[1]]).is_err());
    }

    #[test]
    fn test_report_values() {
        let y_true = [0, 0, 0, 1, 1];
        let y_pred = [0, 0, 1, 1, 1];
        let report = ClassificationReport::new(&y_true, &y_pred).unwrap();
        assert_eq!(report.classes.len(), 2);
        assert_relative_eq!(report.classes[0].precision, 1.0);
        assert_relative_eq!(report.classes[0].recall, 2.0 / 3.0);
        assert_relative_eq!(report.classes[1].precision, 2.0 / 3.0);
        assert_relative_eq!(report.classes[1].recall, 1.0);
        assert_relative_eq!(report.accuracy, 0.8);
        assert_relative_eq!(report.macro_avg.f1, 0.8);
        assert_eq!(report.weighted_avg.support, 5);
    }

    #[test]
    fn test_report_layout() {
        let report = ClassificationReport::new(&[0, 1], &[0, 1]).unwrap();
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "              precision    recall  f1-score   support");
        assert_eq!(lines[2], "           0       1.00      1.00      1.00         1");
        assert_eq!(lines[5], "    accuracy                           1.00         2");
        assert_eq!(lines[7], "weighted avg       1.00      1.00      1.00         2");
    }

    #[test]
    fn test_report_unpredicted_class_scores_zero() {
        let report = ClassificationReport::new(&[0, 1, 1], &[0, 0, 0]).unwrap();
        assert_eq!(report.classes[1].precision, 0.0);
        assert_eq!(report.classes[1].f1, 0.0);
    }
}
