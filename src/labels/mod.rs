//! Binary sample labelling by name and the display names of the two classes.

use log::{info, warn};

use crate::dataset::{CountMatrix, LabeledMatrix};

pub const POSITIVE: usize = 1;
pub const NEGATIVE: usize = 0;

/// Binary labelling by substring match on the sample name.
#[derive(Debug, Clone)]
pub struct LabelRule {
    pattern: String,
    column: String,
}

impl Default for LabelRule {
    fn default() -> Self {
        LabelRule {
            pattern: "crispatus".to_string(),
            column: "Lactotype".to_string(),
        }
    }
}

impl LabelRule {
    pub fn new(pattern: &str, column: &str) -> Self {
        LabelRule {
            pattern: pattern.to_string(),
            column: column.to_string(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// [`POSITIVE`] for names containing the pattern (case-sensitive), [`NEGATIVE`] otherwise.
    pub fn assign<S: AsRef<str>>(&self, sample_names: &[S]) -> Vec<usize> {
        sample_names
            .iter()
            .map(|name| {
                if name.as_ref().contains(self.pattern.as_str()) {
                    POSITIVE
                } else {
                    NEGATIVE
                }
            })
            .collect()
    }

    pub fn apply(&self, matrix: CountMatrix) -> anyhow::Result<LabeledMatrix> {
        let labels = self.assign(&matrix.sample_names);
        let positives = labels.iter().filter(|&&l| l == POSITIVE).count();
        info!(
            "Labelled {} of {} samples as '{}'",
            positives,
            labels.len(),
            self.pattern
        );
        if positives == 0 || positives == labels.len() {
            warn!("All samples fall into a single class for pattern '{}'", self.pattern);
        }
        LabeledMatrix::new(matrix, &self.column, labels)
    }
}

/// Display names for the two classes.
#[derive(Debug, Clone)]
pub struct ClassNames {
    pub positive: String,
    pub negative: String,
}

impl Default for ClassNames {
    fn default() -> Self {
        ClassNames {
            positive: "Crispatus".to_string(),
            negative: "Iners".to_string(),
        }
    }
}

impl ClassNames {
    pub fn name_of(&self, label: usize) -> &str {
        if label == POSITIVE {
            &self.positive
        } else {
            &self.negative
        }
    }
}
