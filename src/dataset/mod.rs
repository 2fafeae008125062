//! # Count matrices
//!
//! Reading and writing of tab-separated gene/feature count tables.
//!
//! On disk a count table holds one feature per row and one sample per column; the first
//! column carries the feature identifiers and the header row the sample names. In memory
//! the table is held transposed, as a samples x features [`Array2`], which is the layout
//! every estimator in this crate expects.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use log::{debug, info};
use ndarray::Array2;

#[derive(Debug, Clone)]
pub struct CountMatrix {
    pub sample_names: Vec<String>,
    pub feature_names: Vec<String>,
    /// Samples x features.
    pub values: Array2<f64>,
}

impl CountMatrix {
    pub fn new(
        sample_names: Vec<String>,
        feature_names: Vec<String>,
        values: Array2<f64>,
    ) -> anyhow::Result<Self> {
        if values.nrows() != sample_names.len() {
            bail!(
                "Number of sample names ({}) does not match number of rows ({})",
                sample_names.len(),
                values.nrows()
            );
        }
        if values.ncols() != feature_names.len() {
            bail!(
                "Number of feature names ({}) does not match number of columns ({})",
                feature_names.len(),
                values.ncols()
            );
        }
        Ok(CountMatrix {
            sample_names,
            feature_names,
            values,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }
}

/// A count matrix together with one integer class label per sample.
#[derive(Debug, Clone)]
pub struct LabeledMatrix {
    pub matrix: CountMatrix,
    pub label_column: String,
    pub labels: Vec<usize>,
}

impl LabeledMatrix {
    pub fn new(matrix: CountMatrix, label_column: &str, labels: Vec<usize>) -> anyhow::Result<Self> {
        if labels.len() != matrix.n_samples() {
            bail!(
                "Got {} labels for {} samples",
                labels.len(),
                matrix.n_samples()
            );
        }
        if matrix.feature_names.iter().any(|f| f == label_column) {
            bail!(
                "Label column '{}' collides with an existing feature of the same name",
                label_column
            );
        }
        Ok(LabeledMatrix {
            matrix,
            label_column: label_column.to_string(),
            labels,
        })
    }

    /// Writes the table sample-major with the label as the first data column.
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        self.write_to(BufWriter::new(file))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Labeled matrix written to {}", path.display());
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(writer);

        let mut header = Vec::with_capacity(self.matrix.n_features() + 2);
        header.push(String::new());
        header.push(self.label_column.clone());
        header.extend(self.matrix.feature_names.iter().cloned());
        wtr.write_record(&header)?;

        let mut record = Vec::with_capacity(header.len());
        for (i, sample) in self.matrix.sample_names.iter().enumerate() {
            record.clear();
            record.push(sample.clone());
            record.push(self.labels[i].to_string());
            record.extend(self.matrix.values.row(i).iter().map(|&v| format_count(v)));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn format_count(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Reads a features x samples tab-separated table and returns it transposed.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> anyhow::Result<CountMatrix> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open count matrix {}", path.display()))?;
    let matrix = read_count_matrix_from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse count matrix {}", path.display()))?;
    info!(
        "Loaded {} samples x {} features from {}",
        matrix.n_samples(),
        matrix.n_features(),
        path.display()
    );
    Ok(matrix)
}

pub fn read_count_matrix_from_reader<R: Read>(reader: R) -> anyhow::Result<CountMatrix> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        bail!("Header must contain an index column and at least one sample");
    }
    let sample_names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    let mut seen = HashSet::with_capacity(sample_names.len());
    for name in &sample_names {
        if !seen.insert(name.as_str()) {
            bail!("Duplicate sample name '{}'", name);
        }
    }
    let n_samples = sample_names.len();

    let mut feature_names = Vec::new();
    // Feature-major buffer, transposed once all rows are known.
    let mut buffer: Vec<f64> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let feature = record
            .get(0)
            .ok_or_else(|| anyhow!("Empty record at data line {}", line + 1))?;
        feature_names.push(feature.to_string());
        for (j, cell) in record.iter().skip(1).enumerate() {
            let value: f64 = cell.trim().parse().map_err(|_| {
                anyhow!(
                    "Non-numeric value '{}' for feature '{}' in sample '{}'",
                    cell,
                    feature,
                    sample_names[j]
                )
            })?;
            if !value.is_finite() {
                bail!(
                    "Non-finite value '{}' for feature '{}' in sample '{}'",
                    cell,
                    feature,
                    sample_names[j]
                );
            }
            buffer.push(value);
        }
    }

    if feature_names.is_empty() {
        bail!("Count matrix contains no features");
    }
    let n_features = feature_names.len();
    debug!("Parsed {} features across {} samples", n_features, n_samples);

    let by_feature = Array2::from_shape_vec((n_features, n_samples), buffer)?;
    let values = by_feature.t().as_standard_layout().into_owned();
    CountMatrix::new(sample_names, feature_names, values)
}
