//! # Diagnostic figures
//!
//! PNG rendering of the three pipeline figures with `plotters`' bitmap backend.
//!
//! Labels, titles and axes come from the `ttf` feature, which is on by default. Hosts without
//! fontconfig can build with `--no-default-features`; every figure is then written with
//! shapes and colours only.

use std::path::Path;

use anyhow::{bail, Context};
use log::info;
use ndarray::{Array2, ArrayView2};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontTransform;

use crate::labels::{ClassNames, NEGATIVE, POSITIVE};
use crate::metrics::BinaryRates;

// The bitmap backend cannot rasterise text without a font backend.
const TEXT: bool = cfg!(feature = "ttf");

const VIRIDIS: [(u8, u8, u8); 5] = [
    (68, 1, 84),
    (59, 82, 139),
    (33, 145, 140),
    (94, 201, 98),
    (253, 231, 37),
];

// Darkest first.
const BLUES_R: [(u8, u8, u8); 4] = [(8, 48, 107), (33, 113, 181), (107, 174, 214), (247, 251, 255)];

fn interpolate(stops: &[(u8, u8, u8)], t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (stops.len() - 1) as f64;
    let i = (scaled.floor() as usize).min(stops.len() - 2);
    let frac = scaled - i as f64;
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (a, b) = (stops[i], stops[i + 1]);
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

pub fn viridis(t: f64) -> RGBColor {
    interpolate(&VIRIDIS, t)
}

pub fn blues_r(t: f64) -> RGBColor {
    interpolate(&BLUES_R, t)
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn padded_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() || !hi.is_finite() {
        return -1.0..1.0;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad)..(hi + pad)
}

/// Scatter of a 2-D embedding coloured by cluster, with a colour bar.
pub fn plot_tsne_clusters<P: AsRef<Path>>(
    path: P,
    embedding: ArrayView2<f64>,
    clusters: &[usize],
) -> anyhow::Result<()> {
    let path = path.as_ref();
    if embedding.ncols() < 2 {
        bail!("Scatter plot needs a 2-D embedding, got {} columns", embedding.ncols());
    }
    if embedding.nrows() != clusters.len() {
        bail!(
            "Got {} cluster labels for {} embedded points",
            clusters.len(),
            embedding.nrows()
        );
    }
    ensure_parent(path)?;

    let max_cluster = clusters.iter().copied().max().unwrap_or(0);
    let scale = (max_cluster as f64).max(1.0);
    let color_of = |c: usize| viridis(c as f64 / scale);

    let root = BitMapBackend::new(path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let (plot_area, bar_area) = root.split_horizontally(1070);

    let mut builder = ChartBuilder::on(&plot_area);
    builder.margin(20).x_label_area_size(50).y_label_area_size(60);
    if TEXT {
        builder.caption(
            "t-SNE Visualization with KMeans Clustering",
            ("sans-serif", 28),
        );
    }
    let mut chart = builder.build_cartesian_2d(
        padded_range(embedding.column(0).iter().copied()),
        padded_range(embedding.column(1).iter().copied()),
    )?;
    if TEXT {
        chart
            .configure_mesh()
            .x_desc("t-SNE Component 1")
            .y_desc("t-SNE Component 2")
            .axis_desc_style(("sans-serif", 18))
            .draw()?;
    }
    chart.draw_series(
        embedding
            .rows()
            .into_iter()
            .zip(clusters.iter())
            .map(|(row, &c)| Circle::new((row[0], row[1]), 5, color_of(c).filled())),
    )?;

    let mut bar = ChartBuilder::on(&bar_area)
        .margin_top(70)
        .margin_bottom(70)
        .margin_right(10)
        .right_y_label_area_size(60)
        .build_cartesian_2d(0.0..1.0, 0.0..scale)?;
    if TEXT {
        bar.configure_mesh()
            .disable_x_mesh()
            .disable_y_mesh()
            .disable_x_axis()
            .y_desc("Cluster Label")
            .axis_desc_style(("sans-serif", 16))
            .draw()?;
    }
    let steps = 100;
    bar.draw_series((0..steps).map(|i| {
        let lo = i as f64 / steps as f64;
        let hi = (i + 1) as f64 / steps as f64;
        Rectangle::new([(0.0, lo * scale), (1.0, hi * scale)], viridis(lo).filled())
    }))?;

    root.present()?;
    info!("t-SNE cluster plot written to {}", path.display());
    Ok(())
}

/// 2x2 heat map of a confusion matrix built positive-first, each cell annotated with its
/// name, count and rate.
pub fn plot_confusion_matrix<P: AsRef<Path>>(
    path: P,
    cm: &Array2<usize>,
    rates: &BinaryRates,
    names: &ClassNames,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    if cm.dim() != (2, 2) {
        bail!("Confusion matrix plot needs a 2x2 matrix, got {:?}", cm.dim());
    }
    ensure_parent(path)?;

    let cell_names = [
        format!("True {}", names.positive),
        format!("False {}", names.negative),
        format!("False {}", names.positive),
        format!("True {}", names.negative),
    ];
    let cell_rates = rates.cell_rates();
    let max_count = cm.iter().copied().max().unwrap_or(0).max(1) as f64;
    let tick_names = [names.name_of(POSITIVE), names.name_of(NEGATIVE)];

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let centered = |size: u32, color: RGBColor| {
        ("sans-serif", size)
            .into_font()
            .color(&color)
            .pos(Pos::new(HPos::Center, VPos::Center))
    };

    if TEXT {
        root.draw(&Text::new(
            "Confusion Matrix - Random Forest Classification",
            (400, 30),
            centered(20, BLACK),
        ))?;
    }

    let (left, top, cell_w, cell_h) = (130i32, 70i32, 315i32, 215i32);
    for r in 0..2 {
        for c in 0..2 {
            let count = cm[[r, c]];
            let x0 = left + c as i32 * cell_w;
            let y0 = top + r as i32 * cell_h;
            let shade = count as f64 / max_count;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + cell_w, y0 + cell_h)],
                blues_r(shade).filled(),
            ))?;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + cell_w, y0 + cell_h)],
                WHITE.stroke_width(2),
            ))?;

            if !TEXT {
                continue;
            }
            let ink = if shade < 0.5 { WHITE } else { BLACK };
            let k = r * 2 + c;
            let (cx, cy) = (x0 + cell_w / 2, y0 + cell_h / 2);
            let lines = [
                cell_names[k].clone(),
                count.to_string(),
                format!("{:.2}%", cell_rates[k] * 100.0),
            ];
            for (line_no, text) in lines.iter().enumerate() {
                root.draw(&Text::new(
                    text.clone(),
                    (cx, cy + (line_no as i32 - 1) * 26),
                    centered(20, ink),
                ))?;
            }
        }
    }

    if TEXT {
        for (i, name) in tick_names.iter().enumerate() {
            let offset = i as i32;
            root.draw(&Text::new(
                name.to_string(),
                (left + offset * cell_w + cell_w / 2, top + 2 * cell_h + 20),
                centered(18, BLACK),
            ))?;
            root.draw(&Text::new(
                name.to_string(),
                (left - 50, top + offset * cell_h + cell_h / 2),
                centered(18, BLACK),
            ))?;
        }
        root.draw(&Text::new(
            "Predicted Class",
            (left + cell_w, top + 2 * cell_h + 55),
            centered(20, BLACK),
        ))?;
        root.draw(&Text::new(
            "Actual Class",
            (25, top + cell_h),
            ("sans-serif", 20)
                .into_font()
                .transform(FontTransform::Rotate270)
                .color(&BLACK)
                .pos(Pos::new(HPos::Center, VPos::Center)),
        ))?;
    }

    root.present()?;
    info!("Confusion matrix plot written to {}", path.display());
    Ok(())
}

/// Bar chart of already-ranked importances, feature names as rotated ticks.
pub fn plot_feature_importances<P: AsRef<Path>>(
    path: P,
    names: &[String],
    importances: &[f64],
) -> anyhow::Result<()> {
    let path = path.as_ref();
    if names.len() != importances.len() {
        bail!(
            "Got {} names for {} importances",
            names.len(),
            importances.len()
        );
    }
    if importances.is_empty() {
        bail!("No feature importances to plot");
    }
    ensure_parent(path)?;

    let n = importances.len();
    let y_max = importances.iter().copied().fold(0.0, f64::max).max(f64::EPSILON) * 1.1;

    let root = BitMapBackend::new(path, (1400, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20).x_label_area_size(200).y_label_area_size(80);
    if TEXT {
        builder.caption("Top Feature Importances", ("sans-serif", 28));
    }
    let mut chart = builder.build_cartesian_2d((0..n).into_segmented(), 0.0..y_max)?;

    if TEXT {
        let label_of = |v: &SegmentValue<usize>| match v {
            SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
                names.get(*i).cloned().unwrap_or_default()
            }
            SegmentValue::Last => String::new(),
        };
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(n)
            .x_label_formatter(&label_of)
            .x_label_style(
                ("sans-serif", 12)
                    .into_font()
                    .transform(FontTransform::Rotate90),
            )
            .x_desc("Features")
            .y_desc("Importance Score")
            .axis_desc_style(("sans-serif", 18))
            .draw()?;
    }

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BLUE.mix(0.8).filled())
            .margin(2)
            .data(importances.iter().enumerate().map(|(i, v)| (i, *v))),
    )?;

    root.present()?;
    info!(
        "Feature importance plot ({} features) written to {}",
        n,
        path.display()
    );
    Ok(())
}
