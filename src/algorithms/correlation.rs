// Per-row Pearson correlation between two row-compatible matrices.
use crate::algorithms::{Phase, enter, in_file, prepare_output};
use crate::core::error::{Error, ErrorKind};
use crate::core::matrix::CiftiMatrix;
use crate::mapping::Axis;
use serde::Serialize;

const FISHER_CLAMP: f64 = 0.999999;
pub const CORRELATION_MAP_NAME: &str = "correlation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelationOptions {
    pub fisher_z: bool,
    pub demean: bool,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            fisher_z: false,
            demean: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationReport {
    pub rows_written: usize,
    pub row_reads: u64,
    /// Rows where either input had zero variance; written as NaN.
    pub undefined_rows: usize,
}

/// Fisher z-transform with `r` pre-clamped so the result stays finite.
pub fn fisher_z(r: f64) -> f64 {
    let r = r.clamp(-FISHER_CLAMP, FISHER_CLAMP);
    0.5 * ((1.0 + r) / (1.0 - r)).ln()
}

/// Correlation of two equal-length rows, clamped to [-1, 1]; NaN when either
/// row has zero root-sum-of-squares.
pub fn correlate_rows(a: &[f32], b: &[f32], demean: bool) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return f64::NAN;
    }
    let (mean_a, mean_b) = if demean {
        let sum_a: f64 = a.iter().map(|value| *value as f64).sum();
        let sum_b: f64 = b.iter().map(|value| *value as f64).sum();
        (sum_a / len as f64, sum_b / len as f64)
    } else {
        (0.0, 0.0)
    };
    let mut dot = 0.0;
    let mut ss_a = 0.0;
    let mut ss_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let x = *x as f64 - mean_a;
        let y = *y as f64 - mean_b;
        dot += x * y;
        ss_a += x * x;
        ss_b += y * y;
    }
    // rrs(a) * rrs(b); one sqrt keeps a row correlated with itself at exactly 1
    let rrs = (ss_a * ss_b).sqrt();
    if rrs == 0.0 {
        return f64::NAN;
    }
    (dot / rrs).clamp(-1.0, 1.0)
}

/// Writes one value per row: the correlation of row `i` of `a` with row `i` of `b`.
pub fn pairwise_correlation(
    a: &CiftiMatrix,
    b: &CiftiMatrix,
    output: &mut CiftiMatrix,
    options: CorrelationOptions,
) -> Result<CorrelationReport, Error> {
    enter("correlation", Phase::Validating);
    let xml_a = a.cifti_xml()?;
    let xml_b = b.cifti_xml()?;
    xml_a.check_rows_match(xml_b).map_err(in_file(b))?;
    if a.columns() != b.columns() {
        return Err(Error::new(ErrorKind::DimensionMismatch)
            .with_message(format!(
                "rows have {} and {} values",
                a.columns(),
                b.columns()
            ))
            .with_path(b.path()));
    }

    enter("correlation", Phase::Processing);
    prepare_output(
        output,
        xml_a.collapse_axis_to_single_scalar(Axis::Columns, CORRELATION_MAP_NAME),
    )?;
    let reads_before = a.row_reads() + b.row_reads();
    let mut row_a = vec![0f32; a.columns()];
    let mut row_b = vec![0f32; b.columns()];
    let mut undefined_rows = 0;
    for row in 0..a.rows() {
        a.get_row(&mut row_a, row)?;
        b.get_row(&mut row_b, row)?;
        let r = correlate_rows(&row_a, &row_b, options.demean);
        let value = if r.is_nan() {
            undefined_rows += 1;
            r
        } else if options.fisher_z {
            fisher_z(r)
        } else {
            r
        };
        output.set_row(&[value as f32], row)?;
    }

    enter("correlation", Phase::Finalizing);
    if undefined_rows > 0 {
        tracing::warn!(
            undefined_rows,
            "rows with zero variance have no defined correlation"
        );
    }
    Ok(CorrelationReport {
        rows_written: a.rows(),
        row_reads: a.row_reads() + b.row_reads() - reads_before,
        undefined_rows,
    })
}
