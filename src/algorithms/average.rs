// Row-wise (optionally weighted) average of matrices with identical mapping models.
use crate::algorithms::{Phase, enter, in_file, prepare_output, require_inputs};
use crate::core::error::{Error, ErrorKind};
use crate::core::matrix::CiftiMatrix;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AverageReport {
    pub inputs: usize,
    /// Inputs with nonzero weight; only these are read.
    pub inputs_read: usize,
    pub rows_written: usize,
    pub total_weight: f64,
    pub row_reads: u64,
}

/// Averages `inputs` into `output`, one row at a time.
///
/// With `weights`, input `k` contributes `weights[k] / sum(weights)`; inputs
/// weighted zero are never read.
pub fn average(
    inputs: &[&CiftiMatrix],
    weights: Option<&[f64]>,
    output: &mut CiftiMatrix,
) -> Result<AverageReport, Error> {
    enter("average", Phase::Validating);
    let first = require_inputs(inputs)?;
    let weights = resolve_weights(inputs.len(), weights)?;
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 {
        return Err(Error::new(ErrorKind::EmptyResult)
            .with_message("all averaging weights are zero"));
    }
    let reference = first.cifti_xml()?;
    for input in &inputs[1..] {
        let xml = input.cifti_xml()?;
        reference.check_rows_match(xml).map_err(in_file(input))?;
        reference.check_columns_match(xml).map_err(in_file(input))?;
    }

    enter("average", Phase::Processing);
    prepare_output(output, reference.clone())?;
    let active: Vec<(&CiftiMatrix, f64)> = inputs
        .iter()
        .copied()
        .zip(weights.iter().copied())
        .filter(|(_, weight)| *weight != 0.0)
        .collect();
    let reads_before: u64 = active.iter().map(|(input, _)| input.row_reads()).sum();

    let columns = first.columns();
    let mut buf = vec![0f32; columns];
    let mut acc = vec![0f64; columns];
    let mut out = vec![0f32; columns];
    for row in 0..first.rows() {
        acc.fill(0.0);
        for (input, weight) in &active {
            input.get_row(&mut buf, row)?;
            for (sum, value) in acc.iter_mut().zip(&buf) {
                *sum += *value as f64 * weight;
            }
        }
        for (dst, sum) in out.iter_mut().zip(&acc) {
            *dst = (*sum / total_weight) as f32;
        }
        output.set_row(&out, row)?;
    }

    enter("average", Phase::Finalizing);
    let reads_after: u64 = active.iter().map(|(input, _)| input.row_reads()).sum();
    Ok(AverageReport {
        inputs: inputs.len(),
        inputs_read: active.len(),
        rows_written: first.rows(),
        total_weight,
        row_reads: reads_after - reads_before,
    })
}

fn resolve_weights(count: usize, weights: Option<&[f64]>) -> Result<Vec<f64>, Error> {
    let Some(weights) = weights else {
        return Ok(vec![1.0; count]);
    };
    if weights.len() != count {
        return Err(Error::new(ErrorKind::DuplicateOrMissingInput).with_message(format!(
            "{} weights supplied for {count} inputs",
            weights.len()
        )));
    }
    if let Some((idx, weight)) = weights
        .iter()
        .enumerate()
        .find(|(_, weight)| !weight.is_finite() || **weight < 0.0)
    {
        return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
            .with_message(format!("weight {idx} is {weight}, weights must be finite and non-negative")));
    }
    Ok(weights.to_vec())
}
