// Memory-bounded transpose: K resident output rows, one input scan per chunk.
use crate::algorithms::{Phase, enter, prepare_output};
use crate::core::error::Error;
use crate::core::matrix::CiftiMatrix;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransposeOptions {
    /// Bytes available for resident output rows; `None` transposes in one pass.
    pub memory_limit_bytes: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransposeReport {
    pub cache_rows: usize,
    pub passes: usize,
    pub rows_written: usize,
    pub row_reads: u64,
}

/// Output rows that fit in `budget` bytes: clamp(budget / (M * 4), 1, N).
pub fn cache_rows_for_budget(budget: u64, input_rows: usize, input_columns: usize) -> usize {
    let row_bytes = (input_rows as u64).saturating_mul(4).max(1);
    let fit = usize::try_from(budget / row_bytes).unwrap_or(usize::MAX);
    fit.clamp(1, input_columns.max(1))
}

/// Writes the transpose of `input` to `output`, reading every input row
/// once per chunk of `K` output rows.
pub fn transpose(
    input: &CiftiMatrix,
    output: &mut CiftiMatrix,
    options: TransposeOptions,
) -> Result<TransposeReport, Error> {
    enter("transpose", Phase::Validating);
    let xml = input.cifti_xml()?.transposed();
    let rows = input.rows();
    let columns = input.columns();
    let cache_rows = match options.memory_limit_bytes {
        Some(budget) => cache_rows_for_budget(budget, rows, columns),
        None => columns,
    };

    enter("transpose", Phase::Processing);
    prepare_output(output, xml)?;
    let reads_before = input.row_reads();
    let mut buf = vec![0f32; columns];
    let mut cache = vec![0f32; cache_rows * rows];
    let mut passes = 0;
    let mut start = 0;
    while start < columns {
        let chunk = cache_rows.min(columns - start);
        for row in 0..rows {
            input.get_row(&mut buf, row)?;
            for (offset, value) in buf[start..start + chunk].iter().enumerate() {
                cache[offset * rows + row] = *value;
            }
        }
        for offset in 0..chunk {
            output.set_row(&cache[offset * rows..(offset + 1) * rows], start + offset)?;
        }
        passes += 1;
        tracing::debug!(pass = passes, first = start, count = chunk, "flushed transpose chunk");
        start += chunk;
    }

    enter("transpose", Phase::Finalizing);
    Ok(TransposeReport {
        cache_rows,
        passes,
        rows_written: columns,
        row_reads: input.row_reads() - reads_before,
    })
}
