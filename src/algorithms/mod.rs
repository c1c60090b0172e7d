//! Purpose: Bounded-memory streaming operations over CIFTI matrix handles.
//! Exports: `average`, `pairwise_correlation`, `average_dense_roi`, `transpose`,
//!          `remap_label_keys`, their option/report types, and `Phase`.
//! Role: Consumes read handles and one write handle row by row.
//! Invariants: Validation finishes before the output handle is touched.
//! Invariants: Scratch buffers are allocated once per call and reused across rows.
//! Invariants: Output rows are written only after the output mapping model is fixed.
use crate::core::error::{Error, ErrorKind};
use crate::core::matrix::CiftiMatrix;
use crate::mapping::CiftiXml;

pub mod average;
pub mod correlation;
pub mod label_remap;
pub mod roi_average;
pub mod transpose;

pub use average::{AverageReport, average};
pub use correlation::{CorrelationOptions, CorrelationReport, fisher_z, pairwise_correlation};
pub use label_remap::{LabelRemapReport, MapSelection, remap_label_keys};
pub use roi_average::{RoiAverageReport, RoiSet, SurfaceRoi, VolumeRoi, average_dense_roi};
pub use transpose::{TransposeOptions, TransposeReport, cache_rows_for_budget, transpose};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Validating,
    Processing,
    Finalizing,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Validating => "validating",
            Phase::Processing => "processing",
            Phase::Finalizing => "finalizing",
        }
    }
}

pub(crate) fn enter(operation: &'static str, phase: Phase) {
    tracing::debug!(operation, phase = phase.name(), "entering phase");
}

/// Fixes the mapping model of `output`, which must be a writer.
pub(crate) fn prepare_output(output: &mut CiftiMatrix, xml: CiftiXml) -> Result<(), Error> {
    if !output.is_writable() {
        return Err(Error::new(ErrorKind::FileAccess)
            .with_message("output handle is read-only")
            .with_path(output.path()));
    }
    output.set_cifti_xml(xml)
}

pub(crate) fn require_inputs<'a>(inputs: &'a [&'a CiftiMatrix]) -> Result<&'a CiftiMatrix, Error> {
    inputs.first().copied().ok_or_else(|| {
        Error::new(ErrorKind::DuplicateOrMissingInput).with_message("at least one input is required")
    })
}

/// Attaches the path of `matrix` to errors from its mapping checks.
pub(crate) fn in_file(matrix: &CiftiMatrix) -> impl FnOnce(Error) -> Error + '_ {
    move |err| err.or_path(matrix.path())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use crate::core::matrix::{CacheMode, CiftiMatrix, CreateOptions};
    use crate::mapping::{BrainModelsMap, CiftiXml, IndexMap, SeriesMap, SeriesUnit, Structure};

    pub fn dense_series(vertices: i64, points: usize) -> CiftiXml {
        let mut models = BrainModelsMap::new();
        models
            .add_surface_model(Structure::CortexLeft, vertices, None)
            .expect("surface");
        CiftiXml::new(
            IndexMap::BrainModels(models),
            IndexMap::Series(SeriesMap::new(points, 0.0, 1.0, SeriesUnit::Second)),
        )
        .expect("xml")
    }

    pub fn write(path: &Path, xml: CiftiXml, rows: &[Vec<f32>]) -> CiftiMatrix {
        let mut matrix = CiftiMatrix::create_with_xml(path, xml, CreateOptions::new(CacheMode::InMemory))
            .expect("create");
        for (idx, row) in rows.iter().enumerate() {
            matrix.set_row(row, idx).expect("set row");
        }
        matrix.finish().expect("finish");
        CiftiMatrix::open(path, CacheMode::OnDisk).expect("open")
    }

    pub fn read_all(matrix: &CiftiMatrix) -> Vec<Vec<f32>> {
        let mut buf = vec![0f32; matrix.columns()];
        (0..matrix.rows())
            .map(|row| {
                matrix.get_row(&mut buf, row).expect("row");
                buf.clone()
            })
            .collect()
    }

    pub fn writer(path: &Path) -> CiftiMatrix {
        CiftiMatrix::create(path, CreateOptions::new(CacheMode::OnDisk)).expect("writer")
    }

    pub fn reopen(output: CiftiMatrix) -> CiftiMatrix {
        let path = output.path().to_path_buf();
        output.finish().expect("finish");
        CiftiMatrix::open(path, CacheMode::InMemory).expect("reopen")
    }
}
