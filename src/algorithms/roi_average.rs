// Average of the rows selected by surface/volume region masks across dense inputs.
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::algorithms::{Phase, enter, in_file, prepare_output, require_inputs};
use crate::core::error::{Error, ErrorKind};
use crate::core::matrix::CiftiMatrix;
use crate::mapping::{
    Axis, BrainModelsMap, IndexMap, NamedMap, ScalarsMap, Structure, VolumeSpace,
};
use serde::Serialize;

/// Per-vertex mask values for one surface; vertices with a value > 0 are selected.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceRoi {
    pub structure: Structure,
    pub values: Vec<f32>,
}

/// Per-voxel mask values in NIFTI order (i fastest); voxels with a value > 0 are selected.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeRoi {
    pub space: VolumeSpace,
    pub values: Vec<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoiSet {
    name: String,
    surfaces: Vec<SurfaceRoi>,
    volume: Option<VolumeRoi>,
}

impl RoiSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            surfaces: Vec::new(),
            volume: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surfaces(&self) -> &[SurfaceRoi] {
        &self.surfaces
    }

    pub fn volume(&self) -> Option<&VolumeRoi> {
        self.volume.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty() && self.volume.is_none()
    }

    pub fn add_surface(&mut self, roi: SurfaceRoi) -> Result<(), Error> {
        if self.surfaces.iter().any(|existing| existing.structure == roi.structure) {
            return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
                .with_message(format!("more than one mask for {}", roi.structure)));
        }
        self.surfaces.push(roi);
        Ok(())
    }

    pub fn set_volume(&mut self, roi: VolumeRoi) -> Result<(), Error> {
        if self.volume.is_some() {
            return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
                .with_message("more than one volume mask"));
        }
        if roi.values.len() != roi.space.voxel_count() {
            return Err(Error::new(ErrorKind::DimensionMismatch).with_message(format!(
                "volume mask has {} values for {} voxels",
                roi.values.len(),
                roi.space.voxel_count()
            )));
        }
        self.volume = Some(roi);
        Ok(())
    }

    /// Builds masks from `column` of a file whose rows are dense brain models.
    /// Vertices and voxels the file does not cover are unselected.
    pub fn from_cifti(matrix: &CiftiMatrix, column: usize) -> Result<Self, Error> {
        let xml = matrix.cifti_xml()?;
        let models = xml.brain_models(Axis::Rows).map_err(in_file(matrix))?;
        let mut values = vec![0f32; matrix.rows()];
        matrix.get_column(&mut values, column)?;

        let name = match xml.map(Axis::Columns) {
            IndexMap::Scalars(scalars) => scalars.maps().get(column).map(|map| map.name.clone()),
            IndexMap::Labels(labels) => labels.map(column).map(|map| map.name.clone()),
            _ => None,
        }
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("roi column {column}"));

        let mut set = RoiSet::new(name);
        for structure in models.surface_structures() {
            let count = models.surface_number_of_vertices(structure).unwrap_or(0);
            let mut mask = vec![0f32; count.max(0) as usize];
            for entry in models.surface_map(structure).unwrap_or_default() {
                mask[entry.vertex as usize] = values[entry.index];
            }
            set.add_surface(SurfaceRoi {
                structure,
                values: mask,
            })?;
        }
        if let Some(space) = models.volume_space().filter(|_| models.has_volume_data()) {
            let mut mask = vec![0f32; space.voxel_count()];
            for entry in models.volume_map() {
                if let Some(linear) = space.linear_index(&entry.ijk) {
                    mask[linear] = values[entry.index];
                }
            }
            set.set_volume(VolumeRoi {
                space: space.clone(),
                values: mask,
            })?;
        }
        Ok(set)
    }

    /// One ROI per column of a dense file, in column order.
    pub fn all_from_cifti(matrix: &CiftiMatrix) -> Result<Vec<Self>, Error> {
        (0..matrix.columns())
            .map(|column| Self::from_cifti(matrix, column))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedMask {
    pub path: PathBuf,
    /// `None` for the volume mask.
    pub structure: Option<Structure>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoiAverageReport {
    /// Selected rows summed over all inputs, one entry per ROI.
    pub selected_elements: Vec<usize>,
    pub rows_written: usize,
    pub row_reads: u64,
    pub skipped: Vec<SkippedMask>,
}

/// Averages the input rows selected by each ROI, one output column per ROI.
///
/// Output rows follow the inputs' column map; the output columns are a
/// scalar map named after the ROIs. Every input row is read at most once.
pub fn average_dense_roi(
    inputs: &[&CiftiMatrix],
    rois: &[RoiSet],
    output: &mut CiftiMatrix,
) -> Result<RoiAverageReport, Error> {
    enter("roi-average", Phase::Validating);
    let first = require_inputs(inputs)?;
    if rois.is_empty() || rois.iter().any(RoiSet::is_empty) {
        return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
            .with_message("no ROI masks were supplied"));
    }
    let reference = first.cifti_xml()?;
    // per input: selected row -> ROIs that select it
    let mut selections: Vec<BTreeMap<usize, Vec<usize>>> = Vec::with_capacity(inputs.len());
    let mut selected_elements = vec![0usize; rois.len()];
    let mut skipped = Vec::new();
    for input in inputs {
        let xml = input.cifti_xml()?;
        reference.check_columns_match(xml).map_err(in_file(input))?;
        let models = xml.brain_models(Axis::Rows).map_err(in_file(input))?;
        let mut hits: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (which, roi) in rois.iter().enumerate() {
            let rows = select_rows(models, roi, &mut skipped, input).map_err(in_file(input))?;
            selected_elements[which] += rows.len();
            for row in rows {
                hits.entry(row).or_default().push(which);
            }
        }
        selections.push(hits);
    }
    if let Some(which) = selected_elements.iter().position(|count| *count == 0) {
        return Err(Error::new(ErrorKind::EmptyResult).with_message(format!(
            "ROI '{}' selects no rows in any input",
            rois[which].name()
        )));
    }

    enter("roi-average", Phase::Processing);
    let reads_before: u64 = inputs.iter().map(|input| input.row_reads()).sum();
    let columns = first.columns();
    let mut buf = vec![0f32; columns];
    let mut acc = vec![vec![0f64; columns]; rois.len()];
    for (input, hits) in inputs.iter().zip(&selections) {
        for (row, which) in hits {
            input.get_row(&mut buf, *row)?;
            for roi in which {
                for (sum, value) in acc[*roi].iter_mut().zip(&buf) {
                    *sum += *value as f64;
                }
            }
        }
        tracing::debug!(path = %input.path().display(), rows = hits.len(), "accumulated ROI rows");
    }

    enter("roi-average", Phase::Finalizing);
    let names = rois.iter().map(|roi| NamedMap::new(roi.name())).collect();
    let mut out_xml = reference.transposed();
    out_xml.set_map(Axis::Columns, IndexMap::Scalars(ScalarsMap::new(names)))?;
    prepare_output(output, out_xml)?;
    let mut out_row = vec![0f32; rois.len()];
    for row in 0..columns {
        for ((value, sums), count) in out_row.iter_mut().zip(&acc).zip(&selected_elements) {
            *value = (sums[row] / *count as f64) as f32;
        }
        output.set_row(&out_row, row)?;
    }
    let reads_after: u64 = inputs.iter().map(|input| input.row_reads()).sum();
    Ok(RoiAverageReport {
        selected_elements,
        rows_written: columns,
        row_reads: reads_after - reads_before,
        skipped,
    })
}

fn select_rows(
    models: &BrainModelsMap,
    roi: &RoiSet,
    skipped: &mut Vec<SkippedMask>,
    input: &CiftiMatrix,
) -> Result<Vec<usize>, Error> {
    let mut rows = Vec::new();
    for mask in roi.surfaces() {
        let Some(count) = models.surface_number_of_vertices(mask.structure) else {
            record_skip(skipped, input, Some(mask.structure));
            continue;
        };
        if count as usize != mask.values.len() {
            return Err(Error::new(ErrorKind::StructureMismatch).with_message(format!(
                "{} has {count} vertices, ROI mask has {}",
                mask.structure,
                mask.values.len()
            )));
        }
        for entry in models.surface_map(mask.structure).unwrap_or_default() {
            if mask.values[entry.vertex as usize] > 0.0 {
                rows.push(entry.index);
            }
        }
    }
    if let Some(mask) = roi.volume() {
        match models.volume_space().filter(|_| models.has_volume_data()) {
            None => {
                record_skip(skipped, input, None);
            }
            Some(space) if !space.matches(&mask.space) => {
                return Err(Error::new(ErrorKind::StructureMismatch)
                    .with_message("volume ROI is in a different volume space"));
            }
            Some(space) => {
                for entry in models.volume_map() {
                    let selected = space
                        .linear_index(&entry.ijk)
                        .is_some_and(|linear| mask.values[linear] > 0.0);
                    if selected {
                        rows.push(entry.index);
                    }
                }
            }
        }
    }
    Ok(rows)
}

fn record_skip(skipped: &mut Vec<SkippedMask>, input: &CiftiMatrix, structure: Option<Structure>) {
    let record = SkippedMask {
        path: input.path().to_path_buf(),
        structure,
    };
    if skipped.contains(&record) {
        return;
    }
    match structure {
        Some(structure) => tracing::warn!(
            path = %input.path().display(),
            structure = %structure,
            "input has no data for ROI structure; skipping"
        ),
        None => tracing::warn!(
            path = %input.path().display(),
            "input has no volume data; skipping volume ROI"
        ),
    }
    skipped.push(record);
}
