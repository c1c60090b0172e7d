//! Purpose: Typed CIFTI-2 mapping model describing what each matrix row and column means.
//! Exports: `CiftiXml`, `Axis`, `IndexMap`, `MappingKind`, and the per-kind map types.
//! Role: Validated metadata shared by `core::matrix` and the streaming algorithms.
//! Invariants: Labels appear on at most one axis; neither axis is empty.
//! Invariants: `Axis::Rows` is the "along column" map (XML dimension 1) and sets the row count.
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::nifti::Intent;

pub mod brain_models;
pub mod labels;
pub mod named;
pub mod parcels;
pub mod structure;
pub mod volume;
pub mod xml;

pub use brain_models::{
    BrainModel, BrainModelsMap, IndexInfo, MAX_SURFACE_VERTICES, ModelKind, SurfaceMapEntry,
    VolumeMapEntry,
};
pub use labels::{KeyRemap, Label, LabelTable, LabelsMap, NamedLabelMap, RemapOutcome};
pub use named::{NamedMap, ScalarsMap, SeriesMap, SeriesUnit};
pub use parcels::{Parcel, ParcelsMap};
pub use structure::Structure;
pub use volume::{Ijk, VolumeSpace};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Axis 0: one entry per matrix row.
    Rows,
    /// Axis 1: one entry per matrix column.
    Columns,
}

impl Axis {
    pub fn other(self) -> Self {
        match self {
            Axis::Rows => Axis::Columns,
            Axis::Columns => Axis::Rows,
        }
    }

    /// CIFTI-2 `AppliesToMatrixDimension` value for this axis.
    pub fn xml_dimension(self) -> usize {
        match self {
            Axis::Rows => 1,
            Axis::Columns => 0,
        }
    }

    pub fn from_xml_dimension(dimension: usize) -> Option<Self> {
        match dimension {
            0 => Some(Axis::Columns),
            1 => Some(Axis::Rows),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::Rows => "rows",
            Axis::Columns => "columns",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MappingKind {
    BrainModels,
    Parcels,
    Labels,
    Scalars,
    Series,
}

impl MappingKind {
    pub fn cifti_name(self) -> &'static str {
        match self {
            MappingKind::BrainModels => "CIFTI_INDEX_TYPE_BRAIN_MODELS",
            MappingKind::Parcels => "CIFTI_INDEX_TYPE_PARCELS",
            MappingKind::Labels => "CIFTI_INDEX_TYPE_LABELS",
            MappingKind::Scalars => "CIFTI_INDEX_TYPE_SCALARS",
            MappingKind::Series => "CIFTI_INDEX_TYPE_SERIES",
        }
    }

    pub fn from_cifti_name(name: &str) -> Option<Self> {
        match name.trim() {
            "CIFTI_INDEX_TYPE_BRAIN_MODELS" => Some(MappingKind::BrainModels),
            "CIFTI_INDEX_TYPE_PARCELS" => Some(MappingKind::Parcels),
            "CIFTI_INDEX_TYPE_LABELS" => Some(MappingKind::Labels),
            "CIFTI_INDEX_TYPE_SCALARS" => Some(MappingKind::Scalars),
            "CIFTI_INDEX_TYPE_SERIES" => Some(MappingKind::Series),
            _ => None,
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MappingKind::BrainModels => "brain models",
            MappingKind::Parcels => "parcels",
            MappingKind::Labels => "labels",
            MappingKind::Scalars => "scalars",
            MappingKind::Series => "series",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IndexMap {
    BrainModels(BrainModelsMap),
    Parcels(ParcelsMap),
    Labels(LabelsMap),
    Scalars(ScalarsMap),
    Series(SeriesMap),
}

impl IndexMap {
    pub fn kind(&self) -> MappingKind {
        match self {
            IndexMap::BrainModels(_) => MappingKind::BrainModels,
            IndexMap::Parcels(_) => MappingKind::Parcels,
            IndexMap::Labels(_) => MappingKind::Labels,
            IndexMap::Scalars(_) => MappingKind::Scalars,
            IndexMap::Series(_) => MappingKind::Series,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexMap::BrainModels(map) => map.len(),
            IndexMap::Parcels(map) => map.len(),
            IndexMap::Labels(map) => map.len(),
            IndexMap::Scalars(map) => map.len(),
            IndexMap::Series(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns why `other` addresses different entries, or `None` when the
    /// two maps are structurally equal. Map names never participate.
    pub fn explain_mismatch(&self, other: &IndexMap) -> Option<String> {
        match (self, other) {
            (IndexMap::BrainModels(left), IndexMap::BrainModels(right)) => left.explain_mismatch(right),
            (IndexMap::Parcels(left), IndexMap::Parcels(right)) => left.explain_mismatch(right),
            (IndexMap::Series(left), IndexMap::Series(right)) => left.explain_mismatch(right),
            (IndexMap::Labels(_), IndexMap::Labels(_)) | (IndexMap::Scalars(_), IndexMap::Scalars(_)) => {
                (self.len() != other.len())
                    .then(|| format!("mappings have {} and {} maps", self.len(), other.len()))
            }
            _ => Some(format!(
                "{} mapping never matches {}",
                self.kind(),
                other.kind()
            )),
        }
    }

    pub fn check_matches(&self, other: &IndexMap, axis: Axis) -> Result<(), Error> {
        let Some(reason) = self.explain_mismatch(other) else {
            return Ok(());
        };
        let kind = if self.kind() == other.kind() {
            ErrorKind::StructureMismatch
        } else {
            ErrorKind::MappingTypeMismatch
        };
        Err(Error::new(kind).with_message(format!("{} do not match: {reason}", axis.name())))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CiftiXml {
    rows: IndexMap,
    columns: IndexMap,
    metadata: BTreeMap<String, String>,
}

impl CiftiXml {
    pub fn new(rows: IndexMap, columns: IndexMap) -> Result<Self, Error> {
        validate_pair(&rows, &columns)?;
        Ok(Self {
            rows,
            columns,
            metadata: BTreeMap::new(),
        })
    }

    pub fn from_xml_str(text: &str) -> Result<Self, Error> {
        xml::parse(text)
    }

    pub fn to_xml_string(&self) -> Result<String, Error> {
        xml::write(self)
    }

    pub fn map(&self, axis: Axis) -> &IndexMap {
        match axis {
            Axis::Rows => &self.rows,
            Axis::Columns => &self.columns,
        }
    }

    pub fn mapping_kind(&self, axis: Axis) -> MappingKind {
        self.map(axis).kind()
    }

    pub fn set_map(&mut self, axis: Axis, map: IndexMap) -> Result<(), Error> {
        match axis {
            Axis::Rows => validate_pair(&map, &self.columns)?,
            Axis::Columns => validate_pair(&self.rows, &map)?,
        }
        match axis {
            Axis::Rows => self.rows = map,
            Axis::Columns => self.columns = map,
        }
        Ok(())
    }

    pub fn number_of_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn number_of_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.metadata
    }

    pub fn matches_for_rows(&self, other: &CiftiXml) -> bool {
        self.rows.explain_mismatch(&other.rows).is_none()
    }

    pub fn matches_for_columns(&self, other: &CiftiXml) -> bool {
        self.columns.explain_mismatch(&other.columns).is_none()
    }

    pub fn check_rows_match(&self, other: &CiftiXml) -> Result<(), Error> {
        self.rows.check_matches(&other.rows, Axis::Rows)
    }

    pub fn check_columns_match(&self, other: &CiftiXml) -> Result<(), Error> {
        self.columns.check_matches(&other.columns, Axis::Columns)
    }

    pub fn brain_models(&self, axis: Axis) -> Result<&BrainModelsMap, Error> {
        match self.map(axis) {
            IndexMap::BrainModels(map) => Ok(map),
            other => Err(kind_error(axis, MappingKind::BrainModels, other.kind())),
        }
    }

    pub fn parcels(&self, axis: Axis) -> Result<&ParcelsMap, Error> {
        match self.map(axis) {
            IndexMap::Parcels(map) => Ok(map),
            other => Err(kind_error(axis, MappingKind::Parcels, other.kind())),
        }
    }

    pub fn labels(&self, axis: Axis) -> Result<&LabelsMap, Error> {
        match self.map(axis) {
            IndexMap::Labels(map) => Ok(map),
            other => Err(kind_error(axis, MappingKind::Labels, other.kind())),
        }
    }

    pub fn labels_mut(&mut self, axis: Axis) -> Result<&mut LabelsMap, Error> {
        let map = match axis {
            Axis::Rows => &mut self.rows,
            Axis::Columns => &mut self.columns,
        };
        match map {
            IndexMap::Labels(labels) => Ok(labels),
            other => Err(kind_error(axis, MappingKind::Labels, other.kind())),
        }
    }

    pub fn scalars(&self, axis: Axis) -> Result<&ScalarsMap, Error> {
        match self.map(axis) {
            IndexMap::Scalars(map) => Ok(map),
            other => Err(kind_error(axis, MappingKind::Scalars, other.kind())),
        }
    }

    pub fn series(&self, axis: Axis) -> Result<&SeriesMap, Error> {
        match self.map(axis) {
            IndexMap::Series(map) => Ok(map),
            other => Err(kind_error(axis, MappingKind::Series, other.kind())),
        }
    }

    /// The axis carrying label tables, if any.
    pub fn labels_axis(&self) -> Option<Axis> {
        [Axis::Columns, Axis::Rows]
            .into_iter()
            .find(|axis| self.mapping_kind(*axis) == MappingKind::Labels)
    }

    /// Copy with `axis` replaced by a single scalar map called `name`.
    pub fn collapse_axis_to_single_scalar(&self, axis: Axis, name: &str) -> Self {
        self.with_replaced(axis, IndexMap::Scalars(ScalarsMap::single(name)))
    }

    /// Copy with `axis` replaced by a one-point series starting at zero.
    pub fn collapse_axis_to_series(&self, axis: Axis, step: f64, unit: SeriesUnit) -> Self {
        self.with_replaced(axis, IndexMap::Series(SeriesMap::new(1, 0.0, step, unit)))
    }

    /// Copy with the row and column maps exchanged.
    pub fn transposed(&self) -> Self {
        Self {
            rows: self.columns.clone(),
            columns: self.rows.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// NIFTI intent selected from the (columns, rows) mapping kinds.
    pub fn intent(&self) -> Intent {
        use MappingKind::*;
        match (self.columns.kind(), self.rows.kind()) {
            (BrainModels, BrainModels) => Intent::ConnDense,
            (Series, BrainModels) => Intent::ConnDenseSeries,
            (Parcels, Parcels) => Intent::ConnParcels,
            (Series, Parcels) => Intent::ConnParcelSeries,
            (Scalars, BrainModels) => Intent::ConnDenseScalar,
            (Labels, BrainModels) => Intent::ConnDenseLabel,
            (Scalars, Parcels) => Intent::ConnParcelScalar,
            (BrainModels, Parcels) => Intent::ConnParcelDense,
            (Parcels, BrainModels) => Intent::ConnDenseParcel,
            _ => Intent::ConnUnknown,
        }
    }

    fn with_replaced(&self, axis: Axis, map: IndexMap) -> Self {
        let mut out = self.clone();
        match axis {
            Axis::Rows => out.rows = map,
            Axis::Columns => out.columns = map,
        }
        out
    }
}

fn validate_pair(rows: &IndexMap, columns: &IndexMap) -> Result<(), Error> {
    if rows.kind() == MappingKind::Labels && columns.kind() == MappingKind::Labels {
        return Err(Error::new(ErrorKind::Format)
            .with_message("label mappings may appear on at most one dimension"));
    }
    for (axis, map) in [(Axis::Rows, rows), (Axis::Columns, columns)] {
        if map.is_empty() {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("{} mapping along {} is empty", map.kind(), axis.name())));
        }
    }
    Ok(())
}

fn kind_error(axis: Axis, expected: MappingKind, found: MappingKind) -> Error {
    Error::new(ErrorKind::MappingTypeMismatch).with_message(format!(
        "expected {expected} mapping along {}, found {found}",
        axis.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::{Axis, CiftiXml, IndexMap, MappingKind, ScalarsMap, SeriesMap, SeriesUnit};
    use crate::core::error::ErrorKind;
    use crate::core::nifti::Intent;
    use crate::mapping::brain_models::BrainModelsMap;
    use crate::mapping::labels::{LabelTable, LabelsMap, NamedLabelMap};
    use crate::mapping::structure::Structure;

    fn dense(vertices: i64) -> IndexMap {
        let mut map = BrainModelsMap::new();
        map.add_surface_model(Structure::CortexLeft, vertices, None)
            .expect("surface");
        IndexMap::BrainModels(map)
    }

    #[test]
    fn dims_and_intent_follow_axes() {
        let series = IndexMap::Series(SeriesMap::new(12, 0.0, 0.72, SeriesUnit::Second));
        let xml = CiftiXml::new(dense(5), series).expect("xml");
        assert_eq!(xml.number_of_rows(), 5);
        assert_eq!(xml.number_of_columns(), 12);
        assert_eq!(xml.intent(), Intent::ConnDenseSeries);
        assert_eq!(xml.transposed().number_of_rows(), 12);
        assert_eq!(xml.transposed().intent(), Intent::ConnUnknown);
    }

    #[test]
    fn labels_on_both_axes_is_rejected() {
        let labels = IndexMap::Labels(LabelsMap::new(vec![NamedLabelMap::new(
            "parc",
            LabelTable::with_unassigned(),
        )]));
        let err = CiftiXml::new(labels.clone(), labels).expect_err("two label axes");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn empty_axis_is_rejected() {
        let err = CiftiXml::new(dense(3), IndexMap::Scalars(ScalarsMap::default()))
            .expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn row_matching_reports_kind_and_structure() {
        let left = CiftiXml::new(dense(5), dense(5)).expect("xml");
        let right = CiftiXml::new(dense(6), dense(5)).expect("xml");
        assert!(!left.matches_for_rows(&right));
        assert!(left.matches_for_columns(&right));
        assert_eq!(
            left.check_rows_match(&right).expect_err("rows").kind(),
            ErrorKind::StructureMismatch
        );

        let scalar = left.collapse_axis_to_single_scalar(Axis::Rows, "mean");
        let err = left.check_rows_match(&scalar).expect_err("kind");
        assert_eq!(err.kind(), ErrorKind::MappingTypeMismatch);
        assert!(err.message().unwrap_or_default().contains("never matches"));
    }

    #[test]
    fn typed_accessors_check_kind() {
        let xml = CiftiXml::new(dense(4), dense(4))
            .expect("xml")
            .collapse_axis_to_series(Axis::Columns, 2.0, SeriesUnit::Hertz);
        assert_eq!(xml.mapping_kind(Axis::Columns), MappingKind::Series);
        assert_eq!(xml.series(Axis::Columns).expect("series").step, 2.0);
        assert!(xml.brain_models(Axis::Rows).is_ok());
        let err = xml.labels(Axis::Rows).expect_err("labels");
        assert_eq!(err.kind(), ErrorKind::MappingTypeMismatch);
        assert_eq!(xml.labels_axis(), None);
    }
}
