// Dense brain-model map: ordered surface vertices and voxels per structure.
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::error::{Error, ErrorKind};
use crate::mapping::structure::Structure;
use crate::mapping::volume::{Ijk, VolumeSpace};

/// Largest `SurfaceNumberOfVertices` accepted; per-vertex lookups are sized from it.
pub const MAX_SURFACE_VERTICES: i64 = 1 << 24;

pub(crate) fn check_vertex_count(structure: Structure, number_of_vertices: i64) -> Result<(), Error> {
    if number_of_vertices < 1 {
        return Err(Error::new(ErrorKind::Format).with_message(format!(
            "surface {structure} must have a positive vertex count"
        )));
    }
    if number_of_vertices > MAX_SURFACE_VERTICES {
        return Err(Error::new(ErrorKind::Format).with_message(format!(
            "surface {structure} claims {number_of_vertices} vertices, more than {MAX_SURFACE_VERTICES}"
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Surface {
        number_of_vertices: i64,
        vertices: Vec<i64>,
    },
    Voxels {
        voxels: Vec<Ijk>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrainModel {
    structure: Structure,
    offset: usize,
    kind: ModelKind,
}

impl BrainModel {
    pub fn structure(&self) -> Structure {
        self.structure
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn count(&self) -> usize {
        match &self.kind {
            ModelKind::Surface { vertices, .. } => vertices.len(),
            ModelKind::Voxels { voxels } => voxels.len(),
        }
    }

    pub fn kind(&self) -> &ModelKind {
        &self.kind
    }

    pub fn is_surface(&self) -> bool {
        matches!(self.kind, ModelKind::Surface { .. })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SurfaceMapEntry {
    pub index: usize,
    pub vertex: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VolumeMapEntry {
    pub index: usize,
    pub ijk: Ijk,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexInfo {
    Vertex { structure: Structure, vertex: i64 },
    Voxel { structure: Structure, ijk: Ijk },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BrainModelsMap {
    volume_space: Option<VolumeSpace>,
    models: Vec<BrainModel>,
    length: usize,
    vertex_lookup: BTreeMap<Structure, Vec<Option<usize>>>,
    voxel_lookup: HashMap<Ijk, usize>,
}

impl BrainModelsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn models(&self) -> &[BrainModel] {
        &self.models
    }

    pub fn volume_space(&self) -> Option<&VolumeSpace> {
        self.volume_space.as_ref()
    }

    pub fn set_volume_space(&mut self, space: VolumeSpace) -> Result<(), Error> {
        if let Some(ijk) = self.voxel_lookup.keys().find(|ijk| !space.contains(ijk)) {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "existing voxel {ijk:?} falls outside the new volume space"
            )));
        }
        self.volume_space = Some(space);
        Ok(())
    }

    pub fn has_volume_data(&self) -> bool {
        !self.voxel_lookup.is_empty()
    }

    pub fn has_surface_data(&self) -> bool {
        !self.vertex_lookup.is_empty()
    }

    /// Adds a surface model; `vertices` of `None` covers every vertex in order.
    pub fn add_surface_model(
        &mut self,
        structure: Structure,
        number_of_vertices: i64,
        vertices: Option<&[i64]>,
    ) -> Result<(), Error> {
        if self.vertex_lookup.contains_key(&structure) {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("surface structure {structure} cannot be repeated")));
        }
        check_vertex_count(structure, number_of_vertices)?;
        let vertices = match vertices {
            Some(list) => list.to_vec(),
            None => (0..number_of_vertices).collect(),
        };
        if vertices.is_empty() {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("surface model {structure} has no vertices")));
        }

        let mut lookup = vec![None; number_of_vertices as usize];
        for (pos, vertex) in vertices.iter().enumerate() {
            if *vertex < 0 || *vertex >= number_of_vertices {
                return Err(Error::new(ErrorKind::Format).with_message(format!(
                    "vertex {vertex} is out of range for {structure} ({number_of_vertices} vertices)"
                )));
            }
            let slot = &mut lookup[*vertex as usize];
            if slot.is_some() {
                return Err(Error::new(ErrorKind::Format)
                    .with_message(format!("vertex {vertex} of {structure} is used twice")));
            }
            *slot = Some(self.length + pos);
        }

        self.vertex_lookup.insert(structure, lookup);
        self.push_model(
            structure,
            ModelKind::Surface {
                number_of_vertices,
                vertices,
            },
        );
        Ok(())
    }

    pub fn add_volume_model(&mut self, structure: Structure, voxels: &[Ijk]) -> Result<(), Error> {
        let Some(space) = &self.volume_space else {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "volume model {structure} requires a volume space"
            )));
        };
        let repeated = self
            .models
            .iter()
            .any(|model| !model.is_surface() && model.structure == structure);
        if repeated {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("volume structure {structure} cannot be repeated")));
        }
        if voxels.is_empty() {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("volume model {structure} has no voxels")));
        }

        let mut added = HashSet::with_capacity(voxels.len());
        for ijk in voxels {
            if !space.contains(ijk) {
                return Err(Error::new(ErrorKind::Format).with_message(format!(
                    "voxel {ijk:?} of {structure} is outside the volume dimensions"
                )));
            }
            if self.voxel_lookup.contains_key(ijk) || !added.insert(*ijk) {
                return Err(Error::new(ErrorKind::Format)
                    .with_message(format!("voxel {ijk:?} is used twice")));
            }
        }
        for (pos, ijk) in voxels.iter().enumerate() {
            self.voxel_lookup.insert(*ijk, self.length + pos);
        }
        self.push_model(
            structure,
            ModelKind::Voxels {
                voxels: voxels.to_vec(),
            },
        );
        Ok(())
    }

    fn push_model(&mut self, structure: Structure, kind: ModelKind) {
        let model = BrainModel {
            structure,
            offset: self.length,
            kind,
        };
        self.length += model.count();
        self.models.push(model);
    }

    pub fn surface_structures(&self) -> Vec<Structure> {
        self.models
            .iter()
            .filter(|model| model.is_surface())
            .map(|model| model.structure)
            .collect()
    }

    pub fn volume_structures(&self) -> Vec<Structure> {
        self.models
            .iter()
            .filter(|model| !model.is_surface())
            .map(|model| model.structure)
            .collect()
    }

    pub fn surface_number_of_vertices(&self, structure: Structure) -> Option<i64> {
        self.vertex_lookup
            .get(&structure)
            .map(|lookup| lookup.len() as i64)
    }

    /// Matrix indices of a surface structure in model order, or `None` if absent.
    pub fn surface_map(&self, structure: Structure) -> Option<Vec<SurfaceMapEntry>> {
        let model = self
            .models
            .iter()
            .find(|model| model.is_surface() && model.structure == structure)?;
        let ModelKind::Surface { vertices, .. } = &model.kind else {
            return None;
        };
        Some(
            vertices
                .iter()
                .enumerate()
                .map(|(pos, vertex)| SurfaceMapEntry {
                    index: model.offset + pos,
                    vertex: *vertex,
                })
                .collect(),
        )
    }

    /// Every voxel entry across all volume models, in matrix order.
    pub fn volume_map(&self) -> Vec<VolumeMapEntry> {
        let mut out = Vec::new();
        for model in &self.models {
            if let ModelKind::Voxels { voxels } = &model.kind {
                out.extend(voxels.iter().enumerate().map(|(pos, ijk)| VolumeMapEntry {
                    index: model.offset + pos,
                    ijk: *ijk,
                }));
            }
        }
        out
    }

    pub fn index_for_vertex(&self, structure: Structure, vertex: i64) -> Option<usize> {
        let lookup = self.vertex_lookup.get(&structure)?;
        if vertex < 0 {
            return None;
        }
        lookup.get(vertex as usize).copied().flatten()
    }

    pub fn index_for_voxel(&self, ijk: &Ijk) -> Option<usize> {
        self.voxel_lookup.get(ijk).copied()
    }

    pub fn info_for_index(&self, index: usize) -> Option<IndexInfo> {
        let pos = self
            .models
            .partition_point(|model| model.offset + model.count() <= index);
        let model = self.models.get(pos)?;
        let local = index.checked_sub(model.offset)?;
        match &model.kind {
            ModelKind::Surface { vertices, .. } => vertices.get(local).map(|vertex| IndexInfo::Vertex {
                structure: model.structure,
                vertex: *vertex,
            }),
            ModelKind::Voxels { voxels } => voxels.get(local).map(|ijk| IndexInfo::Voxel {
                structure: model.structure,
                ijk: *ijk,
            }),
        }
    }

    /// Returns why two dense maps address different brainordinates, if they do.
    pub fn explain_mismatch(&self, other: &BrainModelsMap) -> Option<String> {
        match (&self.volume_space, &other.volume_space) {
            (Some(left), Some(right)) => {
                if (self.has_volume_data() || other.has_volume_data()) && !left.matches(right) {
                    return Some("mappings have a different volume space".to_string());
                }
            }
            (None, None) => {}
            _ => {
                if self.has_volume_data() || other.has_volume_data() {
                    return Some("one of the mappings has no volume data".to_string());
                }
            }
        }
        if self.models != other.models {
            return Some("mappings include different brainordinates".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{BrainModelsMap, IndexInfo, SurfaceMapEntry};
    use crate::core::error::ErrorKind;
    use crate::mapping::structure::Structure;
    use crate::mapping::volume::VolumeSpace;

    fn sample() -> BrainModelsMap {
        let mut map = BrainModelsMap::new();
        map.add_surface_model(Structure::CortexLeft, 5, Some(&[0, 2, 4]))
            .expect("left");
        map.set_volume_space(VolumeSpace::with_dims([3, 3, 3]).expect("space"))
            .expect("space");
        map.add_volume_model(Structure::ThalamusLeft, &[[0, 0, 0], [1, 2, 0]])
            .expect("thalamus");
        map
    }

    #[test]
    fn indices_are_assigned_in_model_order() {
        let map = sample();
        assert_eq!(map.len(), 5);
        assert_eq!(map.index_for_vertex(Structure::CortexLeft, 2), Some(1));
        assert_eq!(map.index_for_vertex(Structure::CortexLeft, 1), None);
        assert_eq!(map.index_for_voxel(&[1, 2, 0]), Some(4));
        assert_eq!(
            map.info_for_index(3),
            Some(IndexInfo::Voxel {
                structure: Structure::ThalamusLeft,
                ijk: [0, 0, 0]
            })
        );
        assert_eq!(map.info_for_index(5), None);
    }

    #[test]
    fn surface_map_lists_present_vertices() {
        let map = sample();
        let entries = map.surface_map(Structure::CortexLeft).expect("left");
        assert_eq!(
            entries,
            vec![
                SurfaceMapEntry { index: 0, vertex: 0 },
                SurfaceMapEntry { index: 1, vertex: 2 },
                SurfaceMapEntry { index: 2, vertex: 4 },
            ]
        );
        assert!(map.surface_map(Structure::CortexRight).is_none());
        assert_eq!(map.volume_map().len(), 2);
        assert_eq!(map.volume_map()[1].index, 4);
    }

    #[test]
    fn invalid_models_are_rejected() {
        let mut map = sample();
        let err = map
            .add_surface_model(Structure::CortexLeft, 5, None)
            .expect_err("repeat");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = map
            .add_surface_model(Structure::CortexRight, 3, Some(&[0, 3]))
            .expect_err("range");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = map
            .add_surface_model(Structure::CortexRight, 3, Some(&[1, 1]))
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = map
            .add_volume_model(Structure::PutamenLeft, &[[0, 0, 0]])
            .expect_err("reused voxel");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = map
            .add_volume_model(Structure::PutamenLeft, &[[3, 0, 0]])
            .expect_err("outside");
        assert_eq!(err.kind(), ErrorKind::Format);

        let mut bare = BrainModelsMap::new();
        let err = bare
            .add_volume_model(Structure::PutamenLeft, &[[0, 0, 0]])
            .expect_err("no space");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn mismatch_explanations() {
        let map = sample();
        assert_eq!(map.explain_mismatch(&sample()), None);

        let mut surface_only = BrainModelsMap::new();
        surface_only
            .add_surface_model(Structure::CortexLeft, 5, Some(&[0, 2, 4]))
            .expect("left");
        assert_eq!(
            map.explain_mismatch(&surface_only).as_deref(),
            Some("one of the mappings has no volume data")
        );

        let mut other_space = BrainModelsMap::new();
        other_space
            .add_surface_model(Structure::CortexLeft, 5, Some(&[0, 2, 4]))
            .expect("left");
        other_space
            .set_volume_space(VolumeSpace::with_dims([4, 3, 3]).expect("space"))
            .expect("space");
        other_space
            .add_volume_model(Structure::ThalamusLeft, &[[0, 0, 0], [1, 2, 0]])
            .expect("thalamus");
        assert_eq!(
            map.explain_mismatch(&other_space).as_deref(),
            Some("mappings have a different volume space")
        );

        let mut fewer = BrainModelsMap::new();
        fewer
            .add_surface_model(Structure::CortexLeft, 5, Some(&[0, 2]))
            .expect("left");
        fewer
            .set_volume_space(VolumeSpace::with_dims([3, 3, 3]).expect("space"))
            .expect("space");
        fewer
            .add_volume_model(Structure::ThalamusLeft, &[[0, 0, 0], [1, 2, 0]])
            .expect("thalamus");
        assert_eq!(
            map.explain_mismatch(&fewer).as_deref(),
            Some("mappings include different brainordinates")
        );
    }
}
