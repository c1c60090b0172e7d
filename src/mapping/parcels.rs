// Parcel map: named regions made of surface vertices and voxels.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::error::{Error, ErrorKind};
use crate::mapping::brain_models::check_vertex_count;
use crate::mapping::structure::Structure;
use crate::mapping::volume::{Ijk, VolumeSpace};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parcel {
    pub name: String,
    pub vertices: BTreeMap<Structure, BTreeSet<i64>>,
    pub voxels: BTreeSet<Ijk>,
}

impl Parcel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_vertices(mut self, structure: Structure, vertices: impl IntoIterator<Item = i64>) -> Self {
        self.vertices.entry(structure).or_default().extend(vertices);
        self
    }

    pub fn with_voxels(mut self, voxels: impl IntoIterator<Item = Ijk>) -> Self {
        self.voxels.extend(voxels);
        self
    }

    fn same_members(&self, other: &Parcel) -> bool {
        self.voxels == other.voxels && self.vertices == other.vertices
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParcelsMap {
    volume_space: Option<VolumeSpace>,
    surfaces: BTreeMap<Structure, i64>,
    parcels: Vec<Parcel>,
    vertex_lookup: BTreeMap<Structure, Vec<Option<usize>>>,
    voxel_lookup: HashMap<Ijk, usize>,
    names: HashMap<String, usize>,
}

impl ParcelsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    pub fn parcels(&self) -> &[Parcel] {
        &self.parcels
    }

    pub fn surfaces(&self) -> impl Iterator<Item = (Structure, i64)> + '_ {
        self.surfaces.iter().map(|(structure, count)| (*structure, *count))
    }

    pub fn volume_space(&self) -> Option<&VolumeSpace> {
        self.volume_space.as_ref()
    }

    pub fn has_volume_data(&self) -> bool {
        !self.voxel_lookup.is_empty()
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

    pub fn add_surface(&mut self, structure: Structure, number_of_vertices: i64) -> Result<(), Error> {
        check_vertex_count(structure, number_of_vertices)?;
        if self.surfaces.contains_key(&structure) {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("surface {structure} is declared twice")));
        }
        self.surfaces.insert(structure, number_of_vertices);
        self.vertex_lookup
            .insert(structure, vec![None; number_of_vertices as usize]);
        Ok(())
    }

    pub fn add_parcel(&mut self, parcel: Parcel) -> Result<(), Error> {
        let index = self.parcels.len();
        if self.names.contains_key(&parcel.name) {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("parcel name '{}' is used twice", parcel.name)));
        }
        if parcel.voxels.is_empty() && parcel.vertices.values().all(BTreeSet::is_empty) {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("parcel '{}' has no members", parcel.name)));
        }
        for (structure, vertices) in &parcel.vertices {
            let Some(lookup) = self.vertex_lookup.get(structure) else {
                return Err(Error::new(ErrorKind::Format).with_message(format!(
                    "parcel '{}' uses surface {structure} before it is declared",
                    parcel.name
                )));
            };
            if vertices.is_empty() {
                return Err(Error::new(ErrorKind::Format).with_message(format!(
                    "parcel '{}' has an empty vertex list for {structure}",
                    parcel.name
                )));
            }
            for vertex in vertices {
                let slot = usize::try_from(*vertex).ok().and_then(|pos| lookup.get(pos));
                match slot {
                    None => {
                        return Err(Error::new(ErrorKind::Format).with_message(format!(
                            "vertex {vertex} of {structure} is out of range in parcel '{}'",
                            parcel.name
                        )));
                    }
                    Some(Some(_)) => {
                        return Err(Error::new(ErrorKind::Format).with_message(format!(
                            "vertex {vertex} of {structure} belongs to more than one parcel"
                        )));
                    }
                    Some(None) => {}
                }
            }
        }
        if !parcel.voxels.is_empty() {
            let Some(space) = &self.volume_space else {
                return Err(Error::new(ErrorKind::Format).with_message(format!(
                    "parcel '{}' has voxels but the map has no volume space",
                    parcel.name
                )));
            };
            for ijk in &parcel.voxels {
                if !space.contains(ijk) {
                    return Err(Error::new(ErrorKind::Format).with_message(format!(
                        "voxel {ijk:?} of parcel '{}' is outside the volume dimensions",
                        parcel.name
                    )));
                }
                if self.voxel_lookup.contains_key(ijk) {
                    return Err(Error::new(ErrorKind::Format)
                        .with_message(format!("voxel {ijk:?} belongs to more than one parcel")));
                }
            }
        }

        for (structure, vertices) in &parcel.vertices {
            if let Some(lookup) = self.vertex_lookup.get_mut(structure) {
                for vertex in vertices {
                    lookup[*vertex as usize] = Some(index);
                }
            }
        }
        for ijk in &parcel.voxels {
            self.voxel_lookup.insert(*ijk, index);
        }
        self.names.insert(parcel.name.clone(), index);
        self.parcels.push(parcel);
        Ok(())
    }

    pub fn index_for_vertex(&self, structure: Structure, vertex: i64) -> Option<usize> {
        let lookup = self.vertex_lookup.get(&structure)?;
        usize::try_from(vertex)
            .ok()
            .and_then(|pos| lookup.get(pos))
            .copied()
            .flatten()
    }

    pub fn index_for_voxel(&self, ijk: &Ijk) -> Option<usize> {
        self.voxel_lookup.get(ijk).copied()
    }

    pub fn index_from_name(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Returns why two parcel maps describe different regions; names are ignored.
    pub fn explain_mismatch(&self, other: &ParcelsMap) -> Option<String> {
        match (&self.volume_space, &other.volume_space) {
            (Some(left), Some(right)) => {
                if !left.matches(right) {
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
        if self.surfaces != other.surfaces {
            return Some("mappings use different surfaces or vertex counts".to_string());
        }
        if self.parcels.len() != other.parcels.len() {
            return Some(format!(
                "mappings have {} and {} parcels",
                self.parcels.len(),
                other.parcels.len()
            ));
        }
        for (pos, (left, right)) in self.parcels.iter().zip(other.parcels.iter()).enumerate() {
            if !left.same_members(right) {
                return Some(format!("parcel {pos} covers different brainordinates"));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{Parcel, ParcelsMap};
    use crate::core::error::ErrorKind;
    use crate::mapping::structure::Structure;
    use crate::mapping::volume::VolumeSpace;

    fn sample() -> ParcelsMap {
        let mut map = ParcelsMap::new();
        map.add_surface(Structure::CortexLeft, 10).expect("surface");
        map.set_volume_space(VolumeSpace::with_dims([2, 2, 2]).expect("space"))
            .expect("space");
        map.add_parcel(Parcel::new("motor").with_vertices(Structure::CortexLeft, [0, 1, 2]))
            .expect("motor");
        map.add_parcel(
            Parcel::new("deep")
                .with_vertices(Structure::CortexLeft, [5])
                .with_voxels([[0, 0, 1]]),
        )
        .expect("deep");
        map
    }

    #[test]
    fn lookups_resolve_members() {
        let map = sample();
        assert_eq!(map.len(), 2);
        assert_eq!(map.index_for_vertex(Structure::CortexLeft, 1), Some(0));
        assert_eq!(map.index_for_vertex(Structure::CortexLeft, 5), Some(1));
        assert_eq!(map.index_for_vertex(Structure::CortexLeft, 9), None);
        assert_eq!(map.index_for_voxel(&[0, 0, 1]), Some(1));
        assert_eq!(map.index_from_name("deep"), Some(1));
    }

    #[test]
    fn overlapping_and_duplicate_parcels_are_rejected() {
        let mut map = sample();
        let err = map
            .add_parcel(Parcel::new("motor").with_vertices(Structure::CortexLeft, [7]))
            .expect_err("duplicate name");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = map
            .add_parcel(Parcel::new("overlap").with_vertices(Structure::CortexLeft, [2]))
            .expect_err("overlap");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = map
            .add_parcel(Parcel::new("right").with_vertices(Structure::CortexRight, [0]))
            .expect_err("undeclared surface");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = map.add_parcel(Parcel::new("empty")).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn names_do_not_affect_structural_match() {
        let left = sample();
        let mut renamed = ParcelsMap::new();
        renamed.add_surface(Structure::CortexLeft, 10).expect("surface");
        renamed
            .set_volume_space(VolumeSpace::with_dims([2, 2, 2]).expect("space"))
            .expect("space");
        renamed
            .add_parcel(Parcel::new("a").with_vertices(Structure::CortexLeft, [0, 1, 2]))
            .expect("a");
        renamed
            .add_parcel(
                Parcel::new("b")
                    .with_vertices(Structure::CortexLeft, [5])
                    .with_voxels([[0, 0, 1]]),
            )
            .expect("b");
        assert_eq!(left.explain_mismatch(&renamed), None);

        let mut fewer = ParcelsMap::new();
        fewer.add_surface(Structure::CortexLeft, 10).expect("surface");
        fewer
            .set_volume_space(VolumeSpace::with_dims([2, 2, 2]).expect("space"))
            .expect("space");
        fewer
            .add_parcel(Parcel::new("a").with_vertices(Structure::CortexLeft, [0, 1]))
            .expect("a");
        assert!(left.explain_mismatch(&fewer).is_some());
    }
}
