// Volume space (dimensions + voxel-to-mm transform) shared by dense and parcel maps.
use crate::core::error::{Error, ErrorKind};

pub type Ijk = [i64; 3];

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeSpace {
    dims: [i64; 3],
    sform: [[f64; 4]; 3],
    voxels: usize,
}

impl VolumeSpace {
    pub fn new(dims: [i64; 3], sform: [[f64; 4]; 3]) -> Result<Self, Error> {
        if dims.iter().any(|value| *value < 1) {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("invalid volume dimensions {dims:?}")));
        }
        // linear indices are computed in i64, so the product must fit there too
        let voxels = dims
            .iter()
            .try_fold(1i64, |acc, value| acc.checked_mul(*value))
            .and_then(|count| usize::try_from(count).ok())
            .ok_or_else(|| {
                Error::new(ErrorKind::Format)
                    .with_message(format!("volume dimensions {dims:?} have too many voxels"))
            })?;
        Ok(Self { dims, sform, voxels })
    }

    /// Identity-transform space, mostly useful for synthetic data.
    pub fn with_dims(dims: [i64; 3]) -> Result<Self, Error> {
        let sform = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        Self::new(dims, sform)
    }

    pub fn dims(&self) -> [i64; 3] {
        self.dims
    }

    pub fn sform(&self) -> &[[f64; 4]; 3] {
        &self.sform
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels
    }

    pub fn contains(&self, ijk: &Ijk) -> bool {
        ijk.iter()
            .zip(self.dims.iter())
            .all(|(index, dim)| *index >= 0 && index < dim)
    }

    /// Flat index with i varying fastest, as in a NIFTI volume.
    pub fn linear_index(&self, ijk: &Ijk) -> Option<usize> {
        if !self.contains(ijk) {
            return None;
        }
        let [di, dj, _] = self.dims;
        Some((ijk[0] + di * (ijk[1] + dj * ijk[2])) as usize)
    }

    /// Same dimensions and a transform equal within a small relative tolerance.
    pub fn matches(&self, other: &VolumeSpace) -> bool {
        if self.dims != other.dims {
            return false;
        }
        let scale = self
            .sform
            .iter()
            .flatten()
            .chain(other.sform.iter().flatten())
            .fold(0.0f64, |acc, value| acc.max(value.abs()))
            .max(1.0);
        self.sform
            .iter()
            .flatten()
            .zip(other.sform.iter().flatten())
            .all(|(left, right)| (left - right).abs() <= scale * 1e-5)
    }
}
