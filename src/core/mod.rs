// Core modules implementing the NIFTI-2 container, matrix storage, and error modeling.
pub mod error;
pub mod matrix;
pub mod nifti;
