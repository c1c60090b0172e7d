//! Purpose: CIFTI-2 connectivity matrix library backing the `ciftikit` CLI and tests.
//! Exports: `core` (NIFTI-2 container, matrix handles, errors), `mapping` (typed
//!          CIFTI XML model), `algorithms` (streaming matrix operations), `notice`.
//! Role: Row-addressed float32 matrices with metadata describing every index.
//! Invariants: Library code returns `core::error::Error`; it never prints or exits.
//! Invariants: Mapping models are validated on construction and on read.
pub mod algorithms;
pub mod core;
pub mod mapping;
pub mod notice;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::matrix::{CacheMode, CiftiMatrix, CreateOptions};
pub use crate::mapping::{Axis, CiftiXml, IndexMap, MappingKind};
