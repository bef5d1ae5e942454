//! MKDA-Core: coordinate-based meta-analysis
//!
//! Turns tables of reported peak coordinates into per-study voxel maps on a
//! reference brain grid and aggregates them with multilevel kernel density
//! analysis (MKDA).
//!
//! # Modules
//! - `table`: Coordinate tables, CSV loading, column resolution
//! - `grid`: Affine, reference grid, MNI152 template, resampling
//! - `voxel`: World coordinates to voxel indices
//! - `peaks`: Per-study peak (indicator) volumes
//! - `smooth`: Gaussian and sphere kernels
//! - `group`: Grouping coordinates by study
//! - `stream`: Lazy per-study map iterator
//! - `mkda`: Voxel-wise reductions over study maps
//! - `pipeline`: End-to-end runs, sequential or on rayon
//! - `config`: JSON run configuration
//! - `nifti_io`: Reference masks and output maps as NIfTI

pub mod error;

// Geometry
pub mod grid;
pub mod voxel;

// Data
pub mod table;
pub mod group;

// Maps
pub mod peaks;
pub mod smooth;
pub mod stream;
pub mod mkda;

// Orchestration
pub mod config;
pub mod pipeline;

// I/O modules
pub mod nifti_io;

pub use config::PipelineConfig;
pub use error::{GridError, PipelineError, Result, SchemaError, ShapeMismatchError};
pub use grid::{Affine, Grid, Mni152, ReferenceSpace};
pub use mkda::{combine, MetaMap, MkdaAccumulator, Reduction};
pub use nifti_io::NiftiReference;
pub use pipeline::Pipeline;
pub use smooth::{smooth, Kernel, Smoother};
pub use stream::{iter_volumes, MapStream, StreamStats, StudyMap};
pub use table::{Column, ColumnNames, CoordinateTable, Coordinates};
pub use voxel::{coords_to_voxels, VoxelMapping};
