//! Peak-count maps
//!
//! Builds a dense volume with the (weighted) number of peaks falling in
//! each voxel. Repeated peaks in one voxel add up; counts are not capped.

use ndarray::Array3;

use crate::grid::Grid;
use crate::voxel::{coords_to_voxels, VoxelIndex};

/// Accumulate voxel hits into a zero volume of `shape`
///
/// # Arguments
/// * `voxels` - Voxel indices, expected to be inside `shape`
/// * `weights` - Optional weight per voxel (1.0 when `None` or missing)
/// * `shape` - Output volume dimensions
pub fn accumulate_peaks(voxels: &[VoxelIndex], weights: Option<&[f64]>, shape: [usize; 3]) -> Array3<f64> {
    let mut peaks = Array3::zeros(shape);

    for (n, &[i, j, k]) in voxels.iter().enumerate() {
        let w = weights.and_then(|w| w.get(n).copied()).unwrap_or(1.0);
        match peaks.get_mut([i, j, k]) {
            Some(v) => *v += w,
            None => log::warn!("Skipping voxel {:?} outside shape {:?}", [i, j, k], shape),
        }
    }

    peaks
}

/// Map world coordinates onto `grid` and accumulate them
///
/// Returns the peak volume and the number of out-of-bounds coordinates.
pub fn coords_to_peaks(coords: &[[f64; 3]], weights: Option<&[f64]>, grid: &Grid) -> (Array3<f64>, usize) {
    let mapping = coords_to_voxels(coords, weights, grid);
    let peaks = accumulate_peaks(&mapping.voxels, Some(mapping.weights.as_slice()), grid.shape());
    (peaks, mapping.dropped)
}
