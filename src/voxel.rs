//! World coordinates to voxel indices
//!
//! Coordinates are pushed through the inverse affine and floored. Anything
//! that lands outside the grid is dropped and counted, never reported as
//! an error.

use crate::grid::Grid;

pub type VoxelIndex = [usize; 3];

/// In-bounds voxels of a coordinate set, with the weight of each kept
/// coordinate and the number of coordinates that fell outside the grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelMapping {
    pub voxels: Vec<VoxelIndex>,
    pub weights: Vec<f64>,
    pub dropped: usize,
}

impl VoxelMapping {
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }
}

/// Map one world coordinate to the voxel containing it
///
/// Returns `None` if any component of the continuous voxel coordinate is
/// negative, not below the grid dimension, or not finite.
#[inline]
pub fn coord_to_voxel(coord: [f64; 3], grid: &Grid) -> Option<VoxelIndex> {
    let v = grid.inverse_affine().apply(coord);
    let shape = grid.shape();
    let mut out = [0usize; 3];
    for a in 0..3 {
        // Negated comparison also rejects NaN
        if !(v[a] >= 0.0 && v[a] < shape[a] as f64) {
            return None;
        }
        out[a] = v[a].floor() as usize;
    }
    Some(out)
}

/// Map a coordinate set onto the grid
///
/// # Arguments
/// * `coords` - World coordinates (e.g. MNI millimetres)
/// * `weights` - Optional per-coordinate weights; 1.0 when `None`
/// * `grid` - Reference grid
pub fn coords_to_voxels(coords: &[[f64; 3]], weights: Option<&[f64]>, grid: &Grid) -> VoxelMapping {
    let mut mapping = VoxelMapping {
        voxels: Vec::with_capacity(coords.len()),
        weights: Vec::with_capacity(coords.len()),
        dropped: 0,
    };

    for (n, &coord) in coords.iter().enumerate() {
        match coord_to_voxel(coord, grid) {
            Some(voxel) => {
                mapping.voxels.push(voxel);
                mapping
                    .weights
                    .push(weights.and_then(|w| w.get(n).copied()).unwrap_or(1.0));
            }
            None => mapping.dropped += 1,
        }
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Affine;

    fn unit_grid(n: usize) -> Grid {
        Grid::new([n, n, n], Affine::identity()).unwrap()
    }

    #[test]
    fn test_identity_affine_floors() {
        let grid = unit_grid(4);
        assert_eq!(coord_to_voxel([1.2, 1.9, 0.0], &grid), Some([1, 1, 0]));
        assert_eq!(coord_to_voxel([3.999, 3.0, 2.5], &grid), Some([3, 3, 2]));
    }

    #[test]
    fn test_out_of_bounds_dropped() {
        let grid = unit_grid(4);
        assert_eq!(coord_to_voxel([-0.1, 1.0, 1.0], &grid), None);
        assert_eq!(coord_to_voxel([1.0, 4.0, 1.0], &grid), None);
        assert_eq!(coord_to_voxel([1.0, 1.0, f64::NAN], &grid), None);
    }

    #[test]
    fn test_mapping_counts_drops_and_keeps_weights() {
        let grid = unit_grid(4);
        let coords = [[1.0, 1.0, 1.0], [-5.0, 0.0, 0.0], [2.5, 2.5, 2.5]];
        let weights = [0.5, 2.0, 3.0];
        let mapping = coords_to_voxels(&coords, Some(&weights[..]), &grid);
        assert_eq!(mapping.voxels, vec![[1, 1, 1], [2, 2, 2]]);
        assert_eq!(mapping.weights, vec![0.5, 3.0]);
        assert_eq!(mapping.dropped, 1);
    }

    #[test]
    fn test_all_out_of_bounds_is_empty() {
        let grid = unit_grid(4);
        let mapping = coords_to_voxels(&[[10.0, 0.0, 0.0], [0.0, -1.0, 0.0]], None, &grid);
        assert!(mapping.is_empty());
        assert_eq!(mapping.dropped, 2);
    }

    #[test]
    fn test_never_returns_out_of_range_index() {
        let grid = Grid::new([5, 3, 7], Affine::scaled([2.0, 3.0, 1.5], [-4.0, -4.0, -4.0])).unwrap();
        let shape = grid.shape();
        let mut coords = Vec::new();
        for x in -20..20 {
            for y in -20..20 {
                coords.push([x as f64 * 0.7, y as f64 * 0.9, (x - y) as f64 * 0.4]);
            }
        }
        let mapping = coords_to_voxels(&coords, None, &grid);
        assert_eq!(mapping.len() + mapping.dropped, coords.len());
        for v in &mapping.voxels {
            for a in 0..3 {
                assert!(v[a] < shape[a], "index {:?} out of range for {:?}", v, shape);
            }
        }
    }

    #[test]
    fn test_mni_coordinates() {
        let grid = Grid::mni152();
        // Anterior commissure at MNI (0, 0, 0) -> voxel (45, 63, 36)
        assert_eq!(coord_to_voxel([0.0, 0.0, 0.0], &grid), Some([45, 63, 36]));
        // x axis is flipped: positive x moves toward lower i
        assert_eq!(coord_to_voxel([10.0, 0.0, 0.0], &grid), Some([40, 63, 36]));
        assert_eq!(coord_to_voxel([0.0, 0.0, 200.0], &grid), None);
    }
}
