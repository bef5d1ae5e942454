//! Reference voxel grid and its affine transform
//!
//! Every volume produced during a run shares one `Grid`. The grid is built
//! once from a reference space (a brain mask image or a standard template
//! geometry), optionally resampled to a coarser resolution, and then passed
//! explicitly to every stage.

use nalgebra::{Matrix4, Vector4};
use ndarray::{Array3, Zip};

use crate::error::{GridError, Result, ShapeMismatchError};

/// 4x4 affine mapping voxel indices `(i, j, k, 1)` to world coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(Matrix4<f64>);

impl Affine {
    pub fn identity() -> Self {
        Affine(Matrix4::identity())
    }

    /// Build from 16 values in row-major order (NIfTI srow layout)
    pub fn from_row_major(values: [f64; 16]) -> Self {
        Affine(Matrix4::from_row_slice(&values))
    }

    /// Axis-aligned affine with the given voxel sizes and world origin
    pub fn scaled(voxel_size: [f64; 3], origin: [f64; 3]) -> Self {
        Affine::from_row_major([
            voxel_size[0], 0.0, 0.0, origin[0],
            0.0, voxel_size[1], 0.0, origin[1],
            0.0, 0.0, voxel_size[2], origin[2],
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    pub fn to_row_major(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[r * 4 + c] = self.0[(r, c)];
            }
        }
        out
    }

    pub fn try_inverse(&self) -> Result<Affine, GridError> {
        self.0
            .try_inverse()
            .map(Affine)
            .ok_or(GridError::SingularAffine)
    }

    /// Transform a point using homogeneous coordinates
    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let v = self.0 * Vector4::new(p[0], p[1], p[2], 1.0);
        [v.x, v.y, v.z]
    }

    /// Physical size of one voxel along each axis (column norms of the 3x3 block)
    pub fn voxel_sizes(&self) -> [f64; 3] {
        let m = &self.0;
        let norm = |c: usize| (m[(0, c)].powi(2) + m[(1, c)].powi(2) + m[(2, c)].powi(2)).sqrt();
        [norm(0), norm(1), norm(2)]
    }
}

/// Shape of a volume as a fixed triple
#[inline]
pub fn volume_shape(volume: &Array3<f64>) -> [usize; 3] {
    let s = volume.shape();
    [s[0], s[1], s[2]]
}

/// Voxel grid: dimensions, affine, and an optional brain mask
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    shape: [usize; 3],
    affine: Affine,
    inverse: Affine,
    mask: Option<Array3<bool>>,
}

impl Grid {
    pub fn new(shape: [usize; 3], affine: Affine) -> Result<Self, GridError> {
        if shape.iter().any(|&n| n == 0) {
            return Err(GridError::EmptyShape(shape));
        }
        let inverse = affine.try_inverse()?;
        Ok(Grid {
            shape,
            affine,
            inverse,
            mask: None,
        })
    }

    /// Attach a brain mask; `true` marks voxels inside the brain
    pub fn with_mask(mut self, mask: Array3<bool>) -> Result<Self, GridError> {
        let s = mask.shape();
        let found = [s[0], s[1], s[2]];
        if found != self.shape {
            return Err(GridError::MaskShape {
                expected: self.shape,
                found,
            });
        }
        self.mask = Some(mask);
        Ok(self)
    }

    /// Standard 2 mm MNI152 template geometry (91 x 109 x 91), no mask
    pub fn mni152() -> Self {
        let affine = Affine::from_row_major([
            -2.0, 0.0, 0.0, 90.0,
            0.0, 2.0, 0.0, -126.0,
            0.0, 0.0, 2.0, -72.0,
            0.0, 0.0, 0.0, 1.0,
        ]);
        Grid {
            shape: [91, 109, 91],
            affine,
            inverse: Affine::from_row_major([
                -0.5, 0.0, 0.0, 45.0,
                0.0, 0.5, 0.0, 63.0,
                0.0, 0.0, 0.5, 36.0,
                0.0, 0.0, 0.0, 1.0,
            ]),
            mask: None,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn n_voxels(&self) -> usize {
        self.shape[0] * self.shape[1] * self.shape[2]
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn inverse_affine(&self) -> &Affine {
        &self.inverse
    }

    pub fn mask(&self) -> Option<&Array3<bool>> {
        self.mask.as_ref()
    }

    pub fn voxel_sizes(&self) -> [f64; 3] {
        self.affine.voxel_sizes()
    }

    /// All-zero volume over this grid
    pub fn zeros(&self) -> Array3<f64> {
        Array3::zeros(self.shape)
    }

    pub fn check_shape(&self, volume: &Array3<f64>) -> Result<(), ShapeMismatchError> {
        let found = volume_shape(volume);
        if found != self.shape {
            return Err(ShapeMismatchError {
                expected: self.shape,
                found,
            });
        }
        Ok(())
    }

    /// Zero every voxel outside the mask. No-op for unmasked grids.
    pub fn apply_mask(&self, volume: &mut Array3<f64>) {
        if let Some(mask) = &self.mask {
            Zip::from(volume).and(mask).for_each(|v, &inside| {
                if !inside {
                    *v = 0.0;
                }
            });
        }
    }

    /// Nearest voxel to a world coordinate, if it lies inside the grid
    pub fn nearest_voxel(&self, world: [f64; 3]) -> Option<[usize; 3]> {
        let v = self.inverse.apply(world);
        let mut out = [0usize; 3];
        for a in 0..3 {
            let r = v[a].round();
            if !(r >= 0.0 && r < self.shape[a] as f64) {
                return None;
            }
            out[a] = r as usize;
        }
        Some(out)
    }

    /// Resample the grid geometry to an axis-aligned grid with the given
    /// voxel size. The new grid covers the world bounding box of the source
    /// grid; a mask is carried over by nearest-neighbour lookup.
    pub fn resample(&self, target_resolution: [f64; 3]) -> Result<Grid, GridError> {
        if target_resolution.iter().any(|&r| !(r.is_finite() && r > 0.0)) {
            return Err(GridError::InvalidResolution(target_resolution));
        }

        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for corner in 0..8 {
            let ijk = [
                if corner & 1 != 0 { (self.shape[0] - 1) as f64 } else { 0.0 },
                if corner & 2 != 0 { (self.shape[1] - 1) as f64 } else { 0.0 },
                if corner & 4 != 0 { (self.shape[2] - 1) as f64 } else { 0.0 },
            ];
            let w = self.affine.apply(ijk);
            for a in 0..3 {
                let v = w[a] / target_resolution[a];
                lo[a] = lo[a].min(v);
                hi[a] = hi[a].max(v);
            }
        }

        // Tolerance keeps an exact extent like 45.0000000001 from adding a slice
        let shape = [
            (hi[0] - lo[0] - 1e-6).ceil().max(0.0) as usize + 1,
            (hi[1] - lo[1] - 1e-6).ceil().max(0.0) as usize + 1,
            (hi[2] - lo[2] - 1e-6).ceil().max(0.0) as usize + 1,
        ];
        let origin = [
            lo[0] * target_resolution[0],
            lo[1] * target_resolution[1],
            lo[2] * target_resolution[2],
        ];
        let mut grid = Grid::new(shape, Affine::scaled(target_resolution, origin))?;

        if let Some(mask) = &self.mask {
            let resampled = Array3::from_shape_fn(shape, |(i, j, k)| {
                let world = grid.affine.apply([i as f64, j as f64, k as f64]);
                self.nearest_voxel(world)
                    .map_or(false, |[si, sj, sk]| mask[[si, sj, sk]])
            });
            grid.mask = Some(resampled);
        }

        log::debug!(
            "Resampled grid {:?} -> {:?} at {:?} mm",
            self.shape, shape, target_resolution
        );
        Ok(grid)
    }
}

/// Source of the reference grid a run is built on
pub trait ReferenceSpace {
    fn load_reference_mask(&self) -> Result<Grid>;
}

/// Standard MNI152 2 mm geometry without a brain mask
///
/// Masking is a no-op on this grid; use `NiftiReference` with a brain mask
/// image to restrict maps to the brain.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mni152;

impl ReferenceSpace for Mni152 {
    fn load_reference_mask(&self) -> Result<Grid> {
        Ok(Grid::mni152())
    }
}

impl ReferenceSpace for Grid {
    fn load_reference_mask(&self) -> Result<Grid> {
        Ok(self.clone())
    }
}
