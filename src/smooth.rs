//! Spatial smoothing of peak maps
//!
//! Gaussian smoothing approximates a kernel density estimate around each
//! peak. The kernel width is given as a physical FWHM (mm) and converted to
//! a per-axis sigma in voxels using the grid's voxel sizes, so the same
//! FWHM gives the same physical blur at any resolution.
//!
//! The sphere kernel produces the binary per-study indicator maps used by
//! classic MKDA: a voxel is active if it lies within `radius` mm of a peak.

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::grid::Grid;

/// Gaussian support is cut at this many standard deviations
const TRUNCATE_SIGMAS: f64 = 4.0;

/// Smoothing kernel applied to each per-study peak map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kernel {
    /// Raw peak counts
    Identity,
    /// Isotropic Gaussian, width as full width at half maximum in mm
    Gaussian { fwhm: f64 },
    /// Binary sphere of the given radius in mm around every peak
    Sphere { radius: f64 },
}

impl Kernel {
    /// `None`, a non-positive or a non-finite FWHM means no smoothing
    pub fn from_fwhm(fwhm: Option<f64>) -> Self {
        match fwhm {
            Some(f) if f > 0.0 && f.is_finite() => Kernel::Gaussian { fwhm: f },
            _ => Kernel::Identity,
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Gaussian { fwhm: 9.0 }
    }
}

/// Convert a FWHM to the standard deviation of a Gaussian
#[inline]
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt())
}

/// Normalised 1D Gaussian kernel of odd length, truncated at 4 sigma
///
/// The radius is capped at `max_radius`; for a lane of `n` voxels taps
/// further than `n - 1` away never reach a voxel under zero padding.
pub fn gaussian_kernel_1d(sigma: f64, max_radius: usize) -> Vec<f64> {
    if !(sigma > 0.0) {
        return vec![1.0];
    }

    let natural = TRUNCATE_SIGMAS * sigma + 0.5;
    let radius = if natural >= max_radius as f64 {
        max_radius
    } else {
        natural as usize
    };
    let mut kernel: Vec<f64> = (0..2 * radius + 1)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Convolve every lane along `axis` with a symmetric kernel
///
/// Samples beyond the border are treated as zero, so mass can only be lost
/// through truncation at the edges, never gained.
fn convolve_axis(volume: &mut Array3<f64>, axis: usize, kernel: &[f64]) {
    if kernel.len() <= 1 {
        return;
    }
    let radius = kernel.len() / 2;
    let n = volume.len_of(Axis(axis));
    let mut line = vec![0.0f64; n];

    for mut lane in volume.lanes_mut(Axis(axis)) {
        // Peak maps are mostly empty
        if lane.iter().all(|&v| v == 0.0) {
            continue;
        }
        for (dst, &src) in line.iter_mut().zip(lane.iter()) {
            *dst = src;
        }

        for i in 0..n {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(n - 1);
            let mut sum = 0.0;
            for s in lo..=hi {
                sum += line[s] * kernel[s + radius - i];
            }
            lane[i] = sum;
        }
    }
}

/// Separable 3D Gaussian smoothing with per-axis sigma in voxels
pub fn gaussian_smooth_3d(volume: &Array3<f64>, sigma: [f64; 3]) -> Array3<f64> {
    let mut result = volume.clone();
    gaussian_in_place(&mut result, sigma);
    result
}

fn gaussian_in_place(volume: &mut Array3<f64>, sigma: [f64; 3]) {
    for axis in 0..3 {
        let max_radius = volume.len_of(Axis(axis)).saturating_sub(1);
        convolve_axis(volume, axis, &gaussian_kernel_1d(sigma[axis], max_radius));
    }
}

/// Offsets (in voxels) of all voxels within `radius` mm of the centre,
/// limited to `max_extent` voxels per axis
fn sphere_offsets(radius: f64, voxel_sizes: [f64; 3], max_extent: [usize; 3]) -> Vec<[isize; 3]> {
    let r2 = radius * radius;
    let extent = |a: usize| {
        let e = (radius / voxel_sizes[a]).floor();
        if e >= max_extent[a] as f64 {
            max_extent[a] as isize
        } else {
            e as isize
        }
    };
    let (ex, ey, ez) = (extent(0), extent(1), extent(2));

    let mut offsets = Vec::new();
    for dk in -ez..=ez {
        for dj in -ey..=ey {
            for di in -ex..=ex {
                let dx = di as f64 * voxel_sizes[0];
                let dy = dj as f64 * voxel_sizes[1];
                let dz = dk as f64 * voxel_sizes[2];
                if dx * dx + dy * dy + dz * dz <= r2 {
                    offsets.push([di, dj, dk]);
                }
            }
        }
    }
    offsets
}

/// Binary map marking every voxel within the sphere around a non-zero voxel
fn sphere_indicator(volume: &Array3<f64>, offsets: &[[isize; 3]]) -> Array3<f64> {
    let (nx, ny, nz) = volume.dim();
    let mut out = Array3::zeros((nx, ny, nz));

    for ((i, j, k), &v) in volume.indexed_iter() {
        if v == 0.0 {
            continue;
        }
        for &[di, dj, dk] in offsets {
            let (ni, nj, nk) = (i as isize + di, j as isize + dj, k as isize + dk);
            if ni < 0 || nj < 0 || nk < 0 {
                continue;
            }
            let (ni, nj, nk) = (ni as usize, nj as usize, nk as usize);
            if ni < nx && nj < ny && nk < nz {
                out[[ni, nj, nk]] = 1.0;
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
enum Plan {
    Identity,
    /// Per-axis sigma in voxels
    Gaussian([f64; 3]),
    Sphere { radius: f64, voxel_sizes: [f64; 3] },
}

/// A kernel prepared for one grid resolution, reusable across studies
#[derive(Debug, Clone)]
pub struct Smoother {
    kernel: Kernel,
    plan: Plan,
}

impl Smoother {
    pub fn new(kernel: Kernel, voxel_sizes: [f64; 3]) -> Self {
        let plan = match kernel {
            Kernel::Gaussian { fwhm } if fwhm > 0.0 => {
                let sigma_mm = fwhm_to_sigma(fwhm);
                Plan::Gaussian([
                    sigma_mm / voxel_sizes[0],
                    sigma_mm / voxel_sizes[1],
                    sigma_mm / voxel_sizes[2],
                ])
            }
            Kernel::Sphere { radius } if radius >= 0.0 => {
                Plan::Sphere { radius, voxel_sizes }
            }
            _ => Plan::Identity,
        };
        Smoother { kernel, plan }
    }

    pub fn for_grid(kernel: Kernel, grid: &Grid) -> Self {
        Smoother::new(kernel, grid.voxel_sizes())
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.plan, Plan::Identity)
    }

    pub fn smooth_in_place(&self, volume: &mut Array3<f64>) {
        match &self.plan {
            Plan::Identity => {}
            Plan::Gaussian(sigma) => gaussian_in_place(volume, *sigma),
            Plan::Sphere { radius, voxel_sizes } => {
                let (nx, ny, nz) = volume.dim();
                let max_extent = [nx.saturating_sub(1), ny.saturating_sub(1), nz.saturating_sub(1)];
                let offsets = sphere_offsets(*radius, *voxel_sizes, max_extent);
                *volume = sphere_indicator(volume, &offsets);
            }
        }
    }

    pub fn smooth(&self, volume: &Array3<f64>) -> Array3<f64> {
        let mut result = volume.clone();
        self.smooth_in_place(&mut result);
        result
    }
}

/// Gaussian smoothing by physical FWHM; `None` returns the input unchanged
pub fn smooth(volume: &Array3<f64>, fwhm: Option<f64>, voxel_sizes: [f64; 3]) -> Array3<f64> {
    Smoother::new(Kernel::from_fwhm(fwhm), voxel_sizes).smooth(volume)
}
