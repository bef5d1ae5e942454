//! Common test utilities for MKDA-core integration tests

#![allow(dead_code)]

use std::path::PathBuf;

use ndarray::Array3;

use mkda_core::grid::{Affine, Grid};
use mkda_core::table::{Column, CoordinateTable};

/// Build a `pmid`/`x`/`y`/`z` table from (study, point) rows
pub fn coordinate_table(rows: &[(&str, [f64; 3])]) -> CoordinateTable {
    let ids = rows.iter().map(|(id, _)| id.to_string()).collect();
    let axis = |a: usize| rows.iter().map(|(_, p)| p[a]).collect();
    CoordinateTable::new()
        .with_column("pmid", Column::Text(ids))
        .unwrap()
        .with_column("x", Column::Float(axis(0)))
        .unwrap()
        .with_column("y", Column::Float(axis(1)))
        .unwrap()
        .with_column("z", Column::Float(axis(2)))
        .unwrap()
}

/// Unmasked n x n x n grid whose voxel indices equal world coordinates
pub fn identity_grid(n: usize) -> Grid {
    Grid::new([n, n, n], Affine::identity()).unwrap()
}

/// Unmasked isotropic grid with its origin at the world origin
pub fn scaled_grid(shape: [usize; 3], voxel_size: f64) -> Grid {
    Grid::new(shape, Affine::scaled([voxel_size; 3], [0.0; 3])).unwrap()
}

/// Largest element-wise absolute difference
pub fn max_abs_diff(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    assert_eq!(a.shape(), b.shape(), "shape mismatch");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Compute Pearson correlation coefficient between two volumes
pub fn correlation(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    let n = a.len() as f64;
    let (mut sum_a, mut sum_b, mut sum_ab, mut sum_a2, mut sum_b2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        sum_a += x;
        sum_b += y;
        sum_ab += x * y;
        sum_a2 += x * x;
        sum_b2 += y * y;
    }
    let numerator = n * sum_ab - sum_a * sum_b;
    let denominator = ((n * sum_a2 - sum_a * sum_a) * (n * sum_b2 - sum_b * sum_b)).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

/// Unique path in the system temp directory
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mkda_core_{}_{}", std::process::id(), name))
}
