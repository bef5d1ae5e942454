//! Multilevel kernel density analysis (MKDA) aggregation
//!
//! Per-study maps are folded one at a time into a voxel-wise statistic.
//! Every reduction is commutative, so the result depends only on the set
//! of study maps, not on their order, and partial accumulators built on
//! different threads can be merged.

use std::borrow::Borrow;

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};

use crate::error::ShapeMismatchError;
use crate::grid::{volume_shape, Affine};

/// Voxel-wise rule combining study maps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reduction {
    /// Largest study value
    Max,
    /// Sum of study values
    Sum,
    /// Mean of study values
    Mean,
    /// Fraction of studies whose value exceeds `threshold`
    Proportion { threshold: f64 },
}

impl Default for Reduction {
    fn default() -> Self {
        Reduction::Max
    }
}

/// Final statistic map with the affine of its grid
#[derive(Debug, Clone, PartialEq)]
pub struct MetaMap {
    pub volume: Array3<f64>,
    pub affine: Affine,
    pub n_studies: usize,
}

impl MetaMap {
    /// Largest value and where it is, `None` for an empty or all-NaN map
    pub fn peak(&self) -> Option<([usize; 3], f64)> {
        self.volume
            .indexed_iter()
            .filter(|(_, v)| !v.is_nan())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|((i, j, k), &v)| ([i, j, k], v))
    }

    /// Number of voxels strictly above `threshold`
    pub fn count_above(&self, threshold: f64) -> usize {
        self.volume.iter().filter(|&&v| v > threshold).count()
    }
}

/// Streaming fold of study maps
#[derive(Debug, Clone)]
pub struct MkdaAccumulator {
    reduction: Reduction,
    state: Array3<f64>,
    n_studies: usize,
}

impl MkdaAccumulator {
    pub fn new(reduction: Reduction, shape: [usize; 3]) -> Self {
        let init = match reduction {
            Reduction::Max => f64::NEG_INFINITY,
            _ => 0.0,
        };
        MkdaAccumulator {
            reduction,
            state: Array3::from_elem(shape, init),
            n_studies: 0,
        }
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub fn shape(&self) -> [usize; 3] {
        volume_shape(&self.state)
    }

    pub fn n_studies(&self) -> usize {
        self.n_studies
    }

    fn check(&self, found: [usize; 3]) -> Result<(), ShapeMismatchError> {
        let expected = self.shape();
        if found != expected {
            return Err(ShapeMismatchError { expected, found });
        }
        Ok(())
    }

    /// Fold one study map into the statistic
    pub fn push(&mut self, volume: &Array3<f64>) -> Result<(), ShapeMismatchError> {
        self.check(volume_shape(volume))?;

        let acc = Zip::from(&mut self.state).and(volume);
        match self.reduction {
            Reduction::Max => acc.for_each(|s, &v| *s = s.max(v)),
            Reduction::Sum | Reduction::Mean => acc.for_each(|s, &v| *s += v),
            Reduction::Proportion { threshold } => acc.for_each(|s, &v| {
                if v > threshold {
                    *s += 1.0;
                }
            }),
        }
        self.n_studies += 1;
        Ok(())
    }

    /// Combine two partial folds over disjoint sets of studies
    pub fn merge(mut self, other: MkdaAccumulator) -> Result<Self, ShapeMismatchError> {
        self.check(other.shape())?;
        debug_assert_eq!(self.reduction, other.reduction);

        let acc = Zip::from(&mut self.state).and(&other.state);
        match self.reduction {
            Reduction::Max => acc.for_each(|s, &o| *s = s.max(o)),
            _ => acc.for_each(|s, &o| *s += o),
        }
        self.n_studies += other.n_studies;
        Ok(self)
    }

    /// Finish the statistic. Zero studies give an all-zero volume.
    pub fn finish(self) -> Array3<f64> {
        let n = self.n_studies;
        let mut state = self.state;
        if n == 0 {
            state.fill(0.0);
            return state;
        }
        match self.reduction {
            Reduction::Mean | Reduction::Proportion { .. } => {
                state.mapv_inplace(|v| v / n as f64);
            }
            Reduction::Max | Reduction::Sum => {}
        }
        state
    }

    pub fn finish_map(self, affine: Affine) -> MetaMap {
        let n_studies = self.n_studies;
        MetaMap {
            volume: self.finish(),
            affine,
            n_studies,
        }
    }
}

/// Fold a sequence of study maps, consuming it once
pub fn combine<I, V>(volumes: I, shape: [usize; 3], reduction: Reduction) -> Result<Array3<f64>, ShapeMismatchError>
where
    I: IntoIterator<Item = V>,
    V: Borrow<Array3<f64>>,
{
    let mut acc = MkdaAccumulator::new(reduction, shape);
    for volume in volumes {
        acc.push(volume.borrow())?;
    }
    Ok(acc.finish())
}
