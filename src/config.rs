//! Run configuration
//!
//! All fields have defaults matching the usual coordinate-based
//! meta-analysis setup: `pmid`/`x`/`y`/`z` columns, 9 mm FWHM Gaussian
//! kernel, 4 mm grid, voxel-wise maximum.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::mkda::Reduction;
use crate::smooth::Kernel;
use crate::table::ColumnNames;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnNames,
    pub kernel: Kernel,
    /// Voxel size (mm) the reference grid is resampled to; `None` keeps it
    pub target_resolution: Option<[f64; 3]>,
    pub reduction: Reduction,
    /// Zero study maps outside the reference mask
    pub apply_mask: bool,
    /// Compute study maps on the rayon thread pool
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            columns: ColumnNames::default(),
            kernel: Kernel::default(),
            target_resolution: Some([4.0, 4.0, 4.0]),
            reduction: Reduction::default(),
            apply_mask: true,
            parallel: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Isotropic target resolution, as given by a scalar voxel size
    pub fn with_resolution(mut self, voxel_size: f64) -> Self {
        self.target_resolution = Some([voxel_size; 3]);
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.kernel {
            Kernel::Gaussian { fwhm } if !(fwhm.is_finite() && fwhm >= 0.0) => {
                return Err(PipelineError::Config(format!("FWHM must be a non-negative number, got {}", fwhm)));
            }
            Kernel::Sphere { radius } if !(radius.is_finite() && radius >= 0.0) => {
                return Err(PipelineError::Config(format!("Sphere radius must be a non-negative number, got {}", radius)));
            }
            _ => {}
        }

        if let Some(res) = self.target_resolution {
            if res.iter().any(|&r| !(r.is_finite() && r > 0.0)) {
                return Err(PipelineError::Config(format!("Target resolution must be positive, got {:?}", res)));
            }
        }

        if let Reduction::Proportion { threshold } = self.reduction {
            if threshold.is_nan() {
                return Err(PipelineError::Config("Proportion threshold is NaN".to_string()));
            }
        }

        let c = &self.columns;
        let required = [&c.study, &c.x, &c.y, &c.z];
        for (n, name) in required.iter().enumerate() {
            if name.is_empty() {
                return Err(PipelineError::Config("Column names must not be empty".to_string()));
            }
            if required[n + 1..].contains(name) {
                return Err(PipelineError::Config(format!("Column '{}' is used twice", name)));
            }
        }
        Ok(())
    }
}
