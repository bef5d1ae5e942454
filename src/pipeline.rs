//! Coordinate table to meta-analytic map
//!
//! Ties the stages together for one configuration: the reference grid is
//! loaded and resampled once, then every run streams study maps into an
//! `MkdaAccumulator`, either one study at a time or on the rayon pool.

use std::sync::Mutex;

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::error::{Result, SchemaError};
use crate::grid::{Grid, ReferenceSpace};
use crate::group::{group_by_study, StudyGroup};
use crate::mkda::{MetaMap, MkdaAccumulator};
use crate::smooth::Smoother;
use crate::stream::{iter_volumes, study_map, MapStream, StreamStats};
use crate::table::CoordinateTable;

#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    grid: Grid,
}

impl Pipeline {
    /// Load the reference grid and resample it to the configured resolution
    pub fn new(config: PipelineConfig, reference: &dyn ReferenceSpace) -> Result<Self> {
        config.validate()?;
        let mut grid = reference.load_reference_mask()?;
        if let Some(res) = config.target_resolution {
            grid = grid.resample(res)?;
        }
        log::info!(
            "Reference grid {:?}, voxel size {:?} mm",
            grid.shape(),
            grid.voxel_sizes()
        );
        Ok(Pipeline { config, grid })
    }

    /// Use `grid` as is, ignoring `target_resolution`
    pub fn with_grid(config: PipelineConfig, grid: Grid) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config, grid })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Lazily produce one map per study
    pub fn iter_volumes(&self, table: &CoordinateTable) -> Result<MapStream<'_>, SchemaError> {
        let stream = iter_volumes(table, &self.config.columns, &self.grid, self.config.kernel)?;
        Ok(stream.apply_mask(self.config.apply_mask))
    }

    pub fn run(&self, table: &CoordinateTable) -> Result<MetaMap> {
        self.run_with_progress(table, |_, _| {})
    }

    /// Run the whole table, calling `progress(index, total)` once per study
    pub fn run_with_progress<F>(&self, table: &CoordinateTable, progress: F) -> Result<MetaMap>
    where
        F: FnMut(usize, usize) + Send,
    {
        let (map, stats) = if self.config.parallel {
            self.run_parallel(table, progress)?
        } else {
            self.run_sequential(table, progress)?
        };
        log::info!(
            "MKDA ({:?}) over {} studies: {} coordinates, {} outside the grid, {} empty studies",
            self.config.reduction,
            map.n_studies,
            stats.coordinates,
            stats.dropped,
            stats.empty_studies
        );
        Ok(map)
    }

    fn run_sequential<F>(&self, table: &CoordinateTable, mut progress: F) -> Result<(MetaMap, StreamStats)>
    where
        F: FnMut(usize, usize),
    {
        let mut stream = self.iter_volumes(table)?.with_progress(&mut progress);
        let mut acc = MkdaAccumulator::new(self.config.reduction, self.grid.shape());
        for map in stream.by_ref() {
            acc.push(&map.volume)?;
        }
        let stats = stream.stats();
        Ok((acc.finish_map(*self.grid.affine()), stats))
    }

    fn run_parallel<F>(&self, table: &CoordinateTable, progress: F) -> Result<(MetaMap, StreamStats)>
    where
        F: FnMut(usize, usize) + Send,
    {
        let coords = self.config.columns.resolve(table)?;
        let groups: Vec<StudyGroup> = group_by_study(coords).collect();
        let total = groups.len();
        log::info!("Transforming {} studies on {} threads", total, rayon::current_num_threads());

        let smoother = Smoother::for_grid(self.config.kernel, &self.grid);
        let reduction = self.config.reduction;
        let shape = self.grid.shape();
        let apply_mask = self.config.apply_mask;
        let progress = Mutex::new((0usize, progress));

        let empty = || (MkdaAccumulator::new(reduction, shape), StreamStats::default());
        let (acc, stats) = groups
            .par_iter()
            .map(|group| {
                if let Ok(mut guard) = progress.lock() {
                    let (index, report) = &mut *guard;
                    report(*index, total);
                    *index += 1;
                }
                let map = study_map(group, &self.grid, &smoother, apply_mask);
                let mut stats = StreamStats::default();
                stats.record(group, &map);
                (map, stats)
            })
            .try_fold(empty, |(mut acc, mut stats), (map, s)| {
                acc.push(&map.volume)?;
                stats.merge(&s);
                Ok::<_, crate::error::ShapeMismatchError>((acc, stats))
            })
            .try_reduce(empty, |(a, mut sa), (b, sb)| {
                sa.merge(&sb);
                Ok((a.merge(b)?, sa))
            })?;

        Ok((acc.finish_map(*self.grid.affine()), stats))
    }
}
