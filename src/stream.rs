//! Lazy per-study map production
//!
//! `MapStream` walks the study groups of a coordinate table and yields one
//! volume per study: coordinates are mapped onto the grid, accumulated into
//! a peak map, smoothed, and optionally masked. Nothing is cached between
//! calls; iterating again means calling `iter_volumes` again.

use ndarray::Array3;

use crate::error::SchemaError;
use crate::grid::Grid;
use crate::group::{group_by_study, StudyGroup, StudyGroups};
use crate::peaks::coords_to_peaks;
use crate::smooth::{Kernel, Smoother};
use crate::table::{ColumnNames, CoordinateTable, Coordinates};

/// Map of one study over the run's grid
#[derive(Debug, Clone, PartialEq)]
pub struct StudyMap {
    pub study_id: String,
    pub volume: Array3<f64>,
    /// Coordinates of this study that fell outside the grid
    pub dropped: usize,
}

/// Counters collected while a stream is consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub studies: usize,
    pub coordinates: usize,
    pub dropped: usize,
    /// Studies without a single in-bounds coordinate
    pub empty_studies: usize,
}

impl StreamStats {
    pub fn record(&mut self, group: &StudyGroup, map: &StudyMap) {
        self.studies += 1;
        self.coordinates += group.points.len();
        self.dropped += map.dropped;
        if map.dropped == group.points.len() {
            self.empty_studies += 1;
        }
    }

    pub fn merge(&mut self, other: &StreamStats) {
        self.studies += other.studies;
        self.coordinates += other.coordinates;
        self.dropped += other.dropped;
        self.empty_studies += other.empty_studies;
    }
}

/// Build the map of a single study
///
/// A study whose coordinates all fall outside the grid gives an all-zero
/// volume.
pub fn study_map(group: &StudyGroup, grid: &Grid, smoother: &Smoother, apply_mask: bool) -> StudyMap {
    let (mut volume, dropped) = coords_to_peaks(&group.points, Some(group.weights.as_slice()), grid);
    smoother.smooth_in_place(&mut volume);
    if apply_mask {
        grid.apply_mask(&mut volume);
    }
    if dropped > 0 {
        log::trace!(
            "Study {}: dropped {} of {} coordinates outside the grid",
            group.study_id, dropped, group.points.len()
        );
    }
    StudyMap {
        study_id: group.study_id.clone(),
        volume,
        dropped,
    }
}

/// Single-pass iterator of per-study maps
pub struct MapStream<'a> {
    groups: StudyGroups,
    grid: &'a Grid,
    smoother: Smoother,
    apply_mask: bool,
    stats: StreamStats,
    progress: Option<Box<dyn FnMut(usize, usize) + 'a>>,
    reported: bool,
}

/// Stream the maps of every study in `table`
///
/// The table schema is checked before anything is produced.
pub fn iter_volumes<'a>(
    table: &CoordinateTable,
    columns: &ColumnNames,
    grid: &'a Grid,
    kernel: Kernel,
) -> Result<MapStream<'a>, SchemaError> {
    let coords = columns.resolve(table)?;
    if coords.is_empty() {
        log::warn!("Coordinate table is empty");
    }
    Ok(MapStream::new(coords, grid, kernel))
}

impl<'a> MapStream<'a> {
    pub fn new(coords: Coordinates, grid: &'a Grid, kernel: Kernel) -> Self {
        let groups = group_by_study(coords);
        log::info!(
            "Transforming {} coordinates for {} studies",
            groups.n_coordinates(),
            groups.total()
        );
        MapStream {
            groups,
            grid,
            smoother: Smoother::for_grid(kernel, grid),
            apply_mask: true,
            stats: StreamStats::default(),
            progress: None,
            reported: false,
        }
    }

    /// Zero maps outside the grid mask (default: on; no-op without a mask)
    pub fn apply_mask(mut self, apply: bool) -> Self {
        self.apply_mask = apply;
        self
    }

    /// Call `progress(index, total)` before each study is processed
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(usize, usize) + 'a,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn total(&self) -> usize {
        self.groups.total()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn grid(&self) -> &Grid {
        self.grid
    }

    pub fn smoother(&self) -> &Smoother {
        &self.smoother
    }
}

impl Iterator for MapStream<'_> {
    type Item = StudyMap;

    fn next(&mut self) -> Option<StudyMap> {
        let index = self.groups.position();
        let total = self.groups.total();

        let group = match self.groups.next() {
            Some(g) => g,
            None => {
                if !self.reported {
                    self.reported = true;
                    log::info!(
                        "Produced {} study maps, {} of {} coordinates outside the grid",
                        self.stats.studies, self.stats.dropped, self.stats.coordinates
                    );
                }
                return None;
            }
        };

        if let Some(progress) = self.progress.as_mut() {
            progress(index, total);
        }
        log::debug!(
            "{:.1}% study: {}",
            100.0 * index as f64 / total as f64,
            group.study_id
        );

        let map = study_map(&group, self.grid, &self.smoother, self.apply_mask);
        self.stats.record(&group, &map);
        Some(map)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

impl ExactSizeIterator for MapStream<'_> {}
