//! Partition coordinates by study
//!
//! Groups come out in order of first appearance of each study id, so runs
//! over the same table are reproducible. The number of groups is known
//! before iteration starts, which is what progress reporting relies on.

use std::collections::HashMap;

use crate::table::Coordinates;

/// All coordinates reported by one study
#[derive(Debug, Clone, PartialEq)]
pub struct StudyGroup {
    pub study_id: String,
    pub points: Vec<[f64; 3]>,
    pub weights: Vec<f64>,
}

/// Single-pass iterator over the study groups of a coordinate set
#[derive(Debug)]
pub struct StudyGroups {
    coords: Coordinates,
    // (study id, row indices) in first-occurrence order
    groups: std::vec::IntoIter<(String, Vec<usize>)>,
    total: usize,
    position: usize,
}

/// Group rows by study id, keeping first-occurrence order
pub fn group_by_study(coords: Coordinates) -> StudyGroups {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    {
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for (row, id) in coords.study_ids().iter().enumerate() {
            let slot = *slots.entry(id.as_str()).or_insert_with(|| {
                groups.push((id.clone(), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(row);
        }
    }

    let total = groups.len();
    log::debug!("Grouped {} coordinates into {} studies", coords.len(), total);

    StudyGroups {
        coords,
        groups: groups.into_iter(),
        total,
        position: 0,
    }
}

impl StudyGroups {
    /// Number of groups, fixed before iteration
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of groups already yielded
    pub fn position(&self) -> usize {
        self.position
    }

    /// Fraction of groups already yielded, in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.position as f64 / self.total as f64
        }
    }

    /// Number of coordinate rows across all groups
    pub fn n_coordinates(&self) -> usize {
        self.coords.len()
    }
}

impl Iterator for StudyGroups {
    type Item = StudyGroup;

    fn next(&mut self) -> Option<StudyGroup> {
        let (study_id, rows) = self.groups.next()?;
        self.position += 1;
        Some(StudyGroup {
            study_id,
            points: rows.iter().map(|&r| self.coords.points()[r]).collect(),
            weights: rows.iter().map(|&r| self.coords.weight(r)).collect(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

impl ExactSizeIterator for StudyGroups {}
