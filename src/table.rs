//! Peak coordinate tables
//!
//! A `CoordinateTable` is a small columnar frame: named columns of equal
//! length, either text or floating point. `ColumnNames::resolve` checks
//! and parses the whole table up front so that schema problems surface
//! before any map is produced.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result, SchemaError};

/// One column of a coordinate table
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Text(Vec<String>),
    Float(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Text(v) => v.len(),
            Column::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_floats(&self, name: &str) -> Result<Vec<f64>, SchemaError> {
        match self {
            Column::Float(v) => Ok(v.clone()),
            Column::Text(v) => v
                .iter()
                .enumerate()
                .map(|(row, s)| {
                    s.trim().parse::<f64>().map_err(|_| SchemaError::NotNumeric {
                        column: name.to_string(),
                        row,
                        value: s.clone(),
                    })
                })
                .collect(),
        }
    }

    fn to_labels(&self) -> Vec<String> {
        match self {
            Column::Text(v) => v.iter().map(|s| s.trim().to_string()).collect(),
            Column::Float(v) => v
                .iter()
                .map(|&x| {
                    if x.fract() == 0.0 && x.abs() < 1e15 {
                        format!("{}", x as i64)
                    } else {
                        x.to_string()
                    }
                })
                .collect(),
        }
    }
}

/// Named columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateTable {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl CoordinateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column; its length must match the existing columns
    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self, SchemaError> {
        if self.names.iter().any(|n| n == name) {
            return Err(SchemaError::DuplicateColumn(name.to_string()));
        }
        if let Some(first) = self.columns.first() {
            if first.len() != column.len() {
                return Err(SchemaError::RaggedColumn {
                    column: name.to_string(),
                    expected: first.len(),
                    found: column.len(),
                });
            }
        }
        self.names.push(name.to_string());
        self.columns.push(column);
        Ok(self)
    }

    /// Read a CSV table with a header row; every column is loaded as text
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let names: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); names.len()];
        for record in rdr.records() {
            let record = record?;
            for (col, cell) in cells.iter_mut().zip(record.iter()) {
                col.push(cell.to_string());
            }
        }

        let mut table = CoordinateTable::new();
        for (name, col) in names.iter().zip(cells) {
            table = table.with_column(name, Column::Text(col))?;
        }
        log::debug!("Loaded CSV table with columns {:?}, {} rows", table.names, table.n_rows());
        Ok(table)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_csv_reader(file)
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names.iter().position(|n| n == name).map(|i| &self.columns[i])
    }

    fn require(&self, name: &str) -> Result<&Column, SchemaError> {
        self.column(name).ok_or_else(|| SchemaError::MissingColumn {
            column: name.to_string(),
            available: self.names.clone(),
        })
    }
}

/// Names of the columns holding study id, coordinates, and weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub study: String,
    pub x: String,
    pub y: String,
    pub z: String,
    /// Optional column; all weights are 1.0 when it is absent from the table
    pub weight: Option<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            study: "pmid".to_string(),
            x: "x".to_string(),
            y: "y".to_string(),
            z: "z".to_string(),
            weight: Some("weight".to_string()),
        }
    }
}

impl ColumnNames {
    /// Validate the table and extract typed coordinates
    pub fn resolve(&self, table: &CoordinateTable) -> Result<Coordinates, SchemaError> {
        // Check presence of every required column before parsing any
        let study = table.require(&self.study)?;
        let x = table.require(&self.x)?;
        let y = table.require(&self.y)?;
        let z = table.require(&self.z)?;

        let xs = x.to_floats(&self.x)?;
        let ys = y.to_floats(&self.y)?;
        let zs = z.to_floats(&self.z)?;

        let weights = match self.weight.as_deref().and_then(|w| table.column(w).map(|c| (w, c))) {
            Some((name, col)) => Some(col.to_floats(name)?),
            None => None,
        };

        let points = xs
            .iter()
            .zip(&ys)
            .zip(&zs)
            .map(|((&x, &y), &z)| [x, y, z])
            .collect();

        Coordinates::new(study.to_labels(), points, weights)
    }
}

/// Parsed coordinate rows
///
/// Study ids, points and weights always have one entry per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coordinates {
    study_ids: Vec<String>,
    points: Vec<[f64; 3]>,
    weights: Option<Vec<f64>>,
}

impl Coordinates {
    pub fn new(
        study_ids: Vec<String>,
        points: Vec<[f64; 3]>,
        weights: Option<Vec<f64>>,
    ) -> Result<Self, SchemaError> {
        let rows = study_ids.len();
        if points.len() != rows {
            return Err(SchemaError::RaggedColumn {
                column: "points".to_string(),
                expected: rows,
                found: points.len(),
            });
        }
        if let Some(w) = &weights {
            if w.len() != rows {
                return Err(SchemaError::RaggedColumn {
                    column: "weights".to_string(),
                    expected: rows,
                    found: w.len(),
                });
            }
        }
        Ok(Coordinates {
            study_ids,
            points,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn study_ids(&self) -> &[String] {
        &self.study_ids
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn weight(&self, row: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[row])
    }
}
