//! End-to-end tests: coordinate tables through study maps to MKDA maps

mod common;

use std::io::Cursor;

use ndarray::Array3;

use common::*;
use mkda_core::config::PipelineConfig;
use mkda_core::grid::{Affine, Grid, Mni152};
use mkda_core::mkda::{combine, Reduction};
use mkda_core::nifti_io::{read_volume_file, save_meta_map, volume_to_nifti, NiftiReference};
use mkda_core::pipeline::Pipeline;
use mkda_core::smooth::Kernel;
use mkda_core::stream::{iter_volumes, StudyMap};
use mkda_core::table::{ColumnNames, CoordinateTable};
use mkda_core::PipelineError;

fn raw_config() -> PipelineConfig {
    PipelineConfig {
        kernel: Kernel::Identity,
        target_resolution: None,
        ..Default::default()
    }
}

#[test]
fn test_two_studies_max_on_identity_grid() {
    let table = coordinate_table(&[("a", [1.0, 1.0, 1.0]), ("b", [2.0, 2.0, 2.0])]);
    let pipeline = Pipeline::with_grid(raw_config(), identity_grid(4)).unwrap();

    let map = pipeline.run(&table).unwrap();
    assert_eq!(map.n_studies, 2);
    assert_eq!(map.volume[[1, 1, 1]], 1.0);
    assert_eq!(map.volume[[2, 2, 2]], 1.0);
    assert_eq!(map.count_above(0.0), 2);
}

#[test]
fn test_study_outside_grid_contributes_zeros() {
    let table = coordinate_table(&[
        ("inside", [1.0, 2.0, 3.0]),
        ("outside", [100.0, 100.0, 100.0]),
        ("outside", [-5.0, 0.0, 0.0]),
    ]);
    let grid = identity_grid(4);
    let maps: Vec<StudyMap> = iter_volumes(&table, &ColumnNames::default(), &grid, Kernel::Identity)
        .unwrap()
        .collect();
    assert_eq!(maps.len(), 2);
    assert_eq!(maps[1].study_id, "outside");
    assert_eq!(maps[1].dropped, 2);
    assert!(maps[1].volume.iter().all(|&v| v == 0.0));

    let config = PipelineConfig {
        reduction: Reduction::Mean,
        ..raw_config()
    };
    let map = Pipeline::with_grid(config, grid).unwrap().run(&table).unwrap();
    assert_eq!(map.n_studies, 2);
    assert_eq!(map.volume[[1, 2, 3]], 0.5);
}

#[test]
fn test_each_coordinate_lands_in_exactly_one_study_map() {
    let rows = [
        ("s1", [0.0, 0.0, 0.0]),
        ("s2", [1.0, 1.0, 1.0]),
        ("s1", [2.0, 0.0, 1.0]),
        ("s3", [3.0, 3.0, 3.0]),
        ("s2", [0.0, 3.0, 2.0]),
        ("s1", [2.0, 0.0, 1.0]),
    ];
    let table = coordinate_table(&rows);
    let grid = identity_grid(4);
    let maps: Vec<StudyMap> = iter_volumes(&table, &ColumnNames::default(), &grid, Kernel::Identity)
        .unwrap()
        .collect();

    let ids: Vec<&str> = maps.iter().map(|m| m.study_id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2", "s3"]);
    assert_eq!(maps[0].volume.sum(), 3.0);
    assert_eq!(maps[0].volume[[2, 0, 1]], 2.0);
    assert_eq!(maps[1].volume.sum(), 2.0);
    assert_eq!(maps[2].volume.sum(), 1.0);

    let total = combine(maps.iter().map(|m| &m.volume), grid.shape(), Reduction::Sum).unwrap();
    assert_eq!(total.sum(), rows.len() as f64);
}

#[test]
fn test_row_order_does_not_change_result() {
    let rows = vec![
        ("10", [-40.0, 20.0, 10.0]),
        ("11", [38.0, -12.0, 44.0]),
        ("10", [0.0, 0.0, 0.0]),
        ("12", [20.0, -60.0, 30.0]),
        ("11", [22.0, -58.0, 28.0]),
    ];
    let mut reversed = rows.clone();
    reversed.reverse();

    for reduction in [Reduction::Max, Reduction::Sum, Reduction::Proportion { threshold: 1e-3 }] {
        let config = PipelineConfig {
            reduction,
            kernel: Kernel::Gaussian { fwhm: 10.0 },
            ..Default::default()
        };
        let pipeline = Pipeline::new(config, &Mni152).unwrap();
        let a = pipeline.run(&coordinate_table(&rows)).unwrap();
        let b = pipeline.run(&coordinate_table(&reversed)).unwrap();
        assert!(max_abs_diff(&a.volume, &b.volume) < 1e-12, "{:?}", reduction);
    }
}

#[test]
fn test_smoothing_preserves_mass_away_from_edges() {
    let grid = scaled_grid([31, 31, 31], 2.0);
    let table = coordinate_table(&[("a", [30.0, 30.0, 30.0]), ("b", [20.0, 34.0, 28.0])]);
    let maps: Vec<StudyMap> = iter_volumes(&table, &ColumnNames::default(), &grid, Kernel::Gaussian { fwhm: 8.0 })
        .unwrap()
        .collect();
    for map in &maps {
        assert!((map.volume.sum() - 1.0).abs() < 1e-9, "{}", map.volume.sum());
        assert!(map.volume.iter().all(|&v| v >= 0.0));
    }
    let peak = maps[0]
        .volume
        .indexed_iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .unwrap();
    assert_eq!(peak, (15, 15, 15));
}

#[test]
fn test_csv_table_through_pipeline() {
    let csv = "pmid, x, y, z, weight\n\
               17, 1, 1, 1, 1.0\n\
               17, 2, 1, 1, 0.5\n\
               23, 2, 2, 2, 2.0\n";
    let table = CoordinateTable::from_csv_reader(Cursor::new(csv)).unwrap();
    assert_eq!(table.n_rows(), 3);

    let config = PipelineConfig {
        reduction: Reduction::Sum,
        ..raw_config()
    };
    let map = Pipeline::with_grid(config, identity_grid(4)).unwrap().run(&table).unwrap();
    assert_eq!(map.volume[[1, 1, 1]], 1.0);
    assert_eq!(map.volume[[2, 1, 1]], 0.5);
    assert_eq!(map.volume[[2, 2, 2]], 2.0);
}

#[test]
fn test_csv_missing_column_reported() {
    let csv = "study,x,y\n1,0,0\n";
    let table = CoordinateTable::from_csv_reader(Cursor::new(csv)).unwrap();
    let err = Pipeline::with_grid(raw_config(), identity_grid(4))
        .unwrap()
        .run(&table)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Schema(_)), "{}", err);
}

#[test]
fn test_json_config_drives_run() {
    let config = PipelineConfig::from_json_str(
        r#"{
            "columns": {"study": "article", "weight": null},
            "kernel": {"type": "sphere", "radius": 1.0},
            "target_resolution": null,
            "reduction": {"kind": "proportion", "threshold": 0.5}
        }"#,
    )
    .unwrap();
    let table = coordinate_table(&[("a", [2.0, 2.0, 2.0]), ("b", [5.0, 5.0, 5.0])]);
    let renamed = CoordinateTable::new()
        .with_column("article", table.column("pmid").unwrap().clone())
        .unwrap()
        .with_column("x", table.column("x").unwrap().clone())
        .unwrap()
        .with_column("y", table.column("y").unwrap().clone())
        .unwrap()
        .with_column("z", table.column("z").unwrap().clone())
        .unwrap();

    let map = Pipeline::with_grid(config, identity_grid(8)).unwrap().run(&renamed).unwrap();
    assert_eq!(map.volume[[2, 2, 2]], 0.5);
    assert_eq!(map.volume[[3, 2, 2]], 0.5);
    assert_eq!(map.volume[[3, 3, 2]], 0.0);
    assert_eq!(map.volume[[5, 5, 5]], 0.5);
    assert_eq!(map.volume[[0, 0, 0]], 0.0);
}

#[test]
fn test_nifti_mask_reference_and_output() {
    let affine = Affine::scaled([2.0, 2.0, 2.0], [-10.0, -10.0, -10.0]);
    let mut mask = Array3::zeros((11, 11, 11));
    for i in 2..9 {
        for j in 2..9 {
            for k in 2..9 {
                mask[[i, j, k]] = 1.0;
            }
        }
    }
    let mask_path = temp_path("mask.nii");
    std::fs::write(&mask_path, volume_to_nifti(&mask, &affine).unwrap()).unwrap();

    let config = PipelineConfig {
        kernel: Kernel::Gaussian { fwhm: 6.0 },
        target_resolution: Some([2.0, 2.0, 2.0]),
        ..Default::default()
    };
    let pipeline = Pipeline::new(config, &NiftiReference::new(&mask_path)).unwrap();
    assert_eq!(pipeline.grid().shape(), [11, 11, 11]);

    let table = coordinate_table(&[
        ("a", [0.0, 0.0, 0.0]),
        ("a", [1.0, 1.0, 1.0]),
        ("b", [-6.0, 0.0, 0.0]),
    ]);
    let map = pipeline.run(&table).unwrap();
    assert!(map.volume[[5, 5, 5]] > 0.0);
    assert_eq!(map.volume[[0, 5, 5]], 0.0);
    assert_eq!(map.peak().map(|(idx, _)| idx), Some([5, 5, 5]));

    let out_path = temp_path("meta.nii.gz");
    save_meta_map(&out_path, &map).unwrap();
    let loaded = read_volume_file(&out_path).unwrap();
    assert_eq!(loaded.volume.dim(), (11, 11, 11));
    assert!(max_abs_diff(&loaded.volume, &map.volume) < 1e-6);
    assert!(correlation(&loaded.volume, &map.volume) > 0.999);
    assert_eq!(loaded.affine.voxel_sizes(), [2.0, 2.0, 2.0]);

    std::fs::remove_file(&mask_path).ok();
    std::fs::remove_file(&out_path).ok();
}

#[test]
fn test_missing_reference_file() {
    let err = Pipeline::new(raw_config(), &NiftiReference::new(temp_path("absent.nii"))).unwrap_err();
    assert!(matches!(err, PipelineError::Io { .. }));
}

#[test]
fn test_resampled_mni_grid_geometry() {
    let grid = Grid::mni152().resample([4.0, 4.0, 4.0]).unwrap();
    assert_eq!(grid.shape(), [46, 55, 46]);
    let origin = grid.affine().apply([0.0, 0.0, 0.0]);
    assert_eq!(origin, [-90.0, -126.0, -72.0]);
}
