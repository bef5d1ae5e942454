//! MKDA strategies timed on one coordinate table
//!
//! Usage: cargo run --release --example mkda_benchmark -- --table coords.csv --output mkda.nii.gz
//!
//! Without `--table` a synthetic table is generated inside the MNI box.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use ndarray::Array3;

use mkda_core::config::PipelineConfig;
use mkda_core::grid::{Mni152, ReferenceSpace};
use mkda_core::mkda::{combine, MetaMap};
use mkda_core::nifti_io::{save_meta_map, NiftiReference};
use mkda_core::pipeline::Pipeline;
use mkda_core::smooth::Kernel;
use mkda_core::table::{Column, CoordinateTable};

#[derive(Parser, Debug)]
#[command(about = "Time raw, streamed and parallel MKDA on a coordinate table")]
struct Args {
    /// CSV with study/x/y/z columns
    #[arg(long)]
    table: Option<PathBuf>,

    /// Studies to generate when no table is given
    #[arg(long, default_value_t = 500)]
    synthetic_studies: usize,

    /// Brain mask NIfTI used as reference; MNI152 geometry otherwise
    #[arg(long)]
    mask: Option<PathBuf>,

    /// JSON run configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gaussian FWHM in mm, overrides the configuration
    #[arg(long)]
    fwhm: Option<f64>,

    /// Isotropic target voxel size in mm, overrides the configuration
    #[arg(long)]
    resolution: Option<f64>,

    /// Rayon worker threads (0 = rayon default)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Where to write the smoothed map (.nii or .nii.gz)
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn setup_logging(level: &str) -> Result<LoggerHandle, String> {
    Logger::try_with_env_or_str(level)
        .and_then(|logger| logger.log_to_stdout().start())
        .map_err(|e| format!("Logger initialization failed: {e}"))
}

/// Deterministic table of 1 to 12 peaks per study inside the MNI bounding box
fn synthetic_table(n_studies: usize) -> Result<CoordinateTable, String> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut uniform = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };

    let (mut ids, mut xs, mut ys, mut zs) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for study in 0..n_studies {
        let n_peaks = 1 + (uniform() * 12.0) as usize;
        for _ in 0..n_peaks {
            ids.push(format!("study-{study}"));
            xs.push(-70.0 + 140.0 * uniform());
            ys.push(-100.0 + 170.0 * uniform());
            zs.push(-50.0 + 130.0 * uniform());
        }
    }

    CoordinateTable::new()
        .with_column("pmid", Column::Text(ids))
        .and_then(|t| t.with_column("x", Column::Float(xs)))
        .and_then(|t| t.with_column("y", Column::Float(ys)))
        .and_then(|t| t.with_column("z", Column::Float(zs)))
        .map_err(|e| e.to_string())
}

fn summarize(name: &str, map: &MetaMap, elapsed: std::time::Duration) {
    let peak = map.peak().map_or(0.0, |(_, v)| v);
    println!(
        "{:<22} {:>10.2?}  studies={:<6} peak={:.4e}  nonzero={}",
        name,
        elapsed,
        map.n_studies,
        peak,
        map.count_above(0.0)
    );
}

fn main() -> Result<(), String> {
    let args = Args::parse();
    let _logger = setup_logging(&args.log_level)?;

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path).map_err(|e| e.to_string())?,
        None => PipelineConfig::default(),
    };
    if let Some(fwhm) = args.fwhm {
        config.kernel = Kernel::from_fwhm(Some(fwhm));
    }
    if let Some(res) = args.resolution {
        config = config.with_resolution(res);
    }

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .map_err(|e| format!("Failed to build thread pool: {e}"))?;
    }

    let start = Instant::now();
    let table = match &args.table {
        Some(path) => CoordinateTable::from_csv_path(path).map_err(|e| e.to_string())?,
        None => synthetic_table(args.synthetic_studies)?,
    };
    log::info!("Table ready: {} rows in {:.2?}", table.n_rows(), start.elapsed());

    let reference: Box<dyn ReferenceSpace> = match &args.mask {
        Some(path) => Box::new(NiftiReference::new(path)),
        None => Box::new(Mni152),
    };

    let raw = Pipeline::new(
        PipelineConfig {
            kernel: Kernel::Identity,
            ..config.clone()
        },
        reference.as_ref(),
    )
    .map_err(|e| e.to_string())?;
    let sequential = Pipeline::new(config.clone(), reference.as_ref()).map_err(|e| e.to_string())?;
    let parallel = Pipeline::new(
        PipelineConfig {
            parallel: true,
            ..config.clone()
        },
        reference.as_ref(),
    )
    .map_err(|e| e.to_string())?;

    println!(
        "Grid {:?} at {:?} mm, kernel {:?}, reduction {:?}, {} threads",
        sequential.grid().shape(),
        sequential.grid().voxel_sizes(),
        config.kernel,
        config.reduction,
        rayon::current_num_threads()
    );

    // Raw peaks: every study map held in memory, combined at the end
    let start = Instant::now();
    let volumes: Vec<Array3<f64>> = raw
        .iter_volumes(&table)
        .map_err(|e| e.to_string())?
        .map(|m| m.volume)
        .collect();
    let raw_volume = combine(&volumes, raw.grid().shape(), config.reduction).map_err(|e| e.to_string())?;
    let raw_map = MetaMap {
        volume: raw_volume,
        affine: *raw.grid().affine(),
        n_studies: volumes.len(),
    };
    drop(volumes);
    summarize("raw (collected)", &raw_map, start.elapsed());

    let start = Instant::now();
    let streamed = sequential
        .run_with_progress(&table, |i, n| {
            if n >= 10 && i % (n / 10) == 0 {
                log::info!("{:.0}% of studies", 100.0 * i as f64 / n as f64);
            }
        })
        .map_err(|e| e.to_string())?;
    summarize("smoothed (streamed)", &streamed, start.elapsed());

    let start = Instant::now();
    let par_map = parallel.run(&table).map_err(|e| e.to_string())?;
    summarize("smoothed (parallel)", &par_map, start.elapsed());

    let max_diff = streamed
        .volume
        .iter()
        .zip(par_map.volume.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    println!("Max |streamed - parallel| = {:.3e}", max_diff);

    if let Some(path) = &args.output {
        save_meta_map(path, &streamed).map_err(|e| e.to_string())?;
        println!("Saved {}", path.display());
    }

    Ok(())
}
