//! NIfTI binding for the reference grid and the final map
//!
//! Reads a brain mask image to build the reference `Grid` and writes a
//! `MetaMap` as a float32 NIfTI-1 file for external viewers. Gzip input is
//! detected from the magic bytes; output is gzipped when the path ends in
//! `.nii.gz`.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array, Array3};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{PipelineError, Result};
use crate::grid::{Affine, Grid, ReferenceSpace};
use crate::mkda::MetaMap;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;

/// A 3D image with its affine
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiVolume {
    pub volume: Array3<f64>,
    pub affine: Affine,
}

impl NiftiVolume {
    /// Treat the image as a brain mask: voxels above 0.5 are inside
    pub fn into_mask_grid(self) -> Result<Grid> {
        let (nx, ny, nz) = self.volume.dim();
        let mask = self.volume.mapv(|v| v > 0.5);
        let grid = Grid::new([nx, ny, nz], self.affine)?.with_mask(mask)?;
        Ok(grid)
    }
}

fn nifti_err(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Nifti(format!("{}: {}", context, e))
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Short description of a raw header for error messages
fn header_info(bytes: &[u8]) -> String {
    if bytes.len() < HEADER_SIZE {
        return format!("file too small ({} bytes, need at least {})", bytes.len(), HEADER_SIZE);
    }
    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Prefer the sform; fall back to a pure scaling by pixdim
fn header_affine(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let (s, t, u) = (&header.srow_x, &header.srow_y, &header.srow_z);
        Affine::from_row_major([
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ])
    } else {
        let p = &header.pixdim;
        Affine::scaled([p[1] as f64, p[2] as f64, p[3] as f64], [0.0, 0.0, 0.0])
    }
}

/// Decode a 3D (or first volume of a 4D) NIfTI image from memory
pub fn load_volume(bytes: &[u8]) -> Result<NiftiVolume> {
    let obj = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))
            .map_err(|e| nifti_err("Failed to read gzipped NIfTI", e))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| nifti_err(&format!("Failed to read NIfTI ({})", header_info(bytes)), e))?
    };

    let affine = header_affine(obj.header());
    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| nifti_err("Failed to convert to ndarray", e))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(PipelineError::Nifti(format!("Expected at least 3D volume, got {}D", shape.len())));
    }
    let four_d = shape.len() >= 4;
    let volume = Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
        if four_d {
            array[[i, j, k, 0]]
        } else {
            array[[i, j, k]]
        }
    });

    Ok(NiftiVolume { volume, affine })
}

pub fn read_volume_file(path: &Path) -> Result<NiftiVolume> {
    let bytes = std::fs::read(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_volume(&bytes)
}

/// Build the reference grid from a mask image on disk
pub fn read_reference_grid(path: &Path) -> Result<Grid> {
    let grid = read_volume_file(path)?.into_mask_grid()?;
    log::info!("Loaded reference mask {} with shape {:?}", path.display(), grid.shape());
    Ok(grid)
}

/// Brain mask image used as the reference space
#[derive(Debug, Clone)]
pub struct NiftiReference {
    pub path: PathBuf,
}

impl NiftiReference {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        NiftiReference { path: path.into() }
    }
}

impl ReferenceSpace for NiftiReference {
    fn load_reference_mask(&self) -> Result<Grid> {
        read_reference_grid(&self.path)
    }
}

/// Encode a volume as an uncompressed single-file NIfTI-1 image (float32)
pub fn volume_to_nifti(volume: &Array3<f64>, affine: &Affine) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dim();
    if [nx, ny, nz].iter().any(|&n| n > i16::MAX as usize) {
        return Err(PipelineError::Nifti(format!("Volume {:?} too large for NIfTI-1", (nx, ny, nz))));
    }
    let vs = affine.voxel_sizes();
    let rows = affine.to_row_major();

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        header[40 + i * 2..42 + i * 2].copy_from_slice(&d.to_le_bytes());
    }

    // FLOAT32, 32 bits per voxel
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [1.0, vs[0] as f32, vs[1] as f32, vs[2] as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        header[76 + i * 4..80 + i * 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());

    // sform_code = 4 (MNI152)
    header[254..256].copy_from_slice(&4i16.to_le_bytes());
    for (row, offset) in [(0usize, 280usize), (1, 296), (2, 312)] {
        for c in 0..4 {
            let at = offset + c * 4;
            header[at..at + 4].copy_from_slice(&(rows[row * 4 + c] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + volume.len() * 4);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);

    // x varies fastest on disk
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                buffer.extend_from_slice(&(volume[[i, j, k]] as f32).to_le_bytes());
            }
        }
    }
    Ok(buffer)
}

pub fn volume_to_nifti_gz(volume: &Array3<f64>, affine: &Affine) -> Result<Vec<u8>> {
    let raw = volume_to_nifti(volume, affine)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| nifti_err("Gzip compression failed", e))?;
    encoder.finish().map_err(|e| nifti_err("Gzip finish failed", e))
}

/// Write the final map; `.nii.gz` paths are gzip compressed
pub fn save_meta_map(path: &Path, map: &MetaMap) -> Result<()> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        volume_to_nifti_gz(&map.volume, &map.affine)?
    } else {
        volume_to_nifti(&map.volume, &map.affine)?
    };
    std::fs::write(path, &bytes).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Wrote {} ({} studies)", path.display(), map.n_studies);
    Ok(())
}
