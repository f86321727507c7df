//! NIfTI-1 volume loading and saving.
//!
//! NIfTI stores its affine in RAS; volumes are held in LPS, so the first two
//! rows of the affine flip sign on the way in and out.

use std::io::{Cursor, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{Error, Result};
use crate::volume::{SpatialUnit, Volume};

/// File name suffixes accepted by [`load_volume`].
pub const SUPPORTED_EXTENSIONS: [&str; 2] = [".nii.gz", ".nii"];

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const RAS_TO_LPS: [f64; 3] = [-1.0, -1.0, 1.0];

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn check_extension(path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if SUPPORTED_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat(path.display().to_string()))
    }
}

/// Reads a `.nii` or `.nii.gz` file.
pub fn load_volume(path: impl AsRef<Path>) -> Result<Volume> {
    let path = path.as_ref();
    check_extension(path)?;
    let bytes = std::fs::read(path)?;
    let volume = read_volume(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        size = ?volume.size(),
        spacing = ?volume.spacing(),
        "Loaded volume"
    );
    Ok(volume)
}

/// Decodes a NIfTI-1 image from memory; gzip is detected from the magic bytes.
pub fn read_volume(bytes: &[u8]) -> Result<Volume> {
    let object = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))?
    };

    let header = object.header().clone();
    let spacing = [1, 2, 3].map(|i| f64::from(header.pixdim[i]).abs());
    let (direction, origin) = header_geometry(&header);
    let units = match header.xyzt_units & 0x07 {
        1 => Some(SpatialUnit::Meters),
        2 => Some(SpatialUnit::Millimeters),
        3 => Some(SpatialUnit::Micrometers),
        _ => None,
    };

    let array: ArrayD<f32> = object.into_volume().into_ndarray()?;
    let voxels = first_volume(array)?;
    Ok(Volume::with_direction(voxels, spacing, origin.into(), direction)?.with_units(units))
}

/// Keeps the first timepoint of 4D (or higher) data.
fn first_volume(mut array: ArrayD<f32>) -> Result<Array3<f32>> {
    if array.ndim() < 3 {
        return Err(Error::UnsupportedFormat(format!(
            "expected at least 3 dimensions, got {}",
            array.ndim()
        )));
    }
    while array.ndim() > 3 {
        let last = array.ndim() - 1;
        array = array.index_axis_move(Axis(last), 0);
    }
    let array = array
        .into_dimensionality::<Ix3>()
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    Ok(array.as_standard_layout().into_owned())
}

/// Direction cosines and origin in LPS, from the sform when present.
fn header_geometry(header: &NiftiHeader) -> (Matrix3<f64>, Vector3<f64>) {
    let fallback = (Matrix3::from_diagonal(&Vector3::from(RAS_TO_LPS)), Vector3::zeros());
    if header.sform_code <= 0 {
        return fallback;
    }

    let rows = [header.srow_x, header.srow_y, header.srow_z];
    let mut direction = Matrix3::zeros();
    let mut origin = Vector3::zeros();
    for (r, row) in rows.iter().enumerate() {
        for c in 0..3 {
            direction[(r, c)] = RAS_TO_LPS[r] * f64::from(row[c]);
        }
        origin[r] = RAS_TO_LPS[r] * f64::from(row[3]);
    }
    for c in 0..3 {
        let norm = direction.column(c).norm();
        if norm == 0.0 {
            return fallback;
        }
        let unit = direction.column(c) / norm;
        direction.set_column(c, &unit);
    }
    (direction, origin)
}

/// Encodes a volume as an uncompressed single-file NIfTI-1 image of `f32`s.
pub fn encode_volume(volume: &Volume) -> Result<Vec<u8>> {
    let [nx, ny, nz] = volume.size();
    let spacing = volume.spacing();
    let dims = [nx, ny, nz]
        .map(|n| i16::try_from(n).map_err(|_| Error::invalid("size", n)))
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let dim: [i16; 8] = [3, dims[0], dims[1], dims[2], 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }
    // FLOAT32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim = [1.0, spacing[0], spacing[1], spacing[2], 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&(*p as f32).to_le_bytes());
    }
    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[123] = match volume.units() {
        Some(SpatialUnit::Meters) => 1,
        Some(SpatialUnit::Millimeters) | None => 2,
        Some(SpatialUnit::Micrometers) => 3,
    };
    // sform_code = scanner anatomical
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    let direction = volume.direction();
    let origin = volume.origin();
    for r in 0..3 {
        let offset = 280 + r * 16;
        let mut row = [0.0f64; 4];
        for c in 0..3 {
            row[c] = RAS_TO_LPS[r] * direction[(r, c)] * spacing[c];
        }
        row[3] = RAS_TO_LPS[r] * origin[r];
        for (i, value) in row.iter().enumerate() {
            let at = offset + i * 4;
            header[at..at + 4].copy_from_slice(&(*value as f32).to_le_bytes());
        }
    }
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + volume.voxels().len() * 4);
    buffer.write_all(&header)?;
    buffer.write_all(&[0u8; VOX_OFFSET - HEADER_SIZE])?;
    // x varies fastest on disk.
    for value in volume.voxels().t().iter() {
        buffer.write_all(&value.to_le_bytes())?;
    }
    Ok(buffer)
}

/// Writes a volume, gzip-compressed when the path ends in `.nii.gz`.
pub fn save_volume(path: impl AsRef<Path>, volume: &Volume) -> Result<()> {
    let path = path.as_ref();
    check_extension(path)?;
    let raw = encode_volume(volume)?;
    let name = path.to_string_lossy().to_ascii_lowercase();
    let bytes = if name.ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()?
    } else {
        raw
    };
    std::fs::write(path, bytes)?;
    Ok(())
}
