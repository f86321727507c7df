//! Per-volume export of measurements.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::overlay::draw_contour_overlay;
use crate::pipeline::{Measurement, PipelineConfig};
use crate::settings::Settings;

/// What the pipeline hands to an [`ExportSink`] for each measured volume.
#[derive(Debug, Clone, Copy)]
pub struct ExportRecord<'a> {
    /// Name the volume was loaded under, usually its path.
    pub name: &'a str,
    pub config: &'a PipelineConfig,
    pub measurement: &'a Measurement,
}

impl ExportRecord<'_> {
    /// The settings that reproduce this measurement, with its result filled in.
    pub fn settings(&self) -> Settings {
        let config = PipelineConfig {
            slice_index: Some(self.measurement.slice_index),
            ..*self.config
        };
        Settings {
            input_path: Some(PathBuf::from(self.name)),
            circumference: Some(self.measurement.circumference),
            ..Settings::from_config(&config)
        }
    }
}

/// Receives measured volumes; decides file formats and naming.
pub trait ExportSink {
    fn export(&mut self, record: &ExportRecord<'_>) -> Result<()>;
}

/// Writes `<stem>_contour.png` overlays into a directory and collects a
/// settings record per volume for `circumference.json`.
#[derive(Debug)]
pub struct DirectoryExport {
    dir: PathBuf,
    entries: Vec<Settings>,
}

impl DirectoryExport {
    pub const SUMMARY_FILE: &'static str = "circumference.json";

    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            entries: Vec::new(),
        })
    }

    pub fn entries(&self) -> &[Settings] {
        &self.entries
    }

    /// Writes the collected records and returns the summary path.
    pub fn finish(self) -> Result<PathBuf> {
        let path = self.dir.join(Self::SUMMARY_FILE);
        let file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        serde_json::to_writer_pretty(file, &self.entries)?;
        Ok(path)
    }

    fn image_path(&self, name: &str) -> PathBuf {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name);
        let stem = file_name
            .strip_suffix(".nii.gz")
            .or_else(|| file_name.strip_suffix(".nii"))
            .unwrap_or(file_name);
        self.dir.join(format!("{stem}_contour.png"))
    }
}

impl ExportSink for DirectoryExport {
    fn export(&mut self, record: &ExportRecord<'_>) -> Result<()> {
        let measurement = record.measurement;
        let overlay = draw_contour_overlay(&measurement.slice, &measurement.cleaned.contour)?;
        let path = self.image_path(record.name);
        overlay.save(&path)?;
        tracing::debug!(path = %path.display(), "Wrote contour overlay");

        let mut settings = record.settings();
        settings.output_image_path = Some(path);
        self.entries.push(settings);
        Ok(())
    }
}
