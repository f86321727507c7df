//! JSON settings file.
//!
//! The same record is written per volume by batch export, with `circumference`
//! filled in.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::PipelineConfig;
use crate::resample::RotationAngles;
use crate::segmentation::ThresholdMode;
use crate::session::Session;
use crate::smoothing::SmoothingParams;

/// Name of the thresholding method as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdMethod {
    Otsu,
    Binary,
}

/// Persisted pipeline inputs and, once measured, the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub input_path: Option<PathBuf>,
    pub output_image_path: Option<PathBuf>,
    pub x_rotation: f64,
    pub y_rotation: f64,
    pub z_rotation: f64,
    pub slice_index: Option<usize>,
    pub conductance: f64,
    pub iterations: u32,
    pub time_step: f64,
    pub threshold_method: ThresholdMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_binary_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_binary_threshold: Option<f64>,
    #[serde(default)]
    pub circumference: Option<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl Settings {
    /// Captures the persisted fields of a pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let (threshold_method, lower, upper) = match config.threshold {
            ThresholdMode::Otsu => (ThresholdMethod::Otsu, None, None),
            ThresholdMode::Binary { lower, upper } => {
                (ThresholdMethod::Binary, Some(lower), Some(upper))
            }
        };
        Self {
            input_path: None,
            output_image_path: None,
            x_rotation: config.angles.x(),
            y_rotation: config.angles.y(),
            z_rotation: config.angles.z(),
            slice_index: config.slice_index,
            conductance: config.smoothing.conductance(),
            iterations: config.smoothing.iterations(),
            time_step: config.smoothing.time_step(),
            threshold_method,
            lower_binary_threshold: lower,
            upper_binary_threshold: upper,
            circumference: None,
        }
    }

    /// Validates the stored fields and applies them over `base`.
    ///
    /// Fields that are not persisted (view, contour-count threshold) come from
    /// `base`.
    pub fn to_config(&self, base: &PipelineConfig) -> Result<PipelineConfig> {
        let angles = RotationAngles::new(self.x_rotation, self.y_rotation, self.z_rotation)?;
        let smoothing = SmoothingParams::new(self.conductance, self.iterations, self.time_step)?;
        let threshold = match self.threshold_method {
            ThresholdMethod::Otsu => ThresholdMode::Otsu,
            ThresholdMethod::Binary => {
                let lower = self
                    .lower_binary_threshold
                    .ok_or_else(|| Error::invalid("lower_binary_threshold", "missing"))?;
                let upper = self
                    .upper_binary_threshold
                    .ok_or_else(|| Error::invalid("upper_binary_threshold", "missing"))?;
                ThresholdMode::binary(lower, upper)?
            }
        };
        Ok(PipelineConfig {
            angles,
            slice_index: self.slice_index,
            smoothing,
            threshold,
            ..*base
        })
    }

    /// The session's parameters, with the current volume as input.
    pub fn from_session(session: &Session) -> Self {
        Self {
            input_path: session.current().map(|v| PathBuf::from(&v.name)),
            ..Self::from_config(session.config())
        }
    }

    /// Validates and applies the stored fields; the session is untouched on error.
    pub fn apply_to(&self, session: &mut Session) -> Result<()> {
        let config = self.to_config(session.config())?;
        session.set_config(config);
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_config() -> PipelineConfig {
        PipelineConfig {
            angles: RotationAngles::new(16.0, 2.0, 22.0).unwrap(),
            slice_index: Some(96),
            smoothing: SmoothingParams::new(2.5, 7, 0.05).unwrap(),
            threshold: ThresholdMode::binary(0.1 + 0.2, 812.75).unwrap(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn round_trips_through_json() {
        let config = binary_config();
        let mut settings = Settings::from_config(&config);
        settings.input_path = Some(PathBuf::from("scans/subject-01.nii.gz"));
        settings.circumference = Some(512.3456789);

        let restored = Settings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(restored, settings);
        assert_eq!(restored.to_config(&PipelineConfig::default()).unwrap(), config);
    }

    #[test]
    fn otsu_omits_binary_bounds() {
        let json = Settings::default().to_json().unwrap();
        assert!(json.contains("\"threshold_method\": \"Otsu\""));
        assert!(!json.contains("lower_binary_threshold"));
        assert!(!json.contains("upper_binary_threshold"));
    }

    #[test]
    fn reports_offending_field() {
        let mut settings = Settings::default();
        settings.y_rotation = 120.0;
        assert!(matches!(
            settings.to_config(&PipelineConfig::default()),
            Err(Error::RotationOutOfBounds { .. })
        ));

        let mut settings = Settings::default();
        settings.threshold_method = ThresholdMethod::Binary;
        settings.upper_binary_threshold = Some(10.0);
        assert!(matches!(
            settings.to_config(&PipelineConfig::default()),
            Err(Error::InvalidParameter { field: "lower_binary_threshold", .. })
        ));

        let mut settings = Settings::default();
        settings.iterations = 0;
        assert!(matches!(
            settings.to_config(&PipelineConfig::default()),
            Err(Error::InvalidParameter { field: "iterations", .. })
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            Settings::from_json("{\"x_rotation\": \"ten\"}"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn applies_to_session_only_when_valid() {
        let mut session = Session::default();
        let mut settings = Settings::from_config(&binary_config());
        settings.apply_to(&mut session).unwrap();
        assert_eq!(*session.config(), binary_config());

        settings.z_rotation = -91.0;
        assert!(settings.apply_to(&mut session).is_err());
        assert_eq!(*session.config(), binary_config());
        assert_eq!(Settings::from_session(&session).input_path, None);
    }

    /// xorshift64 values in `[0, scale)` carrying a full 53-bit mantissa.
    fn noisy_values(seed: u64, scale: f64) -> impl Iterator<Item = f64> {
        let mut state = seed;
        std::iter::repeat_with(move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64 * scale
        })
    }

    #[test]
    fn float_fields_survive_json_bit_for_bit() {
        let scales = [1.0, 90.0, 1e3, 1e6];
        let mut values = scales.iter().enumerate().flat_map(|(i, &scale)| {
            noisy_values(0x9E37_79B9_7F4A_7C15 + i as u64, scale).take(2500)
        });

        for _ in 0..1000 {
            let mut next = || values.next().unwrap();
            let settings = Settings {
                x_rotation: next() - 45.0,
                y_rotation: next(),
                z_rotation: -next(),
                conductance: next(),
                time_step: next(),
                threshold_method: ThresholdMethod::Binary,
                lower_binary_threshold: Some(-next()),
                upper_binary_threshold: Some(next()),
                circumference: Some(next()),
                ..Settings::default()
            };
            let restored = Settings::from_json(&settings.to_json().unwrap()).unwrap();
            let bits = |s: &Settings| {
                [
                    s.x_rotation,
                    s.y_rotation,
                    s.z_rotation,
                    s.conductance,
                    s.time_step,
                    s.lower_binary_threshold.unwrap(),
                    s.upper_binary_threshold.unwrap(),
                    s.circumference.unwrap(),
                ]
                .map(f64::to_bits)
            };
            assert_eq!(bits(&restored), bits(&settings), "{settings:?}");
        }
    }

    #[test]
    fn saves_and_loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings::from_config(&binary_config());
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }
}
