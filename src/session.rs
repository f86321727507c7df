//! Loaded volumes, the current selection and the parameters applied to them.
//!
//! A [`Session`] is the only holder of mutable state. Front-ends that run the
//! pipeline off their main thread take a [`Snapshot`], run it, and drop the
//! result when [`Session::is_current`] says the parameters moved on meanwhile.

use std::path::Path;
use std::sync::Arc;

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::export::{ExportRecord, ExportSink};
use crate::nifti_io::load_volume;
use crate::orientation::{View, oriented_size};
use crate::pipeline::{Measurement, PipelineConfig, run};
use crate::resample::{Axis, RotationAngles};
use crate::segmentation::ThresholdMode;
use crate::smoothing::SmoothingParams;
use crate::volume::{GroupKey, Volume};

/// A volume and the name it was loaded under.
#[derive(Debug, Clone)]
pub struct NamedVolume {
    pub name: String,
    pub volume: Arc<Volume>,
}

/// A volume turned away because its geometry differs from the group's.
#[derive(Debug, Clone)]
pub struct GroupMismatch {
    pub name: String,
    pub expected: GroupKey,
    pub actual: GroupKey,
}

/// Volumes sharing one `(size, spacing, center)`.
#[derive(Debug, Clone, Default)]
pub struct VolumeGroup {
    key: Option<GroupKey>,
    members: Vec<NamedVolume>,
}

impl VolumeGroup {
    /// Adds a volume if its geometry matches; the first volume sets the key.
    pub fn add(&mut self, name: impl Into<String>, volume: Volume) -> std::result::Result<(), GroupMismatch> {
        let name = name.into();
        let actual = volume.group_key();
        match self.key {
            Some(expected) if !expected.matches(&actual) => {
                return Err(GroupMismatch {
                    name,
                    expected,
                    actual,
                });
            }
            Some(_) => {}
            None => self.key = Some(actual),
        }
        self.members.push(NamedVolume {
            name,
            volume: Arc::new(volume),
        });
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<NamedVolume> {
        if index >= self.members.len() {
            return None;
        }
        let removed = self.members.remove(index);
        if self.members.is_empty() {
            self.key = None;
        }
        Some(removed)
    }

    pub fn key(&self) -> Option<&GroupKey> {
        self.key.as_ref()
    }

    /// Shared rotation center, derived from the first volume's grid.
    pub fn center(&self) -> Option<Vector3<f64>> {
        self.key.map(|k| Vector3::from(k.center))
    }

    pub fn members(&self) -> &[NamedVolume] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Outcome of loading several volumes at once.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: Vec<String>,
    pub mismatched: Vec<GroupMismatch>,
    pub unreadable: Vec<(String, Error)>,
}

/// Outcome of exporting every volume in the group.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub exported: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

/// Parameters and input captured for one pipeline run.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub name: String,
    pub volume: Arc<Volume>,
    pub center: Vector3<f64>,
    pub config: PipelineConfig,
}

impl Snapshot {
    pub fn run(&self) -> Result<Measurement> {
        run(&self.volume, self.center, &self.config)
    }
}

/// Interactive measurement state.
#[derive(Debug, Clone)]
pub struct Session {
    group: VolumeGroup,
    current: usize,
    initial: PipelineConfig,
    config: PipelineConfig,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl Session {
    /// A session whose parameters start at `initial`, e.g. from a settings source.
    pub fn new(initial: PipelineConfig) -> Self {
        Self {
            group: VolumeGroup::default(),
            current: 0,
            initial,
            config: initial,
            generation: 0,
        }
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    pub fn group(&self) -> &VolumeGroup {
        &self.group
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_index(&self) -> Option<usize> {
        (!self.group.is_empty()).then_some(self.current)
    }

    pub fn current(&self) -> Option<&NamedVolume> {
        self.group.members().get(self.current)
    }

    /// Adds volumes to the group, reporting those whose geometry differs.
    pub fn load<I, S>(&mut self, volumes: I) -> LoadReport
    where
        I: IntoIterator<Item = (S, Volume)>,
        S: Into<String>,
    {
        let mut report = LoadReport::default();
        for (name, volume) in volumes {
            let name = name.into();
            match self.group.add(name.clone(), volume) {
                Ok(()) => report.accepted.push(name),
                Err(mismatch) => {
                    tracing::warn!(
                        name = %mismatch.name,
                        expected = ?mismatch.expected,
                        actual = ?mismatch.actual,
                        "Volume geometry differs from the loaded group"
                    );
                    report.mismatched.push(mismatch);
                }
            }
        }
        if !report.accepted.is_empty() {
            self.touch();
        }
        report
    }

    /// Reads volume files and adds them; unreadable files are reported.
    pub fn load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> LoadReport {
        let mut readable = Vec::with_capacity(paths.len());
        let mut unreadable = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let name = path.display().to_string();
            match load_volume(path) {
                Ok(volume) => readable.push((name, volume)),
                Err(err) => {
                    tracing::warn!(name = %name, error = %err, "Failed to read volume");
                    unreadable.push((name, err));
                }
            }
        }
        let mut report = self.load(readable);
        report.unreadable = unreadable;
        report
    }

    /// Removes one volume; an emptied group resets every parameter.
    pub fn remove(&mut self, index: usize) -> Option<NamedVolume> {
        let removed = self.group.remove(index)?;
        if self.group.is_empty() {
            self.clear();
        } else {
            if index < self.current || self.current >= self.group.len() {
                self.current = self.current.saturating_sub(1);
            }
            self.touch();
        }
        Some(removed)
    }

    /// Drops every volume and restores the initial parameters.
    pub fn clear(&mut self) {
        self.group = VolumeGroup::default();
        self.current = 0;
        self.config = self.initial;
        self.touch();
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.group.len() {
            return Err(Error::invalid("index", index));
        }
        self.current = index;
        self.touch();
        Ok(())
    }

    /// Moves to the next volume, wrapping at the end.
    pub fn next(&mut self) {
        if !self.group.is_empty() {
            self.current = (self.current + 1) % self.group.len();
            self.touch();
        }
    }

    /// Moves to the previous volume, wrapping at the start.
    pub fn previous(&mut self) {
        if !self.group.is_empty() {
            let len = self.group.len();
            self.current = (self.current + len - 1) % len;
            self.touch();
        }
    }

    /// Switches the view; the slice index goes back to the middle of the new axis.
    pub fn set_view(&mut self, view: View) {
        self.config.view = view;
        self.config.slice_index = None;
        self.touch();
    }

    pub fn set_rotation(&mut self, axis: Axis, degrees: f64) -> Result<()> {
        self.config.angles = self.config.angles.with(axis, degrees)?;
        self.touch();
        Ok(())
    }

    pub fn set_angles(&mut self, angles: RotationAngles) {
        self.config.angles = angles;
        self.touch();
    }

    /// Number of slices along the current view axis of the current volume.
    pub fn slice_count(&self) -> Option<usize> {
        let current = self.current()?;
        Some(oriented_size(&current.volume, self.config.view)[self.config.view.slice_axis()])
    }

    /// The slice index the next run will use.
    pub fn slice_index(&self) -> Option<usize> {
        let count = self.slice_count()?;
        Some(
            self.config
                .slice_index
                .unwrap_or(count.saturating_sub(1) / 2),
        )
    }

    pub fn set_slice_index(&mut self, index: usize) -> Result<()> {
        let count = self.slice_count().ok_or(Error::EmptyGroup)?;
        if index >= count {
            return Err(Error::SliceOutOfBounds {
                index,
                axis: self.config.view.slice_axis(),
                size: count,
            });
        }
        self.config.slice_index = Some(index);
        self.touch();
        Ok(())
    }

    pub fn set_smoothing(&mut self, smoothing: SmoothingParams) {
        self.config.smoothing = smoothing;
        self.touch();
    }

    pub fn set_threshold(&mut self, threshold: ThresholdMode) {
        self.config.threshold = threshold;
        self.touch();
    }

    pub fn set_invalid_contour_threshold(&mut self, threshold: usize) -> Result<()> {
        if threshold < 1 {
            return Err(Error::invalid("invalid_contour_threshold", threshold));
        }
        self.config.invalid_contour_threshold = threshold;
        self.touch();
        Ok(())
    }

    /// Replaces every parameter at once, e.g. from an imported settings file.
    pub fn set_config(&mut self, config: PipelineConfig) {
        self.config = config;
        self.touch();
    }

    /// Zero rotation and middle slice; volumes and filter settings stay.
    pub fn reset(&mut self) {
        self.config.angles = RotationAngles::default();
        self.config.slice_index = None;
        self.touch();
    }

    /// Captures the current volume and parameters for one run.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let current = self.current().ok_or(Error::EmptyGroup)?;
        let center = self.group.center().ok_or(Error::EmptyGroup)?;
        Ok(Snapshot {
            generation: self.generation,
            name: current.name.clone(),
            volume: Arc::clone(&current.volume),
            center,
            config: self.config,
        })
    }

    /// Whether a snapshot still reflects the session's parameters.
    pub fn is_current(&self, snapshot: &Snapshot) -> bool {
        snapshot.generation == self.generation
    }

    pub fn measure_current(&self) -> Result<Measurement> {
        self.snapshot()?.run()
    }

    /// Measures every volume in turn with the current parameters.
    ///
    /// A failing volume is recorded and skipped; the loop always reaches the end
    /// of the group.
    pub fn export_all(&self, sink: &mut dyn ExportSink) -> Result<BatchReport> {
        let center = self.group.center().ok_or(Error::EmptyGroup)?;
        let mut report = BatchReport::default();
        for member in self.group.members() {
            let outcome = run(&member.volume, center, &self.config).and_then(|measurement| {
                sink.export(&ExportRecord {
                    name: &member.name,
                    config: &self.config,
                    measurement: &measurement,
                })
            });
            match outcome {
                Ok(()) => report.exported.push(member.name.clone()),
                Err(err) => {
                    tracing::warn!(name = %member.name, error = %err, "Skipping volume in batch export");
                    report.failed.push((member.name.clone(), err));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume(size: (usize, usize, usize), origin: [f64; 3]) -> Volume {
        Volume::new(Array3::zeros(size), [1.0; 3], origin).unwrap()
    }

    fn loaded(n: usize) -> Session {
        let mut session = Session::default();
        let report = session.load((0..n).map(|i| (format!("v{i}"), volume((4, 5, 6), [0.0; 3]))));
        assert_eq!(report.accepted.len(), n);
        session
    }

    #[test]
    fn load_reports_geometry_mismatches() {
        let mut session = Session::default();
        let report = session.load(vec![
            ("a", volume((4, 4, 4), [0.0; 3])),
            ("b", volume((4, 4, 5), [0.0; 3])),
            ("c", volume((4, 4, 4), [1.0, 0.0, 0.0])),
            ("d", volume((4, 4, 4), [0.0; 3])),
        ]);
        assert_eq!(report.accepted, vec!["a", "d"]);
        let names: Vec<_> = report.mismatched.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(session.group().len(), 2);
    }

    #[test]
    fn navigation_wraps() {
        let mut session = loaded(3);
        assert_eq!(session.current_index(), Some(0));
        session.previous();
        assert_eq!(session.current_index(), Some(2));
        session.next();
        assert_eq!(session.current_index(), Some(0));
        session.next();
        assert_eq!(session.current().unwrap().name, "v1");
        assert!(session.select(3).is_err());
    }

    #[test]
    fn rotation_is_validated_per_axis() {
        let mut session = loaded(1);
        session.set_rotation(Axis::X, 45.0).unwrap();
        assert!(matches!(
            session.set_rotation(Axis::Z, -95.0),
            Err(Error::RotationOutOfBounds { axis: Axis::Z, .. })
        ));
        assert_eq!(session.config().angles.x(), 45.0);
        assert_eq!(session.config().angles.z(), 0.0);
    }

    #[test]
    fn slice_index_defaults_to_middle_of_view_axis() {
        let mut session = loaded(1);
        assert_eq!(session.slice_index(), Some(2));
        session.set_view(View::Y);
        assert_eq!(session.slice_index(), Some(2));
        session.set_view(View::X);
        assert_eq!(session.slice_index(), Some(1));

        session.set_slice_index(3).unwrap();
        assert_eq!(session.slice_index(), Some(3));
        assert!(matches!(
            session.set_slice_index(4),
            Err(Error::SliceOutOfBounds { index: 4, size: 4, .. })
        ));
    }

    #[test]
    fn reset_keeps_volumes_and_filters() {
        let mut session = loaded(2);
        let smoothing = SmoothingParams::new(1.0, 2, 0.1).unwrap();
        session.set_smoothing(smoothing);
        session.set_rotation(Axis::Y, 10.0).unwrap();
        session.set_slice_index(4).unwrap();

        session.reset();
        assert_eq!(session.config().angles, RotationAngles::default());
        assert_eq!(session.slice_index(), Some(2));
        assert_eq!(session.config().smoothing, smoothing);
        assert_eq!(session.group().len(), 2);
    }

    #[test]
    fn removing_last_volume_clears_session() {
        let mut session = loaded(2);
        session.next();
        session.set_rotation(Axis::X, 5.0).unwrap();

        session.remove(1).unwrap();
        assert_eq!(session.current_index(), Some(0));
        session.remove(0).unwrap();
        assert_eq!(session.current_index(), None);
        assert!(session.group().key().is_none());
        assert_eq!(*session.config(), PipelineConfig::default());
        assert!(matches!(session.snapshot(), Err(Error::EmptyGroup)));
    }

    #[test]
    fn stale_snapshots_are_detected() {
        let mut session = loaded(1);
        let snapshot = session.snapshot().unwrap();
        assert!(session.is_current(&snapshot));
        session.set_rotation(Axis::Z, 1.0).unwrap();
        assert!(!session.is_current(&snapshot));
        assert!(session.is_current(&session.snapshot().unwrap()));
    }
}
