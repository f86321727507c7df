use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use head_circumference::contours::{sort_by_perimeters_owned, trace_contours};
use head_circumference::export::DirectoryExport;
use head_circumference::overlay::{draw_contour_overlay, draw_traced_contours};
use head_circumference::pipeline::prepare_slice;
use head_circumference::segmentation::{ThresholdMode, segment};
use head_circumference::session::Session;
use head_circumference::settings::Settings;
use head_circumference::smoothing::SmoothingParams;
use head_circumference::topology::cleanup;
use head_circumference::volume::DEFAULT_UNIT_LABEL;
use head_circumference::{Axis, Error, PipelineConfig, View};
use tracing_subscriber::EnvFilter;

/// Measure head circumference on a plane cut through a brain volume
#[derive(Parser, Debug)]
#[command(name = "head-circumference")]
#[command(about = "Measure head circumference from NIfTI brain volumes", long_about = None)]
struct Args {
    /// Input volume(s), `.nii` or `.nii.gz`; the first is measured unless exporting
    #[arg(short, long, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Slicing plane
    #[arg(long, default_value = "z")]
    view: View,

    /// Rotation about X in degrees
    #[arg(short = 'x', long = "x-rotation", allow_hyphen_values = true)]
    x_rotation: Option<f64>,

    /// Rotation about Y in degrees
    #[arg(short = 'y', long = "y-rotation", allow_hyphen_values = true)]
    y_rotation: Option<f64>,

    /// Rotation about Z in degrees
    #[arg(short = 'z', long = "z-rotation", allow_hyphen_values = true)]
    z_rotation: Option<f64>,

    /// Slice index along the view axis; middle slice by default
    #[arg(short, long)]
    slice: Option<usize>,

    /// Thresholding method
    #[arg(long, value_enum)]
    threshold: Option<ThresholdArg>,

    /// Lower bound for binary thresholding
    #[arg(long, allow_hyphen_values = true)]
    lower: Option<f64>,

    /// Upper bound for binary thresholding
    #[arg(long, allow_hyphen_values = true)]
    upper: Option<f64>,

    /// Diffusion conductance
    #[arg(long)]
    conductance: Option<f64>,

    /// Diffusion iterations
    #[arg(long)]
    iterations: Option<u32>,

    /// Diffusion time step
    #[arg(long)]
    time_step: Option<f64>,

    /// Contour count at which a slice is rejected
    #[arg(long)]
    invalid_contour_threshold: Option<usize>,

    /// Import parameters from a settings file; flags given alongside win
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the parameters and result to a settings file
    #[arg(long)]
    save_settings: Option<PathBuf>,

    /// Write the contour overlay (or, for a rejected slice, every traced contour) as PNG
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Measure every input and write overlays plus `circumference.json` to this directory
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Print only the number
    #[arg(long)]
    raw: bool,

    /// Debug logging when RUST_LOG is unset
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ThresholdArg {
    Otsu,
    Binary,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "head_circumference=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Settings file first, then any flag that was given.
fn build_config(args: &Args, imported: Option<&Settings>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig {
        view: args.view,
        ..PipelineConfig::default()
    };
    if let Some(settings) = imported {
        config = settings.to_config(&config)?;
    }

    for (axis, angle) in [
        (Axis::X, args.x_rotation),
        (Axis::Y, args.y_rotation),
        (Axis::Z, args.z_rotation),
    ] {
        if let Some(angle) = angle {
            config.angles = config.angles.with(axis, angle)?;
        }
    }
    if args.slice.is_some() {
        config.slice_index = args.slice;
    }

    if args.conductance.is_some() || args.iterations.is_some() || args.time_step.is_some() {
        let current = config.smoothing;
        config.smoothing = SmoothingParams::new(
            args.conductance.unwrap_or(current.conductance()),
            args.iterations.unwrap_or(current.iterations()),
            args.time_step.unwrap_or(current.time_step()),
        )?;
    }

    config.threshold = threshold_mode(args.threshold, args.lower, args.upper, config.threshold)?;

    if let Some(threshold) = args.invalid_contour_threshold {
        config.invalid_contour_threshold = threshold;
    }
    Ok(config)
}

/// Resolves the threshold flags against the imported mode.
///
/// `--lower`/`--upper` on their own switch to binary thresholding; alongside
/// `--threshold otsu` they are an error.
fn threshold_mode(
    choice: Option<ThresholdArg>,
    lower: Option<f64>,
    upper: Option<f64>,
    current: ThresholdMode,
) -> Result<ThresholdMode> {
    let bounds_given = lower.is_some() || upper.is_some();
    match choice {
        Some(ThresholdArg::Otsu) if bounds_given => {
            bail!("--lower/--upper only apply to --threshold binary")
        }
        Some(ThresholdArg::Otsu) => return Ok(ThresholdMode::Otsu),
        None if !bounds_given => return Ok(current),
        Some(ThresholdArg::Binary) | None => {}
    }
    let (lower, upper) = match (lower, upper, current) {
        (Some(lower), Some(upper), _) => (lower, upper),
        (lower, upper, ThresholdMode::Binary { lower: l, upper: u }) => {
            (lower.unwrap_or(l), upper.unwrap_or(u))
        }
        _ => bail!("binary thresholding needs both --lower and --upper"),
    };
    Ok(ThresholdMode::binary(lower, upper)?)
}

/// Circumference line for stdout, rounded to 3 decimal digits.
///
/// Trailing zeros are dropped, so 512.3 prints as `512.3`. `raw` prints the
/// unrounded number alone.
fn format_circumference(value: f64, unit: &str, raw: bool) -> String {
    if raw {
        return value.to_string();
    }
    let rounded = (value * 1000.0).round() / 1000.0;
    format!("Calculated Circumference: {rounded} {unit}")
}

/// Traces every contour of the slice a failed run rejected, for inspection.
fn write_rejected_slice(session: &Session, path: &Path) -> Result<()> {
    let snapshot = session.snapshot()?;
    let config = &snapshot.config;
    let (_, slice) = prepare_slice(&snapshot.volume, snapshot.center, config)?;
    let segmented = segment(&slice, &config.smoothing, &config.threshold)?;
    let cleaned = cleanup(&segmented, slice.spacing);
    let ranked = sort_by_perimeters_owned(trace_contours(&cleaned.contour), cleaned.contour.spacing);
    for (rank, (contour, perimeter)) in ranked.iter().enumerate().take(3) {
        tracing::info!(rank, perimeter, points = contour.points.len(), "Rejected slice contour");
    }
    let contours: Vec<_> = ranked.into_iter().map(|(contour, _)| contour).collect();
    draw_traced_contours(&slice, &contours).save(path)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let imported = args
        .settings
        .as_deref()
        .map(|path| {
            Settings::load(path).with_context(|| format!("reading settings {}", path.display()))
        })
        .transpose()?;

    let mut inputs = args.input.clone();
    if inputs.is_empty() {
        if let Some(path) = imported.as_ref().and_then(|s| s.input_path.clone()) {
            inputs.push(path);
        } else {
            bail!("no input volume given");
        }
    }

    let config = build_config(&args, imported.as_ref())?;
    let mut session = Session::new(config);
    let report = session.load_files(&inputs);
    for mismatch in &report.mismatched {
        eprintln!(
            "Skipped {}: size/spacing/center {:?} differ from the group {:?}",
            mismatch.name, mismatch.actual, mismatch.expected
        );
    }
    if let Some((name, err)) = report.unreadable.first()
        && report.accepted.is_empty()
    {
        bail!("failed to read {name}: {err}");
    }
    for (name, err) in &report.unreadable {
        eprintln!("Skipped {name}: {err}");
    }

    if let Some(dir) = &args.export_dir {
        let mut export = DirectoryExport::new(dir)?;
        let batch = session.export_all(&mut export)?;
        for (name, err) in &batch.failed {
            eprintln!("Failed {name}: {err}");
        }
        let summary = export.finish()?;
        println!(
            "Exported {} of {} volumes to {}",
            batch.exported.len(),
            session.group().len(),
            summary.display()
        );
        return Ok(());
    }

    let measurement = match session.measure_current() {
        Ok(measurement) => measurement,
        Err(err @ Error::InvalidSlice { .. }) => {
            if let Some(path) = &args.output {
                write_rejected_slice(&session, path)?;
                eprintln!("Wrote traced contours to {}", path.display());
            }
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    let unit = session
        .current()
        .map(|v| v.volume.unit_label())
        .unwrap_or(DEFAULT_UNIT_LABEL);
    println!("{}", format_circumference(measurement.circumference, unit, args.raw));

    if let Some(path) = &args.output {
        draw_contour_overlay(&measurement.slice, &measurement.cleaned.contour)?.save(path)?;
    }
    if let Some(path) = &args.save_settings {
        let mut settings = Settings::from_session(&session);
        settings.output_image_path = args.output.clone();
        settings.slice_index = Some(measurement.slice_index);
        settings.circumference = Some(measurement.circumference);
        settings.save(path)?;
    }
    Ok(())
}
