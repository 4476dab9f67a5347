//! fisheye CLI: calibrate a fisheye camera from chessboard images, undistort
//! images and project 3D points with a saved model.

use clap::{Args, Parser, Subcommand};
use fisheye::io::{calibrate_from_paths, load_image, save_image, save_overlays};
use fisheye::{
    load_model, CalibrateOptions, CalibrationConfig, FisheyeModel, GridSize, ProjectOptions,
    UndistortOptions,
};
use log::info;
use nalgebra::Point3;
use std::path::PathBuf;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fisheye")]
#[command(about = "Fisheye camera calibration from chessboard images")]
#[command(version)]
struct Cli {
    /// Log per-image progress and solver details.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the chessboard in every image and fit K and D.
    Calibrate(CalibrateArgs),

    /// Remove lens distortion from an image.
    Undistort(UndistortArgs),

    /// Project 3D camera-frame points to pixels.
    Project(ProjectArgs),
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    /// Inner corners per chessboard row.
    #[arg(long)]
    nx: usize,

    /// Inner corners per chessboard column.
    #[arg(long)]
    ny: usize,

    /// Where to write the calibrated model (JSON).
    #[arg(long)]
    output: PathBuf,

    /// Maximum optimizer iterations.
    #[arg(long, default_value_t = 30)]
    max_iter: usize,

    /// Convergence threshold on parameter and RMS change.
    #[arg(long, default_value_t = 1e-6)]
    eps: f64,

    /// Let the solver estimate the skew coefficient.
    #[arg(long)]
    free_skew: bool,

    /// Directory for per-image corner overlays.
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Calibration images.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct UndistortArgs {
    /// Calibrated model (JSON).
    #[arg(long)]
    model: PathBuf,

    /// Distorted input image.
    #[arg(long)]
    input: PathBuf,

    /// Undistorted output image.
    #[arg(long)]
    output: PathBuf,

    /// Output width in pixels (defaults to the input width).
    #[arg(long, requires = "height")]
    width: Option<usize>,

    /// Output height in pixels (defaults to the input height).
    #[arg(long, requires = "width")]
    height: Option<usize>,

    /// Value for pixels that see nothing of the input.
    #[arg(long, default_value_t = 0)]
    border: u8,
}

#[derive(Debug, Args)]
struct ProjectArgs {
    /// Calibrated model (JSON).
    #[arg(long)]
    model: PathBuf,

    /// Skew coefficient used for the projection.
    #[arg(long, default_value_t = 0.0)]
    skew: f64,

    /// Camera-frame points as `X,Y,Z`.
    #[arg(required = true, value_parser = parse_point, allow_hyphen_values = true)]
    points: Vec<Point3<f64>>,
}

fn parse_point(s: &str) -> Result<Point3<f64>, String> {
    let coords = s
        .split(',')
        .map(|c| c.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid point {s:?}: {e}"))?;
    match coords[..] {
        [x, y, z] => Ok(Point3::new(x, y, z)),
        _ => Err(format!("invalid point {s:?}: expected X,Y,Z")),
    }
}

fn init_logging(verbose: bool) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    fisheye::core::init_tracing(verbose);
    #[cfg(not(feature = "tracing"))]
    {
        let level = if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        fisheye::core::init_with_level(level)?;
    }
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Calibrate(args) => run_calibrate(&args, cli.verbose),
        Commands::Undistort(args) => run_undistort(&args),
        Commands::Project(args) => run_project(&args),
    }
}

// ── calibrate ──────────────────────────────────────────────────────────

fn run_calibrate(args: &CalibrateArgs, verbose: bool) -> CliResult<()> {
    let mut model = FisheyeModel::new(GridSize::new(args.nx, args.ny))?.with_verbose(verbose);
    let options = CalibrateOptions {
        debug_display: args.debug_dir.is_some(),
        solver: CalibrationConfig {
            max_iter: args.max_iter,
            eps: args.eps,
            fix_skew: !args.free_skew,
            ..Default::default()
        },
        ..Default::default()
    };

    let outcome = calibrate_from_paths(&mut model, &args.images, &options)?;
    model.save(&args.output)?;
    info!("model written to {}", args.output.display());

    if let Some(dir) = &args.debug_dir {
        save_overlays(&outcome.overlays, dir)?;
        info!("{} overlays written to {}", outcome.overlays.len(), dir.display());
    }

    let k = model.camera_matrix();
    let summary = serde_json::json!({
        "rms": outcome.rms(),
        "images": outcome.reports.len(),
        "views": outcome.poses().len(),
        "iterations": outcome.result.iterations,
        "converged": outcome.result.converged,
        "K": [[k[(0, 0)], k[(0, 1)], k[(0, 2)]], [k[(1, 0)], k[(1, 1)], k[(1, 2)]], [k[(2, 0)], k[(2, 1)], k[(2, 2)]]],
        "D": model.distortion().as_slice(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// ── undistort ──────────────────────────────────────────────────────────

fn run_undistort(args: &UndistortArgs) -> CliResult<()> {
    let model = load_model(&args.model)?;
    let input = load_image(&args.input)?;
    let options = UndistortOptions {
        output_size: args.width.zip(args.height),
        border_value: args.border,
        ..Default::default()
    };
    let out = model.undistort(&input.view(), &options)?;
    save_image(&out.view(), &args.output)?;
    info!(
        "undistorted {} -> {} ({}x{})",
        args.input.display(),
        args.output.display(),
        out.width,
        out.height
    );
    Ok(())
}

// ── project ────────────────────────────────────────────────────────────

fn run_project(args: &ProjectArgs) -> CliResult<()> {
    let model = load_model(&args.model)?;
    let pixels = model
        .project(args.points.clone(), &ProjectOptions { skew: args.skew })?
        .into_flat();
    for p in pixels {
        println!("{:.6} {:.6}", p.x, p.y);
    }
    Ok(())
}
