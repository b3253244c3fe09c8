use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dicom_series_viewer::{
    DicomSeriesSource, DisplayTransform, DownsampleStrategy, Interpolation, Orientation,
    SeriesLocator, ViewLayout, ViewerConfig, ViewerSession, WindowPreset, open_input,
};

/// Browse the DICOM series of a directory or ZIP archive and render views
/// of them.
#[derive(Debug, Parser)]
#[command(name = "dicom-series-viewer", version)]
struct Cli {
    /// JSON file with viewer settings
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every series found under the input
    Scan {
        /// Directory or .zip archive
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
    /// Render windowed slices of one series to a PNG file
    View(ViewArgs),
    /// Write a reduced copy of one series for 3-D rendering
    Preview(PreviewArgs),
    /// Print the header of one slice of a series
    Info {
        #[command(flatten)]
        series: SeriesArgs,
        /// Slice position in the sorted series (default: center)
        #[arg(long)]
        slice: Option<usize>,
    },
}

#[derive(Debug, Args)]
struct SeriesArgs {
    /// Directory or .zip archive
    #[arg(value_name = "INPUT")]
    input: PathBuf,
    /// Position of the series in the scan listing
    #[arg(short, long, default_value_t = 0)]
    series: usize,
}

#[derive(Debug, Args)]
struct ViewArgs {
    #[command(flatten)]
    series: SeriesArgs,
    #[arg(long, value_enum, default_value_t = Orientation::Axial)]
    orientation: Orientation,
    /// Slice index along the orientation (default: center)
    #[arg(long, allow_negative_numbers = true)]
    index: Option<isize>,
    #[arg(long, value_enum, default_value_t = PresetArg::Default, conflicts_with_all = ["width", "center"])]
    preset: PresetArg,
    /// Custom window width, requires --center
    #[arg(long, requires = "center", allow_negative_numbers = true)]
    width: Option<f64>,
    /// Custom window center, requires --width
    #[arg(long, requires = "width", allow_negative_numbers = true)]
    center: Option<f64>,
    /// Overrides the configured layout
    #[arg(long, value_enum)]
    layout: Option<ViewLayout>,
    /// Overrides the configured interpolation
    #[arg(long, value_enum)]
    interpolation: Option<Interpolation>,
    /// Invert the displayed intensities
    #[arg(long)]
    negative: bool,
    #[arg(short, long, default_value = "view.png")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    #[command(flatten)]
    series: SeriesArgs,
    /// Keep every N-th voxel along each axis
    #[arg(long, conflicts_with = "target")]
    factor: Option<usize>,
    /// Resample to an explicit shape, e.g. 64x128x128
    #[arg(long, value_parser = parse_shape)]
    target: Option<(usize, usize, usize)>,
    #[arg(short, long, default_value = "preview")]
    output: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    Default,
    CtAbdomen,
    CtBone,
}

impl From<PresetArg> for WindowPreset {
    fn from(preset: PresetArg) -> Self {
        match preset {
            PresetArg::Default => WindowPreset::Default,
            PresetArg::CtAbdomen => WindowPreset::CtAbdomen,
            PresetArg::CtBone => WindowPreset::CtBone,
        }
    }
}

fn parse_shape(value: &str) -> Result<(usize, usize, usize), String> {
    let parts = value
        .split(['x', 'X'])
        .map(|part| part.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid shape {value:?}: {err}"))?;
    match parts[..] {
        [d, h, w] => Ok((d, h, w)),
        _ => Err(format!("expected DEPTHxHEIGHTxWIDTH, got {value:?}")),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ViewerConfig> {
    match path {
        Some(path) => ViewerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(ViewerConfig::default()),
    }
}

fn open_series(config: ViewerConfig, args: &SeriesArgs) -> Result<ViewerSession> {
    let mut session = ViewerSession::new(config);
    session
        .open_path(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let volume = session
        .select_series(args.series)
        .with_context(|| format!("failed to load series {}", args.series))?;
    info!("loaded volume of shape {:?}", volume.dim());
    Ok(session)
}

fn scan(config: ViewerConfig, input: PathBuf) -> Result<()> {
    let source =
        open_input(&input).with_context(|| format!("failed to open {}", input.display()))?;
    let locator = SeriesLocator::new(DicomSeriesSource::new(config.sort_by));
    let report = locator.scan(source.root());

    if report.series.is_empty() {
        println!("no series found under {}", input.display());
    }
    for (position, series) in report.series.iter().enumerate() {
        println!("{}", series.label(position));
        println!("    {}", series.source_directory.display());
    }
    for (directory, err) in report.skipped() {
        info!("skipped {}: {err}", directory.display());
    }
    Ok(())
}

fn view(mut config: ViewerConfig, args: ViewArgs) -> Result<()> {
    let layout = args.layout.unwrap_or(config.layout);
    if let Some(interpolation) = args.interpolation {
        config.interpolation = interpolation;
    }
    let mut session = open_series(config, &args.series)?;

    match (args.width, args.center) {
        (Some(width), Some(center)) => session.set_window(width, center)?,
        _ => session.apply_preset(args.preset.into())?,
    }
    if args.negative {
        session.set_transform(DisplayTransform::Negative);
    }

    let Some(volume) = session.volume() else {
        bail!("no volume loaded");
    };
    let index = args
        .index
        .unwrap_or_else(|| volume.center_index(args.orientation));
    info!("window {}", session.window()?);

    let image = session.render_layout(layout, args.orientation, index)?;
    image
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    info!("wrote {}", args.output.display());
    Ok(())
}

fn preview(config: ViewerConfig, args: PreviewArgs) -> Result<()> {
    let strategy = match (args.factor, args.target) {
        (Some(factor), _) => Some(DownsampleStrategy::Decimate { factor }),
        (None, Some(shape)) => Some(DownsampleStrategy::Resize { shape }),
        (None, None) => None,
    };
    let session = open_series(config, &args.series)?;
    let preview = session.render_preview(strategy)?;
    preview
        .write_to(&args.output)
        .with_context(|| format!("failed to write preview to {}", args.output.display()))?;

    info!(
        "wrote preview of shape {:?} to {}",
        preview.dim(),
        args.output.display()
    );
    Ok(())
}

fn print_info(config: ViewerConfig, series: SeriesArgs, slice: Option<usize>) -> Result<()> {
    let session = open_series(config, &series)?;
    let Some(volume) = session.volume() else {
        bail!("no volume loaded");
    };
    let slice = slice.unwrap_or(volume.dim().0 / 2);
    let metadata = session.slice_metadata(slice)?;

    let width = metadata
        .entries
        .iter()
        .map(|(keyword, _)| keyword.len())
        .max()
        .unwrap_or(0);
    for (keyword, value) in &metadata.entries {
        println!("{keyword:width$}  {value}");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Scan { input } => scan(config, input),
        Command::View(args) => view(config, args),
        Command::Preview(args) => preview(config, args),
        Command::Info { series, slice } => print_info(config, series, slice),
    }
}
