use std::fmt::{Display, Write};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf, absolute};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use clap::builder::styling::Styles;
use clap::{Args, ColorChoice, Parser, Subcommand, ValueEnum, crate_version};
use clap_cargo::style::{ERROR, HEADER, INVALID, LITERAL, PLACEHOLDER, USAGE, VALID};
use dimensioned::f64prefixes::KILO;
use dimensioned::si::{M, Meter};
use motogpx::library::{IngestOptions, LibraryStore, MemoryStore, ingest_paths};
use motogpx::measure::{Kilometer, Mile, WholeMeter};
use motogpx::report::{format_riding_time, import_report, inspect_report};
use motogpx::routing::Strategy;
use motogpx::{DocumentMetrics, GpxDocument, MotoGpxError, ValidationReport, normalize_gpx};
use serde::Serialize;
use strum::{Display, IntoEnumIterator};
use sys_locale::get_locale;
use tracing::level_filters::LevelFilter;
use tracing::{Level, debug, info, instrument, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry, fmt};

pub const CLAP_STYLING: Styles = Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

static LONG_VERSION: LazyLock<String> =
    LazyLock::new(|| format!("{} (rustc {})", crate_version!(), env!("RUSTC_VERSION")));

/// Normalize GPX files for a motorcycle route library
///
/// Parses GPX 1.0 and 1.1 files, including vendor route and track point
/// extensions, and rewrites them as canonical GPX 1.0 with waypoints and
/// tracks. Reports length, riding time and waypoint count for each file.
#[derive(Parser)]
#[command(
    name = "motogpx",
    version,
    long_version = LONG_VERSION.as_str(),
    about,
    color = ColorChoice::Auto,
    styles = CLAP_STYLING,
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,

    /// Diagnostic logging level
    ///
    /// WARN reports skipped points and failed imports, INFO each file
    /// written, and DEBUG adds a timing tree of the parse and normalize
    /// steps after the command finishes.
    #[clap(long, short = 'L', default_value_t = Level::ERROR)]
    log_level: Level,

    /// Log to a file
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// The unit of distance used in output on the command line.
    ///
    /// If unspecified, this will default to either km or mi based on your
    /// system locale.
    #[clap(long, short = 'u', default_value_t = DistUnit::Autodetect)]
    distance_unit: DistUnit,
}

#[derive(Copy, Clone, Display, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
#[clap(rename_all = "kebab-case")]
enum DistUnit {
    Autodetect,
    M,
    Km,
    Mi,
}

impl DistUnit {
    fn get(self) -> DistUnit {
        match self {
            Self::Autodetect => Self::auto_detect(),
            _ => self,
        }
    }

    fn auto_detect() -> DistUnit {
        let locale = get_locale().unwrap_or_else(|| String::from("en-US"));
        match locale.as_str() {
            "en-US" | "en-GB" => Self::Mi,
            _ => Self::Km,
        }
    }
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    /// GPX input path
    input: PathBuf,

    /// Normalized GPX output path
    ///
    /// If unspecified, defaults to <INPUT>.normalized.gpx in the same
    /// directory as the input file.
    #[clap(long, short)]
    output: Option<PathBuf>,

    /// Force overwriting the output file, if it already exists.
    #[clap(long, short, action)]
    force: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// GPX input paths
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Name of a folder to import the files into
    #[clap(long)]
    folder: Option<String>,

    /// Maximum accepted file size, in megabytes
    #[clap(long, default_value_t = 20)]
    max_size_mb: usize,

    /// Average speed in kilometers per hour, for riding time estimates
    #[clap(long, short, default_value_t = motogpx::geographic::DEFAULT_CRUISING_SPEED_KMH)]
    speed: f64,

    /// Directory to write the normalized content of imported files to
    #[clap(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// GPX input path
    input: PathBuf,

    /// Print the parsed document, validation and metrics as JSON
    #[clap(long, action)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a GPX file to canonical GPX 1.0
    ///
    /// Routes are converted to straight tracks when the file has no tracks,
    /// and waypoints stored in vendor route extensions are recovered when it
    /// has no waypoints.
    Normalize(NormalizeArgs),

    /// Import GPX files into an in-memory library and report the results
    ///
    /// Every file is validated, normalized and measured independently; a
    /// broken file doesn't stop the others from being imported.
    Import(ImportArgs),

    /// Parse and validate a GPX file without converting it
    Inspect(InspectArgs),

    /// List the available routing strategies
    Strategies,

    /// Print software license info
    License,
}

fn read_input(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .context("Reading the GPX <INPUT> file. Check that it exists and can be accessed.")?;
    info!("Opened GPX input file: {:?}", absolute(path)?);
    Ok(content)
}

#[instrument(level = "trace", skip_all)]
fn normalize_cmd(args: &Cli, sub_args: &NormalizeArgs) -> Result<String> {
    debug!("normalize args: {:?}", sub_args);

    let xml = read_input(&sub_args.input)?;
    let res = normalize_gpx(&xml);
    let normalized = match &res {
        Err(MotoGpxError::Gpx(_)) => {
            res.context("The <INPUT> is not a valid GPX file. Check that it is correct.")
        }
        _ => res.map_err(anyhow::Error::from),
    }?;

    if !normalized.validation.valid {
        bail!(
            "The <INPUT> GPX file is incomplete: {}",
            normalized.validation
        );
    }

    let output = match &sub_args.output {
        Some(p) => p,
        None => &sub_args.input.with_extension("normalized.gpx"),
    };

    if output.exists() {
        if !sub_args.force {
            bail!(
                "{:?} already exists. Pass --force to overwrite it.",
                output
            );
        }
        warn!("Overwriting {:?}", output);
    }
    let mut gpx_file = File::create(output).context("Creating the <OUTPUT> file")?;
    gpx_file
        .write_all(normalized.content.as_bytes())
        .context("Writing the normalized GPX to the <OUTPUT> file")?;
    info!("Wrote normalized GPX file: {:?}", absolute(output)?);

    let mut r = match args.distance_unit.get() {
        DistUnit::M => metrics_summary::<WholeMeter<f64>>(&normalized.metrics),
        DistUnit::Mi => metrics_summary::<Mile<f64>>(&normalized.metrics),
        _ => metrics_summary::<Kilometer<f64>>(&normalized.metrics),
    };
    writeln!(
        &mut r,
        "\nOutput is in {}",
        absolute(output)
            .unwrap_or(output.to_path_buf())
            .to_string_lossy()
    )?;
    Ok(r)
}

fn metrics_summary<T>(metrics: &DocumentMetrics) -> String
where
    T: From<Meter<f64>> + Display,
{
    format!(
        "Length: {}\nWaypoints: {}\nRiding time: {}\n",
        T::from(metrics.length_km * KILO * M),
        metrics.waypoint_count,
        format_riding_time(metrics.riding_time_hours)
    )
}

#[instrument(level = "trace", skip_all)]
fn import_cmd(args: &Cli, sub_args: &ImportArgs) -> Result<String> {
    debug!("import args: {:?}", sub_args);

    if sub_args.speed < 1.0 {
        bail!("Speed must be at least 1 km/h");
    }

    let mut store = MemoryStore::new();
    let folder_id = match &sub_args.folder {
        Some(name) => Some(store.create_folder(name, None)?),
        None => None,
    };
    let options = IngestOptions::default()
        .with_max_file_size(sub_args.max_size_mb.saturating_mul(1024 * 1024))
        .with_cruising_speed_kmh(sub_args.speed);

    let outcome = ingest_paths(&mut store, &sub_args.inputs, folder_id, &options);

    if let Some(dir) = &sub_args.output_dir {
        fs::create_dir_all(dir).context("Creating the output directory")?;
        for success in &outcome.success {
            let record = store.gpx_file(success.id)?;
            let path = dir.join(format!("{}.gpx", record.name));
            fs::write(&path, record.content)
                .with_context(|| format!("Writing normalized GPX to {:?}", path))?;
            info!("Wrote normalized GPX file: {:?}", absolute(&path)?);
        }
    }

    Ok(match args.distance_unit.get() {
        DistUnit::M => import_report::<WholeMeter<f64>, _>(&outcome, &store),
        DistUnit::Mi => import_report::<Mile<f64>, _>(&outcome, &store),
        _ => import_report::<Kilometer<f64>, _>(&outcome, &store),
    }?)
}

#[derive(Serialize)]
struct InspectOutput<'a> {
    document: &'a GpxDocument,
    validation: &'a ValidationReport,
    metrics: &'a DocumentMetrics,
}

#[instrument(level = "trace", skip_all)]
fn inspect_cmd(args: &Cli, sub_args: &InspectArgs) -> Result<String> {
    debug!("inspect args: {:?}", sub_args);

    let xml = read_input(&sub_args.input)?;
    let document = motogpx::parse(&xml)
        .context("The <INPUT> is not a valid GPX file. Check that it is correct.")?;
    let validation = motogpx::validate(&document);
    let metrics = DocumentMetrics::from_document(&document);

    if sub_args.json {
        let mut r = serde_json::to_string_pretty(&InspectOutput {
            document: &document,
            validation: &validation,
            metrics: &metrics,
        })?;
        r.push('\n');
        return Ok(r);
    }

    Ok(match args.distance_unit.get() {
        DistUnit::M => inspect_report::<WholeMeter<f64>>(&document, &validation, &metrics),
        DistUnit::Mi => inspect_report::<Mile<f64>>(&document, &validation, &metrics),
        _ => inspect_report::<Kilometer<f64>>(&document, &validation, &metrics),
    }?)
}

fn strategies_cmd() -> Result<String> {
    let mut r = String::new();
    for strategy in Strategy::iter() {
        writeln!(
            &mut r,
            "{:<18} {} ({:.0} km/h)\n{:<18} {}",
            strategy.to_string(),
            strategy.display_name(),
            strategy.speed_kmh(),
            "",
            strategy.description()
        )?;
    }
    Ok(r)
}

fn license_cmd() -> Result<String> {
    Ok(include_str!("../../LICENSE.txt").to_string())
}

fn main() -> Result<()> {
    // Intentionally avoid wrapping argument parsing errors in anyhow::Result so
    // we preserve Clap's pretty formatting of usage info.
    let args = Cli::parse();

    let log_w: Box<dyn std::io::Write + Send> = match &args.log_file {
        Some(path) => Box::new(File::create(path).context("Creating the log file")?),
        None => Box::new(std::io::stderr()),
    };
    let (appender, _guard) = tracing_appender::non_blocking(log_w);

    // Enable the TRACE-level span tree layer for fmt logging level DEBUG.
    let fmt_layer = fmt::Layer::new()
        .with_writer(appender)
        .with_ansi(args.log_file.is_none())
        .with_target(false)
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .with_filter(LevelFilter::from_level(args.log_level));
    if args.log_level >= Level::DEBUG {
        let span_tree_layer = tracing_span_tree::SpanTree::default().aggregate(true);
        tracing::subscriber::set_global_default(
            Registry::default().with(fmt_layer).with(span_tree_layer),
        )?;
    } else {
        tracing::subscriber::set_global_default(Registry::default().with(fmt_layer))?;
    }

    debug!("motogpx {}", clap::crate_version!());

    let report = match &args.cmd {
        Commands::Normalize(sub_args) => normalize_cmd(&args, sub_args),
        Commands::Import(sub_args) => import_cmd(&args, sub_args),
        Commands::Inspect(sub_args) => inspect_cmd(&args, sub_args),
        Commands::Strategies => strategies_cmd(),
        Commands::License => license_cmd(),
    }?;

    print!("{report}");
    Ok(())
}
