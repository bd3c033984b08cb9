//! 起点 / 割当終点ペアのルート解析をチャンク分割して並列に解く
//!
//! ルート計算は `--solver` で指定した外部プロセス（JSON lines プロトコル）が担う。
//! ログは stderr に `LEVEL | message` 形式で出力し、最終結果は stdout に JSON で出す。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser as _;
use clap::builder::BoolishValueParser;
use route_pairs_core::engine::{ProcessEngine, ProcessEngineConfig, RoutingEngine};
use route_pairs_core::settings::{
    AnalysisSettings, DistanceUnits, NetworkSource, TimeUnits, TravelDirection, parse_time_of_day,
};
use route_pairs_core::{BatchConfig, BatchRequest, EventSink, LogSink, RoutePairBatch};

#[derive(clap::Parser, Debug)]
#[command(about = "solve a large origin/assigned-destination route analysis in parallel chunks")]
struct Cli {
    /// Origins table (JSON lines, optionally .gz)
    #[arg(long)]
    origins: PathBuf,

    /// Unique ID field in origins
    #[arg(long = "origins-id-field")]
    origin_id_field: String,

    /// Field in origins holding the assigned destination ID
    #[arg(long)]
    assigned_dest_field: String,

    /// Destinations table (JSON lines, optionally .gz)
    #[arg(long)]
    destinations: PathBuf,

    /// Unique ID field in destinations
    #[arg(long = "destinations-id-field")]
    dest_id_field: String,

    /// Network dataset path or routing service URL
    #[arg(long)]
    network_data_source: String,

    /// Travel mode name or its JSON representation
    #[arg(long)]
    travel_mode: String,

    /// Time units used in the output (Days, Hours, Minutes, Seconds)
    #[arg(long)]
    time_units: String,

    /// Distance units used in the output (Kilometers, Meters, Miles, Yards, Feet, NauticalMiles)
    #[arg(long)]
    distance_units: String,

    /// Maximum number of routes in one chunk
    #[arg(long)]
    max_routes: usize,

    /// Maximum number of parallel solver workers
    #[arg(long)]
    max_processes: usize,

    /// Travel from destination to origin instead
    #[arg(
        long,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    reverse_direction: bool,

    /// Combined output routes table
    #[arg(long)]
    out_routes: PathBuf,

    /// Folder for intermediate per-job outputs
    #[arg(long)]
    scratch_folder: PathBuf,

    /// Time of day in "%Y%m%d %H:%M" format; omit for time neutral
    #[arg(long)]
    time_of_day: Option<String>,

    /// Barrier tables (may be repeated)
    #[arg(long = "barriers", num_args = 1..)]
    barriers: Vec<PathBuf>,

    /// Solver executable speaking the JSON lines protocol (a bare name is looked up on PATH)
    #[arg(long)]
    solver: PathBuf,

    /// Extra argument passed to the solver (may be repeated)
    #[arg(long = "solver-arg", allow_hyphen_values = true)]
    solver_args: Vec<String>,

    /// TOML file with solver property overrides and cleanup policy
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit debug-level messages
    #[arg(long, short)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level),
    );
    builder
        .format(|buf, record| writeln!(buf, "{} | {}", record.level(), record.args()))
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Stderr);
    builder.init();
}

fn build_settings(cli: &Cli) -> Result<AnalysisSettings> {
    Ok(AnalysisSettings {
        network: NetworkSource::new(cli.network_data_source.clone()),
        travel_mode: cli.travel_mode.clone(),
        time_units: cli.time_units.parse::<TimeUnits>()?,
        distance_units: cli.distance_units.parse::<DistanceUnits>()?,
        time_of_day: parse_time_of_day(cli.time_of_day.as_deref())?,
        direction: TravelDirection::from_reverse_flag(cli.reverse_direction),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // 素の名前は PATH から探させる
    if cli.solver.components().count() > 1 && !cli.solver.is_file() {
        bail!("solver binary not found: {}", cli.solver.display());
    }
    if cli.out_routes.as_os_str() == "-" {
        bail!("--out-routes must be a file path (stdout carries the run summary)");
    }

    let config = match &cli.config {
        Some(path) => BatchConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BatchConfig::default(),
    };
    let settings = build_settings(&cli)?;

    let engine: Arc<dyn RoutingEngine> = Arc::new(ProcessEngine::new(
        ProcessEngineConfig {
            path: cli.solver.clone(),
            args: cli.solver_args.clone(),
            reply_timeout: config.reply_timeout(),
        },
        settings.network.clone(),
    ));

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel_clone = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nCancelling route calculation...");
            cancel_clone.store(true, Ordering::Relaxed);
        })
        .ok();
    }

    let request = BatchRequest {
        origins: cli.origins,
        origin_id_field: cli.origin_id_field,
        assigned_dest_field: cli.assigned_dest_field,
        destinations: cli.destinations,
        dest_id_field: cli.dest_id_field,
        barriers: cli.barriers,
        settings,
        max_routes: cli.max_routes,
        max_processes: cli.max_processes,
        out_routes: cli.out_routes,
        scratch_folder: cli.scratch_folder,
        config,
    };
    let sink: Arc<dyn EventSink> = Arc::new(LogSink);

    let start = Instant::now();
    let outcome = RoutePairBatch::new(request, engine, sink)
        .with_cancel_flag(cancel)
        .run()?;
    log::info!(
        target: route_pairs_core::event::LOG_TARGET,
        "Parallel Route calculation completed in {:.2} minutes",
        minutes(start.elapsed())
    );

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn minutes(d: Duration) -> f64 {
    d.as_secs_f64() / 60.0
}
