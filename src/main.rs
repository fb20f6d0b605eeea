use clap::{Args, Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use store_dump::cli::{dump_sources, listen_for_shutdown, open_output};
use store_dump::config::{OutputMode, RunParams, Settings, SourceKind, StartSpec};
use store_dump::etl::EndReason;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Store Dump: --{sdump}-> pours hosted tables and event streams out as NDJSON
#[derive(Parser)]
#[command(name = "sdump", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source endpoints and credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// YAML settings file (defaults to sdump.yml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Stop after this many records
    #[arg(short = 'n', long = "limit")]
    limit: Option<u64>,

    /// Seconds to wait between calls
    #[arg(short, long, value_parser = parse_delay)]
    delay: Option<Duration>,

    /// Write each record's native bytes instead of decoded JSON
    #[arg(long)]
    raw: bool,

    /// Transform applied after decoding, e.g. "base64-json:Data" (repeatable)
    #[arg(short, long = "transform")]
    transforms: Vec<String>,

    /// Write records to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump every item of one or more tables
    Table {
        /// Table names
        #[arg(required = true)]
        names: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Dump the records of one or more streams
    Stream {
        /// Stream names
        #[arg(required = true)]
        names: Vec<String>,

        /// Keep polling for new records once caught up
        #[arg(short, long)]
        follow: bool,

        /// Start at a date or time: YYYY-MM-DD[THH[:MM[:SS]]]
        #[arg(long, conflicts_with = "since")]
        start: Option<String>,

        /// Start this far back: INT[smhd]
        #[arg(long)]
        since: Option<String>,

        /// Shard to read when the stream has several
        #[arg(long)]
        shard: Option<String>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

fn parse_delay(text: &str) -> Result<Duration, String> {
    let seconds: f64 = text
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", text))?;
    if seconds <= 0.0 {
        return Err("delay must be greater than zero".to_string());
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| e.to_string())
}

fn build_runs(
    names: Vec<String>,
    kind: SourceKind,
    common: &CommonArgs,
    configure: impl Fn(&mut RunParams),
) -> Vec<RunParams> {
    names
        .into_iter()
        .map(|name| {
            let mut params = RunParams::new(name, kind);
            params.record_limit = common.limit;
            params.base_delay = common.delay;
            params.output_mode = match common.raw {
                true => OutputMode::RawPassthrough,
                false => OutputMode::Structured,
            };
            params.transforms = common.transforms.clone();
            configure(&mut params);
            params
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_loaded = dotenvy::from_filename(&cli.env);

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match env_loaded {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => log::debug!("No env file at {}", cli.env),
        Err(e) => return Err(e.into()),
    }

    let settings = Settings::load(cli.config.as_deref())?;

    let (runs, output) = match cli.command {
        Commands::Table { names, common } => {
            let listed = names.join(", ");
            log::info!("Dumping table(s): {}", listed.cyan());
            let runs = build_runs(names, SourceKind::Table, &common, |_| {});
            (runs, common.output)
        }
        Commands::Stream {
            names,
            follow,
            start,
            since,
            shard,
            common,
        } => {
            let start = match (start, since) {
                (Some(start), _) => Some(StartSpec::parse_start(&start)?),
                (None, Some(since)) => Some(StartSpec::parse_since(&since)?),
                (None, None) => None,
            };
            let listed = names.join(", ");
            log::info!(
                "Dumping stream(s): {}{}",
                listed.cyan(),
                match follow {
                    true => " (following)",
                    false => "",
                }
            );
            let runs = build_runs(names, SourceKind::Stream, &common, |params| {
                params.follow = follow;
                params.start = start.clone();
                params.shard = shard.clone();
            });
            (runs, common.output)
        }
    };

    let output = open_output(output.as_deref())?;
    let cancel = CancellationToken::new();
    listen_for_shutdown(cancel.clone());

    let summaries = dump_sources(runs, settings, output, cancel).await?;
    let total: u64 = summaries.iter().map(|s| s.emitted).sum();
    log::info!("✓ Dumped {} record(s) in total", total);

    if summaries.iter().any(|s| s.end == EndReason::Cancelled) {
        std::process::exit(130);
    }
    Ok(())
}
