//! `gen2-visit`: issue visits and inspect frame-source logs.

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gen2_visit::config::VisitConfig;
use gen2_visit::frame_id::{decode, is_instrument_frame, visit_frame_id, visit_from_frame_id};
use gen2_visit::frame_times::{slow_requests, DEFAULT_THRESHOLD};
use gen2_visit::{VisitRequest, VisitService};

#[derive(Parser)]
#[command(name = "gen2-visit", version, about = "Multi-camera visit allocation")]
struct Cli {
    /// Configuration file (defaults to config/gen2_visit.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Allocate new visits
    Allocate {
        /// Number of visits to allocate
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Who is requesting the visit
        #[arg(long)]
        caller: Option<String>,
        /// Fiber design id to record with the visit
        #[arg(long)]
        design_id: Option<i64>,
    },
    /// Report slow frame requests from Gen2 logs (files or stdin)
    FrameTimes {
        /// Report requests slower than this many seconds
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD.as_secs_f64())]
        threshold: f64,
        /// Log files; stdin when empty
        files: Vec<PathBuf>,
    },
    /// Decode frame identifiers
    Decode {
        /// Frame identifiers, e.g. PFSA00012345
        #[arg(required = true)]
        frames: Vec<String>,
    },
    /// Load, validate and print the effective configuration
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<VisitConfig> {
    let config = match path {
        Some(path) => VisitConfig::load_from(path),
        None => VisitConfig::load(),
    };
    config.context("failed to load configuration")
}

fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn read_lines(files: &[PathBuf]) -> Result<Vec<String>> {
    if files.is_empty() {
        return io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<_>>()
            .context("failed to read stdin");
    }
    let mut lines = Vec::new();
    for path in files {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        for line in BufReader::new(file).lines() {
            lines.push(line.with_context(|| format!("failed to read {}", path.display()))?);
        }
    }
    Ok(lines)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.application.log_level, cli.json);

    match cli.command {
        Command::Allocate {
            count,
            caller,
            design_id,
        } => {
            let service = VisitService::from_config(&config)?;
            for _ in 0..count {
                let record = service
                    .get_visit(VisitRequest {
                        caller: caller.clone(),
                        design_id,
                    })
                    .await?;
                println!(
                    "visit={} exposure={} frame={}",
                    record.visit,
                    service.exposure_id(record.visit),
                    visit_frame_id(service.instrument_code(), record.visit)
                );
            }
        }
        Command::FrameTimes { threshold, files } => {
            let threshold = Duration::try_from_secs_f64(threshold)
                .context("threshold must be a non-negative number of seconds")?;
            let lines = read_lines(&files)?;
            for slow in slow_requests(&lines, threshold)? {
                println!("{slow}");
            }
        }
        Command::Decode { frames } => {
            let code = &config.frame_source.instrument_code;
            for frame in &frames {
                let (visit, subframe) = decode(frame)?;
                println!(
                    "{frame} visit={visit} subframe={subframe} own={} instrument={}",
                    visit_from_frame_id(code, frame).is_some(),
                    is_instrument_frame(frame)
                );
            }
        }
        Command::CheckConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
