//! Command-line arguments.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args, Parser, Subcommand};

use depot_sched::session::parse_timestamp;

#[derive(Debug, Parser)]
#[command(name = "depot-sched")]
#[command(version, about = "EV depot charging scheduler")]
#[command(
    long_about = "Schedules EV depot charging under a shared power ceiling.\n\
    \nFor each of three risk postures (conservative, expected, aggressive) it\n\
    solves a linear program for a per-vehicle power schedule and compares the\n\
    resulting load curve with uncontrolled charge-on-arrival.\n\
    \nExamples:\n  \
    depot-sched generate --out data/sessions.csv\n  \
    depot-sched run --sessions data/sessions.csv\n  \
    depot-sched run --sessions data/sessions.csv --preset tight_depot --out-dir outputs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Optimize a session file and write schedules, load curves and a summary
    Run(RunArgs),
    /// Write a synthetic session file
    Generate(GenerateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Session CSV to schedule
    #[arg(long)]
    pub sessions: PathBuf,

    /// TOML configuration file
    #[arg(long, conflicts_with = "preset")]
    pub config: Option<PathBuf>,

    /// Built-in configuration (default, tight_depot)
    #[arg(long)]
    pub preset: Option<String>,

    /// Override depot.max_total_power_kw
    #[arg(long)]
    pub max_power: Option<f64>,

    /// Override grid.step_minutes
    #[arg(long)]
    pub step_minutes: Option<i64>,

    /// Override depot.max_concurrent_chargers
    #[arg(long)]
    pub max_chargers: Option<usize>,

    /// Directory for CSV and JSON outputs
    #[arg(long, default_value = "outputs")]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Destination CSV
    #[arg(long)]
    pub out: PathBuf,

    /// Number of sessions
    #[arg(long, default_value_t = 140)]
    pub sessions: usize,

    /// Random seed
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Horizon start, a date or timestamp (default 2026-02-17)
    #[arg(long, value_parser = parse_start)]
    pub start: Option<NaiveDateTime>,

    /// Horizon length in hours
    #[arg(long, default_value_t = 24)]
    pub hours: u32,
}

fn parse_start(raw: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(raw)
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("cannot parse \"{raw}\" as a date or timestamp"))
}
