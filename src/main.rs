//! depot-sched entry point: CLI wiring and config-driven runs.

mod cli;

use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use depot_sched::config::RunConfig;
use depot_sched::io::export::export_outputs;
use depot_sched::io::sessions::{read_sessions, write_records};
use depot_sched::sim::engine::Engine;
use depot_sched::sim::optimizer::SolveControl;
use depot_sched::synth::{SynthParams, generate_sessions};

use cli::{Cli, Command, GenerateArgs, RunArgs};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolves the configuration from `--config`/`--preset` plus CLI overrides.
fn load_config(args: &RunArgs) -> Result<RunConfig> {
    let mut cfg = match (&args.config, &args.preset) {
        (Some(path), _) => RunConfig::from_toml_file(path)?,
        (None, Some(name)) => RunConfig::from_preset(name)?,
        (None, None) => RunConfig::default_depot(),
    };
    if let Some(kw) = args.max_power {
        cfg.depot.max_total_power_kw = kw;
    }
    if let Some(minutes) = args.step_minutes {
        cfg.grid.step_minutes = minutes;
    }
    if let Some(chargers) = args.max_chargers {
        cfg.depot.max_concurrent_chargers = Some(chargers);
    }

    let errors = cfg.validate();
    if !errors.is_empty() {
        let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("invalid configuration:\n  {}", lines.join("\n  "));
    }
    Ok(cfg)
}

fn run(args: &RunArgs) -> Result<()> {
    let cfg = load_config(args)?;
    let sessions = read_sessions(&args.sessions)
        .with_context(|| format!("loading sessions from {}", args.sessions.display()))?;
    let grid = cfg.grid_for(&sessions).context("building the planning grid")?;

    let mut control = SolveControl::none();
    if let Some(budget) = cfg.deadline() {
        control = control.with_deadline(Instant::now() + budget);
    }

    let outcome = Engine::new(
        &sessions,
        &grid,
        cfg.capacity(),
        cfg.policies(),
        cfg.solver_settings(),
    )
    .with_tariff(cfg.tariff.clone())
    .run(&control)?;

    println!("{}", outcome.report);

    let written = export_outputs(&args.out_dir, &outcome)
        .with_context(|| format!("writing outputs to {}", args.out_dir.display()))?;
    for path in &written {
        info!(path = %path.display(), "wrote");
    }
    Ok(())
}

fn generate(args: &GenerateArgs) -> Result<()> {
    let defaults = SynthParams::default();
    let params = SynthParams {
        start: args.start.unwrap_or(defaults.start),
        hours: args.hours,
        sessions: args.sessions,
        seed: args.seed,
    };
    let records = generate_sessions(&params)?;

    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file =
        File::create(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    write_records(&records, BufWriter::new(file))?;
    info!(
        sessions = records.len(),
        path = %args.out.display(),
        "wrote synthetic sessions"
    );
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.command {
        Command::Run(args) => run(args),
        Command::Generate(args) => generate(args),
    }
}
