//! Scheduler entry point (spec §6 "CLI surface (minimal)"): wires a
//! storage backend, an optimizer, a tunable template, and a pool of
//! trial runners from a JSON config file, then drives the `Scheduler`
//! loop to convergence or a trial cap.

mod config;

use ab_environment::{SyntheticConfig, SyntheticEnvironment, TrialRunner};
use ab_scheduler::{Scheduler, SchedulerConfig};
use ab_storage::{InMemoryStorage, SqliteStorage, Storage};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "autobench", about = "Benchmark-driven configuration optimizer scheduler")]
struct Cli {
    /// Root scheduler config (experiment, tunable groups, objectives,
    /// optimizer, storage, runners).
    #[arg(long)]
    config: PathBuf,

    /// Global-config overlay file(s), later files override earlier ones.
    #[arg(long = "globals")]
    globals: Vec<PathBuf>,

    /// Tunable-value seed file(s) for the first scheduled trial, applied
    /// in order.
    #[arg(long = "tunable-values")]
    tunable_values: Vec<PathBuf>,

    /// Overrides the config file's trial repeat count.
    #[arg(long)]
    trial_config_repeat_count: Option<u32>,

    /// Overrides the config file's trial cap (`0` means unbounded).
    #[arg(long)]
    max_trials: Option<i64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "autobench exited with a fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let raw = config::load_scheduler_config(&cli.config)?;

    let template = config::build_tunable_groups(raw.tunable_groups).context("building tunable groups")?;
    let objectives = raw.objectives;

    // An empty --tunable-values list leaves the first trial to the
    // optimizer's own start-with-defaults handling.
    let seed_tunables = if cli.tunable_values.is_empty() {
        None
    } else {
        let mut tg = template.deep_copy();
        for path in &cli.tunable_values {
            config::apply_tunable_value_file(&mut tg, path)?;
        }
        Some(tg)
    };

    let global_config = config::load_globals(&cli.globals).context("loading --globals overlay")?;

    let storage: Box<dyn Storage> = match raw.storage {
        config::RawStorageConfig::Memory => Box::new(InMemoryStorage::new()),
        config::RawStorageConfig::Sqlite { path } => {
            Box::new(SqliteStorage::open(&path).with_context(|| format!("opening sqlite storage at '{path}'"))?)
        }
    };

    let optimizer = raw
        .optimizer
        .build(&template, &objectives)
        .context("building optimizer from config")?;

    let runners: Vec<TrialRunner> = raw
        .runners
        .iter()
        .map(|r| {
            let synthetic_config = SyntheticConfig {
                metrics: r.metrics.clone(),
                seed: r.seed,
                noise_std: r.noise_std,
                range: r.range,
            };
            TrialRunner::new(r.id.clone(), Box::new(SyntheticEnvironment::new(r.id.clone(), synthetic_config)))
        })
        .collect();

    let mut scheduler_config = SchedulerConfig::new(raw.experiment_id, raw.root_env_config)
        .with_description(raw.description)
        .with_start_trial_id(raw.start_trial_id)
        .with_do_teardown(raw.do_teardown);
    if let Some(count) = cli.trial_config_repeat_count {
        scheduler_config = scheduler_config.with_trial_config_repeat_count(count);
    }
    if let Some(max_trials) = cli.max_trials {
        scheduler_config = scheduler_config.with_max_trials(max_trials);
    }

    let mut scheduler = Scheduler::new(storage, optimizer, runners, template, objectives, scheduler_config, global_config);
    if let Some(seed_tunables) = seed_tunables {
        scheduler = scheduler.with_seed_tunables(seed_tunables);
    }

    scheduler.start().context("scheduler loop")?;

    if let Some((scores, tunables)) = scheduler.get_best_observation() {
        tracing::info!(?scores, config = %tunables.to_canonical_string(), "best observation");
    } else {
        tracing::info!("no successful trial was observed");
    }

    Ok(())
}
