//! etfsync CLI: archive population and daily incremental sync.
//!
//! Commands:
//! - `bulk-load`: fetch full history for instruments that have no store yet
//! - `incremental-update`: paced, quota-limited sync of every existing store
//! - `status`: per-store row counts and date ranges, plus missing stores
//!
//! Exit status: 0 completed, 3 run quota reached, 4 circuit breaker tripped,
//! 1 on any fatal error (and on bulk loads with failed instruments).

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use etfsync_core::data::{load_codes, BarStore};
use etfsync_core::domain::{InstrumentCode, InstrumentList};
use etfsync_runner::{
    BatchRunController, BulkLoader, BulkOutcome, PacingProfile, RunOutcome, SyncAttemptResult,
    SyncConfig, SyncEngine, ThreadSleeper,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "etfsync",
    about = "etfsync: incremental daily bar archive for exchange-traded funds",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Run date (YYYY-MM-DD). Defaults to the local date.
    #[arg(long, global = true)]
    today: Option<String>,

    /// Store directory, overriding the config.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Instrument list file, overriding the config.
    #[arg(long, global = true)]
    codes: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate full history for instruments without a store.
    BulkLoad {
        /// Only these codes instead of the instrument list file.
        #[arg(value_name = "CODE")]
        only: Vec<String>,

        /// Worker threads.
        #[arg(long)]
        workers: Option<usize>,

        /// Index of the provider to load from.
        #[arg(long)]
        provider: Option<usize>,

        /// Replace stores that already exist.
        #[arg(long, default_value_t = false)]
        overwrite: bool,

        /// Write a JSON report to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Append new bars to every existing store, one instrument at a time.
    IncrementalUpdate {
        /// Jitter profile between instruments.
        #[arg(long, value_enum)]
        profile: Option<Profile>,

        /// Successful syncs allowed in this run.
        #[arg(long)]
        quota: Option<u32>,

        /// Consecutive failures that abort the run.
        #[arg(long)]
        threshold: Option<u32>,

        /// Attempts per instrument across the provider chain.
        #[arg(long)]
        attempts: Option<u32>,

        /// Seed for reproducible jitter.
        #[arg(long)]
        seed: Option<u64>,

        /// Write a JSON report to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show what the archive holds.
    Status {
        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Light,
    Defensive,
}

impl From<Profile> for PacingProfile {
    fn from(p: Profile) -> Self {
        match p {
            Profile::Light => PacingProfile::Light,
            Profile::Defensive => PacingProfile::Defensive,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = &cli.log_level;
                format!("etfsync={level},etfsync_core={level},etfsync_runner={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(dir) = cli.store_dir {
        config.store_dir = dir;
    }
    if let Some(codes) = cli.codes {
        config.codes_file = codes;
    }
    let today = parse_today(cli.today.as_deref())?;

    match cli.command {
        Commands::BulkLoad {
            only,
            workers,
            provider,
            overwrite,
            report,
        } => {
            if let Some(workers) = workers {
                config.bulk.workers = workers;
            }
            if let Some(provider) = provider {
                config.bulk.provider = provider;
            }
            config.bulk.overwrite |= overwrite;
            config.validate()?;
            run_bulk_load(&config, today, &only, report)
        }
        Commands::IncrementalUpdate {
            profile,
            quota,
            threshold,
            attempts,
            seed,
            report,
        } => {
            if let Some(profile) = profile {
                config.apply_profile(profile.into());
            }
            if let Some(quota) = quota {
                config.limits.run_quota = quota;
            }
            if let Some(threshold) = threshold {
                config.limits.circuit_breaker_threshold = threshold;
            }
            if let Some(attempts) = attempts {
                config.retry.attempts = attempts;
            }
            if seed.is_some() {
                config.pacing.seed = seed;
            }
            config.validate()?;
            run_incremental(&config, today, report)
        }
        Commands::Status { json } => run_status(&config, json),
    }
}

fn parse_today(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid --today '{s}', expected YYYY-MM-DD")),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn run_bulk_load(
    config: &SyncConfig,
    today: NaiveDate,
    only: &[String],
    report_path: Option<PathBuf>,
) -> Result<u8> {
    let codes = if only.is_empty() {
        load_codes(&config.codes_file)?
    } else {
        InstrumentList::parse(only.iter().map(String::as_str))?
    };

    let chain = config.build_chain()?;
    let Some(provider) = chain.get(config.bulk.provider) else {
        bail!("bulk.provider index {} out of range", config.bulk.provider);
    };
    let store = BarStore::new(&config.store_dir);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("interrupt received, finishing in-flight instruments");
        }
    })
    .context("failed to install interrupt handler")?;

    let report = BulkLoader::new(&store, provider, config.bulk.workers)
        .with_epoch(config.epoch)
        .with_overwrite(config.bulk.overwrite)
        .with_cancel(cancel)
        .run(&codes, today)?;

    for result in &report.results {
        if let BulkOutcome::Failed { error } = &result.outcome {
            eprintln!("Error for {}: {error}", result.code);
        }
    }
    println!(
        "Bulk load: {} created, {} already present, {} empty, {} failed, {} cancelled",
        report.count("created"),
        report.count("already_exists"),
        report.count("empty_response"),
        report.failed(),
        report.count("cancelled"),
    );

    if let Some(path) = report_path {
        report.save_json(&path)?;
        println!("Report saved to: {}", path.display());
    }

    Ok(if report.failed() > 0 { 1 } else { 0 })
}

fn run_incremental(config: &SyncConfig, today: NaiveDate, report_path: Option<PathBuf>) -> Result<u8> {
    let codes = load_codes(&config.codes_file)?;
    let chain = config.build_chain()?;
    let policy = config.retry_policy();
    let store = BarStore::new(&config.store_dir);
    let sleeper = ThreadSleeper;
    let ctx = config.run_context(today);

    let engine = SyncEngine::new(&store, &chain, &policy, &sleeper).with_epoch(config.epoch);
    let mut controller =
        BatchRunController::new(engine, config.jitter(), config.run_limits(), &sleeper);
    let report = controller.run(&codes, &ctx);

    println!("Run {} ({})", report.run_id, report.run_date);
    println!(
        "  processed {} of {}: {} updated, {} up to date, {} current, {} empty, {} skipped, {} failed",
        report.state.total_processed,
        codes.len(),
        report.count("success"),
        report.count("up_to_date"),
        report.count("already_current"),
        report.count("empty_response"),
        report.count("skipped"),
        report.count("source_exhausted"),
    );
    for r in &report.results {
        if let SyncAttemptResult::StoreUnreadable { reason } = &r.result {
            println!("  {} unreadable, needs bulk-load: {reason}", r.code);
        }
    }
    match report.outcome {
        RunOutcome::Completed => println!("  completed"),
        RunOutcome::QuotaReached => println!(
            "  stopped: run quota of {} reached, {} instruments left for the next run",
            config.limits.run_quota,
            report.remaining.len()
        ),
        RunOutcome::CircuitBreakerTripped => println!(
            "  stopped: {} consecutive failures, source is likely blocking; {} instruments left",
            report.state.consecutive_failure_streak,
            report.remaining.len()
        ),
    }

    if let Some(path) = report_path {
        report.save_json(&path)?;
        println!("Report saved to: {}", path.display());
    }

    Ok(report.outcome.exit_code())
}

fn run_status(config: &SyncConfig, json: bool) -> Result<u8> {
    let store = BarStore::new(&config.store_dir);
    let stored = store.list_codes()?;

    let mut summaries = Vec::new();
    let mut unreadable = Vec::new();
    for code in &stored {
        match store.summary(code) {
            Ok(summary) => summaries.push(summary),
            Err(e) => unreadable.push((code.clone(), e.to_string())),
        }
    }

    // A missing list is not fatal here; status still reports the store.
    let missing: Vec<InstrumentCode> = match load_codes(&config.codes_file) {
        Ok(list) => list
            .iter()
            .filter(|c| stored.binary_search(*c).is_err())
            .cloned()
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "instrument list unavailable");
            Vec::new()
        }
    };

    if json {
        let out = serde_json::json!({
            "store_dir": config.store_dir,
            "stores": summaries,
            "unreadable": unreadable
                .iter()
                .map(|(code, reason)| serde_json::json!({ "code": code, "reason": reason }))
                .collect::<Vec<_>>(),
            "missing": missing,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(0);
    }

    if !config.store_dir.exists() {
        println!("Store directory does not exist: {}", config.store_dir.display());
        return Ok(0);
    }

    println!("Store: {}", config.store_dir.display());
    println!("{:<8} {:>7}  {:<10}  {:<10}", "code", "rows", "first", "last");
    for s in &summaries {
        println!(
            "{:<8} {:>7}  {:<10}  {:<10}",
            s.code.as_str(),
            s.rows,
            s.first_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            s.last_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    for (code, reason) in &unreadable {
        println!("{:<8} UNREADABLE  {reason}", code.as_str());
    }
    if !missing.is_empty() {
        let list: Vec<&str> = missing.iter().map(InstrumentCode::as_str).collect();
        println!("No store yet ({}): {}", missing.len(), list.join(" "));
    }

    Ok(0)
}
