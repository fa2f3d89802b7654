pub mod models {
    pub mod cloud;
    pub mod health;
    pub mod inverter;
    pub mod weather;
}

pub mod cli;
pub mod client;
pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod error;
pub mod modbus;
pub mod report;
pub mod schema;
pub mod solar;
pub mod sources;
pub mod utils;
pub mod weather;
pub mod services {
    pub mod alert_state;
    pub mod daylight;
    pub mod expectation;
    pub mod health;
    pub mod monitor;
    pub mod notify;
    pub mod optimizers;
    pub mod retention;
    pub mod simulation;
    pub mod snapshots;
}

use crate::cli::{Cli, Command, MaintainDbArgs, NotifyTestArgs, SimulateArgs};
use crate::client::SolarEdgeClient;
use crate::config::{Config, RetentionPolicy};
use crate::db::store::{self, StateLock};
use crate::error::{AppError, ConfigError};
use crate::modbus::SunSpecReader;
use crate::report::{append_run_log, RunRecord};
use crate::services::monitor::{self, RunOptions, Sources};
use crate::services::notify::{NotificationEvent, NotificationManager};
use crate::services::{retention, simulation};
use crate::sources::{CloudSource, WeatherSource};
use crate::weather::OpenMeteoClient;
use chrono::Utc;
use clap::Parser;
use diesel::SqliteConnection;
use log::{error, info, warn, LevelFilter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

/// Load `--env-file`, or `./.env` when present. Variables already set win.
fn load_env_file(explicit: Option<&Path>) -> Result<Option<LoadedEnvFile>, ConfigError> {
    let (path, explicit) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => {
            let default_path = PathBuf::from(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    dotenvy::from_path(&path).map_err(|source| ConfigError::EnvFile {
        path: path.clone(),
        source,
    })?;
    Ok(Some(LoadedEnvFile { path, explicit }))
}

fn init_logging(cli: &Cli) {
    let default_filter = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(default_filter);
    builder.format_timestamp_secs();
    if cli.debug {
        builder.filter_level(LevelFilter::Debug);
    } else if cli.quiet {
        builder.filter_level(LevelFilter::Warn);
    }
    builder.init();
}

fn log_config(cfg: &Config, notifier: &NotificationManager) {
    info!(
        "Config loaded (inverters={}, timezone={}, coordinates={}, weather={}, cloud={}, alert_threshold={}, notify=[{}], db={})",
        cfg.inverters.len(),
        cfg.site.timezone,
        cfg.site
            .coordinates()
            .map(|(lat, lon)| format!("{lat:.3},{lon:.3}"))
            .unwrap_or_else(|| "-".to_string()),
        cfg.weather.enabled,
        cfg.cloud.enabled,
        cfg.alerts.consecutive_health_alerts,
        notifier.channel_names().join(","),
        cfg.store.db_path.display()
    );
}

/// Lock and open the configured state store. The lock must outlive the connection.
fn open_store(cfg: &Config) -> Result<(StateLock, SqliteConnection), AppError> {
    let lock = StateLock::acquire(&cfg.store.db_path)?;
    let conn = store::open(&cfg.store.db_path)?;
    info!("Opened state store {}", cfg.store.db_path.display());
    Ok((lock, conn))
}

fn emit_record(cli: &Cli, cfg: &Config, record: &RunRecord) -> Result<(), AppError> {
    if cli.json {
        let line = record
            .to_json_line()
            .map_err(|e| AppError::Other(format!("serializing run record failed: {}", e)))?;
        println!("{}", line);
    } else if !cli.quiet {
        for line in record.human_lines() {
            println!("{}", line);
        }
    }
    if let Some(path) = &cfg.logging.run_log_path
        && let Err(e) = append_run_log(path, record)
    {
        warn!("Appending to run log {} failed: {}", path.display(), e);
    }
    Ok(())
}

fn run_health(cli: &Cli, cfg: &Config, notifier: &NotificationManager) -> Result<(), AppError> {
    cfg.require_inverters()?;
    let (_lock, mut conn) = open_store(cfg)?;

    let reader = SunSpecReader::new(&cfg.modbus);
    let cloud = if cfg.cloud.enabled {
        match SolarEdgeClient::new(&cfg.cloud) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("Cloud client unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };
    let weather = cfg.weather.enabled.then(|| OpenMeteoClient::new(&cfg.weather));
    let sources = Sources {
        reader: &reader,
        cloud: cloud.as_ref().map(|c| c as &dyn CloudSource),
        weather: weather.as_ref().map(|w| w as &dyn WeatherSource),
    };

    let record = monitor::run_once(&mut conn, cfg, &sources, notifier, Utc::now(), RunOptions::default())?;
    emit_record(cli, cfg, &record)
}

fn run_simulate(cli: &Cli, cfg: &Config, args: &SimulateArgs, notifier: &NotificationManager) -> Result<(), AppError> {
    cfg.require_inverters()?;
    let scenario = simulation::resolve(&args.scenario, cfg)?;
    info!(
        "Simulating scenario '{}'{} for {} run(s), store={}",
        args.scenario,
        scenario
            .description
            .as_deref()
            .map(|d| format!(" ({d})"))
            .unwrap_or_default(),
        args.runs,
        if args.persist { "configured" } else { "in-memory" }
    );

    let (_lock, mut conn) = if args.persist {
        let (lock, conn) = open_store(cfg)?;
        (Some(lock), conn)
    } else {
        (None, store::open_in_memory()?)
    };

    let reader = simulation::SimulatedReader::new(&scenario);
    let cloud = simulation::SimulatedCloud::new(&scenario, &cfg.inverters);
    let weather = simulation::SimulatedWeatherSource::new(&scenario);
    let sources = Sources {
        reader: &reader,
        cloud: Some(&cloud),
        weather: Some(&weather),
    };
    let opts = RunOptions { ignore_daylight: true };

    for run in 1..=args.runs {
        let record = monitor::run_once(&mut conn, cfg, &sources, notifier, Utc::now(), opts)?;
        info!("Simulation run {}/{} complete", run, args.runs);
        emit_record(cli, cfg, &record)?;
    }
    Ok(())
}

fn run_notify_test(args: &NotifyTestArgs, notifier: &NotificationManager) -> Result<(), AppError> {
    if notifier.is_empty() {
        warn!("No notification channels configured; nothing to test");
        return Ok(());
    }
    for &healthy in args.mode.states() {
        info!(
            "[notify-test] Sending {} test notification",
            if healthy { "healthy" } else { "fault" }
        );
        let delivered = notifier.dispatch(&NotificationEvent::Test { healthy, at: Utc::now() });
        info!("[notify-test] Delivered via {} channel(s)", delivered);
    }
    Ok(())
}

fn run_maintain_db(cli: &Cli, cfg: &Config, args: &MaintainDbArgs) -> Result<(), AppError> {
    let policy = RetentionPolicy {
        snapshot_days: args.snapshot_days.unwrap_or(cfg.retention.snapshot_days),
        summary_days: args.summary_days.unwrap_or(cfg.retention.summary_days),
        vacuum: cfg.retention.vacuum && !args.no_vacuum,
    };
    let (_lock, mut conn) = open_store(cfg)?;
    let counts = retention::prune(&mut conn, &policy, Utc::now())?;
    if cli.json {
        let line = serde_json::to_string(&counts)
            .map_err(|e| AppError::Other(format!("serializing prune counts failed: {}", e)))?;
        println!("{}", line);
    } else if !cli.quiet {
        println!(
            "pruned snapshots={} summaries={} vacuumed={}",
            counts.snapshots, counts.summaries, counts.vacuumed
        );
    }
    Ok(())
}

pub fn run(cli: &Cli) -> Result<(), AppError> {
    // clap read the environment before the env file was loaded
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("SOLAR_SENTINEL_CONFIG").map(PathBuf::from));
    let cfg = Config::load(config_path.as_deref())?;
    let notifier = NotificationManager::from_config(&cfg.pushover, &cfg.healthchecks);
    log_config(&cfg, &notifier);

    match cli.selected() {
        Command::Health => run_health(cli, &cfg, &notifier),
        Command::Simulate(args) => run_simulate(cli, &cfg, &args, &notifier),
        Command::NotifyTest(args) => run_notify_test(&args, &notifier),
        Command::MaintainDb(args) => run_maintain_db(cli, &cfg, &args),
    }
}

fn main() {
    let cli = Cli::parse();

    let loaded_env = match load_env_file(cli.env_file.as_deref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(AppError::from(err).exit_code());
        }
    };

    // After the env file so RUST_LOG from it is respected.
    init_logging(&cli);

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "solar-sentinel {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli) {
        error!("fatal: {}", e);
        std::process::exit(e.exit_code());
    }
}
