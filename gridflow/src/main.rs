//! Batch entry point: one run loads the scheduled measurement files for a
//! window of days into the store.
//!
//! Arguments select the window in days back from today: none processes
//! today, one value processes that single day, two values span an inclusive
//! range (order auto-corrected).

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::{env, process};

use chrono::{Duration, Local, NaiveDate};
use fs2::FileExt;
use log::{error, info, warn};
use thiserror::Error;

use core_types::config::{AppConfig, LoadConfigError};
use profile_ingestion_service::FileIngestion;
use series_cache::SeriesCache;
use storage::{Store, StoreError};

const EXIT_BUSY: i32 = 99;
const EXIT_BAD_ARGS: i32 = 2;
const EXIT_CONFIG: i32 = 3;
const EXIT_STORE: i32 = 4;

#[derive(Debug, Error)]
enum AppError {
    #[error("another instance is already running")]
    AlreadyRunning,
    #[error("invalid arguments: {0}")]
    Args(String),
    #[error("config error: {0}")]
    Config(#[from] LoadConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            AppError::AlreadyRunning => EXIT_BUSY,
            AppError::Args(_) => EXIT_BAD_ARGS,
            AppError::Config(_) => EXIT_CONFIG,
            AppError::Store(_) => EXIT_STORE,
        }
    }
}

fn main() {
    env_logger::init();
    match run() {
        Ok(()) => {}
        Err(err) => {
            error!("gridflow failed: {err}");
            eprintln!("gridflow failed: {err}");
            process::exit(err.exit_code());
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;

    // Held until process exit; a second instance bails out instead of
    // racing this run's watermarks.
    let _lock = acquire_run_lock(&config.store.lock_path)?;

    let (start, end) = parse_date_window(env::args().skip(1).collect())?;
    println!(
        "gridflow processing {} to {} against {}",
        start, end, config.store.db_path
    );

    let mut store = Store::open(Path::new(&config.store.db_path))?;
    let cache = SeriesCache::preload(&store)?;
    let schedule = store.read_schedule(&config.load.pattern_filter)?;
    info!("{} schedule entries", schedule.len());

    let ingestions: Vec<FileIngestion> = schedule
        .into_iter()
        .map(|entry| FileIngestion::new(entry, &config.files))
        .collect();

    let mut day = start;
    while day <= end {
        for ingestion in &ingestions {
            if let Err(err) = ingestion.process_day(day, &cache, &mut store, &config.load) {
                error!(
                    "processing {} for {} failed: {err}",
                    ingestion.series_type(),
                    day
                );
            }
        }
        day = day.succ_opt().unwrap();
    }

    info!("run complete");
    Ok(())
}

/// No args: today. One: that many days back. Two: the inclusive window
/// between both offsets, whichever order they come in.
fn parse_date_window(args: Vec<String>) -> Result<(NaiveDate, NaiveDate), AppError> {
    let today = Local::now().date_naive();
    let offsets: Vec<i64> = args
        .iter()
        .map(|arg| {
            arg.parse::<i64>()
                .map_err(|_| AppError::Args(format!("{arg:?} is not a whole number of days")))
        })
        .collect::<Result<_, _>>()?;

    match offsets.as_slice() {
        [] => Ok((today, today)),
        [back] => {
            let day = today - Duration::days(*back);
            Ok((day, day))
        }
        [from, to] => {
            let mut start = today - Duration::days(*from);
            let mut end = today - Duration::days(*to);
            if end < start {
                std::mem::swap(&mut start, &mut end);
            }
            Ok((start, end))
        }
        _ => Err(AppError::Args(
            "expected at most two days-back values".to_string(),
        )),
    }
}

fn acquire_run_lock(primary: &str) -> Result<File, AppError> {
    match try_lock_at(Path::new(primary)) {
        Ok(file) => {
            info!("run lock acquired at {primary}");
            Ok(file)
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            let fallback = env::temp_dir().join("gridflow.lock");
            warn!(
                "no permission for {primary} ({err}), trying {}",
                fallback.display()
            );
            match try_lock_at(&fallback) {
                Ok(file) => {
                    info!("run lock acquired at {}", fallback.display());
                    Ok(file)
                }
                Err(err) => {
                    error!("could not acquire any run lock: {err}");
                    Err(AppError::AlreadyRunning)
                }
            }
        }
        Err(err) => {
            warn!("another instance holds {primary} ({err})");
            Err(AppError::AlreadyRunning)
        }
    }
}

fn try_lock_at(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    file.try_lock_exclusive()?;
    Ok(file)
}
