//! pledge CLI - drives deferreds on a single-threaded event loop.
//!
//! ```text
//! main() -> load config -> init_tracing() -> EventLoop::new()
//!                                                 |
//!                                   demo::schedule() | fetch requests
//!                                                 |
//!                                          EventLoop::run() -> LoopReport
//! ```

mod args;
mod demo;

use std::cell::Cell;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pledge_config::PledgeConfig;
use pledge_engine::{ClockKind, EventLoop, LoopReport};
use pledge_fetch::{FetchRequest, Fetcher, Method};

use args::{Args, Command, USAGE};

fn main() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let (config, load_warning) = load_config(args.config.as_deref());
    init_tracing(&config);
    if let Some(warning) = load_warning {
        tracing::warn!("{warning}");
    }

    let mut loop_config = config.loop_config();
    if args.virtual_clock {
        loop_config.clock = ClockKind::Virtual;
    }
    let mut event_loop = EventLoop::new(loop_config).context("failed to create event loop")?;

    let failures = Rc::new(Cell::new(0usize));
    match args.command {
        Command::Demo => demo::schedule(&event_loop.handle(), &demo::Transcript::echoing()),
        Command::Fetch { method, urls } => {
            let fetcher = Fetcher::new(event_loop.handle(), &config.fetch_config())
                .context("failed to build HTTP client")?;
            schedule_fetches(&fetcher, &method, &urls, &failures);
        }
        Command::Help => return Ok(()),
    }

    let report = event_loop.run().context("event loop stopped")?;
    log_report(&report);

    match failures.get() {
        0 => Ok(()),
        n => bail!("{n} request(s) failed"),
    }
}

fn load_config(explicit: Option<&Path>) -> (PledgeConfig, Option<String>) {
    let loaded = match explicit {
        Some(path) => PledgeConfig::load_from(path),
        None => PledgeConfig::load(),
    };
    match loaded {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(err) => (
            PledgeConfig::default(),
            Some(format!("{err}; using defaults")),
        ),
    }
}

fn schedule_fetches(
    fetcher: &Fetcher,
    method: &Method,
    urls: &[String],
    failures: &Rc<Cell<usize>>,
) {
    for url in urls {
        let shown = url.clone();
        let failures = Rc::clone(failures);
        fetcher
            .fetch(FetchRequest::new(url.clone(), method.clone()))
            .then(|response| {
                let body = serde_json::to_string_pretty(&response.body)
                    .unwrap_or_else(|_| response.body.to_string());
                println!("{body}");
                Ok(())
            })
            .catch(move |error| {
                failures.set(failures.get() + 1);
                eprintln!("{shown}: {error}");
            });
    }
}

fn log_report(report: &LoopReport) {
    tracing::debug!(
        microtasks = report.microtasks_run,
        timers = report.timers_fired,
        io = report.io_completions,
        ignored = report.ignored_settlements,
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        "Run complete"
    );
    for rejection in &report.unhandled {
        tracing::warn!(
            deferred = %rejection.deferred,
            error = %rejection.error,
            "Rejection was never handled"
        );
    }
}

fn init_tracing(config: &PledgeConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = match config.log_file() {
        Some(path) => open_log_file(path),
        None => (None, Vec::new()),
    };

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();
        tracing::info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }

    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(path: PathBuf) -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warnings.push(format!(
            "Failed to create log dir {}: {e}",
            parent.display()
        ));
        return (None, warnings);
    }

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => (Some((path, file)), warnings),
        Err(e) => {
            warnings.push(format!("Failed to open log file {}: {e}", path.display()));
            (None, warnings)
        }
    }
}
