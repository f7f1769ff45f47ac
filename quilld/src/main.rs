//! Daemon entry point (§5 "process model"): bootstrap-parses just enough of
//! argv to configure logging before the module set exists, reads the config
//! file, builds the module pipeline, and turns `notify` watch events into
//! `quill_core::Event`s fed through the `FileEventHandler`.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use env_logger::Builder;
use log::{debug, info, warn};
use notify::event::{AccessKind, ModifyKind, RenameMode};
use notify::{EventKind as NotifyEventKind, RecursiveMode, Watcher};

use quill_core::args;
use quill_core::config::{self, LoggingFormat};
use quill_core::modules::{BannerInserter, ChecklistFormatter, CommandEmbedder, Renamer, SysInfoReporter};
use quill_core::{Event, FileEventHandler, GitCommitter, Module, ModuleManager, PlasmaSync};

fn main() -> Result<()> {
    let cli_tokens: Vec<String> = std::env::args().skip(1).collect();

    let sys_template = config::system_template();
    let sys_defaults = args::defaults_of(&sys_template);
    let (sys_known, _) = args::parse(&cli_tokens, &sys_template);
    let bootstrap = args::merge(&sys_defaults, &sys_known);

    let debug_logging = bootstrap.get("sys_debug").map(|v| v.as_bool()).unwrap_or(false);
    let logging_format = bootstrap
        .get("sys_logging_format")
        .and_then(|v| v.first_string())
        .map(LoggingFormat::from_flag)
        .unwrap_or(LoggingFormat::Full);
    configure_logging(debug_logging, logging_format);

    info!("Starting quilld {}", env!("CARGO_PKG_VERSION"));

    let config_path = bootstrap
        .get("sys_config_path")
        .and_then(|v| v.first_string())
        .unwrap_or("config.txt")
        .to_string();
    let config_tokens = read_config_tokens(Path::new(&config_path));

    let modules: Vec<Box<dyn Module>> = vec![
        Box::new(PlasmaSync::new()),
        Box::new(GitCommitter::new()),
        Box::new(BannerInserter::new()),
        Box::new(ChecklistFormatter::new()),
        Box::new(Renamer::new()),
        Box::new(CommandEmbedder::new()),
        Box::new(SysInfoReporter::new()),
    ];

    let mut manager =
        ModuleManager::new(modules, &cli_tokens, &config_tokens).context("failed to start quilld")?;
    info!("notes dirs: {:?}", manager.config().notes_dirs);

    let mut handler = FileEventHandler::new(manager.config().on_open_cooldown);

    let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(tx).context("failed to create filesystem watcher")?;
    let mut watched_any = false;
    for dir in &manager.config().notes_dirs {
        match watcher.watch(Path::new(dir), RecursiveMode::Recursive) {
            Ok(()) => {
                info!("watching {}", dir);
                watched_any = true;
            }
            Err(e) => warn!("failed to watch {}: {}", dir, e),
        }
    }
    if !watched_any {
        anyhow::bail!("none of the configured --sys-notes-dirs could be watched");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("interrupt received, stopping watch source");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(300)) {
            Ok(Ok(raw)) => {
                for event in convert_event(raw) {
                    handler.on_event(event, &mut manager);
                }
            }
            Ok(Err(e)) => warn!("watch error: {}", e),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Stop the watch source before anything else, then let `manager`'s drop
    // (which joins the git committer's worker thread) finish draining.
    drop(watcher);
    info!("watch source stopped, draining in-flight work");
    drop(manager);
    info!("Stopping quilld");
    Ok(())
}

fn read_config_tokens(path: &Path) -> Vec<String> {
    match args::tokenize_config_file(path) {
        Ok(tokens) => tokens,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("config file {:?} not found, using defaults and CLI flags only", path);
            Vec::new()
        }
        Err(e) => {
            warn!("failed to read config file {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Converts one `notify` event into zero or more pipeline events. A combined
/// `Name(Both)` rename event (paths[0] = from, paths[1] = to) becomes a
/// single `Moved`; a lone `Name(From)`/`Name(To)` half (the shape some
/// backends deliver rename pairs as) is treated as a delete/create, which
/// the file event handler's ignore ledger and the synchronizer's
/// auto-discovery fallback both tolerate.
fn convert_event(raw: notify::Event) -> Vec<Event> {
    let is_dir = raw.paths.first().map(|p| p.is_dir()).unwrap_or(false);
    match raw.kind {
        NotifyEventKind::Create(_) => raw
            .paths
            .into_iter()
            .map(|path| Event::Created { path, is_dir })
            .collect(),
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)) if raw.paths.len() >= 2 => {
            vec![Event::Moved {
                from: raw.paths[0].clone(),
                to: raw.paths[1].clone(),
                is_dir,
            }]
        }
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::From)) => raw
            .paths
            .into_iter()
            .map(|path| Event::Deleted { path, is_dir })
            .collect(),
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::To)) => raw
            .paths
            .into_iter()
            .map(|path| Event::Created { path, is_dir })
            .collect(),
        NotifyEventKind::Modify(_) => raw
            .paths
            .into_iter()
            .map(|path| Event::Modified { path, is_dir })
            .collect(),
        NotifyEventKind::Remove(_) => raw
            .paths
            .into_iter()
            .map(|path| Event::Deleted { path, is_dir })
            .collect(),
        NotifyEventKind::Access(AccessKind::Open(_)) => raw
            .paths
            .into_iter()
            .map(|path| Event::Opened { path, is_dir })
            .collect(),
        NotifyEventKind::Access(_) | NotifyEventKind::Other | NotifyEventKind::Any => {
            debug!("ignoring notify event: {:?}", raw.kind);
            Vec::new()
        }
    }
}

/// Same convention as `rtest`'s `configure_logging`: a custom UTC-timestamped
/// `env_logger` format closure, here also selecting between the `compact`
/// and `full` presets named by `--sys-logging-format` (see DESIGN.md for why
/// the flag picks a preset rather than a free-form template string).
fn configure_logging(debug_enabled: bool, format: LoggingFormat) {
    let mut builder = Builder::from_default_env();
    if debug_enabled {
        builder.filter_level(log::LevelFilter::Debug);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.format(move |buf, record| {
        let utc = Utc::now();
        match format {
            LoggingFormat::Compact => writeln!(buf, "{} {} {}", utc.format("%H:%M:%S"), record.level(), record.args()),
            LoggingFormat::Full => match (record.file(), record.line()) {
                (Some(file), Some(line)) => writeln!(
                    buf,
                    "{:?} {} [{}/{}] {}",
                    utc,
                    record.level(),
                    file,
                    line,
                    record.args()
                ),
                _ => writeln!(buf, "{:?} {} {}", utc, record.level(), record.args()),
            },
        }
    });
    builder.init();
}
