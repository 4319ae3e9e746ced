use anyhow::Result;
use std::fs;
use std::path::Path;

const LOG_PREFIX: &str = "server_rsu_";

pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Only previous server logs go; the audit trail shares this directory.
    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("{}{}.log", LOG_PREFIX, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level_filter(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

fn level_filter(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

fn is_server_log(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(LOG_PREFIX));
    named && path.extension().is_some_and(|ext| ext == "log")
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(log_dir)?.filter_map(|res| res.ok()) {
        let path = entry.path();
        if is_server_log(&path) {
            if let Err(e) = fs::remove_file(&path) {
                eprintln!("Failed to delete old log file {:?}: {}", path, e);
            }
        }
    }
    Ok(())
}
