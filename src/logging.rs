//! Session log
//!
//! Plain-text log file kept next to `tracing`, one per user. Lines below the
//! configured [`Level`] are dropped; lines tied to a task carry a
//! `[task <id>]` prefix so one task can be grepped out of a long session.

use chrono::Local;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Severity of a session log line, lowest first
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug = 0,
    #[default]
    Info = 1,
    Warn = 2,
    Error = 3,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown log level '{0}' (expected debug, info, warn or error)")]
pub struct UnknownLevel(pub String);

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Debug,
            1 => Level::Info,
            2 => Level::Warn,
            _ => Level::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "trace" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}

/// Initialize the session log file
pub fn init_logger() -> anyhow::Result<()> {
    init_logger_at(get_log_path())
}

/// Initialize the session log at a specific path
pub fn init_logger_at(log_path: PathBuf) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(
        file,
        "\n=== AgentDock session {} (level {}) ===\n",
        timestamp,
        min_level()
    )?;

    *LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
    Ok(())
}

/// Mirror session log lines to stderr
pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_mode() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

/// Drop every line below `level`
pub fn set_min_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn min_level() -> Level {
    Level::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

pub fn enabled(level: Level) -> bool {
    level >= min_level()
}

fn get_log_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("agentdock").join("agentdock.log"),
        None => PathBuf::from("agentdock.log"),
    }
}

pub fn get_log_path_display() -> String {
    get_log_path().display().to_string()
}

/// Write one line to the session log
pub fn log(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    write_line(&format!(
        "[{}] {:<5} {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level,
        message
    ));
}

/// Write one line about a specific task
pub fn log_task(level: Level, task_id: &str, message: &str) {
    if !enabled(level) {
        return;
    }
    log(level, &format!("[task {}] {}", task_id, message));
}

fn write_line(line: &str) {
    if is_debug_mode() {
        eprintln!("{}", line);
    }

    let mut log_file = LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(f) = log_file.as_mut() {
        let _ = writeln!(f, "{}", line);
        let _ = f.flush();
    }
}

/// `log_info!("...")` or `log_info!(task = id; "...")`
#[macro_export]
macro_rules! log_info {
    (task = $task:expr; $($arg:tt)+) => {
        $crate::logging::log_task($crate::logging::Level::Info, &$task, &format!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::logging::log($crate::logging::Level::Info, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_debug {
    (task = $task:expr; $($arg:tt)+) => {
        $crate::logging::log_task($crate::logging::Level::Debug, &$task, &format!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::logging::log($crate::logging::Level::Debug, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warn {
    (task = $task:expr; $($arg:tt)+) => {
        $crate::logging::log_task($crate::logging::Level::Warn, &$task, &format!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::logging::log($crate::logging::Level::Warn, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    (task = $task:expr; $($arg:tt)+) => {
        $crate::logging::log_task($crate::logging::Level::Error, &$task, &format!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::logging::log($crate::logging::Level::Error, &format!($($arg)+))
    };
}
