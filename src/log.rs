//! Leveled logging for conduit runs.
//!
//! Messages at or above the threshold go to stderr in the task-runner style
//! (`[12:04:31] Starting 'copy'...`). Once [`attach_file`] has been called the
//! same messages are mirrored, with millisecond stamps and level tags, into
//! `<logs>/conduit.log`.
//!
//! The threshold is INFO, or DEBUG with `--debug` / `CONDUIT_DEBUG=1`.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();

pub const LOG_FILE_NAME: &str = "conduit.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

fn env_debug(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Pick the threshold from the `--debug` flag and `CONDUIT_DEBUG`.
pub fn init_with_debug(debug: bool) {
    let from_env = env_debug(std::env::var("CONDUIT_DEBUG").ok().as_deref());
    let threshold = if debug || from_env {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    THRESHOLD.store(threshold as u8, Ordering::SeqCst);
}

/// Mirror messages into `<dir>/conduit.log`, truncated first. Later calls
/// are ignored; failures to create the file leave logging on stderr only.
pub fn attach_file(dir: &Path) {
    if LOG_FILE.get().is_some() || std::fs::create_dir_all(dir).is_err() {
        return;
    }
    if let Ok(file) = File::create(dir.join(LOG_FILE_NAME)) {
        let _ = LOG_FILE.set(Mutex::new(file));
    }
}

pub fn enabled(level: LogLevel) -> bool {
    level as u8 <= THRESHOLD.load(Ordering::Relaxed)
}

fn stderr_line(level: LogLevel, stamp: &str, msg: &str) -> String {
    match level {
        LogLevel::Error | LogLevel::Warn => format!("[{}] {}: {}", stamp, level.tag(), msg),
        _ => format!("[{}] {}", stamp, msg),
    }
}

/// Write `msg` if `level` passes the threshold. Used by the `clog*` macros.
pub fn write(level: LogLevel, msg: &str) {
    if !enabled(level) {
        return;
    }
    let now = chrono::Local::now();
    eprintln!("{}", stderr_line(level, &now.format("%H:%M:%S").to_string(), msg));

    if let Some(file) = LOG_FILE.get() {
        let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(file, "[{}] [{}] {}", now.format("%H:%M:%S%.3f"), level.tag(), msg);
    }
}

#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Only emitted in debug mode.
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Debug) {
            $crate::log::write($crate::log::LogLevel::Debug, &format!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! clog_trace {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Trace) {
            $crate::log::write($crate::log::LogLevel::Trace, &format!($($arg)*))
        }
    };
}
