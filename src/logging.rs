/// Structured logging for the biomonitoring trend analysis
///
/// Provides context-rich logging tagged with the pipeline stage and, where
/// relevant, the station id. Supports console output and appending to a
/// log file for unattended report runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Filter,
    Fit,
    Predict,
    Report,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Load => write!(f, "LOAD"),
            Stage::Filter => write!(f, "FILTER"),
            Stage::Fit => write!(f, "FIT"),
            Stage::Predict => write!(f, "PREDICT"),
            Stage::Report => write!(f, "REPORT"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the station simply has too little usable data
    Expected,
    /// Unexpected failure - numerical breakdown during fitting
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut guard) = LOGGER.lock() {
            *guard = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, stage: Stage, station_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let station_part = station_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, stage, station_part, message
        );

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, station_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, station_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", stage, station_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

fn dispatch(level: LogLevel, stage: Stage, station_id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, stage, station_id, message);
        }
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

/// True once `init_logger` has run.
pub fn is_initialized() -> bool {
    LOGGER.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

/// Log a general informational message
pub fn info(stage: Stage, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Info, stage, station_id, message);
}

/// Log a warning message
pub fn warn(stage: Stage, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Warning, stage, station_id, message);
}

/// Log an error message
pub fn error(stage: Stage, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Error, stage, station_id, message);
}

/// Log a debug message
pub fn debug(stage: Stage, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Debug, stage, station_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a model fit failure from its error message
pub fn classify_fit_failure(error_message: &str) -> FailureType {
    if error_message.contains("fewer than two") {
        FailureType::Expected
    } else if error_message.contains("singular") || error_message.contains("non-finite") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a per-station fit failure with automatic classification
pub fn log_fit_failure(station_id: &str, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_fit_failure(&error_msg);

    let message = format!("model fit failed [{}]: {}", failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(Stage::Fit, Some(station_id), &message),
        FailureType::Unexpected => error(Stage::Fit, Some(station_id), &message),
        FailureType::Unknown => warn(Stage::Fit, Some(station_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of the per-station model fits
pub fn log_fit_summary(total: usize, converged: usize, unreliable: usize, failed: usize) {
    let message = format!(
        "Model fitting complete: {}/{} converged, {} unreliable, {} failed",
        converged, total, unreliable, failed
    );

    if failed == 0 && unreliable == 0 {
        info(Stage::Fit, None, &message);
    } else if total > 0 && converged == 0 {
        error(Stage::Fit, None, &message);
    } else {
        warn(Stage::Fit, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        let sparse = "station has fewer than two observed grades";
        assert_eq!(classify_fit_failure(sparse), FailureType::Expected);

        let numeric = "log-likelihood became non-finite at starting values";
        assert_eq!(classify_fit_failure(numeric), FailureType::Unexpected);

        assert_eq!(classify_fit_failure("something else"), FailureType::Unknown);
    }

    #[test]
    fn test_fit_errors_classify_by_cause() {
        use crate::analysis::FitError;

        let expected = [FitError::TooFewLevels(1), FitError::TooFewObservations(1)];
        for err in expected {
            assert_eq!(classify_fit_failure(&err.to_string()), FailureType::Expected, "{}", err);
        }
        assert_eq!(
            classify_fit_failure(&FitError::NonFiniteStart.to_string()),
            FailureType::Unexpected
        );
    }

    #[test]
    fn test_logger_reports_initialisation() {
        init_logger(LogLevel::Error, None, false);
        assert!(is_initialized());
    }
}
