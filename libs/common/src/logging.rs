//! Logging setup shared by the bridge binaries
//!
//! Console output and an optional daily rolling log file, both filtered by one
//! `EnvFilter` built from `RUST_LOG` or the service log level.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{
        self,
        format::Writer,
        FmtContext, FormatEvent, FormatFields, FormattedFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the log root directory
pub const LOG_DIR_ENV: &str = "LOGOSRV_LOG_DIR";

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "\x1b[35m",
        Level::DEBUG => "\x1b[34m",
        Level::INFO => "\x1b[32m",
        Level::WARN => "\x1b[33m",
        Level::ERROR => "\x1b[31m",
    }
}

/// Event formatter producing `timestamp [LEVEL] span{fields}: message`
///
/// Example output: `2025-12-02T00:50:44.809120Z [INFO] device{ip=10.0.0.5}: connected`
struct BracketedLevelFormat {
    with_target: bool,
}

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            write!(writer, "{}{}\x1b[0m ", level_color(&level), format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        if self.with_target {
            write!(writer, "{}: ", event.metadata().target())?;
        }

        if let Some(scope) = ctx.event_scope() {
            let mut wrote_span = false;
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
                write!(writer, ":")?;
                wrote_span = true;
            }
            if wrote_span {
                write!(writer, " ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ============================================================================
// Log Root Directory Configuration
// ============================================================================

static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the log root directory
///
/// Priority:
/// 1. `LOGOSRV_LOG_DIR` environment variable
/// 2. `config_dir` parameter (command line or configuration file)
/// 3. Default value "logs"
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

/// Get the log root directory
///
/// Falls back to the environment or "logs" when `init_log_root` was never
/// called. Test binaries log under the system temp directory instead.
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                if is_test_environment() {
                    std::env::temp_dir().join("logosrv-test-logs")
                } else {
                    PathBuf::from("logs")
                }
            })
    })
}

fn is_test_environment() -> bool {
    if std::env::var("CARGO_TARGET_TMPDIR").is_ok() {
        return true;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.to_str().map(|p| p.contains("/deps/")))
        .unwrap_or(false)
}

// ============================================================================
// Daily rolling file writer: {YYYYMMDD}_{service}.log
// ============================================================================

struct RollingState {
    date: String,
    file: File,
}

#[derive(Clone)]
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    state: Arc<Mutex<RollingState>>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&log_dir)?;
        let date = today();
        let file = open_append(&log_file_path(&log_dir, &service_name, &date))?;

        Ok(Self {
            service_name,
            log_dir,
            state: Arc::new(Mutex::new(RollingState { date, file })),
        })
    }

    /// Reopen when the day changed or the current file was removed underneath us
    fn roll_if_needed(&self, state: &mut RollingState) -> std::io::Result<()> {
        let date = today();
        let path = log_file_path(&self.log_dir, &self.service_name, &date);
        if state.date != date || !path.exists() {
            fs::create_dir_all(&self.log_dir)?;
            state.file = open_append(&path)?;
            state.date = date;
        }
        Ok(())
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        self.roll_if_needed(&mut state)?;
        state.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.state.lock().file.flush()
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

fn log_file_path(log_dir: &Path, service_name: &str, date: &str) -> PathBuf {
    log_dir.join(format!("{}_{}.log", date, service_name))
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Delete the oldest `{date}_{service}.log` files so at most `keep` remain
///
/// Returns the number of removed files.
pub fn prune_old_logs(log_dir: &Path, service_name: &str, keep: usize) -> std::io::Result<usize> {
    let suffix = format!("_{}.log", service_name);
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix))
        })
        .collect();

    if files.len() <= keep {
        return Ok(0);
    }

    // Date prefix sorts chronologically
    files.sort();
    let excess = files.len() - keep;
    let mut removed = 0;
    for path in files.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove old log {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

fn start_log_retention_task(log_dir: PathBuf, service_name: String, keep: usize) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(86_400));
        loop {
            ticker.tick().await;
            match prune_old_logs(&log_dir, &service_name, keep) {
                Ok(0) => {},
                Ok(n) => tracing::debug!("Removed {} old log file(s)", n),
                Err(e) => tracing::warn!("Log retention: {}", e),
            }
        }
    });
}

// ============================================================================
// Subscriber initialization
// ============================================================================

static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();


/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used in file names and the default filter
    pub service_name: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Console log level
    pub console_level: Level,
    /// File log level
    pub file_level: Level,
    /// Write JSON lines instead of the bracketed text format to the file
    pub enable_json: bool,
    /// Write a log file at all
    pub enable_file: bool,
    /// Colored console output
    pub ansi: bool,
    /// Number of daily files kept on disk
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "logosrv".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            enable_json: false,
            enable_file: true,
            ansi: true,
            max_log_files: 30,
        }
    }
}

/// Build the default filter directive for a service
///
/// `RUST_LOG` wins when set. Otherwise dependencies log at `info` and the
/// service crates at the console level.
fn initial_filter(config: &LogConfig) -> String {
    match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.trim().is_empty() => spec,
        _ => {
            let level = config.console_level.as_str().to_lowercase();
            format!(
                "info,{}={},common={}",
                config.service_name.replace('-', "_"),
                level,
                level
            )
        },
    }
}

/// Initialize the logging system
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter_spec = initial_filter(&config);
    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&filter_spec)?);

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat { with_target: false })
        .boxed();

    let file_layer = if config.enable_file {
        let writer = DailyRollingWriter::new(config.service_name.clone(), config.log_dir.clone())?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        GUARDS.get_or_init(|| Mutex::new(Vec::new())).lock().push(guard);

        let file_filter = LevelFilter::from_level(config.file_level);
        let layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .with_current_span(true)
                .with_filter(file_filter)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat { with_target: true })
                .with_filter(file_filter)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    registry.with(console_layer).with(file_layer).try_init()?;

    if config.enable_file {
        tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
        start_log_retention_task(config.log_dir, config.service_name, config.max_log_files);
    }

    Ok(())
}
