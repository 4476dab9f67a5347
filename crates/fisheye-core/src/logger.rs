//! Logging setup for the `fisheye` tools.
//!
//! Libraries only talk to `log`. Binaries install one of the sinks below
//! once at startup. Both apply the same policy: records from the workspace
//! crates pass at the requested level, records from everything else (the
//! corner backend, the image codecs) only from `Warn` up.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Crate names whose records follow the requested level.
const WORKSPACE_CRATES: [&str; 4] = ["fisheye", "fisheye_core", "fisheye_chessboard", "fisheye_calib"];

/// Level cap for records from other crates.
const FOREIGN_LEVEL: LevelFilter = LevelFilter::Warn;

fn crate_of(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}

fn is_workspace(target: &str) -> bool {
    WORKSPACE_CRATES.contains(&crate_of(target))
}

struct CliLogger {
    level: LevelFilter,
    started: Instant,
}

impl CliLogger {
    fn threshold(&self, target: &str) -> LevelFilter {
        if is_workspace(target) {
            self.level
        } else {
            self.level.min(FOREIGN_LEVEL)
        }
    }

    /// `fisheye-calib: message`; warnings and errors carry their level, and
    /// debug runs prefix the time since startup.
    fn render(&self, elapsed: f64, level: Level, target: &str, message: &std::fmt::Arguments<'_>) -> String {
        let source = crate_of(target).replace('_', "-");
        let clock = if self.level >= LevelFilter::Debug {
            format!("[{elapsed:8.3}s] ")
        } else {
            String::new()
        };
        match level {
            Level::Error => format!("{clock}{source}: error: {message}"),
            Level::Warn => format!("{clock}{source}: warning: {message}"),
            _ => format!("{clock}{source}: {message}"),
        }
    }
}

impl Log for CliLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.threshold(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.render(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args(),
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<CliLogger> = OnceLock::new();

/// Install the stderr logger for `level`.
///
/// Only the first call installs anything; later calls are no-ops.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| CliLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// `EnvFilter` directives equivalent to the stderr logger policy.
#[cfg(feature = "tracing")]
fn default_directives(verbose: bool) -> String {
    let own = if verbose { "debug" } else { "info" };
    let mut directives = vec![FOREIGN_LEVEL.to_string().to_lowercase()];
    directives.extend(WORKSPACE_CRATES.iter().map(|c| format!("{c}={own}")));
    directives.join(",")
}

/// Install a `tracing` fmt subscriber with span timings.
///
/// `RUST_LOG` overrides the default filter.
#[cfg(feature = "tracing")]
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::Uptime::default())
        .finish()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(level: LevelFilter) -> CliLogger {
        CliLogger {
            level,
            started: Instant::now(),
        }
    }

    #[test]
    fn foreign_records_are_capped_at_warn() {
        let l = logger(LevelFilter::Debug);
        assert_eq!(l.threshold("fisheye_calib::calibrate"), LevelFilter::Debug);
        assert_eq!(l.threshold("fisheye"), LevelFilter::Debug);
        assert_eq!(l.threshold("chess_corners::detect"), LevelFilter::Warn);
        assert_eq!(l.threshold("fisheyes"), LevelFilter::Warn);
        assert_eq!(logger(LevelFilter::Error).threshold("kiddo"), LevelFilter::Error);
    }

    #[test]
    fn lines_name_the_crate() {
        let quiet = logger(LevelFilter::Info);
        assert_eq!(
            quiet.render(1.5, Level::Info, "fisheye_calib::model", &format_args!("rms {}", 0.25)),
            "fisheye-calib: rms 0.25"
        );
        assert_eq!(
            quiet.render(1.5, Level::Warn, "fisheye_chessboard", &format_args!("no board")),
            "fisheye-chessboard: warning: no board"
        );

        let verbose = logger(LevelFilter::Debug);
        assert_eq!(
            verbose.render(1.5, Level::Debug, "fisheye", &format_args!("x")),
            "[   1.500s] fisheye: x"
        );
    }

    #[test]
    fn repeated_init_is_noop() {
        assert!(init_with_level(LevelFilter::Warn).is_ok());
        assert!(init_with_level(LevelFilter::Debug).is_ok());
        log::warn!("logger smoke test");
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn tracing_filter_matches_logger_policy() {
        assert_eq!(
            default_directives(false),
            "warn,fisheye=info,fisheye_core=info,fisheye_chessboard=info,fisheye_calib=info"
        );
    }
}
