// Logging module
// Console and rolling file output through the tracing ecosystem

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Maps the numeric console log level (0=Minimum, 1=Error, 2=Detail,
/// 3=Full/Debug, 4=Trace) onto an `EnvFilter` directive.
pub fn map_log_level(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
/// `RUST_LOG` overrides `console_level`. With a log directory, output is
/// also written to a daily rolling `log_file` (default `server.log`); the
/// returned guard must be kept alive to flush it.
pub fn initialize_logging(
    log_dir: Option<&str>,
    console_level: &str,
    log_file: Option<&str>,
) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level));

    let console = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false);

    if let Some(dir) = log_dir {
        let path = Path::new(dir);
        if !path.exists() {
            let _ = std::fs::create_dir_all(path);
        }

        let file_appender = rolling::daily(dir, log_file.unwrap_or("server.log"));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .init();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_log_level() {
        assert_eq!(map_log_level(-1), "error");
        assert_eq!(map_log_level(0), "error");
        assert_eq!(map_log_level(1), "warn");
        assert_eq!(map_log_level(2), "info");
        assert_eq!(map_log_level(3), "debug");
        assert_eq!(map_log_level(4), "trace");
        assert_eq!(map_log_level(9), "trace");
    }
}
