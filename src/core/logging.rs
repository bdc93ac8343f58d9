//! Tracing setup: stdout plus a daily-rotated `kbchat.log` under the log dir.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::config::AppPaths;

const LOG_FILE_PREFIX: &str = "kbchat.log";

// sqlx logs every statement at info.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,tower_http=info";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// `RUST_LOG` when set and valid, otherwise the built-in directives.
fn build_filter(from_env: Option<&str>) -> EnvFilter {
    from_env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

pub fn init(paths: &AppPaths) {
    let _ = std::fs::create_dir_all(&paths.log_dir);

    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let env_directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    let result = tracing_subscriber::registry()
        .with(build_filter(env_directives.as_deref()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init();

    if let Err(err) = result {
        eprintln!("Logging already initialized: {}", err);
    }
}
