use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "tgoutbox.log";

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("info,tgoutbox=debug,tgoutbox_lib=debug,sqlx=warn"))
}

pub fn init_stderr() {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(std::io::stderr)
    .with_target(true)
    .init();
}

// Guard держать до конца процесса, иначе хвост буфера потеряется.
pub fn init(logs_dir: &Path) -> WorkerGuard {
  let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(env_filter())
    .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
    .with(fmt::layer().json().with_writer(writer).with_ansi(false).with_target(true))
    .init();
  guard
}
