//! Tracing subscriber setup for binaries and ad-hoc debugging.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

/// Installs the global subscriber.
///
/// The filter honours `RUST_LOG`, falling back to `level` (or `DEBUG` in debug
/// builds, `INFO` otherwise). Output goes to stdout in a pretty format unless
/// one of these is set:
///
/// - `TICKREPLAY_LOG_FORMAT=json`: one JSON object per event
/// - `TICKREPLAY_LOG_TO_STDERR`: write to stderr
/// - `TICKREPLAY_DISABLE_LOGS`: install nothing
pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
    if std::env::var("TICKREPLAY_DISABLE_LOGS").is_ok() {
        return Ok(());
    }
    let default_filter = if cfg!(any(test, debug_assertions)) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter_layer = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.unwrap_or(default_filter).into())
        .from_env_lossy();

    let to_stderr = std::env::var("TICKREPLAY_LOG_TO_STDERR").is_ok();
    let json = std::env::var("TICKREPLAY_LOG_FORMAT").is_ok_and(|format| format == "json");

    let fmt_layer = match (json, to_stderr) {
        (true, true) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        (true, false) => tracing_subscriber::fmt::layer().json().boxed(),
        (false, to_stderr) => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_level(true).pretty();
            let fmt_layer = if cfg!(any(test, debug_assertions)) {
                fmt_layer.with_file(true).with_line_number(true)
            } else {
                fmt_layer
            };
            if to_stderr {
                fmt_layer.with_writer(std::io::stderr).boxed()
            } else {
                fmt_layer.boxed()
            }
        }
    };

    let subscriber = Registry::default().with(fmt_layer.with_filter(filter_layer));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
