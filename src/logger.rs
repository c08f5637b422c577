use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "MENDLOOP_LOG";

/// Installs the global subscriber. `MENDLOOP_LOG` wins over `verbosity`.
pub fn init(verbosity: u8, json: bool) {
    let default_level = match verbosity {
        0 => "mendloop=info",
        1 => "mendloop=debug",
        _ => "mendloop=trace",
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
