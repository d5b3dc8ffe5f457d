// src/logging.rs

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing(json: bool) {
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,aws_config=warn"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    // try_init: tests and embedders may already have one installed
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
