use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Log filter for the CLI; sqlx statement logging is always off
pub fn filter_directive(quiet: bool) -> &'static str {
    if quiet {
        "payroll_ingest=warn,sqlx=off"
    } else {
        "payroll_ingest=info,sqlx=off"
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(quiet)));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
