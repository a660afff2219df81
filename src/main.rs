use clap::Parser;
use gamewarden::cli::{print_error, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "gamewarden=info";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    if let Err(e) = cli.execute().await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// `--log-level` wins over `RUST_LOG`, which wins over the default
fn init_tracing(level: Option<&str>) {
    let filter = build_filter(level);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn build_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
