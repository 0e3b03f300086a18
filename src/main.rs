//! cmsport - migrate a legacy content database into a headless CMS.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cmsport::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "cmsport=info"
    } else {
        "cmsport=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = cli::run().await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
