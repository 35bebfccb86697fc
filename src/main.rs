use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use castkeeper::jobs::JobOutcome;
use castkeeper::{App, Config};

const USAGE: &str = "usage: castkeeper [--config <path>] [--add <url> | --refresh | --download | --download-missing | --check | --sizes | --images | --backup | --unlock]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (info and above unless RUST_LOG says otherwise)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    // --config may appear anywhere; strip it before looking at the command
    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let Some(path) = args.get(i + 1).cloned() else {
                anyhow::bail!("--config needs a path\n{USAGE}");
            };
            args.drain(i..=i + 1);
            Some(PathBuf::from(path))
        }
        None => None,
    };

    // Load configuration
    let config = match &config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let app = Arc::new(App::new(&config).await.context("failed to open database")?);

    match args.first().map(String::as_str) {
        None => {
            app.run_periodic(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for ctrl-c: {}", e);
                }
            })
            .await?;
        }
        Some("--add") => {
            let Some(url) = args.get(1) else {
                anyhow::bail!("--add needs a feed url\n{USAGE}");
            };
            let feed = app.add_feed(url).await?;
            println!("Added {} ({})", feed.title, feed.url);
            report("download", app.download_pending().await?);
        }
        Some("--refresh") => report("refresh", app.refresh_all().await?),
        Some("--download") => report("download", app.download_pending().await?),
        Some("--download-missing") => report("download", app.download_all_missing().await?),
        Some("--check") => report("check", app.check_consistency().await?),
        Some("--sizes") => report("sizes", app.backfill_sizes().await?),
        Some("--images") => report("images", app.backfill_images().await?),
        Some("--backup") => report("backup", app.create_backup().await?),
        Some("--unlock") => report("unlock", app.unlock_stale_jobs().await?),
        Some(other) => anyhow::bail!("unknown argument {other:?}\n{USAGE}"),
    }

    Ok(())
}

fn report<T: std::fmt::Debug>(job: &str, outcome: JobOutcome<T>) {
    match outcome {
        JobOutcome::Completed(value) => println!("{job}: {value:?}"),
        JobOutcome::Skipped => println!("{job}: already running, skipped"),
    }
}
