mod cli;

use crate::cli::{Command, LogFormat, CLI};
use anyhow::Context;
use clap::Parser;
use snip_core::{CreateOutcome, Shortener};
use snip_generator::DigestGenerator;
use snip_shortener::{ServiceSettings, ShortenerService};
use snip_storage::{Store, StoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    let store_config = StoreConfig::from_settings(config.file_storage_path, config.database_dsn);
    let store = Store::open(&store_config)
        .await
        .context("failed to open storage backend")?;

    info!(
        storage_backend = store.kind(),
        base_url = %config.base_url,
        timeout_ms = config.timeout_ms,
        "starting snip"
    );

    let settings = ServiceSettings::builder()
        .base_url(config.base_url)
        .operation_timeout(Duration::from_millis(config.timeout_ms))
        .build();
    let shortener: Arc<dyn Shortener> = Arc::new(ShortenerService::new(
        store,
        DigestGenerator::new(),
        settings,
    ));

    run(shortener.as_ref(), config.command).await
}

async fn run(shortener: &dyn Shortener, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Shorten { url, owner } => {
            let outcome = shortener.create_short(&url, owner).await?;
            let short_url = shortener.short_url(outcome.code());
            match outcome {
                CreateOutcome::Created(_) => println!("{short_url}"),
                CreateOutcome::Existing(_) => println!("{short_url} (already shortened)"),
            }
        }
        Command::Batch { owner, items } => {
            for result in shortener.create_batch(items, owner).await? {
                println!(
                    "{}\t{}",
                    result.correlation_id,
                    shortener.short_url(&result.code)
                );
            }
        }
        Command::Expand { code } => {
            let record = shortener.expand(&code).await?;
            println!("{}", record.original_url);
        }
        Command::List { owner } => {
            for url in shortener.list_owned(owner).await? {
                println!("{}\t{}", url.short_url, url.original_url);
            }
        }
        Command::Delete { owner, codes } => {
            let count = codes.len();
            shortener.delete_owned(owner, codes).await?;
            println!("processed {count} deletion request(s)");
        }
        Command::Stats => {
            let stats = shortener.stats().await?;
            println!("urls\t{}\nusers\t{}", stats.urls, stats.users);
        }
        Command::Ping => {
            shortener
                .health_check()
                .await
                .context("storage backend is unhealthy")?;
            println!("ok");
        }
    }

    Ok(())
}
