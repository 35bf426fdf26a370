//! bufobot entry point: CLI parsing, logging setup, startup wiring.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use bsky_core::BskyClient;
use bufo_bot::bot::Bot;
use bufo_bot::catalog::{filter_excluded, CatalogClient};
use bufo_bot::config::Config;
use bufo_bot::cooldown::CooldownTracker;
use bufo_bot::firehose::Firehose;
use bufo_bot::matcher::BufoMatcher;
use bufo_bot::publisher::{BskyHistory, BskyPublisher};

#[derive(Parser)]
#[command(name = "bufobot")]
#[command(about = "Bluesky bot that replies with bufo reaction images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "bufobot.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot against the live firehose
    Run,
    /// Print matches from the live firehose without posting anything
    DryRun {
        /// Stop after this many matches
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Check configuration and collaborators, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    init_logging(&config.logging.level);
    config.validate().context("configuration validation failed")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bot(config).await,
        Commands::DryRun { limit } => dry_run(config, limit).await,
        Commands::Check => check(config).await,
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .init();
}

async fn build_matcher(config: &Config) -> Result<BufoMatcher> {
    let catalog = CatalogClient::new(&config.catalog.url)?;
    let bufos = catalog.load().await.unwrap_or_else(|e| {
        error!("failed to load bufo catalog: {e:#}");
        Vec::new()
    });
    if bufos.is_empty() {
        bail!("no bufos loaded, refusing to start");
    }
    let bufos = filter_excluded(bufos, &config.matcher.exclude_patterns)?;
    BufoMatcher::new(bufos, config.matcher.min_phrase_words)
}

async fn run_bot(config: Config) -> Result<()> {
    info!("starting bufobot v{}", env!("CARGO_PKG_VERSION"));

    let matcher = build_matcher(&config).await?;

    let (handle, password) = config.require_credentials()?;
    let client = Arc::new(
        BskyClient::login(&config.bluesky.service, handle, password)
            .await
            .context("bluesky login failed")?,
    );

    let publisher = Arc::new(BskyPublisher::new(
        client.clone(),
        config.posting.quote_chance,
    )?);
    let history = Arc::new(BskyHistory::new(client));
    let cooldowns = CooldownTracker::new(chrono::Duration::minutes(config.cooldown.minutes));

    if !config.posting.enabled {
        info!("posting disabled; matches will only be logged");
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let (post_tx, post_rx) = mpsc::channel(1000);

    let consumer =
        Firehose::new(&config.jetstream.endpoint).start(post_tx, shutdown_tx.subscribe());

    let mut bot = Bot::new(matcher, cooldowns, publisher, history, config.posting.enabled);
    let bot_shutdown = shutdown_tx.subscribe();
    let runner = tokio::spawn(async move { bot.run(post_rx, bot_shutdown).await });

    wait_for_shutdown().await?;
    info!("received shutdown signal, stopping");
    let _ = shutdown_tx.send(());
    let _ = runner.await;
    let _ = consumer.await;
    Ok(())
}

async fn dry_run(config: Config, limit: usize) -> Result<()> {
    let matcher = build_matcher(&config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let (post_tx, mut post_rx) = mpsc::channel(1000);
    let consumer =
        Firehose::new(&config.jetstream.endpoint).start(post_tx, shutdown_tx.subscribe());

    info!("dry run: printing up to {limit} matches, posting nothing");
    let mut seen = 0usize;
    while let Some(post) = post_rx.recv().await {
        let Some(found) = matcher.find_match(&post.text) else {
            continue;
        };
        seen += 1;
        let preview: String = post.text.chars().take(200).collect();
        println!("{}", "=".repeat(60));
        println!("POST:   {preview}");
        println!("BUFO:   {}", found.name);
        println!("PHRASE: {}", found.phrase);
        if seen >= limit {
            println!("{}", "=".repeat(60));
            println!("stopping after {limit} matches");
            break;
        }
    }

    let _ = shutdown_tx.send(());
    let _ = consumer.await;
    Ok(())
}

async fn check(config: Config) -> Result<()> {
    println!("checking configuration...");
    println!("✓ configuration is valid");

    let catalog = CatalogClient::new(&config.catalog.url)?;
    let bufos = catalog.load().await.context("catalog fetch failed")?;
    if bufos.is_empty() {
        bail!("catalog is empty");
    }
    println!("✓ catalog reachable ({} bufos)", bufos.len());

    let bufos = filter_excluded(bufos, &config.matcher.exclude_patterns)?;
    let matcher = BufoMatcher::new(bufos, config.matcher.min_phrase_words)?;
    println!("✓ phrase index built ({} phrases)", matcher.len());

    match config.require_credentials() {
        Ok((handle, password)) => {
            let client = BskyClient::login(&config.bluesky.service, handle, password)
                .await
                .context("bluesky login failed")?;
            println!("✓ logged in as {} ({})", client.handle(), client.did());
        }
        Err(e) => println!("⚠ skipping login check: {e}"),
    }

    println!();
    println!("everything looks good");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to register SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("failed to register SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}
