//! Binary entry point for `kchat-bot`.
//!
//! This module provides the command-line interface for kchat-bot with options
//! for configuration file paths and logging verbosity. It initializes the
//! necessary components and starts the service.

use std::{fs::OpenOptions, sync::Mutex};

use clap::Parser;
use kchat_bot::base::{config::Config, types::Void};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Kchat-bot: a chat bot for the kChat messaging platform.
///
/// Configuration can come from `config.toml` or environment variables
/// prefixed with `KCHAT_BOT_`. The bot keeps a websocket session open with
/// kChat and hands incoming messages, mentions, presence changes, and room
/// membership changes to its plugins.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the bot will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: the configured `bot_log_level`
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Main entry point for the kchat-bot binary.
///
/// Loads configuration, sets up logging based on verbosity, and starts the bot.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    // Construct the level filter.

    let level = match args.verbose {
        0 => config.bot_log_level.as_tracing(),
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layers.

    let stdout = tracing_subscriber::fmt::layer()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let file = match &config.bot_log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_target(true).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    // Prepare the otlp layer.

    let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("kchat-bot");
    let otel = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry().with(otel).with(level_filter).with(stdout).with(file).init();

    kchat_bot::start(config).await
}
