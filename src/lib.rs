//! Library root for `kchat-bot`.
//!
//! kchat-bot connects a chat bot to the kChat messaging platform:
//! - Authenticates against the kChat REST API and resolves the bot's team
//! - Streams websocket events and turns them into messages, presence, and room notifications
//! - Delivers those to an ordered chain of plugins, which can reply, send cards, and manage rooms
//! - Reconnects with exponential backoff when the stream drops
//!
//! The kChat API sits behind a trait so the backend can be exercised against a mock.

pub mod base;
pub mod interaction;
pub mod prelude;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::{info, warn};

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the kchat-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with the kChat client and plugins
/// - Serves sessions until interrupted
pub async fn start(config: Config) -> Void {
    info!("Starting kchat-bot ...");

    // Start the crypto provider.
    if crypto::ring::default_provider().install_default().is_err() {
        warn!("A crypto provider was already installed.");
    }

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config)?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
