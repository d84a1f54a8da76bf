//! Runtime services and shared state for the kchat-bot.

use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    interaction::PluginChain,
    service::{
        api::ApiClient,
        backend::{
            KchatBackend,
            events::{EventHandler, EventRegistry},
        },
    },
};

/// First reconnection delay, in seconds.
const RECONNECT_INITIAL_DELAY: f64 = 1.0;
/// Growth factor between consecutive reconnection attempts.
const RECONNECT_MULTIPLIER: f64 = 1.75;
/// Upper bound on the reconnection delay, in seconds.
const RECONNECT_MAX_DELAY: f64 = 600.0;

/// Delay before reconnection attempt number `attempt` (starting at zero).
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(64) as i32;
    let secs = (RECONNECT_INITIAL_DELAY * RECONNECT_MULTIPLIER.powi(exponent)).min(RECONNECT_MAX_DELAY);
    Duration::from_secs_f64(secs)
}

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration, the kChat API client, the plugins, and
/// the event handler registry. Each of them is trivially cloneable, and all of
/// them outlive the individual sessions opened by `start`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The kChat API client instance.
    pub api: ApiClient,
    /// The plugins receiving backend callbacks.
    pub plugins: PluginChain,
    /// Websocket event handlers.
    pub events: EventRegistry,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub fn new(config: Config) -> Res<Self> {
        prepare_directories(&config)?;

        // Initialize the kChat client.
        let api = ApiClient::http(&config)?;

        // Initialize the plugins.
        let plugins = PluginChain::builtin(&config);
        info!("Plugins in callback order: {:?}", plugins.names());

        Ok(Self {
            config,
            api,
            plugins,
            events: EventRegistry::default(),
        })
    }

    /// Appends a handler for a websocket event; it applies to every future session.
    pub fn register_handler(&self, event: &str, handler: EventHandler) {
        self.events.register(event, handler);
    }

    /// Serves sessions until interrupted, reconnecting with exponential backoff.
    pub async fn start(&self) -> Void {
        self.start_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serves sessions until `shutdown` resolves, then takes the bot offline.
    pub async fn start_until(&self, shutdown: impl Future<Output = ()>) -> Void {
        tokio::pin!(shutdown);

        let mut attempt = 0u32;
        let mut last_session: Option<KchatBackend> = None;

        loop {
            let connected = tokio::select! {
                connected = KchatBackend::connect(self.config.clone(), self.api.clone(), self.plugins.clone(), self.events.clone()) => connected,
                _ = &mut shutdown => {
                    info!("Interrupt received while connecting, shutting down..");
                    break;
                }
            };

            match connected {
                Ok(backend) => {
                    last_session = Some(backend.clone());

                    let outcome = backend.serve_until(&mut shutdown).await;

                    if outcome.connected {
                        attempt = 0;
                    }

                    if outcome.shutdown {
                        break;
                    }
                }
                Err(err) => error!("Failed to connect to kChat: {:#}", err),
            }

            let delay = reconnect_delay(attempt);
            warn!("Reconnecting in {:.1}s (attempt {}).", delay.as_secs_f64(), attempt + 1);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Interrupt received while waiting to reconnect, shutting down..");
                    break;
                }
            }

            attempt = attempt.saturating_add(1);
        }

        if let Some(backend) = last_session {
            if let Err(err) = backend.shutdown().await {
                error!("Error while shutting down: {:#}", err);
            }
        }

        info!("Bye.");

        Ok(())
    }
}

/// Creates the data directory and reports the auxiliary directories.
fn prepare_directories(config: &Config) -> Void {
    std::fs::create_dir_all(&config.bot_data_dir)?;
    info!("Bot data directory: {} (storage: {:?})", config.bot_data_dir.display(), config.storage);

    if let Some(dir) = &config.bot_extra_plugin_dir {
        info!("Extra plugin directory: {}", dir.display());
    }

    if let Some(dir) = &config.bot_extra_backend_dir {
        info!("Extra backend directory: {}", dir.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1), Duration::from_secs_f64(1.75));
        assert!(reconnect_delay(5) > reconnect_delay(4));
        assert_eq!(reconnect_delay(40), Duration::from_secs(600));
        assert_eq!(reconnect_delay(u32::MAX), Duration::from_secs(600));
    }
}
