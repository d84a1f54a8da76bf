//! Plugins and the chain that delivers backend callbacks to them.
//!
//! This module provides:
//! - The `GenericPlugin` trait, whose callbacks default to doing nothing
//! - `PluginChain`, which orders plugins by `plugins_callback_order`
//! - The built-in `commands` and `activity` plugins

pub mod activity;
pub mod commands;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    base::config::CallbackOrder,
    prelude::*,
    service::backend::{
        KchatBackend,
        identity::Identifier,
        message::{Message, Presence},
        room::Room,
    },
};

// Traits.

/// Generic plugin trait.
///
/// Every callback has a no-op default, so plugins only implement what they react to.
#[async_trait]
pub trait GenericPlugin: Send + Sync + 'static {
    /// The name used in `plugins_callback_order`.
    fn name(&self) -> &str;

    /// Called once the event stream is subscribed.
    async fn on_connect(&self, _bot: &KchatBackend) -> Void {
        Ok(())
    }

    /// Called whenever a session ends.
    async fn on_disconnect(&self, _bot: &KchatBackend) -> Void {
        Ok(())
    }

    /// Called for every incoming message not sent by the bot.
    async fn on_message(&self, _bot: &KchatBackend, _message: &Message) -> Void {
        Ok(())
    }

    /// Called for every message the bot has sent.
    async fn on_bot_message(&self, _bot: &KchatBackend, _message: &Message) -> Void {
        Ok(())
    }

    /// Called after `on_message` when the message mentions people.
    async fn on_mention(&self, _bot: &KchatBackend, _message: &Message, _mentions: &[Identifier]) -> Void {
        Ok(())
    }

    async fn on_presence(&self, _bot: &KchatBackend, _presence: &Presence) -> Void {
        Ok(())
    }

    async fn on_room_joined(&self, _bot: &KchatBackend, _room: &Room) -> Void {
        Ok(())
    }

    async fn on_room_left(&self, _bot: &KchatBackend, _room: &Room) -> Void {
        Ok(())
    }
}

// Structs.

/// Ordered set of plugins.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Arc<Vec<Arc<dyn GenericPlugin>>>,
}

impl PluginChain {
    /// Orders `plugins` by `order`.
    ///
    /// Named plugins come in the listed order; a `None` entry expands to every
    /// plugin the order does not name, in their given order. Plugins neither
    /// named nor covered by a `None` entry are not called.
    pub fn new(plugins: Vec<Arc<dyn GenericPlugin>>, order: &CallbackOrder) -> Self {
        let named: Vec<&str> = order.0.iter().flatten().map(String::as_str).collect();
        let mut ordered: Vec<Arc<dyn GenericPlugin>> = Vec::with_capacity(plugins.len());

        for entry in &order.0 {
            match entry {
                Some(name) => match plugins.iter().find(|p| p.name() == name.as_str()) {
                    Some(plugin) => ordered.push(plugin.clone()),
                    None => warn!("Plugin `{}` in the callback order is not available.", name),
                },
                None => ordered.extend(plugins.iter().filter(|p| !named.contains(&p.name())).cloned()),
            }
        }

        Self { plugins: Arc::new(ordered) }
    }

    /// The built-in plugins, ordered by the configuration.
    pub fn builtin(config: &Config) -> Self {
        let plugins: Vec<Arc<dyn GenericPlugin>> = vec![Arc::new(commands::CommandsPlugin::new(config)), Arc::new(activity::ActivityPlugin)];

        Self::new(plugins, &config.plugins_callback_order)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    fn report(plugin: &dyn GenericPlugin, callback: &str, result: Void) {
        if let Err(err) = result {
            error!("Plugin `{}` raised an error in {}: {:#}", plugin.name(), callback, err);
        }
    }

    pub async fn connect(&self, bot: &KchatBackend) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_connect", plugin.on_connect(bot).await);
        }
    }

    pub async fn disconnect(&self, bot: &KchatBackend) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_disconnect", plugin.on_disconnect(bot).await);
        }
    }

    pub async fn message(&self, bot: &KchatBackend, message: &Message) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_message", plugin.on_message(bot, message).await);
        }
    }

    pub async fn bot_message(&self, bot: &KchatBackend, message: &Message) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_bot_message", plugin.on_bot_message(bot, message).await);
        }
    }

    pub async fn mention(&self, bot: &KchatBackend, message: &Message, mentions: &[Identifier]) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_mention", plugin.on_mention(bot, message, mentions).await);
        }
    }

    pub async fn presence(&self, bot: &KchatBackend, presence: &Presence) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_presence", plugin.on_presence(bot, presence).await);
        }
    }

    pub async fn room_joined(&self, bot: &KchatBackend, room: &Room) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_room_joined", plugin.on_room_joined(bot, room).await);
        }
    }

    pub async fn room_left(&self, bot: &KchatBackend, room: &Room) {
        for plugin in self.plugins.iter() {
            Self::report(plugin.as_ref(), "on_room_left", plugin.on_room_left(bot, room).await);
        }
    }
}
