//! Logs what happens around the bot: connections, presence, and room membership.

use async_trait::async_trait;

use crate::{
    prelude::*,
    service::backend::{
        KchatBackend,
        identity::Identifier,
        message::{Message, Presence},
        room::Room,
    },
};

use super::GenericPlugin;

pub struct ActivityPlugin;

#[async_trait]
impl GenericPlugin for ActivityPlugin {
    fn name(&self) -> &str {
        "activity"
    }

    async fn on_connect(&self, bot: &KchatBackend) -> Void {
        info!("Online as {} in team {}.", bot.bot_identifier.person().await, bot.team_id);
        Ok(())
    }

    async fn on_disconnect(&self, _bot: &KchatBackend) -> Void {
        warn!("Disconnected from kChat.");
        Ok(())
    }

    async fn on_mention(&self, _bot: &KchatBackend, message: &Message, mentions: &[Identifier]) -> Void {
        debug!("Post {} mentions {} identifier(s).", message.extras.id, mentions.len());
        Ok(())
    }

    async fn on_presence(&self, _bot: &KchatBackend, presence: &Presence) -> Void {
        debug!("{} is now {}.", presence.identifier, presence.status);
        Ok(())
    }

    async fn on_room_joined(&self, _bot: &KchatBackend, room: &Room) -> Void {
        info!("Joined {}.", room);
        Ok(())
    }

    async fn on_room_left(&self, _bot: &KchatBackend, room: &Room) -> Void {
        info!("Left {}.", room);
        Ok(())
    }
}
