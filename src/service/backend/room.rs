//! kChat channels seen as bot rooms.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use tracing::{debug, info, instrument};

use crate::{
    base::{
        error::{ApiError, BackendError},
        types::{ChannelType, Res, Void},
    },
    service::api::{Channel, ChannelPatch, NewChannel, UserQuery},
};

use super::{
    KchatBackend, PAGE_SIZE,
    identity::{Person, RoomOccupant},
};

/// A channel in the bot's team.
///
/// The channel id is resolved lazily from the name when it is not known up front.
#[derive(Clone)]
pub struct Room {
    name: String,
    id: Arc<Mutex<Option<String>>>,
    teamid: String,
    bot: KchatBackend,
}

impl Room {
    /// A room whose name and id are both known.
    pub fn resolved(bot: &KchatBackend, name: &str, id: &str, teamid: &str) -> Self {
        Self {
            name: name.trim_start_matches('~').to_string(),
            id: Arc::new(Mutex::new(Some(id.to_string()))),
            teamid: teamid.to_string(),
            bot: bot.clone(),
        }
    }

    pub fn from_channel(bot: &KchatBackend, channel: &Channel) -> Self {
        Self::resolved(bot, &channel.name, &channel.id, &channel.team_id)
    }

    /// A room looked up by name (`~name` or `name`).
    ///
    /// A room that does not exist yet is still returned, so it can be created.
    pub async fn from_name(bot: &KchatBackend, name: &str) -> Res<Self> {
        let name = name.trim_start_matches('~');

        let id = match bot.channelname_to_channelid(name).await {
            Ok(id) => Some(id),
            Err(err) if matches!(err.downcast_ref::<BackendError>(), Some(BackendError::RoomDoesNotExist(_))) => {
                info!("{}", err);
                None
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            name: name.to_string(),
            id: Arc::new(Mutex::new(id)),
            teamid: bot.team_id.clone(),
            bot: bot.clone(),
        })
    }

    /// A room looked up by channel id.
    pub async fn from_id(bot: &KchatBackend, channelid: &str) -> Res<Self> {
        let name = bot.channelid_to_channelname(channelid).await?;
        Ok(Self::resolved(bot, &name, channelid, &bot.team_id))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn teamid(&self) -> &str {
        &self.teamid
    }

    /// The bot's user id.
    pub fn userid(&self) -> &str {
        self.bot.userid()
    }

    fn cached_id(&self) -> Option<String> {
        self.id.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_id(&self, id: Option<String>) {
        if let Ok(mut guard) = self.id.lock() {
            *guard = id;
        }
    }

    pub async fn id(&self) -> Res<String> {
        if let Some(id) = self.cached_id() {
            return Ok(id);
        }

        let channel = self.channel().await?;
        self.set_id(Some(channel.id.clone()));

        Ok(channel.id)
    }

    async fn channel(&self) -> Res<Channel> {
        match self.bot.api.get_channel_by_name(&self.teamid, &self.name).await {
            Ok(channel) => Ok(channel),
            Err(ApiError::ResourceNotFound(message)) => Err(BackendError::RoomDoesNotExist(format!("{}: {}", self.name, message)).into()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn private(&self) -> Res<bool> {
        Ok(ChannelType::from_code(&self.channel().await?.channel_type) == ChannelType::Private)
    }

    /// Whether the room exists among joined or public channels.
    pub async fn exists(&self) -> Res<bool> {
        let channels = self.bot.channels(false).await?;
        Ok(channels.iter().any(|c| c.name == self.name))
    }

    pub async fn joined(&self) -> Res<bool> {
        let channels = self.bot.api.get_channels_for_user(self.userid(), &self.teamid).await?;
        Ok(channels.iter().any(|c| c.name == self.name))
    }

    pub async fn topic(&self) -> Res<Option<String>> {
        let header = self.channel().await?.header;
        Ok(Some(header).filter(|h| !h.is_empty()))
    }

    pub async fn set_topic(&self, topic: &str) -> Void {
        let patch = ChannelPatch {
            header: Some(topic.to_string()),
            ..Default::default()
        };

        self.bot.api.patch_channel(&self.id().await?, &patch).await.map_err(BackendError::room)?;
        Ok(())
    }

    pub async fn purpose(&self) -> Res<Option<String>> {
        let purpose = self.channel().await?.purpose;
        Ok(Some(purpose).filter(|p| !p.is_empty()))
    }

    pub async fn set_purpose(&self, purpose: &str) -> Void {
        let patch = ChannelPatch {
            purpose: Some(purpose.to_string()),
            ..Default::default()
        };

        self.bot.api.patch_channel(&self.id().await?, &patch).await.map_err(BackendError::room)?;
        Ok(())
    }

    /// Everyone in the room, fetched page by page.
    #[instrument(skip(self), fields(room = %self))]
    pub async fn occupants(&self) -> Res<Vec<RoomOccupant>> {
        let id = self.id().await?;
        let member_count = self.bot.api.get_channel_stats(&id).await?.member_count;

        let mut members = Vec::with_capacity(member_count);
        for page in 0..member_count.div_ceil(PAGE_SIZE) {
            members.extend(self.bot.api.get_channel_members(&id, page, PAGE_SIZE).await?);
        }

        let occupants = members
            .into_iter()
            .map(|member| {
                let person = Person::new(self.bot.api.clone(), member.user_id, Some(id.clone()), Some(self.teamid.clone()));
                RoomOccupant::new(person, self.clone())
            })
            .collect();

        Ok(occupants)
    }

    /// Creates the room (public unless `private`) and reports it as joined.
    pub async fn create(&self, private: bool) -> Void {
        let channel_type = if private {
            info!("Creating private group {}", self);
            ChannelType::Private
        } else {
            info!("Creating public channel {}", self);
            ChannelType::Open
        };

        let request = NewChannel {
            team_id: self.teamid.clone(),
            name: self.name.clone(),
            display_name: self.name.clone(),
            channel_type: channel_type.as_str().to_string(),
        };

        self.bot.api.create_channel(&request).await.map_err(BackendError::room)?;

        let channel = self.bot.api.get_channel_by_name(&self.teamid, &self.name).await.map_err(BackendError::room)?;
        self.set_id(Some(channel.id));

        self.bot.callback_room_joined(self).await;

        Ok(())
    }

    /// Joins the room, creating it as a public channel when it does not exist.
    pub async fn join(&self) -> Void {
        if !self.exists().await? {
            info!("Channel {} doesn't seem to exist, trying to create it.", self);
            self.create(false).await?;
        }

        let id = self.id().await?;
        info!("Joining channel {} ({})", self, id);

        self.bot.api.add_channel_member(&id, self.userid()).await.map_err(BackendError::room)?;
        self.bot.callback_room_joined(self).await;

        Ok(())
    }

    pub async fn leave(&self) -> Void {
        let id = self.id().await?;
        info!("Leaving channel {} ({})", self, id);

        self.bot.api.remove_channel_member(&id, self.userid()).await.map_err(BackendError::room)?;
        self.bot.callback_room_left(self).await;

        Ok(())
    }

    pub async fn destroy(&self) -> Void {
        let id = self.id().await?;

        if let Err(err) = self.bot.api.delete_channel(&id).await {
            debug!("Could not delete the channel. Are you a member of the channel?");
            return Err(BackendError::room(err).into());
        }

        self.bot.callback_room_left(self).await;
        self.set_id(None);

        Ok(())
    }

    /// Invites users (by username) who are in the team but not yet in the room.
    #[instrument(skip(self), fields(room = %self))]
    pub async fn invite(&self, usernames: &[&str]) -> Void {
        let id = self.id().await?;
        let user_count = self.bot.api.get_team_stats(&self.teamid).await?.total_member_count;

        let mut candidates = HashMap::new();
        for page in 0..user_count.div_ceil(PAGE_SIZE) {
            let query = UserQuery {
                page,
                per_page: PAGE_SIZE,
                in_team: Some(self.teamid.clone()),
                not_in_channel: Some(id.clone()),
            };

            for user in self.bot.api.get_users(&query).await? {
                candidates.insert(user.username, user.id);
            }
        }

        for username in usernames {
            let username = username.trim_start_matches('@');
            let Some(userid) = candidates.get(username) else {
                return Err(BackendError::UserDoesNotExist(format!("User '{username}' not found")).into());
            };

            info!("Inviting {} into {} ({})", username, self, id);

            if self.bot.api.add_channel_member(&id, userid).await.is_err() {
                return Err(BackendError::Room(format!("Unable to invite {username} to channel {self} ({id})")).into());
            }
        }

        Ok(())
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}", self.name)
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("id", &self.cached_id())
            .field("teamid", &self.teamid)
            .finish()
    }
}

impl PartialEq for Room {
    fn eq(&self, other: &Self) -> bool {
        match (self.cached_id(), other.cached_id()) {
            (Some(a), Some(b)) => a == b,
            _ => self.teamid == other.teamid && self.name == other.name,
        }
    }
}
