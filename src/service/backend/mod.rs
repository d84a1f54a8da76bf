//! The kChat backend.
//!
//! This module turns kChat websocket events into messages, presence changes, and
//! room notifications for the plugin chain, and carries out what plugins ask for:
//! - Sending (chunked) messages, cards, and files
//! - Resolving people and rooms from their textual forms
//! - Listing and managing rooms, and changing the bot's presence

pub mod events;
pub mod identity;
pub mod message;
pub mod room;

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex},
};

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        error::{ApiError, BackendError},
        text::prepare_message_body,
        types::{Res, Status, Void},
    },
    interaction::PluginChain,
    service::{
        api::{ApiClient, Channel, NewPost, Post},
        websocket::{KchatWebsocket, normalize_event, team_channel},
    },
};

use events::{EventHandler, EventRegistry};
use identity::{Identifier, Person, RoomOccupant};
use message::{Card, Message, MessageExtras, Presence, Stream};
use room::Room;

/// Page size for paged channel and user listings.
pub const PAGE_SIZE: usize = 200;

/// Number of direct channels remembered per session.
const DIRECT_CHANNEL_CACHE_SIZE: usize = 1024;

/// How a served session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeOutcome {
    /// The operator asked the bot to stop.
    pub shutdown: bool,
    /// The event stream was established before it ended.
    pub connected: bool,
}

/// The kChat backend for one authenticated session.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct KchatBackend {
    inner: Arc<KchatBackendInner>,
}

impl Deref for KchatBackend {
    type Target = KchatBackendInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub struct KchatBackendInner {
    pub config: Config,
    pub api: ApiClient,
    /// Id of the configured team.
    pub team_id: String,
    /// The bot's own identity.
    pub bot_identifier: Person,
    plugins: PluginChain,
    events: EventRegistry,
    direct_channels: Mutex<HashMap<(String, String), Channel>>,
}

impl KchatBackend {
    /// Logs in and resolves the team and the bot user.
    #[instrument(name = "KchatBackend::connect", skip_all)]
    pub async fn connect(config: Config, api: ApiClient, plugins: PluginChain, events: EventRegistry) -> Res<Self> {
        let me = api.login().await?;
        let team = api.get_team_by_name(&config.bot_identity.team).await?;

        info!("Connected to team `{}` ({}) as `{}` ({}).", team.name, team.id, me.username, me.id);

        let bot_identifier = Person::with_profile(api.clone(), me, None, Some(team.id.clone()));

        Ok(Self {
            inner: Arc::new(KchatBackendInner {
                config,
                api,
                team_id: team.id,
                bot_identifier,
                plugins,
                events,
                direct_channels: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The bot's user id.
    pub fn userid(&self) -> &str {
        self.bot_identifier.userid()
    }

    pub fn mode(&self) -> &'static str {
        "kchat"
    }

    pub fn message_size_limit(&self) -> usize {
        self.config.message_size_limit
    }

    /// Appends a handler for a websocket event.
    pub fn register_handler(&self, event: &str, handler: EventHandler) {
        self.events.register(event, handler);
    }

    // Serving.

    /// Streams events until the connection drops or the process is interrupted.
    ///
    /// The disconnect callback runs however the session ends.
    pub async fn serve(&self) -> ServeOutcome {
        self.serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Streams events until the connection drops or `shutdown` resolves.
    ///
    /// The session only counts as connected once the server has sent an event.
    #[instrument(skip_all)]
    pub async fn serve_until(&self, shutdown: impl Future<Output = ()>) -> ServeOutcome {
        tokio::pin!(shutdown);

        let mut outcome = ServeOutcome { shutdown: false, connected: false };
        self.stream_events(&mut shutdown, &mut outcome).await;

        debug!("Triggering disconnect callback");
        self.disconnect_callback().await;

        outcome
    }

    async fn stream_events(&self, shutdown: &mut (impl Future<Output = ()> + Unpin), outcome: &mut ServeOutcome) {
        let identity = &self.config.bot_identity;
        let websocket = KchatWebsocket::new(&identity.websocket_url, identity.timeout, self.api.clone());

        let opened = tokio::select! {
            opened = websocket.open(&self.team_id, self.userid()) => opened,
            _ = &mut *shutdown => {
                info!("Interrupt received, shutting down..");
                outcome.shutdown = true;
                return;
            }
        };

        let mut frames = match opened {
            Ok(frames) => frames,
            Err(err) => {
                error!("Error reading from the event stream: {:#}", err);
                return;
            }
        };

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        outcome.connected = true;
                        self.dispatch(&frame).await;
                    }
                    None => {
                        warn!("Event stream ended.");
                        return;
                    }
                },
                _ = &mut *shutdown => {
                    info!("Interrupt received, shutting down..");
                    outcome.shutdown = true;
                    return;
                }
            }
        }
    }

    /// Routes one raw websocket frame to the handlers registered for its event.
    ///
    /// Handler failures are logged; they never interrupt the stream.
    pub async fn dispatch(&self, payload: &str) {
        if payload.trim().is_empty() {
            return;
        }

        let Some(event) = normalize_event(payload) else {
            debug!("Ignoring frame that is not a JSON object: {}", payload);
            return;
        };

        let Some(name) = event.get("event").and_then(Value::as_str).map(str::to_string) else {
            debug!("Message contains no event: {}", payload);
            return;
        };

        let Some(handlers) = self.events.handlers(&name) else {
            debug!("No event handlers available for {}, ignoring.", name);
            return;
        };

        for handler in handlers {
            let result = match handler {
                EventHandler::Message => self.handle_message_event(&event).await,
                EventHandler::StatusChange => self.handle_status_change_event(&event).await,
                EventHandler::Hello => self.handle_hello_event(&event).await,
                EventHandler::RoomJoined => self.handle_room_membership_event(&event, true).await,
                EventHandler::RoomLeft => self.handle_room_membership_event(&event, false).await,
                EventHandler::Custom(f) => f(self.clone(), event.clone()).await,
            };

            if let Err(err) = result {
                error!("{} event handler raised an error: {:#}", name, err);
            }
        }
    }

    // Builtin event handlers.

    #[instrument(skip_all)]
    async fn handle_message_event(&self, event: &Map<String, Value>) -> Void {
        debug!("{:?}", event);

        // Direct messages carry an empty team id.
        let team_id = str_field(event, "team_id").unwrap_or_default();
        if !team_id.is_empty() && team_id != self.team_id {
            info!("Message came from another team ({}), ignoring...", team_id);
            return Ok(());
        }

        let Some(channel_id) = str_field(event, "channel_id") else {
            error!("Couldn't find a channel id for event {:?}", event);
            return Ok(());
        };

        let is_direct = str_field(event, "channel_type") == Some("D");
        let channel_name = if is_direct { channel_id } else { str_field(event, "channel_name").unwrap_or(channel_id) };

        let post: Post = match event.get("post") {
            Some(post) => serde_json::from_value(post.clone())?,
            None => Post::default(),
        };

        if post.post_type == "system_add_remove" {
            info!("Ignoring message from System");
            return Ok(());
        }

        let userid = str_field(event, "user_id").or(Some(post.user_id.as_str()).filter(|u| !u.is_empty()));
        let Some(userid) = userid else {
            error!("No user id in event {:?}", event);
            return Ok(());
        };

        let mentions = match event.get("mentions") {
            Some(mentions) => self.mentions_build_identifier(&parse_mentions(mentions)).await?,
            None => Vec::new(),
        };

        let parent = if post.root_id.is_empty() {
            None
        } else {
            Some(Box::new(Message::from_post(&self.api.get_post(&post.root_id).await?)))
        };

        let mut message = Message {
            body: post.message.clone(),
            parent,
            extras: MessageExtras {
                id: post.id.clone(),
                root_id: post.root_id.clone(),
                url: Some(self.config.bot_identity.permalink(&post.id)),
                attachments: post.file_ids.clone(),
                event: Some(Value::Object(event.clone())),
            },
            ..Default::default()
        };

        let team = Some(self.team_id.clone());

        if is_direct {
            message.frm = Some(Person::new(self.api.clone(), userid, Some(channel_id.to_string()), team.clone()).into());
            message.to = Some(Person::new(self.api.clone(), self.userid(), Some(channel_id.to_string()), team).into());
        } else {
            let room = Room::resolved(self, channel_name, channel_id, &self.team_id);
            let person = Person::new(self.api.clone(), userid, Some(channel_id.to_string()), team);

            message.frm = Some(RoomOccupant::new(person, room.clone()).into());
            message.to = Some(room.into());
        }

        self.callback_message(&message).await;

        if !mentions.is_empty() {
            self.callback_mention(&message, &mentions).await;
        }

        Ok(())
    }

    async fn handle_status_change_event(&self, event: &Map<String, Value>) -> Void {
        let userid = str_field(event, "user_id").ok_or_else(|| anyhow::anyhow!("Status change without a user id."))?;
        let raw = str_field(event, "status").unwrap_or_default();

        let status = raw.parse::<Status>().unwrap_or_else(|_| {
            error!("It appears the kChat API changed, I received an unknown status type {}", raw);
            Status::Online
        });

        let presence = Presence {
            identifier: Person::new(self.api.clone(), userid, None, None).into(),
            status,
        };

        self.callback_presence(&presence).await;

        Ok(())
    }

    /// Subscription confirmations arrive once per channel; only the team channel's counts.
    async fn handle_hello_event(&self, event: &Map<String, Value>) -> Void {
        if let Some(channel) = str_field(event, "channel") {
            if channel != team_channel(&self.team_id) {
                debug!("Subscribed to {}.", channel);
                return Ok(());
            }
        }

        self.connect_callback().await;

        let presence = Presence {
            identifier: self.bot_identifier.clone().into(),
            status: Status::Online,
        };
        self.callback_presence(&presence).await;

        self.change_presence(Status::Online).await
    }

    async fn handle_room_membership_event(&self, event: &Map<String, Value>, joined: bool) -> Void {
        debug!("User {} channel", if joined { "added to" } else { "removed from" });

        if str_field(event, "user_id") != Some(self.userid()) {
            return Ok(());
        }

        let Some(channel_id) = str_field(event, "channel_id") else {
            warn!("Membership event without a channel id: {:?}", event);
            return Ok(());
        };

        let room = Room::from_id(self, channel_id).await?;

        if joined {
            self.callback_room_joined(&room).await;
        } else {
            self.callback_room_left(&room).await;
        }

        Ok(())
    }

    // Plugin callbacks.

    /// Hands a message to the plugins, unless the bot sent it.
    pub async fn callback_message(&self, message: &Message) {
        if self.is_from_self(message) {
            debug!("Ignoring message from self.");
            return;
        }

        self.plugins.message(self, message).await;
    }

    pub async fn callback_mention(&self, message: &Message, mentions: &[Identifier]) {
        if self.is_from_self(message) {
            return;
        }

        self.plugins.mention(self, message, mentions).await;
    }

    pub async fn callback_presence(&self, presence: &Presence) {
        self.plugins.presence(self, presence).await;
    }

    pub async fn callback_room_joined(&self, room: &Room) {
        self.plugins.room_joined(self, room).await;
    }

    pub async fn callback_room_left(&self, room: &Room) {
        self.plugins.room_left(self, room).await;
    }

    pub async fn connect_callback(&self) {
        self.plugins.connect(self).await;
    }

    pub async fn disconnect_callback(&self) {
        self.plugins.disconnect(self).await;
    }

    // Identifiers.

    /// Converts a name (optionally prefixed with `@`) to a user id.
    pub async fn username_to_userid(&self, name: &str) -> Res<String> {
        let name = name.trim_start_matches('@');

        match self.api.get_user_by_username(name).await {
            Ok(user) if !user.id.is_empty() => Ok(user.id),
            Ok(_) | Err(ApiError::ResourceNotFound(_)) => Err(BackendError::UserDoesNotExist(format!("Cannot find user {name}")).into()),
            Err(err) => Err(err.into()),
        }
    }

    /// The direct channel between two users, created if it does not exist.
    pub async fn get_direct_channel(&self, userid: &str, other_userid: &str) -> Res<Channel> {
        let key = (userid.to_string(), other_userid.to_string());

        if let Some(channel) = self.direct_channels.lock().ok().and_then(|cache| cache.get(&key).cloned()) {
            return Ok(channel);
        }

        let channel = match self.api.create_direct_channel(userid, other_userid).await {
            Ok(channel) => channel,
            Err(err) if err.is_rejection() => {
                return Err(BackendError::RoomDoesNotExist(format!("Could not find direct channel for users with ID {userid} and {other_userid}")).into());
            }
            Err(err) => return Err(err.into()),
        };

        if let Ok(mut cache) = self.direct_channels.lock() {
            if cache.len() >= DIRECT_CHANNEL_CACHE_SIZE {
                cache.clear();
            }
            cache.insert(key, channel.clone());
        }

        Ok(channel)
    }

    /// Converts a textual representation into a person or a room.
    ///
    /// Supports `@username`, `~channelname`, and bare user ids.
    pub async fn build_identifier(&self, text: &str) -> Res<Identifier> {
        let text = text.trim();

        if text.is_empty() {
            return Err(BackendError::InvalidIdentifier(text.to_string()).into());
        }

        if let Some(name) = text.strip_prefix('~') {
            let channelid = self.channelname_to_channelid(name).await?;
            return Ok(Room::resolved(self, name, &channelid, &self.team_id).into());
        }

        let userid = match text.strip_prefix('@') {
            Some(username) => self.username_to_userid(username).await?,
            None => text.to_string(),
        };

        let channel = self.get_direct_channel(self.userid(), &userid).await?;

        Ok(Person::new(self.api.clone(), userid, Some(channel.id), Some(self.team_id.clone())).into())
    }

    pub async fn mentions_build_identifier(&self, mentions: &[String]) -> Res<Vec<Identifier>> {
        let mut identifiers = Vec::with_capacity(mentions.len());

        for mention in mentions {
            identifiers.push(self.build_identifier(mention).await?);
        }

        Ok(identifiers)
    }

    // Sending.

    /// Resolves the human-readable destination and channel id of an identifier.
    async fn prepare_destination(&self, to: &Identifier) -> Res<(String, String)> {
        match to {
            Identifier::Room(room) => Ok((room.name().to_string(), room.id().await?)),
            Identifier::Occupant(occupant) => {
                debug!("This is a divert to private message, sending it directly to the user.");
                let channel = self.get_direct_channel(self.userid(), occupant.userid()).await?;
                Ok((occupant.username().await, channel.id))
            }
            Identifier::Person(person) => {
                let channelid = match person.channelid() {
                    Some(channelid) => channelid.to_string(),
                    None => self.get_direct_channel(self.userid(), person.userid()).await?.id,
                };
                Ok((person.username().await, channelid))
            }
        }
    }

    /// Sends a message, split into as many posts as the size limit requires.
    ///
    /// Rejections from kChat (bad parameters, missing permissions) are logged.
    #[instrument(skip_all)]
    pub async fn send_message(&self, message: &Message) -> Void {
        let to = message.to.as_ref().ok_or_else(|| anyhow::anyhow!("Message has no destination."))?;
        let (to_name, to_channel_id) = self.prepare_destination(to).await?;

        let kind = if message.is_direct() { "direct" } else { "channel" };
        debug!("Sending {} message to {} ({})", kind, to_name, to_channel_id);
        debug!("Message size: {}", message.body.len());

        let root_id = message
            .parent
            .as_ref()
            .and_then(|parent| parent.thread_root())
            .or(Some(message.extras.root_id.as_str()).filter(|r| !r.is_empty()))
            .map(str::to_string);

        for part in prepare_message_body(&message.body, self.message_size_limit()) {
            let post = NewPost {
                channel_id: to_channel_id.clone(),
                message: Some(part),
                root_id: root_id.clone(),
                ..Default::default()
            };

            if let Err(err) = self.api.create_post(&post).await {
                if err.is_rejection() {
                    error!("An error occurred while trying to send the following message to {}: {} ({}). Check the bot account's permissions.", to_name, message.body, err);
                    return Ok(());
                }

                return Err(err.into());
            }
        }

        self.plugins.bot_message(self, message).await;

        Ok(())
    }

    /// Sends a card as a post attachment.
    #[instrument(skip_all)]
    pub async fn send_card(&self, card: &Card) -> Void {
        let to = match &card.to {
            Some(Identifier::Occupant(occupant)) => Identifier::Room(occupant.room().clone()),
            Some(to) => to.clone(),
            None => return Err(anyhow::anyhow!("Card has no destination.")),
        };

        let (to_name, to_channel_id) = self.prepare_destination(&to).await?;

        let post = NewPost {
            channel_id: to_channel_id,
            attachments: Some(vec![card.attachment()]),
            ..Default::default()
        };

        debug!("Sending card data: {:?}", post);

        if let Err(err) = self.api.create_post(&post).await {
            if err.is_rejection() {
                error!("An error occurred while trying to send a card to {}: {} ({}). Check the bot account's permissions.", to_name, card.body, err);
                return Ok(());
            }

            return Err(err.into());
        }

        Ok(())
    }

    /// Uploads a file to a person or room.
    ///
    /// kChat ignores the size and type hints.
    #[instrument(skip(self, data))]
    pub async fn send_stream_request(&self, identifier: &Identifier, data: Vec<u8>, name: &str, size: Option<u64>, stream_type: Option<&str>) -> Res<Stream> {
        let mut stream = Stream::new(identifier.clone(), name, size, stream_type.map(str::to_string));

        let channel_id = match identifier {
            Identifier::Person(person) => match person.channelid() {
                Some(channelid) => channelid.to_string(),
                None => self.get_direct_channel(self.userid(), person.userid()).await?.id,
            },
            Identifier::Room(room) => room.id().await?,
            Identifier::Occupant(occupant) => occupant.room().id().await?,
        };

        debug!("Requesting upload of {} to {} (size hint: {:?}, stream type: {:?}).", name, channel_id, size, stream_type);

        stream.accept();

        match self.api.upload_file(&channel_id, name, data).await {
            Ok(response) => match response.file_infos.into_iter().next() {
                Some(info) => stream.success(info.id),
                None => stream.error(),
            },
            Err(err) => {
                error!("Upload of {} to {} failed: {}", name, channel_id, err);
                stream.error();
            }
        }

        Ok(stream)
    }

    pub async fn change_presence(&self, status: Status) -> Void {
        self.api.update_user_status(self.userid(), status).await?;
        Ok(())
    }

    pub async fn user_is_typing(&self, channelid: &str, parentid: Option<&str>) -> Void {
        self.api.user_typing(self.userid(), channelid, parentid.unwrap_or_default()).await?;
        Ok(())
    }

    pub fn is_from_self(&self, message: &Message) -> bool {
        message.frm.as_ref().and_then(Identifier::userid) == Some(self.userid())
    }

    /// Goes offline and ends the session.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> Void {
        self.change_presence(Status::Offline).await?;
        self.api.logout().await?;
        Ok(())
    }

    // Replies.

    pub fn build_message(&self, text: &str) -> Message {
        Message::new(text)
    }

    /// Prefixes a group chat reply with the addressee's nick.
    pub async fn prefix_groupchat_reply(&self, message: &mut Message, identifier: &Identifier) {
        if let Some(person) = identifier.as_person() {
            message.body = format!("@{}: {}", person.nick().await, message.body);
        }
    }

    /// Builds a reply to `message`, privately to the sender or to where it came from.
    pub fn build_reply(&self, message: &Message, text: &str, private: bool, threaded: bool) -> Message {
        let mut response = self.build_message(text);
        response.frm = Some(self.bot_identifier.clone().into());

        response.to = if private {
            message.frm.clone()
        } else {
            match &message.frm {
                Some(Identifier::Occupant(occupant)) => Some(occupant.room().clone().into()),
                other => other.clone(),
            }
        };

        if threaded {
            response.extras.root_id = message.extras.root_id.clone();
            response.parent = Some(Box::new(message.clone()));
        }

        response
    }

    // Rooms.

    /// The room with the given name (`~name` or `name`).
    pub async fn query_room(&self, room: &str) -> Res<Room> {
        Room::from_name(self, room).await
    }

    /// Every public channel of the team.
    pub async fn get_public_channels(&self) -> Res<Vec<Channel>> {
        let mut channels = Vec::new();

        for page in 0.. {
            let batch = self.api.get_public_channels(&self.team_id, page, PAGE_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            channels.extend(batch);
        }

        Ok(channels)
    }

    /// Channels the bot is in, plus every public channel unless `joined_only`.
    pub async fn channels(&self, joined_only: bool) -> Res<Vec<Channel>> {
        let mut channels = self.api.get_channels_for_user(self.userid(), &self.team_id).await?;

        if !joined_only {
            for channel in self.get_public_channels().await? {
                if !channels.iter().any(|c| c.id == channel.id) {
                    channels.push(channel);
                }
            }
        }

        Ok(channels)
    }

    /// Public and private channels the bot is in; direct channels are excluded.
    pub async fn rooms(&self) -> Res<Vec<Room>> {
        let rooms = self
            .channels(true)
            .await?
            .iter()
            .filter(|channel| channel.channel_type != "D")
            .map(|channel| Room::from_channel(self, channel))
            .collect();

        Ok(rooms)
    }

    pub async fn channelid_to_channelname(&self, channelid: &str) -> Res<String> {
        match self.api.get_channel(channelid).await {
            Ok(channel) if !channel.name.is_empty() => Ok(channel.name),
            Ok(_) | Err(ApiError::ResourceNotFound(_)) => {
                Err(BackendError::RoomDoesNotExist(format!("No channel with ID {} exists in team with ID {}", channelid, self.team_id)).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn channelname_to_channelid(&self, name: &str) -> Res<String> {
        match self.api.get_channel_by_name(&self.team_id, name).await {
            Ok(channel) if !channel.id.is_empty() => Ok(channel.id),
            Ok(_) | Err(ApiError::ResourceNotFound(_)) => {
                Err(BackendError::RoomDoesNotExist(format!("No channel with name {} exists in team with ID {}", name, self.team_id)).into())
            }
            Err(err) => Err(err.into()),
        }
    }
}

// Helpers.

fn str_field<'a>(event: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    event.get(key).and_then(Value::as_str)
}

/// Mentions arrive either as a JSON array or as a JSON-encoded string of one.
fn parse_mentions(value: &Value) -> Vec<String> {
    let value = match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
        other => other.clone(),
    };

    value
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mentions_parse_from_string_or_array() {
        assert_eq!(parse_mentions(&json!("[\"U1\",\"U2\"]")), vec!["U1", "U2"]);
        assert_eq!(parse_mentions(&json!(["U3"])), vec!["U3"]);
        assert!(parse_mentions(&json!("garbage")).is_empty());
    }
}
