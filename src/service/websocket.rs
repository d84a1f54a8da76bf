//! kChat websocket stream.
//!
//! kChat speaks the Pusher protocol over its websocket: the server announces a
//! socket id, the client subscribes to authorized channels, and both sides
//! exchange `pusher:ping`/`pusher:pong` heartbeats. Every text frame is forwarded
//! to the backend, which normalizes it with [`normalize_event`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    base::types::{Res, Void},
    service::api::ApiClient,
};

/// Buffer size for frames waiting to be dispatched.
const FRAME_BUFFER: usize = 256;

/// Pusher control events.
const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const PING: &str = "pusher:ping";
const PONG: &str = "pusher:pong";
const SUBSCRIBE: &str = "pusher:subscribe";
const ERROR: &str = "pusher:error";

/// Channel carrying team-wide events.
pub fn team_channel(team_id: &str) -> String {
    format!("private-team.{team_id}")
}

/// Channel carrying events addressed to the bot user.
pub fn user_channel(user_id: &str) -> String {
    format!("presence-teamUser.{user_id}")
}

/// Websocket connection settings for one session.
#[derive(Clone)]
pub struct KchatWebsocket {
    url: String,
    heartbeat: Duration,
    api: ApiClient,
}

impl KchatWebsocket {
    pub fn new(url: &str, heartbeat_secs: u64, api: ApiClient) -> Self {
        Self {
            url: url.to_string(),
            heartbeat: Duration::from_secs(heartbeat_secs.max(1)),
            api,
        }
    }

    /// Opens the connection and returns a receiver of raw event frames.
    ///
    /// The returned receiver closes when the server disconnects or the stream fails.
    #[instrument(skip(self))]
    pub async fn open(&self, team_id: &str, user_id: &str) -> Res<mpsc::Receiver<String>> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        info!("Websocket connected to {}.", self.url);

        Ok(self.attach(stream, team_id, user_id))
    }

    /// Runs the Pusher session over an established websocket.
    ///
    /// Subscribes to the team and user channels once the server announces the
    /// socket id, and forwards every non-control frame to the returned receiver.
    pub fn attach<S>(&self, stream: S, team_id: &str, user_id: &str) -> mpsc::Receiver<String>
    where
        S: futures::Stream<Item = Result<Message, WsError>> + futures::Sink<Message, Error = WsError> + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let channels = vec![team_channel(team_id), user_channel(user_id)];
        let this = self.clone();

        tokio::spawn(async move {
            if let Err(err) = this.pump(stream, channels, tx).await {
                warn!("Websocket stream ended with an error: {:#}", err);
            }
        });

        rx
    }

    async fn pump<S>(&self, stream: S, channels: Vec<String>, tx: mpsc::Sender<String>) -> Void
    where
        S: futures::Stream<Item = Result<Message, WsError>> + futures::Sink<Message, Error = WsError> + Unpin,
    {
        let (mut write, mut read) = stream.split();
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    write.send(Message::Text(control(PING, json!({})).into())).await?;
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        info!("Websocket stream closed.");
                        return Ok(());
                    };

                    match frame? {
                        Message::Text(text) => {
                            let text = text.as_str().to_string();

                            match frame_event(&text).as_deref() {
                                Some(CONNECTION_ESTABLISHED) => {
                                    let socket_id = socket_id(&text).ok_or_else(|| anyhow::anyhow!("Connection frame carried no socket id."))?;
                                    debug!("Websocket socket id: {}", socket_id);

                                    for channel in &channels {
                                        let auth = self.api.authorize_socket(&socket_id, channel).await?;

                                        let mut data = json!({ "channel": channel, "auth": auth.auth });
                                        if let Some(channel_data) = auth.channel_data {
                                            data["channel_data"] = Value::String(channel_data);
                                        }

                                        let subscribe = control(SUBSCRIBE, data);
                                        write.send(Message::Text(subscribe.into())).await?;
                                    }
                                }
                                Some(PING) => {
                                    write.send(Message::Text(control(PONG, json!({})).into())).await?;
                                }
                                Some(PONG) => debug!("Heartbeat acknowledged."),
                                Some(ERROR) => warn!("Websocket error frame: {}", text),
                                _ => {
                                    if tx.send(text).await.is_err() {
                                        info!("Event receiver dropped, closing websocket.");
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        Message::Ping(data) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Message::Close(reason) => {
                            warn!("Websocket closed by server: {:?}", reason);
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

fn control(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

fn frame_event(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("event").and_then(Value::as_str).map(str::to_string)
}

fn socket_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let data = decode_embedded(value.get("data")?.clone());
    data.get("socket_id").and_then(Value::as_str).map(str::to_string)
}

/// Decodes a value that may be a JSON document embedded in a string.
fn decode_embedded(value: Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

/// Flattens a raw frame into a single event object.
///
/// The frame's `data` (decoded when it is a JSON string) becomes the event body
/// with `event` and `channel` inserted, and a string-encoded `post` is decoded as well. Frames
/// without a `data` object are returned as they are. Returns `None` when the
/// frame is not a JSON object.
pub fn normalize_event(raw: &str) -> Option<Map<String, Value>> {
    let Value::Object(mut frame) = serde_json::from_str::<Value>(raw).ok()? else {
        return None;
    };

    let event = frame.get("event").cloned();
    let channel = frame.get("channel").cloned();

    let mut payload = match frame.remove("data").map(decode_embedded) {
        Some(Value::Object(data)) => data,
        Some(other) => {
            frame.insert("data".to_string(), other);
            frame
        }
        None => frame,
    };

    if let Some(event) = event {
        payload.entry("event").or_insert(event);
    }

    if let Some(channel) = channel {
        payload.entry("channel").or_insert(channel);
    }

    if let Some(post) = payload.remove("post") {
        payload.insert("post".to_string(), decode_embedded(post));
    }

    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_string_encoded_data_and_post() {
        let raw = json!({
            "event": "posted",
            "channel": "private-team.T1",
            "data": json!({
                "channel_id": "C1",
                "post": json!({ "id": "P1", "message": "hi" }).to_string(),
            }).to_string(),
        })
        .to_string();

        let event = normalize_event(&raw).unwrap();

        assert_eq!(event["event"], "posted");
        assert_eq!(event["channel"], "private-team.T1");
        assert_eq!(event["channel_id"], "C1");
        assert_eq!(event["post"]["message"], "hi");
    }

    #[test]
    fn flat_frames_pass_through() {
        let raw = json!({ "event": "status_change", "user_id": "U1", "status": "away" }).to_string();
        let event = normalize_event(&raw).unwrap();

        assert_eq!(event["status"], "away");
        assert_eq!(event["event"], "status_change");
    }

    #[test]
    fn frames_without_event_keep_no_event() {
        let event = normalize_event(r#"{"data": {"a": 1}}"#).unwrap();
        assert!(event.get("event").is_none());
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(normalize_event("[1, 2]").is_none());
        assert!(normalize_event("not json").is_none());
    }

    #[test]
    fn extracts_socket_id() {
        let raw = json!({ "event": CONNECTION_ESTABLISHED, "data": "{\"socket_id\":\"123.456\",\"activity_timeout\":30}" }).to_string();
        assert_eq!(socket_id(&raw).as_deref(), Some("123.456"));
        assert_eq!(frame_event(&raw).as_deref(), Some(CONNECTION_ESTABLISHED));
    }

    #[test]
    fn channel_names() {
        assert_eq!(team_channel("T1"), "private-team.T1");
        assert_eq!(user_channel("U1"), "presence-teamUser.U1");
    }
}
