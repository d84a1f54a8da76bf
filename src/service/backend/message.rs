//! Messages, cards, presence updates, and file streams exchanged with plugins.

use serde_json::{Value, json};

use crate::{
    base::{text::resolve_color, types::Status},
    service::api::Post,
};

use super::identity::Identifier;

/// Backend-specific message metadata.
#[derive(Debug, Clone, Default)]
pub struct MessageExtras {
    /// The post id.
    pub id: String,
    /// The thread root post id; empty for top-level posts.
    pub root_id: String,
    /// Permalink to the post.
    pub url: Option<String>,
    /// Ids of files attached to the post.
    pub attachments: Vec<String>,
    /// The normalized event the message was built from.
    pub event: Option<Value>,
}

/// A chat message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub body: String,
    pub frm: Option<Identifier>,
    pub to: Option<Identifier>,
    pub parent: Option<Box<Message>>,
    pub extras: MessageExtras,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// A message standing in for an existing post (e.g., a thread root).
    pub fn from_post(post: &Post) -> Self {
        Self {
            body: post.message.clone(),
            extras: MessageExtras {
                id: post.id.clone(),
                root_id: post.root_id.clone(),
                attachments: post.file_ids.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Whether the message goes to a room.
    pub fn is_group(&self) -> bool {
        self.to.as_ref().is_some_and(Identifier::is_room)
    }

    pub fn is_direct(&self) -> bool {
        !self.is_group()
    }

    pub fn is_threaded(&self) -> bool {
        !self.extras.root_id.is_empty()
    }

    /// The post a reply to this message should be threaded under.
    pub fn thread_root(&self) -> Option<&str> {
        [self.extras.root_id.as_str(), self.extras.id.as_str()].into_iter().find(|id| !id.is_empty())
    }
}

/// A rich message rendered as a kChat attachment.
#[derive(Debug, Clone, Default)]
pub struct Card {
    pub body: String,
    pub to: Option<Identifier>,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub color: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl Card {
    /// The attachment object posted for this card.
    pub fn attachment(&self) -> Value {
        let mut attachment = serde_json::Map::new();

        let optional = [
            ("pretext", &self.summary),
            ("title", &self.title),
            ("title_link", &self.link),
            ("image_url", &self.image),
            ("thumb_url", &self.thumbnail),
        ];

        for (key, value) in optional {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                attachment.insert(key.to_string(), json!(value));
            }
        }

        attachment.insert("text".to_string(), json!(self.body));

        if let Some(color) = self.color.as_ref().filter(|c| !c.is_empty()) {
            attachment.insert("color".to_string(), json!(resolve_color(color)));
        }

        if !self.fields.is_empty() {
            let fields: Vec<Value> = self.fields.iter().map(|(title, value)| json!({ "title": title, "value": value, "short": true })).collect();
            attachment.insert("fields".to_string(), Value::Array(fields));
        }

        Value::Object(attachment)
    }
}

/// A presence change.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub identifier: Identifier,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Pending,
    Accepted,
    Success,
    Error,
}

/// A file transfer to a person or room.
#[derive(Debug, Clone)]
pub struct Stream {
    pub identifier: Identifier,
    pub name: String,
    pub size: Option<u64>,
    pub stream_type: Option<String>,
    pub status: StreamStatus,
    pub file_id: Option<String>,
}

impl Stream {
    pub fn new(identifier: Identifier, name: impl Into<String>, size: Option<u64>, stream_type: Option<String>) -> Self {
        Self {
            identifier,
            name: name.into(),
            size,
            stream_type,
            status: StreamStatus::Pending,
            file_id: None,
        }
    }

    pub fn accept(&mut self) {
        self.status = StreamStatus::Accepted;
    }

    pub fn success(&mut self, file_id: String) {
        self.file_id = Some(file_id);
        self.status = StreamStatus::Success;
    }

    pub fn error(&mut self) {
        self.status = StreamStatus::Error;
    }
}
