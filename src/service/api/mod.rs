//! kChat REST API surface.
//!
//! The `GenericKchatApi` trait mirrors the calls the backend makes against the kChat
//! server, so the backend can be driven by the HTTP implementation in production and
//! by a mock in tests.

pub mod http;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base::{error::ApiResult, types::Status};

// Payloads.

/// A kChat user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// A kChat team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

/// A kChat channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub header: String,
    pub purpose: String,
}

/// A kChat post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub root_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub post_type: String,
    pub file_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelStats {
    pub channel_id: String,
    pub member_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamStats {
    pub team_id: String,
    pub total_member_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileUploadResponse {
    pub file_infos: Vec<FileInfo>,
    pub client_ids: Vec<String>,
}

/// Signature for a websocket channel subscription.
///
/// Presence channels are signed together with `channel_data`, which must be
/// sent back verbatim in the subscribe frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketAuth {
    pub auth: String,
    pub channel_data: Option<String>,
}

/// Query for the paged user search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    pub page: usize,
    pub per_page: usize,
    pub in_team: Option<String>,
    pub not_in_channel: Option<String>,
}

/// Request body for a new post.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewPost {
    pub channel_id: String,
    pub message: Option<String>,
    pub root_id: Option<String>,
    pub file_ids: Option<Vec<String>>,
    pub attachments: Option<Vec<Value>>,
}

/// Request body for a new channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewChannel {
    pub team_id: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub channel_type: String,
}

/// Partial channel update.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelPatch {
    pub header: Option<String>,
    pub purpose: Option<String>,
}

// Traits.

/// Generic kChat API trait that clients must implement.
///
/// Errors are typed so callers can distinguish a missing resource from a
/// permission problem.
#[async_trait]
pub trait GenericKchatApi: Send + Sync + 'static {
    /// The server host this client talks to.
    fn domain(&self) -> &str;

    /// Authenticates (token or credentials) and returns the bot user.
    async fn login(&self) -> ApiResult<User>;

    /// Invalidates the current session.
    async fn logout(&self) -> ApiResult<()>;

    /// The session token, once logged in.
    fn token(&self) -> Option<String>;

    async fn get_user(&self, user_id: &str) -> ApiResult<User>;
    async fn get_user_by_username(&self, username: &str) -> ApiResult<User>;
    async fn get_users(&self, query: &UserQuery) -> ApiResult<Vec<User>>;

    async fn get_team_by_name(&self, name: &str) -> ApiResult<Team>;
    async fn get_team_stats(&self, team_id: &str) -> ApiResult<TeamStats>;

    /// Creates (or returns the existing) direct channel between two users.
    async fn create_direct_channel(&self, user_id: &str, other_user_id: &str) -> ApiResult<Channel>;
    async fn get_channel(&self, channel_id: &str) -> ApiResult<Channel>;
    async fn get_channel_by_name(&self, team_id: &str, name: &str) -> ApiResult<Channel>;
    async fn get_public_channels(&self, team_id: &str, page: usize, per_page: usize) -> ApiResult<Vec<Channel>>;
    async fn get_channels_for_user(&self, user_id: &str, team_id: &str) -> ApiResult<Vec<Channel>>;
    async fn get_channel_stats(&self, channel_id: &str) -> ApiResult<ChannelStats>;
    async fn get_channel_members(&self, channel_id: &str, page: usize, per_page: usize) -> ApiResult<Vec<ChannelMember>>;
    async fn create_channel(&self, channel: &NewChannel) -> ApiResult<Channel>;
    async fn patch_channel(&self, channel_id: &str, patch: &ChannelPatch) -> ApiResult<Channel>;
    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> ApiResult<()>;
    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> ApiResult<()>;
    async fn delete_channel(&self, channel_id: &str) -> ApiResult<()>;

    async fn create_post(&self, post: &NewPost) -> ApiResult<Post>;
    async fn get_post(&self, post_id: &str) -> ApiResult<Post>;

    /// Uploads a file into a channel.
    async fn upload_file(&self, channel_id: &str, name: &str, data: Vec<u8>) -> ApiResult<FileUploadResponse>;

    async fn update_user_status(&self, user_id: &str, status: Status) -> ApiResult<()>;
    async fn user_typing(&self, user_id: &str, channel_id: &str, parent_id: &str) -> ApiResult<()>;

    /// Signs a websocket channel subscription for the given socket.
    async fn authorize_socket(&self, socket_id: &str, channel_name: &str) -> ApiResult<SocketAuth>;
}

// Structs.

/// kChat API client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<dyn GenericKchatApi>,
}

impl Deref for ApiClient {
    type Target = dyn GenericKchatApi;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ApiClient {
    pub fn new(inner: Arc<dyn GenericKchatApi>) -> Self {
        Self { inner }
    }
}
