//! HTTP implementation of the kChat API on top of `reqwest`.

use std::{sync::Arc, sync::RwLock, time::Duration};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, Url, multipart};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::base::{
    config::{BotIdentity, Config},
    error::{ApiError, ApiResult},
    types::{Res, Status},
};

use super::{
    ApiClient, Channel, ChannelMember, ChannelPatch, ChannelStats, FileUploadResponse, GenericKchatApi, NewChannel, NewPost, Post, SocketAuth, Team, TeamStats, User,
    UserQuery,
};

// Extra methods on `ApiClient` applied by the http implementation.

impl ApiClient {
    /// Creates a new HTTP kChat client.
    pub fn http(config: &Config) -> Res<Self> {
        let client = HttpKchatApi::new(&config.bot_identity)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

/// kChat REST client.
pub struct HttpKchatApi {
    client: reqwest::Client,
    identity: BotIdentity,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl HttpKchatApi {
    #[instrument(name = "HttpKchatApi::new", skip_all)]
    pub fn new(identity: &BotIdentity) -> Res<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(identity.timeout))
            .danger_accept_invalid_certs(identity.insecure)
            .build()?;

        let token = identity.token.clone().filter(|t| !t.is_empty());

        Ok(Self {
            client,
            base_url: Url::parse(&identity.api_url())?,
            identity: identity.clone(),
            token: RwLock::new(token),
        })
    }

    /// The API url for `segments`, each one percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();

        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.url(segments);
        debug!("{} {}", method, url);

        let builder = self.client.request(method, url);

        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ApiResult<T> {
        let response = check(builder.send().await?).await?;
        let body = response.text().await?;

        // Some endpoints answer with an empty body.
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };

        Ok(serde_json::from_str(body)?)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> ApiResult<T> {
        self.send(self.request(Method::GET, segments)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> ApiResult<T> {
        self.send(self.request(Method::POST, segments).json(body)).await
    }

    async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> ApiResult<T> {
        self.send(self.request(Method::PUT, segments).json(body)).await
    }

    async fn delete(&self, segments: &[&str]) -> ApiResult<()> {
        let _: Value = self.send(self.request(Method::DELETE, segments)).await?;
        Ok(())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    /// Exchanges the configured credentials for a fresh session token.
    async fn login_with_credentials(&self) -> ApiResult<User> {
        // A stale session token must not be sent along.
        self.set_token(None);

        let body = json!({
            "login_id": self.identity.login.clone().unwrap_or_default(),
            "password": self.identity.password.clone().unwrap_or_default(),
            "token": self.identity.mfa_token.clone().unwrap_or_default(),
        });

        let response = check(self.request(Method::POST, &["users", "login"]).json(&body).send().await?).await?;
        let token = response.headers().get("Token").and_then(|v| v.to_str().ok()).map(str::to_string);

        if token.is_none() {
            return Err(ApiError::NoAccessTokenProvided("login response carried no session token".to_string()));
        }

        self.set_token(token);

        let me: User = serde_json::from_str(&response.text().await?)?;
        info!("Logged in as `{}`.", me.username);

        Ok(me)
    }
}

/// Turns non-success responses into typed errors, keeping the server's message.
async fn check(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);

    Err(ApiError::from_status(status.as_u16(), message))
}

#[async_trait]
impl GenericKchatApi for HttpKchatApi {
    fn domain(&self) -> &str {
        &self.identity.server
    }

    /// Personal access tokens are checked against `/users/me`; credentials always start a new session.
    #[instrument(skip(self))]
    async fn login(&self) -> ApiResult<User> {
        if !self.identity.has_token() {
            return self.login_with_credentials().await;
        }

        let me: User = self.get(&["users", "me"]).await?;
        info!("Authenticated with personal access token as `{}`.", me.username);

        Ok(me)
    }

    #[instrument(skip(self))]
    async fn logout(&self) -> ApiResult<()> {
        let _: Value = self.post(&["users", "logout"], &json!({})).await?;

        // Personal access tokens stay valid; only session tokens are dropped.
        if !self.identity.has_token() {
            self.set_token(None);
        }

        Ok(())
    }

    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    async fn get_user(&self, user_id: &str) -> ApiResult<User> {
        self.get(&["users", user_id]).await
    }

    async fn get_user_by_username(&self, username: &str) -> ApiResult<User> {
        self.get(&["users", "username", username]).await
    }

    async fn get_users(&self, query: &UserQuery) -> ApiResult<Vec<User>> {
        let mut params = vec![("page", query.page.to_string()), ("per_page", query.per_page.to_string())];

        if let Some(team) = &query.in_team {
            params.push(("in_team", team.clone()));
        }

        if let Some(channel) = &query.not_in_channel {
            params.push(("not_in_channel", channel.clone()));
        }

        self.send(self.request(Method::GET, &["users"]).query(&params)).await
    }

    async fn get_team_by_name(&self, name: &str) -> ApiResult<Team> {
        self.get(&["teams", "name", name]).await
    }

    async fn get_team_stats(&self, team_id: &str) -> ApiResult<TeamStats> {
        self.get(&["teams", team_id, "stats"]).await
    }

    async fn create_direct_channel(&self, user_id: &str, other_user_id: &str) -> ApiResult<Channel> {
        self.post(&["channels", "direct"], &[user_id, other_user_id]).await
    }

    async fn get_channel(&self, channel_id: &str) -> ApiResult<Channel> {
        self.get(&["channels", channel_id]).await
    }

    async fn get_channel_by_name(&self, team_id: &str, name: &str) -> ApiResult<Channel> {
        self.get(&["teams", team_id, "channels", "name", name]).await
    }

    async fn get_public_channels(&self, team_id: &str, page: usize, per_page: usize) -> ApiResult<Vec<Channel>> {
        let params = [("page", page), ("per_page", per_page)];
        self.send(self.request(Method::GET, &["teams", team_id, "channels"]).query(&params)).await
    }

    async fn get_channels_for_user(&self, user_id: &str, team_id: &str) -> ApiResult<Vec<Channel>> {
        self.get(&["users", user_id, "teams", team_id, "channels"]).await
    }

    async fn get_channel_stats(&self, channel_id: &str) -> ApiResult<ChannelStats> {
        self.get(&["channels", channel_id, "stats"]).await
    }

    async fn get_channel_members(&self, channel_id: &str, page: usize, per_page: usize) -> ApiResult<Vec<ChannelMember>> {
        let params = [("page", page), ("per_page", per_page)];
        self.send(self.request(Method::GET, &["channels", channel_id, "members"]).query(&params)).await
    }

    async fn create_channel(&self, channel: &NewChannel) -> ApiResult<Channel> {
        self.post(&["channels"], channel).await
    }

    async fn patch_channel(&self, channel_id: &str, patch: &ChannelPatch) -> ApiResult<Channel> {
        self.put(&["channels", channel_id, "patch"], patch).await
    }

    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> ApiResult<()> {
        let _: Value = self.post(&["channels", channel_id, "members"], &json!({ "user_id": user_id })).await?;
        Ok(())
    }

    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> ApiResult<()> {
        self.delete(&["channels", channel_id, "members", user_id]).await
    }

    async fn delete_channel(&self, channel_id: &str) -> ApiResult<()> {
        self.delete(&["channels", channel_id]).await
    }

    async fn create_post(&self, post: &NewPost) -> ApiResult<Post> {
        self.post(&["posts"], post).await
    }

    async fn get_post(&self, post_id: &str) -> ApiResult<Post> {
        self.get(&["posts", post_id]).await
    }

    #[instrument(skip(self, data))]
    async fn upload_file(&self, channel_id: &str, name: &str, data: Vec<u8>) -> ApiResult<FileUploadResponse> {
        let form = multipart::Form::new()
            .text("channel_id", channel_id.to_string())
            .part("files", multipart::Part::bytes(data).file_name(name.to_string()));

        self.send(self.request(Method::POST, &["files"]).multipart(form)).await
    }

    async fn update_user_status(&self, user_id: &str, status: Status) -> ApiResult<()> {
        let body = json!({ "user_id": user_id, "status": status.as_str() });
        let _: Value = self.put(&["users", user_id, "status"], &body).await?;
        Ok(())
    }

    async fn user_typing(&self, user_id: &str, channel_id: &str, parent_id: &str) -> ApiResult<()> {
        let body = json!({ "channel_id": channel_id, "parent_id": parent_id });
        let _: Value = self.post(&["users", user_id, "typing"], &body).await?;
        Ok(())
    }

    async fn authorize_socket(&self, socket_id: &str, channel_name: &str) -> ApiResult<SocketAuth> {
        let body = json!({ "socket_id": socket_id, "channel_name": channel_name });

        // The broadcasting endpoint lives beside the versioned API, not under it.
        let url = format!("{}://{}:{}/broadcasting/auth", self.identity.scheme, self.identity.server, self.identity.port);
        let mut builder = self.client.post(url).json(&body);
        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token);
        }

        let auth: SocketAuth = self.send(builder).await?;

        if auth.auth.is_empty() {
            return Err(ApiError::Unexpected {
                status: 200,
                message: "broadcasting auth response carried no signature".to_string(),
            });
        }

        Ok(auth)
    }
}
