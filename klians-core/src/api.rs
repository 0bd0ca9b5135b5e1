//! REST API collaborator
//!
//! [`ApiClient`] is the seam between the client services and the remote
//! Klians API. Services only ever talk to the trait; [`HttpApiClient`] is
//! the production implementation over `reqwest`, and tests provide
//! in-memory implementations.
//!
//! Every operation returns normalised domain records (see
//! [`crate::models`]). List endpoints skip individual records that cannot
//! be normalised instead of failing the whole list.

use crate::models::wire::{
    unwrap_data, WireAnnouncement, WireConversation, WireMessage, WirePost, WireUser,
};
use crate::models::{
    Announcement, AnnouncementTarget, Conversation, FeedItem, Message, Post, UserSummary,
};
use crate::settings::ProfileUpdate;
use crate::{ClientError, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Default posts per page
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Header carrying the persistent client installation id
pub const CLIENT_ID_HEADER: &str = "X-Klians-Client";

/// Payload of `POST /posts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub is_broadcast: bool,
}

impl NewPost {
    pub fn new(content: impl Into<String>, image: Option<String>) -> Self {
        Self {
            content: content.into(),
            image: image.filter(|s| !s.is_empty()),
            is_broadcast: false,
        }
    }

    /// A post needs text or an image
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.image.is_none()
    }
}

/// Payload of `POST /announcements`
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnouncement {
    pub title: String,
    pub content: String,
    pub target: AnnouncementTarget,
}

impl NewAnnouncement {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            target: AnnouncementTarget::All,
        }
    }

    pub fn with_target(mut self, target: AnnouncementTarget) -> Self {
        self.target = target;
        self
    }

    fn to_json(&self) -> Value {
        json!({
            "title": self.title,
            "content": self.content,
            "target": self.target.as_str(),
        })
    }
}

/// Operations the client consumes from the remote API
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// List one page of posts (1-based), newest first as the server orders them
    async fn list_posts(&self, page: u32) -> Result<Vec<FeedItem>>;

    async fn create_post(&self, post: &NewPost) -> Result<Post>;

    async fn delete_post(&self, post_id: &str) -> Result<()>;

    async fn like_post(&self, post_id: &str) -> Result<()>;

    async fn unlike_post(&self, post_id: &str) -> Result<()>;

    async fn like_comment(&self, post_id: &str, comment_id: &str) -> Result<()>;

    async fn unlike_comment(&self, post_id: &str, comment_id: &str) -> Result<()>;

    async fn list_announcements(&self) -> Result<Vec<Announcement>>;

    async fn create_announcement(&self, announcement: &NewAnnouncement) -> Result<Announcement>;

    async fn mark_announcement_read(&self, announcement_id: &str) -> Result<()>;

    async fn delete_announcement(&self, announcement_id: &str) -> Result<()>;

    async fn search_users_by_email(&self, email: &str) -> Result<Vec<UserSummary>>;

    /// Conversations in server order
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Message history with the given counterpart
    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>>;

    /// Send a text message; returns the acknowledged record
    async fn send_message(&self, user_id: &str, content: &str) -> Result<Message>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserSummary>;
}

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL including the `/api` prefix
    pub base_url: String,
    /// Bearer token of the signed-in account
    pub token: Option<String>,
    /// Persistent installation id, sent as [`CLIENT_ID_HEADER`]
    pub client_id: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Page size for `list_posts`
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            client_id: None,
            timeout: Duration::from_secs(15),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ApiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// [`ApiClient`] over HTTP
pub struct HttpApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    viewer_id: Option<String>,
}

impl HttpApiClient {
    /// Create a client; `viewer_id` is used to compute "liked by viewer"
    pub fn new(config: ApiConfig, viewer_id: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            viewer_id,
        })
    }

    /// Base URL with `segments` appended, each percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let base = &self.config.base_url;
        let mut url = Url::parse(base)
            .map_err(|e| ClientError::Configuration(format!("Invalid API URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Configuration(format!("API URL {} cannot have a path", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let mut builder = self.http.request(method, self.endpoint(segments)?);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(client_id) = &self.config.client_id {
            builder = builder.header(CLIENT_ID_HEADER, client_id);
        }
        Ok(builder)
    }

    /// Send a request and decode the body, mapping error statuses
    async fn call(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                Err(e) if status.is_success() => return Err(e.into()),
                Err(_) => Value::String(text),
            }
        };

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        Ok(body)
    }

    async fn call_unit(&self, builder: RequestBuilder) -> Result<()> {
        self.call(builder).await.map(|_| ())
    }

    fn viewer(&self) -> Option<&str> {
        self.viewer_id.as_deref()
    }
}

/// Build an [`ClientError::Api`] from an error response body
fn api_error(status: StatusCode, body: &Value) -> ClientError {
    let message = match body {
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        _ => body
            .get("message")
            .or_else(|| body.get("error"))
            .or_else(|| body.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error"))
            .to_string(),
    };
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Normalise every record of a list, skipping the ones that fail
fn normalize_list<W, T>(records: Vec<W>, what: &str, f: impl Fn(W) -> Result<T>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| match f(record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed {} record: {}", what, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ApiClient for HttpApiClient {
    #[instrument(skip(self))]
    async fn list_posts(&self, page: u32) -> Result<Vec<FeedItem>> {
        let body = self
            .call(self.request(Method::GET, &["posts"])?.query(&[
                ("page", page.max(1)),
                ("limit", self.config.page_size),
            ]))
            .await?;
        let records: Vec<WirePost> = unwrap_data(body)?;
        debug!("Fetched {} post records", records.len());
        Ok(normalize_list(records, "post", |r| r.into_feed_item(self.viewer())))
    }

    #[instrument(skip(self, post))]
    async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let body = self
            .call(self.request(Method::POST, &["posts"])?.json(post))
            .await?;
        let record: WirePost = unwrap_data(body)?;
        record.into_post(self.viewer())
    }

    #[instrument(skip(self))]
    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.call_unit(self.request(Method::DELETE, &["posts", post_id])?)
            .await
    }

    #[instrument(skip(self))]
    async fn like_post(&self, post_id: &str) -> Result<()> {
        self.call_unit(self.request(Method::PUT, &["posts", "like", post_id])?)
            .await
    }

    #[instrument(skip(self))]
    async fn unlike_post(&self, post_id: &str) -> Result<()> {
        self.call_unit(self.request(Method::PUT, &["posts", "unlike", post_id])?)
            .await
    }

    #[instrument(skip(self))]
    async fn like_comment(&self, post_id: &str, comment_id: &str) -> Result<()> {
        self.call_unit(self.request(
            Method::PUT,
            &["posts", post_id, "comments", comment_id, "like"],
        )?)
        .await
    }

    #[instrument(skip(self))]
    async fn unlike_comment(&self, post_id: &str, comment_id: &str) -> Result<()> {
        self.call_unit(self.request(
            Method::PUT,
            &["posts", post_id, "comments", comment_id, "unlike"],
        )?)
        .await
    }

    #[instrument(skip(self))]
    async fn list_announcements(&self) -> Result<Vec<Announcement>> {
        let body = self.call(self.request(Method::GET, &["announcements"])?).await?;
        let records: Vec<WireAnnouncement> = unwrap_data(body)?;
        Ok(normalize_list(records, "announcement", |r| r.into_announcement()))
    }

    #[instrument(skip(self, announcement))]
    async fn create_announcement(&self, announcement: &NewAnnouncement) -> Result<Announcement> {
        let body = self
            .call(self.request(Method::POST, &["announcements"])?.json(&announcement.to_json()))
            .await?;
        let record: WireAnnouncement = unwrap_data(body)?;
        record.into_announcement()
    }

    #[instrument(skip(self))]
    async fn mark_announcement_read(&self, announcement_id: &str) -> Result<()> {
        self.call_unit(self.request(Method::PUT, &["announcements", announcement_id, "read"])?)
            .await
    }

    #[instrument(skip(self))]
    async fn delete_announcement(&self, announcement_id: &str) -> Result<()> {
        self.call_unit(self.request(Method::DELETE, &["announcements", announcement_id])?)
            .await
    }

    #[instrument(skip(self))]
    async fn search_users_by_email(&self, email: &str) -> Result<Vec<UserSummary>> {
        let body = self
            .call(self.request(Method::GET, &["messages", "search"])?.query(&[("email", email)]))
            .await?;
        let records: Vec<WireUser> = unwrap_data(body)?;
        Ok(normalize_list(records, "user", |r| r.into_summary()))
    }

    #[instrument(skip(self))]
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let body = self
            .call(self.request(Method::GET, &["messages", "conversations"])?)
            .await?;
        let records: Vec<WireConversation> = unwrap_data(body)?;
        Ok(normalize_list(records, "conversation", |r| r.into_conversation()))
    }

    #[instrument(skip(self))]
    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>> {
        let body = self
            .call(self.request(Method::GET, &["messages", user_id])?)
            .await?;
        let records: Vec<WireMessage> = unwrap_data(body)?;
        Ok(normalize_list(records, "message", |r| r.into_message()))
    }

    #[instrument(skip(self, content))]
    async fn send_message(&self, user_id: &str, content: &str) -> Result<Message> {
        let body = self
            .call(
                self.request(Method::POST, &["messages", user_id])?
                    .json(&json!({ "content": content, "type": "text" })),
            )
            .await?;
        let record: WireMessage = unwrap_data(body)?;
        record.into_message()
    }

    #[instrument(skip(self, update))]
    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserSummary> {
        let body = self
            .call(self.request(Method::PUT, &["users", "profile"])?.json(update))
            .await?;
        let record: WireUser = unwrap_data(body)?;
        record.into_summary()
    }
}
