//! Loosely-shaped API payloads
//!
//! The API is inconsistent about field names: ids arrive as `_id` or `id`,
//! pictures as `profilePicture` or `avatar`, times as `createdAt`,
//! `timestamp` or `date`, users either embedded or as bare id strings.
//! Each `Wire*` struct accepts every variant and normalises into the
//! domain record from [`super`].

use super::{
    username_from_email, Announcement, AnnouncementTarget, Broadcast, Comment, Conversation,
    FeedItem, LastMessage, Message, MessageKind, Post, Role, SharedPost, UserSummary,
};
use crate::{ClientError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Parse a timestamp given as RFC 3339 text or epoch milliseconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn first_time(candidates: &[&Option<Value>]) -> Option<DateTime<Utc>> {
    candidates
        .iter()
        .filter_map(|v| v.as_ref())
        .find_map(parse_timestamp)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Entry of a `likes` array: either a user id or a user object
fn like_matches(entry: &Value, viewer_id: &str) -> bool {
    match entry {
        Value::String(id) => id == viewer_id,
        Value::Object(map) => ["_id", "id", "user"]
            .iter()
            .filter_map(|k| map.get(*k))
            .any(|v| v.as_str() == Some(viewer_id)),
        _ => false,
    }
}

/// User object as sent by the API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUser {
    #[serde(rename = "_id")]
    pub object_id: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
    pub avatar: Option<String>,
    pub cover_photo: Option<String>,
    pub bio: Option<String>,
    pub role: Option<String>,
}

impl WireUser {
    pub fn any_id(&self) -> Option<&str> {
        self.object_id.as_deref().or(self.id.as_deref())
    }

    pub fn into_summary(self) -> Result<UserSummary> {
        let id = self
            .object_id
            .or(self.id)
            .ok_or_else(|| ClientError::invalid_payload("user without id"))?;
        let email = non_blank(self.email);
        let username = non_blank(self.username)
            .or_else(|| email.as_deref().map(username_from_email))
            .unwrap_or_default();

        Ok(UserSummary {
            id,
            name: self.name.unwrap_or_default(),
            username,
            email,
            avatar: non_blank(self.profile_picture).or_else(|| non_blank(self.avatar)),
            cover_photo: non_blank(self.cover_photo),
            bio: non_blank(self.bio),
            role: self.role.as_deref().map(Role::parse).unwrap_or_default(),
        })
    }
}

/// A user reference: a bare id string or an embedded user
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireUserRef {
    Id(String),
    User(WireUser),
}

impl WireUserRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            WireUserRef::Id(id) => Some(id),
            WireUserRef::User(user) => user.any_id(),
        }
    }

    /// Embedded user as a summary; `None` for a bare id
    pub fn into_summary(self) -> Option<UserSummary> {
        match self {
            WireUserRef::Id(_) => None,
            WireUserRef::User(user) => user.into_summary().ok(),
        }
    }
}

/// Post record from `GET /posts`, `POST /posts` and `new-post` events
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePost {
    #[serde(rename = "_id")]
    pub object_id: Option<String>,
    pub id: Option<String>,
    pub user: Option<WireUser>,
    pub author: Option<WireUser>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub created_at: Option<Value>,
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub likes: Option<Value>,
    #[serde(default)]
    pub comments: Option<Value>,
    pub is_liked: Option<bool>,
    #[serde(default)]
    pub is_broadcast: bool,
}

impl WirePost {
    /// Normalise into a feed item as seen by `viewer_id`
    ///
    /// Records flagged `isBroadcast` become [`FeedItem::Broadcast`].
    /// A missing creation time falls back to the current time.
    pub fn into_feed_item(self, viewer_id: Option<&str>) -> Result<FeedItem> {
        let id = self
            .object_id
            .or(self.id)
            .ok_or_else(|| ClientError::invalid_payload("post without id"))?;
        let author = self
            .user
            .or(self.author)
            .ok_or_else(|| ClientError::invalid_payload(format!("post {} without author", id)))?
            .into_summary()?;
        let created_at = first_time(&[&self.created_at, &self.timestamp]).unwrap_or_else(Utc::now);

        if self.is_broadcast {
            return Ok(FeedItem::Broadcast(Broadcast {
                id,
                author,
                title: non_blank(self.title),
                content: self.content.unwrap_or_default(),
                created_at,
            }));
        }

        let (like_count, liked_from_list) = count_likes(self.likes.as_ref(), viewer_id);
        let (comment_count, comments) = read_comments(self.comments, viewer_id);

        Ok(FeedItem::Post(Post {
            id,
            author,
            content: self.content.unwrap_or_default(),
            image: non_blank(self.image),
            created_at,
            like_count,
            comment_count,
            liked_by_viewer: self.is_liked.unwrap_or(liked_from_list),
            comments,
        }))
    }

    /// Normalise a record that must be a regular post
    pub fn into_post(self, viewer_id: Option<&str>) -> Result<Post> {
        match self.into_feed_item(viewer_id)? {
            FeedItem::Post(post) => Ok(post),
            FeedItem::Broadcast(b) => Err(ClientError::invalid_payload(format!(
                "expected a post, got broadcast {}",
                b.id
            ))),
        }
    }
}

/// `likes` is an array of ids/users, or occasionally a bare count
fn count_likes(likes: Option<&Value>, viewer_id: Option<&str>) -> (u32, bool) {
    match likes {
        Some(Value::Array(entries)) => {
            let liked = viewer_id.is_some_and(|viewer| entries.iter().any(|e| like_matches(e, viewer)));
            (entries.len() as u32, liked)
        }
        Some(Value::Number(n)) => (n.as_u64().unwrap_or(0) as u32, false),
        _ => (0, false),
    }
}

/// `comments` is an array of comment objects (or bare ids), or a count
///
/// The count covers every entry; only objects that normalise are kept.
fn read_comments(comments: Option<Value>, viewer_id: Option<&str>) -> (u32, Vec<Comment>) {
    match comments {
        Some(Value::Array(entries)) => {
            let count = entries.len() as u32;
            let comments = entries
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|entry| {
                    serde_json::from_value::<WireComment>(entry)
                        .map_err(ClientError::from)
                        .and_then(|c| c.into_comment(viewer_id))
                        .map_err(|e| debug!("Skipping comment: {}", e))
                        .ok()
                })
                .collect();
            (count, comments)
        }
        Some(Value::Number(n)) => (n.as_u64().unwrap_or(0) as u32, Vec::new()),
        _ => (0, Vec::new()),
    }
}

/// Comment record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireComment {
    #[serde(rename = "_id")]
    pub object_id: Option<String>,
    pub id: Option<String>,
    pub user: Option<WireUser>,
    pub author: Option<WireUser>,
    pub text: Option<String>,
    pub date: Option<Value>,
    pub created_at: Option<Value>,
    pub likes: Option<Value>,
    pub is_liked: Option<bool>,
}

impl WireComment {
    pub fn into_comment(self, viewer_id: Option<&str>) -> Result<Comment> {
        let id = self
            .object_id
            .or(self.id)
            .ok_or_else(|| ClientError::invalid_payload("comment without id"))?;
        let (like_count, liked_from_list) = count_likes(self.likes.as_ref(), viewer_id);

        Ok(Comment {
            id,
            author: self
                .user
                .or(self.author)
                .and_then(|u| u.into_summary().ok()),
            text: self.text.unwrap_or_default(),
            created_at: first_time(&[&self.date, &self.created_at]),
            like_count,
            liked_by_viewer: self.is_liked.unwrap_or(liked_from_list),
        })
    }
}

/// Announcement record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAnnouncement {
    #[serde(rename = "_id")]
    pub object_id: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub author: Option<WireUser>,
    pub target: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: Option<Value>,
}

impl WireAnnouncement {
    pub fn into_announcement(self) -> Result<Announcement> {
        let id = self
            .object_id
            .or(self.id)
            .ok_or_else(|| ClientError::invalid_payload("announcement without id"))?;
        let author = self
            .author
            .ok_or_else(|| ClientError::invalid_payload(format!("announcement {} without author", id)))?
            .into_summary()?;

        Ok(Announcement {
            id,
            title: self.title.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            author,
            target: self
                .target
                .as_deref()
                .map(AnnouncementTarget::parse)
                .unwrap_or_default(),
            is_read: self.is_read,
            created_at: first_time(&[&self.created_at]),
        })
    }
}

/// Last-message summary inside a conversation record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLastMessage {
    pub content: Option<String>,
    pub text: Option<String>,
    pub created_at: Option<Value>,
    pub timestamp: Option<Value>,
}

/// Conversation record from `GET /messages/conversations`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConversation {
    pub user: WireUser,
    pub last_message: Option<WireLastMessage>,
    #[serde(default)]
    pub unread: bool,
}

impl WireConversation {
    pub fn into_conversation(self) -> Result<Conversation> {
        let user = self.user.into_summary()?;
        let last_message = self.last_message.map(|m| LastMessage {
            content: m.content.or(m.text).unwrap_or_default(),
            created_at: first_time(&[&m.timestamp, &m.created_at]),
        });

        Ok(Conversation {
            id: user.id.clone(),
            user,
            last_message,
            unread: self.unread,
        })
    }
}

/// Embedded post of a shared-post message: an object or a bare id
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireSharedPostRef {
    Id(String),
    Post(Box<WirePost>),
}

/// Message record from history, send acknowledgements and live events
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub object_id: Option<String>,
    pub id: Option<String>,
    pub sender: Option<WireUserRef>,
    pub receiver: Option<WireUserRef>,
    pub recipient: Option<WireUserRef>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<String>,
    pub text: Option<String>,
    pub post_id: Option<WireSharedPostRef>,
    pub created_at: Option<Value>,
    pub timestamp: Option<Value>,
}

impl WireMessage {
    pub fn into_message(self) -> Result<Message> {
        let id = self
            .object_id
            .or(self.id)
            .ok_or_else(|| ClientError::invalid_payload("message without id"))?;
        let sender_ref = self
            .sender
            .ok_or_else(|| ClientError::invalid_payload(format!("message {} without sender", id)))?;
        let sender_id = sender_ref
            .id()
            .ok_or_else(|| ClientError::invalid_payload(format!("message {} sender without id", id)))?
            .to_string();
        let recipient_id = self
            .receiver
            .or(self.recipient)
            .and_then(|r| r.id().map(str::to_string));

        let kind = match self.kind.as_deref() {
            Some("post") => MessageKind::SharedPost,
            _ => MessageKind::Text,
        };
        let shared_post = match (kind, self.post_id) {
            (MessageKind::SharedPost, Some(WireSharedPostRef::Post(post))) => {
                let post = *post;
                Some(SharedPost {
                    id: post.object_id.or(post.id).unwrap_or_default(),
                    author: post
                        .user
                        .or(post.author)
                        .and_then(|u| u.into_summary().ok()),
                    content: non_blank(post.content),
                    image: non_blank(post.image),
                    created_at: first_time(&[&post.created_at, &post.timestamp]),
                })
            }
            _ => None,
        };

        Ok(Message {
            id,
            sender_id,
            sender: sender_ref.into_summary(),
            recipient_id,
            kind,
            text: self.content.or(self.text),
            shared_post,
            sent_at: first_time(&[&self.timestamp]),
            created_at: first_time(&[&self.created_at]),
        })
    }
}

/// Decode a JSON value as `T`, accepting a `{ "data": ... }` envelope
pub fn unwrap_data<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    let inner = match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(inner)?)
}
