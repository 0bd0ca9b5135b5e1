//! Domain records
//!
//! Records as the rest of the crate sees them, after normalisation from
//! the loosely-shaped API payloads (see [`wire`]). These types also define
//! the JSON shape of the local post cache.

pub mod wire;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default window during which a broadcast stays pinned
pub const DEFAULT_PIN_WINDOW_HOURS: i64 = 24;

/// Default pin window as a [`Duration`]
pub fn default_pin_window() -> Duration {
    Duration::hours(DEFAULT_PIN_WINDOW_HOURS)
}

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// Parse a role name case-insensitively; unknown names map to `Student`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "teacher" => Role::Teacher,
            "admin" => Role::Admin,
            _ => Role::Student,
        }
    }

    /// Whether this role may publish posts and announcements
    pub fn can_broadcast(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Teacher => "Teacher",
            Role::Admin => "Admin",
        }
    }
}

/// Author or counterpart summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl UserSummary {
    /// Minimal summary with just an id and a display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            username: String::new(),
            email: None,
            avatar: None,
            cover_photo: None,
            bio: None,
            role: Role::Student,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        let email = email.into();
        if self.username.is_empty() {
            self.username = username_from_email(&email);
        }
        self.email = Some(email);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// Local part of an email address, or an empty string
pub fn username_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

/// A regular feed post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author: UserSummary,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(default)]
    pub liked_by_viewer: bool,
    /// Comments embedded in the post record, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn has_media(&self) -> bool {
        self.image.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    pub fn comment_mut(&mut self, comment_id: &str) -> Option<&mut Comment> {
        self.comments.iter_mut().find(|c| c.id == comment_id)
    }
}

/// An announcement-like feed item that is pinned for a while
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub id: String,
    pub author: UserSummary,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Broadcast {
    /// Pin status at `now`; derived, never stored
    pub fn is_pinned(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.created_at > now - window
    }
}

/// One entry of the home timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedItem {
    Post(Post),
    Broadcast(Broadcast),
}

impl FeedItem {
    pub fn id(&self) -> &str {
        match self {
            FeedItem::Post(p) => &p.id,
            FeedItem::Broadcast(b) => &b.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            FeedItem::Post(p) => p.created_at,
            FeedItem::Broadcast(b) => b.created_at,
        }
    }

    /// Pinned broadcasts only; posts are never pinned
    pub fn is_pinned(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self {
            FeedItem::Post(_) => false,
            FeedItem::Broadcast(b) => b.is_pinned(now, window),
        }
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            FeedItem::Post(p) => Some(p),
            FeedItem::Broadcast(_) => None,
        }
    }

    pub fn as_post_mut(&mut self) -> Option<&mut Post> {
        match self {
            FeedItem::Post(p) => Some(p),
            FeedItem::Broadcast(_) => None,
        }
    }
}

/// A comment on a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author: Option<UserSummary>,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub like_count: u32,
    pub liked_by_viewer: bool,
}

/// Audience of an announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnnouncementTarget {
    #[default]
    All,
    Student,
    Teacher,
}

impl AnnouncementTarget {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" | "students" => AnnouncementTarget::Student,
            "teacher" | "teachers" => AnnouncementTarget::Teacher,
            _ => AnnouncementTarget::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnnouncementTarget::All => "All",
            AnnouncementTarget::Student => "Student",
            AnnouncementTarget::Teacher => "Teacher",
        }
    }
}

/// Announcement on the announcements board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: UserSummary,
    pub target: AnnouncementTarget,
    pub is_read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Denormalised summary of the latest message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Direct-message thread, identified by the counterpart's user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user: UserSummary,
    pub last_message: Option<LastMessage>,
    pub unread: bool,
}

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    #[serde(rename = "post")]
    SharedPost,
}

/// Post embedded in a shared-post message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedPost {
    pub id: String,
    pub author: Option<UserSummary>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Direct message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender: Option<UserSummary>,
    pub recipient_id: Option<String>,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub shared_post: Option<SharedPost>,
    /// Explicit send time; present on freshly sent messages
    pub sent_at: Option<DateTime<Utc>>,
    /// Creation time; present on history records
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Time to display: the send time, else the creation time
    pub fn display_time(&self) -> Option<DateTime<Utc>> {
        self.sent_at.or(self.created_at)
    }

    /// The other party of this message from the viewer's point of view
    pub fn counterpart_id(&self, viewer_id: &str) -> Option<&str> {
        if self.sender_id == viewer_id {
            self.recipient_id.as_deref()
        } else {
            Some(self.sender_id.as_str())
        }
    }

    /// Preview text for the conversation list
    pub fn preview(&self) -> String {
        match (&self.text, &self.shared_post) {
            (Some(text), _) if !text.trim().is_empty() => text.clone(),
            (_, Some(_)) => "Shared a post".to_string(),
            _ => String::new(),
        }
    }
}
