//! Klians Client Core
//!
//! Client-side state of the Klians school social network: the home feed,
//! direct messages, announcements and likes, kept consistent with a remote
//! REST API and a realtime WebSocket channel.
//!
//! Rendering is not part of this crate; [`render`] produces plain view
//! models for whatever draws them.

pub mod announcements;
pub mod api;
pub mod cache;
pub mod conversations;
pub mod feed;
pub mod likes;
pub mod models;
pub mod realtime;
pub mod render;
pub mod session;
pub mod settings;

mod error;

pub use announcements::AnnouncementBoard;
pub use api::{ApiClient, ApiConfig, HttpApiClient, NewAnnouncement, NewPost};
pub use cache::PostCache;
pub use conversations::{ActiveConversation, ConversationService, ConversationStore, HistoryTicket};
pub use error::{ClientError, Result};
pub use feed::{Feed, FeedConfig, FeedLoadState, FeedService};
pub use likes::{LikeState, LikeTarget, LikeToggler, ToggleCommand};
pub use models::{
    Announcement, AnnouncementTarget, Broadcast, Comment, Conversation, FeedItem, Message,
    MessageKind, Post, Role, SharedPost, UserSummary,
};
pub use realtime::{
    Emitter, EventBus, EventKind, Frame, RealtimeChannel, RealtimeConfig, RealtimeEvent,
    ReconnectionStrategy, Subscription,
};
pub use session::{Session, SessionConfig};
pub use settings::{PasswordChange, ProfileUpdate, Theme};

#[cfg(test)]
pub(crate) mod test_utils;
