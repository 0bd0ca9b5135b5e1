//! Test helpers: an in-memory [`ApiClient`] with controllable latency

use crate::api::{ApiClient, NewAnnouncement, NewPost};
use crate::models::{
    Announcement, Broadcast, Conversation, FeedItem, Message, MessageKind, Post, Role, UserSummary,
};
use crate::settings::ProfileUpdate;
use crate::{ClientError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
}

pub fn user(id: &str, role: Role) -> UserSummary {
    UserSummary::new(id, format!("User {}", id))
        .with_email(format!("{}@klians.edu", id))
        .with_role(role)
}

pub fn post(id: &str, hours_ago: i64, now: DateTime<Utc>) -> Post {
    Post {
        id: id.to_string(),
        author: user("author", Role::Student),
        content: format!("post {}", id),
        image: None,
        created_at: now - Duration::hours(hours_ago),
        like_count: 0,
        comment_count: 0,
        liked_by_viewer: false,
        comments: Vec::new(),
    }
}

pub fn broadcast(id: &str, hours_ago: i64, now: DateTime<Utc>) -> Broadcast {
    Broadcast {
        id: id.to_string(),
        author: user("principal", Role::Admin),
        title: Some(format!("broadcast {}", id)),
        content: "notice".to_string(),
        created_at: now - Duration::hours(hours_ago),
    }
}

pub fn message(id: &str, from: &str, to: &str, text: &str) -> Message {
    Message {
        id: id.to_string(),
        sender_id: from.to_string(),
        sender: None,
        recipient_id: Some(to.to_string()),
        kind: MessageKind::Text,
        text: Some(text.to_string()),
        shared_post: None,
        sent_at: None,
        created_at: Some(fixed_now()),
    }
}

pub fn conversation(id: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        user: user(id, Role::Student),
        last_message: None,
        unread: false,
    }
}

fn unavailable(what: &str) -> ClientError {
    ClientError::Api {
        status: 503,
        message: format!("{} unavailable", what),
    }
}

/// In-memory API; every call is recorded by name
pub struct MockApi {
    pub viewer: UserSummary,
    /// `None` makes `list_posts` fail
    pub posts: Mutex<Option<Vec<FeedItem>>>,
    pub conversations: Mutex<Vec<Conversation>>,
    pub histories: Mutex<HashMap<String, Vec<Message>>>,
    pub announcements: Mutex<Vec<Announcement>>,
    pub users: Mutex<Vec<UserSummary>>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    history_gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    like_gate: Mutex<Option<oneshot::Receiver<()>>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MockApi {
    pub fn new(viewer: UserSummary) -> Self {
        Self {
            viewer,
            posts: Mutex::new(Some(Vec::new())),
            conversations: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
            announcements: Mutex::new(Vec::new()),
            users: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            history_gates: Mutex::new(HashMap::new()),
            like_gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_posts(&self, posts: Option<Vec<FeedItem>>) {
        *self.posts.lock().unwrap() = posts;
    }

    pub fn set_history(&self, user_id: &str, messages: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(user_id.to_string(), messages);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Hold the next history fetch for `user_id` until the sender fires
    pub fn gate_history(&self, user_id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.history_gates
            .lock()
            .unwrap()
            .insert(user_id.to_string(), rx);
        tx
    }

    /// Hold the next like/unlike call until the sender fires
    pub fn gate_likes(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.like_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == name)
            .count()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_write(&self, what: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(unavailable(what))
        } else {
            Ok(())
        }
    }

    fn check_read(&self, what: &str) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(unavailable(what))
        } else {
            Ok(())
        }
    }

    async fn wait_like_gate(&self) {
        let gate = self.like_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

#[async_trait]
impl ApiClient for MockApi {
    async fn list_posts(&self, _page: u32) -> Result<Vec<FeedItem>> {
        self.record("list_posts");
        self.posts
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("posts"))
    }

    async fn create_post(&self, new_post: &NewPost) -> Result<Post> {
        self.record("create_post");
        self.check_write("posts")?;
        Ok(Post {
            id: self.next_id("p"),
            author: self.viewer.clone(),
            content: new_post.content.clone(),
            image: new_post.image.clone(),
            created_at: Utc::now(),
            like_count: 0,
            comment_count: 0,
            liked_by_viewer: false,
            comments: Vec::new(),
        })
    }

    async fn delete_post(&self, _post_id: &str) -> Result<()> {
        self.record("delete_post");
        self.check_write("posts")
    }

    async fn like_post(&self, _post_id: &str) -> Result<()> {
        self.record("like_post");
        self.wait_like_gate().await;
        self.check_write("likes")
    }

    async fn unlike_post(&self, _post_id: &str) -> Result<()> {
        self.record("unlike_post");
        self.wait_like_gate().await;
        self.check_write("likes")
    }

    async fn like_comment(&self, _post_id: &str, _comment_id: &str) -> Result<()> {
        self.record("like_comment");
        self.wait_like_gate().await;
        self.check_write("likes")
    }

    async fn unlike_comment(&self, _post_id: &str, _comment_id: &str) -> Result<()> {
        self.record("unlike_comment");
        self.wait_like_gate().await;
        self.check_write("likes")
    }

    async fn list_announcements(&self) -> Result<Vec<Announcement>> {
        self.record("list_announcements");
        self.check_read("announcements")?;
        Ok(self.announcements.lock().unwrap().clone())
    }

    async fn create_announcement(&self, announcement: &NewAnnouncement) -> Result<Announcement> {
        self.record("create_announcement");
        self.check_write("announcements")?;
        Ok(Announcement {
            id: self.next_id("a"),
            title: announcement.title.clone(),
            content: announcement.content.clone(),
            author: self.viewer.clone(),
            target: announcement.target,
            is_read: false,
            created_at: Some(Utc::now()),
        })
    }

    async fn mark_announcement_read(&self, _announcement_id: &str) -> Result<()> {
        self.record("mark_announcement_read");
        self.check_write("announcements")
    }

    async fn delete_announcement(&self, _announcement_id: &str) -> Result<()> {
        self.record("delete_announcement");
        self.check_write("announcements")
    }

    async fn search_users_by_email(&self, email: &str) -> Result<Vec<UserSummary>> {
        self.record("search_users_by_email");
        self.check_read("search")?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.email.as_deref() == Some(email))
            .cloned()
            .collect())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.record("list_conversations");
        self.check_read("conversations")?;
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>> {
        self.record("fetch_history");
        let gate = self.history_gates.lock().unwrap().remove(user_id);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.check_read("history")?;
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, user_id: &str, content: &str) -> Result<Message> {
        self.record("send_message");
        self.check_write("messages")?;
        let mut sent = message(&self.next_id("m"), &self.viewer.id, user_id, content);
        sent.created_at = None;
        sent.sent_at = Some(Utc::now());
        Ok(sent)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserSummary> {
        self.record("update_profile");
        self.check_write("profile")?;
        let mut viewer = self.viewer.clone();
        viewer.name = update.name.clone();
        viewer.bio = Some(update.bio.clone()).filter(|b| !b.is_empty());
        if let Some(avatar) = &update.avatar {
            viewer.avatar = Some(avatar.clone());
        }
        Ok(viewer)
    }
}
