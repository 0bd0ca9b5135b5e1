//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use klians_core::api::{ApiClient, NewAnnouncement, NewPost};
use klians_core::{
    Announcement, Broadcast, ClientError, Conversation, FeedItem, Message, MessageKind, Post,
    ProfileUpdate, Result, Role, UserSummary,
};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

pub fn viewer() -> UserSummary {
    UserSummary::new("me", "Me")
        .with_email("me@klians.edu")
        .with_role(Role::Student)
}

pub fn post(id: &str, age: Duration) -> Post {
    Post {
        id: id.to_string(),
        author: UserSummary::new("u2", "Bo"),
        content: format!("post {}", id),
        image: None,
        created_at: Utc::now() - age,
        like_count: 0,
        comment_count: 0,
        liked_by_viewer: false,
        comments: Vec::new(),
    }
}

pub fn broadcast(id: &str, age: Duration) -> Broadcast {
    Broadcast {
        id: id.to_string(),
        author: UserSummary::new("admin", "Principal").with_role(Role::Admin),
        title: Some("Notice".to_string()),
        content: format!("broadcast {}", id),
        created_at: Utc::now() - age,
    }
}

pub fn text(id: &str, from: &str, to: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        sender_id: from.to_string(),
        sender: None,
        recipient_id: Some(to.to_string()),
        kind: MessageKind::Text,
        text: Some(format!("{} says hi", from)),
        shared_post: None,
        sent_at: None,
        created_at: Some(at),
    }
}

fn down() -> ClientError {
    ClientError::NetworkError("connection refused".to_string())
}

/// Scripted API for session scenarios
#[derive(Default)]
pub struct FakeApi {
    pub feed: Mutex<Option<Vec<FeedItem>>>,
    pub histories: Mutex<HashMap<String, Vec<Message>>>,
    pub conversations: Mutex<Vec<Conversation>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn with_feed(items: Vec<FeedItem>) -> Self {
        let api = Self::default();
        *api.feed.lock().unwrap() = Some(items);
        api
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn history(&self, user_id: &str, messages: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(user_id.to_string(), messages);
    }

    pub fn hold_history(&self, user_id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(user_id.to_string(), rx);
        tx
    }

    pub fn history_fetches(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiClient for FakeApi {
    async fn list_posts(&self, _page: u32) -> Result<Vec<FeedItem>> {
        self.feed.lock().unwrap().clone().ok_or_else(down)
    }

    async fn create_post(&self, _post: &NewPost) -> Result<Post> {
        Err(down())
    }

    async fn delete_post(&self, _post_id: &str) -> Result<()> {
        Ok(())
    }

    async fn like_post(&self, _post_id: &str) -> Result<()> {
        Ok(())
    }

    async fn unlike_post(&self, _post_id: &str) -> Result<()> {
        Ok(())
    }

    async fn like_comment(&self, _post_id: &str, _comment_id: &str) -> Result<()> {
        Ok(())
    }

    async fn unlike_comment(&self, _post_id: &str, _comment_id: &str) -> Result<()> {
        Ok(())
    }

    async fn list_announcements(&self) -> Result<Vec<Announcement>> {
        Ok(Vec::new())
    }

    async fn create_announcement(&self, _announcement: &NewAnnouncement) -> Result<Announcement> {
        Err(down())
    }

    async fn mark_announcement_read(&self, _announcement_id: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_announcement(&self, _announcement_id: &str) -> Result<()> {
        Ok(())
    }

    async fn search_users_by_email(&self, _email: &str) -> Result<Vec<UserSummary>> {
        Ok(Vec::new())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>> {
        self.fetches.lock().unwrap().push(user_id.to_string());
        let gate = self.gates.lock().unwrap().remove(user_id);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, _user_id: &str, _content: &str) -> Result<Message> {
        Err(down())
    }

    async fn update_profile(&self, _update: &ProfileUpdate) -> Result<UserSummary> {
        Err(down())
    }
}
