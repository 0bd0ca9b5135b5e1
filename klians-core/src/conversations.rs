//! Conversation Store
//!
//! Owns the conversation list and the message thread of the selected
//! conversation, merging history fetched on demand with live-pushed
//! messages.
//!
//! ## Active conversation
//!
//! ```text
//! Unselected --select(a)--> Loading(a, t1)
//! Loading(a, t1) --complete_history(t1)--> Active(a)
//! Active(a) --push(message for a)--> Active(a), message appended
//! Loading(a) | Active(a) --select(b)--> Loading(b, t2)
//! any(a) --select(a)--> unchanged
//! ```
//!
//! Every history fetch carries a [`HistoryTicket`]. A response whose ticket
//! is not the current one belongs to a superseded selection and is dropped,
//! so a late history for B can never be shown under A.

use crate::api::ApiClient;
use crate::models::{Conversation, LastMessage, Message, UserSummary};
use crate::realtime::RealtimeEvent;
use crate::render::{render_thread, ConversationRowView, MessageBubbleView};
use crate::{ClientError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Inline error shown when a history fetch fails
pub const HISTORY_FAILED: &str = "Failed to load messages";

/// Default cap on messages kept for the active thread
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Proof of which selection a history fetch was issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    conversation_id: String,
    seq: u64,
}

impl HistoryTicket {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

/// State of the selected conversation
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveConversation {
    Unselected,
    Loading {
        id: String,
        seq: u64,
        /// Live messages that arrived before the history
        pending: Vec<Message>,
    },
    Active {
        id: String,
        messages: Vec<Message>,
        error: Option<String>,
    },
}

impl ActiveConversation {
    pub fn id(&self) -> Option<&str> {
        match self {
            ActiveConversation::Unselected => None,
            ActiveConversation::Loading { id, .. } | ActiveConversation::Active { id, .. } => {
                Some(id)
            }
        }
    }
}

/// Conversation list plus the active thread
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: ActiveConversation,
    next_seq: u64,
    history_limit: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            conversations: Vec::new(),
            active: ActiveConversation::Unselected,
            next_seq: 1,
            history_limit: history_limit.max(1),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active(&self) -> &ActiveConversation {
        &self.active
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.id()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.active, ActiveConversation::Loading { .. })
    }

    /// Messages of the active thread; empty while loading
    pub fn messages(&self) -> &[Message] {
        match &self.active {
            ActiveConversation::Active { messages, .. } => messages,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.active {
            ActiveConversation::Active { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    /// Replace the list in server order, collapsing duplicate ids
    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) {
        let mut seen = HashSet::new();
        self.conversations = conversations
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();
    }

    /// Make sure a conversation with `user` is listed; new entries go on top
    pub fn ensure_conversation(&mut self, user: UserSummary) {
        if self.conversations.iter().any(|c| c.id == user.id) {
            return;
        }
        self.conversations.insert(
            0,
            Conversation {
                id: user.id.clone(),
                user,
                last_message: None,
                unread: false,
            },
        );
    }

    /// Select a conversation
    ///
    /// Selecting the current one is a no-op and returns `None`. Otherwise the
    /// previous thread is discarded and the returned ticket must accompany
    /// the history of the new one.
    pub fn select(&mut self, id: &str) -> Option<HistoryTicket> {
        if self.active_id() == Some(id) {
            debug!("Conversation {} already selected", id);
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.active = ActiveConversation::Loading {
            id: id.to_string(),
            seq,
            pending: Vec::new(),
        };
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.unread = false;
        }

        Some(HistoryTicket {
            conversation_id: id.to_string(),
            seq,
        })
    }

    fn ticket_is_current(&self, ticket: &HistoryTicket) -> bool {
        matches!(
            &self.active,
            ActiveConversation::Loading { id, seq, .. }
                if *seq == ticket.seq && *id == ticket.conversation_id
        )
    }

    /// Install fetched history; returns false for a stale ticket
    pub fn complete_history(&mut self, ticket: &HistoryTicket, history: Vec<Message>) -> bool {
        if !self.ticket_is_current(ticket) {
            debug!(
                "Dropping stale history for {} (ticket {})",
                ticket.conversation_id, ticket.seq
            );
            return false;
        }

        let pending = match std::mem::replace(&mut self.active, ActiveConversation::Unselected) {
            ActiveConversation::Loading { pending, .. } => pending,
            _ => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut messages: Vec<Message> = history
            .into_iter()
            .chain(pending)
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        self.trim(&mut messages);

        self.active = ActiveConversation::Active {
            id: ticket.conversation_id.clone(),
            messages,
            error: None,
        };
        true
    }

    /// Record a failed history fetch; returns false for a stale ticket
    pub fn fail_history(&mut self, ticket: &HistoryTicket, error: &ClientError) -> bool {
        if !self.ticket_is_current(ticket) {
            return false;
        }
        warn!(
            "History for {} failed: {}",
            ticket.conversation_id, error
        );

        let pending = match std::mem::replace(&mut self.active, ActiveConversation::Unselected) {
            ActiveConversation::Loading { pending, .. } => pending,
            _ => Vec::new(),
        };
        self.active = ActiveConversation::Active {
            id: ticket.conversation_id.clone(),
            messages: pending,
            error: Some(HISTORY_FAILED.to_string()),
        };
        true
    }

    /// Merge a live or acknowledged message
    ///
    /// Returns whether it was added to the selected thread (or its pending
    /// buffer). The conversation list gets its last-message summary updated
    /// in place; it is never re-sorted.
    pub fn push(&mut self, message: Message, viewer_id: &str) -> bool {
        let Some(counterpart) = message.counterpart_id(viewer_id).map(str::to_string) else {
            warn!("Message {} has no counterpart", message.id);
            return false;
        };
        let is_selected = self.active_id() == Some(counterpart.as_str());
        let incoming = message.sender_id != viewer_id;

        self.touch_conversation(&counterpart, &message, incoming && !is_selected);

        let limit = self.history_limit;
        match &mut self.active {
            ActiveConversation::Active { id, messages, .. } if *id == counterpart => {
                if messages.iter().any(|m| m.id == message.id) {
                    return false;
                }
                messages.push(message);
                if messages.len() > limit {
                    let excess = messages.len() - limit;
                    messages.drain(..excess);
                }
                true
            }
            ActiveConversation::Loading { id, pending, .. } if *id == counterpart => {
                if pending.iter().any(|m| m.id == message.id) {
                    return false;
                }
                pending.push(message);
                true
            }
            _ => false,
        }
    }

    fn touch_conversation(&mut self, counterpart: &str, message: &Message, mark_unread: bool) {
        let summary = LastMessage {
            content: message.preview(),
            created_at: message.display_time(),
        };

        match self.conversations.iter_mut().find(|c| c.id == counterpart) {
            Some(conversation) => {
                conversation.last_message = Some(summary);
                if mark_unread {
                    conversation.unread = true;
                }
            }
            None => {
                let user = message
                    .sender
                    .clone()
                    .filter(|s| s.id == counterpart)
                    .unwrap_or_else(|| UserSummary::new(counterpart, ""));
                debug!("New conversation with {}", counterpart);
                self.conversations.insert(
                    0,
                    Conversation {
                        id: counterpart.to_string(),
                        user,
                        last_message: Some(summary),
                        unread: mark_unread,
                    },
                );
            }
        }
    }

    fn trim(&self, messages: &mut Vec<Message>) {
        if messages.len() > self.history_limit {
            let excess = messages.len() - self.history_limit;
            messages.drain(..excess);
        }
    }

    /// Forget everything (logout)
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.active = ActiveConversation::Unselected;
    }
}

/// Conversation operations over the API
pub struct ConversationService {
    api: Arc<dyn ApiClient>,
    viewer_id: String,
    store: Arc<RwLock<ConversationStore>>,
}

impl ConversationService {
    pub fn new(api: Arc<dyn ApiClient>, viewer_id: impl Into<String>, history_limit: usize) -> Self {
        Self {
            api,
            viewer_id: viewer_id.into(),
            store: Arc::new(RwLock::new(ConversationStore::new(history_limit))),
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// Reload the conversation list
    pub async fn refresh_list(&self) -> Result<usize> {
        let conversations = self.api.list_conversations().await.map_err(|e| {
            warn!("Failed to load conversations: {}", e);
            e
        })?;
        let mut store = self.store.write().await;
        store.set_conversations(conversations);
        info!("Loaded {} conversations", store.conversations().len());
        Ok(store.conversations().len())
    }

    /// Select a conversation and fetch its history
    ///
    /// Returns false when the selection was a no-op or the history arrived
    /// after another selection superseded it.
    pub async fn select(&self, conversation_id: &str) -> Result<bool> {
        let Some(ticket) = self.store.write().await.select(conversation_id) else {
            return Ok(false);
        };
        debug!("Fetching history for {}", conversation_id);

        match self.api.fetch_history(conversation_id).await {
            Ok(history) => Ok(self.store.write().await.complete_history(&ticket, history)),
            Err(e) => {
                let current = self.store.write().await.fail_history(&ticket, &e);
                if current {
                    Err(e)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Send a text message to the selected conversation
    ///
    /// Nothing is shown until the server acknowledges; the acknowledged
    /// record is then appended.
    pub async fn send(&self, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ClientError::validation("Message cannot be empty"));
        }
        let conversation_id = self
            .store
            .read()
            .await
            .active_id()
            .map(str::to_string)
            .ok_or_else(|| ClientError::invalid_state("no conversation selected"))?;

        let mut message = self.api.send_message(&conversation_id, content).await?;
        if message.recipient_id.is_none() && message.sender_id == self.viewer_id {
            message.recipient_id = Some(conversation_id.clone());
        }

        self.store.write().await.push(message.clone(), &self.viewer_id);
        debug!("Sent message {} to {}", message.id, conversation_id);
        Ok(message)
    }

    /// Find a user by email and open a conversation with them
    ///
    /// Returns the user, or `None` when nobody matched.
    pub async fn start_with_email(&self, email: &str) -> Result<Option<UserSummary>> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(ClientError::validation("Enter a full email address"));
        }

        let users = self.api.search_users_by_email(email).await?;
        let Some(user) = users.into_iter().next() else {
            info!("No user found for {}", email);
            return Ok(None);
        };

        self.store.write().await.ensure_conversation(user.clone());
        self.select(&user.id).await?;
        Ok(Some(user))
    }

    /// Apply a realtime event; returns whether the active thread changed
    pub async fn apply_realtime(&self, event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::NewMessage(message) => {
                self.store.write().await.push(message.clone(), &self.viewer_id)
            }
            _ => false,
        }
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.store.read().await.conversations().to_vec()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.store.read().await.messages().to_vec()
    }

    pub async fn active(&self) -> ActiveConversation {
        self.store.read().await.active().clone()
    }

    pub async fn rows(&self, now: DateTime<Utc>) -> Vec<ConversationRowView> {
        let store = self.store.read().await;
        let active = store.active_id();
        store
            .conversations()
            .iter()
            .map(|c| ConversationRowView::new(c, active, now))
            .collect()
    }

    pub async fn bubbles(&self) -> Vec<MessageBubbleView> {
        render_thread(self.store.read().await.messages(), &self.viewer_id)
    }

    pub async fn clear(&self) {
        self.store.write().await.clear();
    }
}
