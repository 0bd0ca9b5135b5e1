//! Session lifecycle
//!
//! A [`Session`] is everything that exists while one viewer is signed in:
//! the API client, the event bus and realtime channel, and the feed,
//! conversation, announcement and like services. Services are passed
//! around by reference from here; nothing is ambient.
//!
//! [`Session::start`] wires the services, registers one subscription per
//! realtime event kind and performs the initial loads.
//! [`Session::logout`] tears all of it down; afterwards the event bus has
//! no listeners left.

use crate::announcements::AnnouncementBoard;
use crate::api::ApiClient;
use crate::cache::PostCache;
use crate::conversations::{ConversationService, DEFAULT_HISTORY_LIMIT};
use crate::feed::{FeedConfig, FeedService};
use crate::likes::{LikeState, LikeTarget, LikeToggler};
use crate::models::{FeedItem, Post, UserSummary};
use crate::realtime::{Emitter, EventBus, EventKind, RealtimeChannel, RealtimeConfig, Subscription};
use crate::settings::ProfileUpdate;
use crate::{ClientError, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings for one signed-in session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub feed: FeedConfig,
    /// `None` runs without live updates
    pub realtime: Option<RealtimeConfig>,
    /// Directory of the post cache; `None` disables it
    pub cache_dir: Option<PathBuf>,
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            realtime: None,
            cache_dir: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Services of one signed-in viewer
pub struct Session {
    viewer: UserSummary,
    api: Arc<dyn ApiClient>,
    bus: EventBus,
    channel: Option<Arc<RealtimeChannel>>,
    feed: Arc<FeedService>,
    conversations: Arc<ConversationService>,
    announcements: Arc<AnnouncementBoard>,
    likes: Arc<LikeToggler>,
    dispatchers: Vec<JoinHandle<()>>,
}

/// Forward every event of one subscription to a service
fn spawn_dispatch<F, Fut>(mut subscription: Subscription, apply: F) -> JoinHandle<()>
where
    F: Fn(crate::realtime::RealtimeEvent) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    tokio::spawn(async move {
        let kind = subscription.kind();
        while let Some(event) = subscription.recv().await {
            let changed = apply(event).await;
            debug!("Applied {} event (changed: {})", kind.name(), changed);
        }
    })
}

impl Session {
    /// Start a session for `viewer`
    ///
    /// Initial load failures are contained: the feed falls back, the board
    /// records its inline error, the conversation list stays empty.
    pub async fn start(config: SessionConfig, viewer: UserSummary, api: Arc<dyn ApiClient>) -> Self {
        info!("Starting session for {} ({})", viewer.name, viewer.id);

        let bus = EventBus::new();
        let channel = config
            .realtime
            .clone()
            .map(|realtime| Arc::new(RealtimeChannel::spawn(realtime, bus.clone())));
        let emitter = channel
            .clone()
            .map(|channel| channel as Arc<dyn Emitter>);

        let cache = config.cache_dir.as_deref().map(PostCache::new);
        let feed = Arc::new(FeedService::new(api.clone(), cache, config.feed.clone()));
        let conversations = Arc::new(ConversationService::new(
            api.clone(),
            viewer.id.clone(),
            config.history_limit,
        ));
        let announcements = Arc::new(AnnouncementBoard::new(api.clone(), emitter));
        let likes = Arc::new(LikeToggler::new(api.clone()));

        let mut dispatchers = Vec::with_capacity(3);
        {
            let feed = feed.clone();
            dispatchers.push(spawn_dispatch(bus.subscribe(EventKind::NewPost), move |event| {
                let feed = feed.clone();
                async move { feed.apply_realtime(&event).await }
            }));
        }
        {
            let conversations = conversations.clone();
            dispatchers.push(spawn_dispatch(
                bus.subscribe(EventKind::NewMessage),
                move |event| {
                    let conversations = conversations.clone();
                    async move { conversations.apply_realtime(&event).await }
                },
            ));
        }
        {
            let announcements = announcements.clone();
            dispatchers.push(spawn_dispatch(
                bus.subscribe(EventKind::AnnouncementCreated),
                move |event| {
                    let announcements = announcements.clone();
                    async move { announcements.apply_realtime(&event).await }
                },
            ));
        }

        let session = Self {
            viewer,
            api,
            bus,
            channel,
            feed,
            conversations,
            announcements,
            likes,
            dispatchers,
        };

        session.feed.refresh().await;
        session.sync_likes().await;
        if let Err(e) = session.conversations.refresh_list().await {
            warn!("Conversation list unavailable: {}", e);
        }
        if let Err(e) = session.announcements.refresh().await {
            warn!("Announcements unavailable: {}", e);
        }

        info!("Session started");
        session
    }

    pub fn viewer(&self) -> &UserSummary {
        &self.viewer
    }

    pub fn api(&self) -> &Arc<dyn ApiClient> {
        &self.api
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn feed(&self) -> &FeedService {
        &self.feed
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }

    pub fn announcements(&self) -> &AnnouncementBoard {
        &self.announcements
    }

    pub fn likes(&self) -> &LikeToggler {
        &self.likes
    }

    pub fn is_live(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_running())
    }

    /// Refresh the feed and re-seed like state from it
    pub async fn refresh_feed(&self) {
        self.feed.refresh().await;
        self.sync_likes().await;
    }

    async fn sync_likes(&self) {
        for item in self.feed.items().await {
            if let FeedItem::Post(post) = item {
                for comment in &post.comments {
                    self.likes
                        .track(
                            LikeTarget::comment(post.id.as_str(), comment.id.as_str()),
                            comment.liked_by_viewer,
                            comment.like_count,
                        )
                        .await;
                }
                self.likes
                    .track(LikeTarget::Post(post.id), post.liked_by_viewer, post.like_count)
                    .await;
            }
        }
    }

    async fn find_post(&self, post_id: &str) -> Result<Post> {
        self.feed
            .items()
            .await
            .into_iter()
            .find_map(|item| match item {
                FeedItem::Post(post) if post.id == post_id => Some(post),
                _ => None,
            })
            .ok_or_else(|| ClientError::NotFound(format!("Post {}", post_id)))
    }

    /// Toggle the viewer's like on a feed post and reflect the result
    ///
    /// The feed shows the flipped state while the request is in flight and
    /// the settled state once it returns.
    pub async fn toggle_post_like(&self, post_id: &str) -> Result<LikeState> {
        let target = LikeTarget::post(post_id);
        if self.likes.state(&target).await.is_none() {
            let post = self.find_post(post_id).await?;
            self.likes
                .track(target.clone(), post.liked_by_viewer, post.like_count)
                .await;
        }
        self.run_toggle(&target).await
    }

    /// Toggle the viewer's like on a comment of a feed post
    pub async fn toggle_comment_like(&self, post_id: &str, comment_id: &str) -> Result<LikeState> {
        let target = LikeTarget::comment(post_id, comment_id);
        if self.likes.state(&target).await.is_none() {
            let post = self.find_post(post_id).await?;
            let comment = post
                .comment(comment_id)
                .ok_or_else(|| ClientError::NotFound(format!("Comment {}", comment_id)))?;
            self.likes
                .track(target.clone(), comment.liked_by_viewer, comment.like_count)
                .await;
        }
        self.run_toggle(&target).await
    }

    async fn run_toggle(&self, target: &LikeTarget) -> Result<LikeState> {
        let (command, pending) = self.likes.begin(target).await?;
        self.reflect_like(target, pending).await;

        let outcome = self.likes.send(target, command.like).await;
        let result = self.likes.settle(target, command, outcome).await;
        if let Some(state) = self.likes.state(target).await {
            self.reflect_like(target, state).await;
        }
        result
    }

    async fn reflect_like(&self, target: &LikeTarget, state: LikeState) {
        let found = match target {
            LikeTarget::Post(post_id) => self.feed.set_like(post_id, state.liked, state.count).await,
            LikeTarget::Comment { post_id, comment_id } => {
                self.feed
                    .set_comment_like(post_id, comment_id, state.liked, state.count)
                    .await
            }
        };
        if !found {
            debug!("{:?} is no longer in the feed", target);
        }
    }

    /// Save profile changes and adopt the returned summary
    pub async fn update_profile(&mut self, update: &ProfileUpdate) -> Result<&UserSummary> {
        update.validate()?;
        let updated = self.api.update_profile(update).await?;
        info!("Profile updated for {}", updated.id);
        self.viewer = updated;
        Ok(&self.viewer)
    }

    /// Tear the session down
    ///
    /// Dispatch tasks are cancelled and awaited so every subscription has
    /// been dropped by the time this returns.
    pub async fn logout(&mut self) {
        info!("Logging out {}", self.viewer.id);

        for task in self.dispatchers.drain(..) {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Dispatch task failed: {}", e);
                }
            }
        }

        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }

        self.conversations.clear().await;
        self.announcements.clear().await;
        self.likes.clear().await;

        debug!("Listeners left after logout: {}", self.bus.total_listeners());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.dispatchers {
            task.abort();
        }
    }
}
