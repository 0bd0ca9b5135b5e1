//! Feed Reconciler
//!
//! Merges the fetched page of posts, seed broadcasts and live-pushed posts
//! into one ordered timeline.
//!
//! ## Ordering
//!
//! A full [`Feed::load`] sorts broadcasts that are pinned at load time
//! first, then everything else, each partition newest first. Posts that
//! arrive later (pushed over the realtime channel or created by the
//! viewer) are inserted right after the last currently pinned broadcast
//! and nothing is re-sorted. Pin status is recomputed at render time, so a
//! broadcast that expires keeps its position until the next full load.
//!
//! ## Failure
//!
//! A failed fetch never leaves the feed empty: [`FeedService::refresh`]
//! installs the degraded data set (seed posts, cached posts, seed
//! broadcasts) instead of propagating the error.

use crate::api::{ApiClient, NewPost};
use crate::cache::PostCache;
use crate::models::{default_pin_window, Broadcast, FeedItem, Post, UserSummary};
use crate::realtime::RealtimeEvent;
use crate::render::{CommentView, FeedEntryView};
use crate::{ClientError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Alert text for a failed post creation
pub const CREATE_POST_FAILED: &str = "Failed to create post. Please try again.";

/// Where the current feed contents came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedLoadState {
    Loading,
    Ready,
    /// Fetch failed; showing the fallback data set
    Degraded,
}

/// Feed settings
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// How long a broadcast stays pinned
    pub pin_window: Duration,
    /// Posts shown only when the fetch fails
    pub seed_posts: Vec<Post>,
    /// Broadcasts merged into every load
    pub seed_broadcasts: Vec<Broadcast>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            pin_window: default_pin_window(),
            seed_posts: Vec::new(),
            seed_broadcasts: Vec::new(),
        }
    }
}

/// Ordered feed state
#[derive(Debug, Clone)]
pub struct Feed {
    items: Vec<FeedItem>,
    state: FeedLoadState,
    pin_window: Duration,
}

impl Default for Feed {
    fn default() -> Self {
        Self::new(default_pin_window())
    }
}

impl Feed {
    pub fn new(pin_window: Duration) -> Self {
        Self {
            items: Vec::new(),
            state: FeedLoadState::Loading,
            pin_window,
        }
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn state(&self) -> FeedLoadState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    /// Replace the contents with a full sort at `now`
    ///
    /// Duplicate ids keep their first occurrence.
    pub fn load(&mut self, items: Vec<FeedItem>, now: DateTime<Utc>) {
        let window = self.pin_window;
        let mut items = dedup(items);
        items.sort_by(|a, b| {
            let a_pinned = a.is_pinned(now, window);
            let b_pinned = b.is_pinned(now, window);
            b_pinned
                .cmp(&a_pinned)
                .then_with(|| b.created_at().cmp(&a.created_at()))
        });

        self.items = items;
        self.state = FeedLoadState::Ready;
        debug!("Feed loaded with {} items", self.items.len());
    }

    /// Install the degraded data set in the given order
    pub fn load_fallback(&mut self, items: Vec<FeedItem>) {
        self.items = dedup(items);
        self.state = FeedLoadState::Degraded;
        debug!("Feed fallback with {} items", self.items.len());
    }

    /// Insert a live-pushed post after the last pinned broadcast
    ///
    /// Returns false when a post with that id is already present.
    pub fn insert_pushed(&mut self, post: Post, now: DateTime<Utc>) -> bool {
        self.insert_below_pins(FeedItem::Post(post), now)
    }

    /// Insert a post the viewer just created; same placement as a push
    pub fn insert_created(&mut self, post: Post, now: DateTime<Utc>) -> bool {
        self.insert_below_pins(FeedItem::Post(post), now)
    }

    fn insert_below_pins(&mut self, item: FeedItem, now: DateTime<Utc>) -> bool {
        if self.contains(item.id()) {
            debug!("Feed already holds {}", item.id());
            return false;
        }
        let index = self
            .items
            .iter()
            .rposition(|i| i.is_pinned(now, self.pin_window))
            .map_or(0, |last| last + 1);
        self.items.insert(index, item);
        true
    }

    /// Remove the item with `id`; returns whether one was removed
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id() != id);
        self.items.len() != before
    }

    /// Reflect a like toggle on a post
    pub fn set_like(&mut self, post_id: &str, liked: bool, count: u32) -> bool {
        match self
            .items
            .iter_mut()
            .filter_map(FeedItem::as_post_mut)
            .find(|p| p.id == post_id)
        {
            Some(post) => {
                post.liked_by_viewer = liked;
                post.like_count = count;
                true
            }
            None => false,
        }
    }

    /// Update a comment embedded in a loaded post
    pub fn set_comment_like(
        &mut self,
        post_id: &str,
        comment_id: &str,
        liked: bool,
        count: u32,
    ) -> bool {
        match self
            .items
            .iter_mut()
            .filter_map(FeedItem::as_post_mut)
            .find(|p| p.id == post_id)
            .and_then(|p| p.comment_mut(comment_id))
        {
            Some(comment) => {
                comment.liked_by_viewer = liked;
                comment.like_count = count;
                true
            }
            None => false,
        }
    }

    /// Comments of a loaded post, oldest first
    pub fn comment_views(&self, post_id: &str, now: DateTime<Utc>) -> Vec<CommentView> {
        self.items
            .iter()
            .filter_map(FeedItem::as_post)
            .find(|p| p.id == post_id)
            .map(|p| p.comments.iter().map(|c| CommentView::new(c, now)).collect())
            .unwrap_or_default()
    }

    /// View models in stored order with pin status at `now`
    pub fn render(&self, now: DateTime<Utc>) -> Vec<FeedEntryView> {
        self.items
            .iter()
            .map(|item| FeedEntryView::new(item.clone(), item.is_pinned(now, self.pin_window), now))
            .collect()
    }
}

fn dedup(items: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id().to_string()))
        .collect()
}

/// Feed operations over the API and the post cache
pub struct FeedService {
    api: Arc<dyn ApiClient>,
    cache: Option<PostCache>,
    config: FeedConfig,
    feed: Arc<RwLock<Feed>>,
}

impl FeedService {
    pub fn new(api: Arc<dyn ApiClient>, cache: Option<PostCache>, config: FeedConfig) -> Self {
        info!(
            "Feed service created (pin window {}h, cache {})",
            config.pin_window.num_hours(),
            if cache.is_some() { "on" } else { "off" }
        );
        let feed = Feed::new(config.pin_window);
        Self {
            api,
            cache,
            config,
            feed: Arc::new(RwLock::new(feed)),
        }
    }

    /// Fetch the first page and rebuild the feed
    ///
    /// On failure the fallback data set is installed and the error is only
    /// logged.
    pub async fn refresh(&self) -> FeedLoadState {
        if let Some(cache) = &self.cache {
            cache.purge_if_media();
        }

        let seeds = self
            .config
            .seed_broadcasts
            .iter()
            .cloned()
            .map(FeedItem::Broadcast);

        match self.api.list_posts(1).await {
            Ok(mut items) => {
                items.extend(seeds);
                self.feed.write().await.load(items, Utc::now());
                info!("Feed refreshed");
                FeedLoadState::Ready
            }
            Err(e) => {
                warn!("Feed fetch failed, using fallback: {}", e);
                let cached = self.cache.as_ref().map(PostCache::load).unwrap_or_default();
                let items: Vec<FeedItem> = self
                    .config
                    .seed_posts
                    .iter()
                    .cloned()
                    .chain(cached)
                    .map(FeedItem::Post)
                    .chain(seeds)
                    .collect();
                self.feed.write().await.load_fallback(items);
                FeedLoadState::Degraded
            }
        }
    }

    /// Publish a post as `viewer`
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for an empty post, or the API error; show
    /// [`CREATE_POST_FAILED`] for the latter.
    pub async fn create_post(
        &self,
        viewer: &UserSummary,
        content: &str,
        image: Option<String>,
    ) -> Result<Post> {
        let new_post = NewPost::new(content, image);
        if new_post.is_empty() {
            return Err(ClientError::validation("A post needs text or an image"));
        }

        let mut post = self.api.create_post(&new_post).await.map_err(|e| {
            warn!("Failed to create post: {}", e);
            e
        })?;
        if post.author.name.is_empty() {
            post.author = viewer.clone();
        }

        if let Some(cache) = &self.cache {
            cache.prepend(&post);
        }
        self.feed.write().await.insert_created(post.clone(), Utc::now());
        info!("Created post {}", post.id);

        Ok(post)
    }

    /// Delete a post remotely, then drop it locally
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.api.delete_post(post_id).await?;
        self.feed.write().await.remove(post_id);
        if let Some(cache) = &self.cache {
            cache.remove(post_id);
        }
        info!("Deleted post {}", post_id);
        Ok(())
    }

    /// Apply a realtime event; returns whether the feed changed
    pub async fn apply_realtime(&self, event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::NewPost(post) => {
                let inserted = self.feed.write().await.insert_pushed(post.clone(), Utc::now());
                if inserted {
                    debug!("Pushed post {} inserted", post.id);
                }
                inserted
            }
            _ => false,
        }
    }

    pub async fn set_like(&self, post_id: &str, liked: bool, count: u32) -> bool {
        self.feed.write().await.set_like(post_id, liked, count)
    }

    pub async fn set_comment_like(
        &self,
        post_id: &str,
        comment_id: &str,
        liked: bool,
        count: u32,
    ) -> bool {
        self.feed
            .write()
            .await
            .set_comment_like(post_id, comment_id, liked, count)
    }

    pub async fn comment_views(&self, post_id: &str, now: DateTime<Utc>) -> Vec<CommentView> {
        self.feed.read().await.comment_views(post_id, now)
    }

    pub async fn render(&self, now: DateTime<Utc>) -> Vec<FeedEntryView> {
        self.feed.read().await.render(now)
    }

    pub async fn items(&self) -> Vec<FeedItem> {
        self.feed.read().await.items().to_vec()
    }

    pub async fn state(&self) -> FeedLoadState {
        self.feed.read().await.state()
    }
}
