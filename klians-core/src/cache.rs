//! Best-effort local post cache
//!
//! A JSON array of the viewer's own posts, used only as the degraded data
//! set when the feed cannot be fetched. There is no locking and no schema
//! version: a file that does not parse, or that holds any post with an
//! image, is deleted and never repaired.

use crate::models::Post;
use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the cache inside the data directory
pub const CACHE_FILE_NAME: &str = "klians_posts.json";

/// Post cache stored as a single JSON file
#[derive(Debug, Clone)]
pub struct PostCache {
    path: PathBuf,
}

impl PostCache {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CACHE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached posts
    ///
    /// A missing file yields an empty list. An unreadable, unparsable or
    /// media-holding file is wiped and also yields an empty list.
    pub fn load(&self) -> Vec<Post> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No post cache at {}", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to read post cache: {}", e);
                self.wipe();
                return Vec::new();
            }
        };

        let posts: Vec<Post> = match serde_json::from_str(&contents) {
            Ok(posts) => posts,
            Err(e) => {
                warn!("Discarding unparsable post cache: {}", e);
                self.wipe();
                return Vec::new();
            }
        };

        if posts.iter().any(Post::has_media) {
            info!("Discarding post cache holding embedded media");
            self.wipe();
            return Vec::new();
        }

        debug!("Loaded {} cached posts", posts.len());
        posts
    }

    /// Start-up cleanup: wipe the cache if it is invalid or holds media
    ///
    /// Returns whether the file was removed.
    pub fn purge_if_media(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        let _ = self.load();
        !self.path.exists()
    }

    /// Add a post at the front of the cache
    ///
    /// Posts with an image are never written. Write failures are logged and
    /// swallowed.
    pub fn prepend(&self, post: &Post) {
        if post.has_media() {
            debug!("Not caching post {} with media", post.id);
            return;
        }

        let mut posts = self.load();
        posts.retain(|p| p.id != post.id);
        posts.insert(0, post.clone());

        if let Err(e) = self.write(&posts) {
            warn!("Failed to write post cache: {}", e);
        }
    }

    /// Drop a post from the cache, if present
    pub fn remove(&self, post_id: &str) {
        let mut posts = self.load();
        let before = posts.len();
        posts.retain(|p| p.id != post_id);
        if posts.len() == before {
            return;
        }
        if let Err(e) = self.write(&posts) {
            warn!("Failed to write post cache: {}", e);
        }
    }

    fn write(&self, posts: &[Post]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(posts)?;
        fs::write(&self.path, contents)?;
        debug!("Saved {} cached posts", posts.len());
        Ok(())
    }

    fn wipe(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove post cache: {}", e),
        }
    }
}
