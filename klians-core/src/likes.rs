//! Like/unlike toggles for posts and comments
//!
//! A toggle is a command: [`LikeState::begin`] applies the flip locally
//! and returns a [`ToggleCommand`] holding the previous values. The remote
//! call then either commits it or runs its compensating action, which
//! restores the previous flag and count. While a toggle is in flight a
//! second attempt on the same target is rejected with
//! [`ClientError::Busy`] and changes nothing.

use crate::api::ApiClient;
use crate::{ClientError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Alert text for a failed toggle
pub const LIKE_FAILED: &str = "Failed to update like. Please try again.";

/// What is being liked
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LikeTarget {
    Post(String),
    Comment { post_id: String, comment_id: String },
}

impl LikeTarget {
    pub fn post(id: impl Into<String>) -> Self {
        LikeTarget::Post(id.into())
    }

    pub fn comment(post_id: impl Into<String>, comment_id: impl Into<String>) -> Self {
        LikeTarget::Comment {
            post_id: post_id.into(),
            comment_id: comment_id.into(),
        }
    }
}

/// Local like state of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LikeState {
    pub liked: bool,
    pub count: u32,
    in_flight: bool,
}

/// A flip applied locally and awaiting the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a toggle must be committed or compensated"]
pub struct ToggleCommand {
    /// True when the command likes the target, false when it unlikes
    pub like: bool,
    previous_liked: bool,
    previous_count: u32,
}

impl LikeState {
    pub fn new(liked: bool, count: u32) -> Self {
        Self {
            liked,
            count,
            in_flight: false,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Flip locally and mark in flight
    pub fn begin(&mut self) -> Result<ToggleCommand> {
        if self.in_flight {
            return Err(ClientError::Busy("like toggle in flight".to_string()));
        }

        let command = ToggleCommand {
            like: !self.liked,
            previous_liked: self.liked,
            previous_count: self.count,
        };
        self.liked = command.like;
        self.count = if command.like {
            self.count.saturating_add(1)
        } else {
            self.count.saturating_sub(1)
        };
        self.in_flight = true;

        Ok(command)
    }

    /// The server accepted the toggle
    pub fn commit(&mut self, _command: ToggleCommand) {
        self.in_flight = false;
    }

    /// The server rejected the toggle; restore the previous values
    pub fn compensate(&mut self, command: ToggleCommand) {
        self.liked = command.previous_liked;
        self.count = command.previous_count;
        self.in_flight = false;
    }
}

/// Runs toggles against the API, tracking state per target
pub struct LikeToggler {
    api: Arc<dyn ApiClient>,
    states: Arc<RwLock<HashMap<LikeTarget, LikeState>>>,
}

impl LikeToggler {
    pub fn new(api: Arc<dyn ApiClient>) -> Self {
        Self {
            api,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed the state of a target from a fetched record
    ///
    /// A target with a toggle in flight keeps its local state.
    pub async fn track(&self, target: LikeTarget, liked: bool, count: u32) {
        let mut states = self.states.write().await;
        let state = states.entry(target).or_default();
        if !state.in_flight {
            *state = LikeState::new(liked, count);
        }
    }

    pub async fn state(&self, target: &LikeTarget) -> Option<LikeState> {
        self.states.read().await.get(target).copied()
    }

    /// Toggle a target
    ///
    /// Returns the settled state. On a remote failure the local flip is
    /// compensated and the error is returned for the caller to show
    /// [`LIKE_FAILED`].
    pub async fn toggle(&self, target: &LikeTarget) -> Result<LikeState> {
        let (command, _) = self.begin(target).await?;
        let outcome = self.send(target, command.like).await;
        self.settle(target, command, outcome).await
    }

    /// Apply the flip locally; returns the command and the in-flight state
    pub async fn begin(&self, target: &LikeTarget) -> Result<(ToggleCommand, LikeState)> {
        let mut states = self.states.write().await;
        let state = states.entry(target.clone()).or_default();
        let command = state.begin()?;
        debug!("Toggling {:?} (like: {})", target, command.like);
        Ok((command, *state))
    }

    /// Issue the remote like or unlike
    pub async fn send(&self, target: &LikeTarget, like: bool) -> Result<()> {
        match (target, like) {
            (LikeTarget::Post(id), true) => self.api.like_post(id).await,
            (LikeTarget::Post(id), false) => self.api.unlike_post(id).await,
            (LikeTarget::Comment { post_id, comment_id }, true) => {
                self.api.like_comment(post_id, comment_id).await
            }
            (LikeTarget::Comment { post_id, comment_id }, false) => {
                self.api.unlike_comment(post_id, comment_id).await
            }
        }
    }

    /// Commit or compensate a command once the server has answered
    pub async fn settle(
        &self,
        target: &LikeTarget,
        command: ToggleCommand,
        outcome: Result<()>,
    ) -> Result<LikeState> {
        let mut states = self.states.write().await;
        let state = states.entry(target.clone()).or_default();
        match outcome {
            Ok(()) => {
                state.commit(command);
                Ok(*state)
            }
            Err(e) => {
                warn!("Like toggle on {:?} failed, reverting: {}", target, e);
                state.compensate(command);
                Err(e)
            }
        }
    }

    pub async fn clear(&self) {
        self.states.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::test_utils::{user, MockApi};

    #[test]
    fn test_begin_flips_immediately() {
        let mut state = LikeState::new(false, 3);
        let command = state.begin().unwrap();
        assert!(command.like);
        assert!(state.liked);
        assert_eq!(state.count, 4);
        assert!(state.is_in_flight());

        state.commit(command);
        assert!(!state.is_in_flight());
        assert_eq!(state.count, 4);
    }

    #[test]
    fn test_second_begin_is_rejected() {
        let mut state = LikeState::new(false, 0);
        let _first = state.begin().unwrap();
        assert!(matches!(state.begin(), Err(ClientError::Busy(_))));
        assert_eq!(state.count, 1);
        assert!(state.liked);
    }

    #[test]
    fn test_compensate_restores() {
        let mut state = LikeState::new(true, 5);
        let command = state.begin().unwrap();
        assert_eq!(state.count, 4);

        state.compensate(command);
        assert_eq!(state, LikeState::new(true, 5));
    }

    #[test]
    fn test_count_never_negative() {
        let mut state = LikeState::new(true, 0);
        let command = state.begin().unwrap();
        assert_eq!(state.count, 0);
        assert!(!state.liked);
        state.commit(command);
    }

    #[tokio::test]
    async fn test_toggle_while_in_flight_is_noop() {
        let api = Arc::new(MockApi::new(user("me", Role::Student)));
        let gate = api.gate_likes();
        let toggler = Arc::new(LikeToggler::new(api.clone()));
        let target = LikeTarget::post("p1");
        toggler.track(target.clone(), false, 2).await;

        let first = {
            let toggler = toggler.clone();
            let target = target.clone();
            tokio::spawn(async move { toggler.toggle(&target).await })
        };
        while api.call_count("like_post") == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            toggler.toggle(&target).await,
            Err(ClientError::Busy(_))
        ));
        assert_eq!(toggler.state(&target).await.unwrap().count, 3);

        gate.send(()).unwrap();
        let settled = first.await.unwrap().unwrap();
        assert_eq!(settled, LikeState::new(true, 3));
        assert_eq!(api.call_count("like_post"), 1);
        assert_eq!(api.call_count("unlike_post"), 0);
    }

    #[tokio::test]
    async fn test_failed_comment_toggle_is_compensated() {
        let api = Arc::new(MockApi::new(user("me", Role::Student)));
        api.fail_writes(true);
        let toggler = LikeToggler::new(api.clone());
        let target = LikeTarget::comment("p1", "c1");
        toggler.track(target.clone(), true, 7).await;

        assert!(toggler.toggle(&target).await.is_err());
        assert_eq!(toggler.state(&target).await, Some(LikeState::new(true, 7)));
        assert_eq!(api.call_count("unlike_comment"), 1);
    }
}
