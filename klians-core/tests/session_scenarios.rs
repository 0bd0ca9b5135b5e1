//! Session-level scenarios
//!
//! Drives a whole [`Session`] through an in-memory API and the event bus:
//! - feed fallback on fetch failure
//! - live posts placed below pinned broadcasts
//! - fast conversation switching never mislabels history
//! - cached media is discarded at start-up
//! - logout leaves no listeners behind

mod common;

use chrono::{Duration, Utc};
use common::{broadcast, post, text, viewer, FakeApi};
use klians_core::cache::CACHE_FILE_NAME;
use klians_core::realtime::dispatch_text;
use klians_core::{
    ActiveConversation, FeedConfig, FeedItem, FeedLoadState, PostCache, Session, SessionConfig,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn ids(items: &[FeedItem]) -> Vec<String> {
    items.iter().map(|i| i.id().to_string()).collect()
}

#[tokio::test]
async fn test_fetch_failure_renders_fallback() {
    let config = SessionConfig {
        feed: FeedConfig {
            seed_posts: vec![post("welcome", Duration::hours(5))],
            seed_broadcasts: vec![broadcast("orientation", Duration::hours(1))],
            ..Default::default()
        },
        ..Default::default()
    };
    let session = Session::start(config, viewer(), Arc::new(FakeApi::offline())).await;

    assert_eq!(session.feed().state().await, FeedLoadState::Degraded);
    let view = session.feed().render(Utc::now()).await;
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].item.id(), "welcome");
    assert!(view[1].is_pinned);
}

#[tokio::test]
async fn test_pushed_post_lands_below_pinned_broadcasts() {
    let api = FakeApi::with_feed(vec![
        FeedItem::Post(post("p-old", Duration::hours(3))),
        FeedItem::Broadcast(broadcast("b-older", Duration::hours(20))),
        FeedItem::Broadcast(broadcast("b-newer", Duration::hours(2))),
        FeedItem::Broadcast(broadcast("b-expired", Duration::hours(30))),
    ]);
    let session = Session::start(SessionConfig::default(), viewer(), Arc::new(api)).await;
    assert_eq!(
        ids(&session.feed().items().await),
        vec!["b-newer", "b-older", "p-old", "b-expired"]
    );

    let frame = json!({
        "event": "new-post",
        "data": {
            "_id": "live",
            "user": { "_id": "u9", "name": "Cy", "email": "cy@klians.edu" },
            "content": "just in",
            "createdAt": Utc::now().to_rfc3339(),
            "likes": []
        }
    });
    dispatch_text(session.bus(), &frame.to_string());
    settle().await;

    assert_eq!(
        ids(&session.feed().items().await),
        vec!["b-newer", "b-older", "live", "p-old", "b-expired"]
    );
}

#[tokio::test]
async fn test_malformed_push_is_dropped() {
    let api = FakeApi::with_feed(vec![FeedItem::Post(post("p1", Duration::hours(1)))]);
    let session = Session::start(SessionConfig::default(), viewer(), Arc::new(api)).await;

    dispatch_text(session.bus(), r#"{"event":"new-post","data":{"content":"no id"}}"#);
    settle().await;

    assert_eq!(ids(&session.feed().items().await), vec!["p1"]);
}

#[tokio::test]
async fn test_switch_a_b_a_never_shows_b_history() {
    let api = Arc::new(FakeApi::with_feed(Vec::new()));
    let now = Utc::now();
    api.history("a", vec![text("a1", "a", "me", now)]);
    api.history("b", vec![text("b1", "b", "me", now)]);
    let session = Arc::new(Session::start(SessionConfig::default(), viewer(), api.clone()).await);

    let release_a = api.hold_history("a");
    let release_b = api.hold_history("b");

    let first_a = {
        let session = session.clone();
        tokio::spawn(async move { session.conversations().select("a").await })
    };
    while api.history_fetches() < 1 {
        tokio::task::yield_now().await;
    }
    let to_b = {
        let session = session.clone();
        tokio::spawn(async move { session.conversations().select("b").await })
    };
    while api.history_fetches() < 2 {
        tokio::task::yield_now().await;
    }

    // back to A while both earlier fetches are still pending
    assert!(session.conversations().select("a").await.unwrap());

    release_b.send(()).unwrap();
    release_a.send(()).unwrap();
    assert!(!to_b.await.unwrap().unwrap());
    assert!(!first_a.await.unwrap().unwrap());

    match session.conversations().active().await {
        ActiveConversation::Active { id, messages, .. } => {
            assert_eq!(id, "a");
            assert!(messages.iter().all(|m| m.sender_id == "a"));
            assert_eq!(messages.len(), 1);
        }
        other => panic!("unexpected state: {:?}", other),
    }
}

#[tokio::test]
async fn test_cache_with_image_is_discarded_at_start() {
    let dir = TempDir::new().unwrap();
    let mut with_image = post("img", Duration::hours(1));
    with_image.image = Some("data:image/png;base64,AAAA".to_string());
    let posts = vec![post("text", Duration::hours(2)), with_image];
    std::fs::write(
        dir.path().join(CACHE_FILE_NAME),
        serde_json::to_string(&posts).unwrap(),
    )
    .unwrap();

    let config = SessionConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let session = Session::start(config, viewer(), Arc::new(FakeApi::offline())).await;

    assert!(!dir.path().join(CACHE_FILE_NAME).exists());
    assert!(session.feed().items().await.is_empty());
    assert!(PostCache::new(dir.path()).load().is_empty());
}

#[tokio::test]
async fn test_logout_leaves_no_listeners() {
    let mut session =
        Session::start(SessionConfig::default(), viewer(), Arc::new(FakeApi::offline())).await;
    assert_eq!(session.bus().total_listeners(), 3);

    session.logout().await;
    assert_eq!(session.bus().total_listeners(), 0);

    // events published after logout go nowhere
    let delivered = session.bus().publish(klians_core::RealtimeEvent::NewPost(post(
        "late",
        Duration::minutes(1),
    )));
    assert_eq!(delivered, 0);
}
