//! Realtime Channel
//!
//! Live push events from the Klians server, delivered over one WebSocket
//! per session.
//!
//! ## Frames
//!
//! Every frame is a JSON text message:
//!
//! ```json
//! { "event": "new-post", "data": { "_id": "p1", "content": "..." } }
//! ```
//!
//! **Inbound**: `new-post`, `announcement-created`, `new-message`
//! **Outbound**: `new-announcement`
//!
//! There is no acknowledgement or redelivery. A frame lost while the
//! socket is down is gone.
//!
//! ## Listeners
//!
//! Inbound events fan out through an [`EventBus`]. Each listener is a
//! [`Subscription`] handle owned by whoever registered it; dropping the
//! handle unregisters the listener, so registration and teardown always
//! come in pairs.
//!
//! ```rust
//! use klians_core::realtime::{EventBus, EventKind};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(EventKind::NewPost);
//! assert_eq!(bus.listener_count(EventKind::NewPost), 1);
//! drop(subscription);
//! assert_eq!(bus.listener_count(EventKind::NewPost), 0);
//! ```

use crate::models::wire::{WireAnnouncement, WireMessage, WirePost};
use crate::models::{Announcement, Message, Post};
use crate::{ClientError, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

pub const EVENT_NEW_POST: &str = "new-post";
pub const EVENT_ANNOUNCEMENT_CREATED: &str = "announcement-created";
pub const EVENT_NEW_MESSAGE: &str = "new-message";
pub const EVENT_NEW_ANNOUNCEMENT: &str = "new-announcement";

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Wire frame of the realtime channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ClientError::invalid_payload(format!("bad realtime frame: {}", e)))
    }
}

/// Kinds of inbound events a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewPost,
    AnnouncementCreated,
    NewMessage,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            EVENT_NEW_POST => Some(EventKind::NewPost),
            EVENT_ANNOUNCEMENT_CREATED => Some(EventKind::AnnouncementCreated),
            EVENT_NEW_MESSAGE => Some(EventKind::NewMessage),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NewPost => EVENT_NEW_POST,
            EventKind::AnnouncementCreated => EVENT_ANNOUNCEMENT_CREATED,
            EventKind::NewMessage => EVENT_NEW_MESSAGE,
        }
    }
}

/// Decoded inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NewPost(Post),
    AnnouncementCreated(Announcement),
    NewMessage(Message),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::NewPost(_) => EventKind::NewPost,
            RealtimeEvent::AnnouncementCreated(_) => EventKind::AnnouncementCreated,
            RealtimeEvent::NewMessage(_) => EventKind::NewMessage,
        }
    }

    /// Decode a frame; `Ok(None)` for event names this client does not handle
    pub fn decode(frame: Frame) -> Result<Option<Self>> {
        let Some(kind) = EventKind::from_name(&frame.event) else {
            return Ok(None);
        };

        let event = match kind {
            EventKind::NewPost => {
                let wire: WirePost = serde_json::from_value(frame.data)?;
                RealtimeEvent::NewPost(wire.into_post(None)?)
            }
            EventKind::AnnouncementCreated => {
                let wire: WireAnnouncement = serde_json::from_value(frame.data)?;
                RealtimeEvent::AnnouncementCreated(wire.into_announcement()?)
            }
            EventKind::NewMessage => {
                let wire: WireMessage = serde_json::from_value(frame.data)?;
                RealtimeEvent::NewMessage(wire.into_message()?)
            }
        };
        Ok(Some(event))
    }
}

struct Listener {
    kind: EventKind,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fan-out of inbound events to subscription handles
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Listener { kind, tx });
        debug!("Subscribed listener {} to {}", id, kind.name());

        Subscription {
            id,
            kind,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live listener of its kind
    ///
    /// Returns the number of listeners that received it.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        let kind = event.kind();
        let mut inner = lock(&self.inner);
        let mut delivered = 0;
        inner.listeners.retain(|_, listener| {
            if listener.kind != kind {
                return true;
            }
            if listener.tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });

        if delivered == 0 {
            debug!("No listeners for {}", kind.name());
        }
        delivered
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.inner)
            .listeners
            .values()
            .filter(|l| l.kind == kind)
            .count()
    }

    pub fn total_listeners(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

/// Owned listener registration; unregisters on drop
pub struct Subscription {
    id: u64,
    kind: EventKind,
    rx: mpsc::UnboundedReceiver<RealtimeEvent>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.try_recv().ok()
    }

    /// Explicitly unregister; same as dropping the handle
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            lock(&inner).listeners.remove(&self.id);
            debug!("Unsubscribed listener {} from {}", self.id, self.kind.name());
        }
    }
}

/// Outbound side of the realtime channel
pub trait Emitter: Send + Sync {
    fn emit(&self, event: &str, data: Value) -> Result<()>;
}

/// Reconnection schedule with exponential backoff
#[derive(Debug, Clone)]
pub struct ReconnectionStrategy {
    pub attempt: u32,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub current_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectionStrategy {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_ATTEMPTS)
    }
}

impl ReconnectionStrategy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            initial_delay: INITIAL_RECONNECT_DELAY,
            current_delay: INITIAL_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.initial_delay;
    }

    /// Delay before the next attempt, doubling each time; `None` when exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = std::cmp::min(self.current_delay * 2, self.max_delay);
        Some(delay)
    }
}

/// Realtime channel settings
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket URL, e.g. `ws://localhost:5000/realtime`
    pub url: String,
    /// Bearer token appended as the `token` query parameter
    pub token: Option<String>,
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/realtime".to_string(),
            token: None,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_reconnect_delay: INITIAL_RECONNECT_DELAY,
        }
    }
}

impl RealtimeConfig {
    fn connect_url(&self) -> String {
        match &self.token {
            Some(token) if self.url.contains('?') => format!("{}&token={}", self.url, token),
            Some(token) => format!("{}?token={}", self.url, token),
            None => self.url.clone(),
        }
    }
}

enum PumpExit {
    Shutdown,
    Disconnected,
}

/// Live WebSocket connection feeding an [`EventBus`]
///
/// The connection runs in a background task that reconnects with
/// exponential backoff until [`RealtimeChannel::close`] is called or the
/// attempts are exhausted.
pub struct RealtimeChannel {
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    /// Start the connection task
    pub fn spawn(config: RealtimeConfig, bus: EventBus) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Self::run(config, bus, outbound_rx, shutdown_rx));

        Self {
            outbound,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(
        config: RealtimeConfig,
        bus: EventBus,
        mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut strategy = ReconnectionStrategy::new(config.max_reconnect_attempts);
        strategy.initial_delay = config.initial_reconnect_delay;
        strategy.reset();
        let url = config.connect_url();

        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            match connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    info!("Realtime channel connected to {}", config.url);
                    strategy.reset();
                    match Self::pump(stream, &bus, &mut outbound_rx, &mut shutdown_rx).await {
                        PumpExit::Shutdown => {
                            info!("Realtime channel closed");
                            return;
                        }
                        PumpExit::Disconnected => warn!("Realtime channel disconnected"),
                    }
                }
                Err(e) => warn!("Realtime connection to {} failed: {}", config.url, e),
            }

            let Some(delay) = strategy.next_delay() else {
                error!(
                    "Realtime channel giving up after {} attempts",
                    strategy.max_attempts
                );
                return;
            };
            debug!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay, strategy.attempt, strategy.max_attempts
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => return,
            }
        }
    }

    async fn pump<S>(
        stream: tokio_tungstenite::WebSocketStream<S>,
        bus: &EventBus,
        outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> PumpExit
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                incoming = source.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => dispatch_text(bus, text.as_str()),
                    Some(Ok(WsMessage::Close(_))) | None => return PumpExit::Disconnected,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime read error: {}", e);
                        return PumpExit::Disconnected;
                    }
                },
                outgoing = outbound_rx.recv() => match outgoing {
                    Some(frame) => {
                        let text = match frame.to_text() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Dropping unserialisable frame {}: {}", frame.event, e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                            warn!("Failed to emit {}: {}", frame.event, e);
                            return PumpExit::Disconnected;
                        }
                        debug!("Emitted {}", frame.event);
                    }
                    None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return PumpExit::Shutdown;
                    }
                },
                _ = shutdown_rx.changed() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return PumpExit::Shutdown;
                }
            }
        }
    }

    /// Stop the connection task and wait for it to finish
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.take_task();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Realtime task ended abnormally: {}", e);
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(task) => task.as_ref().is_some_and(|t| !t.is_finished()),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|t| !t.is_finished()),
        }
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Emitter for RealtimeChannel {
    fn emit(&self, event: &str, data: Value) -> Result<()> {
        self.outbound
            .send(Frame::new(event, data))
            .map_err(|_| ClientError::Cancelled("realtime channel closed".to_string()))
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.take_task() {
            task.abort();
        }
    }
}

/// Decode one text frame and publish it
///
/// Malformed frames and malformed payloads are logged and dropped.
pub fn dispatch_text(bus: &EventBus, text: &str) {
    let frame = match Frame::from_text(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Ignoring realtime frame: {}", e);
            return;
        }
    };
    let name = frame.event.clone();

    match RealtimeEvent::decode(frame) {
        Ok(Some(event)) => {
            bus.publish(event);
        }
        Ok(None) => debug!("Ignoring unhandled realtime event {}", name),
        Err(e) => warn!("Dropping malformed {} payload: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_frame(id: &str) -> String {
        json!({
            "event": "new-post",
            "data": {
                "_id": id,
                "user": { "_id": "u1", "name": "Ada" },
                "content": "hello",
                "createdAt": "2026-03-01T10:00:00Z"
            }
        })
        .to_string()
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::from_name("new-post"), Some(EventKind::NewPost));
        assert_eq!(
            EventKind::from_name("announcement-created"),
            Some(EventKind::AnnouncementCreated)
        );
        assert_eq!(EventKind::from_name("new-message"), Some(EventKind::NewMessage));
        assert_eq!(EventKind::from_name("typing"), None);
    }

    #[test]
    fn test_decode_unknown_event() {
        let frame = Frame::new("typing", json!({}));
        assert!(RealtimeEvent::decode(frame).unwrap().is_none());
    }

    #[test]
    fn test_decode_malformed_payload() {
        let frame = Frame::new("new-post", json!({ "content": "no id" }));
        assert!(RealtimeEvent::decode(frame).is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_listeners_only() {
        let bus = EventBus::new();
        let mut posts = bus.subscribe(EventKind::NewPost);
        let mut messages = bus.subscribe(EventKind::NewMessage);

        dispatch_text(&bus, &post_frame("p1"));

        match posts.recv().await {
            Some(RealtimeEvent::NewPost(post)) => assert_eq!(post.id, "p1"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(messages.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let a = bus.subscribe(EventKind::NewPost);
        let b = bus.subscribe(EventKind::NewPost);
        assert_eq!(bus.listener_count(EventKind::NewPost), 2);

        drop(a);
        assert_eq!(bus.listener_count(EventKind::NewPost), 1);

        b.unsubscribe();
        assert_eq!(bus.total_listeners(), 0);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventKind::NewPost);

        dispatch_text(&bus, "not json");
        dispatch_text(&bus, r#"{"event":"new-post","data":{"content":"x"}}"#);

        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_reconnection_backoff() {
        let mut strategy = ReconnectionStrategy::new(4);
        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(8)));
        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(16)));
        assert_eq!(strategy.next_delay(), None);

        strategy.reset();
        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut strategy = ReconnectionStrategy::new(10);
        let delays: Vec<_> = std::iter::from_fn(|| strategy.next_delay()).collect();
        assert_eq!(delays.len(), 10);
        assert!(delays.iter().all(|d| *d <= MAX_RECONNECT_DELAY));
        assert_eq!(*delays.last().unwrap(), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn test_connect_url_token() {
        let config = RealtimeConfig {
            token: Some("abc".to_string()),
            ..Default::default()
        };
        assert_eq!(config.connect_url(), "ws://localhost:5000/realtime?token=abc");
    }
}
