//! Presentation view models
//!
//! Plain structs a renderer consumes. Everything here is stateless and
//! computed from domain records plus the current time; nothing is stored
//! back.

use crate::models::{Comment, Conversation, FeedItem, Message, MessageKind, SharedPost, UserSummary};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

const UNKNOWN_AUTHOR: &str = "Unknown Author";
const UNKNOWN_HANDLE: &str = "unknown";
const NO_MESSAGES: &str = "No messages yet";

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn replace_all(text: String, regex: Option<&Regex>, replacement: &str) -> String {
    match regex {
        Some(regex) => regex.replace_all(&text, replacement).into_owned(),
        None => text,
    }
}

/// Escape the five HTML-significant characters
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// Render message text: escape, then `**bold**`, `*italic*`, `__underline__`
///
/// ```rust
/// use klians_core::render::markdown_to_html;
///
/// assert_eq!(markdown_to_html("**hi** <b>"), "<strong>hi</strong> &lt;b&gt;");
/// ```
pub fn markdown_to_html(text: &str) -> String {
    static BOLD: OnceLock<Option<Regex>> = OnceLock::new();
    static ITALIC: OnceLock<Option<Regex>> = OnceLock::new();
    static UNDERLINE: OnceLock<Option<Regex>> = OnceLock::new();

    let html = escape_html(text);
    let html = replace_all(html, pattern(&BOLD, r"\*\*(.*?)\*\*"), "<strong>$1</strong>");
    let html = replace_all(html, pattern(&ITALIC, r"\*(.*?)\*"), "<em>$1</em>");
    replace_all(html, pattern(&UNDERLINE, r"__(.*?)__"), "<u>$1</u>")
}

/// [`markdown_to_html`] plus `#hashtag` links, for shared post bodies
pub fn markdown_to_html_with_tags(text: &str) -> String {
    static HASHTAG: OnceLock<Option<Regex>> = OnceLock::new();

    replace_all(
        markdown_to_html(text),
        pattern(&HASHTAG, r"(#\w+)"),
        r##"<a href="#" class="hashtag">$1</a>"##,
    )
}

/// Relative time label used under comments and posts
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    let days = seconds as f64 / 86_400.0;

    if days > 7.0 {
        return then.format("%B %-d").to_string();
    }
    if days > 1.0 {
        return format!("{}d ago", days.floor() as i64);
    }
    let hours = seconds / 3600;
    if hours > 1 {
        return format!("{}h ago", hours);
    }
    let minutes = seconds / 60;
    if minutes > 1 {
        return format!("{}m ago", minutes);
    }
    "Just now".to_string()
}

/// Clock label of a message bubble
pub fn clock_label(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%H:%M").to_string()).unwrap_or_default()
}

/// Avatar source; blank strings mean no picture
pub fn avatar_src(src: Option<&str>) -> Option<String> {
    src.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// One entry of the rendered home feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntryView {
    pub item: FeedItem,
    pub is_pinned: bool,
    pub time_label: String,
}

impl FeedEntryView {
    pub fn new(item: FeedItem, is_pinned: bool, now: DateTime<Utc>) -> Self {
        let time_label = time_ago(item.created_at(), now);
        Self {
            item,
            is_pinned,
            time_label,
        }
    }
}

/// Shared post card inside a message bubble
#[derive(Debug, Clone, PartialEq)]
pub struct SharedPostView {
    pub post_id: String,
    pub author_name: String,
    /// Handle without the leading `@`
    pub author_handle: String,
    pub author_avatar: Option<String>,
    /// Present only when the post has non-blank text
    pub content_html: Option<String>,
    pub image: Option<String>,
    /// Optional note the sharer wrote alongside the post
    pub note: Option<String>,
}

impl SharedPostView {
    pub fn new(post: &SharedPost, note: Option<&str>) -> Self {
        let author = post.author.as_ref();
        let author_name = author
            .map(|a| a.name.trim())
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_AUTHOR)
            .to_string();
        let author_handle = author
            .and_then(|a| a.email.as_deref())
            .map(crate::models::username_from_email)
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| UNKNOWN_HANDLE.to_string());

        Self {
            post_id: post.id.clone(),
            author_name,
            author_handle,
            author_avatar: avatar_src(author.and_then(|a| a.avatar.as_deref())),
            content_html: post
                .content
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(markdown_to_html_with_tags),
            image: avatar_src(post.image.as_deref()),
            note: note.filter(|n| !n.trim().is_empty()).map(str::to_string),
        }
    }
}

/// Body of a message bubble
#[derive(Debug, Clone, PartialEq)]
pub enum BubbleBody {
    Text { html: String },
    SharedPost(SharedPostView),
}

/// One message bubble in the active thread
#[derive(Debug, Clone, PartialEq)]
pub struct MessageBubbleView {
    pub message_id: String,
    pub is_own: bool,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub time_label: String,
    pub body: BubbleBody,
}

impl MessageBubbleView {
    pub fn new(message: &Message, viewer_id: &str) -> Self {
        let body = match (message.kind, &message.shared_post) {
            (MessageKind::SharedPost, Some(post)) => {
                BubbleBody::SharedPost(SharedPostView::new(post, message.text.as_deref()))
            }
            _ => BubbleBody::Text {
                html: markdown_to_html(message.text.as_deref().unwrap_or_default()),
            },
        };
        let time = message.display_time();

        Self {
            message_id: message.id.clone(),
            is_own: message.sender_id == viewer_id,
            sender_name: message.sender.as_ref().map(|s| s.name.clone()),
            sender_avatar: avatar_src(message.sender.as_ref().and_then(|s| s.avatar.as_deref())),
            time,
            time_label: clock_label(time),
            body,
        }
    }
}

/// Render a whole thread
pub fn render_thread(messages: &[Message], viewer_id: &str) -> Vec<MessageBubbleView> {
    messages
        .iter()
        .map(|m| MessageBubbleView::new(m, viewer_id))
        .collect()
}

/// Row of the conversation list
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRowView {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub preview: String,
    pub time_label: String,
    pub unread: bool,
    pub active: bool,
}

impl ConversationRowView {
    pub fn new(conversation: &Conversation, active_id: Option<&str>, now: DateTime<Utc>) -> Self {
        let last = conversation.last_message.as_ref();
        Self {
            id: conversation.id.clone(),
            name: conversation.user.name.clone(),
            avatar: avatar_src(conversation.user.avatar.as_deref()),
            preview: last
                .map(|m| m.content.clone())
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| NO_MESSAGES.to_string()),
            time_label: last
                .and_then(|m| m.created_at)
                .map(|t| time_ago(t, now))
                .unwrap_or_default(),
            unread: conversation.unread,
            active: active_id == Some(conversation.id.as_str()),
        }
    }
}

/// Comment under a post
#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub id: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub text: String,
    pub time_label: String,
    pub like_count: u32,
    pub liked: bool,
}

impl CommentView {
    /// A comment without a time renders as just posted
    pub fn new(comment: &Comment, now: DateTime<Utc>) -> Self {
        let author: Option<&UserSummary> = comment.author.as_ref();
        Self {
            id: comment.id.clone(),
            author_name: author
                .map(|a| a.name.clone())
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            author_avatar: avatar_src(author.and_then(|a| a.avatar.as_deref())),
            text: comment.text.clone(),
            time_label: time_ago(comment.created_at.unwrap_or(now), now),
            like_count: comment.like_count,
            liked: comment.liked_by_viewer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LastMessage;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
    }

    fn text_message(sender: &str, text: &str) -> Message {
        Message {
            id: "m1".to_string(),
            sender_id: sender.to_string(),
            sender: Some(UserSummary::new(sender, "Ada")),
            recipient_id: None,
            kind: MessageKind::Text,
            text: Some(text.to_string()),
            shared_post: None,
            sent_at: None,
            created_at: Some(now()),
        }
    }

    #[test]
    fn test_markdown_escapes_first() {
        assert_eq!(
            markdown_to_html(r#"<script>"x" & 'y'</script>"#),
            "&lt;script&gt;&quot;x&quot; &amp; &#039;y&#039;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_markdown_emphasis() {
        assert_eq!(
            markdown_to_html("**bold** *it* __under__"),
            "<strong>bold</strong> <em>it</em> <u>under</u>"
        );
        assert_eq!(markdown_to_html("a * b"), "a * b");
    }

    #[test]
    fn test_hashtags_linked() {
        assert_eq!(
            markdown_to_html_with_tags("exam #maths"),
            r##"exam <a href="#" class="hashtag">#maths</a>"##
        );
    }

    #[test]
    fn test_time_ago_buckets() {
        let now = now();
        assert_eq!(time_ago(now - Duration::seconds(30), now), "Just now");
        assert_eq!(time_ago(now - Duration::seconds(90), now), "Just now");
        assert_eq!(time_ago(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(time_ago(now - Duration::hours(3), now), "3h ago");
        assert_eq!(time_ago(now - Duration::hours(50), now), "2d ago");
        assert_eq!(time_ago(now - Duration::days(10), now), "March 10");
    }

    #[test]
    fn test_avatar_src_blank() {
        assert_eq!(avatar_src(Some("  ")), None);
        assert_eq!(avatar_src(None), None);
        assert_eq!(avatar_src(Some("a.png")), Some("a.png".to_string()));
    }

    #[test]
    fn test_text_bubble() {
        let view = MessageBubbleView::new(&text_message("me", "*hey*"), "me");
        assert!(view.is_own);
        assert_eq!(view.time_label, "12:00");
        assert_eq!(
            view.body,
            BubbleBody::Text {
                html: "<em>hey</em>".to_string()
            }
        );
    }

    #[test]
    fn test_shared_post_fallbacks() {
        let mut message = text_message("u2", "look at this");
        message.kind = MessageKind::SharedPost;
        message.shared_post = Some(SharedPost {
            id: "p1".to_string(),
            author: None,
            content: Some("   ".to_string()),
            image: Some("img.png".to_string()),
            created_at: None,
        });

        let view = MessageBubbleView::new(&message, "me");
        assert!(!view.is_own);
        match view.body {
            BubbleBody::SharedPost(card) => {
                assert_eq!(card.author_name, "Unknown Author");
                assert_eq!(card.author_handle, "unknown");
                assert!(card.content_html.is_none());
                assert_eq!(card.image.as_deref(), Some("img.png"));
                assert_eq!(card.note.as_deref(), Some("look at this"));
            }
            other => panic!("expected shared post, got {:?}", other),
        }
    }

    #[test]
    fn test_conversation_row() {
        let conversation = Conversation {
            id: "u7".to_string(),
            user: UserSummary::new("u7", "Dee"),
            last_message: None,
            unread: true,
        };
        let row = ConversationRowView::new(&conversation, Some("u7"), now());
        assert_eq!(row.preview, "No messages yet");
        assert!(row.active && row.unread);
        assert!(row.time_label.is_empty());

        let conversation = Conversation {
            last_message: Some(LastMessage {
                content: "see you".to_string(),
                created_at: Some(now() - Duration::minutes(10)),
            }),
            ..conversation
        };
        let row = ConversationRowView::new(&conversation, None, now());
        assert_eq!(row.preview, "see you");
        assert_eq!(row.time_label, "10m ago");
        assert!(!row.active);
    }
}
