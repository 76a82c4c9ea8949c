//! Post model (AT Protocol `app.bsky.feed.defs#postView`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post as seen by the current viewer at fetch time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// `at://` URI, the post's identity
    pub uri: String,
    /// Content hash, needed to like or repost
    pub cid: Option<String>,
    /// Author of the post
    pub author: Author,
    /// Post text
    pub text: String,
    /// When the post was created (falls back to indexing time)
    pub created_at: DateTime<Utc>,
    /// Number of likes
    pub like_count: u32,
    /// Number of reposts
    pub repost_count: u32,
    /// Number of replies
    pub reply_count: u32,
    /// Number of quote posts
    pub quote_count: u32,
    /// The current user's own relations to this post
    #[serde(default)]
    pub viewer: ViewerState,
    /// Content labels attached to the post or its author
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Media attachments (URLs)
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
}

/// Post author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Decentralized identifier
    pub did: String,
    /// Handle (e.g. user.bsky.social)
    pub handle: String,
    /// Display name
    pub display_name: Option<String>,
    /// Avatar URL
    pub avatar: Option<String>,
}

impl Author {
    /// Display name if set, handle otherwise
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.handle)
    }
}

/// Viewer state for a post: URIs of the viewer's like/repost records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerState {
    /// URI of the like record if liked by viewer
    pub like: Option<String>,
    /// URI of the repost record if reposted by viewer
    pub repost: Option<String>,
}

/// A moderation label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Label value (e.g. "porn", "!hide")
    pub val: String,
    /// DID of the labeler that applied it
    pub src: Option<String>,
}

impl Label {
    /// Create a label with no source
    pub fn new(val: &str) -> Self {
        Self {
            val: val.to_string(),
            src: None,
        }
    }
}

/// Media attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Media URL
    pub url: String,
    /// Preview/thumbnail URL
    pub preview_url: Option<String>,
    /// Media type
    pub media_type: MediaType,
    /// Alt text description
    pub alt_text: Option<String>,
}

/// Media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Image (JPEG, PNG, GIF, WebP)
    Image,
    /// Video
    Video,
    /// Unknown or unsupported media type
    Unknown,
}

impl Post {
    /// Create an empty post with the given URI and timestamp
    pub fn new(uri: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            uri: uri.to_string(),
            cid: None,
            author: Author {
                did: String::new(),
                handle: String::new(),
                display_name: None,
                avatar: None,
            },
            text: String::new(),
            created_at,
            like_count: 0,
            repost_count: 0,
            reply_count: 0,
            quote_count: 0,
            viewer: ViewerState::default(),
            labels: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Record key (last path segment of the URI)
    pub fn rkey(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or(&self.uri)
    }

    /// Link to the post on bsky.app
    pub fn web_url(&self) -> String {
        let who = if self.author.handle.is_empty() {
            &self.author.did
        } else {
            &self.author.handle
        };
        format!("https://bsky.app/profile/{}/post/{}", who, self.rkey())
    }

    /// Get a short preview of the content (for list display)
    pub fn preview(&self, max_len: usize) -> String {
        let content = self.text.replace('\n', " ");
        if content.chars().count() <= max_len {
            content
        } else {
            let cut: String = content.chars().take(max_len.saturating_sub(3)).collect();
            format!("{cut}...")
        }
    }

    /// Get relative time string (e.g., "5m", "2h", "3d")
    pub fn relative_time(&self) -> String {
        let now = Utc::now();
        let duration = now.signed_duration_since(self.created_at);

        if duration.num_seconds() < 60 {
            format!("{}s", duration.num_seconds().max(0))
        } else if duration.num_minutes() < 60 {
            format!("{}m", duration.num_minutes())
        } else if duration.num_hours() < 24 {
            format!("{}h", duration.num_hours())
        } else if duration.num_days() < 7 {
            format!("{}d", duration.num_days())
        } else {
            self.created_at.format("%b %d").to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let mut post = Post::new("at://did:plc:a/app.bsky.feed.post/1", Utc::now());
        post.text = "héllo wörld, this is long".to_string();
        assert_eq!(post.preview(8), "héllo...");
        assert_eq!(post.preview(100), "héllo wörld, this is long");
    }

    #[test]
    fn test_web_url_uses_handle() {
        let mut post = Post::new("at://did:plc:abc/app.bsky.feed.post/3kxyz", Utc::now());
        post.author.handle = "alice.bsky.social".into();
        assert_eq!(
            post.web_url(),
            "https://bsky.app/profile/alice.bsky.social/post/3kxyz"
        );
    }
}
