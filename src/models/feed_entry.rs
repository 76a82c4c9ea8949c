//! Feed entries: a post plus the context it appeared in

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Author, Post};
use crate::moderation::ModerationVerdict;

/// One row of a feed (`app.bsky.feed.defs#feedViewPost`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// The post itself
    pub post: Post,
    /// Why the post is in the feed (repost, pin)
    #[serde(default)]
    pub reason: Option<FeedReason>,
    /// Thread context if the post is a reply
    #[serde(default)]
    pub reply: Option<ReplyContext>,
    /// Verdict stamped by the moderation filter
    #[serde(default)]
    pub moderation: ModerationVerdict,
}

/// Reason a post appears in a feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeedReason {
    /// Reposted by someone the viewer follows
    Repost {
        /// Who reposted it
        by: Author,
        /// When the repost was indexed
        indexed_at: DateTime<Utc>,
    },
    /// Pinned by the author
    Pin,
}

/// Root and parent of a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    /// Thread root (absent if blocked or deleted)
    pub root: Option<Post>,
    /// Direct parent (absent if blocked or deleted)
    pub parent: Option<Post>,
}

impl FeedEntry {
    /// Wrap a post with no reason or reply context
    pub fn new(post: Post) -> Self {
        Self {
            post,
            reason: None,
            reply: None,
            moderation: ModerationVerdict::Allow,
        }
    }

    /// Identity used for every dedup and set-membership operation
    pub fn uri(&self) -> &str {
        &self.post.uri
    }

    /// Creation time of the underlying post (the sort key)
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.post.created_at
    }

    /// Row id for list rendering.
    ///
    /// Encodes repost attribution, so the same post reposted by two accounts
    /// yields two ids. Not stable across fetches; never use it for dedup.
    pub fn display_id(&self) -> String {
        match &self.reason {
            Some(FeedReason::Repost { by, .. }) => format!("{}#repost:{}", self.post.uri, by.did),
            Some(FeedReason::Pin) => format!("{}#pin", self.post.uri),
            None => self.post.uri.clone(),
        }
    }

    /// Name of the reposter, if this entry is a repost
    pub fn reposted_by(&self) -> Option<&str> {
        match &self.reason {
            Some(FeedReason::Repost { by, .. }) => Some(by.name()),
            _ => None,
        }
    }
}
