//! Remote collaborators: paged feeds and post actions

pub mod bluesky;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FeedEntry, FeedId};

/// One page of a feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    /// Entries in server order
    pub entries: Vec<FeedEntry>,
    /// Continuation for the next (older) page; `None` at end of feed
    pub cursor: Option<String>,
}

impl FeedPage {
    /// Create a page
    pub const fn new(entries: Vec<FeedEntry>, cursor: Option<String>) -> Self {
        Self { entries, cursor }
    }
}

/// A paged, server-ordered feed.
///
/// Nothing is stable between two calls: posts may shift, appear or vanish
/// between pages. Calling twice with the same cursor must be safe.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch one page of `feed`, starting at `cursor` (newest page if `None`)
    async fn fetch_feed(&self, feed: &FeedId, limit: usize, cursor: Option<&str>)
    -> Result<FeedPage>;
}

/// Engagement calls (like / repost and their inverses)
#[async_trait]
pub trait PostActions: Send + Sync {
    /// Like a post, returning the like record URI
    async fn like_post(&self, uri: &str, cid: &str) -> Result<String>;

    /// Delete a like record
    async fn unlike_post(&self, like_uri: &str) -> Result<()>;

    /// Repost a post, returning the repost record URI
    async fn repost_post(&self, uri: &str, cid: &str) -> Result<String>;

    /// Delete a repost record
    async fn unrepost_post(&self, repost_uri: &str) -> Result<()>;
}
