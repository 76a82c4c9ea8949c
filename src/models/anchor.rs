//! Persisted scroll position

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FeedEntry;

/// The post the user was last viewing in a feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollAnchor {
    /// URI of the anchored post
    pub uri: String,
    /// Creation time of the anchored post, used when the URI can't be found
    pub timestamp: Option<DateTime<Utc>>,
}

impl ScrollAnchor {
    /// Create an anchor
    pub fn new(uri: &str, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            uri: uri.to_string(),
            timestamp,
        }
    }

    /// Anchor on a feed entry
    pub fn from_entry(entry: &FeedEntry) -> Self {
        Self::new(entry.uri(), Some(entry.created_at()))
    }
}
