//! Feed identifiers

use serde::{Deserialize, Serialize};

/// Which feed a timeline shows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "uri")]
pub enum FeedId {
    /// The home "Following" timeline
    #[default]
    Following,
    /// A custom feed generator (`app.bsky.feed.generator` record URI)
    Generator(String),
    /// A list feed (`app.bsky.graph.list` record URI)
    List(String),
}

impl FeedId {
    /// Key used for the post cache and the persisted scroll anchor
    pub fn cache_key(&self) -> String {
        match self {
            Self::Following => "following".to_string(),
            Self::Generator(uri) => format!("feed:{uri}"),
            Self::List(uri) => format!("list:{uri}"),
        }
    }

    /// Get the display name
    pub fn name(&self) -> &str {
        match self {
            Self::Following => "Following",
            Self::Generator(uri) | Self::List(uri) => uri.rsplit('/').next().unwrap_or(uri),
        }
    }

    /// Parse from string
    ///
    /// Accepts `following`/`home`, or an `at://` URI whose collection is a
    /// feed generator or a list.
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "following" | "home" | "timeline" => return Some(Self::Following),
            _ => {}
        }

        let rest = s.strip_prefix("at://")?;
        let mut parts = rest.split('/');
        let _authority = parts.next().filter(|a| !a.is_empty())?;
        let collection = parts.next()?;
        let _rkey = parts.next().filter(|r| !r.is_empty())?;

        match collection {
            "app.bsky.feed.generator" => Some(Self::Generator(s.to_string())),
            "app.bsky.graph.list" => Some(Self::List(s.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
