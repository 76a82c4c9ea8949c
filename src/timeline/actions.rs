//! Optimistic like / repost updates

use crate::error::{Error, Result};
use crate::models::Post;

use super::state::ErrorScope;

/// Placeholder relation while a create is in flight
pub const PENDING_RELATION: &str = "at://pending";

/// Kind of engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engagement {
    Like,
    Repost,
}

impl Engagement {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Repost => "repost",
        }
    }

    /// Scope of errors raised by this action
    pub const fn scope(self) -> ErrorScope {
        match self {
            Self::Like => ErrorScope::Like,
            Self::Repost => ErrorScope::Repost,
        }
    }
}

/// Viewer relation and counter before an optimistic flip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementSnapshot {
    pub relation: Option<String>,
    pub count: u32,
}

/// Remote call needed to match the optimistic state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleIntent {
    Create { cid: String },
    Delete { relation: String },
}

fn fields_mut(post: &mut Post, kind: Engagement) -> (&mut Option<String>, &mut u32) {
    match kind {
        Engagement::Like => (&mut post.viewer.like, &mut post.like_count),
        Engagement::Repost => (&mut post.viewer.repost, &mut post.repost_count),
    }
}

/// Current relation and counter
pub fn snapshot(post: &Post, kind: Engagement) -> EngagementSnapshot {
    match kind {
        Engagement::Like => EngagementSnapshot {
            relation: post.viewer.like.clone(),
            count: post.like_count,
        },
        Engagement::Repost => EngagementSnapshot {
            relation: post.viewer.repost.clone(),
            count: post.repost_count,
        },
    }
}

/// Flip the relation in place and return what the server must be told.
///
/// On error the post is left untouched.
pub fn apply_optimistic(post: &mut Post, kind: Engagement) -> Result<(EngagementSnapshot, ToggleIntent)> {
    let before = snapshot(post, kind);

    let intent = match &before.relation {
        Some(relation) if relation == PENDING_RELATION => {
            return Err(Error::InvalidResponse(format!(
                "{} on {} not confirmed yet",
                kind.name(),
                post.uri
            )));
        }
        Some(relation) => ToggleIntent::Delete {
            relation: relation.clone(),
        },
        None => ToggleIntent::Create {
            cid: post
                .cid
                .clone()
                .ok_or_else(|| Error::MissingCid(post.uri.clone()))?,
        },
    };

    let (relation, count) = fields_mut(post, kind);
    match intent {
        ToggleIntent::Create { .. } => {
            *relation = Some(PENDING_RELATION.to_string());
            *count = count.saturating_add(1);
        }
        ToggleIntent::Delete { .. } => {
            *relation = None;
            *count = count.saturating_sub(1);
        }
    }

    Ok((before, intent))
}

/// Swap the placeholder for the record URI the server returned
pub fn confirm_created(post: &mut Post, kind: Engagement, record_uri: String) {
    let (relation, _) = fields_mut(post, kind);
    if relation.as_deref() == Some(PENDING_RELATION) {
        *relation = Some(record_uri);
    }
}

/// Put back the exact pre-toggle state
pub fn restore(post: &mut Post, kind: Engagement, snapshot: EngagementSnapshot) {
    let (relation, count) = fields_mut(post, kind);
    *relation = snapshot.relation;
    *count = snapshot.count;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entry;

    #[test]
    fn test_like_then_confirm() {
        let mut post = entry("at://a", 1).post;
        post.like_count = 4;

        let (before, intent) = apply_optimistic(&mut post, Engagement::Like).unwrap();
        assert_eq!(intent, ToggleIntent::Create { cid: "cid-at://a".into() });
        assert_eq!(post.viewer.like.as_deref(), Some(PENDING_RELATION));
        assert_eq!(post.like_count, 5);
        assert_eq!(before.count, 4);

        confirm_created(&mut post, Engagement::Like, "at://me/like/1".into());
        assert_eq!(post.viewer.like.as_deref(), Some("at://me/like/1"));
    }

    #[test]
    fn test_unrepost_saturates_and_restores() {
        let mut post = entry("at://a", 1).post;
        post.viewer.repost = Some("at://me/repost/9".into());
        post.repost_count = 0;

        let (before, intent) = apply_optimistic(&mut post, Engagement::Repost).unwrap();
        assert_eq!(
            intent,
            ToggleIntent::Delete {
                relation: "at://me/repost/9".into()
            }
        );
        assert_eq!(post.viewer.repost, None);
        assert_eq!(post.repost_count, 0);

        restore(&mut post, Engagement::Repost, before);
        assert_eq!(post.viewer.repost.as_deref(), Some("at://me/repost/9"));
        assert_eq!(post.repost_count, 0);
    }

    #[test]
    fn test_missing_cid_leaves_post_untouched() {
        let mut post = entry("at://a", 1).post;
        post.cid = None;
        post.like_count = 2;

        let err = apply_optimistic(&mut post, Engagement::Like).unwrap_err();
        assert!(matches!(err, Error::MissingCid(uri) if uri == "at://a"));
        assert_eq!(post.viewer.like, None);
        assert_eq!(post.like_count, 2);
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut post = entry("at://a", 1).post;
        apply_optimistic(&mut post, Engagement::Like).unwrap();
        assert_eq!(post.viewer.repost, None);
        assert_eq!(post.repost_count, 0);
    }
}
