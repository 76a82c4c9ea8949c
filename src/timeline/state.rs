//! Timeline state owned by the engine

use std::collections::HashSet;

use serde::Serialize;

use crate::models::{FeedEntry, ScrollAnchor};
use crate::moderation::ModerationSettings;

use super::merge;

/// Operation a surfaced error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    Load,
    Refresh,
    LoadMore,
    Like,
    Repost,
}

/// User-visible error tied to the operation that raised it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopedError {
    pub scope: ErrorScope,
    pub message: String,
}

impl ScopedError {
    pub fn new(scope: ErrorScope, error: &crate::Error) -> Self {
        Self {
            scope,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ScopedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = match self.scope {
            ErrorScope::Load => "load",
            ErrorScope::Refresh => "refresh",
            ErrorScope::LoadMore => "load more",
            ErrorScope::Like => "like",
            ErrorScope::Repost => "repost",
        };
        write!(f, "{scope} failed: {}", self.message)
    }
}

/// Tracks which newly arrived posts the user has not looked at yet.
///
/// Process-local. Both sets are emptied as soon as nothing is unseen, so
/// long sessions don't accumulate URIs.
#[derive(Debug, Clone, Default)]
pub struct UnseenTracker {
    new_uris: HashSet<String>,
    seen_uris: HashSet<String>,
}

impl UnseenTracker {
    /// Record newly arrived posts
    pub fn mark_new<I, S>(&mut self, uris: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.new_uris.extend(uris.into_iter().map(Into::into));
        self.prune();
    }

    /// Record posts the user has looked at. Only new posts are remembered.
    pub fn mark_seen<'a, I>(&mut self, uris: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for uri in uris {
            if self.new_uris.contains(uri) {
                self.seen_uris.insert(uri.to_string());
            }
        }
        self.prune();
    }

    /// Stop tracking posts (e.g. dropped as duplicates at commit)
    pub fn forget<'a, I>(&mut self, uris: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for uri in uris {
            self.new_uris.remove(uri);
            self.seen_uris.remove(uri);
        }
        self.prune();
    }

    /// Number of new posts not yet seen
    pub fn unseen_count(&self) -> usize {
        self.new_uris
            .iter()
            .filter(|uri| !self.seen_uris.contains(*uri))
            .count()
    }

    /// Whether a post is new and unseen
    pub fn is_unseen(&self, uri: &str) -> bool {
        self.new_uris.contains(uri) && !self.seen_uris.contains(uri)
    }

    /// Whether both sets are empty
    pub fn is_empty(&self) -> bool {
        self.new_uris.is_empty() && self.seen_uris.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.new_uris.clear();
        self.seen_uris.clear();
    }

    fn prune(&mut self) {
        if self.unseen_count() == 0 {
            self.clear();
        }
    }
}

/// The single source of truth for one timeline view
#[derive(Debug, Clone, Default)]
pub struct TimelineState {
    /// Visible timeline: unique by URI, newest first
    pub displayed: Vec<FeedEntry>,
    /// Fetched but not yet inserted: unique, disjoint from `displayed`
    pub pending: Vec<FeedEntry>,
    /// Continuation for older posts
    pub cursor: Option<String>,
    /// Last viewed post
    pub scroll_anchor: Option<ScrollAnchor>,
    /// Index of the top visible row, as last reported by the shell
    pub visible_index: Option<usize>,
    /// New/seen bookkeeping
    pub unseen: UnseenTracker,
}

impl TimelineState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear down everything
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Number of new posts the user hasn't seen
    pub fn unseen_count(&self) -> usize {
        self.unseen.unseen_count()
    }

    /// Whether the user is close enough to the top for new posts to be
    /// inserted without disturbing them. An unreported position counts as top.
    pub fn is_at_top(&self, threshold: usize) -> bool {
        self.visible_index.is_none_or(|index| index < threshold)
    }

    /// Stage a fetched batch as pending. Returns how many entries were added.
    pub fn stage_batch(&mut self, candidates: Vec<FeedEntry>, moderation: &ModerationSettings) -> usize {
        let before = self.pending.len();
        let pending = std::mem::take(&mut self.pending);
        self.pending = merge::merge_new_batch(candidates, &self.displayed, pending, moderation);

        let added = self.pending.len() - before;
        self.unseen
            .mark_new(self.pending[..added].iter().map(|e| e.uri().to_string()));
        added
    }

    /// Insert all pending entries. Returns how many were actually inserted.
    pub fn commit_pending(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let before = self.displayed.len();
        let displayed = std::mem::take(&mut self.displayed);
        let pending = std::mem::take(&mut self.pending);
        let commit = merge::commit_pending(displayed, pending);

        self.unseen.forget(commit.dropped.iter().map(String::as_str));
        self.displayed = commit.displayed;
        self.shift_visible_index(self.displayed.len() - before);
        self.displayed.len() - before
    }

    /// Replace the timeline with a recovered or cached one.
    ///
    /// `newer` becomes pending and counts as unseen.
    pub fn restore(&mut self, displayed: Vec<FeedEntry>, newer: Vec<FeedEntry>) {
        let displayed = merge::dedup_sorted(displayed);
        let shown = merge::uri_set(&[&displayed[..]]);
        let newer: Vec<FeedEntry> = merge::dedup_sorted(newer)
            .into_iter()
            .filter(|e| !shown.contains(e.uri()))
            .collect();

        self.unseen.clear();
        self.unseen
            .mark_new(newer.iter().map(|e| e.uri().to_string()));
        self.displayed = displayed;
        self.pending = newer;
        self.visible_index = None;
    }

    /// Append an older page. Returns how many entries were added.
    pub fn append_older(&mut self, page: Vec<FeedEntry>, moderation: &ModerationSettings) -> usize {
        merge::append_older(&mut self.displayed, &self.pending, page, moderation)
    }

    /// Mark posts as seen
    pub fn mark_seen<'a, I>(&mut self, uris: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.unseen.mark_seen(uris);
    }

    /// Displayed entry by post URI
    pub fn displayed_entry_mut(&mut self, uri: &str) -> Option<&mut FeedEntry> {
        self.displayed.iter_mut().find(|e| e.uri() == uri)
    }

    /// Inserting rows above the viewport pushes the top visible row down
    fn shift_visible_index(&mut self, inserted: usize) {
        if let Some(index) = self.visible_index.as_mut() {
            *index += inserted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, uris};

    #[test]
    fn test_tracker_prunes_when_everything_is_seen() {
        let mut tracker = UnseenTracker::default();
        tracker.mark_new(["a", "b"]);
        assert_eq!(tracker.unseen_count(), 2);

        tracker.mark_seen(["a", "zzz"]);
        assert_eq!(tracker.unseen_count(), 1);
        assert!(!tracker.is_empty());

        tracker.mark_seen(["b"]);
        assert_eq!(tracker.unseen_count(), 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tracker_forget_prunes() {
        let mut tracker = UnseenTracker::default();
        tracker.mark_new(["a"]);
        tracker.forget(["a"]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_stage_and_commit_track_unseen() {
        let settings = ModerationSettings::default();
        let mut state = TimelineState::new();
        state.displayed = vec![entry("A", 100), entry("B", 90)];

        assert_eq!(state.stage_batch(vec![entry("B", 90), entry("C", 110)], &settings), 1);
        assert_eq!(state.unseen_count(), 1);

        assert_eq!(state.commit_pending(), 1);
        assert_eq!(uris(&state.displayed), vec!["C", "A", "B"]);
        assert!(state.pending.is_empty());
        // Inserted posts stay unseen until the user looks at them
        assert_eq!(state.unseen_count(), 1);

        state.mark_seen(["C"]);
        assert_eq!(state.unseen_count(), 0);
    }

    #[test]
    fn test_commit_forgets_dropped_uris() {
        let mut state = TimelineState::new();
        state.displayed = vec![entry("A", 100)];
        // A racing refresh already displayed "A" after it was staged
        state.pending = vec![entry("N", 120), entry("A", 100)];
        state.unseen.mark_new(["N", "A"]);

        assert_eq!(state.commit_pending(), 1);
        assert_eq!(state.unseen_count(), 1);
        assert!(state.unseen.is_unseen("N"));
        assert!(!state.unseen.is_unseen("A"));
    }

    #[test]
    fn test_commit_shifts_visible_index() {
        let mut state = TimelineState::new();
        state.displayed = vec![entry("A", 100)];
        state.visible_index = Some(1);
        state.pending = vec![entry("N", 120), entry("M", 110)];

        state.commit_pending();
        assert_eq!(state.visible_index, Some(3));
        assert!(!state.is_at_top(3));
    }

    #[test]
    fn test_restore_keeps_pending_disjoint() {
        let mut state = TimelineState::new();
        state.restore(
            vec![entry("B", 90), entry("A", 100)],
            vec![entry("A", 100), entry("C", 120), entry("C", 120)],
        );
        assert_eq!(uris(&state.displayed), vec!["A", "B"]);
        assert_eq!(uris(&state.pending), vec!["C"]);
        assert_eq!(state.unseen_count(), 1);
    }

    #[test]
    fn test_is_at_top() {
        let mut state = TimelineState::new();
        assert!(state.is_at_top(3));
        state.visible_index = Some(2);
        assert!(state.is_at_top(3));
        state.visible_index = Some(3);
        assert!(!state.is_at_top(3));
    }
}
