//! Deduplication and merge of feed entries
//!
//! Pure functions over entry collections. Identity is always the post URI,
//! never [`FeedEntry::display_id`].

use std::collections::HashSet;

use crate::models::FeedEntry;
use crate::moderation::{ModerationSettings, apply_moderation};

/// Result of committing pending entries into the displayed timeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    /// New displayed timeline, sorted newest first
    pub displayed: Vec<FeedEntry>,
    /// URIs dropped from pending as duplicates
    pub dropped: Vec<String>,
}

/// URI set of any number of entry slices
pub fn uri_set<'a>(slices: &[&'a [FeedEntry]]) -> HashSet<&'a str> {
    slices
        .iter()
        .flat_map(|entries| entries.iter().map(FeedEntry::uri))
        .collect()
}

/// Stable sort, newest first. Equal timestamps keep their relative order.
pub fn sort_newest_first(entries: &mut [FeedEntry]) {
    entries.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

/// Keep the first occurrence of every URI, preserving order
pub fn dedup_by_uri(entries: Vec<FeedEntry>) -> Vec<FeedEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.uri().to_string()))
        .collect()
}

/// Dedup then sort newest first
pub fn dedup_sorted(entries: Vec<FeedEntry>) -> Vec<FeedEntry> {
    let mut entries = dedup_by_uri(entries);
    sort_newest_first(&mut entries);
    entries
}

/// Stage a freshly fetched batch as pending.
///
/// Candidates already displayed or pending are dropped, as are repeats
/// inside the batch (first wins). Survivors are moderated and prepended to
/// `pending`; sorting happens at commit time.
pub fn merge_new_batch(
    candidates: Vec<FeedEntry>,
    displayed: &[FeedEntry],
    pending: Vec<FeedEntry>,
    moderation: &ModerationSettings,
) -> Vec<FeedEntry> {
    let mut existing: HashSet<String> = uri_set(&[displayed, &pending[..]])
        .into_iter()
        .map(str::to_string)
        .collect();

    let fresh: Vec<FeedEntry> = candidates
        .into_iter()
        .filter(|e| existing.insert(e.uri().to_string()))
        .collect();

    let mut merged = apply_moderation(fresh, moderation);
    merged.extend(pending);
    merged
}

/// Fold pending entries into the displayed timeline.
///
/// Pending is deduped against itself and against `displayed` (another path
/// such as a manual refresh may have inserted the same post meanwhile).
/// Every URI removed that way is reported in [`Commit::dropped`] so unseen
/// tracking can forget it.
pub fn commit_pending(displayed: Vec<FeedEntry>, pending: Vec<FeedEntry>) -> Commit {
    if pending.is_empty() {
        return Commit {
            displayed,
            dropped: Vec::new(),
        };
    }

    let mut taken: HashSet<String> = displayed.iter().map(|e| e.uri().to_string()).collect();
    let mut dropped = Vec::new();
    let mut merged = Vec::with_capacity(pending.len() + displayed.len());

    for entry in pending {
        if taken.insert(entry.uri().to_string()) {
            merged.push(entry);
        } else {
            dropped.push(entry.post.uri);
        }
    }

    merged.extend(displayed);
    sort_newest_first(&mut merged);

    Commit {
        displayed: merged,
        dropped,
    }
}

/// Append an older page below the displayed timeline.
///
/// Returns the number of entries actually added.
pub fn append_older(
    displayed: &mut Vec<FeedEntry>,
    pending: &[FeedEntry],
    page: Vec<FeedEntry>,
    moderation: &ModerationSettings,
) -> usize {
    let mut existing: HashSet<String> = uri_set(&[&displayed[..], pending])
        .into_iter()
        .map(str::to_string)
        .collect();

    let fresh: Vec<FeedEntry> = page
        .into_iter()
        .filter(|e| existing.insert(e.uri().to_string()))
        .collect();
    let fresh = apply_moderation(fresh, moderation);
    let added = fresh.len();

    displayed.extend(fresh);
    sort_newest_first(displayed);
    added
}
