//! Scroll anchor recovery
//!
//! On load the timeline tries to reopen where the user left off:
//!
//! ```text
//!   no anchor ──────────────────────────────▶ newest page only
//!   anchor URI found at (page p, index i) ──▶ display page[p][i..] + one more page
//!                                             everything newer becomes pending
//!   not found, anchor has a timestamp ──────▶ same split at the closest post,
//!                                             anchor replaced by that post
//!   not found, no timestamp ────────────────▶ newest page only, anchor cleared
//! ```
//!
//! The search is a pure step machine ([`AnchorSearch`]) so the paging logic
//! can be tested without a runtime; [`recover`] drives it against a
//! [`FeedSource`].


use crate::api::{FeedPage, FeedSource};
use crate::error::{Error, Result};
use crate::models::{FeedEntry, FeedId, ScrollAnchor};

use super::merge;

/// Search budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// Entries requested per page
    pub page_size: usize,
    /// Pages fetched while looking for the anchor
    pub max_pages: usize,
    /// Posts fetched while looking for the anchor
    pub max_posts: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages: 10,
            max_posts: 500,
        }
    }
}

/// What should happen to the persisted anchor after a recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorUpdate {
    /// Nothing to persist
    Untouched,
    /// The anchor was found as-is
    Keep(ScrollAnchor),
    /// The anchor was approximated by the closest post
    Replace(ScrollAnchor),
    /// The anchor could not be placed at all
    Clear,
}

/// Result of a recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Initial timeline, newest first
    pub displayed: Vec<FeedEntry>,
    /// Posts newer than the anchor, to be staged as pending
    pub newer: Vec<FeedEntry>,
    /// Continuation below `displayed`
    pub cursor: Option<String>,
    /// Persisted anchor update
    pub anchor: AnchorUpdate,
}

/// Next thing the driver should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStep {
    /// Fetch the page at this cursor
    Fetch(Option<String>),
    /// Search finished
    Done(RecoveryOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Split {
    page: usize,
    index: usize,
    anchor: AnchorUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Seeking,
    Buffering(Split),
    Finished,
}

/// Anchor search over successive feed pages
#[derive(Debug, Clone)]
pub struct AnchorSearch {
    anchor: Option<ScrollAnchor>,
    limits: SearchLimits,
    pages: Vec<FeedPage>,
    posts_seen: usize,
    phase: Phase,
}

impl AnchorSearch {
    pub fn new(anchor: Option<ScrollAnchor>, limits: SearchLimits) -> Self {
        Self {
            anchor,
            limits,
            pages: Vec::new(),
            posts_seen: 0,
            phase: Phase::Seeking,
        }
    }

    /// First step: always the newest page
    pub const fn start(&self) -> SearchStep {
        SearchStep::Fetch(None)
    }

    /// Feed the page requested by the previous step
    pub fn on_page(&mut self, page: FeedPage) -> SearchStep {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Seeking => self.seek(page),
            Phase::Buffering(split) => {
                self.pages.push(page);
                SearchStep::Done(self.finish(split))
            }
            Phase::Finished => SearchStep::Done(self.newest_only(AnchorUpdate::Untouched)),
        }
    }

    /// Report that the requested page failed.
    ///
    /// Failing on the newest page fails the whole load. A failure further
    /// down ends the search early and the persisted anchor is left alone,
    /// since the search never ran to completion.
    pub fn on_error(&mut self, error: Error) -> Result<SearchStep> {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Seeking if self.pages.is_empty() => Err(error),
            Phase::Seeking => {
                tracing::debug!(pages = self.pages.len(), "Anchor search interrupted: {error}");
                Ok(self.fall_back(false))
            }
            Phase::Buffering(split) => {
                tracing::debug!("Buffer page failed, showing anchor page only: {error}");
                Ok(SearchStep::Done(self.finish(split)))
            }
            Phase::Finished => Err(error),
        }
    }

    fn seek(&mut self, page: FeedPage) -> SearchStep {
        self.posts_seen += page.entries.len();
        self.pages.push(page);
        let current = self.pages.len() - 1;

        let Some(anchor) = self.anchor.clone() else {
            return SearchStep::Done(self.newest_only(AnchorUpdate::Untouched));
        };

        if let Some(index) = self.pages[current]
            .entries
            .iter()
            .position(|e| e.uri() == anchor.uri)
        {
            return self.split_at(current, index, AnchorUpdate::Keep(anchor));
        }

        let exhausted = self.pages.len() >= self.limits.max_pages
            || self.posts_seen >= self.limits.max_posts;
        match self.pages[current].cursor.clone() {
            Some(cursor) if !exhausted => SearchStep::Fetch(Some(cursor)),
            _ => self.fall_back(true),
        }
    }

    /// Anchor not found. With a timestamp, split at the closest post.
    fn fall_back(&mut self, complete: bool) -> SearchStep {
        let timestamp = self.anchor.as_ref().and_then(|a| a.timestamp);

        let closest = timestamp.and_then(|ts| {
            self.pages
                .iter()
                .enumerate()
                .flat_map(|(p, page)| page.entries.iter().enumerate().map(move |(i, e)| (p, i, e)))
                .min_by_key(|(_, _, e)| (e.created_at() - ts).abs())
                .map(|(p, i, e)| (p, i, ScrollAnchor::from_entry(e)))
        });

        match closest {
            Some((page, index, replacement)) => {
                let update = if complete {
                    AnchorUpdate::Replace(replacement)
                } else {
                    AnchorUpdate::Untouched
                };
                self.split_at(page, index, update)
            }
            None => {
                let update = if complete {
                    AnchorUpdate::Clear
                } else {
                    AnchorUpdate::Untouched
                };
                SearchStep::Done(self.newest_only(update))
            }
        }
    }

    /// Split at `(page, index)`, fetching one buffer page if none was
    /// fetched after it yet
    fn split_at(&mut self, page: usize, index: usize, anchor: AnchorUpdate) -> SearchStep {
        let split = Split {
            page,
            index,
            anchor,
        };

        if page + 1 < self.pages.len() {
            return SearchStep::Done(self.finish(split));
        }

        match self.pages[page].cursor.clone() {
            Some(cursor) => {
                self.phase = Phase::Buffering(split);
                SearchStep::Fetch(Some(cursor))
            }
            None => SearchStep::Done(self.finish(split)),
        }
    }

    fn finish(&mut self, split: Split) -> RecoveryOutcome {
        self.phase = Phase::Finished;
        let mut pages = std::mem::take(&mut self.pages).into_iter();

        let mut newer: Vec<FeedEntry> = pages
            .by_ref()
            .take(split.page)
            .flat_map(|p| p.entries)
            .collect();

        let Some(mut anchor_page) = pages.next() else {
            return RecoveryOutcome {
                displayed: Vec::new(),
                newer: merge::dedup_sorted(newer),
                cursor: None,
                anchor: split.anchor,
            };
        };

        let index = split.index.min(anchor_page.entries.len());
        let mut displayed = anchor_page.entries.split_off(index);
        newer.append(&mut anchor_page.entries);

        let cursor = match pages.next() {
            Some(buffer) => {
                displayed.extend(buffer.entries);
                buffer.cursor
            }
            None => anchor_page.cursor,
        };

        let displayed = merge::dedup_sorted(displayed);
        let shown = merge::uri_set(&[&displayed[..]]);
        let newer: Vec<FeedEntry> = merge::dedup_sorted(newer)
            .into_iter()
            .filter(|e| !shown.contains(e.uri()))
            .collect();

        RecoveryOutcome {
            displayed,
            newer,
            cursor,
            anchor: split.anchor,
        }
    }

    fn newest_only(&mut self, anchor: AnchorUpdate) -> RecoveryOutcome {
        self.phase = Phase::Finished;
        let newest = std::mem::take(&mut self.pages)
            .into_iter()
            .next()
            .unwrap_or_default();

        RecoveryOutcome {
            displayed: merge::dedup_sorted(newest.entries),
            newer: Vec::new(),
            cursor: newest.cursor,
            anchor,
        }
    }
}

/// Run an anchor search against `source`
pub async fn recover(
    source: &dyn FeedSource,
    feed: &FeedId,
    anchor: Option<ScrollAnchor>,
    limits: SearchLimits,
) -> Result<RecoveryOutcome> {
    let mut search = AnchorSearch::new(anchor, limits);
    let mut step = search.start();

    loop {
        match step {
            SearchStep::Done(outcome) => return Ok(outcome),
            SearchStep::Fetch(cursor) => {
                step = match source.fetch_feed(feed, limits.page_size, cursor.as_deref()).await {
                    Ok(page) => search.on_page(page),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        tracing::warn!(cursor = ?cursor, "Feed page failed during recovery: {e}");
                        search.on_error(e)?
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedSource, entry, page_entries, uris};
    use chrono::{TimeZone, Utc};

    fn limits() -> SearchLimits {
        SearchLimits {
            page_size: 10,
            max_pages: 10,
            max_posts: 500,
        }
    }

    /// Three pages of ten, strictly descending: p0_* at 1000.., p1_* at 900.., p2_* at 800..
    fn three_pages() -> Vec<Vec<FeedEntry>> {
        vec![
            page_entries("p0_", 10, 1000),
            page_entries("p1_", 10, 900),
            page_entries("p2_", 10, 800),
        ]
    }

    fn anchor(uri: &str, secs: Option<i64>) -> ScrollAnchor {
        ScrollAnchor::new(uri, secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()))
    }

    #[test]
    fn test_no_anchor_shows_newest_page() {
        let mut search = AnchorSearch::new(None, limits());
        assert_eq!(search.start(), SearchStep::Fetch(None));

        let step = search.on_page(FeedPage::new(
            vec![entry("old", 1), entry("new", 2)],
            Some("c1".into()),
        ));
        let SearchStep::Done(outcome) = step else {
            panic!("expected done");
        };
        assert_eq!(uris(&outcome.displayed), vec!["new", "old"]);
        assert!(outcome.newer.is_empty());
        assert_eq!(outcome.cursor.as_deref(), Some("c1"));
        assert_eq!(outcome.anchor, AnchorUpdate::Untouched);
    }

    #[test]
    fn test_anchor_on_first_page_fetches_buffer() {
        let pages = three_pages();
        let mut search = AnchorSearch::new(Some(anchor("p0_3", None)), limits());

        let step = search.on_page(FeedPage::new(pages[0].clone(), Some("c1".into())));
        assert_eq!(step, SearchStep::Fetch(Some("c1".into())));

        let step = search.on_page(FeedPage::new(pages[1].clone(), Some("c2".into())));
        let SearchStep::Done(outcome) = step else {
            panic!("expected done");
        };
        assert_eq!(outcome.displayed.len(), 17);
        assert_eq!(outcome.displayed[0].uri(), "p0_3");
        assert_eq!(uris(&outcome.newer), vec!["p0_0", "p0_1", "p0_2"]);
        assert_eq!(outcome.cursor.as_deref(), Some("c2"));
        assert_eq!(outcome.anchor, AnchorUpdate::Keep(anchor("p0_3", None)));
    }

    #[tokio::test]
    async fn test_anchor_round_trip_on_second_page() {
        let pages = three_pages();
        let source = ScriptedSource::with_pages(pages.clone());

        let outcome = recover(&source, &FeedId::Following, Some(anchor("p1_5", Some(895))), limits())
            .await
            .unwrap();

        // displayed = page 2 from the anchor on, plus the whole third page
        let mut expected: Vec<&str> = uris(&pages[1][5..]);
        expected.extend(uris(&pages[2]));
        assert_eq!(uris(&outcome.displayed), expected);

        // pending = page 1 and the head of page 2, newest first
        let mut newer: Vec<&str> = uris(&pages[0]);
        newer.extend(uris(&pages[1][..5]));
        assert_eq!(uris(&outcome.newer), newer);

        assert_eq!(outcome.cursor, None);
        assert_eq!(source.calls(), 3);
        assert!(matches!(outcome.anchor, AnchorUpdate::Keep(_)));
    }

    #[tokio::test]
    async fn test_missing_anchor_with_timestamp_uses_closest_post() {
        let source = ScriptedSource::with_pages(three_pages());

        // Deleted post that sat between p1_2 (898) and p1_3 (897)
        let outcome = recover(&source, &FeedId::Following, Some(anchor("gone", Some(897))), limits())
            .await
            .unwrap();

        assert_eq!(outcome.displayed[0].uri(), "p1_3");
        assert_eq!(outcome.newer.len(), 13);
        // Every page was searched, the third also serves as buffer
        assert_eq!(source.calls(), 3);
        let AnchorUpdate::Replace(replacement) = outcome.anchor else {
            panic!("expected replacement");
        };
        assert_eq!(replacement.uri, "p1_3");
        assert_eq!(replacement.timestamp, Some(Utc.timestamp_opt(897, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_missing_anchor_without_timestamp_clears() {
        let pages: Vec<Vec<FeedEntry>> = (0..12)
            .map(|p| page_entries(&format!("p{p}_"), 50, 10_000 - p * 100))
            .collect();
        let first: Vec<String> = pages[0].iter().map(|e| e.uri().to_string()).collect();
        let source = ScriptedSource::with_pages(pages);

        let outcome = recover(
            &source,
            &FeedId::Following,
            Some(anchor("X", None)),
            SearchLimits::default(),
        )
        .await
        .unwrap();

        // Budget: 10 pages of 50
        assert_eq!(source.calls(), 10);
        assert_eq!(
            outcome.displayed.iter().map(FeedEntry::uri).collect::<Vec<_>>(),
            first
        );
        assert!(outcome.newer.is_empty());
        assert_eq!(outcome.cursor.as_deref(), Some("c1"));
        assert_eq!(outcome.anchor, AnchorUpdate::Clear);
    }

    #[tokio::test]
    async fn test_first_page_failure_fails_recovery() {
        let source = ScriptedSource::with_pages(three_pages());
        source.fail_next(1);

        let err = recover(&source, &FeedId::Following, Some(anchor("p1_5", None)), limits())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_interrupted_search_leaves_anchor_alone() {
        let source = ScriptedSource::with_pages(three_pages());
        source.fail_after(1);

        let outcome = recover(&source, &FeedId::Following, Some(anchor("p2_9", None)), limits())
            .await
            .unwrap();

        assert_eq!(outcome.anchor, AnchorUpdate::Untouched);
        assert_eq!(outcome.displayed.len(), 10);
        assert_eq!(outcome.displayed[0].uri(), "p0_0");
        assert_eq!(outcome.cursor.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_buffer_failure_shows_anchor_page_only() {
        let source = ScriptedSource::with_pages(three_pages());
        // Anchor is found on the first page, the buffer page fails
        source.fail_after(1);

        let outcome = recover(&source, &FeedId::Following, Some(anchor("p0_4", None)), limits())
            .await
            .unwrap();

        assert_eq!(uris(&outcome.displayed), uris(&three_pages()[0][4..]));
        assert_eq!(outcome.cursor.as_deref(), Some("c1"));
        assert!(matches!(outcome.anchor, AnchorUpdate::Keep(_)));
    }

    #[test]
    fn test_anchor_at_end_of_feed() {
        let mut search = AnchorSearch::new(Some(anchor("b", None)), limits());
        let step = search.on_page(FeedPage::new(vec![entry("a", 2), entry("b", 1)], None));
        let SearchStep::Done(outcome) = step else {
            panic!("expected done");
        };
        assert_eq!(uris(&outcome.displayed), vec!["b"]);
        assert_eq!(uris(&outcome.newer), vec!["a"]);
        assert_eq!(outcome.cursor, None);
    }
}
