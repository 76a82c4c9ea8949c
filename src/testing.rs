//! Test fixtures: entry builders and scripted collaborators

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::api::{FeedPage, FeedSource, PostActions};
use crate::error::{Error, Result};
use crate::models::{FeedEntry, FeedId, Post};

/// Entry with a cid, created `secs` after the epoch
pub fn entry(uri: &str, secs: i64) -> FeedEntry {
    let mut post = Post::new(uri, Utc.timestamp_opt(secs, 0).unwrap());
    post.cid = Some(format!("cid-{uri}"));
    FeedEntry::new(post)
}

/// URIs in order
pub fn uris(entries: &[FeedEntry]) -> Vec<&str> {
    entries.iter().map(FeedEntry::uri).collect()
}

/// `count` entries named `{prefix}{i}`, newest first, starting at `newest`
pub fn page_entries(prefix: &str, count: usize, newest: i64) -> Vec<FeedEntry> {
    (0..count)
        .map(|i| entry(&format!("{prefix}{i}"), newest - i as i64))
        .collect()
}

/// Feed source serving pages keyed by cursor
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<Option<String>, FeedPage>>,
    failures: Mutex<VecDeque<bool>>,
    fail_always: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain pages with cursors `c1`, `c2`, ... The last page has no cursor.
    pub fn with_pages(pages: Vec<Vec<FeedEntry>>) -> Self {
        let source = Self::new();
        source.set_pages(pages);
        source
    }

    /// Replace the whole feed with chained pages
    pub fn set_pages(&self, pages: Vec<Vec<FeedEntry>>) {
        let count = pages.len();
        let mut map = self.pages.lock().unwrap();
        map.clear();
        for (i, entries) in pages.into_iter().enumerate() {
            let key = (i > 0).then(|| format!("c{i}"));
            let next = (i + 1 < count).then(|| format!("c{}", i + 1));
            map.insert(key, FeedPage::new(entries, next));
        }
    }

    /// Serve `page` for `cursor`
    pub fn set_page(&self, cursor: Option<&str>, page: FeedPage) {
        self.pages
            .lock()
            .unwrap()
            .insert(cursor.map(str::to_string), page);
    }

    /// The next `n` calls fail
    pub fn fail_next(&self, n: usize) {
        self.failures.lock().unwrap().extend(std::iter::repeat_n(true, n));
    }

    /// Fail on the call after `skip` successful ones
    pub fn fail_after(&self, skip: usize) {
        let mut failures = self.failures.lock().unwrap();
        failures.extend(std::iter::repeat_n(false, skip));
        failures.push_back(true);
    }

    /// Every call fails
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Every call sleeps this long first
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Number of fetches so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cursors requested so far, in order
    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch_feed(&self, _feed: &FeedId, _limit: usize, cursor: Option<&str>) -> Result<FeedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().unwrap().push(cursor.map(str::to_string));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self.failures.lock().unwrap().pop_front().unwrap_or(false);
        if fail || self.fail_always.load(Ordering::SeqCst) {
            return Err(Error::Network("connection reset".into()));
        }

        let key = cursor.map(str::to_string);
        Ok(self.pages.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }
}

/// Post actions that record calls and can be told to fail
#[derive(Default)]
pub struct FakeActions {
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    counter: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl FakeActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Calls so far, e.g. `like:at://x`
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn call(&self, what: String) -> Result<()> {
        self.log.lock().unwrap().push(what);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Api {
                endpoint: "com.atproto.repo.createRecord".into(),
                status: 500,
                message: "boom".into(),
            });
        }
        Ok(())
    }

    fn record_uri(&self, collection: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("at://did:plc:me/{collection}/r{n}")
    }
}

#[async_trait]
impl PostActions for FakeActions {
    async fn like_post(&self, uri: &str, _cid: &str) -> Result<String> {
        self.call(format!("like:{uri}")).await?;
        Ok(self.record_uri("app.bsky.feed.like"))
    }

    async fn unlike_post(&self, like_uri: &str) -> Result<()> {
        self.call(format!("unlike:{like_uri}")).await
    }

    async fn repost_post(&self, uri: &str, _cid: &str) -> Result<String> {
        self.call(format!("repost:{uri}")).await?;
        Ok(self.record_uri("app.bsky.feed.repost"))
    }

    async fn unrepost_post(&self, repost_uri: &str) -> Result<()> {
        self.call(format!("unrepost:{repost_uri}")).await
    }
}
