//! Timeline engine actor
//!
//! One task owns the [`TimelineState`]. Callers talk to it through a
//! cloneable [`TimelineHandle`]: commands go in over an mpsc channel, the
//! current view comes out through a `watch` snapshot and notable changes are
//! broadcast as [`TimelineEvent`]s.
//!
//! Network calls never run on the actor itself. They are spawned as tasks
//! that post their result back on an internal channel tagged with an
//! operation id. A result whose id no longer matches the in-flight slot
//! (superseded, stopped, torn down) is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{FeedPage, FeedSource, PostActions};
use crate::config::TimelineSettings;
use crate::db::PostCache;
use crate::error::{Error, Result};
use crate::models::{FeedEntry, FeedId, ScrollAnchor};
use crate::moderation::{ModerationSettings, apply_moderation};

use super::actions::{self, Engagement, EngagementSnapshot, ToggleIntent};
use super::anchor::{self, AnchorUpdate, RecoveryOutcome, SearchLimits};
use super::merge;
use super::scheduler::{self, RefreshTracker, SkipReason};
use super::state::{ErrorScope, ScopedError, TimelineState};

/// Read-only view of the timeline, republished after every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineSnapshot {
    pub feed: FeedId,
    /// Visible entries, newest first
    pub displayed: Vec<FeedEntry>,
    /// Entries waiting to be inserted
    pub pending_count: usize,
    /// New posts the user has not seen
    pub unseen_count: usize,
    /// Whether older posts can be loaded
    pub has_more: bool,
    pub scroll_anchor: Option<ScrollAnchor>,
    pub loading: bool,
    pub refreshing: bool,
    pub loading_more: bool,
    /// Last foreground or action error
    pub error: Option<ScopedError>,
    /// Background refresh error, shown only after repeated failures
    pub background_error: Option<String>,
    pub background_running: bool,
}

/// Notifications for the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    /// Initial load finished
    Loaded { displayed: usize },
    /// Posts are waiting to be inserted
    NewPostsAvailable { count: usize },
    /// Posts were inserted at the top without user action
    AutoInserted { count: usize },
    /// Manual refresh inserted this many posts
    Refreshed { new: usize },
    /// A foreground operation or action failed
    Error(ScopedError),
    /// Background refresh keeps failing
    BackgroundError(String),
}

/// Result of a background fetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Skipped(SkipReason),
    /// `new` entries were staged, `inserted` of them went straight in
    Merged { new: usize, inserted: usize },
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Load(Reply<()>),
    Refresh(Reply<usize>),
    LoadMore(Reply<usize>),
    FetchNewPosts(Reply<FetchOutcome>),
    InsertPending(Reply<usize>),
    MarkSeen(Vec<String>, Reply<()>),
    UpdateVisiblePosition(usize, Reply<()>),
    Toggle(String, Engagement, Reply<()>),
    StartBackground(Duration, Reply<()>),
    StopBackground(Reply<()>),
    DismissError(Reply<()>),
    Teardown(Reply<()>),
    Shutdown,
}

enum Internal {
    Recovered(u64, Result<RecoveryOutcome>),
    Refreshed(u64, Result<FeedPage>),
    LoadedMore(u64, Result<FeedPage>),
    Fetched(u64, Result<FeedPage>),
    Toggled(u64, Result<Option<String>>),
    Tick(u64),
}

struct Slot<R> {
    op: u64,
    task: JoinHandle<()>,
    reply: R,
}

impl<R> Slot<R> {
    fn abort(self) -> R {
        self.task.abort();
        self.reply
    }
}

enum Foreground {
    Load(Reply<()>),
    Refresh(Reply<usize>),
}

impl Foreground {
    fn cancel(self) {
        match self {
            Self::Load(reply) => {
                let _ = reply.send(Err(Error::Cancelled));
            }
            Self::Refresh(reply) => {
                let _ = reply.send(Err(Error::Cancelled));
            }
        }
    }
}

struct ToggleSlot {
    op: u64,
    task: JoinHandle<()>,
    before: EngagementSnapshot,
    reply: Reply<()>,
    queued: VecDeque<Reply<()>>,
}

struct Scheduler {
    token: CancellationToken,
    generation: u64,
}

/// Timeline engine for one feed. Configure with [`TimelineEngine::new`],
/// then [`spawn`](TimelineEngine::spawn) it.
pub struct TimelineEngine {
    feed: FeedId,
    settings: TimelineSettings,
    moderation: ModerationSettings,
    source: Arc<dyn FeedSource>,
    cache: Arc<dyn PostCache>,
    actions: Arc<dyn PostActions>,
}

impl TimelineEngine {
    pub fn new(
        feed: FeedId,
        settings: TimelineSettings,
        moderation: ModerationSettings,
        source: Arc<dyn FeedSource>,
        cache: Arc<dyn PostCache>,
        actions: Arc<dyn PostActions>,
    ) -> Self {
        Self {
            feed,
            settings,
            moderation,
            source,
            cache,
            actions,
        }
    }

    /// Start the actor on the current runtime
    pub fn spawn(self) -> TimelineHandle {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(TimelineSnapshot {
            feed: self.feed.clone(),
            ..TimelineSnapshot::default()
        });
        let (event_tx, _) = broadcast::channel(64);

        let tracker = RefreshTracker::new(
            self.settings.minimum_fetch_interval(),
            self.settings.max_consecutive_failures,
        );

        let actor = Actor {
            engine: self,
            state: TimelineState::new(),
            error: None,
            background_error: None,
            tracker,
            next_op: 0,
            foreground: None,
            load_more: None,
            background: None,
            toggles: HashMap::new(),
            scheduler: None,
            generation: 0,
            internal_tx,
            snapshot_tx,
            event_tx: event_tx.clone(),
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        TimelineHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            events: event_tx,
        }
    }
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct TimelineHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<TimelineSnapshot>,
    events: broadcast::Sender<TimelineEvent>,
}

impl TimelineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::EngineClosed)?;
        rx.await.map_err(|_| Error::EngineClosed)?
    }

    /// Paint from cache, then recover the saved scroll position
    pub async fn load(&self) -> Result<()> {
        self.request(Command::Load).await
    }

    /// Fetch the newest page and insert it. Returns the number inserted.
    pub async fn refresh(&self) -> Result<usize> {
        self.request(Command::Refresh).await
    }

    /// Append the next older page. Returns the number added.
    pub async fn load_more(&self) -> Result<usize> {
        self.request(Command::LoadMore).await
    }

    /// Run one background cycle now
    pub async fn fetch_new_posts(&self) -> Result<FetchOutcome> {
        self.request(Command::FetchNewPosts).await
    }

    /// Insert pending posts. Returns the number inserted.
    pub async fn insert_pending(&self) -> Result<usize> {
        self.request(Command::InsertPending).await
    }

    pub async fn mark_seen(&self, uris: Vec<String>) -> Result<()> {
        self.request(|reply| Command::MarkSeen(uris, reply)).await
    }

    /// Report the index of the top visible row
    pub async fn update_visible_position(&self, index: usize) -> Result<()> {
        self.request(|reply| Command::UpdateVisiblePosition(index, reply))
            .await
    }

    pub async fn toggle_like(&self, uri: impl Into<String>) -> Result<()> {
        let uri = uri.into();
        self.request(|reply| Command::Toggle(uri, Engagement::Like, reply))
            .await
    }

    pub async fn toggle_repost(&self, uri: impl Into<String>) -> Result<()> {
        let uri = uri.into();
        self.request(|reply| Command::Toggle(uri, Engagement::Repost, reply))
            .await
    }

    /// Start (or restart) background refresh
    pub async fn start_background(&self, interval: Duration) -> Result<()> {
        self.request(|reply| Command::StartBackground(interval, reply))
            .await
    }

    pub async fn stop_background(&self) -> Result<()> {
        self.request(Command::StopBackground).await
    }

    pub async fn dismiss_error(&self) -> Result<()> {
        self.request(Command::DismissError).await
    }

    /// Stop background work and clear all state
    pub async fn deactivate(&self) -> Result<()> {
        self.request(Command::Teardown).await
    }

    /// Same teardown as [`deactivate`](Self::deactivate), for the layer
    /// that owns account switching
    pub async fn on_account_switched(&self) -> Result<()> {
        tracing::info!("Account switched, resetting timeline");
        self.request(Command::Teardown).await
    }

    /// Stop the actor
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Current snapshot
    pub fn snapshot(&self) -> TimelineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot receiver, for shells that redraw on change
    pub fn watch(&self) -> watch::Receiver<TimelineSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEvent> {
        self.events.subscribe()
    }
}

struct Actor {
    engine: TimelineEngine,
    state: TimelineState,
    error: Option<ScopedError>,
    background_error: Option<String>,
    tracker: RefreshTracker,
    next_op: u64,
    foreground: Option<Slot<Foreground>>,
    load_more: Option<Slot<Reply<usize>>>,
    background: Option<Slot<Option<Reply<FetchOutcome>>>>,
    toggles: HashMap<(String, Engagement), ToggleSlot>,
    scheduler: Option<Scheduler>,
    generation: u64,
    internal_tx: mpsc::UnboundedSender<Internal>,
    snapshot_tx: watch::Sender<TimelineSnapshot>,
    event_tx: broadcast::Sender<TimelineEvent>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        tracing::info!(feed = %self.engine.feed, "Timeline engine started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(message) = internal.recv() => self.handle_internal(message).await,
            }
            self.publish();
        }

        self.teardown();
        self.publish();
        tracing::info!(feed = %self.engine.feed, "Timeline engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load(reply) => self.start_load(reply).await,
            Command::Refresh(reply) => self.start_refresh(reply),
            Command::LoadMore(reply) => self.start_load_more(reply),
            Command::FetchNewPosts(reply) => self.start_background_fetch(Some(reply)),
            Command::InsertPending(reply) => {
                let inserted = self.insert_pending().await;
                let _ = reply.send(Ok(inserted));
            }
            Command::MarkSeen(uris, reply) => {
                self.state.mark_seen(uris.iter().map(String::as_str));
                let _ = reply.send(Ok(()));
            }
            Command::UpdateVisiblePosition(index, reply) => {
                self.update_visible_position(index).await;
                let _ = reply.send(Ok(()));
            }
            Command::Toggle(uri, kind, reply) => self.request_toggle(uri, kind, reply),
            Command::StartBackground(interval, reply) => {
                self.start_scheduler(interval);
                let _ = reply.send(Ok(()));
            }
            Command::StopBackground(reply) => {
                self.stop_scheduler();
                let _ = reply.send(Ok(()));
            }
            Command::DismissError(reply) => {
                self.error = None;
                self.background_error = None;
                let _ = reply.send(Ok(()));
            }
            Command::Teardown(reply) => {
                self.teardown();
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Recovered(op, result) => self.finish_load(op, result).await,
            Internal::Refreshed(op, result) => self.finish_refresh(op, result).await,
            Internal::LoadedMore(op, result) => self.finish_load_more(op, result),
            Internal::Fetched(op, result) => self.finish_background_fetch(op, result).await,
            Internal::Toggled(op, result) => self.finish_toggle(op, result),
            Internal::Tick(generation) => {
                if self.scheduler.as_ref().is_some_and(|s| s.generation == generation) {
                    self.start_background_fetch(None);
                } else {
                    tracing::debug!(generation, "Ignoring tick from stopped scheduler");
                }
            }
        }
    }

    const fn next_op(&mut self) -> u64 {
        self.next_op += 1;
        self.next_op
    }

    fn cache_key(&self) -> String {
        self.engine.feed.cache_key()
    }

    fn emit(&self, event: TimelineEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn surface(&mut self, scope: ErrorScope, error: &Error) {
        let scoped = ScopedError::new(scope, error);
        self.emit(TimelineEvent::Error(scoped.clone()));
        self.error = Some(scoped);
    }

    fn spawn_fetch(
        &self,
        op: u64,
        cursor: Option<String>,
        wrap: fn(u64, Result<FeedPage>) -> Internal,
    ) -> JoinHandle<()> {
        let source = Arc::clone(&self.engine.source);
        let feed = self.engine.feed.clone();
        let limit = self.engine.settings.page_size;
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = source.fetch_feed(&feed, limit, cursor.as_deref()).await;
            let _ = tx.send(wrap(op, result));
        })
    }

    fn cancel_foreground(&mut self) {
        if let Some(slot) = self.foreground.take() {
            tracing::debug!(op = slot.op, "Superseding foreground load");
            slot.abort().cancel();
        }
    }

    fn cancel_load_more(&mut self) {
        if let Some(slot) = self.load_more.take() {
            let _ = slot.abort().send(Err(Error::Cancelled));
        }
    }

    // Load

    async fn start_load(&mut self, reply: Reply<()>) {
        self.cancel_foreground();
        self.cancel_load_more();
        let key = self.cache_key();

        if self.state.displayed.is_empty() {
            match self.engine.cache.load_cached_entries(&key).await {
                Ok(cached) if !cached.is_empty() => {
                    let cached = apply_moderation(merge::dedup_sorted(cached), &self.engine.moderation);
                    tracing::debug!(count = cached.len(), "Painting timeline from cache");
                    self.state.displayed = cached;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to read post cache: {e}"),
            }
        }

        let anchor = match self.state.scroll_anchor.clone() {
            Some(anchor) => Some(anchor),
            None => self
                .engine
                .cache
                .load_scroll_anchor(&key)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to read scroll anchor: {e}");
                    None
                }),
        };

        let op = self.next_op();
        let source = Arc::clone(&self.engine.source);
        let feed = self.engine.feed.clone();
        let limits = SearchLimits {
            page_size: self.engine.settings.page_size,
            max_pages: self.engine.settings.anchor_max_pages,
            max_posts: self.engine.settings.anchor_max_posts,
        };
        let tx = self.internal_tx.clone();

        let task = tokio::spawn(async move {
            let result = anchor::recover(source.as_ref(), &feed, anchor, limits).await;
            let _ = tx.send(Internal::Recovered(op, result));
        });
        self.foreground = Some(Slot {
            op,
            task,
            reply: Foreground::Load(reply),
        });
    }

    async fn finish_load(&mut self, op: u64, result: Result<RecoveryOutcome>) {
        let Some(Slot {
            reply: Foreground::Load(reply),
            ..
        }) = self.foreground.take_if(|s| s.op == op)
        else {
            tracing::debug!(op, "Discarding stale recovery result");
            return;
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::warn!("Timeline load failed: {e}");
                    self.surface(ErrorScope::Load, &e);
                }
                let _ = reply.send(Err(e));
                return;
            }
        };

        let moderation = &self.engine.moderation;
        let displayed = apply_moderation(outcome.displayed, moderation);
        let newer = apply_moderation(outcome.newer, moderation);
        self.state.restore(displayed, newer);
        self.state.cursor = outcome.cursor;
        self.error = None;

        tracing::info!(
            displayed = self.state.displayed.len(),
            pending = self.state.pending.len(),
            anchor = ?outcome.anchor,
            "Timeline loaded"
        );
        self.apply_anchor_update(outcome.anchor).await;
        self.persist_entries().await;

        self.emit(TimelineEvent::Loaded {
            displayed: self.state.displayed.len(),
        });
        if !self.state.pending.is_empty() {
            self.emit(TimelineEvent::NewPostsAvailable {
                count: self.state.pending.len(),
            });
        }
        let _ = reply.send(Ok(()));
    }

    async fn apply_anchor_update(&mut self, update: AnchorUpdate) {
        let key = self.cache_key();
        match update {
            AnchorUpdate::Untouched => {}
            AnchorUpdate::Keep(anchor) => self.state.scroll_anchor = Some(anchor),
            AnchorUpdate::Replace(anchor) => {
                if let Err(e) = self.engine.cache.save_scroll_anchor(&anchor, &key).await {
                    tracing::warn!("Failed to save scroll anchor: {e}");
                }
                self.state.scroll_anchor = Some(anchor);
            }
            AnchorUpdate::Clear => {
                if let Err(e) = self.engine.cache.clear_scroll_anchor(&key).await {
                    tracing::warn!("Failed to clear scroll anchor: {e}");
                }
                self.state.scroll_anchor = None;
            }
        }
    }

    async fn persist_entries(&self) {
        let entries = self.confirmed_entries();
        if let Err(e) = self.engine.cache.cache_entries(&entries, &self.cache_key()).await {
            tracing::warn!("Failed to cache posts: {e}");
        }
    }

    /// Displayed entries with in-flight toggles rolled back to what the
    /// server last confirmed
    fn confirmed_entries(&self) -> Vec<FeedEntry> {
        let mut entries = self.state.displayed.clone();
        for ((uri, kind), slot) in &self.toggles {
            if let Some(entry) = entries.iter_mut().find(|e| e.uri() == uri.as_str()) {
                actions::restore(&mut entry.post, *kind, slot.before.clone());
            }
        }
        entries
    }

    // Manual refresh

    fn start_refresh(&mut self, reply: Reply<usize>) {
        self.cancel_foreground();
        let op = self.next_op();
        let task = self.spawn_fetch(op, None, Internal::Refreshed);
        self.foreground = Some(Slot {
            op,
            task,
            reply: Foreground::Refresh(reply),
        });
    }

    async fn finish_refresh(&mut self, op: u64, result: Result<FeedPage>) {
        let Some(Slot {
            reply: Foreground::Refresh(reply),
            ..
        }) = self.foreground.take_if(|s| s.op == op)
        else {
            tracing::debug!(op, "Discarding stale refresh result");
            return;
        };

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::warn!("Refresh failed: {e}");
                    self.surface(ErrorScope::Refresh, &e);
                }
                let _ = reply.send(Err(e));
                return;
            }
        };

        let was_empty = self.state.displayed.is_empty();
        self.state.stage_batch(page.entries, &self.engine.moderation);
        let inserted = self.state.commit_pending();
        if was_empty {
            self.state.cursor = page.cursor;
        }
        self.error = None;

        tracing::debug!(inserted, "Refreshed timeline");
        self.persist_entries().await;
        self.emit(TimelineEvent::Refreshed { new: inserted });
        let _ = reply.send(Ok(inserted));
    }

    // Load more

    fn start_load_more(&mut self, reply: Reply<usize>) {
        if self.load_more.is_some() {
            tracing::debug!("Load more already in flight");
            let _ = reply.send(Ok(0));
            return;
        }
        let Some(cursor) = self.state.cursor.clone() else {
            let _ = reply.send(Ok(0));
            return;
        };

        let op = self.next_op();
        let task = self.spawn_fetch(op, Some(cursor), Internal::LoadedMore);
        self.load_more = Some(Slot { op, task, reply });
    }

    fn finish_load_more(&mut self, op: u64, result: Result<FeedPage>) {
        let Some(slot) = self.load_more.take_if(|s| s.op == op) else {
            tracing::debug!(op, "Discarding stale load-more result");
            return;
        };

        match result {
            Ok(page) => {
                let added = self.state.append_older(page.entries, &self.engine.moderation);
                self.state.cursor = page.cursor;
                tracing::debug!(added, "Loaded older posts");
                let _ = slot.reply.send(Ok(added));
            }
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::warn!("Load more failed: {e}");
                    self.surface(ErrorScope::LoadMore, &e);
                }
                let _ = slot.reply.send(Err(e));
            }
        }
    }

    // Background refresh

    fn start_scheduler(&mut self, interval: Duration) {
        self.stop_scheduler();
        let floor = self.engine.settings.minimum_fetch_interval();
        let interval = if interval < floor {
            tracing::debug!(?interval, "Refresh interval raised to {floor:?}");
            floor
        } else {
            interval
        };
        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        let tx = self.internal_tx.clone();

        scheduler::spawn(interval, token.clone(), move || {
            tx.send(Internal::Tick(generation)).is_ok()
        });
        self.scheduler = Some(Scheduler { token, generation });
    }

    fn stop_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.token.cancel();
        }
        if let Some(slot) = self.background.take() {
            tracing::debug!(op = slot.op, "Background fetch marked stale");
            if let Some(reply) = slot.abort() {
                let _ = reply.send(Err(Error::Cancelled));
            }
        }
    }

    fn start_background_fetch(&mut self, reply: Option<Reply<FetchOutcome>>) {
        let now = Instant::now();
        if let Err(reason) =
            self.tracker
                .admit(now, self.background.is_some(), self.foreground.is_some())
        {
            tracing::debug!("Skipping background fetch: {reason}");
            if let Some(reply) = reply {
                let _ = reply.send(Ok(FetchOutcome::Skipped(reason)));
            }
            return;
        }

        self.tracker.record_attempt(now);
        let op = self.next_op();
        let task = self.spawn_fetch(op, None, Internal::Fetched);
        self.background = Some(Slot { op, task, reply });
    }

    async fn finish_background_fetch(&mut self, op: u64, result: Result<FeedPage>) {
        let Some(slot) = self.background.take_if(|s| s.op == op) else {
            tracing::debug!(op, "Discarding stale background result");
            return;
        };

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                let surfaced = self.tracker.record_failure();
                tracing::warn!(
                    failures = self.tracker.consecutive_failures(),
                    "Background refresh failed: {e}"
                );
                if surfaced && !e.is_cancelled() {
                    let message = e.to_string();
                    self.emit(TimelineEvent::BackgroundError(message.clone()));
                    self.background_error = Some(message);
                }
                if let Some(reply) = slot.reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        self.tracker.record_success();
        self.background_error = None;
        let new = self.state.stage_batch(page.entries, &self.engine.moderation);

        let inserted = if !self.state.pending.is_empty()
            && self.state.is_at_top(self.engine.settings.auto_insert_threshold)
        {
            self.insert_pending().await
        } else {
            0
        };

        if inserted > 0 {
            self.emit(TimelineEvent::AutoInserted { count: inserted });
        } else if new > 0 {
            self.emit(TimelineEvent::NewPostsAvailable {
                count: self.state.pending.len(),
            });
        }
        if let Some(reply) = slot.reply {
            let _ = reply.send(Ok(FetchOutcome::Merged { new, inserted }));
        }
    }

    async fn insert_pending(&mut self) -> usize {
        let inserted = self.state.commit_pending();
        if inserted > 0 {
            self.persist_entries().await;
        }
        inserted
    }

    async fn update_visible_position(&mut self, index: usize) {
        self.state.visible_index = Some(index);

        let Some(top) = self.state.displayed.get(index) else {
            return;
        };
        if self
            .state
            .scroll_anchor
            .as_ref()
            .is_some_and(|a| a.uri == top.uri())
        {
            return;
        }

        let anchor = ScrollAnchor::from_entry(top);
        if let Err(e) = self
            .engine
            .cache
            .save_scroll_anchor(&anchor, &self.cache_key())
            .await
        {
            tracing::warn!("Failed to save scroll anchor: {e}");
        }
        self.state.scroll_anchor = Some(anchor);
    }

    // Like / repost

    fn request_toggle(&mut self, uri: String, kind: Engagement, reply: Reply<()>) {
        let key = (uri, kind);
        if let Some(slot) = self.toggles.get_mut(&key) {
            tracing::debug!(uri = %key.0, kind = kind.name(), "Queueing toggle behind in-flight one");
            slot.queued.push_back(reply);
            return;
        }
        self.start_toggle(key, reply, VecDeque::new());
    }

    fn start_toggle(&mut self, key: (String, Engagement), reply: Reply<()>, queued: VecDeque<Reply<()>>) {
        let (uri, kind) = &key;
        let Some(entry) = self.state.displayed_entry_mut(uri) else {
            tracing::debug!(uri = %uri, "Toggle on post that is not displayed");
            let _ = reply.send(Ok(()));
            for reply in queued {
                let _ = reply.send(Ok(()));
            }
            return;
        };

        let (before, intent) = match actions::apply_optimistic(&mut entry.post, *kind) {
            Ok(flip) => flip,
            Err(e) => {
                self.surface(kind.scope(), &e);
                let _ = reply.send(Err(e));
                // Later toggles get a fresh attempt
                let mut queued = queued;
                if let Some(next) = queued.pop_front() {
                    self.start_toggle(key, next, queued);
                }
                return;
            }
        };

        let op = self.next_op();
        let actions = Arc::clone(&self.engine.actions);
        let tx = self.internal_tx.clone();
        let (uri, kind) = (uri.clone(), *kind);

        let task = tokio::spawn(async move {
            let result = match (kind, intent) {
                (Engagement::Like, ToggleIntent::Create { cid }) => {
                    actions.like_post(&uri, &cid).await.map(Some)
                }
                (Engagement::Like, ToggleIntent::Delete { relation }) => {
                    actions.unlike_post(&relation).await.map(|()| None)
                }
                (Engagement::Repost, ToggleIntent::Create { cid }) => {
                    actions.repost_post(&uri, &cid).await.map(Some)
                }
                (Engagement::Repost, ToggleIntent::Delete { relation }) => {
                    actions.unrepost_post(&relation).await.map(|()| None)
                }
            };
            let _ = tx.send(Internal::Toggled(op, result));
        });

        self.toggles.insert(
            key,
            ToggleSlot {
                op,
                task,
                before,
                reply,
                queued,
            },
        );
    }

    fn finish_toggle(&mut self, op: u64, result: Result<Option<String>>) {
        let Some(key) = self
            .toggles
            .iter()
            .find_map(|(key, slot)| (slot.op == op).then(|| key.clone()))
        else {
            tracing::debug!(op, "Discarding stale toggle result");
            return;
        };
        let Some(slot) = self.toggles.remove(&key) else {
            return;
        };
        let (uri, kind) = &key;

        let outcome = match result {
            Ok(record) => {
                if let (Some(record), Some(entry)) = (record, self.state.displayed_entry_mut(uri)) {
                    actions::confirm_created(&mut entry.post, *kind, record);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(entry) = self.state.displayed_entry_mut(uri) {
                    actions::restore(&mut entry.post, *kind, slot.before);
                }
                if !e.is_cancelled() {
                    tracing::warn!(uri = %uri, "{} failed: {e}", kind.name());
                    self.surface(kind.scope(), &e);
                }
                Err(e)
            }
        };
        let _ = slot.reply.send(outcome);

        let mut queued = slot.queued;
        if let Some(next) = queued.pop_front() {
            self.start_toggle(key, next, queued);
        }
    }

    // Teardown

    fn teardown(&mut self) {
        // Scheduler first so no tick lands on cleared state
        self.stop_scheduler();
        self.cancel_foreground();
        self.cancel_load_more();
        for (_, slot) in self.toggles.drain() {
            slot.task.abort();
            let _ = slot.reply.send(Err(Error::Cancelled));
            for reply in slot.queued {
                let _ = reply.send(Err(Error::Cancelled));
            }
        }

        self.state.clear();
        self.error = None;
        self.background_error = None;
        self.tracker.reset();
    }

    fn publish(&self) {
        let state = &self.state;
        let snapshot = TimelineSnapshot {
            feed: self.engine.feed.clone(),
            displayed: state.displayed.clone(),
            pending_count: state.pending.len(),
            unseen_count: state.unseen_count(),
            has_more: state.cursor.is_some(),
            scroll_anchor: state.scroll_anchor.clone(),
            loading: matches!(
                self.foreground,
                Some(Slot {
                    reply: Foreground::Load(_),
                    ..
                })
            ),
            refreshing: matches!(
                self.foreground,
                Some(Slot {
                    reply: Foreground::Refresh(_),
                    ..
                })
            ),
            loading_more: self.load_more.is_some(),
            error: self.error.clone(),
            background_error: self.background_error.clone(),
            background_running: self.scheduler.is_some(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
