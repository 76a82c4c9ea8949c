//! # Roost 🐦
//!
//! Timeline synchronization and reconciliation for Bluesky clients.
//!
//! ## Overview
//!
//! Roost keeps a local timeline in step with a cursor-paginated,
//! server-ordered feed. It reopens where the user left off, stages
//! background updates without moving what is on screen, and never shows the
//! same post twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TimelineHandle                          │
//! │   Commands in (mpsc), snapshots out (watch), events out     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Engine actor (one task)                    │
//! │  Owns TimelineState, spawns fetches, drops stale results    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │      Merge      │ │     Anchor      │ │    Scheduler    │
//! │                 │ │                 │ │                 │
//! │ • Dedup by URI  │ │ • Page search   │ │ • Throttle      │
//! │ • Pending       │ │ • Closest post  │ │ • Failure count │
//! │ • Commit        │ │ • Fallbacks     │ │ • Cancellation  │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!          │                   │                   │
//!          └───────────────────┴───────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │   FeedSource    │ │    PostCache    │ │   Moderation    │
//! │                 │ │                 │ │                 │
//! │ • Bluesky XRPC  │ │ • SQLite        │ │ • Label prefs   │
//! │ • Like/repost   │ │ • Scroll anchor │ │ • Allow/warn/   │
//! │                 │ │                 │ │   hide          │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`api`]: Feed and post-action traits, Bluesky client
//! - [`config`]: Configuration management
//! - [`db`]: `SQLite` post cache and scroll anchors
//! - [`models`]: Data models (Post, `FeedEntry`, `FeedId`)
//! - [`moderation`]: Label-based moderation filter
//! - [`timeline`]: The reconciliation engine
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use roost::api::bluesky::BlueskyClient;
//! use roost::db::MemoryCache;
//! use roost::timeline::TimelineEngine;
//! use roost::{Config, FeedId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let client = Arc::new(BlueskyClient::login("you.bsky.social", "app-password").await?);
//!     let timeline = TimelineEngine::new(
//!         FeedId::Following,
//!         config.timeline,
//!         config.moderation,
//!         client.clone(),
//!         Arc::new(MemoryCache::new()),
//!         client,
//!     )
//!     .spawn();
//!
//!     timeline.load().await?;
//!     for entry in timeline.snapshot().displayed {
//!         println!("{}", entry.post.preview(80));
//!     }
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/roost/0.1.0")]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::single_match_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::similar_names)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::significant_drop_tightening)]

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod moderation;
pub mod paths;
pub mod timeline;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{Config, TimelineSettings};
pub use db::Database;
pub use error::{Error, Result};
pub use models::{FeedEntry, FeedId, Post, ScrollAnchor};
pub use moderation::{ModerationSettings, ModerationVerdict};
pub use timeline::{TimelineEngine, TimelineEvent, TimelineHandle, TimelineSnapshot};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Repository URL
pub const REPO_URL: &str = "https://github.com/ricardodantas/roost";
