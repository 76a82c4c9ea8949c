//! Timeline synchronization and reconciliation
//!
//! Pure pieces (`merge`, `anchor`, `state`, `actions`, the scheduler's
//! [`RefreshTracker`]) hold the rules; [`engine`] is the actor that runs
//! them against the network and the cache.

pub mod actions;
pub mod anchor;
pub mod engine;
pub mod merge;
pub mod scheduler;
pub mod state;

pub use actions::{Engagement, PENDING_RELATION};
pub use anchor::{AnchorSearch, AnchorUpdate, RecoveryOutcome, SearchLimits, SearchStep, recover};
pub use engine::{FetchOutcome, TimelineEngine, TimelineEvent, TimelineHandle, TimelineSnapshot};
pub use scheduler::{RefreshTracker, SkipReason};
pub use state::{ErrorScope, ScopedError, TimelineState, UnseenTracker};
