//! Data models for Roost

mod anchor;
mod feed;
mod feed_entry;
mod post;

pub use anchor::ScrollAnchor;
pub use feed::FeedId;
pub use feed_entry::{FeedEntry, FeedReason, ReplyContext};
pub use post::{Author, Label, MediaAttachment, MediaType, Post, ViewerState};
