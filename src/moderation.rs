//! Label-based moderation filter
//!
//! A pure function from `(post, settings)` to a verdict. Entries judged
//! `Hide` never enter a timeline; `Warn` entries are kept and stamped so the
//! shell can put them behind an interstitial.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{FeedEntry, Post};

/// Labels that always hide, regardless of preferences
const FORCED_HIDE: &[&str] = &["!hide", "!takedown"];

/// Labels that always warn
const FORCED_WARN: &[&str] = &["!warn"];

/// Adult-content labels, hidden outright unless adult content is enabled
const ADULT_LABELS: &[&str] = &["porn", "sexual", "nudity"];

/// Verdict for a single post
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum ModerationVerdict {
    /// Show normally
    #[default]
    Allow,
    /// Show behind a warning
    Warn {
        /// Label that triggered the warning
        label: String,
    },
    /// Drop from the timeline
    Hide,
}

/// What to do with posts carrying a given label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPreference {
    /// Show normally
    Ignore,
    /// Show behind a warning
    Warn,
    /// Drop
    Hide,
}

/// User-configured moderation preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationSettings {
    /// Whether adult-content labels may be shown at all
    #[serde(default)]
    pub adult_content_enabled: bool,

    /// Per-label preference (label value -> preference)
    #[serde(default = "default_labels")]
    pub labels: HashMap<String, LabelPreference>,
}

fn default_labels() -> HashMap<String, LabelPreference> {
    HashMap::from([
        ("porn".to_string(), LabelPreference::Hide),
        ("sexual".to_string(), LabelPreference::Warn),
        ("nudity".to_string(), LabelPreference::Warn),
        ("graphic-media".to_string(), LabelPreference::Warn),
        ("gore".to_string(), LabelPreference::Warn),
    ])
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            adult_content_enabled: false,
            labels: default_labels(),
        }
    }
}

/// Judge a single post. The strictest verdict across its labels wins.
pub fn moderate(post: &Post, settings: &ModerationSettings) -> ModerationVerdict {
    let mut verdict = ModerationVerdict::Allow;

    for label in &post.labels {
        let val = label.val.as_str();

        let pref = if FORCED_HIDE.contains(&val) {
            LabelPreference::Hide
        } else if FORCED_WARN.contains(&val) {
            LabelPreference::Warn
        } else if ADULT_LABELS.contains(&val) && !settings.adult_content_enabled {
            LabelPreference::Hide
        } else {
            settings
                .labels
                .get(val)
                .copied()
                .unwrap_or(LabelPreference::Ignore)
        };

        match pref {
            LabelPreference::Hide => return ModerationVerdict::Hide,
            LabelPreference::Warn if verdict == ModerationVerdict::Allow => {
                verdict = ModerationVerdict::Warn {
                    label: val.to_string(),
                };
            }
            _ => {}
        }
    }

    verdict
}

/// Filter entries: drop `Hide`, stamp every survivor with its verdict.
///
/// Order is preserved.
pub fn apply_moderation(entries: Vec<FeedEntry>, settings: &ModerationSettings) -> Vec<FeedEntry> {
    entries
        .into_iter()
        .filter_map(|mut entry| match moderate(&entry.post, settings) {
            ModerationVerdict::Hide => {
                tracing::debug!("Moderation hid {}", entry.uri());
                None
            }
            verdict => {
                entry.moderation = verdict;
                Some(entry)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use chrono::Utc;

    fn labeled(uri: &str, labels: &[&str]) -> FeedEntry {
        let mut post = Post::new(uri, Utc::now());
        post.labels = labels.iter().map(|l| Label::new(l)).collect();
        FeedEntry::new(post)
    }

    #[test]
    fn test_unlabeled_posts_are_allowed() {
        let settings = ModerationSettings::default();
        assert_eq!(
            moderate(&labeled("a", &[]).post, &settings),
            ModerationVerdict::Allow
        );
    }

    #[test]
    fn test_forced_labels_override_preferences() {
        let mut settings = ModerationSettings::default();
        settings
            .labels
            .insert("!hide".to_string(), LabelPreference::Ignore);
        assert_eq!(
            moderate(&labeled("a", &["!hide"]).post, &settings),
            ModerationVerdict::Hide
        );
        assert_eq!(
            moderate(&labeled("b", &["!warn"]).post, &settings),
            ModerationVerdict::Warn {
                label: "!warn".into()
            }
        );
    }

    #[test]
    fn test_adult_labels_follow_adult_toggle() {
        let mut settings = ModerationSettings::default();
        let entry = labeled("a", &["nudity"]);
        assert_eq!(moderate(&entry.post, &settings), ModerationVerdict::Hide);

        settings.adult_content_enabled = true;
        assert_eq!(
            moderate(&entry.post, &settings),
            ModerationVerdict::Warn {
                label: "nudity".into()
            }
        );
    }

    #[test]
    fn test_hide_wins_over_warn() {
        let settings = ModerationSettings::default();
        let entry = labeled("a", &["gore", "!hide"]);
        assert_eq!(moderate(&entry.post, &settings), ModerationVerdict::Hide);
    }

    #[test]
    fn test_apply_moderation_drops_and_stamps() {
        let settings = ModerationSettings::default();
        let entries = vec![
            labeled("a", &[]),
            labeled("b", &["!hide"]),
            labeled("c", &["graphic-media"]),
        ];

        let kept = apply_moderation(entries, &settings);
        let uris: Vec<_> = kept.iter().map(FeedEntry::uri).collect();
        assert_eq!(uris, vec!["a", "c"]);
        assert_eq!(kept[0].moderation, ModerationVerdict::Allow);
        assert!(matches!(kept[1].moderation, ModerationVerdict::Warn { .. }));
    }
}
