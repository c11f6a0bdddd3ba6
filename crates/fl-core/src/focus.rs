//! Focus/distraction split and focus score.
//!
//! Deciding what counts as productive is not this module's job: callers hand
//! in a [`ProductiveKeys`] set built from backend categories, a fetched
//! allow-list, or a [`KeywordMatcher`].

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::aggregate::Aggregates;
use crate::record::UsageRecord;
use crate::types::ProductivityCategory;

/// Keywords used when no classification is configured.
///
/// Matched case-insensitively as substrings of the subject key.
pub const DEFAULT_PRODUCTIVE_KEYWORDS: &[&str] = &[
    // Editors and IDEs
    "code", "cursor", "intellij", "pycharm", "webstorm", "xcode", "vim", "emacs", "sublime",
    // Terminals
    "terminal", "iterm", "powershell", "wezterm", "alacritty", "kitty",
    // Documents and notes
    "word", "excel", "notion", "obsidian", "docs.google.com", "confluence",
    // Developer sites
    "github.com", "gitlab.com", "stackoverflow.com", "docs.rs", "developer.mozilla.org",
    // Design
    "figma",
];

/// Productive versus non-productive time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FocusSplit {
    pub productive_seconds: u64,
    pub non_productive_seconds: u64,
    /// `productive / total * 100` rounded half-up, 0 for an empty window, never above 100.
    pub focus_score_percent: u8,
}

impl FocusSplit {
    pub const fn total_seconds(&self) -> u64 {
        self.productive_seconds.saturating_add(self.non_productive_seconds)
    }

    pub const fn rating(&self) -> FocusRating {
        FocusRating::from_score(self.focus_score_percent)
    }
}

/// Coarse band of a focus score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusRating {
    /// 70 and above.
    Excellent,
    /// 50 to 69.
    Good,
    NeedsImprovement,
}

impl FocusRating {
    pub const fn from_score(score: u8) -> Self {
        if score >= 70 {
            Self::Excellent
        } else if score >= 50 {
            Self::Good
        } else {
            Self::NeedsImprovement
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::NeedsImprovement => "Needs Improvement",
        }
    }
}

impl fmt::Display for FocusRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The set of subject keys to count as productive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductiveKeys(HashSet<String>);

impl ProductiveKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Keys the backend categorized as productive.
    ///
    /// When records disagree about a subject, the first categorized record wins.
    pub fn from_records(records: &[UsageRecord]) -> Self {
        let mut decided: HashSet<&str> = HashSet::new();
        let mut productive = HashSet::new();
        for record in records {
            let Some(category) = record.category else {
                continue;
            };
            let key = record.subject_key.as_str();
            if !decided.insert(key) {
                continue;
            }
            if category == ProductivityCategory::Productive {
                productive.insert(key.to_string());
            }
        }
        Self(productive)
    }

    pub fn contains(&self, subject_key: &str) -> bool {
        self.0.contains(subject_key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// Classifies subjects by case-insensitive keyword match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PRODUCTIVE_KEYWORDS.iter().copied())
    }
}

impl KeywordMatcher {
    /// Blank keywords are dropped.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn is_productive(&self, subject_key: &str) -> bool {
        let lower = subject_key.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// The aggregated subjects that match a keyword.
    pub fn productive_keys(&self, aggregates: &Aggregates) -> ProductiveKeys {
        ProductiveKeys::new(
            aggregates
                .iter()
                .map(|a| a.subject_key.as_str())
                .filter(|key| self.is_productive(key)),
        )
    }
}

/// Splits aggregated time into productive and non-productive buckets.
pub fn classify(aggregates: &Aggregates, productive_keys: &ProductiveKeys) -> FocusSplit {
    let (productive_seconds, non_productive_seconds) =
        aggregates
            .iter()
            .fold((0u64, 0u64), |(productive, other), a| {
                if productive_keys.contains(a.subject_key.as_str()) {
                    (productive.saturating_add(a.total_duration_seconds), other)
                } else {
                    (productive, other.saturating_add(a.total_duration_seconds))
                }
            });

    FocusSplit {
        productive_seconds,
        non_productive_seconds,
        focus_score_percent: focus_score(
            productive_seconds,
            productive_seconds.saturating_add(non_productive_seconds),
        ),
    }
}

/// Percentage of `total` that is `productive`, rounded half-up and clamped to 100.
fn focus_score(productive: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let scaled = u128::from(productive) * 100;
    let total = u128::from(total);
    let mut percent = scaled / total;
    if (scaled % total) * 2 >= total {
        percent += 1;
    }
    u8::try_from(percent.min(100)).unwrap_or(100)
}
