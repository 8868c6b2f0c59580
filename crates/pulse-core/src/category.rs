//! Canonical story categories.
//!
//! Text generators return free-form labels ("Business news", "війна",
//! "🏛 Politics"). [`canonicalize`] maps any label onto a fixed set of
//! emoji-prefixed categories. It is total: labels that match nothing land in
//! [`CanonicalCategory::Events`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of categories stories are filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalCategory {
    Politics,
    Economy,
    War,
    World,
    Society,
    Technology,
    Science,
    Health,
    Sports,
    Culture,
    Incidents,
    Opinion,
    /// Fallback bucket for anything unrecognized.
    Events,
}

struct Entry {
    category: CanonicalCategory,
    label: &'static str,
    /// Lowercase aliases. Only aliases of four or more characters take part
    /// in partial matching.
    aliases: &'static [&'static str],
}

// Order matters for partial matches: the first entry whose alias occurs in
// the label wins.
const TABLE: &[Entry] = &[
    Entry {
        category: CanonicalCategory::Politics,
        label: "🏛 Politics",
        aliases: &["politics", "political", "government", "elections", "політика", "політичні"],
    },
    Entry {
        category: CanonicalCategory::Economy,
        label: "💰 Economy",
        aliases: &["economy", "economics", "business", "finance", "markets", "економіка", "бізнес", "фінанси"],
    },
    Entry {
        category: CanonicalCategory::War,
        label: "⚔️ War",
        aliases: &["war", "military", "defense", "defence", "frontline", "army", "війна", "фронт", "армія"],
    },
    Entry {
        category: CanonicalCategory::World,
        label: "🌍 World",
        aliases: &["world", "international", "foreign", "diplomacy", "світ", "міжнародні"],
    },
    Entry {
        category: CanonicalCategory::Society,
        label: "👥 Society",
        aliases: &["society", "social", "community", "суспільство"],
    },
    Entry {
        category: CanonicalCategory::Technology,
        label: "💻 Technology",
        aliases: &["technology", "tech", "it", "ai", "gadgets", "технології"],
    },
    Entry {
        category: CanonicalCategory::Science,
        label: "🔬 Science",
        aliases: &["science", "research", "space", "наука"],
    },
    Entry {
        category: CanonicalCategory::Health,
        label: "🏥 Health",
        aliases: &["health", "medicine", "medical", "здоров'я", "медицина"],
    },
    Entry {
        category: CanonicalCategory::Sports,
        label: "⚽ Sports",
        aliases: &["sports", "sport", "football", "спорт"],
    },
    Entry {
        category: CanonicalCategory::Culture,
        label: "🎭 Culture",
        aliases: &["culture", "arts", "entertainment", "music", "cinema", "культура"],
    },
    Entry {
        category: CanonicalCategory::Incidents,
        label: "🚨 Incidents",
        aliases: &["incidents", "incident", "accidents", "crime", "emergency", "надзвичайні", "кримінал"],
    },
    Entry {
        category: CanonicalCategory::Opinion,
        label: "✍️ Author columns",
        aliases: &["author columns", "opinion", "author", "columnist", "column", "editorial", "автор", "авторські"],
    },
    Entry {
        category: CanonicalCategory::Events,
        label: "📰 Events",
        aliases: &["events", "news", "general", "події", "новини"],
    },
];

impl CanonicalCategory {
    /// Display label stored on stories and publications.
    pub fn label(&self) -> &'static str {
        self.entry().label
    }

    /// Every category in table order.
    pub fn all() -> impl Iterator<Item = CanonicalCategory> {
        TABLE.iter().map(|e| e.category)
    }

    fn entry(&self) -> &'static Entry {
        // Every variant has exactly one row; the fallback row is last.
        TABLE
            .iter()
            .find(|e| e.category == *self)
            .unwrap_or(&TABLE[TABLE.len() - 1])
    }
}

impl fmt::Display for CanonicalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a free-form label onto a canonical category.
///
/// Matching is case-insensitive and ignores any leading emoji or
/// punctuation. An exact alias match wins; otherwise the first category with
/// an alias contained in the label is used; otherwise [`CanonicalCategory::Events`].
pub fn canonicalize(label: &str) -> CanonicalCategory {
    let normalized = normalize(label);
    if normalized.is_empty() {
        return CanonicalCategory::Events;
    }

    let exact = TABLE.iter().find(|e| {
        e.aliases.iter().any(|a| *a == normalized)
            || normalize(e.label) == normalized
    });
    if let Some(entry) = exact {
        return entry.category;
    }

    TABLE
        .iter()
        .find(|e| {
            e.aliases
                .iter()
                .filter(|a| a.chars().count() >= 4)
                .any(|a| normalized.contains(a))
        })
        .map(|e| e.category)
        .unwrap_or(CanonicalCategory::Events)
}

fn normalize(label: &str) -> String {
    label
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim()
        .to_lowercase()
}
