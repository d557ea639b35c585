use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channels::{self, Channel, ParsedPlaylist};

/// Sentinel category meaning "no category filter".
pub const ALL: &str = "all";
/// Maximum number of channels handed out by one [`Catalog::filter_view`].
pub const VIEW_LIMIT: usize = 200;

/// Parsed channels plus the filters a player applies on top of them.
///
/// Commands consume the catalog and return the updated one, so callers
/// holding a shared catalog swap it in a single assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub channels: Vec<Channel>,
    pub categories: Vec<String>,
    pub active_category: String,
    pub search_term: String,
    pub selected_provider: String,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredView {
    pub channels: Vec<Channel>,
    /// How many matches were cut off by [`VIEW_LIMIT`].
    pub overflow: usize,
}

impl FilteredView {
    pub fn total(&self) -> usize {
        self.channels.len() + self.overflow
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTab {
    pub name: String,
    pub count: usize,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            categories: Vec::new(),
            active_category: ALL.to_string(),
            search_term: String::new(),
            selected_provider: String::new(),
            last_updated: None,
        }
    }
}

impl Catalog {
    pub fn new(selected_provider: impl Into<String>) -> Self {
        Self {
            selected_provider: selected_provider.into(),
            ..Self::default()
        }
    }

    pub fn load(self, parsed: ParsedPlaylist) -> Self {
        self.load_at(parsed, Utc::now())
    }

    pub fn load_at(self, parsed: ParsedPlaylist, loaded_at: DateTime<Utc>) -> Self {
        let channels = parsed
            .channels
            .into_iter()
            .enumerate()
            .map(|(index, channel)| Channel { index, ..channel })
            .collect();

        Self {
            channels,
            categories: parsed.categories,
            active_category: ALL.to_string(),
            search_term: String::new(),
            selected_provider: self.selected_provider,
            last_updated: Some(loaded_at),
        }
    }

    /// Empties the catalog. The selected provider survives so a reload knows
    /// where to go.
    pub fn reset(self) -> Self {
        Self::new(self.selected_provider)
    }

    pub fn select_provider(self, provider_id: impl Into<String>) -> Self {
        Self {
            selected_provider: provider_id.into(),
            ..self
        }
    }

    pub fn set_search_term(self, term: impl Into<String>) -> Self {
        Self {
            search_term: term.into(),
            ..self
        }
    }

    pub fn set_category(self, category: impl Into<String>) -> Self {
        Self {
            active_category: category.into(),
            ..self
        }
    }

    pub fn filter_view(&self) -> FilteredView {
        let term = self.search_term.to_lowercase();
        let mut matched = self
            .channels
            .iter()
            .filter(|c| self.active_category == ALL || c.group == self.active_category)
            .filter(|c| {
                term.is_empty()
                    || c.name.to_lowercase().contains(&term)
                    || c.group.to_lowercase().contains(&term)
            });

        let channels: Vec<Channel> = matched.by_ref().take(VIEW_LIMIT).cloned().collect();
        let overflow = matched.count();

        FilteredView { channels, overflow }
    }

    /// `"all"` first, then every known category in order, zero counts
    /// included.
    pub fn category_counts(&self) -> Vec<(String, usize)> {
        let mut counts = Vec::with_capacity(self.categories.len() + 1);
        counts.push((ALL.to_string(), self.channels.len()));
        for category in &self.categories {
            let count = self.channels.iter().filter(|c| &c.group == category).count();
            counts.push((category.clone(), count));
        }
        counts
    }

    /// The tab list shown to a player: like [`Self::category_counts`] but
    /// without empty categories. `"all"` is always present.
    pub fn tabs(&self) -> Vec<CategoryTab> {
        self.category_counts()
            .into_iter()
            .enumerate()
            .filter(|(i, (_, count))| *i == 0 || *count > 0)
            .map(|(_, (name, count))| CategoryTab { name, count })
            .collect()
    }

    pub fn export_m3u(&self) -> String {
        channels::write_m3u(&self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
