// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::host::{ScopedStorage, StorageScope};
use crate::ids::ControlId;
use crate::lov::LovColumn;
use crate::model::{SortDirection, SortSpec};

pub const LAYOUT_KEY: &str = "layout";
pub const RECENT_KEY: &str = "recent";
pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedLayout {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sort_column: Option<String>,
    pub sort_direction: Option<SortDirection>,
    pub column_widths: BTreeMap<String, u32>,
}

impl PersistedLayout {
    // Stored state may predate the current column configuration. Anything
    // that no longer applies is dropped rather than trusted.
    pub fn validated(mut self, columns: &[LovColumn]) -> Self {
        self.width = self.width.filter(|width| *width > 0);
        self.height = self.height.filter(|height| *height > 0);

        let sortable = self.sort_column.as_deref().is_some_and(|name| {
            columns
                .iter()
                .any(|column| column.name == name && column.sortable)
        });
        if !sortable {
            self.sort_column = None;
            self.sort_direction = None;
        } else if self.sort_direction.is_none() {
            self.sort_direction = Some(SortDirection::Asc);
        }

        self.column_widths = self
            .column_widths
            .into_iter()
            .filter_map(|(name, width)| {
                let column = columns.iter().find(|column| column.name == name)?;
                (width > 0).then(|| (name, width.max(column.min_width)))
            })
            .collect();
        self
    }

    pub fn sort(&self) -> Option<SortSpec> {
        Some(SortSpec {
            column: self.sort_column.clone()?,
            direction: self.sort_direction.unwrap_or(SortDirection::Asc),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentSearches {
    #[serde(skip, default = "default_recent_limit")]
    limit: usize,
    entries: Vec<String>,
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

impl Default for RecentSearches {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_LIMIT)
    }
}

impl RecentSearches {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self.entries.truncate(limit);
        self
    }

    pub fn record(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || self.limit == 0 {
            return false;
        }
        let lowered = text.to_lowercase();
        self.entries.retain(|entry| entry.to_lowercase() != lowered);
        self.entries.insert(0, text.to_owned());
        self.entries.truncate(self.limit);
        true
    }
}

pub fn load_layout<St: ScopedStorage>(
    storage: &St,
    scope: &StorageScope,
    control: &ControlId,
    columns: &[LovColumn],
) -> PersistedLayout {
    load_json::<St, PersistedLayout>(storage, &scope.key(control, LAYOUT_KEY))
        .unwrap_or_default()
        .validated(columns)
}

pub fn save_layout<St: ScopedStorage>(
    storage: &mut St,
    scope: &StorageScope,
    control: &ControlId,
    layout: &PersistedLayout,
) {
    save_json(storage, &scope.key(control, LAYOUT_KEY), layout);
}

pub fn load_recent<St: ScopedStorage>(
    storage: &St,
    scope: &StorageScope,
    control: &ControlId,
    limit: usize,
) -> RecentSearches {
    load_json::<St, RecentSearches>(storage, &scope.key(control, RECENT_KEY))
        .unwrap_or_default()
        .with_limit(limit)
}

pub fn save_recent<St: ScopedStorage>(
    storage: &mut St,
    scope: &StorageScope,
    control: &ControlId,
    recent: &RecentSearches,
) {
    save_json(storage, &scope.key(control, RECENT_KEY), recent);
}

fn load_json<St: ScopedStorage, T: DeserializeOwned>(storage: &St, key: &str) -> Option<T> {
    let raw = match storage.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(error) => {
            warn!(key, error = %format!("{error:#}"), "storage read failed");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(key, %error, "ignoring malformed stored state");
            None
        }
    }
}

fn save_json<St: ScopedStorage, T: Serialize>(storage: &mut St, key: &str, value: &T) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(key, %error, "encode stored state failed");
            return;
        }
    };
    match storage.set_item(key, &raw) {
        Ok(()) => debug!(key, "stored state written"),
        Err(error) => warn!(key, error = %format!("{error:#}"), "storage write failed"),
    }
}
