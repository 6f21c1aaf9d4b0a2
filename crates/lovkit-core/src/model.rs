// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::ControlId;

pub const MULTI_VALUE_SEPARATOR: &str = ":";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub return_value: String,
    pub display_text: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub selected: bool,
}

impl Choice {
    pub fn new(return_value: impl Into<String>, display_text: impl Into<String>) -> Self {
        Self {
            return_value: return_value.into(),
            display_text: display_text.into(),
            icon: None,
            group: None,
            selected: false,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chip {
    pub value: String,
    pub display_text: String,
    pub label: Option<String>,
    pub overflow_hidden: bool,
    pub active: bool,
}

impl Chip {
    pub fn new(value: &str, display_text: &str, label: Option<&str>) -> Self {
        Self {
            value: value.to_owned(),
            display_text: display_text.to_owned(),
            label: label.map(str::to_owned),
            overflow_hidden: false,
            active: false,
        }
    }

    pub fn spoken_text(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => format!("{label} {}", self.display_text),
            _ => self.display_text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemValue {
    Single(String),
    Multi(Vec<String>),
}

impl ItemValue {
    pub fn empty_single() -> Self {
        Self::Single(String::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(value) => value.is_empty(),
            Self::Multi(values) => values.iter().all(String::is_empty),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(value) if value.is_empty() => Vec::new(),
            Self::Single(value) => vec![value.as_str()],
            Self::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    pub fn to_submit_string(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Multi(values) => values.join(MULTI_VALUE_SEPARATOR),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Enter,
    Escape,
    Tab { shift: bool },
    Backspace,
    Delete,
    Space,
    Char(char),
}

impl Key {
    pub fn printable(self) -> Option<char> {
        match self {
            Self::Char(ch) if !ch.is_control() => Some(ch),
            Self::Space => Some(' '),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub const fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[default]
    Contains,
    StartsWith,
}

impl MatchType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "contains" => Some(Self::Contains),
            "starts_with" => Some(Self::StartsWith),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub control: ControlId,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    pub search_text: Option<String>,
    pub sort: Option<SortSpec>,
    pub first_row: usize,
    pub max_rows: Option<usize>,
    pub dependencies: Vec<Dependency>,
}

impl FetchRequest {
    pub fn search(text: &str) -> Self {
        Self {
            search_text: Some(text.to_owned()),
            first_row: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FetchResponse {
    pub values: Vec<Choice>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub more_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LovRecord {
    pub return_value: String,
    pub display_value: String,
    #[serde(default)]
    pub cells: BTreeMap<String, String>,
}

impl LovRecord {
    pub fn new(return_value: impl Into<String>, display_value: impl Into<String>) -> Self {
        Self {
            return_value: return_value.into(),
            display_value: display_value.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn with_cell(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.cells.insert(column.into(), value.into());
        self
    }

    pub fn cell(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LovPage {
    pub records: Vec<LovRecord>,
    #[serde(default)]
    pub more_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LovResult {
    pub return_value: String,
    pub display_value: Option<String>,
    pub outputs: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::{Chip, ItemValue, Key, MatchType, SortDirection};

    #[test]
    fn item_value_emptiness_covers_both_shapes() {
        assert!(ItemValue::empty_single().is_empty());
        assert!(ItemValue::Multi(Vec::new()).is_empty());
        assert!(!ItemValue::Multi(vec!["A".to_owned()]).is_empty());
        assert_eq!(ItemValue::Single(String::new()).values(), Vec::<&str>::new());
    }

    #[test]
    fn multi_values_join_with_colon_for_submission() {
        let value = ItemValue::Multi(vec!["10".to_owned(), "20".to_owned()]);
        assert_eq!(value.to_submit_string(), "10:20");
    }

    #[test]
    fn chip_spoken_text_prefixes_label() {
        let chip = Chip::new("10", "Accounting", Some("Department"));
        assert_eq!(chip.spoken_text(), "Department Accounting");
        let bare = Chip::new("10", "Accounting", None);
        assert_eq!(bare.spoken_text(), "Accounting");
    }

    #[test]
    fn enum_string_forms_round_trip() {
        for direction in [SortDirection::Asc, SortDirection::Desc] {
            assert_eq!(SortDirection::parse(direction.as_str()), Some(direction));
        }
        for match_type in [MatchType::Contains, MatchType::StartsWith] {
            assert_eq!(MatchType::parse(match_type.as_str()), Some(match_type));
        }
        assert_eq!(SortDirection::parse("sideways"), None);
    }

    #[test]
    fn only_visible_characters_are_printable() {
        assert_eq!(Key::Char('a').printable(), Some('a'));
        assert_eq!(Key::Space.printable(), Some(' '));
        assert_eq!(Key::Char('\u{7}').printable(), None);
        assert_eq!(Key::Enter.printable(), None);
    }
}
