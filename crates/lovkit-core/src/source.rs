// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::highlight::{highlight, text_matches};
use crate::ids::RequestSeq;
use crate::model::{Choice, MatchType};

pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(250);
pub const DEFAULT_MIN_CHARS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterSettings {
    pub match_type: MatchType,
    pub case_sensitive: bool,
    pub max_results: Option<usize>,
    pub exclude_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleChoice {
    pub index: usize,
    pub highlighted: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibleRow<'a> {
    Group(&'a str),
    Choice(&'a VisibleChoice),
}

pub fn filter_choices(
    choices: &[Choice],
    text: &str,
    settings: &FilterSettings,
) -> Vec<VisibleChoice> {
    let limit = settings.max_results.unwrap_or(usize::MAX);
    choices
        .iter()
        .enumerate()
        .filter(|(_, choice)| !(settings.exclude_selected && choice.selected))
        .filter(|(_, choice)| {
            text_matches(
                &choice.display_text,
                text,
                settings.match_type,
                settings.case_sensitive,
            )
        })
        .take(limit)
        .map(|(index, choice)| VisibleChoice {
            index,
            highlighted: highlight(
                &choice.display_text,
                text,
                settings.match_type,
                settings.case_sensitive,
            ),
        })
        .collect()
}

// A group label is emitted once, before the first visible choice that
// carries it. Consecutive choices without a group get no header.
pub fn group_rows<'a>(choices: &'a [Choice], visible: &'a [VisibleChoice]) -> Vec<VisibleRow<'a>> {
    let mut rows = Vec::with_capacity(visible.len());
    let mut current: Option<&str> = None;
    for entry in visible {
        let group = choices
            .get(entry.index)
            .and_then(|choice| choice.group.as_deref());
        if let Some(group) = group
            && current != Some(group)
        {
            rows.push(VisibleRow::Group(group));
        }
        current = group;
        rows.push(VisibleRow::Choice(entry));
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingSearch {
    due: Instant,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncSearch {
    debounce: Duration,
    min_chars: usize,
    pending: Option<PendingSearch>,
    latest: RequestSeq,
    in_flight: Option<(RequestSeq, String)>,
}

impl Default for AsyncSearch {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_DEBOUNCE, DEFAULT_MIN_CHARS)
    }
}

impl AsyncSearch {
    pub fn new(debounce: Duration, min_chars: usize) -> Self {
        Self {
            debounce,
            min_chars,
            pending: None,
            latest: RequestSeq::default(),
            in_flight: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    // Restarts the debounce window. Text shorter than the minimum cancels
    // any pending search instead.
    pub fn schedule(&mut self, text: &str, now: Instant) -> bool {
        if text.chars().count() < self.min_chars {
            self.pending = None;
            return false;
        }
        self.pending = Some(PendingSearch {
            due: now + self.debounce,
            text: text.to_owned(),
        });
        true
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.due)
    }

    pub fn poll(&mut self, now: Instant) -> Option<(RequestSeq, String)> {
        let due = self.pending.as_ref()?.due;
        if now < due {
            return None;
        }
        let pending = self.pending.take()?;
        self.latest = self.latest.next();
        self.in_flight = Some((self.latest, pending.text.clone()));
        debug!(seq = self.latest.get(), text = %pending.text, "search issued");
        Some((self.latest, pending.text))
    }

    // Drops the pending timer and invalidates whatever is in flight.
    pub fn cancel(&mut self) {
        self.pending = None;
        if self.in_flight.take().is_some() {
            self.latest = self.latest.next();
        }
    }

    // Returns `None` for a stale response: an older sequence, or a search
    // for text the input no longer holds. Host failures become an empty
    // result set.
    pub fn accept(
        &mut self,
        seq: RequestSeq,
        current_text: &str,
        result: Result<Vec<Choice>>,
    ) -> Option<Vec<Choice>> {
        let Some((in_flight_seq, searched)) = self.in_flight.as_ref() else {
            debug!(seq = seq.get(), "dropping response with nothing in flight");
            return None;
        };
        if seq != self.latest || *in_flight_seq != seq {
            debug!(seq = seq.get(), latest = self.latest.get(), "dropping stale search response");
            return None;
        }
        if searched != current_text {
            debug!(seq = seq.get(), "dropping response for outdated search text");
            self.in_flight = None;
            return None;
        }
        self.in_flight = None;
        match result {
            Ok(choices) => Some(choices),
            Err(error) => {
                warn!(seq = seq.get(), error = %format!("{error:#}"), "search failed");
                Some(Vec::new())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomOutcome {
    Picked {
        return_value: String,
        display_text: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomSurface {
    open: bool,
    search_char: Option<char>,
}

impl CustomSurface {
    pub fn open(&mut self, search_char: Option<char>) {
        self.open = true;
        self.search_char = search_char;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn search_char(&self) -> Option<char> {
        self.search_char
    }

    pub fn finish(&mut self) {
        self.open = false;
        self.search_char = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceSource {
    Static,
    Async(AsyncSearch),
    Custom(CustomSurface),
}

impl ChoiceSource {
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{AsyncSearch, FilterSettings, VisibleRow, filter_choices, group_rows};
    use crate::model::{Choice, MatchType};
    use anyhow::anyhow;
    use std::time::{Duration, Instant};

    fn fruit() -> Vec<Choice> {
        vec![
            Choice::new("1", "Apple").with_group("Pome"),
            Choice::new("2", "Banana").with_group("Tropical"),
            Choice::new("3", "Pear").with_group("Pome"),
            Choice::new("4", "Papaya").with_group("Tropical"),
        ]
    }

    #[test]
    fn static_filter_is_case_insensitive_substring_with_highlight() {
        let choices = fruit();
        let visible = filter_choices(&choices, "PA", &FilterSettings::default());
        let indexes: Vec<usize> = visible.iter().map(|entry| entry.index).collect();
        assert_eq!(indexes, vec![3]);
        assert!(visible[0].highlighted.starts_with("<span class=\"lov-match\">Pa</span>"));
    }

    #[test]
    fn static_filter_excludes_selected_and_honors_limit_and_match_type() {
        let mut choices = fruit();
        choices[0].selected = true;
        let settings = FilterSettings {
            exclude_selected: true,
            ..FilterSettings::default()
        };
        let visible = filter_choices(&choices, "a", &settings);
        assert!(visible.iter().all(|entry| entry.index != 0));

        let starts = FilterSettings {
            match_type: MatchType::StartsWith,
            max_results: Some(1),
            ..FilterSettings::default()
        };
        let visible = filter_choices(&choices, "p", &starts);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].index, 2);
    }

    #[test]
    fn group_headers_precede_first_visible_member() {
        let choices = fruit();
        let visible = filter_choices(&choices, "", &FilterSettings::default());
        let rows = group_rows(&choices, &visible);
        let headers: Vec<&str> = rows
            .iter()
            .filter_map(|row| match row {
                VisibleRow::Group(name) => Some(*name),
                VisibleRow::Choice(_) => None,
            })
            .collect();
        assert_eq!(headers, vec!["Pome", "Tropical", "Pome", "Tropical"]);
        assert_eq!(rows.len(), 8);
    }

    #[test]
    fn debounce_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut search = AsyncSearch::new(Duration::from_millis(250), 1);
        assert!(search.schedule("a", start));
        assert!(search.schedule("ab", start + Duration::from_millis(100)));

        assert!(search.poll(start + Duration::from_millis(300)).is_none());
        let (seq, text) = search
            .poll(start + Duration::from_millis(350))
            .expect("search should fire");
        assert_eq!(seq.get(), 1);
        assert_eq!(text, "ab");
        assert!(search.poll(start + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn below_min_chars_cancels_pending_search() {
        let start = Instant::now();
        let mut search = AsyncSearch::new(Duration::from_millis(250), 2);
        search.schedule("ab", start);
        assert!(!search.schedule("a", start));
        assert!(!search.has_pending());
    }

    #[test]
    fn stale_and_outdated_responses_are_dropped() {
        let start = Instant::now();
        let mut search = AsyncSearch::new(Duration::ZERO, 1);
        search.schedule("a", start);
        let (first, _) = search.poll(start).expect("first search");
        search.schedule("ab", start);
        let (second, _) = search.poll(start).expect("second search");

        assert!(search.accept(first, "ab", Ok(vec![Choice::new("x", "x")])).is_none());
        let accepted = search.accept(second, "ab", Ok(vec![Choice::new("y", "y")]));
        assert_eq!(accepted.map(|choices| choices.len()), Some(1));

        search.schedule("abc", start);
        let (third, _) = search.poll(start).expect("third search");
        assert!(search.accept(third, "abcd", Ok(Vec::new())).is_none());
    }

    #[test]
    fn host_failure_becomes_empty_results() {
        let start = Instant::now();
        let mut search = AsyncSearch::new(Duration::ZERO, 1);
        search.schedule("a", start);
        let (seq, _) = search.poll(start).expect("search");
        let accepted = search.accept(seq, "a", Err(anyhow!("backend down")));
        assert_eq!(accepted, Some(Vec::new()));
    }

    #[test]
    fn cancel_invalidates_in_flight_search() {
        let start = Instant::now();
        let mut search = AsyncSearch::new(Duration::ZERO, 1);
        search.schedule("a", start);
        let (seq, _) = search.poll(start).expect("search");
        search.cancel();
        assert!(search.accept(seq, "a", Ok(Vec::new())).is_none());
    }
}
