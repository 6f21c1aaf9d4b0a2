// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;
use tracing::debug;

use crate::model::{Chip, Choice};

// Two thirds of the container go to chips; the rest stays with the input.
const CHIP_SHARE_NUMERATOR: f32 = 2.0;
const CHIP_SHARE_DENOMINATOR: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChipMetrics {
    pub container_width: f32,
    pub chip_widths: BTreeMap<String, f32>,
    pub indicator_width: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChipCollection {
    chips: Vec<Chip>,
    enterable: bool,
    container_width: Option<f32>,
    indicator_width: f32,
    widths: BTreeMap<String, f32>,
    hidden: usize,
    summary: String,
}

impl ChipCollection {
    pub fn new(enterable: bool) -> Self {
        Self {
            enterable,
            ..Self::default()
        }
    }

    pub fn chips(&self) -> &[Chip] {
        &self.chips
    }

    pub fn len(&self) -> usize {
        self.chips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    pub fn values(&self) -> Vec<String> {
        self.chips.iter().map(|chip| chip.value.clone()).collect()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.chips.iter().any(|chip| chip.value == value)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.chips.iter().position(|chip| chip.active)
    }

    pub fn active(&self) -> Option<&Chip> {
        self.chips.iter().find(|chip| chip.active)
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden
    }

    pub fn add(
        &mut self,
        choices: &mut [Choice],
        value: &str,
        display_text: &str,
        label: Option<&str>,
    ) -> bool {
        if value.is_empty() || self.contains(value) {
            return false;
        }

        let matching = choices
            .iter_mut()
            .filter(|choice| choice.return_value == value)
            .collect::<Vec<_>>();
        if matching.is_empty() && !self.enterable {
            debug!(value, "refusing chip for value outside the choice list");
            return false;
        }

        let mut display = display_text.to_owned();
        for choice in matching {
            choice.selected = true;
            if display.is_empty() {
                display = choice.display_text.clone();
            }
        }
        if display.is_empty() {
            display = value.to_owned();
        }

        self.chips.push(Chip::new(value, &display, label));
        self.refresh();
        true
    }

    pub fn remove(&mut self, choices: &mut [Choice], value: &str) -> bool {
        let Some(position) = self.chips.iter().position(|chip| chip.value == value) else {
            return false;
        };

        self.chips.remove(position);
        for choice in choices
            .iter_mut()
            .filter(|choice| choice.return_value == value)
        {
            choice.selected = false;
        }
        self.widths.remove(value);
        self.refresh();
        true
    }

    pub fn clear(&mut self, choices: &mut [Choice]) -> bool {
        if self.chips.is_empty() {
            return false;
        }
        for choice in choices.iter_mut() {
            if self.contains(&choice.return_value) {
                choice.selected = false;
            }
        }
        self.chips.clear();
        self.widths.clear();
        self.refresh();
        true
    }

    // Unknown values are refused as a whole when the collection is not
    // enterable; nothing is mutated in that case.
    pub fn set_values(&mut self, choices: &mut [Choice], values: &[String]) -> bool {
        if !self.enterable
            && let Some(unknown) = values
                .iter()
                .find(|value| !choices.iter().any(|choice| &choice.return_value == *value))
        {
            debug!(value = %unknown, "refusing value set with an unknown value");
            return false;
        }

        self.clear(choices);
        for value in values {
            self.add(choices, value, "", None);
        }
        true
    }

    pub fn sync_selected(&self, choices: &mut [Choice]) {
        for choice in choices.iter_mut() {
            choice.selected = self.contains(&choice.return_value);
        }
    }

    pub fn activate(&mut self, value: &str) -> Option<&Chip> {
        let index = self.chips.iter().position(|chip| chip.value == value)?;
        self.activate_index(index)
    }

    pub fn activate_index(&mut self, index: usize) -> Option<&Chip> {
        if index >= self.chips.len() {
            return None;
        }
        for (position, chip) in self.chips.iter_mut().enumerate() {
            chip.active = position == index;
        }
        self.chips.get(index)
    }

    pub fn activate_previous(&mut self) -> Option<&Chip> {
        let index = match self.active_index() {
            Some(0) => return None,
            Some(index) => index - 1,
            None => self.chips.len().checked_sub(1)?,
        };
        self.activate_index(index)
    }

    // Walking past the newest chip deactivates everything so focus can
    // return to the input.
    pub fn activate_next(&mut self) -> Option<&Chip> {
        let index = self.active_index()? + 1;
        if index >= self.chips.len() {
            self.deactivate_all();
            return None;
        }
        self.activate_index(index)
    }

    pub fn deactivate_all(&mut self) {
        for chip in &mut self.chips {
            chip.active = false;
        }
    }

    pub fn update_chip(&mut self, value: &str, display_text: &str, label: Option<&str>) -> bool {
        let Some(chip) = self.chips.iter_mut().find(|chip| chip.value == value) else {
            return false;
        };
        chip.display_text = display_text.to_owned();
        chip.label = label.map(str::to_owned);
        self.widths.remove(value);
        self.refresh();
        true
    }

    pub fn recompute_overflow(&mut self, metrics: &ChipMetrics) -> usize {
        self.container_width = Some(metrics.container_width);
        self.indicator_width = metrics.indicator_width;
        self.widths = metrics.chip_widths.clone();
        self.apply_overflow();
        self.hidden
    }

    fn refresh(&mut self) {
        self.apply_overflow();
        self.summary = self
            .chips
            .iter()
            .map(Chip::spoken_text)
            .collect::<Vec<_>>()
            .join(", ");
    }

    fn apply_overflow(&mut self) {
        let Some(container_width) = self.container_width else {
            for chip in &mut self.chips {
                chip.overflow_hidden = false;
            }
            self.hidden = 0;
            return;
        };

        let available = container_width * CHIP_SHARE_NUMERATOR / CHIP_SHARE_DENOMINATOR;
        if self.mark_overflow(available) {
            self.mark_overflow(available - self.indicator_width);
        }
        self.hidden = self.chips.iter().filter(|chip| chip.overflow_hidden).count();
    }

    // Newest first; the most recent chip always stays visible. Returns
    // whether anything was hidden.
    fn mark_overflow(&mut self, available: f32) -> bool {
        let mut used = 0.0;
        let mut overflowing = false;
        for (position, chip) in self.chips.iter_mut().rev().enumerate() {
            let width = self.widths.get(&chip.value).copied().unwrap_or(0.0);
            if position > 0 && !overflowing && used + width > available {
                overflowing = true;
            }
            chip.overflow_hidden = overflowing;
            if !overflowing {
                used += width;
            }
        }
        overflowing
    }
}

#[cfg(test)]
mod tests {
    use super::{ChipCollection, ChipMetrics};
    use crate::model::Choice;
    use std::collections::BTreeMap;

    fn letters() -> Vec<Choice> {
        ["A", "B", "C", "D", "E"]
            .into_iter()
            .map(|letter| Choice::new(letter, letter))
            .collect()
    }

    fn selected_flags_match(chips: &ChipCollection, choices: &[Choice]) -> bool {
        choices
            .iter()
            .all(|choice| choice.selected == chips.contains(&choice.return_value))
    }

    #[test]
    fn add_rejects_duplicates_and_unknown_values_when_not_enterable() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);

        assert!(chips.add(&mut choices, "A", "A", None));
        assert!(!chips.add(&mut choices, "A", "A", None));
        assert!(!chips.add(&mut choices, "Z", "Z", None));
        assert_eq!(chips.values(), vec!["A".to_owned()]);
        assert!(choices[0].selected);
    }

    #[test]
    fn enterable_collection_accepts_free_text() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(true);
        assert!(chips.add(&mut choices, "Zed", "", None));
        assert_eq!(chips.chips()[0].display_text, "Zed");
        assert!(choices.iter().all(|choice| !choice.selected));
    }

    #[test]
    fn removing_a_chip_clears_selection_and_updates_summary() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        chips.add(&mut choices, "A", "A", None);
        chips.add(&mut choices, "B", "B", None);
        assert_eq!(chips.summary(), "A, B");

        assert!(chips.remove(&mut choices, "A"));
        assert_eq!(chips.values(), vec!["B".to_owned()]);
        assert!(!choices[0].selected);
        assert!(choices[1].selected);
        assert_eq!(chips.summary(), "B");
    }

    #[test]
    fn removing_missing_value_is_a_structural_no_op() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        chips.add(&mut choices, "C", "C", Some("Letter"));
        let before = chips.clone();
        let choices_before = choices.clone();

        assert!(!chips.remove(&mut choices, "Q"));
        assert_eq!(chips, before);
        assert_eq!(choices, choices_before);
    }

    #[test]
    fn removing_last_chip_leaves_no_stale_selection() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        chips.add(&mut choices, "E", "E", None);
        chips.remove(&mut choices, "E");
        assert!(chips.is_empty());
        assert!(choices.iter().all(|choice| !choice.selected));
        assert_eq!(chips.summary(), "");
    }

    #[test]
    fn arbitrary_add_remove_sequences_keep_values_unique_and_flags_consistent() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        let mut seed: u32 = 0x2545_f491;

        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let letter = ["A", "B", "C", "D", "E", "Z"][(seed % 6) as usize];
            if seed & 0x100 == 0 {
                chips.add(&mut choices, letter, letter, None);
            } else {
                chips.remove(&mut choices, letter);
            }

            let mut values = chips.values();
            let count = values.len();
            values.sort();
            values.dedup();
            assert_eq!(values.len(), count, "duplicate chip values");
            assert!(selected_flags_match(&chips, &choices));
        }
    }

    #[test]
    fn activate_marks_exactly_one_chip() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        for letter in ["A", "B", "C"] {
            chips.add(&mut choices, letter, letter, None);
        }

        chips.activate("B");
        chips.activate("C");
        let active: Vec<_> = chips.chips().iter().filter(|chip| chip.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].value, "C");

        chips.deactivate_all();
        assert!(chips.active().is_none());
    }

    #[test]
    fn walking_left_and_right_moves_the_active_chip() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        for letter in ["A", "B", "C"] {
            chips.add(&mut choices, letter, letter, None);
        }

        assert_eq!(chips.activate_previous().map(|chip| chip.value.clone()), Some("C".to_owned()));
        assert_eq!(chips.activate_previous().map(|chip| chip.value.clone()), Some("B".to_owned()));
        assert_eq!(chips.activate_previous().map(|chip| chip.value.clone()), Some("A".to_owned()));
        assert!(chips.activate_previous().is_none());
        assert_eq!(chips.active_index(), Some(0));

        chips.activate_next();
        chips.activate_next();
        assert_eq!(chips.active_index(), Some(2));
        assert!(chips.activate_next().is_none());
        assert!(chips.active().is_none());
    }

    #[test]
    fn set_values_refuses_unknown_values_without_mutation() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        chips.add(&mut choices, "A", "A", None);

        assert!(!chips.set_values(&mut choices, &["B".to_owned(), "nope".to_owned()]));
        assert_eq!(chips.values(), vec!["A".to_owned()]);

        assert!(chips.set_values(&mut choices, &["B".to_owned(), "C".to_owned()]));
        assert_eq!(chips.values(), vec!["B".to_owned(), "C".to_owned()]);
        assert!(selected_flags_match(&chips, &choices));
    }

    fn metrics(container_width: f32, chips: &ChipCollection, each: f32) -> ChipMetrics {
        ChipMetrics {
            container_width,
            chip_widths: chips
                .values()
                .into_iter()
                .map(|value| (value, each))
                .collect::<BTreeMap<_, _>>(),
            indicator_width: 0.0,
        }
    }

    #[test]
    fn overflow_hides_oldest_chips_first_and_keeps_newest_visible() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        for letter in ["A", "B", "C", "D", "E"] {
            chips.add(&mut choices, letter, letter, None);
        }

        // 300px container leaves 200px for chips: two 80px chips fit.
        let hidden = chips.recompute_overflow(&metrics(300.0, &chips, 80.0));
        assert_eq!(hidden, 3);
        let flags: Vec<bool> = chips.chips().iter().map(|chip| chip.overflow_hidden).collect();
        assert_eq!(flags, vec![true, true, true, false, false]);

        let hidden = chips.recompute_overflow(&metrics(30.0, &chips, 80.0));
        assert_eq!(hidden, 4);
        assert!(!chips.chips()[4].overflow_hidden);
    }

    #[test]
    fn chips_that_fill_the_budget_exactly_stay_visible() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        for letter in ["A", "B", "C", "D", "E"] {
            chips.add(&mut choices, letter, letter, None);
        }

        // 150px container leaves exactly 100px: two 50px chips.
        assert_eq!(chips.recompute_overflow(&metrics(150.0, &chips, 50.0)), 3);

        let mut few = ChipCollection::new(false);
        let mut choices = letters();
        for letter in ["A", "B", "C"] {
            few.add(&mut choices, letter, letter, None);
        }
        let roomy = ChipMetrics {
            indicator_width: 20.0,
            ..metrics(225.0, &few, 50.0)
        };
        assert_eq!(few.recompute_overflow(&roomy), 0);
    }

    #[test]
    fn overflow_indicator_width_comes_out_of_the_budget() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        for letter in ["A", "B", "C", "D", "E"] {
            chips.add(&mut choices, letter, letter, None);
        }

        let with_marker = ChipMetrics {
            indicator_width: 10.0,
            ..metrics(150.0, &chips, 50.0)
        };
        assert_eq!(chips.recompute_overflow(&with_marker), 4);
        assert!(!chips.chips()[4].overflow_hidden);
    }

    #[test]
    fn shrinking_never_unhides_older_chips() {
        let mut choices = letters();
        let mut chips = ChipCollection::new(false);
        for letter in ["A", "B", "C", "D", "E"] {
            chips.add(&mut choices, letter, letter, None);
        }

        let mut previous_hidden = 0;
        for width in (0..=12).rev().map(|step| step as f32 * 50.0) {
            let hidden = chips.recompute_overflow(&metrics(width, &chips, 60.0));
            assert!(hidden >= previous_hidden);
            previous_hidden = hidden;

            let flags: Vec<bool> = chips.chips().iter().map(|chip| chip.overflow_hidden).collect();
            let first_visible = flags.iter().position(|hidden| !hidden).unwrap_or(flags.len());
            assert!(flags[first_visible..].iter().all(|hidden| !hidden));
            assert!(!flags[flags.len() - 1]);
        }
    }
}
