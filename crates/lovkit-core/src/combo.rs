// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use std::time::Instant;
use tracing::{debug, warn};

use crate::chips::{ChipCollection, ChipMetrics};
use crate::highlight::plain_text;
use crate::host::{ItemCapability, SurfaceHost, SurfaceKind, SurfaceLifecycle, SurfaceRequest};
use crate::ids::{ControlId, RequestSeq};
use crate::model::{Chip, Choice, ItemValue, Key, TextDirection};
use crate::popup::{PopupAction, PopupController, SurfaceRegistry};
use crate::source::{
    ChoiceSource, CustomOutcome, FilterSettings, VisibleChoice, VisibleRow, filter_choices,
    group_rows,
};
use crate::template::format_message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Messages {
    pub chip_hint: String,
    pub no_results: String,
    pub type_to_search: String,
    pub overflow: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            chip_hint: "%0, press Backspace to delete".to_owned(),
            no_results: "No results found".to_owned(),
            type_to_search: "Type to search".to_owned(),
            overflow: "+%0".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    SelectOne,
    SelectMany,
    EnterOne,
    EnterMany,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboOptions {
    pub enterable: bool,
    pub multi_valued: bool,
    pub filter: FilterSettings,
    pub direction: TextDirection,
    pub separator: Option<char>,
    pub surface: SurfaceKind,
    pub label: Option<String>,
    pub messages: Messages,
}

impl Default for ComboOptions {
    fn default() -> Self {
        Self {
            enterable: false,
            multi_valued: false,
            filter: FilterSettings::default(),
            direction: TextDirection::Ltr,
            separator: None,
            surface: SurfaceKind::Dropdown,
            label: None,
            messages: Messages::default(),
        }
    }
}

impl ComboOptions {
    pub fn behavior(&self) -> Behavior {
        match (self.enterable, self.multi_valued) {
            (false, false) => Behavior::SelectOne,
            (false, true) => Behavior::SelectMany,
            (true, false) => Behavior::EnterOne,
            (true, true) => Behavior::EnterMany,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    Input,
    Chip(String),
    ChipRemove(String),
    ClearButton,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComboInput {
    Focus,
    Blur,
    Key(Key),
    TextChanged(String),
    MouseDown(ClickTarget),
    Pick(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComboEvent {
    Changed(ItemValue),
    PopupOpened,
    PopupClosed,
    CursorMoved(usize),
    SearchRequested { seq: RequestSeq, text: String },
    ResultsUpdated { count: usize },
    CustomOpen { search_char: Option<char> },
    LiveSummary(String),
    Announce(String),
    ChipActivated(String),
    ChipEditRequested(String),
}

pub trait Control {
    fn id(&self) -> &ControlId;
    fn value(&self) -> ItemValue;
    fn set_value(&mut self, value: ItemValue, display: Option<&str>, suppress_change: bool)
    -> bool;
    fn replace_choices(&mut self, choices: Vec<Choice>);

    fn clear_choices(&mut self) {
        self.replace_choices(Vec::new());
    }

    fn is_empty(&self) -> bool {
        self.value().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ValueState {
    Single { value: String, display: String },
    Multi(ChipCollection),
}

#[derive(Debug)]
pub struct ComboSelect<I> {
    id: ControlId,
    item: I,
    options: ComboOptions,
    source: ChoiceSource,
    choices: Vec<Choice>,
    visible: Vec<VisibleChoice>,
    value: ValueState,
    input_text: String,
    focused: bool,
    filtering: bool,
    last_filter_text: String,
    saved: Option<Choice>,
    popup: PopupController,
}

impl<I: ItemCapability> ComboSelect<I> {
    pub fn new(
        id: ControlId,
        item: I,
        options: ComboOptions,
        source: ChoiceSource,
        choices: Vec<Choice>,
    ) -> Self {
        let kind = if source.is_custom() {
            SurfaceKind::Custom
        } else {
            options.surface
        };
        let popup = PopupController::new(id.clone(), SurfaceRequest::of_kind(kind));
        let value = if options.multi_valued {
            ValueState::Multi(ChipCollection::new(options.enterable))
        } else {
            ValueState::Single {
                value: String::new(),
                display: String::new(),
            }
        };
        let mut combo = Self {
            id,
            item,
            options,
            source,
            choices,
            visible: Vec::new(),
            value,
            input_text: String::new(),
            focused: false,
            filtering: false,
            last_filter_text: String::new(),
            saved: None,
            popup,
        };
        combo.load_from_item();
        combo.refilter();
        combo
    }

    pub fn id(&self) -> &ControlId {
        &self.id
    }

    pub fn options(&self) -> &ComboOptions {
        &self.options
    }

    pub fn item(&self) -> &I {
        &self.item
    }

    pub fn item_mut(&mut self) -> &mut I {
        &mut self.item
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn visible(&self) -> &[VisibleChoice] {
        &self.visible
    }

    pub fn rows(&self) -> Vec<VisibleRow<'_>> {
        group_rows(&self.choices, &self.visible)
    }

    pub fn chips(&self) -> Option<&ChipCollection> {
        match &self.value {
            ValueState::Multi(chips) => Some(chips),
            ValueState::Single { .. } => None,
        }
    }

    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    pub fn popup(&self) -> &PopupController {
        &self.popup
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn is_filtering(&self) -> bool {
        self.filtering
    }

    pub fn saved_value(&self) -> Option<&Choice> {
        self.saved.as_ref()
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.value, ValueState::Multi(_))
    }

    pub fn value(&self) -> ItemValue {
        match &self.value {
            ValueState::Single { value, .. } => ItemValue::Single(value.clone()),
            ValueState::Multi(chips) => ItemValue::Multi(chips.values()),
        }
    }

    pub fn display_value(&self) -> String {
        match &self.value {
            ValueState::Single { display, .. } => display.clone(),
            ValueState::Multi(chips) => chips.summary().to_owned(),
        }
    }

    pub fn message(&self) -> Option<String> {
        if !self.popup.is_open() || !self.visible.is_empty() || self.source.is_custom() {
            return None;
        }
        if let ChoiceSource::Async(search) = &self.source
            && self.input_text.chars().count() < search.min_chars()
        {
            return Some(self.options.messages.type_to_search.clone());
        }
        Some(self.options.messages.no_results.clone())
    }

    pub fn handle<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        input: ComboInput,
        now: Instant,
    ) -> Vec<ComboEvent> {
        match input {
            ComboInput::Focus => {
                self.popup.settle();
                self.focused = true;
                Vec::new()
            }
            ComboInput::Blur => self.blur(surfaces),
            ComboInput::Key(key) => {
                self.popup.settle();
                self.key(surfaces, key, now)
            }
            ComboInput::TextChanged(text) => {
                self.popup.settle();
                self.text_changed(surfaces, text, now)
            }
            ComboInput::MouseDown(target) => {
                self.popup.settle();
                self.mouse_down(surfaces, target)
            }
            ComboInput::Pick(index) => {
                let action = self.popup.pick(index, self.visible.len());
                self.apply_popup_action(surfaces, action)
            }
        }
    }

    pub fn settle(&mut self) {
        self.popup.settle();
    }

    pub fn tick(&mut self, now: Instant) -> Vec<ComboEvent> {
        self.popup.settle();
        let ChoiceSource::Async(search) = &mut self.source else {
            return Vec::new();
        };
        match search.poll(now) {
            Some((seq, text)) => vec![ComboEvent::SearchRequested { seq, text }],
            None => Vec::new(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.source {
            ChoiceSource::Async(search) => search.next_deadline(),
            _ => None,
        }
    }

    pub fn deliver_search<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        seq: RequestSeq,
        result: Result<Vec<Choice>>,
    ) -> Vec<ComboEvent> {
        let ChoiceSource::Async(search) = &mut self.source else {
            return Vec::new();
        };
        let Some(choices) = search.accept(seq, &self.input_text, result) else {
            return Vec::new();
        };

        self.choices = choices;
        if let ValueState::Multi(chips) = &self.value {
            chips.sync_selected(&mut self.choices);
        }
        self.refilter();

        let mut events = vec![ComboEvent::ResultsUpdated {
            count: self.visible.len(),
        }];
        if self.visible.is_empty() {
            events.extend(self.close_popup(surfaces));
            events.push(ComboEvent::Announce(
                self.options.messages.no_results.clone(),
            ));
        } else if self.focused {
            events.extend(self.open_popup(surfaces, None));
        }
        events
    }

    pub fn custom_surface_closed<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        outcome: CustomOutcome,
    ) -> Vec<ComboEvent> {
        if let ChoiceSource::Custom(surface) = &mut self.source {
            surface.finish();
        }
        let mut events = Vec::new();
        if self.popup.on_lifecycle(surfaces, SurfaceLifecycle::Close) {
            events.push(ComboEvent::PopupClosed);
        }
        match outcome {
            CustomOutcome::Picked {
                return_value,
                display_text,
            } => events.extend(self.commit_choice(&return_value, &display_text)),
            CustomOutcome::Cancelled => debug!(control = %self.id, "custom surface cancelled"),
        }
        events
    }

    pub fn set_value(
        &mut self,
        value: ItemValue,
        display: Option<&str>,
        suppress_change: bool,
    ) -> bool {
        let enterable = self.options.enterable;
        match &mut self.value {
            ValueState::Single {
                value: current,
                display: shown,
            } => {
                let raw = value.values().first().map(|v| (*v).to_owned()).unwrap_or_default();
                let known = self.choices.iter().find(|choice| choice.return_value == raw);
                if !raw.is_empty() && known.is_none() && !enterable {
                    debug!(control = %self.id, value = %raw, "refusing unknown value");
                    return false;
                }
                let text = display
                    .map(str::to_owned)
                    .or_else(|| known.map(|choice| plain_text(&choice.display_text)))
                    .unwrap_or_else(|| raw.clone());
                *current = raw.clone();
                *shown = text.clone();
                self.input_text = text.clone();
                self.item
                    .set_value(ItemValue::Single(raw), Some(&text), suppress_change);
                self.end_filtering();
            }
            // Chips live outside the input, so a pending filter survives.
            ValueState::Multi(chips) => {
                let values: Vec<String> = value.values().into_iter().map(str::to_owned).collect();
                if !chips.set_values(&mut self.choices, &values) {
                    debug!(control = %self.id, "refusing value set with unknown values");
                    return false;
                }
                self.item
                    .set_value(ItemValue::Multi(chips.values()), None, suppress_change);
            }
        }
        self.refilter();
        true
    }

    pub fn clear(&mut self) -> Vec<ComboEvent> {
        let changed = match &mut self.value {
            ValueState::Single { value, display } => {
                let changed = !value.is_empty();
                value.clear();
                display.clear();
                changed
            }
            ValueState::Multi(chips) => chips.clear(&mut self.choices),
        };
        self.input_text.clear();
        self.end_filtering();
        self.refilter();
        if !changed {
            return Vec::new();
        }
        debug!(control = %self.id, "value cleared");
        self.changed_events()
    }

    pub fn remove_chip(&mut self, value: &str) -> Vec<ComboEvent> {
        let ValueState::Multi(chips) = &mut self.value else {
            return Vec::new();
        };
        if !chips.remove(&mut self.choices, value) {
            return Vec::new();
        }
        self.refilter();
        self.changed_events()
    }

    pub fn update_chip(&mut self, value: &str, display_text: &str, label: Option<&str>) -> bool {
        match &mut self.value {
            ValueState::Multi(chips) => chips.update_chip(value, display_text, label),
            ValueState::Single { .. } => false,
        }
    }

    pub fn recompute_overflow(&mut self, metrics: &ChipMetrics) -> Option<String> {
        let ValueState::Multi(chips) = &mut self.value else {
            return None;
        };
        let hidden = chips.recompute_overflow(metrics);
        (hidden > 0).then(|| {
            format_message(&self.options.messages.overflow, &[hidden.to_string().as_str()])
        })
    }

    pub fn replace_choices(&mut self, choices: Vec<Choice>) {
        self.choices = choices;
        if let ValueState::Multi(chips) = &self.value {
            chips.sync_selected(&mut self.choices);
        }
        self.refilter();
    }

    pub fn destroy<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) {
        self.close_popup(surfaces);
        if let ChoiceSource::Async(search) = &mut self.source {
            search.cancel();
        }
        self.focused = false;
        self.end_filtering();
    }

    fn load_from_item(&mut self) {
        let initial = self.item.value();
        match &mut self.value {
            ValueState::Single { value, display } => {
                let raw = initial.values().first().map(|v| (*v).to_owned()).unwrap_or_default();
                *display = self
                    .choices
                    .iter()
                    .find(|choice| choice.return_value == raw)
                    .map(|choice| plain_text(&choice.display_text))
                    .unwrap_or_else(|| raw.clone());
                *value = raw;
                self.input_text = display.clone();
            }
            ValueState::Multi(chips) => {
                for raw in initial.values() {
                    if !chips.add(&mut self.choices, raw, "", self.options.label.as_deref()) {
                        debug!(control = %self.id, value = raw, "skipping initial value");
                    }
                }
            }
        }
    }

    fn key<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        key: Key,
        now: Instant,
    ) -> Vec<ComboEvent> {
        if self.popup.is_open() && !self.source.is_custom() {
            let action = self.popup.handle_key(key, self.visible.len());
            if action != PopupAction::Ignored {
                return self.apply_popup_action(surfaces, action);
            }
        }

        if self.input_text.is_empty()
            && let Some(events) = self.chip_key(key)
        {
            return events;
        }

        match key {
            Key::Down | Key::Up => self.open_popup(surfaces, None),
            Key::Enter if self.options.enterable && self.filtering => self.commit_text(surfaces),
            Key::Escape => self.close_popup(surfaces),
            Key::Backspace => {
                if self.input_text.pop().is_some() {
                    self.after_edit(surfaces, now)
                } else {
                    Vec::new()
                }
            }
            _ => match key.printable() {
                Some(ch) if self.source.is_custom() && !self.options.enterable => {
                    self.open_popup(surfaces, Some(ch))
                }
                Some(ch) => {
                    self.input_text.push(ch);
                    self.after_edit(surfaces, now)
                }
                None => Vec::new(),
            },
        }
    }

    // Keys on an empty input walk and edit the chip list. `None` lets the
    // key fall through to the input.
    fn chip_key(&mut self, key: Key) -> Option<Vec<ComboEvent>> {
        let (back, forward) = match self.options.direction {
            TextDirection::Ltr => (Key::Left, Key::Right),
            TextDirection::Rtl => (Key::Right, Key::Left),
        };
        let ValueState::Multi(chips) = &mut self.value else {
            return None;
        };

        match key {
            Key::Backspace | Key::Delete => {
                if let Some(active) = chips.active().map(|chip| chip.value.clone()) {
                    return Some(self.remove_chip(&active));
                }
                let chip = chips.activate_previous()?.clone();
                Some(self.chip_activated(&chip))
            }
            _ if key == back => {
                let chip = chips.activate_previous().cloned();
                Some(chip.map(|chip| self.chip_activated(&chip)).unwrap_or_default())
            }
            _ if key == forward => {
                chips.active()?;
                let chip = chips.activate_next().cloned();
                Some(chip.map(|chip| self.chip_activated(&chip)).unwrap_or_default())
            }
            Key::Enter | Key::Space => {
                let value = chips.active()?.value.clone();
                Some(vec![ComboEvent::ChipEditRequested(value)])
            }
            Key::Escape => {
                chips.active()?;
                chips.deactivate_all();
                Some(Vec::new())
            }
            _ => {
                if key.printable().is_some() {
                    chips.deactivate_all();
                }
                None
            }
        }
    }

    fn chip_activated(&self, chip: &Chip) -> Vec<ComboEvent> {
        let hint = format_message(
            &self.options.messages.chip_hint,
            &[chip.spoken_text().as_str()],
        );
        vec![
            ComboEvent::ChipActivated(chip.value.clone()),
            ComboEvent::Announce(hint),
        ]
    }

    fn mouse_down<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        target: ClickTarget,
    ) -> Vec<ComboEvent> {
        match target {
            ClickTarget::Input => {
                if self.popup.is_open() {
                    self.close_popup(surfaces)
                } else {
                    self.open_popup(surfaces, None)
                }
            }
            ClickTarget::Chip(value) => {
                let ValueState::Multi(chips) = &mut self.value else {
                    return Vec::new();
                };
                let chip = chips.activate(&value).cloned();
                match chip {
                    Some(chip) => self.chip_activated(&chip),
                    None => Vec::new(),
                }
            }
            ClickTarget::ChipRemove(value) => self.remove_chip(&value),
            ClickTarget::ClearButton => self.clear(),
        }
    }

    fn text_changed<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        text: String,
        now: Instant,
    ) -> Vec<ComboEvent> {
        if text == self.input_text {
            return Vec::new();
        }
        self.input_text = text;
        self.after_edit(surfaces, now)
    }

    fn after_edit<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        now: Instant,
    ) -> Vec<ComboEvent> {
        let mut events = self.split_entered_values();
        self.start_filtering();
        self.last_filter_text = self.input_text.clone();

        match &mut self.source {
            ChoiceSource::Static => {
                self.refilter();
                if !self.popup.is_open() {
                    events.extend(self.open_popup(surfaces, None));
                }
            }
            ChoiceSource::Async(search) => {
                if !search.schedule(&self.input_text, now) {
                    self.visible.clear();
                    self.popup.reset_cursor(0);
                    events.extend(self.close_popup(surfaces));
                }
            }
            ChoiceSource::Custom(_) => {}
        }
        events
    }

    // Enterable multi-valued controls turn every separator-terminated part
    // of the input into a chip; the unterminated tail stays in the input.
    fn split_entered_values(&mut self) -> Vec<ComboEvent> {
        let Some(separator) = self.options.separator else {
            return Vec::new();
        };
        if !self.options.enterable || !self.is_multi() || !self.input_text.contains(separator) {
            return Vec::new();
        }

        let text = std::mem::take(&mut self.input_text);
        let mut parts: Vec<&str> = text.split(separator).collect();
        self.input_text = parts.pop().unwrap_or_default().to_owned();
        let mut added = false;
        for part in parts.into_iter().map(str::trim).filter(|part| !part.is_empty()) {
            added |= self.add_typed_chip(part);
        }
        if added { self.changed_events() } else { Vec::new() }
    }

    fn start_filtering(&mut self) {
        if self.filtering {
            return;
        }
        self.filtering = true;
        if let ValueState::Single { value, display } = &self.value {
            self.saved = Some(Choice::new(value.clone(), display.clone()));
        }
        debug!(control = %self.id, "filtering started");
    }

    fn end_filtering(&mut self) {
        self.filtering = false;
        self.saved = None;
        self.last_filter_text.clear();
        if let ChoiceSource::Async(search) = &mut self.source {
            search.cancel();
        }
    }

    fn refilter(&mut self) {
        let exclude_selected = self.is_multi();
        if self.source.is_async() {
            self.visible = self
                .choices
                .iter()
                .enumerate()
                .filter(|(_, choice)| !(exclude_selected && choice.selected))
                .map(|(index, choice)| VisibleChoice {
                    index,
                    highlighted: choice.display_text.clone(),
                })
                .collect();
        } else {
            let text = if self.filtering {
                self.input_text.as_str()
            } else {
                ""
            };
            let settings = FilterSettings {
                exclude_selected,
                ..self.options.filter
            };
            self.visible = filter_choices(&self.choices, text, &settings);
        }
        self.popup.reset_cursor(self.visible.len());
    }

    fn open_popup<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        search_char: Option<char>,
    ) -> Vec<ComboEvent> {
        if self.popup.is_open() {
            return Vec::new();
        }
        let nothing_to_show = match &self.source {
            ChoiceSource::Static => self.choices.is_empty(),
            ChoiceSource::Async(search) => {
                self.choices.is_empty() && !search.has_pending() && !search.is_in_flight()
            }
            ChoiceSource::Custom(_) => false,
        };
        if nothing_to_show {
            debug!(control = %self.id, "nothing to show, popup stays closed");
            return Vec::new();
        }

        self.popup.request_mut().search_char = search_char;
        match self.popup.open(surfaces) {
            Ok(true) => {}
            Ok(false) => return Vec::new(),
            Err(error) => {
                warn!(control = %self.id, error = %format!("{error:#}"), "popup open failed");
                return Vec::new();
            }
        }

        let mut events = vec![ComboEvent::PopupOpened];
        if let ChoiceSource::Custom(surface) = &mut self.source {
            surface.open(search_char);
            events.push(ComboEvent::CustomOpen { search_char });
        } else {
            self.refilter();
        }
        events
    }

    fn close_popup<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) -> Vec<ComboEvent> {
        if let ChoiceSource::Custom(surface) = &mut self.source {
            surface.finish();
        }
        if self.popup.close(surfaces) {
            vec![ComboEvent::PopupClosed]
        } else {
            Vec::new()
        }
    }

    fn apply_popup_action<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        action: PopupAction,
    ) -> Vec<ComboEvent> {
        match action {
            PopupAction::Moved(index) => vec![ComboEvent::CursorMoved(index)],
            PopupAction::Commit(Some(index)) | PopupAction::CommitAndAdvance(Some(index)) => {
                let mut events = self.commit_visible(index);
                events.extend(self.close_popup(surfaces));
                events
            }
            PopupAction::Commit(None) => {
                if self.options.enterable && self.filtering {
                    self.commit_text(surfaces)
                } else {
                    Vec::new()
                }
            }
            PopupAction::CommitAndAdvance(None) => {
                let mut events = if self.options.enterable && self.filtering {
                    self.commit_text(surfaces)
                } else {
                    Vec::new()
                };
                events.extend(self.close_popup(surfaces));
                events
            }
            PopupAction::Dismiss => self.close_popup(surfaces),
            PopupAction::Ignored => Vec::new(),
        }
    }

    fn commit_visible(&mut self, index: usize) -> Vec<ComboEvent> {
        let Some(choice) = self
            .visible
            .get(index)
            .and_then(|entry| self.choices.get(entry.index))
        else {
            return Vec::new();
        };
        let value = choice.return_value.clone();
        let display = plain_text(&choice.display_text);
        self.commit_choice(&value, &display)
    }

    fn commit_choice(&mut self, value: &str, display: &str) -> Vec<ComboEvent> {
        let changed = match &mut self.value {
            ValueState::Single {
                value: current,
                display: shown,
            } => {
                let changed = *current != value;
                *current = value.to_owned();
                *shown = display.to_owned();
                self.input_text = display.to_owned();
                changed
            }
            ValueState::Multi(chips) => {
                self.input_text.clear();
                chips.add(
                    &mut self.choices,
                    value,
                    display,
                    self.options.label.as_deref(),
                )
            }
        };
        self.end_filtering();
        self.refilter();
        if !changed {
            return Vec::new();
        }
        debug!(control = %self.id, value, "value committed");
        self.changed_events()
    }

    fn commit_text<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) -> Vec<ComboEvent> {
        let text = self.input_text.trim().to_owned();
        let mut events = if self.is_multi() {
            let parts: Vec<String> = match self.options.separator {
                Some(separator) => text.split(separator).map(str::to_owned).collect(),
                None => vec![text],
            };
            let mut added = false;
            for part in parts.iter().map(|part| part.trim()).filter(|part| !part.is_empty()) {
                added |= self.add_typed_chip(part);
            }
            self.input_text.clear();
            self.end_filtering();
            self.refilter();
            if added { self.changed_events() } else { Vec::new() }
        } else if text.is_empty() {
            self.clear()
        } else {
            let (value, display) = self.resolve_typed(&text);
            self.commit_choice(&value, &display)
        };
        events.extend(self.close_popup(surfaces));
        events
    }

    fn add_typed_chip(&mut self, text: &str) -> bool {
        let (value, display) = self.resolve_typed(text);
        let ValueState::Multi(chips) = &mut self.value else {
            return false;
        };
        chips.add(
            &mut self.choices,
            &value,
            &display,
            self.options.label.as_deref(),
        )
    }

    fn resolve_typed(&self, text: &str) -> (String, String) {
        let lowered = text.to_lowercase();
        self.choices
            .iter()
            .find(|choice| {
                choice.return_value == text
                    || plain_text(&choice.display_text).to_lowercase() == lowered
            })
            .map(|choice| {
                (
                    choice.return_value.clone(),
                    plain_text(&choice.display_text),
                )
            })
            .unwrap_or_else(|| (text.to_owned(), text.to_owned()))
    }

    fn blur<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) -> Vec<ComboEvent> {
        self.focused = false;
        let settling = self.popup.closing_latched();
        let mut events = self.close_popup(surfaces);

        if self.filtering {
            match self.options.behavior() {
                Behavior::EnterOne | Behavior::EnterMany if !settling => {
                    events.extend(self.commit_text(surfaces));
                }
                // Dismissed edits stay in the input uncommitted.
                Behavior::EnterOne | Behavior::EnterMany => {
                    self.end_filtering();
                    self.refilter();
                }
                Behavior::SelectOne | Behavior::SelectMany => self.restore(),
            }
        }
        if let ValueState::Multi(chips) = &mut self.value {
            chips.deactivate_all();
        }
        events
    }

    fn restore(&mut self) {
        match &mut self.value {
            ValueState::Single { value, display } => {
                if let Some(saved) = self.saved.take() {
                    *value = saved.return_value;
                    *display = saved.display_text;
                }
                self.input_text = display.clone();
                let restored = ItemValue::Single(value.clone());
                if self.item.value() != restored {
                    self.item.set_value(restored, Some(display.as_str()), true);
                }
                debug!(control = %self.id, value = %value, "value restored after abandoned edit");
            }
            ValueState::Multi(_) => self.input_text.clear(),
        }
        self.end_filtering();
        self.refilter();
    }

    fn changed_events(&mut self) -> Vec<ComboEvent> {
        let value = self.value();
        let display = match &self.value {
            ValueState::Single { display, .. } => Some(display.clone()),
            ValueState::Multi(_) => None,
        };
        self.item.set_value(value.clone(), display.as_deref(), false);
        let mut events = vec![ComboEvent::Changed(value)];
        if let ValueState::Multi(chips) = &self.value {
            events.push(ComboEvent::LiveSummary(chips.summary().to_owned()));
        }
        events
    }
}

impl<I: ItemCapability> Control for ComboSelect<I> {
    fn id(&self) -> &ControlId {
        &self.id
    }

    fn value(&self) -> ItemValue {
        ComboSelect::value(self)
    }

    fn set_value(
        &mut self,
        value: ItemValue,
        display: Option<&str>,
        suppress_change: bool,
    ) -> bool {
        ComboSelect::set_value(self, value, display, suppress_change)
    }

    fn replace_choices(&mut self, choices: Vec<Choice>) {
        ComboSelect::replace_choices(self, choices);
    }
}
