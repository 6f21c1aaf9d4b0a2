// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::host::{
    ItemCapability, ScopedStorage, StorageScope, SurfaceHost, SurfaceKind, SurfaceLifecycle,
    SurfaceRequest,
};
use crate::ids::{ControlId, RequestSeq};
use crate::layout::{
    DEFAULT_RECENT_LIMIT, PersistedLayout, RecentSearches, load_layout, load_recent, save_layout,
    save_recent,
};
use crate::model::{
    Dependency, FetchRequest, ItemValue, Key, LovPage, LovRecord, LovResult, SortDirection,
    SortSpec,
};
use crate::popup::{PopupAction, PopupController, SurfaceRegistry};
use crate::template::apply_template;

pub const DEFAULT_LOV_DEBOUNCE: Duration = Duration::from_millis(400);
pub const DEFAULT_MAX_ROWS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LovColumn {
    pub name: String,
    pub heading: String,
    pub sortable: bool,
    pub min_width: u32,
}

impl LovColumn {
    pub fn new(name: &str, heading: &str) -> Self {
        Self {
            name: name.to_owned(),
            heading: heading.to_owned(),
            sortable: false,
            min_width: 0,
        }
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn with_min_width(mut self, min_width: u32) -> Self {
        self.min_width = min_width;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LovView {
    #[default]
    Grid,
    List,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
    #[default]
    Incremental,
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LovOptions {
    pub title: Option<String>,
    pub view: LovView,
    pub columns: Vec<LovColumn>,
    pub search_mode: SearchMode,
    pub debounce: Duration,
    pub min_chars: usize,
    pub initial_fetch: bool,
    pub enterable: bool,
    pub multiple: bool,
    pub max_rows: usize,
    pub null_value: Option<String>,
    pub output_map: BTreeMap<String, String>,
    pub recent_limit: usize,
}

impl Default for LovOptions {
    fn default() -> Self {
        Self {
            title: None,
            view: LovView::Grid,
            columns: Vec::new(),
            search_mode: SearchMode::Incremental,
            debounce: DEFAULT_LOV_DEBOUNCE,
            min_chars: 1,
            initial_fetch: true,
            enterable: false,
            multiple: false,
            max_rows: DEFAULT_MAX_ROWS,
            null_value: None,
            output_map: BTreeMap::new(),
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LovPhase {
    Closed,
    Opening,
    Loading,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LovNotice {
    None,
    TypeToSearch,
    NoResults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LovEvent {
    Opened { layout: PersistedLayout },
    FetchRequested { seq: RequestSeq, request: FetchRequest },
    ResultsUpdated { count: usize, more_available: bool },
    CursorMoved(usize),
    SelectionChanged(Vec<String>),
    SortChanged(SortSpec),
    Committed(Vec<LovResult>),
    Cancelled,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Replace,
    Append,
}

impl LovResult {
    pub fn from_record(record: &LovRecord, output_map: &BTreeMap<String, String>) -> Self {
        Self {
            return_value: record.return_value.clone(),
            display_value: Some(record.display_value.clone()),
            outputs: output_map
                .iter()
                .map(|(column, item)| {
                    (item.clone(), record.cell(column).unwrap_or_default().to_owned())
                })
                .collect(),
        }
    }

    pub fn apply_to<I: ItemCapability>(&self, item: &mut I) {
        item.set_value(
            ItemValue::Single(self.return_value.clone()),
            self.display_value.as_deref(),
            false,
        );
    }
}

#[derive(Debug)]
pub struct PopupLovSession<St> {
    id: ControlId,
    options: LovOptions,
    storage: St,
    scope: StorageScope,
    layout: PersistedLayout,
    recent: RecentSearches,
    phase: LovPhase,
    notice: LovNotice,
    popup: PopupController,
    search_text: String,
    executed_text: Option<String>,
    pending: Option<Instant>,
    dependencies: Vec<Dependency>,
    sort: Option<SortSpec>,
    records: Vec<LovRecord>,
    more_available: bool,
    latest: RequestSeq,
    in_flight: Option<(RequestSeq, FetchKind)>,
    selected: BTreeSet<String>,
}

impl<St: ScopedStorage> PopupLovSession<St> {
    // Persisted layout and recent searches are read here and nowhere else.
    pub fn new(id: ControlId, options: LovOptions, storage: St, scope: StorageScope) -> Self {
        let layout = load_layout(&storage, &scope, &id, &options.columns);
        let recent = load_recent(&storage, &scope, &id, options.recent_limit);
        let sort = layout.sort();
        let mut request = SurfaceRequest::of_kind(SurfaceKind::Dialog);
        request.title = options.title.clone();
        let popup = PopupController::new(id.clone(), request);
        Self {
            id,
            options,
            storage,
            scope,
            layout,
            recent,
            phase: LovPhase::Closed,
            notice: LovNotice::None,
            popup,
            search_text: String::new(),
            executed_text: None,
            pending: None,
            dependencies: Vec::new(),
            sort,
            records: Vec::new(),
            more_available: false,
            latest: RequestSeq::default(),
            in_flight: None,
            selected: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &ControlId {
        &self.id
    }

    pub fn options(&self) -> &LovOptions {
        &self.options
    }

    pub fn phase(&self) -> LovPhase {
        self.phase
    }

    pub fn notice(&self) -> LovNotice {
        self.notice
    }

    pub fn layout(&self) -> &PersistedLayout {
        &self.layout
    }

    pub fn recent(&self) -> &RecentSearches {
        &self.recent
    }

    pub fn records(&self) -> &[LovRecord] {
        &self.records
    }

    pub fn more_available(&self) -> bool {
        self.more_available
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.popup.cursor()
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    pub fn storage(&self) -> &St {
        &self.storage
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.phase, LovPhase::Closed | LovPhase::Closing)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn set_dependencies(&mut self, dependencies: Vec<Dependency>) {
        self.dependencies = dependencies;
    }

    // `&CONTROL.` references in the title resolve to dependency values.
    pub fn title(&self) -> Option<String> {
        let substitutions: BTreeMap<&str, &str> = self
            .dependencies
            .iter()
            .map(|dependency| (dependency.control.as_str(), dependency.value.as_str()))
            .collect();
        self.options
            .title
            .as_deref()
            .map(|title| apply_template(title, &substitutions))
    }

    pub fn open<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        initial_search: Option<&str>,
    ) -> Vec<LovEvent> {
        if self.is_open() {
            return Vec::new();
        }
        self.phase = LovPhase::Opening;
        let title = self.title();
        let request = self.popup.request_mut();
        request.title = title;
        request.width = self.layout.width;
        request.height = self.layout.height;
        match self.popup.open(surfaces) {
            Ok(true) => {}
            Ok(false) => {
                self.phase = LovPhase::Closed;
                return Vec::new();
            }
            Err(error) => {
                warn!(control = %self.id, error = %format!("{error:#}"), "dialog open failed");
                self.phase = LovPhase::Closed;
                return Vec::new();
            }
        }

        self.search_text = initial_search.unwrap_or_default().to_owned();
        self.records.clear();
        self.selected.clear();
        self.more_available = false;
        self.executed_text = None;
        self.pending = None;

        let mut events = vec![LovEvent::Opened {
            layout: self.layout.clone(),
        }];
        if self.options.initial_fetch || self.meets_min_chars() {
            events.extend(self.execute_search());
        } else {
            self.phase = LovPhase::Open;
            self.notice = LovNotice::TypeToSearch;
        }
        events
    }

    pub fn set_search_text(&mut self, text: &str, now: Instant) -> Vec<LovEvent> {
        if !self.is_open() || text == self.search_text {
            return Vec::new();
        }
        self.search_text = text.to_owned();
        if self.options.search_mode == SearchMode::Explicit {
            return Vec::new();
        }
        if self.meets_min_chars() || (self.search_text.is_empty() && self.options.initial_fetch) {
            self.pending = Some(now + self.options.debounce);
        } else {
            self.pending = None;
            if !self.options.initial_fetch {
                self.invalidate_in_flight();
                self.records.clear();
                self.more_available = false;
                self.notice = LovNotice::TypeToSearch;
                return vec![LovEvent::ResultsUpdated {
                    count: 0,
                    more_available: false,
                }];
            }
        }
        Vec::new()
    }

    pub fn tick(&mut self, now: Instant) -> Vec<LovEvent> {
        self.popup.settle();
        match self.pending {
            Some(due) if now >= due => {
                self.pending = None;
                self.execute_search()
            }
            _ => Vec::new(),
        }
    }

    pub fn search_now(&mut self) -> Vec<LovEvent> {
        if !self.is_open() {
            return Vec::new();
        }
        self.pending = None;
        self.execute_search()
    }

    pub fn handle_key<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        key: Key,
        now: Instant,
    ) -> Vec<LovEvent> {
        if !self.is_open() {
            return Vec::new();
        }
        if matches!(key, Key::Enter | Key::Tab { .. }) && self.single_result_ready() {
            debug!(control = %self.id, "single result, selecting without a click");
            return self.select(surfaces, 0);
        }

        match self.popup.handle_key(key, self.records.len()) {
            PopupAction::Moved(index) => vec![LovEvent::CursorMoved(index)],
            PopupAction::Commit(Some(index)) => self.select(surfaces, index),
            PopupAction::Commit(None) => {
                if self.options.multiple && !self.selected.is_empty() {
                    self.commit(surfaces)
                } else {
                    self.search_now()
                }
            }
            PopupAction::CommitAndAdvance(Some(index)) if !self.options.multiple => {
                self.select(surfaces, index)
            }
            PopupAction::CommitAndAdvance(_) => Vec::new(),
            PopupAction::Dismiss => self.cancel(surfaces),
            PopupAction::Ignored => self.edit_search(key, now),
        }
    }

    pub fn pick<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        index: usize,
    ) -> Vec<LovEvent> {
        match self.popup.pick(index, self.records.len()) {
            PopupAction::Commit(Some(index)) => self.select(surfaces, index),
            _ => Vec::new(),
        }
    }

    pub fn commit<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) -> Vec<LovEvent> {
        let results: Vec<LovResult> = self
            .records
            .iter()
            .filter(|record| self.selected.contains(&record.return_value))
            .map(|record| LovResult::from_record(record, &self.options.output_map))
            .collect();
        if results.is_empty() {
            return Vec::new();
        }
        self.finish(surfaces, Some(results))
    }

    pub fn choose_null<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
    ) -> Vec<LovEvent> {
        let Some(null_value) = self.options.null_value.clone() else {
            return Vec::new();
        };
        let result = LovResult {
            return_value: null_value,
            display_value: None,
            outputs: self
                .options
                .output_map
                .values()
                .map(|item| (item.clone(), String::new()))
                .collect(),
        };
        self.finish(surfaces, Some(vec![result]))
    }

    pub fn cancel<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) -> Vec<LovEvent> {
        self.finish(surfaces, None)
    }

    pub fn on_lifecycle<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        event: SurfaceLifecycle,
    ) -> Vec<LovEvent> {
        match event {
            SurfaceLifecycle::Resize { width, height } => {
                self.resize_stop(width, height);
                Vec::new()
            }
            SurfaceLifecycle::Close => {
                if !self.popup.on_lifecycle(surfaces, event) {
                    return Vec::new();
                }
                self.reset_after_close();
                vec![LovEvent::Cancelled, LovEvent::Closed]
            }
            SurfaceLifecycle::Init | SurfaceLifecycle::Open => {
                self.popup.on_lifecycle(surfaces, event);
                Vec::new()
            }
        }
    }

    pub fn resize_stop(&mut self, width: u32, height: u32) {
        self.layout.width = (width > 0).then_some(width);
        self.layout.height = (height > 0).then_some(height);
        self.persist_layout();
    }

    pub fn resize_column(&mut self, column: &str, width: u32) -> bool {
        let Some(spec) = self.options.columns.iter().find(|spec| spec.name == column) else {
            return false;
        };
        let width = width.max(spec.min_width);
        self.layout.column_widths.insert(column.to_owned(), width);
        self.persist_layout();
        true
    }

    // Same column flips direction; a different column starts ascending.
    pub fn sort_by(&mut self, column: &str) -> Vec<LovEvent> {
        if self.options.view != LovView::Grid {
            return Vec::new();
        }
        let sortable = self
            .options
            .columns
            .iter()
            .any(|spec| spec.name == column && spec.sortable);
        if !sortable {
            debug!(control = %self.id, column, "ignoring sort on unsortable column");
            return Vec::new();
        }

        let direction = match &self.sort {
            Some(current) if current.column == column => current.direction.flipped(),
            _ => SortDirection::Asc,
        };
        let sort = SortSpec {
            column: column.to_owned(),
            direction,
        };
        self.sort = Some(sort.clone());
        self.layout.sort_column = Some(sort.column.clone());
        self.layout.sort_direction = Some(direction);
        self.persist_layout();

        let mut events = vec![LovEvent::SortChanged(sort)];
        if self.is_open() && (self.executed_text.is_some() || self.options.initial_fetch) {
            events.extend(self.execute_search());
        }
        events
    }

    pub fn load_more(&mut self) -> Vec<LovEvent> {
        if !self.is_open() || !self.more_available || self.in_flight.is_some() {
            return Vec::new();
        }
        let first_row = self.records.len() + 1;
        let text = self.executed_text.clone().unwrap_or_default();
        self.issue(FetchKind::Append, &text, first_row)
    }

    pub fn deliver(&mut self, seq: RequestSeq, result: Result<LovPage>) -> Vec<LovEvent> {
        let Some((in_flight, kind)) = self.in_flight else {
            debug!(control = %self.id, seq = seq.get(), "dropping response with nothing in flight");
            return Vec::new();
        };
        if in_flight != seq || seq != self.latest {
            debug!(control = %self.id, seq = seq.get(), "dropping stale page");
            return Vec::new();
        }
        self.in_flight = None;
        if self.phase == LovPhase::Loading {
            self.phase = LovPhase::Open;
        }

        match (result, kind) {
            (Ok(page), FetchKind::Replace) => {
                self.records = page.records;
                self.more_available = page.more_available;
                self.popup.reset_cursor(0);
            }
            (Ok(page), FetchKind::Append) => {
                self.records.extend(page.records);
                self.more_available = page.more_available;
            }
            (Err(error), kind) => {
                warn!(control = %self.id, error = %format!("{error:#}"), "page fetch failed");
                if kind == FetchKind::Replace {
                    self.records.clear();
                }
                self.more_available = false;
            }
        }
        self.notice = if self.records.is_empty() {
            LovNotice::NoResults
        } else {
            LovNotice::None
        };
        vec![LovEvent::ResultsUpdated {
            count: self.records.len(),
            more_available: self.more_available,
        }]
    }

    fn edit_search(&mut self, key: Key, now: Instant) -> Vec<LovEvent> {
        let mut text = self.search_text.clone();
        match key {
            Key::Backspace => {
                text.pop();
            }
            _ => match key.printable() {
                Some(ch) => text.push(ch),
                None => return Vec::new(),
            },
        }
        self.set_search_text(&text, now)
    }

    fn single_result_ready(&self) -> bool {
        self.options.search_mode == SearchMode::Incremental
            && !self.options.enterable
            && !self.options.multiple
            && self.records.len() == 1
            && self.in_flight.is_none()
            && self.pending.is_none()
            && self.executed_text.as_deref() == Some(self.search_text.as_str())
    }

    fn meets_min_chars(&self) -> bool {
        !self.search_text.is_empty() && self.search_text.chars().count() >= self.options.min_chars
    }

    fn execute_search(&mut self) -> Vec<LovEvent> {
        let text = self.search_text.trim().to_owned();
        if !text.is_empty() && self.recent.record(&text) {
            save_recent(&mut self.storage, &self.scope, &self.id, &self.recent);
        }
        self.executed_text = Some(self.search_text.clone());
        self.selected.clear();
        self.issue(FetchKind::Replace, &text, 1)
    }

    fn issue(&mut self, kind: FetchKind, text: &str, first_row: usize) -> Vec<LovEvent> {
        self.latest = self.latest.next();
        self.in_flight = Some((self.latest, kind));
        if kind == FetchKind::Replace {
            self.phase = LovPhase::Loading;
        }
        let request = FetchRequest {
            search_text: (!text.is_empty()).then(|| text.to_owned()),
            sort: self.sort.clone(),
            first_row,
            max_rows: Some(self.options.max_rows),
            dependencies: self.dependencies.clone(),
        };
        debug!(control = %self.id, seq = self.latest.get(), first_row, "page requested");
        vec![LovEvent::FetchRequested {
            seq: self.latest,
            request,
        }]
    }

    fn invalidate_in_flight(&mut self) {
        if self.in_flight.take().is_some() {
            self.latest = self.latest.next();
        }
        if self.phase == LovPhase::Loading {
            self.phase = LovPhase::Open;
        }
    }

    fn select<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        index: usize,
    ) -> Vec<LovEvent> {
        let Some(record) = self.records.get(index) else {
            return Vec::new();
        };
        if !self.options.multiple {
            let result = LovResult::from_record(record, &self.options.output_map);
            return self.finish(surfaces, Some(vec![result]));
        }
        let value = record.return_value.clone();
        if !self.selected.remove(&value) {
            self.selected.insert(value);
        }
        vec![LovEvent::SelectionChanged(
            self.selected.iter().cloned().collect(),
        )]
    }

    fn finish<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        results: Option<Vec<LovResult>>,
    ) -> Vec<LovEvent> {
        if !self.is_open() {
            return Vec::new();
        }
        self.phase = LovPhase::Closing;
        self.popup.close(surfaces);
        self.reset_after_close();
        match results {
            Some(results) => {
                debug!(control = %self.id, count = results.len(), "popup LOV committed");
                vec![LovEvent::Committed(results), LovEvent::Closed]
            }
            None => vec![LovEvent::Cancelled, LovEvent::Closed],
        }
    }

    fn reset_after_close(&mut self) {
        self.invalidate_in_flight();
        self.pending = None;
        self.phase = LovPhase::Closed;
        self.notice = LovNotice::None;
    }

    fn persist_layout(&mut self) {
        save_layout(&mut self.storage, &self.scope, &self.id, &self.layout);
    }
}

#[cfg(test)]
mod tests {
    use super::{LovColumn, LovEvent, LovNotice, LovOptions, LovPhase, PopupLovSession, SearchMode};
    use crate::host::{ScopedStorage, StorageScope, SurfaceHost, SurfaceRequest};
    use crate::ids::{ControlId, RequestSeq, SurfaceId};
    use crate::model::{FetchRequest, Key, LovPage, LovRecord, SortDirection};
    use crate::popup::SurfaceRegistry;
    use anyhow::{Result, anyhow};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct Memory {
        items: BTreeMap<String, String>,
        writes: usize,
    }

    impl ScopedStorage for Memory {
        fn get_item(&self, key: &str) -> Result<Option<String>> {
            Ok(self.items.get(key).cloned())
        }

        fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
            self.writes += 1;
            self.items.insert(key.to_owned(), value.to_owned());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Host {
        opened: Vec<SurfaceRequest>,
    }

    impl SurfaceHost for Host {
        fn open(&mut self, _control: &ControlId, request: &SurfaceRequest) -> Result<SurfaceId> {
            self.opened.push(request.clone());
            Ok(SurfaceId::new(self.opened.len() as u64))
        }

        fn close(&mut self, _surface: SurfaceId) -> Result<()> {
            Ok(())
        }
    }

    fn options() -> LovOptions {
        LovOptions {
            columns: vec![
                LovColumn::new("ENAME", "Name").sortable(),
                LovColumn::new("JOB", "Job").sortable(),
            ],
            output_map: BTreeMap::from([("JOB".to_owned(), "P7_JOB".to_owned())]),
            ..LovOptions::default()
        }
    }

    fn session(options: LovOptions) -> PopupLovSession<Memory> {
        PopupLovSession::new(
            ControlId::from("P7_EMP"),
            options,
            Memory::default(),
            StorageScope::new("100", "7", "ADMIN"),
        )
    }

    fn fetch(events: &[LovEvent]) -> (RequestSeq, FetchRequest) {
        events
            .iter()
            .find_map(|event| match event {
                LovEvent::FetchRequested { seq, request } => Some((*seq, request.clone())),
                _ => None,
            })
            .expect("expected a fetch request")
    }

    fn king() -> LovRecord {
        LovRecord::new("7839", "KING").with_cell("JOB", "PRESIDENT")
    }

    #[test]
    fn open_with_initial_fetch_enters_loading_then_open() {
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(options());
        let events = lov.open(&mut surfaces, None);
        assert_eq!(lov.phase(), LovPhase::Loading);
        let (seq, request) = fetch(&events);
        assert_eq!(request.first_row, 1);
        assert_eq!(request.max_rows, Some(50));

        lov.deliver(seq, Ok(LovPage { records: vec![king()], more_available: false }));
        assert_eq!(lov.phase(), LovPhase::Open);
        assert_eq!(lov.notice(), LovNotice::None);
    }

    #[test]
    fn no_initial_fetch_shows_type_to_search_until_an_empty_response() {
        let start = Instant::now();
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(LovOptions {
            initial_fetch: false,
            ..options()
        });
        let events = lov.open(&mut surfaces, None);
        assert!(events.iter().all(|event| !matches!(event, LovEvent::FetchRequested { .. })));
        assert_eq!(lov.notice(), LovNotice::TypeToSearch);

        lov.set_search_text("zz", start);
        assert_eq!(lov.notice(), LovNotice::TypeToSearch);
        let events = lov.tick(start + Duration::from_millis(400));
        let (seq, _) = fetch(&events);
        assert_eq!(lov.notice(), LovNotice::TypeToSearch);
        lov.deliver(seq, Ok(LovPage::default()));
        assert_eq!(lov.notice(), LovNotice::NoResults);
    }

    #[test]
    fn explicit_mode_searches_only_on_enter() {
        let start = Instant::now();
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(LovOptions {
            search_mode: SearchMode::Explicit,
            initial_fetch: false,
            ..options()
        });
        lov.open(&mut surfaces, None);
        for ch in "ki".chars() {
            lov.handle_key(&mut surfaces, Key::Char(ch), start);
        }
        assert!(lov.tick(start + Duration::from_secs(5)).is_empty());

        let events = lov.handle_key(&mut surfaces, Key::Enter, start);
        let (_, request) = fetch(&events);
        assert_eq!(request.search_text.as_deref(), Some("ki"));
    }

    #[test]
    fn single_result_commits_on_tab() {
        let start = Instant::now();
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(LovOptions {
            initial_fetch: false,
            ..options()
        });
        lov.open(&mut surfaces, None);
        lov.set_search_text("kin", start);
        let (seq, _) = fetch(&lov.tick(start + Duration::from_millis(450)));
        lov.deliver(seq, Ok(LovPage { records: vec![king()], more_available: false }));

        let events = lov.handle_key(&mut surfaces, Key::Tab { shift: false }, start);
        let [LovEvent::Committed(results), LovEvent::Closed] = events.as_slice() else {
            panic!("expected a commit, got {events:?}");
        };
        assert_eq!(results[0].return_value, "7839");
        assert_eq!(results[0].outputs.get("P7_JOB").map(String::as_str), Some("PRESIDENT"));
        assert!(!surfaces.is_open(lov.id()));
    }

    #[test]
    fn escape_cancels_without_result() {
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(options());
        lov.open(&mut surfaces, None);
        let events = lov.handle_key(&mut surfaces, Key::Escape, Instant::now());
        assert_eq!(events, vec![LovEvent::Cancelled, LovEvent::Closed]);
        assert_eq!(lov.phase(), LovPhase::Closed);
    }

    #[test]
    fn sort_toggles_and_persists_layout() {
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(options());
        lov.open(&mut surfaces, None);

        let events = lov.sort_by("ENAME");
        let (_, request) = fetch(&events);
        assert_eq!(request.sort.map(|sort| sort.direction), Some(SortDirection::Asc));
        lov.sort_by("ENAME");
        assert_eq!(lov.sort().map(|sort| sort.direction), Some(SortDirection::Desc));
        lov.sort_by("JOB");
        assert_eq!(lov.sort().map(|sort| sort.direction), Some(SortDirection::Asc));
        assert!(lov.sort_by("MISSING").is_empty());

        lov.resize_stop(800, 600);
        assert!(lov.resize_column("JOB", 120));
        assert_eq!(lov.storage().writes, 5);

        let key = "lovkit.100.7.ADMIN.P7_EMP.layout";
        let stored = lov.storage().items.get(key).cloned().unwrap_or_default();
        assert!(stored.contains("\"sort_column\":\"JOB\""));
        assert!(stored.contains("\"width\":800"));
    }

    #[test]
    fn layout_is_read_once_and_sizes_the_dialog() {
        let mut storage = Memory::default();
        storage.items.insert(
            "lovkit.100.7.ADMIN.P7_EMP.layout".to_owned(),
            r#"{"width":700,"height":500,"sort_column":"GONE","sort_direction":"Desc"}"#.to_owned(),
        );
        let mut lov = PopupLovSession::new(
            ControlId::from("P7_EMP"),
            options(),
            storage,
            StorageScope::new("100", "7", "ADMIN"),
        );
        assert_eq!(lov.sort(), None);

        let mut surfaces = SurfaceRegistry::new(Host::default());
        lov.open(&mut surfaces, None);
        let opened = &surfaces.host().opened[0];
        assert_eq!((opened.width, opened.height), (Some(700), Some(500)));
    }

    #[test]
    fn load_more_appends_next_page() {
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(LovOptions {
            max_rows: 2,
            ..options()
        });
        let (seq, _) = fetch(&lov.open(&mut surfaces, None));
        lov.deliver(
            seq,
            Ok(LovPage {
                records: vec![king(), LovRecord::new("7698", "BLAKE")],
                more_available: true,
            }),
        );

        let (seq, request) = fetch(&lov.load_more());
        assert_eq!(request.first_row, 3);
        assert!(lov.load_more().is_empty());
        lov.deliver(
            seq,
            Ok(LovPage {
                records: vec![LovRecord::new("7782", "CLARK")],
                more_available: false,
            }),
        );
        assert_eq!(lov.records().len(), 3);
        assert!(!lov.more_available());
    }

    #[test]
    fn stale_pages_are_dropped() {
        let start = Instant::now();
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(options());
        let (first, _) = fetch(&lov.open(&mut surfaces, None));
        let (second, _) = fetch(&lov.search_now());

        assert!(lov.deliver(first, Ok(LovPage { records: vec![king()], more_available: false })).is_empty());
        lov.deliver(second, Err(anyhow!("timeout")));
        assert!(lov.records().is_empty());
        assert_eq!(lov.notice(), LovNotice::NoResults);
        assert!(lov.tick(start).is_empty());
    }

    #[test]
    fn multiple_selection_toggles_and_commits_all() {
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(LovOptions {
            multiple: true,
            ..options()
        });
        let (seq, _) = fetch(&lov.open(&mut surfaces, None));
        lov.deliver(
            seq,
            Ok(LovPage {
                records: vec![king(), LovRecord::new("7698", "BLAKE")],
                more_available: false,
            }),
        );

        lov.pick(&mut surfaces, 0);
        lov.pick(&mut surfaces, 1);
        let events = lov.pick(&mut surfaces, 0);
        assert_eq!(events, vec![LovEvent::SelectionChanged(vec!["7698".to_owned()])]);

        let events = lov.commit(&mut surfaces);
        let [LovEvent::Committed(results), LovEvent::Closed] = events.as_slice() else {
            panic!("expected a commit, got {events:?}");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].display_value.as_deref(), Some("BLAKE"));
    }

    #[test]
    fn null_value_commits_blank_outputs() {
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(LovOptions {
            null_value: Some(String::new()),
            ..options()
        });
        lov.open(&mut surfaces, None);
        let events = lov.choose_null(&mut surfaces);
        let [LovEvent::Committed(results), LovEvent::Closed] = events.as_slice() else {
            panic!("expected a commit, got {events:?}");
        };
        assert_eq!(results[0].return_value, "");
        assert_eq!(results[0].outputs.get("P7_JOB").map(String::as_str), Some(""));
    }

    #[test]
    fn executed_searches_are_recorded() {
        let mut surfaces = SurfaceRegistry::new(Host::default());
        let mut lov = session(options());
        lov.open(&mut surfaces, Some("king"));
        assert_eq!(lov.recent().entries(), ["king"]);
        assert!(
            lov.storage()
                .items
                .contains_key("lovkit.100.7.ADMIN.P7_EMP.recent")
        );
    }
}
