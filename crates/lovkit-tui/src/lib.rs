// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use lovkit_core::highlight::{MATCH_CLOSE, MATCH_OPEN, plain_text};
use lovkit_core::{
    AsyncSearch, CascadeController, CascadeEvent, CascadeSpec, ChipMetrics, Choice, ChoiceSource,
    ComboEvent, ComboInput, ComboOptions, ComboSelect, ControlId, DEFAULT_LOV_DEBOUNCE,
    DEFAULT_MAX_ROWS, DEFAULT_MIN_CHARS, DEFAULT_SEARCH_DEBOUNCE, Dependency, FetchRequest,
    FetchResponse, FilterSettings, ItemCapability, ItemValue, Key, LovColumn, LovEvent, LovNotice,
    LovOptions, LovPage, LovPhase, LovResult, PersistedLayout, PopupLovSession, RequestSeq,
    ScopedStorage, SortDirection, SortSpec, StorageScope, SurfaceHost, SurfaceId,
    SurfaceLifecycle, SurfaceRegistry, SurfaceRequest, VisibleRow,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Row, Table, TableState};
use std::collections::BTreeMap;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEPT: &str = "P1_DEPT";
pub const EMP: &str = "P1_EMP";
pub const TAGS: &str = "P1_TAGS";
pub const LOOKUP: &str = "P1_LOOKUP";
pub const MANAGER: &str = "P1_MGR";
pub const MANAGER_JOB: &str = "P1_MGR_JOB";

const TAG_CHOICES: [&str; 5] = ["urgent", "review", "remote", "onsite", "contract"];
const LABEL_WIDTH: u16 = 16;
const DROPDOWN_ROWS: u16 = 8;
const CHIP_PADDING: f32 = 3.0;
const DIALOG_WIDTH: u32 = 72;
const DIALOG_HEIGHT: u32 = 18;
const MIN_DIALOG_WIDTH: u32 = 32;
const RESIZE_STEP: i32 = 4;
const POLL_INTERVAL: Duration = Duration::from_millis(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageItem {
    value: ItemValue,
    display: String,
    changes: usize,
}

impl PageItem {
    pub fn single() -> Self {
        Self {
            value: ItemValue::empty_single(),
            display: String::new(),
            changes: 0,
        }
    }

    pub fn multi() -> Self {
        Self {
            value: ItemValue::Multi(Vec::new()),
            display: String::new(),
            changes: 0,
        }
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn changes(&self) -> usize {
        self.changes
    }
}

impl ItemCapability for PageItem {
    fn value(&self) -> ItemValue {
        self.value.clone()
    }

    fn set_value(&mut self, value: ItemValue, display: Option<&str>, suppress_change: bool) {
        self.display = display
            .map(str::to_owned)
            .unwrap_or_else(|| value.to_submit_string());
        self.value = value;
        if !suppress_change {
            self.changes += 1;
        }
    }
}

// Surfaces are drawn by `render`; the host only tracks which are open and
// what each asked for.
#[derive(Debug, Default)]
pub struct TerminalSurfaces {
    next: u64,
    open: BTreeMap<SurfaceId, (ControlId, SurfaceRequest)>,
}

impl TerminalSurfaces {
    pub fn request_for(&self, control: &ControlId) -> Option<&SurfaceRequest> {
        self.open
            .values()
            .find(|(owner, _)| owner == control)
            .map(|(_, request)| request)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

impl SurfaceHost for TerminalSurfaces {
    fn open(&mut self, control: &ControlId, request: &SurfaceRequest) -> Result<SurfaceId> {
        self.next += 1;
        let surface = SurfaceId::new(self.next);
        self.open.insert(surface, (control.clone(), request.clone()));
        debug!(control = %control, kind = ?request.kind, "surface opened");
        Ok(surface)
    }

    fn close(&mut self, surface: SurfaceId) -> Result<()> {
        self.open
            .remove(&surface)
            .map(|_| ())
            .ok_or_else(|| anyhow!("surface {} is not open", surface.get()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    Search,
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    ClearStatus {
        token: u64,
    },
    Choices {
        purpose: FetchPurpose,
        control: ControlId,
        seq: RequestSeq,
        result: Result<FetchResponse, String>,
    },
    Page {
        control: ControlId,
        seq: RequestSeq,
        result: Result<LovPage, String>,
    },
}

pub trait LovRuntime {
    fn fetch_choices(&mut self, control: &ControlId, request: &FetchRequest)
    -> Result<FetchResponse>;
    fn fetch_page(&mut self, control: &ControlId, request: &FetchRequest) -> Result<LovPage>;

    fn spawn_choices(
        &mut self,
        purpose: FetchPurpose,
        control: ControlId,
        seq: RequestSeq,
        request: FetchRequest,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let result = self
            .fetch_choices(&control, &request)
            .map_err(|error| format!("{error:#}"));
        tx.send(InternalEvent::Choices {
            purpose,
            control,
            seq,
            result,
        })
        .map_err(|_| anyhow!("choice event channel closed"))
    }

    fn spawn_page(
        &mut self,
        control: ControlId,
        seq: RequestSeq,
        request: FetchRequest,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let result = self
            .fetch_page(&control, &request)
            .map_err(|error| format!("{error:#}"));
        tx.send(InternalEvent::Page {
            control,
            seq,
            result,
        })
        .map_err(|_| anyhow!("page event channel closed"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormSettings {
    pub scope: StorageScope,
    pub filter: FilterSettings,
    pub search_debounce: Duration,
    pub min_chars: usize,
    pub lov_debounce: Duration,
    pub lov_max_rows: usize,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            scope: StorageScope::new("lovkit", "1", "default"),
            filter: FilterSettings::default(),
            search_debounce: DEFAULT_SEARCH_DEBOUNCE,
            min_chars: DEFAULT_MIN_CHARS,
            lov_debounce: DEFAULT_LOV_DEBOUNCE,
            lov_max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Combo(ControlId),
    Lov,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSpec {
    field: Field,
    label: &'static str,
}

pub struct FormState<St> {
    controls: BTreeMap<ControlId, ComboSelect<PageItem>>,
    fields: Vec<FieldSpec>,
    focus: usize,
    surfaces: SurfaceRegistry<TerminalSurfaces>,
    cascade: CascadeController,
    lov: PopupLovSession<St>,
    lov_item: PageItem,
    lov_outputs: BTreeMap<String, String>,
    overflow: BTreeMap<ControlId, String>,
    status: Option<String>,
    status_token: u64,
}

impl<St: ScopedStorage> FormState<St> {
    pub fn new(settings: &FormSettings, storage: St) -> Result<Self> {
        let dept = ControlId::from(DEPT);
        let emp = ControlId::from(EMP);
        let tags = ControlId::from(TAGS);
        let lookup = ControlId::from(LOOKUP);

        let select_one = ComboOptions {
            filter: settings.filter,
            ..ComboOptions::default()
        };
        let tag_options = ComboOptions {
            enterable: true,
            multi_valued: true,
            separator: Some(','),
            label: Some("Tag".to_owned()),
            filter: settings.filter,
            ..ComboOptions::default()
        };
        let tag_choices = TAG_CHOICES
            .iter()
            .map(|tag| Choice::new(*tag, *tag))
            .collect();

        let mut controls = BTreeMap::new();
        controls.insert(
            dept.clone(),
            ComboSelect::new(
                dept.clone(),
                PageItem::single(),
                select_one.clone(),
                ChoiceSource::Static,
                Vec::new(),
            ),
        );
        controls.insert(
            emp.clone(),
            ComboSelect::new(
                emp.clone(),
                PageItem::single(),
                select_one.clone(),
                ChoiceSource::Static,
                Vec::new(),
            ),
        );
        controls.insert(
            tags.clone(),
            ComboSelect::new(
                tags.clone(),
                PageItem::multi(),
                tag_options,
                ChoiceSource::Static,
                tag_choices,
            ),
        );
        controls.insert(
            lookup.clone(),
            ComboSelect::new(
                lookup.clone(),
                PageItem::single(),
                select_one,
                ChoiceSource::Async(AsyncSearch::new(
                    settings.search_debounce,
                    settings.min_chars,
                )),
                Vec::new(),
            ),
        );

        let mut cascade = CascadeController::new();
        cascade
            .register(
                emp.clone(),
                CascadeSpec {
                    depends_on: vec![dept.clone()],
                    optimize_refresh: true,
                },
            )
            .context("register employee cascade")?;

        let lov_options = LovOptions {
            title: Some("Select manager".to_owned()),
            columns: vec![
                LovColumn::new("ENAME", "Name").sortable().with_min_width(10),
                LovColumn::new("JOB", "Job").sortable().with_min_width(10),
                LovColumn::new("DEPTNO", "Dept").with_min_width(4),
            ],
            debounce: settings.lov_debounce,
            min_chars: settings.min_chars,
            max_rows: settings.lov_max_rows,
            null_value: Some(String::new()),
            output_map: BTreeMap::from([("JOB".to_owned(), MANAGER_JOB.to_owned())]),
            ..LovOptions::default()
        };
        let lov = PopupLovSession::new(
            ControlId::from(MANAGER),
            lov_options,
            storage,
            settings.scope.clone(),
        );

        let mut form = Self {
            controls,
            fields: vec![
                FieldSpec {
                    field: Field::Combo(dept.clone()),
                    label: "Department",
                },
                FieldSpec {
                    field: Field::Combo(emp),
                    label: "Employee",
                },
                FieldSpec {
                    field: Field::Combo(tags),
                    label: "Tags",
                },
                FieldSpec {
                    field: Field::Combo(lookup),
                    label: "Quick search",
                },
                FieldSpec {
                    field: Field::Lov,
                    label: "Manager",
                },
            ],
            focus: 0,
            surfaces: SurfaceRegistry::new(TerminalSurfaces::default()),
            cascade,
            lov,
            lov_item: PageItem::single(),
            lov_outputs: BTreeMap::new(),
            overflow: BTreeMap::new(),
            status: None,
            status_token: 0,
        };
        if let Some(combo) = form.controls.get_mut(&dept) {
            combo.handle(&mut form.surfaces, ComboInput::Focus, Instant::now());
        }
        Ok(form)
    }

    pub fn load_static_choices<R: LovRuntime>(&mut self, runtime: &mut R) -> Result<()> {
        let dept = ControlId::from(DEPT);
        let request = FetchRequest {
            first_row: 1,
            ..FetchRequest::default()
        };
        let response = runtime
            .fetch_choices(&dept, &request)
            .with_context(|| format!("load {dept} choices"))?;
        if let Some(combo) = self.controls.get_mut(&dept) {
            combo.replace_choices(response.values);
        }
        Ok(())
    }

    pub fn control(&self, id: &str) -> Option<&ComboSelect<PageItem>> {
        self.controls.get(&ControlId::from(id))
    }

    pub fn lov(&self) -> &PopupLovSession<St> {
        &self.lov
    }

    pub fn lov_item(&self) -> &PageItem {
        &self.lov_item
    }

    pub fn lov_outputs(&self) -> &BTreeMap<String, String> {
        &self.lov_outputs
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn surfaces(&self) -> &SurfaceRegistry<TerminalSurfaces> {
        &self.surfaces
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.controls
            .values()
            .filter_map(ComboSelect::next_deadline)
            .chain(self.lov.next_deadline())
            .min()
    }

    // Chip widths are measured in terminal cells before every draw so the
    // overflow marker matches what fits on the line.
    pub fn layout_chips(&mut self, width: u16) {
        let container_width = f32::from(width.saturating_sub(LABEL_WIDTH + 2));
        for (id, combo) in &mut self.controls {
            let Some(chips) = combo.chips() else {
                continue;
            };
            let metrics = ChipMetrics {
                container_width,
                chip_widths: chips
                    .chips()
                    .iter()
                    .map(|chip| {
                        let cells = chip.display_text.chars().count() as f32;
                        (chip.value.clone(), cells + CHIP_PADDING)
                    })
                    .collect(),
                indicator_width: format!("+{} ", chips.len()).chars().count() as f32,
            };
            match combo.recompute_overflow(&metrics) {
                Some(marker) => {
                    self.overflow.insert(id.clone(), marker);
                }
                None => {
                    self.overflow.remove(id);
                }
            }
        }
    }

    fn focused(&self) -> Option<&Field> {
        self.fields.get(self.focus).map(|spec| &spec.field)
    }

    fn emit_status(&mut self, tx: &Sender<InternalEvent>, message: impl Into<String>) {
        self.status = Some(message.into());
        self.status_token = self.status_token.saturating_add(1);
        schedule_status_clear(tx, self.status_token);
    }

    fn send<R: LovRuntime>(
        &mut self,
        runtime: &mut R,
        tx: &Sender<InternalEvent>,
        id: &ControlId,
        input: ComboInput,
        now: Instant,
    ) {
        let Some(combo) = self.controls.get_mut(id) else {
            return;
        };
        let events = combo.handle(&mut self.surfaces, input, now);
        self.apply_combo_events(runtime, tx, id, events);
    }

    fn move_focus<R: LovRuntime>(
        &mut self,
        runtime: &mut R,
        tx: &Sender<InternalEvent>,
        forward: bool,
        now: Instant,
    ) {
        if let Some(Field::Combo(id)) = self.focused().cloned() {
            self.send(runtime, tx, &id, ComboInput::Blur, now);
        }
        let count = self.fields.len();
        self.focus = if forward {
            (self.focus + 1) % count
        } else {
            (self.focus + count - 1) % count
        };
        if let Some(Field::Combo(id)) = self.focused().cloned() {
            self.send(runtime, tx, &id, ComboInput::Focus, now);
        }
    }

    fn apply_combo_events<R: LovRuntime>(
        &mut self,
        runtime: &mut R,
        tx: &Sender<InternalEvent>,
        control: &ControlId,
        events: Vec<ComboEvent>,
    ) {
        for event in events {
            match event {
                ComboEvent::Changed(value) => {
                    debug!(control = %control, value = %value.to_submit_string(), "value changed");
                    let cascade = self.cascade.source_changed(&mut self.controls, control);
                    self.apply_cascade_events(runtime, tx, cascade);
                }
                ComboEvent::SearchRequested { seq, text } => {
                    let spawned = runtime.spawn_choices(
                        FetchPurpose::Search,
                        control.clone(),
                        seq,
                        FetchRequest::search(&text),
                        tx.clone(),
                    );
                    if let Err(error) = spawned {
                        self.emit_status(tx, format!("search failed: {error}"));
                    }
                }
                ComboEvent::Announce(message) | ComboEvent::LiveSummary(message) => {
                    self.emit_status(tx, message);
                }
                ComboEvent::ChipEditRequested(value) => {
                    debug!(control = %control, value = %value, "chip edit requested");
                }
                _ => {}
            }
        }
    }

    fn apply_cascade_events<R: LovRuntime>(
        &mut self,
        runtime: &mut R,
        tx: &Sender<InternalEvent>,
        events: Vec<CascadeEvent>,
    ) {
        for event in events {
            match event {
                CascadeEvent::Fetch {
                    target,
                    seq,
                    request,
                } => {
                    let spawned =
                        runtime.spawn_choices(FetchPurpose::Cascade, target, seq, request, tx.clone());
                    if let Err(error) = spawned {
                        self.emit_status(tx, format!("refresh failed: {error}"));
                    }
                }
                CascadeEvent::Changed(target) => {
                    debug!(control = %target, "dependent control refreshed");
                }
                CascadeEvent::BeforeRefresh(_) | CascadeEvent::AfterRefresh(_) => {}
            }
        }
    }

    fn open_lov<R: LovRuntime>(
        &mut self,
        runtime: &mut R,
        tx: &Sender<InternalEvent>,
        initial_search: Option<&str>,
    ) {
        let dept = ControlId::from(DEPT);
        let dependencies = self
            .controls
            .get(&dept)
            .map(ComboSelect::value)
            .filter(|value| !value.is_empty())
            .map(|value| {
                vec![Dependency {
                    control: dept.clone(),
                    value: value.to_submit_string(),
                }]
            })
            .unwrap_or_default();
        self.lov.set_dependencies(dependencies);
        let events = self.lov.open(&mut self.surfaces, initial_search);
        self.apply_lov_events(runtime, tx, events);
    }

    fn resize_dialog(&mut self, delta: i32) {
        let layout = self.lov.layout();
        let width = layout
            .width
            .unwrap_or(DIALOG_WIDTH)
            .saturating_add_signed(delta)
            .max(MIN_DIALOG_WIDTH);
        let height = layout.height.unwrap_or(DIALOG_HEIGHT);
        self.lov
            .on_lifecycle(&mut self.surfaces, SurfaceLifecycle::Resize { width, height });
    }

    fn apply_lov_events<R: LovRuntime>(
        &mut self,
        runtime: &mut R,
        tx: &Sender<InternalEvent>,
        events: Vec<LovEvent>,
    ) {
        for event in events {
            match event {
                LovEvent::FetchRequested { seq, request } => {
                    let spawned = runtime.spawn_page(self.lov.id().clone(), seq, request, tx.clone());
                    if let Err(error) = spawned {
                        self.emit_status(tx, format!("lookup failed: {error}"));
                    }
                }
                LovEvent::Committed(results) => self.apply_lov_results(&results),
                LovEvent::SortChanged(sort) => {
                    let message = format!("sorted by {} {}", sort.column, sort.direction.as_str());
                    self.emit_status(tx, message);
                }
                LovEvent::Cancelled => debug!(control = %self.lov.id(), "lookup cancelled"),
                _ => {}
            }
        }
    }

    fn apply_lov_results(&mut self, results: &[LovResult]) {
        match results {
            [] => {}
            [result] => {
                result.apply_to(&mut self.lov_item);
                self.lov_outputs = result.outputs.clone();
            }
            many => {
                let values = many
                    .iter()
                    .map(|result| result.return_value.clone())
                    .collect();
                let display = many
                    .iter()
                    .map(|result| {
                        result
                            .display_value
                            .clone()
                            .unwrap_or_else(|| result.return_value.clone())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                self.lov_item
                    .set_value(ItemValue::Multi(values), Some(&display), false);
                self.lov_outputs.clear();
            }
        }
    }

    fn clear_lov_item(&mut self) {
        self.lov_item
            .set_value(ItemValue::empty_single(), None, false);
        self.lov_outputs.clear();
    }
}

pub fn run_app<St: ScopedStorage, R: LovRuntime>(
    form: &mut FormState<St>,
    runtime: &mut R,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    let (internal_tx, internal_rx) = mpsc::channel();

    if let Err(error) = form.load_static_choices(runtime) {
        warn!(error = %format!("{error:#}"), "initial choices unavailable");
        form.emit_status(&internal_tx, format!("load failed: {error}"));
    }

    let mut result = Ok(());
    loop {
        process_internal_events(form, runtime, &internal_tx, &internal_rx);
        tick(form, runtime, &internal_tx, Instant::now());

        match terminal.size() {
            Ok(size) => form.layout_chips(size.width),
            Err(error) => {
                result = Err(error).context("read terminal size");
                break;
            }
        }
        if let Err(error) = terminal.draw(|frame| render(frame, form)) {
            result = Err(error).context("draw frame");
            break;
        }

        let timeout = poll_timeout(form.next_deadline(), Instant::now());
        let has_event = match event::poll(timeout).context("poll event") {
            Ok(has_event) => has_event,
            Err(error) => {
                result = Err(error);
                break;
            }
        };
        if has_event {
            match event::read().context("read event") {
                Ok(Event::Key(key)) => {
                    if handle_key_event(form, runtime, &internal_tx, key, Instant::now()) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn poll_timeout(deadline: Option<Instant>, now: Instant) -> Duration {
    deadline
        .map(|due| due.saturating_duration_since(now))
        .map_or(POLL_INTERVAL, |wait| wait.min(POLL_INTERVAL))
}

fn schedule_status_clear(tx: &Sender<InternalEvent>, token: u64) {
    let sender = tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(4));
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn process_internal_events<St: ScopedStorage, R: LovRuntime>(
    form: &mut FormState<St>,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == form.status_token => {
                form.status = None;
            }
            InternalEvent::ClearStatus { .. } => {}
            InternalEvent::Choices {
                purpose: FetchPurpose::Search,
                control,
                seq,
                result,
            } => {
                let Some(combo) = form.controls.get_mut(&control) else {
                    continue;
                };
                let result = result
                    .map(|response| response.values)
                    .map_err(anyhow::Error::msg);
                let events = combo.deliver_search(&mut form.surfaces, seq, result);
                form.apply_combo_events(runtime, tx, &control, events);
            }
            InternalEvent::Choices {
                purpose: FetchPurpose::Cascade,
                control,
                seq,
                result,
            } => {
                if let Err(error) = &result {
                    form.emit_status(tx, format!("refresh of {control} failed: {error}"));
                }
                let events = form.cascade.deliver(
                    &mut form.controls,
                    &control,
                    seq,
                    result.map_err(anyhow::Error::msg),
                );
                form.apply_cascade_events(runtime, tx, events);
            }
            InternalEvent::Page {
                control,
                seq,
                result,
            } => {
                if &control != form.lov.id() {
                    continue;
                }
                let events = form.lov.deliver(seq, result.map_err(anyhow::Error::msg));
                form.apply_lov_events(runtime, tx, events);
            }
        }
    }
}

fn tick<St: ScopedStorage, R: LovRuntime>(
    form: &mut FormState<St>,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    now: Instant,
) {
    let ids: Vec<ControlId> = form.controls.keys().cloned().collect();
    for id in ids {
        let Some(combo) = form.controls.get_mut(&id) else {
            continue;
        };
        let events = combo.tick(now);
        form.apply_combo_events(runtime, tx, &id, events);
    }
    let events = form.lov.tick(now);
    form.apply_lov_events(runtime, tx, events);
}

fn map_key(key: KeyEvent) -> Option<Key> {
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let mapped = match key.code {
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Escape,
        KeyCode::Tab => Key::Tab { shift },
        KeyCode::BackTab => Key::Tab { shift: true },
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Delete => Key::Delete,
        KeyCode::Char(_)
            if key
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
        {
            return None;
        }
        KeyCode::Char(' ') => Key::Space,
        KeyCode::Char(ch) => Key::Char(ch),
        _ => return None,
    };
    Some(mapped)
}

fn handle_key_event<St: ScopedStorage, R: LovRuntime>(
    form: &mut FormState<St>,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    key: KeyEvent,
    now: Instant,
) -> bool {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && key.code == KeyCode::Char('q') {
        return true;
    }

    if form.lov.is_open() {
        handle_lov_key(form, runtime, tx, key, now);
        return false;
    }

    match form.focused().cloned() {
        Some(Field::Combo(id)) => {
            if ctrl && key.code == KeyCode::Char('u') {
                let Some(combo) = form.controls.get_mut(&id) else {
                    return false;
                };
                let events = combo.clear();
                form.apply_combo_events(runtime, tx, &id, events);
                return false;
            }
            let Some(mapped) = map_key(key) else {
                return false;
            };
            form.send(runtime, tx, &id, ComboInput::Key(mapped), now);
            if let Key::Tab { shift } = mapped {
                form.move_focus(runtime, tx, !shift, now);
            }
        }
        Some(Field::Lov) => {
            let Some(mapped) = map_key(key) else {
                return false;
            };
            match mapped {
                Key::Tab { shift } => form.move_focus(runtime, tx, !shift, now),
                Key::Enter | Key::Down | Key::Space => form.open_lov(runtime, tx, None),
                Key::Backspace | Key::Delete => form.clear_lov_item(),
                _ => {
                    if let Some(ch) = mapped.printable() {
                        form.open_lov(runtime, tx, Some(&ch.to_string()));
                    }
                }
            }
        }
        None => {}
    }
    false
}

fn handle_lov_key<St: ScopedStorage, R: LovRuntime>(
    form: &mut FormState<St>,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    key: KeyEvent,
    now: Instant,
) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let events = match key.code {
        KeyCode::Char('s') if ctrl => {
            match next_sort_column(&form.lov.options().columns, form.lov.sort()) {
                Some(column) => form.lov.sort_by(&column),
                None => Vec::new(),
            }
        }
        KeyCode::Char('l') if ctrl => form.lov.load_more(),
        KeyCode::Char('e') if ctrl => form.lov.choose_null(&mut form.surfaces),
        KeyCode::Right if ctrl => {
            form.resize_dialog(RESIZE_STEP);
            Vec::new()
        }
        KeyCode::Left if ctrl => {
            form.resize_dialog(-RESIZE_STEP);
            Vec::new()
        }
        _ => match map_key(key) {
            Some(mapped) => form.lov.handle_key(&mut form.surfaces, mapped, now),
            None => Vec::new(),
        },
    };
    form.apply_lov_events(runtime, tx, events);
}

// An ascending column flips to descending first, then sorting moves on to
// the next sortable column.
fn next_sort_column(columns: &[LovColumn], sort: Option<&SortSpec>) -> Option<String> {
    let sortable: Vec<&str> = columns
        .iter()
        .filter(|column| column.sortable)
        .map(|column| column.name.as_str())
        .collect();
    let first = *sortable.first()?;
    let next = match sort {
        Some(current)
            if current.direction == SortDirection::Asc
                && sortable.contains(&current.column.as_str()) =>
        {
            current.column.as_str()
        }
        Some(current) => sortable
            .iter()
            .position(|name| *name == current.column)
            .and_then(|position| sortable.get(position + 1))
            .copied()
            .unwrap_or(first),
        None => first,
    };
    Some(next.to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DropdownLine {
    Group(String),
    Choice {
        segments: Vec<(String, bool)>,
        cursor: bool,
        selected: bool,
    },
    Message(String),
}

fn dropdown_lines(combo: &ComboSelect<PageItem>) -> Vec<DropdownLine> {
    if let Some(message) = combo.message() {
        return vec![DropdownLine::Message(message)];
    }
    let cursor = combo.popup().cursor();
    let mut position = 0;
    combo
        .rows()
        .into_iter()
        .map(|row| match row {
            VisibleRow::Group(label) => DropdownLine::Group(label.to_owned()),
            VisibleRow::Choice(entry) => {
                let line = DropdownLine::Choice {
                    segments: highlight_segments(&entry.highlighted),
                    cursor: cursor == Some(position),
                    selected: combo
                        .choices()
                        .get(entry.index)
                        .is_some_and(|choice| choice.selected),
                };
                position += 1;
                line
            }
        })
        .collect()
}

// Splits match markup into (text, matched) runs.
fn highlight_segments(markup: &str) -> Vec<(String, bool)> {
    let mut segments = Vec::new();
    let mut rest = markup;
    while let Some(start) = rest.find(MATCH_OPEN) {
        if start > 0 {
            segments.push((plain_text(&rest[..start]), false));
        }
        let after = &rest[start + MATCH_OPEN.len()..];
        let end = after.find(MATCH_CLOSE).unwrap_or(after.len());
        if end > 0 {
            segments.push((plain_text(&after[..end]), true));
        }
        rest = after.get(end + MATCH_CLOSE.len()..).unwrap_or_default();
    }
    if !rest.is_empty() {
        segments.push((plain_text(rest), false));
    }
    segments
}

fn combo_spans(
    combo: &ComboSelect<PageItem>,
    overflow: Option<&String>,
    focused: bool,
) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    if let Some(chips) = combo.chips() {
        if let Some(marker) = overflow {
            spans.push(Span::styled(
                format!("{marker} "),
                Style::default().fg(Color::Yellow),
            ));
        }
        for chip in chips.chips().iter().filter(|chip| !chip.overflow_hidden) {
            let style = if chip.active {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default().fg(Color::Green)
            };
            spans.push(Span::styled(format!("[{}]", chip.display_text), style));
            spans.push(Span::raw(" "));
        }
        spans.push(Span::raw(combo.input_text().to_owned()));
    } else if focused {
        spans.push(Span::raw(combo.input_text().to_owned()));
    } else {
        spans.push(Span::raw(combo.display_value()));
    }
    if focused {
        spans.push(Span::styled("_", Style::default().fg(Color::Cyan)));
    }
    spans
}

fn field_spans<St: ScopedStorage>(form: &FormState<St>, index: usize) -> Vec<Span<'static>> {
    let Some(spec) = form.fields.get(index) else {
        return Vec::new();
    };
    let focused = index == form.focus;
    let label_style = if focused {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let mut spans = vec![Span::styled(
        format!("{:<width$}", spec.label, width = usize::from(LABEL_WIDTH)),
        label_style,
    )];
    match &spec.field {
        Field::Combo(id) => {
            if let Some(combo) = form.controls.get(id) {
                spans.extend(combo_spans(combo, form.overflow.get(id), focused));
            }
        }
        Field::Lov => {
            spans.push(Span::raw(form.lov_item.display().to_owned()));
            for (item, value) in &form.lov_outputs {
                if !value.is_empty() {
                    spans.push(Span::styled(
                        format!("  {item}={value}"),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
            }
            spans.push(Span::styled(" [...]", Style::default().fg(Color::DarkGray)));
        }
    }
    spans
}

fn field_text<St: ScopedStorage>(form: &FormState<St>, index: usize) -> String {
    field_spans(form, index)
        .iter()
        .map(|span| span.content.as_ref())
        .collect()
}

fn status_text<St: ScopedStorage>(form: &FormState<St>) -> String {
    if let Some(status) = &form.status {
        return status.clone();
    }
    if form.lov.is_open() {
        return lov_footer_text(&form.lov);
    }
    match form.focused() {
        Some(Field::Lov) => "type or Enter to look up, Backspace clears, Tab next field".to_owned(),
        Some(Field::Combo(_)) => {
            "type to filter, Down opens, Ctrl-U clears, Tab next field, Ctrl-Q quits".to_owned()
        }
        None => String::new(),
    }
}

fn lov_footer_text<St: ScopedStorage>(lov: &PopupLovSession<St>) -> String {
    let mut parts = vec!["Enter select", "Esc cancel", "^S sort", "^←/^→ resize"]
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    if lov.more_available() {
        parts.push("^L more".to_owned());
    }
    if lov.options().null_value.is_some() {
        parts.push("^E none".to_owned());
    }
    let recent = lov.recent().entries();
    if !recent.is_empty() {
        parts.push(format!("recent: {}", recent.join(", ")));
    }
    parts.join("  ")
}

fn lov_search_text<St: ScopedStorage>(lov: &PopupLovSession<St>) -> String {
    let mut text = format!("Search: {}_", lov.search_text());
    if lov.phase() == LovPhase::Loading {
        text.push_str("  loading...");
    } else if !lov.records().is_empty() {
        let suffix = if lov.more_available() { "+" } else { "" };
        text.push_str(&format!("  {}{suffix} rows", lov.records().len()));
    }
    text
}

fn notice_text(notice: LovNotice) -> Option<&'static str> {
    match notice {
        LovNotice::None => None,
        LovNotice::TypeToSearch => Some("Type to search"),
        LovNotice::NoResults => Some("No results found"),
    }
}

fn column_heading(column: &LovColumn, sort: Option<&SortSpec>) -> String {
    match sort {
        Some(sort) if sort.column == column.name => {
            let marker = match sort.direction {
                SortDirection::Asc => "▲",
                SortDirection::Desc => "▼",
            };
            format!("{} {marker}", column.heading)
        }
        _ => column.heading.clone(),
    }
}

fn grid_constraints(columns: &[LovColumn], layout: &PersistedLayout) -> Vec<Constraint> {
    columns
        .iter()
        .map(|column| match layout.column_widths.get(&column.name) {
            Some(width) => Constraint::Length(u16::try_from(*width).unwrap_or(u16::MAX)),
            None => {
                let heading = column.heading.chars().count() as u32;
                let width = column.min_width.max(heading + 2);
                Constraint::Min(u16::try_from(width).unwrap_or(u16::MAX))
            }
        })
        .collect()
}

fn dialog_size(layout: &PersistedLayout, request: Option<&SurfaceRequest>, area: Rect) -> (u16, u16) {
    let width = layout
        .width
        .or_else(|| request.and_then(|request| request.width))
        .unwrap_or(DIALOG_WIDTH);
    let height = layout
        .height
        .or_else(|| request.and_then(|request| request.height))
        .unwrap_or(DIALOG_HEIGHT);
    let fit = |value: u32, limit: u16| u16::try_from(value).unwrap_or(u16::MAX).min(limit);
    (fit(width, area.width), fit(height, area.height))
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    Rect {
        x: area.x + area.width.saturating_sub(width) / 2,
        y: area.y + area.height.saturating_sub(height) / 2,
        width: width.min(area.width),
        height: height.min(area.height),
    }
}

fn render<St: ScopedStorage>(frame: &mut ratatui::Frame<'_>, form: &FormState<St>) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let title = Paragraph::new("lovkit").style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );
    frame.render_widget(title, layout[0]);

    let body = Block::default().title("employee").borders(Borders::ALL);
    let inner = body.inner(layout[1]);
    frame.render_widget(body, layout[1]);
    let lines = (0..form.fields.len())
        .map(|index| Line::from(field_spans(form, index)))
        .collect::<Vec<_>>();
    frame.render_widget(Paragraph::new(lines), inner);

    if let Some(Field::Combo(id)) = form.focused()
        && let Some(combo) = form.controls.get(id)
        && combo.popup().is_open()
    {
        render_dropdown(frame, inner, form.focus, combo);
    }

    let status = Paragraph::new(status_text(form))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, layout[2]);

    if form.lov.is_open() {
        render_lov_dialog(frame, form);
    }
}

fn render_dropdown(
    frame: &mut ratatui::Frame<'_>,
    body: Rect,
    field_index: usize,
    combo: &ComboSelect<PageItem>,
) {
    let lines = dropdown_lines(combo);
    let cursor_line = lines
        .iter()
        .position(|line| matches!(line, DropdownLine::Choice { cursor: true, .. }))
        .unwrap_or(0);
    let offset = cursor_line.saturating_sub(usize::from(DROPDOWN_ROWS) - 1);

    let top = body.y + u16::try_from(field_index).unwrap_or(0) + 1;
    let visible_rows = u16::try_from(lines.len()).unwrap_or(DROPDOWN_ROWS).min(DROPDOWN_ROWS);
    let area = Rect {
        x: body.x + LABEL_WIDTH,
        y: top,
        width: body.width.saturating_sub(LABEL_WIDTH),
        height: (visible_rows + 2).min(frame.area().height.saturating_sub(top)),
    };
    frame.render_widget(Clear, area);
    let text = lines.iter().map(dropdown_line).collect::<Vec<_>>();
    let dropdown = Paragraph::new(text)
        .scroll((u16::try_from(offset).unwrap_or(0), 0))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(dropdown, area);
}

fn dropdown_line(line: &DropdownLine) -> Line<'static> {
    match line {
        DropdownLine::Group(label) => Line::from(Span::styled(
            label.clone(),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )),
        DropdownLine::Message(message) => Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Yellow),
        )),
        DropdownLine::Choice {
            segments,
            cursor,
            selected,
        } => {
            let base = if *cursor {
                Style::default().fg(Color::Black).bg(Color::Cyan)
            } else {
                Style::default()
            };
            let mark = if *selected { "* " } else { "  " };
            let mut spans = vec![Span::styled(mark, base)];
            for (text, matched) in segments {
                let style = if *matched {
                    base.add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
                } else {
                    base
                };
                spans.push(Span::styled(text.clone(), style));
            }
            Line::from(spans)
        }
    }
}

fn render_lov_dialog<St: ScopedStorage>(frame: &mut ratatui::Frame<'_>, form: &FormState<St>) {
    let lov = &form.lov;
    let request = form.surfaces.host().request_for(lov.id());
    let (width, height) = dialog_size(lov.layout(), request, frame.area());
    let area = centered(frame.area(), width, height);
    frame.render_widget(Clear, area);

    let title = request
        .and_then(|request| request.title.clone())
        .unwrap_or_else(|| lov.id().to_string());
    let block = Block::default().title(title).borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(inner);
    frame.render_widget(Paragraph::new(lov_search_text(lov)), chunks[0]);

    if let Some(notice) = notice_text(lov.notice()) {
        let message = Paragraph::new(notice).style(Style::default().fg(Color::Yellow));
        frame.render_widget(message, chunks[1]);
    } else {
        let columns = &lov.options().columns;
        let header = Row::new(
            columns
                .iter()
                .map(|column| column_heading(column, lov.sort()))
                .collect::<Vec<_>>(),
        )
        .style(Style::default().add_modifier(Modifier::BOLD));
        let rows = lov.records().iter().map(|record| {
            let style = if lov.selected().contains(&record.return_value) {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            };
            Row::new(
                columns
                    .iter()
                    .map(|column| record.cell(&column.name).unwrap_or_default().to_owned())
                    .collect::<Vec<_>>(),
            )
            .style(style)
        });
        let table = Table::new(rows, grid_constraints(columns, lov.layout()))
            .header(header)
            .column_spacing(1)
            .row_highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan));
        let mut state = TableState::default().with_selected(lov.cursor());
        frame.render_stateful_widget(table, chunks[1], &mut state);
    }

    let footer = Paragraph::new(lov_footer_text(lov)).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[2]);
}
