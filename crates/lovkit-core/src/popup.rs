// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::host::{SurfaceHost, SurfaceLifecycle, SurfaceRequest};
use crate::ids::{ControlId, SurfaceId};
use crate::model::Key;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug)]
pub struct SurfaceRegistry<S> {
    host: S,
    open: BTreeMap<ControlId, SurfaceId>,
}

impl<S: SurfaceHost> SurfaceRegistry<S> {
    pub fn new(host: S) -> Self {
        Self {
            host,
            open: BTreeMap::new(),
        }
    }

    pub fn host(&self) -> &S {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut S {
        &mut self.host
    }

    pub fn is_open(&self, control: &ControlId) -> bool {
        self.open.contains_key(control)
    }

    pub fn surface(&self, control: &ControlId) -> Option<SurfaceId> {
        self.open.get(control).copied()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn open(&mut self, control: &ControlId, request: &SurfaceRequest) -> Result<SurfaceId> {
        if let Some(surface) = self.surface(control) {
            return Ok(surface);
        }
        let surface = self
            .host
            .open(control, request)
            .with_context(|| format!("open {:?} surface for {control}", request.kind))?;
        self.open.insert(control.clone(), surface);
        Ok(surface)
    }

    // The registry entry is dropped before the host is asked to close, so a
    // failing host never leaves a control registered as open.
    pub fn close(&mut self, control: &ControlId) -> Result<bool> {
        let Some(surface) = self.open.remove(control) else {
            return Ok(false);
        };
        self.host
            .close(surface)
            .with_context(|| format!("close surface {} for {control}", surface.get()))?;
        Ok(true)
    }

    pub fn forget(&mut self, control: &ControlId) -> Option<SurfaceId> {
        self.open.remove(control)
    }

    pub fn close_all(&mut self) -> usize {
        let open = std::mem::take(&mut self.open);
        let count = open.len();
        for (control, surface) in open {
            if let Err(error) = self.host.close(surface) {
                warn!(control = %control, error = %format!("{error:#}"), "surface close failed");
            }
        }
        count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupPhase {
    Closed,
    Opening,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
    Moved(usize),
    Commit(Option<usize>),
    CommitAndAdvance(Option<usize>),
    Dismiss,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupController {
    control: ControlId,
    request: SurfaceRequest,
    phase: PopupPhase,
    cursor: Option<usize>,
    list_focused: bool,
    closing_latch: bool,
    page_size: usize,
}

impl PopupController {
    pub fn new(control: ControlId, request: SurfaceRequest) -> Self {
        Self {
            control,
            request,
            phase: PopupPhase::Closed,
            cursor: None,
            list_focused: false,
            closing_latch: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn control(&self) -> &ControlId {
        &self.control
    }

    pub fn request(&self) -> &SurfaceRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut SurfaceRequest {
        &mut self.request
    }

    pub fn phase(&self) -> PopupPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, PopupPhase::Opening | PopupPhase::Open)
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn list_focused(&self) -> bool {
        self.list_focused
    }

    pub fn closing_latched(&self) -> bool {
        self.closing_latch
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
    }

    // Returns false when the popup is already open or a close is still
    // settling in this turn.
    pub fn open<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) -> Result<bool> {
        if self.is_open() || self.closing_latch {
            debug!(control = %self.control, latched = self.closing_latch, "open ignored");
            return Ok(false);
        }
        self.phase = PopupPhase::Opening;
        if let Err(error) = surfaces.open(&self.control, &self.request) {
            self.phase = PopupPhase::Closed;
            return Err(error);
        }
        self.phase = PopupPhase::Open;
        self.cursor = None;
        self.list_focused = false;
        debug!(control = %self.control, "popup open");
        Ok(true)
    }

    pub fn close<S: SurfaceHost>(&mut self, surfaces: &mut SurfaceRegistry<S>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.phase = PopupPhase::Closing;
        self.closing_latch = true;
        if let Err(error) = surfaces.close(&self.control) {
            warn!(control = %self.control, error = %format!("{error:#}"), "popup close failed");
        }
        self.finish_close();
        true
    }

    // The host reports lifecycle changes it initiated itself, such as a
    // dialog closed from its own title bar.
    pub fn on_lifecycle<S: SurfaceHost>(
        &mut self,
        surfaces: &mut SurfaceRegistry<S>,
        event: SurfaceLifecycle,
    ) -> bool {
        match event {
            SurfaceLifecycle::Init | SurfaceLifecycle::Resize { .. } => false,
            SurfaceLifecycle::Open => {
                if self.phase == PopupPhase::Opening {
                    self.phase = PopupPhase::Open;
                }
                false
            }
            SurfaceLifecycle::Close => {
                surfaces.forget(&self.control);
                if !self.is_open() {
                    return false;
                }
                self.closing_latch = true;
                self.finish_close();
                true
            }
        }
    }

    pub fn settle(&mut self) {
        self.closing_latch = false;
    }

    pub fn reset_cursor(&mut self, len: usize) {
        self.cursor = match self.cursor {
            _ if len == 0 => None,
            Some(cursor) => Some(cursor.min(len - 1)),
            None => None,
        };
        if self.cursor.is_none() {
            self.list_focused = false;
        }
    }

    pub fn handle_key(&mut self, key: Key, len: usize) -> PopupAction {
        if !self.is_open() {
            return PopupAction::Ignored;
        }
        match key {
            Key::Up | Key::Down | Key::Home | Key::End | Key::PageUp | Key::PageDown => {
                self.move_cursor(key, len)
            }
            Key::Enter => PopupAction::Commit(self.focused_index()),
            Key::Tab { .. } => PopupAction::CommitAndAdvance(self.focused_index()),
            Key::Escape => PopupAction::Dismiss,
            _ => PopupAction::Ignored,
        }
    }

    pub fn pick(&mut self, index: usize, len: usize) -> PopupAction {
        if !self.is_open() || index >= len {
            return PopupAction::Ignored;
        }
        self.cursor = Some(index);
        PopupAction::Commit(Some(index))
    }

    fn focused_index(&self) -> Option<usize> {
        if self.list_focused { self.cursor } else { None }
    }

    fn move_cursor(&mut self, key: Key, len: usize) -> PopupAction {
        if len == 0 {
            return PopupAction::Ignored;
        }
        let last = len - 1;
        let next = match (self.list_focused.then_some(self.cursor).flatten(), key) {
            (None, Key::Up | Key::End) => last,
            (None, _) => 0,
            (Some(cursor), Key::Up) => cursor.saturating_sub(1),
            (Some(cursor), Key::Down) => (cursor + 1).min(last),
            (Some(_), Key::Home) => 0,
            (Some(_), Key::End) => last,
            (Some(cursor), Key::PageUp) => cursor.saturating_sub(self.page_size),
            (Some(cursor), Key::PageDown) => (cursor + self.page_size).min(last),
            (Some(cursor), _) => cursor,
        };
        self.list_focused = true;
        self.cursor = Some(next);
        PopupAction::Moved(next)
    }

    fn finish_close(&mut self) {
        self.phase = PopupPhase::Closed;
        self.cursor = None;
        self.list_focused = false;
        debug!(control = %self.control, "popup closed");
    }
}
