// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ids::{ControlId, SurfaceId};
use crate::model::{FetchRequest, FetchResponse, ItemValue, LovPage};

pub trait ItemCapability {
    fn value(&self) -> ItemValue;
    fn set_value(&mut self, value: ItemValue, display: Option<&str>, suppress_change: bool);
    fn is_empty(&self) -> bool {
        self.value().is_empty()
    }
}

impl<T: ItemCapability + ?Sized> ItemCapability for &mut T {
    fn value(&self) -> ItemValue {
        (**self).value()
    }

    fn set_value(&mut self, value: ItemValue, display: Option<&str>, suppress_change: bool) {
        (**self).set_value(value, display, suppress_change);
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceKind {
    Dropdown,
    Popup,
    Dialog,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub kind: SurfaceKind,
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub search_char: Option<char>,
}

impl SurfaceRequest {
    pub fn of_kind(kind: SurfaceKind) -> Self {
        Self {
            kind,
            title: None,
            width: None,
            height: None,
            search_char: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceLifecycle {
    Init,
    Open,
    Resize { width: u32, height: u32 },
    Close,
}

pub trait SurfaceHost {
    fn open(&mut self, control: &ControlId, request: &SurfaceRequest) -> Result<SurfaceId>;
    fn close(&mut self, surface: SurfaceId) -> Result<()>;
}

pub trait DataSource {
    fn fetch(&mut self, request: &FetchRequest) -> Result<FetchResponse>;
}

pub trait RecordSource {
    fn fetch_page(&mut self, request: &FetchRequest) -> Result<LovPage>;
}

pub trait ScopedStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;
}

impl<T: ScopedStorage + ?Sized> ScopedStorage for &mut T {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        (**self).get_item(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        (**self).set_item(key, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageScope {
    pub app: String,
    pub page: String,
    pub user: String,
}

impl StorageScope {
    pub fn new(app: &str, page: &str, user: &str) -> Self {
        Self {
            app: app.to_owned(),
            page: page.to_owned(),
            user: user.to_owned(),
        }
    }

    pub fn key(&self, control: &ControlId, name: &str) -> String {
        format!(
            "lovkit.{}.{}.{}.{}.{}",
            self.app, self.page, self.user, control, name
        )
    }
}
