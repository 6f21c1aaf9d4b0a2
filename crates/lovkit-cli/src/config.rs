// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use lovkit_core::{FilterSettings, MatchType, StorageScope};
use lovkit_tui::FormSettings;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_VERSION: i64 = 1;
pub const CONFIG_PATH_ENV: &str = "LOVKIT_CONFIG_PATH";
const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_DEPARTMENT_SOURCE: &str = "dept";
const DEFAULT_EMPLOYEE_SOURCE: &str = "emp";
const DEFAULT_PAGE: &str = "1";
const DEFAULT_USER: &str = "default";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub search: Search,
    #[serde(default)]
    pub remote: Remote,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage: Storage::default(),
            search: Search::default(),
            remote: Remote::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
    pub db_path: Option<String>,
    pub app: Option<String>,
    pub page: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Search {
    pub debounce: Option<String>,
    pub lov_debounce: Option<String>,
    pub min_chars: Option<i64>,
    pub max_results: Option<i64>,
    pub match_type: Option<String>,
    pub lov_max_rows: Option<i64>,
}

impl Default for Search {
    fn default() -> Self {
        Self {
            debounce: Some("250ms".to_owned()),
            lov_debounce: Some("400ms".to_owned()),
            min_chars: Some(1),
            max_results: None,
            match_type: Some(MatchType::Contains.as_str().to_owned()),
            lov_max_rows: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Remote {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub department_source: Option<String>,
    pub employee_source: Option<String>,
    pub timeout: Option<String>,
}

impl Default for Remote {
    fn default() -> Self {
        Self {
            enabled: Some(false),
            base_url: Some(DEFAULT_BASE_URL.to_owned()),
            department_source: Some(DEFAULT_DEPARTMENT_SOURCE.to_owned()),
            employee_source: Some(DEFAULT_EMPLOYEE_SOURCE.to_owned()),
            timeout: Some("5s".to_owned()),
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set {CONFIG_PATH_ENV} to the config file")
        })?;

        let app_dir = config_root.join(lovkit_store::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and put values under [storage], [search], and [remote]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(db_path) = &self.storage.db_path {
            lovkit_store::validate_db_path(db_path)?;
        }

        for (field, value) in [
            ("storage.app", &self.storage.app),
            ("storage.page", &self.storage.page),
            ("storage.user", &self.storage.user),
        ] {
            if let Some(value) = value
                && value.trim().is_empty()
            {
                bail!("{field} in {} must not be empty", path.display());
            }
        }

        for (field, value) in [
            ("search.debounce", &self.search.debounce),
            ("search.lov_debounce", &self.search.lov_debounce),
        ] {
            if let Some(raw) = value {
                parse_duration(raw).with_context(|| format!("{field} in {}", path.display()))?;
            }
        }

        if let Some(min_chars) = self.search.min_chars
            && min_chars < 0
        {
            bail!(
                "search.min_chars in {} must be non-negative, got {}",
                path.display(),
                min_chars
            );
        }

        for (field, value) in [
            ("search.max_results", self.search.max_results),
            ("search.lov_max_rows", self.search.lov_max_rows),
        ] {
            if let Some(value) = value
                && value <= 0
            {
                bail!(
                    "{field} in {} must be positive, got {}",
                    path.display(),
                    value
                );
            }
        }

        if let Some(match_type) = &self.search.match_type
            && MatchType::parse(match_type).is_none()
        {
            bail!(
                "search.match_type in {} must be \"contains\" or \"starts_with\", got {:?}",
                path.display(),
                match_type
            );
        }

        if let Some(timeout) = &self.remote.timeout {
            let parsed = parse_duration(timeout)?;
            if parsed <= Duration::ZERO {
                bail!(
                    "remote.timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        if self.remote_enabled() && self.remote_base_url().is_empty() {
            bail!(
                "remote.base_url in {} is required when remote.enabled = true",
                path.display()
            );
        }

        Ok(())
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => lovkit_store::default_db_path(),
        }
    }

    pub fn scope(&self) -> StorageScope {
        StorageScope::new(
            self.storage.app.as_deref().unwrap_or(lovkit_store::APP_NAME),
            self.storage.page.as_deref().unwrap_or(DEFAULT_PAGE),
            self.storage.user.as_deref().unwrap_or(DEFAULT_USER),
        )
    }

    pub fn filter(&self) -> FilterSettings {
        FilterSettings {
            match_type: self
                .search
                .match_type
                .as_deref()
                .and_then(MatchType::parse)
                .unwrap_or_default(),
            max_results: self
                .search
                .max_results
                .and_then(|value| usize::try_from(value).ok()),
            ..FilterSettings::default()
        }
    }

    pub fn form_settings(&self) -> Result<FormSettings> {
        let defaults = FormSettings::default();
        Ok(FormSettings {
            scope: self.scope(),
            filter: self.filter(),
            search_debounce: self
                .search
                .debounce
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .unwrap_or(defaults.search_debounce),
            min_chars: self
                .search
                .min_chars
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(defaults.min_chars),
            lov_debounce: self
                .search
                .lov_debounce
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .unwrap_or(defaults.lov_debounce),
            lov_max_rows: self
                .search
                .lov_max_rows
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(defaults.lov_max_rows),
        })
    }

    pub fn remote_enabled(&self) -> bool {
        self.remote.enabled.unwrap_or(false)
    }

    pub fn remote_base_url(&self) -> &str {
        self.remote
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim()
            .trim_end_matches('/')
    }

    pub fn department_source(&self) -> &str {
        self.remote
            .department_source
            .as_deref()
            .unwrap_or(DEFAULT_DEPARTMENT_SOURCE)
    }

    pub fn employee_source(&self) -> &str {
        self.remote
            .employee_source
            .as_deref()
            .unwrap_or(DEFAULT_EMPLOYEE_SOURCE)
    }

    pub fn remote_timeout(&self) -> Result<Duration> {
        parse_duration(self.remote.timeout.as_deref().unwrap_or("5s"))
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# lovkit config\n# Place this file at: {}\n\nversion = 1\n\n[storage]\n# Optional. Default is platform data dir (for example ~/.local/share/lovkit/lovkit.db)\n# db_path = \"/absolute/path/to/lovkit.db\"\napp = \"{}\"\npage = \"{}\"\nuser = \"{}\"\n\n[search]\ndebounce = \"250ms\"\nlov_debounce = \"400ms\"\nmin_chars = 1\n# max_results = 20\n# lov_max_rows = 50\nmatch_type = \"contains\"\n\n[remote]\nenabled = false\nbase_url = \"{}\"\ndepartment_source = \"{}\"\nemployee_source = \"{}\"\ntimeout = \"5s\"\n",
            path.display(),
            lovkit_store::APP_NAME,
            DEFAULT_PAGE,
            DEFAULT_USER,
            DEFAULT_BASE_URL,
            DEFAULT_DEPARTMENT_SOURCE,
            DEFAULT_EMPLOYEE_SOURCE,
        )
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 250ms or 5s)")
}
