// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use lovkit_core::{
    Choice, ControlId, DataSource, FetchRequest, FetchResponse, ItemCapability, ItemValue,
    LovPage, LovRecord, RecordSource, ScopedStorage, SortDirection, SurfaceHost, SurfaceId,
    SurfaceRequest,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const DEPARTMENTS: [(&str, &str, &str); 4] = [
    ("10", "ACCOUNTING", "NEW YORK"),
    ("20", "RESEARCH", "DALLAS"),
    ("30", "SALES", "CHICAGO"),
    ("40", "OPERATIONS", "BOSTON"),
];

const EMPLOYEES: [(&str, &str, &str, &str); 14] = [
    ("7369", "SMITH", "CLERK", "20"),
    ("7499", "ALLEN", "SALESMAN", "30"),
    ("7521", "WARD", "SALESMAN", "30"),
    ("7566", "JONES", "MANAGER", "20"),
    ("7654", "MARTIN", "SALESMAN", "30"),
    ("7698", "BLAKE", "MANAGER", "30"),
    ("7782", "CLARK", "MANAGER", "10"),
    ("7788", "SCOTT", "ANALYST", "20"),
    ("7839", "KING", "PRESIDENT", "10"),
    ("7844", "TURNER", "SALESMAN", "30"),
    ("7876", "ADAMS", "CLERK", "20"),
    ("7900", "JAMES", "CLERK", "30"),
    ("7902", "FORD", "ANALYST", "20"),
    ("7934", "MILLER", "CLERK", "10"),
];

const FIRST_NAMES: [&str; 12] = [
    "Avery", "Jordan", "Taylor", "Riley", "Morgan", "Casey", "Quinn", "Parker", "Drew", "Robin",
    "Rowan", "Hayden",
];
const LAST_NAMES: [&str; 12] = [
    "Walker", "Martin", "Hill", "Evans", "Lopez", "Gray", "Reed", "Turner", "Flores", "Price",
    "Foster", "Brooks",
];
const JOBS: [&str; 5] = ["CLERK", "SALESMAN", "MANAGER", "ANALYST", "ENGINEER"];

pub const DEPT_CONTROL: &str = "P1_DEPT";

pub fn departments() -> Vec<Choice> {
    DEPARTMENTS
        .iter()
        .map(|(deptno, name, _)| Choice::new(*deptno, *name))
        .collect()
}

pub fn grouped_departments() -> Vec<Choice> {
    DEPARTMENTS
        .iter()
        .map(|(deptno, name, location)| Choice::new(*deptno, *name).with_group(*location))
        .collect()
}

pub fn employees() -> Vec<LovRecord> {
    EMPLOYEES
        .iter()
        .map(|(empno, ename, job, deptno)| {
            LovRecord::new(*empno, *ename)
                .with_cell("ENAME", *ename)
                .with_cell("JOB", *job)
                .with_cell("DEPTNO", *deptno)
        })
        .collect()
}

pub fn letter_choices(letters: &str) -> Vec<Choice> {
    letters
        .chars()
        .map(|letter| Choice::new(letter.to_string(), letter.to_string()))
        .collect()
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("lovkit.db");
    Ok((dir, db_path))
}

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChipOp {
    Add(String),
    Remove(String),
}

#[derive(Debug, Clone)]
pub struct Faker {
    rng: DeterministicRng,
    next_empno: u32,
}

impl Faker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
            next_empno: 8000,
        }
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    pub fn employee(&mut self) -> LovRecord {
        let first = FIRST_NAMES[self.rng.int_n(FIRST_NAMES.len())];
        let last = LAST_NAMES[self.rng.int_n(LAST_NAMES.len())];
        let job = JOBS[self.rng.int_n(JOBS.len())];
        let (deptno, _, _) = DEPARTMENTS[self.rng.int_n(DEPARTMENTS.len())];
        let empno = self.next_empno.to_string();
        self.next_empno += 1;
        let name = format!("{first} {last}");
        LovRecord::new(empno, name.clone())
            .with_cell("ENAME", name)
            .with_cell("JOB", job)
            .with_cell("DEPTNO", deptno)
    }

    pub fn employees(&mut self, count: usize) -> Vec<LovRecord> {
        (0..count).map(|_| self.employee()).collect()
    }

    // Values outside `values` show up too, so refusals get exercised.
    pub fn chip_ops(&mut self, values: &[&str], count: usize) -> Vec<ChipOp> {
        (0..count)
            .map(|_| {
                let value = if self.rng.int_n(8) == 0 {
                    "unknown".to_owned()
                } else {
                    values[self.rng.int_n(values.len())].to_owned()
                };
                if self.rng.bool() {
                    ChipOp::Add(value)
                } else {
                    ChipOp::Remove(value)
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Clock {
    now: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn advance(&mut self, by: Duration) -> Instant {
        self.now += by;
        self.now
    }

    pub fn advance_ms(&mut self, millis: u64) -> Instant {
        self.advance(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemWrite {
    pub value: ItemValue,
    pub display: Option<String>,
    pub suppress_change: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingItem {
    value: ItemValue,
    pub writes: Vec<ItemWrite>,
}

impl Default for RecordingItem {
    fn default() -> Self {
        Self::new(ItemValue::empty_single())
    }
}

impl RecordingItem {
    pub fn new(value: ItemValue) -> Self {
        Self {
            value,
            writes: Vec::new(),
        }
    }

    pub fn single(value: &str) -> Self {
        Self::new(ItemValue::Single(value.to_owned()))
    }

    pub fn multi(values: &[&str]) -> Self {
        Self::new(ItemValue::Multi(
            values.iter().map(|value| (*value).to_owned()).collect(),
        ))
    }

    pub fn change_events(&self) -> usize {
        self.writes
            .iter()
            .filter(|write| !write.suppress_change)
            .count()
    }
}

impl ItemCapability for RecordingItem {
    fn value(&self) -> ItemValue {
        self.value.clone()
    }

    fn set_value(&mut self, value: ItemValue, display: Option<&str>, suppress_change: bool) {
        self.writes.push(ItemWrite {
            value: value.clone(),
            display: display.map(str::to_owned),
            suppress_change,
        });
        self.value = value;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeSurfaceHost {
    next: u64,
    pub opened: Vec<(ControlId, SurfaceRequest)>,
    pub closed: Vec<SurfaceId>,
    pub fail_open: bool,
}

impl FakeSurfaceHost {
    pub fn open_count(&self) -> usize {
        self.opened.len()
    }
}

impl SurfaceHost for FakeSurfaceHost {
    fn open(&mut self, control: &ControlId, request: &SurfaceRequest) -> Result<SurfaceId> {
        if self.fail_open {
            bail!("surface host refused to open {control}");
        }
        self.next += 1;
        self.opened.push((control.clone(), request.clone()));
        Ok(SurfaceId::new(self.next))
    }

    fn close(&mut self, surface: SurfaceId) -> Result<()> {
        self.closed.push(surface);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    pub items: BTreeMap<String, String>,
    pub writes: Vec<String>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl ScopedStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads {
            bail!("read {key}: storage unavailable");
        }
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            bail!("write {key}: storage unavailable");
        }
        self.writes.push(key.to_owned());
        self.items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

// Serves fixture records the way a remote LOV endpoint would: search over
// every cell, dependency filters on cells named after the control, sort,
// then paging.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    records: Vec<LovRecord>,
    dependency_columns: BTreeMap<ControlId, String>,
    pub requests: Vec<FetchRequest>,
    pub fail_next: bool,
    pub default_value: Option<String>,
}

impl ScriptedSource {
    pub fn new(records: Vec<LovRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn employees() -> Self {
        let mut source = Self::new(employees());
        source
            .dependency_columns
            .insert(ControlId::from(DEPT_CONTROL), "DEPTNO".to_owned());
        source
    }

    pub fn with_dependency(mut self, control: &str, column: &str) -> Self {
        self.dependency_columns
            .insert(ControlId::from(control), column.to_owned());
        self
    }

    pub fn serve(&mut self, request: &FetchRequest) -> Result<LovPage> {
        self.requests.push(request.clone());
        if self.fail_next {
            self.fail_next = false;
            bail!("scripted source failure");
        }

        let needle = request
            .search_text
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        let mut matching: Vec<&LovRecord> = self
            .records
            .iter()
            .filter(|record| {
                needle.is_empty()
                    || record.display_value.to_lowercase().contains(&needle)
                    || record
                        .cells
                        .values()
                        .any(|cell| cell.to_lowercase().contains(&needle))
            })
            .filter(|record| {
                request.dependencies.iter().all(|dependency| {
                    match self.dependency_columns.get(&dependency.control) {
                        Some(column) => record.cell(column) == Some(dependency.value.as_str()),
                        None => true,
                    }
                })
            })
            .collect();

        if let Some(sort) = &request.sort {
            matching.sort_by(|left, right| {
                let ordering = left
                    .cell(&sort.column)
                    .unwrap_or_default()
                    .cmp(right.cell(&sort.column).unwrap_or_default());
                match sort.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let skip = request.first_row.saturating_sub(1);
        let take = request.max_rows.unwrap_or(usize::MAX);
        let records: Vec<LovRecord> = matching
            .iter()
            .skip(skip)
            .take(take)
            .map(|record| (*record).clone())
            .collect();
        let more_available = matching.len() > skip + records.len();
        Ok(LovPage {
            records,
            more_available,
        })
    }
}

impl RecordSource for ScriptedSource {
    fn fetch_page(&mut self, request: &FetchRequest) -> Result<LovPage> {
        self.serve(request)
    }
}

impl DataSource for ScriptedSource {
    fn fetch(&mut self, request: &FetchRequest) -> Result<FetchResponse> {
        let page = self.serve(request)?;
        Ok(FetchResponse {
            values: page
                .records
                .into_iter()
                .map(|record| Choice::new(record.return_value, record.display_value))
                .collect(),
            default_value: self.default_value.clone(),
            more_available: page.more_available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ChipOp, Faker, ScriptedSource, departments, employees};
    use lovkit_core::{
        ControlId, Dependency, FetchRequest, RecordSource, SortDirection, SortSpec,
    };

    #[test]
    fn faker_is_deterministic_per_seed() {
        let mut left = Faker::new(42);
        let mut right = Faker::new(42);
        assert_eq!(left.employees(5), right.employees(5));
        assert_eq!(
            left.chip_ops(&["A", "B"], 20),
            right.chip_ops(&["A", "B"], 20)
        );
    }

    #[test]
    fn chip_ops_mix_adds_and_removes() {
        let ops = Faker::new(7).chip_ops(&["A", "B", "C"], 200);
        assert!(ops.iter().any(|op| matches!(op, ChipOp::Add(_))));
        assert!(ops.iter().any(|op| matches!(op, ChipOp::Remove(_))));
        assert!(ops.iter().any(|op| matches!(op, ChipOp::Add(value) if value == "unknown")));
    }

    #[test]
    fn fixtures_are_populated() {
        assert_eq!(departments().len(), 4);
        assert!(employees().iter().all(|record| record.cell("JOB").is_some()));
    }

    #[test]
    fn scripted_source_filters_sorts_and_pages() -> anyhow::Result<()> {
        let mut source = ScriptedSource::employees();
        let request = FetchRequest {
            search_text: Some("clerk".to_owned()),
            sort: Some(SortSpec {
                column: "ENAME".to_owned(),
                direction: SortDirection::Desc,
            }),
            first_row: 1,
            max_rows: Some(3),
            dependencies: Vec::new(),
        };
        let page = source.fetch_page(&request)?;
        let names: Vec<&str> = page
            .records
            .iter()
            .map(|record| record.display_value.as_str())
            .collect();
        assert_eq!(names, vec!["SMITH", "MILLER", "JAMES"]);
        assert!(page.more_available);

        let request = FetchRequest {
            dependencies: vec![Dependency {
                control: ControlId::from("P1_DEPT"),
                value: "10".to_owned(),
            }],
            ..FetchRequest::search("")
        };
        let page = source.fetch_page(&request)?;
        assert_eq!(page.records.len(), 3);
        assert_eq!(source.requests.len(), 2);
        Ok(())
    }
}
