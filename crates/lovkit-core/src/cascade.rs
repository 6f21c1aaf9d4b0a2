// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::combo::Control;
use crate::ids::{ControlId, RequestSeq};
use crate::model::{Choice, Dependency, FetchRequest, FetchResponse, ItemValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeSpec {
    pub depends_on: Vec<ControlId>,
    pub optimize_refresh: bool,
}

pub trait CascadeHost {
    fn value_of(&self, control: &ControlId) -> Option<ItemValue>;
    fn clear_choices(&mut self, target: &ControlId);
    fn replace_choices(
        &mut self,
        target: &ControlId,
        choices: Vec<Choice>,
        default_value: Option<&str>,
    );
}

impl<C: Control> CascadeHost for BTreeMap<ControlId, C> {
    fn value_of(&self, control: &ControlId) -> Option<ItemValue> {
        self.get(control).map(Control::value)
    }

    fn clear_choices(&mut self, target: &ControlId) {
        if let Some(control) = self.get_mut(target) {
            control.clear_choices();
            control.set_value(ItemValue::empty_single(), None, true);
        }
    }

    fn replace_choices(
        &mut self,
        target: &ControlId,
        choices: Vec<Choice>,
        default_value: Option<&str>,
    ) {
        let Some(control) = self.get_mut(target) else {
            return;
        };
        control.replace_choices(choices);
        let value = ItemValue::Single(default_value.unwrap_or_default().to_owned());
        if !control.set_value(value, None, true) {
            debug!(control = %target, "default value not in refreshed choices");
            control.set_value(ItemValue::empty_single(), None, true);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeEvent {
    BeforeRefresh(ControlId),
    AfterRefresh(ControlId),
    Changed(ControlId),
    Fetch {
        target: ControlId,
        seq: RequestSeq,
        request: FetchRequest,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Lane {
    latest: RequestSeq,
    in_flight: bool,
    rerun: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CascadeController {
    specs: BTreeMap<ControlId, CascadeSpec>,
    lanes: BTreeMap<ControlId, Lane>,
    next_seq: RequestSeq,
}

impl CascadeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: ControlId, spec: CascadeSpec) -> Result<()> {
        if spec.depends_on.contains(&target) {
            bail!("{target} cannot depend on itself -- remove it from its own dependency list");
        }
        for dependency in &spec.depends_on {
            if self.reaches(dependency, &target) {
                bail!(
                    "{target} depending on {dependency} would form a cycle -- remove one of the \
                     dependencies and retry"
                );
            }
        }
        self.specs.insert(target, spec);
        Ok(())
    }

    pub fn spec(&self, target: &ControlId) -> Option<&CascadeSpec> {
        self.specs.get(target)
    }

    pub fn dependents(&self, source: &ControlId) -> Vec<ControlId> {
        self.specs
            .iter()
            .filter(|(_, spec)| spec.depends_on.contains(source))
            .map(|(target, _)| target.clone())
            .collect()
    }

    pub fn is_in_flight(&self, target: &ControlId) -> bool {
        self.lanes.get(target).is_some_and(|lane| lane.in_flight)
    }

    pub fn has_pending_rerun(&self, target: &ControlId) -> bool {
        self.lanes.get(target).is_some_and(|lane| lane.rerun)
    }

    pub fn source_changed<H: CascadeHost>(
        &mut self,
        host: &mut H,
        source: &ControlId,
    ) -> Vec<CascadeEvent> {
        let mut events = Vec::new();
        for target in self.dependents(source) {
            self.refresh(host, &target, &mut events);
        }
        events
    }

    pub fn deliver<H: CascadeHost>(
        &mut self,
        host: &mut H,
        target: &ControlId,
        seq: RequestSeq,
        result: Result<FetchResponse>,
    ) -> Vec<CascadeEvent> {
        let Some(lane) = self.lanes.get_mut(target) else {
            return Vec::new();
        };
        if !lane.in_flight || lane.latest != seq {
            debug!(control = %target, seq = seq.get(), "dropping stale cascade response");
            return Vec::new();
        }
        lane.in_flight = false;

        let mut events = vec![CascadeEvent::AfterRefresh(target.clone())];
        if lane.rerun {
            lane.rerun = false;
            debug!(control = %target, seq = seq.get(), "superseded cascade response, refetching");
            self.refresh(host, target, &mut events);
            return events;
        }

        match result {
            Ok(response) => {
                host.replace_choices(target, response.values, response.default_value.as_deref());
                events.push(CascadeEvent::Changed(target.clone()));
                for dependent in self.dependents(target) {
                    self.refresh(host, &dependent, &mut events);
                }
            }
            Err(error) => {
                warn!(control = %target, error = %format!("{error:#}"), "cascade fetch failed");
            }
        }
        events
    }

    fn refresh<H: CascadeHost>(
        &mut self,
        host: &mut H,
        target: &ControlId,
        events: &mut Vec<CascadeEvent>,
    ) {
        let Some(spec) = self.specs.get(target).cloned() else {
            return;
        };
        let values: Vec<(ControlId, ItemValue)> = spec
            .depends_on
            .iter()
            .map(|control| {
                let value = host
                    .value_of(control)
                    .unwrap_or_else(ItemValue::empty_single);
                (control.clone(), value)
            })
            .collect();

        if spec.optimize_refresh && values.iter().any(|(_, value)| value.is_empty()) {
            let lane = self.lanes.entry(target.clone()).or_default();
            lane.in_flight = false;
            lane.rerun = false;
            debug!(control = %target, "dependency empty, clearing without fetch");
            events.push(CascadeEvent::BeforeRefresh(target.clone()));
            host.clear_choices(target);
            events.push(CascadeEvent::AfterRefresh(target.clone()));
            events.push(CascadeEvent::Changed(target.clone()));
            for dependent in self.dependents(target) {
                self.refresh(host, &dependent, events);
            }
            return;
        }

        let lane = self.lanes.entry(target.clone()).or_default();
        if lane.in_flight {
            lane.rerun = true;
            debug!(control = %target, "cascade fetch in flight, coalescing");
            return;
        }
        self.next_seq = self.next_seq.next();
        lane.latest = self.next_seq;
        lane.in_flight = true;

        let request = FetchRequest {
            first_row: 1,
            dependencies: values
                .into_iter()
                .map(|(control, value)| Dependency {
                    control,
                    value: value.to_submit_string(),
                })
                .collect(),
            ..FetchRequest::default()
        };
        events.push(CascadeEvent::BeforeRefresh(target.clone()));
        events.push(CascadeEvent::Fetch {
            target: target.clone(),
            seq: self.next_seq,
            request,
        });
    }

    fn reaches(&self, from: &ControlId, goal: &ControlId) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from.clone()];
        while let Some(current) = stack.pop() {
            if &current == goal {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(spec) = self.specs.get(&current) {
                stack.extend(spec.depends_on.iter().cloned());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{CascadeController, CascadeEvent, CascadeSpec};
    use crate::combo::Control;
    use crate::ids::ControlId;
    use crate::model::{Choice, FetchResponse, ItemValue};
    use anyhow::{Result, anyhow};
    use std::collections::BTreeMap;

    #[derive(Debug)]
    struct Field {
        id: ControlId,
        value: ItemValue,
        choices: Vec<Choice>,
    }

    impl Control for Field {
        fn id(&self) -> &ControlId {
            &self.id
        }

        fn value(&self) -> ItemValue {
            self.value.clone()
        }

        fn set_value(&mut self, value: ItemValue, _display: Option<&str>, _suppress: bool) -> bool {
            self.value = value;
            true
        }

        fn replace_choices(&mut self, choices: Vec<Choice>) {
            self.choices = choices;
        }
    }

    fn page(dept: &str) -> BTreeMap<ControlId, Field> {
        ["P1_DEPT", "P1_EMP", "P1_TASK"]
            .into_iter()
            .map(|name| {
                let value = if name == "P1_DEPT" { dept } else { "" };
                (
                    ControlId::from(name),
                    Field {
                        id: ControlId::from(name),
                        value: ItemValue::Single(value.to_owned()),
                        choices: vec![Choice::new("old", "Old")],
                    },
                )
            })
            .collect()
    }

    fn controller(optimize_refresh: bool) -> Result<CascadeController> {
        let mut cascade = CascadeController::new();
        cascade.register(
            ControlId::from("P1_EMP"),
            CascadeSpec {
                depends_on: vec![ControlId::from("P1_DEPT")],
                optimize_refresh,
            },
        )?;
        cascade.register(
            ControlId::from("P1_TASK"),
            CascadeSpec {
                depends_on: vec![ControlId::from("P1_EMP")],
                optimize_refresh: true,
            },
        )?;
        Ok(cascade)
    }

    #[test]
    fn empty_dependency_short_circuits_and_cascades_the_clear() -> Result<()> {
        let mut cascade = controller(true)?;
        let mut fields = page("");
        let emp = ControlId::from("P1_EMP");
        let task = ControlId::from("P1_TASK");

        let events = cascade.source_changed(&mut fields, &ControlId::from("P1_DEPT"));
        assert_eq!(
            events,
            vec![
                CascadeEvent::BeforeRefresh(emp.clone()),
                CascadeEvent::AfterRefresh(emp.clone()),
                CascadeEvent::Changed(emp.clone()),
                CascadeEvent::BeforeRefresh(task.clone()),
                CascadeEvent::AfterRefresh(task.clone()),
                CascadeEvent::Changed(task.clone()),
            ]
        );
        assert!(fields[&emp].choices.is_empty());
        assert!(fields[&task].choices.is_empty());
        Ok(())
    }

    #[test]
    fn fetch_carries_dependency_values_and_applies_default() -> Result<()> {
        let mut cascade = controller(true)?;
        let mut fields = page("10");
        let emp = ControlId::from("P1_EMP");

        let events = cascade.source_changed(&mut fields, &ControlId::from("P1_DEPT"));
        let [CascadeEvent::BeforeRefresh(_), CascadeEvent::Fetch { seq, request, .. }] =
            events.as_slice()
        else {
            panic!("expected a fetch, got {events:?}");
        };
        assert_eq!(request.dependencies[0].value, "10");

        let response = FetchResponse {
            values: vec![Choice::new("7782", "CLARK")],
            default_value: Some("7782".to_owned()),
            more_available: false,
        };
        let events = cascade.deliver(&mut fields, &emp, *seq, Ok(response));
        assert_eq!(events[0], CascadeEvent::AfterRefresh(emp.clone()));
        assert_eq!(events[1], CascadeEvent::Changed(emp.clone()));
        assert_eq!(fields[&emp].value, ItemValue::Single("7782".to_owned()));
        assert!(
            events
                .iter()
                .any(|event| matches!(event, CascadeEvent::Fetch { target, .. } if target.as_str() == "P1_TASK"))
        );
        Ok(())
    }

    #[test]
    fn triggers_during_flight_coalesce_into_one_rerun() -> Result<()> {
        let mut cascade = controller(false)?;
        let mut fields = page("10");
        let dept = ControlId::from("P1_DEPT");
        let emp = ControlId::from("P1_EMP");

        let first = cascade.source_changed(&mut fields, &dept);
        let Some(CascadeEvent::Fetch { seq: first_seq, .. }) = first.last().cloned() else {
            panic!("expected a fetch");
        };
        if let Some(field) = fields.get_mut(&dept) {
            field.value = ItemValue::Single("20".to_owned());
        }
        assert!(cascade.source_changed(&mut fields, &dept).is_empty());
        if let Some(field) = fields.get_mut(&dept) {
            field.value = ItemValue::Single("30".to_owned());
        }
        assert!(cascade.source_changed(&mut fields, &dept).is_empty());
        assert!(cascade.has_pending_rerun(&emp));

        let stale = FetchResponse {
            values: vec![Choice::new("stale", "Stale")],
            ..FetchResponse::default()
        };
        let events = cascade.deliver(&mut fields, &emp, first_seq, Ok(stale));
        assert_eq!(fields[&emp].choices, vec![Choice::new("old", "Old")]);
        let Some(CascadeEvent::Fetch { seq, request, .. }) = events.last() else {
            panic!("expected a rerun fetch, got {events:?}");
        };
        assert!(*seq > first_seq);
        assert_eq!(request.dependencies[0].value, "30");

        assert!(cascade.deliver(&mut fields, &emp, first_seq, Ok(FetchResponse::default())).is_empty());
        Ok(())
    }

    #[test]
    fn failed_fetch_keeps_previous_choices_without_change() -> Result<()> {
        let mut cascade = controller(false)?;
        let mut fields = page("10");
        let emp = ControlId::from("P1_EMP");
        let events = cascade.source_changed(&mut fields, &ControlId::from("P1_DEPT"));
        let Some(CascadeEvent::Fetch { seq, .. }) = events.last().cloned() else {
            panic!("expected a fetch");
        };

        let events = cascade.deliver(&mut fields, &emp, seq, Err(anyhow!("server down")));
        assert_eq!(events, vec![CascadeEvent::AfterRefresh(emp.clone())]);
        assert_eq!(fields[&emp].choices, vec![Choice::new("old", "Old")]);
        assert!(!cascade.is_in_flight(&emp));
        Ok(())
    }

    #[test]
    fn cycles_are_rejected_at_registration() -> Result<()> {
        let mut cascade = controller(true)?;
        let error = cascade
            .register(
                ControlId::from("P1_DEPT"),
                CascadeSpec {
                    depends_on: vec![ControlId::from("P1_TASK")],
                    optimize_refresh: false,
                },
            )
            .expect_err("cycle should be rejected");
        assert!(error.to_string().contains("cycle"));
        assert!(
            cascade
                .register(
                    ControlId::from("P1_SELF"),
                    CascadeSpec {
                        depends_on: vec![ControlId::from("P1_SELF")],
                        optimize_refresh: false,
                    },
                )
                .is_err()
        );
        Ok(())
    }
}
