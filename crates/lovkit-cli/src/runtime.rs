// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use lovkit_core::{
    Choice, ControlId, DataSource, FetchRequest, FetchResponse, LovPage, RecordSource, RequestSeq,
};
use lovkit_remote::Client;
use lovkit_testkit::ScriptedSource;
use lovkit_tui::{DEPT, FetchPurpose, InternalEvent, LovRuntime};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::debug;

#[derive(Debug, Clone)]
enum Backend {
    Demo {
        departments: Vec<Choice>,
        employees: ScriptedSource,
    },
    Remote {
        departments: Client,
        employees: Client,
    },
}

// Department choices come from their own source; every other control reads
// employee data.
#[derive(Debug, Clone)]
pub struct LovkitRuntime {
    backend: Backend,
}

impl LovkitRuntime {
    pub fn demo() -> Self {
        Self {
            backend: Backend::Demo {
                departments: lovkit_testkit::grouped_departments(),
                employees: ScriptedSource::employees(),
            },
        }
    }

    pub fn remote(departments: Client, employees: Client) -> Self {
        Self {
            backend: Backend::Remote {
                departments,
                employees,
            },
        }
    }

    pub fn ping(&self) -> Result<()> {
        match &self.backend {
            Backend::Demo { .. } => Ok(()),
            Backend::Remote {
                departments,
                employees,
            } => {
                departments.ping()?;
                employees.ping()
            }
        }
    }
}

impl LovRuntime for LovkitRuntime {
    fn fetch_choices(
        &mut self,
        control: &ControlId,
        request: &FetchRequest,
    ) -> Result<FetchResponse> {
        let departments = control.as_str() == DEPT;
        match &mut self.backend {
            Backend::Demo { departments: choices, .. } if departments => Ok(FetchResponse {
                values: choices.clone(),
                ..FetchResponse::default()
            }),
            Backend::Demo { employees, .. } => employees.fetch(request),
            Backend::Remote { departments: client, .. } if departments => {
                client.fetch_choices(request)
            }
            Backend::Remote { employees, .. } => employees.fetch_choices(request),
        }
    }

    fn fetch_page(&mut self, _control: &ControlId, request: &FetchRequest) -> Result<LovPage> {
        match &mut self.backend {
            Backend::Demo { employees, .. } => employees.fetch_page(request),
            Backend::Remote { employees, .. } => employees.fetch_records(request),
        }
    }

    fn spawn_choices(
        &mut self,
        purpose: FetchPurpose,
        control: ControlId,
        seq: RequestSeq,
        request: FetchRequest,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let mut worker = self.clone();
        debug!(control = %control, seq = seq.get(), ?purpose, "fetching choices");
        thread::spawn(move || {
            let result = worker
                .fetch_choices(&control, &request)
                .map_err(|error| format!("{error:#}"));
            let _ = tx.send(InternalEvent::Choices {
                purpose,
                control,
                seq,
                result,
            });
        });
        Ok(())
    }

    fn spawn_page(
        &mut self,
        control: ControlId,
        seq: RequestSeq,
        request: FetchRequest,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let mut worker = self.clone();
        debug!(control = %control, seq = seq.get(), first_row = request.first_row, "fetching page");
        thread::spawn(move || {
            let result = worker
                .fetch_page(&control, &request)
                .map_err(|error| format!("{error:#}"));
            let _ = tx.send(InternalEvent::Page {
                control,
                seq,
                result,
            });
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LovkitRuntime;
    use anyhow::{Result, anyhow};
    use lovkit_core::{ControlId, Dependency, FetchRequest, RequestSeq};
    use lovkit_remote::Client;
    use lovkit_tui::{DEPT, EMP, FetchPurpose, InternalEvent, LovRuntime, MANAGER};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tiny_http::{Header, Response, Server};

    #[test]
    fn demo_departments_are_grouped() -> Result<()> {
        let mut runtime = LovkitRuntime::demo();
        let response = runtime.fetch_choices(&ControlId::from(DEPT), &FetchRequest::default())?;
        assert_eq!(response.values.len(), 4);
        assert!(response.values.iter().all(|choice| choice.group.is_some()));
        Ok(())
    }

    #[test]
    fn demo_employees_follow_department_dependency() -> Result<()> {
        let mut runtime = LovkitRuntime::demo();
        let request = FetchRequest {
            first_row: 1,
            dependencies: vec![Dependency {
                control: ControlId::from(DEPT),
                value: "10".to_owned(),
            }],
            ..FetchRequest::default()
        };
        let response = runtime.fetch_choices(&ControlId::from(EMP), &request)?;
        let names: Vec<&str> = response
            .values
            .iter()
            .map(|choice| choice.display_text.as_str())
            .collect();
        assert_eq!(names, vec!["CLARK", "KING", "MILLER"]);
        Ok(())
    }

    #[test]
    fn spawned_page_arrives_on_the_channel() -> Result<()> {
        let mut runtime = LovkitRuntime::demo();
        let (tx, rx) = mpsc::channel();
        runtime.spawn_page(
            ControlId::from(MANAGER),
            RequestSeq::new(3),
            FetchRequest::search("king"),
            tx,
        )?;

        let event = rx.recv_timeout(Duration::from_secs(5))?;
        let InternalEvent::Page {
            control,
            seq,
            result,
        } = event
        else {
            return Err(anyhow!("expected a page event"));
        };
        assert_eq!(control.as_str(), MANAGER);
        assert_eq!(seq, RequestSeq::new(3));
        let page = result.map_err(|error| anyhow!(error))?;
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].return_value, "7839");
        Ok(())
    }

    #[test]
    fn remote_departments_use_their_own_source() -> Result<()> {
        let server =
            Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
        let addr = format!("http://{}", server.server_addr());

        let handle = thread::spawn(move || {
            let request = server.recv().expect("request expected");
            assert_eq!(request.url(), "/lov/dept");
            let response = Response::from_string(r#"{"values":[{"value":"10","display":"ACCOUNTING"}]}"#)
                .with_header(
                    Header::from_bytes("Content-Type", "application/json")
                        .expect("valid content type header"),
                );
            request.respond(response).expect("response should succeed");
        });

        let timeout = Duration::from_secs(1);
        let mut runtime = LovkitRuntime::remote(
            Client::new(&addr, "dept", timeout)?,
            Client::new(&addr, "emp", timeout)?,
        );
        let (tx, rx) = mpsc::channel();
        runtime.spawn_choices(
            FetchPurpose::Cascade,
            ControlId::from(DEPT),
            RequestSeq::new(1),
            FetchRequest::default(),
            tx,
        )?;

        let event = rx.recv_timeout(Duration::from_secs(5))?;
        let InternalEvent::Choices { result, .. } = event else {
            return Err(anyhow!("expected a choices event"));
        };
        let response = result.map_err(|error| anyhow!(error))?;
        assert_eq!(response.values[0].display_text, "ACCOUNTING");

        handle.join().expect("server thread should join");
        Ok(())
    }

    #[test]
    fn remote_failures_arrive_as_messages() -> Result<()> {
        let timeout = Duration::from_millis(50);
        let mut runtime = LovkitRuntime::remote(
            Client::new("http://127.0.0.1:1", "dept", timeout)?,
            Client::new("http://127.0.0.1:1", "emp", timeout)?,
        );
        let (tx, rx) = mpsc::channel();
        runtime.spawn_choices(
            FetchPurpose::Search,
            ControlId::from(EMP),
            RequestSeq::new(2),
            FetchRequest::search("a"),
            tx,
        )?;

        let event = rx.recv_timeout(Duration::from_secs(5))?;
        let InternalEvent::Choices { result, .. } = event else {
            return Err(anyhow!("expected a choices event"));
        };
        let message = result.err().unwrap_or_default();
        assert!(message.contains("check remote.base_url"), "got: {message}");
        assert!(runtime.ping().is_err());
        Ok(())
    }
}
