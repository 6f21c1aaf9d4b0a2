// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow};
use lovkit_core::{
    Choice, ControlId, DataSource, Dependency, FetchRequest, RecordSource, SortDirection,
    SortSpec,
};
use lovkit_remote::Client;
use std::io::Read;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

fn json_response(body: &str, status: u16) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body)
        .with_status_code(status)
        .with_header(
            Header::from_bytes("Content-Type", "application/json")
                .expect("valid content type header"),
        )
}

#[test]
fn unreachable_server_error_is_actionable() {
    let client = Client::new("http://127.0.0.1:1", "emp", Duration::from_millis(50))
        .expect("client should initialize");

    let error = client
        .ping()
        .expect_err("ping should fail for unreachable endpoint");
    let message = error.to_string();
    assert!(message.contains("check remote.base_url"), "got: {message}");
}

#[test]
fn fetch_posts_request_and_decodes_choices() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/api", server.server_addr());

    let handle = thread::spawn(move || {
        let mut request = server.recv().expect("request expected");
        assert_eq!(request.url(), "/api/lov/emp");
        assert_eq!(request.method().as_str(), "POST");
        let mut body = String::new();
        request
            .as_reader()
            .read_to_string(&mut body)
            .expect("request body should be readable");
        let sent: serde_json::Value = serde_json::from_str(&body).expect("request body is json");
        assert_eq!(sent["search"], "cl");
        assert_eq!(sent["dependencies"]["P1_DEPT"], "10");

        let response = json_response(
            r#"{"values":[{"value":"7782","display":"CLARK","group":"MANAGER"},{"value":"7934"}],"default":"7782","more":true}"#,
            200,
        );
        request.respond(response).expect("response should succeed");
    });

    let mut client = Client::new(&addr, "emp", Duration::from_secs(1))?;
    let request = FetchRequest {
        dependencies: vec![Dependency {
            control: ControlId::from("P1_DEPT"),
            value: "10".to_owned(),
        }],
        ..FetchRequest::search("cl")
    };
    let response = client.fetch(&request)?;

    assert_eq!(
        response.values,
        vec![
            Choice::new("7782", "CLARK").with_group("MANAGER"),
            Choice::new("7934", "7934"),
        ]
    );
    assert_eq!(response.default_value.as_deref(), Some("7782"));
    assert!(response.more_available);

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn fetch_page_reads_records_endpoint() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}", server.server_addr());

    let handle = thread::spawn(move || {
        let mut request = server.recv().expect("request expected");
        assert_eq!(request.url(), "/lov/emp/records");
        let mut body = String::new();
        request
            .as_reader()
            .read_to_string(&mut body)
            .expect("request body should be readable");
        let sent: serde_json::Value = serde_json::from_str(&body).expect("request body is json");
        assert_eq!(sent["first_row"], 11);
        assert_eq!(sent["sort"]["direction"], "asc");

        let response = json_response(
            r#"{"records":[{"value":"7839","display":"KING","cells":{"JOB":"PRESIDENT","SAL":5000}}],"more":false}"#,
            200,
        );
        request.respond(response).expect("response should succeed");
    });

    let mut client = Client::new(&addr, "emp", Duration::from_secs(1))?;
    let request = FetchRequest {
        sort: Some(SortSpec {
            column: "ENAME".to_owned(),
            direction: SortDirection::Asc,
        }),
        first_row: 11,
        max_rows: Some(10),
        ..FetchRequest::default()
    };
    let page = client.fetch_page(&request)?;

    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].display_value, "KING");
    assert_eq!(page.records[0].cell("SAL"), Some("5000"));
    assert!(!page.more_available);

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn server_errors_surface_the_message() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        let response = json_response(r#"{"error":{"message":"unknown LOV emp"}}"#, 404);
        request.respond(response).expect("response should succeed");
    });

    let client = Client::new(&addr, "emp", Duration::from_secs(1))?;
    let error = client
        .fetch_choices(&FetchRequest::search("x"))
        .expect_err("404 should fail");
    assert_eq!(error.to_string(), "server error (404): unknown LOV emp");

    handle.join().expect("server thread should join");
    Ok(())
}
