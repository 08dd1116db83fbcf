use std::sync::Arc;

use pool_core::config::{CliOverrides, GlobalConfig, resolve};
use pool_core::hosts::{HostPrinter, format_host_output, standardize_hostnames};
use pool_core::testing::{MockTransport, RecordingLog, reply};
use pool_core::{BackendKind, Error, OsRequest, PollOutcome, Retrieved, Service, bulk};
use serde_json::json;

const CONFIG: &str = r#"
user = "alice"
token = "default-token"

[services.vm]
url = "http://pooler.test/api/v1"
token = "vm-token"

[services.abs]
type = "ABS"
url = "http://abs.test/api/v2"
vmpooler_fallback = "vm"
priority = 3
"#;

fn global() -> GlobalConfig {
    toml::from_str(CONFIG).unwrap()
}

fn service(
    cli: CliOverrides,
    responses: Vec<pool_http::Response>,
) -> (Service, Arc<MockTransport>, Arc<RecordingLog>) {
    let config = resolve(&global(), &cli).unwrap();
    let transport = Arc::new(MockTransport::new(responses));
    let log = Arc::new(RecordingLog::default());
    let service = Service::new(config, transport.clone(), log.clone(), false).unwrap();
    (service, transport, log)
}

fn named(name: &str) -> CliOverrides {
    CliOverrides {
        service: Some(name.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn get_and_print_from_the_default_service() {
    let (service, transport, _) = service(
        CliOverrides::default(),
        vec![reply(
            200,
            json!({
                "ok": true,
                "domain": "d.net",
                "centos-7-x86_64": { "hostname": ["h1", "h2"] },
                "debian-10-x86_64": { "hostname": "h3" },
            }),
        )],
    );
    assert_eq!(service.kind(), BackendKind::Primary);

    let os = OsRequest::from_args(["centos-7-x86_64=2", "debian-10-x86_64"]).unwrap();
    let Retrieved::Allocated(raw) = service.retrieve(&os, true, false).await.unwrap() else {
        panic!("vmpooler allocates synchronously");
    };

    let groups = standardize_hostnames(&raw).unwrap();
    assert_eq!(
        format_host_output(&groups),
        "- h1.d.net (centos-7-x86_64)\n- h2.d.net (centos-7-x86_64)\n- h3.d.net (debian-10-x86_64)"
    );

    let request = &transport.requests()[0];
    assert_eq!(request.header_value("x-auth-token"), Some("vm-token"));
}

#[tokio::test(start_paused = true)]
async fn abs_request_is_polled_until_allocated() {
    let (service, transport, log) = service(
        named("abs"),
        vec![
            reply(202, json!({})),
            reply(202, json!({})),
            reply(200, json!([])),
            reply(
                200,
                json!([{ "hostname": "a.example.net", "type": "centos-7-x86_64", "engine": "vmpooler" }]),
            ),
        ],
    );
    assert_eq!(service.kind(), BackendKind::Broker);

    let os = OsRequest::from_args(["centos-7-x86_64"]).unwrap();
    let Retrieved::Pending(request) = service.retrieve(&os, true, false).await.unwrap() else {
        panic!("abs requests are queued");
    };
    let PollOutcome::Fulfilled(body) = service.wait_for_request(&request, true).await.unwrap() else {
        panic!("request should be fulfilled");
    };

    let groups = standardize_hostnames(&body).unwrap();
    assert_eq!(format_host_output(&groups), "- a.example.net (centos-7-x86_64)");

    // The same body is replayed on every probe, priority included.
    let bodies: Vec<_> = transport.requests().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies.len(), 4);
    assert!(bodies.iter().all(|b| b == &bodies[0]));
    let sent: serde_json::Value = serde_json::from_str(bodies[0].as_deref().unwrap()).unwrap();
    assert_eq!(sent["priority"], 3);
    assert_eq!(
        log.infos()
            .iter()
            .filter(|m| m.starts_with("waiting for request"))
            .count(),
        2
    );
}

#[tokio::test]
async fn abs_query_is_enriched_by_the_fallback() {
    let queue = json!([{
        "state": "allocated",
        "allocated_resources": [
            { "hostname": "a.d.net", "type": "centos-7-x86_64", "engine": "vmpooler" },
        ],
        "request": { "job": { "id": "alice-1", "user": "alice" } },
    }]);
    let detail = json!({
        "ok": true,
        "a": { "state": "running", "template": "centos-7-x86_64", "running": 2, "lifetime": 24, "domain": "d.net" },
    });
    let (abs, transport, _) = service(named("abs"), vec![reply(200, queue), reply(200, detail)]);

    let global = global();
    let fallback = abs.fallback(&global).unwrap().unwrap();
    assert_eq!(fallback.token(), Some("vm-token"));
    assert_eq!(fallback.url(), "http://pooler.test/api/v1");

    let printed = HostPrinter::new(&abs, Some(&fallback))
        .pretty_print_hosts(&["alice-1".to_string()])
        .await;

    assert_eq!(
        printed.lines,
        vec![
            "- [JobID:alice-1] <allocated>",
            "  - a.d.net (running, centos-7-x86_64, 2/24 hours)",
        ]
    );
    assert_eq!(
        transport.calls(),
        vec!["GET http://abs.test/api/v2/status/queue", "GET vm/a"]
    );
}

#[tokio::test]
async fn unsupported_operations_never_reach_the_network() {
    let (service, transport, _) = service(named("abs"), vec![]);
    let err = service.revert("alice-1", Some("snap")).await.unwrap_err();
    assert!(
        matches!(err, Error::Unsupported { operation: "revert", kind: BackendKind::Broker }),
        "{err}"
    );
    assert_eq!(err.to_string(), "revert is not supported by the abs service type");
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn bulk_modify_reports_partial_success() {
    let (service, _, _) = service(
        named("vm"),
        vec![
            reply(200, json!({ "ok": true })),
            reply(500, json!({ "ok": false })),
            reply(200, json!({ "ok": true })),
        ],
    );
    let hosts: Vec<String> = ["h1", "h2", "h3"].iter().map(|h| h.to_string()).collect();
    let patch = pool_core::ModifyPatch {
        lifetime: Some(24),
        ..Default::default()
    };

    let report = bulk::modify_many(&service, &hosts, &patch).await.unwrap();
    assert_eq!(report.succeeded, vec!["h1", "h3"]);
    assert_eq!(report.failed.iter().map(|(h, _)| h.as_str()).collect::<Vec<_>>(), vec!["h2"]);
}
