//! Integration tests for the Pulp client over a scripted transport.
//!
//! Each test scripts the server's answers, runs one client operation and
//! checks both the outcome and the requests the client sent.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names
)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use pulplib::model::codec::encode_call_report;
use pulplib::model::{
    Criteria, Distributor, FileUnit, MaintenanceReport, Matcher, PublishOptions, PulpObject,
    Repository, SyncOptions, TaskId, Unit,
};
use pulplib::transport::scripted::ScriptedTransport;
use pulplib::transport::{Body, Method, Request, Transport, TransportError};
use pulplib::{Client, ClientConfig, ProxyFuture, PulpApi, PulpError};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

const API: &str = "pulp/api/v2/";

const SHA_ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn api(path: &str) -> String {
    format!("{API}{path}")
}

/// A client that polls quickly and never sleeps between retries.
fn client(transport: ScriptedTransport) -> Client<ScriptedTransport> {
    let config = ClientConfig {
        poll_interval: Duration::from_millis(5),
        retry_attempts: 3,
        ..ClientConfig::default()
    };
    let retry = config.retry_policy().with_sleeper(|_| {});
    Client::with_retry_policy(transport, &config, retry)
}

/// Holds every DELETE until opened, recording how many were in flight.
#[derive(Default)]
struct GatedTransport {
    script: ScriptedTransport,
    open: Mutex<bool>,
    opened: Condvar,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedTransport {
    fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

impl Transport for GatedTransport {
    fn call(&self, request: &Request) -> Result<Value, TransportError> {
        if request.method == Method::Delete {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            drop(open);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.script.call(request)
    }
}

fn report(ids: &[&str]) -> Value {
    let ids: Vec<TaskId> = ids.iter().copied().map(TaskId::new).collect();
    encode_call_report(&ids)
}

fn task(id: &str, state: &str) -> Value {
    json!({"task_id": id, "state": state, "tags": []})
}

fn json_body(body: &Body) -> &Value {
    match body {
        Body::Json(value) => value,
        other => panic!("expected a JSON body, got {other:?}"),
    }
}

/// Scripts a repository lookup returning `repo`.
fn script_repository(transport: &ScriptedTransport, repo: &Repository) {
    transport.respond_json(
        Method::Post,
        api("repositories/search/"),
        json!([repo.to_data()]),
    );
}

// ===========================================================================
// Repositories
// ===========================================================================

#[test]
fn get_repository_decodes_search_result() {
    let transport = ScriptedTransport::new();
    let repo = Repository::new("rhel-7").with_distributors(vec![Distributor::new(
        "yum_distributor",
        "yum_distributor",
    )]);
    script_repository(&transport, &repo);
    let client = client(transport);

    let found = client.get_repository("rhel-7").result().unwrap();
    assert_eq!(found.id, "rhel-7");
    assert_eq!(found.distributors.len(), 1);

    let sent = client.transport().requests();
    assert_eq!(sent.len(), 1);
    let body = json_body(&sent[0].body);
    assert_eq!(body["distributors"], json!(true));
    assert_eq!(body["criteria"]["skip"], json!(0));
}

#[test]
fn get_missing_repository_is_not_found() {
    let transport = ScriptedTransport::new();
    transport.respond_json(Method::Post, api("repositories/search/"), json!([]));
    let client = client(transport);
    let err = client.get_repository("nope").result().unwrap_err();
    assert_eq!(err.to_string(), "repository not found: nope");
}

#[test]
fn publish_runs_each_distributor_in_order() {
    let transport = ScriptedTransport::new();
    let repo = Repository::new("r1").with_distributors(vec![
        Distributor::new("yum_distributor", "yum_distributor"),
        Distributor::new("cdn_distributor", "rpm_rsync_distributor"),
    ]);
    script_repository(&transport, &repo);
    let publish = api("repositories/r1/actions/publish/");
    transport
        .respond_json(Method::Post, publish.clone(), report(&["t1"]))
        .respond_json(Method::Post, publish.clone(), report(&["t2"]))
        .respond_json(
            Method::Post,
            api("tasks/search/"),
            json!([task("t1", "finished"), task("t2", "finished")]),
        );
    let client = client(transport);

    let tasks = client.publish_repository("r1").result().unwrap();
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["t1", "t2"]);

    let publishes = client.transport().requests_to(Method::Post, &publish);
    let distributors: Vec<&Value> = publishes.iter().map(|r| &json_body(&r.body)["id"]).collect();
    assert_eq!(distributors, [&json!("yum_distributor"), &json!("cdn_distributor")]);
}

#[test]
fn publish_options_reach_each_distributor() {
    let transport = ScriptedTransport::new();
    let repo = Repository::new("r1").with_distributors(vec![
        Distributor::new("docker_web_distributor_name_cli", "docker_distributor_web"),
        Distributor::new("yum_distributor", "yum_distributor"),
        Distributor::new("cdn_distributor", "rpm_rsync_distributor"),
    ]);
    script_repository(&transport, &repo);
    let publish = api("repositories/r1/actions/publish/");
    transport
        .respond_json(Method::Post, publish.clone(), report(&["t1"]))
        .respond_json(Method::Post, api("tasks/search/"), json!([task("t1", "finished")]));
    let client = client(transport);

    let options = PublishOptions {
        force: Some(true),
        clean: Some(false),
        origin_only: Some(true),
    };
    client.publish_repository_with("r1", &options).result().unwrap();

    let publishes = client.transport().requests_to(Method::Post, &publish);
    let bodies: Vec<&Value> = publishes.iter().map(|r| json_body(&r.body)).collect();
    assert_eq!(
        bodies,
        [
            &json!({"id": "yum_distributor", "override_config": {"force_full": true}}),
            &json!({
                "id": "cdn_distributor",
                "override_config": {"force_full": true, "delete": false, "content_units_only": true}
            }),
        ]
    );
}

#[test]
fn update_repository_sends_only_mutable_notes() {
    let transport = ScriptedTransport::new();
    transport.respond_json(Method::Put, api("repositories/my-repo/"), Value::Null);
    let client = client(transport);

    let mut repo = Repository::new("my-repo").with_product_versions(["1.1", "1.0"]);
    repo.eng_product_id = Some("123".into());
    client.update_repository(&repo).result().unwrap();

    let sent = client.transport().requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Put);
    assert_eq!(
        json_body(&sent[0].body),
        &json!({"delta": {"notes": {"product_versions": "[\"1.0\",\"1.1\"]"}}})
    );
}

#[test]
fn failed_repository_update_is_reported() {
    let transport = ScriptedTransport::new();
    transport.respond_status(Method::Put, api("repositories/my-repo/"), 400);
    let client = client(transport);
    let err = client
        .update_repository(&Repository::new("my-repo"))
        .result()
        .unwrap_err();
    assert!(err.to_string().contains("400"), "{err}");
}

#[test]
fn search_distributor_filters_by_pulp_names() {
    let transport = ScriptedTransport::new();
    transport.respond_json(
        Method::Post,
        api("distributors/search/"),
        json!([{
            "id": "yum_distributor",
            "distributor_type_id": "yum_distributor",
            "repo_id": "r1",
            "config": {"relative_url": "content/r1"}
        }]),
    );
    let client = client(transport);

    let found = client
        .search_distributor(&Criteria::with_field("type_id", Matcher::equals("yum_distributor")))
        .result()
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].repo_id.as_deref(), Some("r1"));
    assert_eq!(found[0].relative_url.as_deref(), Some("content/r1"));

    let sent = client.transport().requests();
    assert_eq!(
        json_body(&sent[0].body)["criteria"]["filters"],
        json!({"distributor_type_id": {"$eq": "yum_distributor"}})
    );
}

// ===========================================================================
// Content updates
// ===========================================================================

#[test]
fn update_content_puts_user_metadata() {
    let transport = ScriptedTransport::new();
    let path = api("content/units/iso/u1/pulp_user_metadata/");
    transport.respond_json(Method::Put, path.clone(), Value::Null);
    let client = client(transport);

    let mut file = FileUnit::new("a.iso", 3, SHA_ABC).unwrap();
    file.cdn_path = Some("/content/a.iso".into());
    let unit = Unit::from(file).with_unit_id("u1");
    client.update_content(&unit).result().unwrap();

    let sent = client.transport().requests_to(Method::Put, &path);
    assert_eq!(sent.len(), 1);
    assert_eq!(
        json_body(&sent[0].body),
        &json!({"description": null, "cdn_path": "/content/a.iso"})
    );
}

#[test]
fn update_content_needs_a_unit_id() {
    let client = client(ScriptedTransport::new());
    let unit: Unit = FileUnit::new("a.iso", 3, SHA_ABC).unwrap().into();
    let err = client.update_content(&unit).result().unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid request: unit_id missing on call to update_content()"
    );
    assert!(client.transport().requests().is_empty());
}

#[test]
fn failed_sync_task_is_resubmitted() {
    let transport = ScriptedTransport::new();
    let sync = api("repositories/r1/actions/sync/");
    transport
        .respond_json(Method::Post, sync.clone(), report(&["t1"]))
        .respond_json(Method::Post, sync.clone(), report(&["t2"]))
        .respond_json(Method::Post, api("tasks/search/"), json!([task("t1", "error")]))
        .respond_json(Method::Post, api("tasks/search/"), json!([task("t2", "finished")]));
    let client = client(transport);

    let tasks = client
        .sync_repository("r1", &SyncOptions::new("https://cdn.example.com/rhel/"))
        .result()
        .unwrap();
    assert_eq!(tasks[0].id.as_str(), "t2");

    let syncs = client.transport().requests_to(Method::Post, &sync);
    assert_eq!(syncs.len(), 2);
    assert_eq!(
        json_body(&syncs[0].body)["override_config"]["feed"],
        json!("https://cdn.example.com/rhel/")
    );
}

#[test]
fn persistent_task_failure_exhausts_retries() {
    let transport = ScriptedTransport::new();
    transport
        .respond_json(Method::Delete, api("repositories/r1/"), report(&["t1"]))
        .respond_json(Method::Post, api("tasks/search/"), json!([task("t1", "error")]));
    let client = client(transport);

    let err = client.delete_repository("r1").result().unwrap_err();
    assert!(matches!(err, PulpError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(err.failed_task().map(|t| t.id.as_str()), Some("t1"));
    assert_eq!(
        client
            .transport()
            .requests_to(Method::Delete, &api("repositories/r1/"))
            .len(),
        3
    );
}

// ===========================================================================
// Content
// ===========================================================================

#[test]
fn copy_sends_one_request_per_content_type() {
    let transport = ScriptedTransport::new();
    let associate = api("repositories/dest/actions/associate/");
    transport
        .respond_json(Method::Post, associate.clone(), report(&["c1"]))
        .respond_json(Method::Post, associate.clone(), report(&["c2"]))
        .respond_json(
            Method::Post,
            api("tasks/search/"),
            json!([task("c1", "finished"), task("c2", "finished")]),
        );
    let client = client(transport);

    let tasks = client
        .copy_content("src", "dest", &Criteria::with_content_types(["rpm", "srpm"]))
        .result()
        .unwrap();
    assert_eq!(tasks.len(), 2);

    let mut types: Vec<Value> = client
        .transport()
        .requests_to(Method::Post, &associate)
        .iter()
        .map(|r| {
            let body = json_body(&r.body);
            assert_eq!(body["source_repo_id"], json!("src"));
            body["criteria"]["type_ids"].clone()
        })
        .collect();
    types.sort_by_key(Value::to_string);
    assert_eq!(types, [json!(["rpm"]), json!(["srpm"])]);
}

#[test]
fn copy_into_same_repository_is_rejected() {
    let client = client(ScriptedTransport::new());
    let err = client
        .copy_content("r1", "r1", &Criteria::true_())
        .result()
        .unwrap_err();
    assert!(matches!(err, PulpError::Invalid(_)));
    assert!(client.transport().requests().is_empty());
}

#[test]
fn search_content_pages_lazily() {
    let transport = ScriptedTransport::new();
    let search = api("content/units/erratum/search/");
    transport
        .respond_json(Method::Get, api("plugins/types/"), json!([{"id": "erratum"}]))
        .respond_json(
            Method::Post,
            search.clone(),
            json!([
                {"id": "RHSA-1", "_id": "u1", "repository_memberships": ["r"]},
                {"id": "RHSA-2", "_id": "u2", "repository_memberships": ["r"]},
            ]),
        )
        .respond_json(
            Method::Post,
            search.clone(),
            json!([{"id": "RHSA-3", "_id": "u3", "repository_memberships": []}]),
        );
    let config = ClientConfig {
        poll_interval: Duration::from_millis(5),
        page_size: 2,
        ..ClientConfig::default()
    };
    let client = Client::with_config(transport, &config);

    let page = client
        .search_content(&Criteria::with_content_types(["erratum"]))
        .result()
        .unwrap();
    assert_eq!(page.data.len(), 2);
    assert!(page.has_next());
    assert_eq!(client.transport().requests_to(Method::Post, &search).len(), 1);

    let units = page.all().unwrap();
    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|u| u.content_type_id() == "erratum"));
    let searches = client.transport().requests_to(Method::Post, &search);
    assert_eq!(json_body(&searches[1].body)["criteria"]["skip"], json!(2));
}

#[test]
fn upload_pushes_chunks_imports_and_cleans_up() {
    let transport = ScriptedTransport::new();
    transport
        .respond_json(Method::Post, api("content/uploads/"), json!({"upload_id": "up1"}))
        .respond_json(Method::Put, api("content/uploads/up1/0/"), Value::Null)
        .respond_json(
            Method::Post,
            api("repositories/iso-repo/actions/import_upload/"),
            report(&["imp"]),
        )
        .respond_json(Method::Post, api("tasks/search/"), json!([task("imp", "finished")]))
        .respond_json(Method::Delete, api("content/uploads/up1/"), Value::Null);
    let client = client(transport);

    let tasks = client
        .upload_file("iso-repo", "hello.txt", b"hello".to_vec())
        .result()
        .unwrap();
    assert_eq!(tasks[0].id.as_str(), "imp");

    let sent = client.transport();
    let chunk = &sent.requests_to(Method::Put, &api("content/uploads/up1/0/"))[0];
    assert_eq!(chunk.body, Body::Bytes(b"hello".to_vec()));

    let import = &sent.requests_to(Method::Post, &api("repositories/iso-repo/actions/import_upload/"))[0];
    let body = json_body(&import.body);
    assert_eq!(body["unit_type_id"], json!("iso"));
    assert_eq!(body["upload_id"], json!("up1"));
    assert_eq!(
        body["unit_key"],
        json!({
            "name": "hello.txt",
            "checksum": "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
            "size": 5,
        })
    );
    assert_eq!(sent.requests_to(Method::Delete, &api("content/uploads/up1/")).len(), 1);
}

// ===========================================================================
// Maintenance
// ===========================================================================

#[test]
fn missing_maintenance_report_is_empty() {
    let client = client(ScriptedTransport::new());
    let report = client.get_maintenance_report().result().unwrap();
    assert_eq!(report.repo_ids().count(), 0);
    assert_eq!(client.transport().requests().len(), 1);
}

#[test]
fn published_maintenance_report_is_decoded() {
    let transport = ScriptedTransport::new();
    let published = MaintenanceReport::default().add(["rhel-7"], "ops", Some("outage"));
    transport.respond_json(
        Method::Get,
        "pulp/isos/redhat-maintenance/repos.json",
        published.to_data(),
    );
    let client = client(transport);
    let report = client.get_maintenance_report().result().unwrap();
    assert!(report.contains("rhel-7"));
}

#[test]
fn server_errors_are_retried_then_reported() {
    let transport = ScriptedTransport::new();
    transport.respond_status(Method::Get, "pulp/isos/redhat-maintenance/repos.json", 503);
    let client = client(transport);
    let err = client.get_maintenance_report().result().unwrap_err();
    assert!(matches!(err, PulpError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(client.transport().requests().len(), 3);
}

// ===========================================================================
// Threads and polling
// ===========================================================================

#[test]
fn dropped_operation_stops_polling() {
    let transport = ScriptedTransport::new();
    transport
        .respond_json(Method::Delete, api("repositories/r1/"), report(&["t1"]))
        .respond_json(Method::Post, api("tasks/search/"), json!([task("t1", "running")]));
    let client = client(transport);
    let searches = || client.transport().requests_to(Method::Post, &api("tasks/search/")).len();

    let future = client.delete_repository("r1");
    while searches() < 3 {
        std::thread::sleep(Duration::from_millis(5));
    }
    drop(future);

    std::thread::sleep(Duration::from_millis(100));
    let settled = searches();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(searches(), settled);
}

#[test]
fn pending_operations_share_the_request_threads() {
    let transport = GatedTransport::default();
    transport
        .script
        .respond_json(Method::Post, api("tasks/search/"), json!([task("t1", "finished")]));
    for n in 0..6 {
        transport
            .script
            .respond_json(Method::Delete, api(&format!("repositories/r{n}/")), report(&["t1"]));
    }
    let config = ClientConfig {
        poll_interval: Duration::from_millis(5),
        request_threads: 2,
        ..ClientConfig::default()
    };
    let client = Client::with_retry_policy(transport, &config, config.retry_policy().with_sleeper(|_| {}));

    let deletes: Vec<_> = (0..6)
        .map(|n| client.delete_repository(&format!("r{n}")))
        .collect();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(client.transport().peak.load(Ordering::SeqCst), 2);

    client.transport().open();
    let done = ProxyFuture::join_all(deletes)
        .result_timeout(Duration::from_secs(5))
        .unwrap();
    assert!(done.iter().all(|tasks| tasks.len() == 1 && tasks[0].succeeded()));
    assert_eq!(client.transport().peak.load(Ordering::SeqCst), 2);
}
