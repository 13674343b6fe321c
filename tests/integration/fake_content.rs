//! Integration tests for content handling in the fake Pulp service.
//!
//! Exercises copy, removal, upload and search through `FakeClient` and
//! checks the resulting state with `FakeController`.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::redundant_clone
)]

use pulplib::model::{
    Criteria, Distributor, ErratumUnit, FileUnit, Matcher, Repository, Unit,
};
use pulplib::PulpApi;
use pulplib_fake::{FakeClient, FakeController, PAGE_SIZE};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

const SHA_HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
const SHA_WORLD: &str = "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";

/// A controller with iso repositories `ids`, each with one distributor.
fn controller_with_repos(ids: &[&str]) -> FakeController {
    let controller = FakeController::new();
    for id in ids {
        controller.insert_repository(
            Repository::new(*id)
                .with_distributors(vec![Distributor::new("iso_distributor", "iso_distributor")]),
        );
    }
    controller
}

fn file(path: &str, sha: &str) -> Unit {
    FileUnit::new(path, 5, sha).unwrap().into()
}

fn erratum(id: &str, version: &str) -> ErratumUnit {
    let mut unit = ErratumUnit::new(id);
    unit.version = Some(version.to_string());
    unit
}

/// Sorted values of `field` across `units`.
fn field_values(units: &[Unit], field: &str) -> Vec<String> {
    let mut values: Vec<String> = units
        .iter()
        .filter_map(|u| u.field(field))
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
        .collect();
    values.sort();
    values
}

fn search_all(client: &FakeClient, criteria: &Criteria) -> Vec<Unit> {
    client.search_content(criteria).result().unwrap().all().unwrap()
}

// ===========================================================================
// Copy
// ===========================================================================

#[test]
fn copy_adds_destination_membership_and_keeps_source() {
    let controller = controller_with_repos(&["A", "B"]);
    controller.insert_units(
        Some("A"),
        vec![file("one.txt", SHA_HELLO), file("two.txt", SHA_WORLD)],
    );
    let client = controller.client();

    let tasks = client.copy_content("A", "B", &Criteria::true_()).result().unwrap();
    assert!(tasks.iter().all(pulplib::model::Task::succeeded));
    assert_eq!(tasks[0].units().len(), 2);

    let in_b = controller.repository_units("B");
    assert_eq!(field_values(&in_b, "path"), ["one.txt", "two.txt"]);
    for unit in &in_b {
        assert_eq!(unit.repository_memberships(), ["A", "B"]);
    }
    assert_eq!(controller.repository_units("A").len(), 2);
    assert_eq!(controller.content_units().len(), 2);
}

#[test]
fn copy_is_idempotent() {
    let controller = controller_with_repos(&["A", "B"]);
    controller.insert_units(Some("A"), vec![file("one.txt", SHA_HELLO)]);
    let client = controller.client();

    client.copy_content("A", "B", &Criteria::true_()).result().unwrap();
    client.copy_content("A", "B", &Criteria::true_()).result().unwrap();

    let units = controller.content_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].repository_memberships(), ["A", "B"]);
}

#[test]
fn copy_honors_criteria() {
    let controller = controller_with_repos(&["src", "dest"]);
    controller.insert_units(
        Some("src"),
        vec![
            file("keep.iso", SHA_HELLO),
            ErratumUnit::new("RHSA-1").into(),
            ErratumUnit::new("RHBA-2").into(),
        ],
    );
    let client = controller.client();

    let criteria = Criteria::and([
        Criteria::with_content_types(["erratum"]),
        Criteria::with_field("id", Matcher::regex("^RHSA").unwrap()),
    ]);
    client.copy_content("src", "dest", &criteria).result().unwrap();

    let copied = controller.repository_units("dest");
    assert_eq!(field_values(&copied, "id"), ["RHSA-1"]);
}

#[test]
fn large_copies_report_units_in_batches() {
    let controller = controller_with_repos(&["src", "dest"]);
    let errata: Vec<Unit> = (0..12).map(|i| ErratumUnit::new(format!("RHEA-{i}")).into()).collect();
    controller.insert_units(Some("src"), errata);
    let client = controller.client();

    let tasks = client.copy_content("src", "dest", &Criteria::true_()).result().unwrap();
    let reported: usize = tasks.iter().map(|t| t.units().len()).sum();
    assert_eq!(tasks.len(), 3);
    assert_eq!(reported, 12);
}

#[test]
fn copy_from_missing_repository_fails() {
    let controller = controller_with_repos(&["dest"]);
    let client = controller.client();
    let err = client
        .copy_content("nope", "dest", &Criteria::true_())
        .result()
        .unwrap_err();
    assert_eq!(err.to_string(), "repository not found: nope");
}

// ===========================================================================
// Removal and deletion
// ===========================================================================

#[test]
fn remove_drops_membership_but_keeps_unit() {
    let controller = controller_with_repos(&["A", "B"]);
    controller.insert_units(Some("A"), vec![ErratumUnit::new("RHSA-1").into()]);
    controller.insert_units(Some("B"), vec![ErratumUnit::new("RHSA-1").into()]);
    let client = controller.client();

    let tasks = client
        .remove_content("A", &Criteria::with_content_types(["erratum"]))
        .result()
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].units().len(), 1);

    assert!(controller.repository_units("A").is_empty());
    let units = controller.content_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].repository_memberships(), ["B"]);
}

#[test]
fn remove_everything_needs_no_type() {
    let controller = controller_with_repos(&["A"]);
    controller.insert_units(Some("A"), vec![file("x", SHA_HELLO), ErratumUnit::new("E").into()]);
    let client = controller.client();
    client.remove_content("A", &Criteria::true_()).result().unwrap();
    assert!(controller.repository_units("A").is_empty());
    assert_eq!(controller.content_units().len(), 2);
}

#[test]
fn deleting_repository_orphans_its_units() {
    let controller = controller_with_repos(&["A"]);
    controller.insert_units(Some("A"), vec![file("x", SHA_HELLO)]);
    let client = controller.client();

    assert_eq!(client.delete_repository("A").result().unwrap().len(), 1);
    assert!(controller.repositories().is_empty());
    assert!(client.get_repository("A").result().is_err());
    let units = controller.content_units();
    assert_eq!(units.len(), 1);
    assert!(units[0].repository_memberships().is_empty());

    assert!(client.delete_repository("A").result().unwrap().is_empty());
}

#[test]
fn copy_racing_source_deletion_leaves_no_stale_membership() {
    for round in 0..20 {
        let controller = controller_with_repos(&["A", "B"]);
        let units: Vec<Unit> = (0..10)
            .map(|n| file(&format!("{round}-{n}.txt"), &format!("{n:064x}")))
            .collect();
        controller.insert_units(Some("A"), units);
        let copier = controller.client();
        let deleter = controller.client();

        std::thread::scope(|scope| {
            let copy = scope.spawn(|| copier.copy_content("A", "B", &Criteria::true_()).result());
            let delete = scope.spawn(|| deleter.delete_repository("A").result());
            delete.join().unwrap().unwrap();
            // The copy may lose the race and find A already gone.
            let _ = copy.join().unwrap();
        });

        for unit in controller.content_units() {
            assert!(
                !unit.repository_memberships().iter().any(|id| id == "A"),
                "unit still lists deleted repository: {unit:?}"
            );
        }
    }
}

// ===========================================================================
// Uploads
// ===========================================================================

#[test]
fn uploading_same_path_replaces_file_in_repository() {
    let controller = controller_with_repos(&["iso"]);
    let client = controller.client();

    client.upload_file("iso", "greeting.txt", b"hello".to_vec()).result().unwrap();
    client.upload_file("iso", "greeting.txt", b"world".to_vec()).result().unwrap();

    let files = controller.repository_units("iso");
    assert_eq!(files.len(), 1);
    assert_eq!(field_values(&files, "sha256sum"), [SHA_WORLD]);
    assert_eq!(controller.content_units().len(), 2);

    let history = controller.upload_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sha256sum, SHA_HELLO);
    assert_eq!(history[1].name, "greeting.txt");
}

#[test]
fn reuploading_identical_file_merges() {
    let controller = controller_with_repos(&["a", "b"]);
    let client = controller.client();
    client.upload_file("a", "f", b"hello".to_vec()).result().unwrap();
    client.upload_file("b", "f", b"hello".to_vec()).result().unwrap();

    let units = controller.content_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].repository_memberships(), ["a", "b"]);
}

#[test]
fn newer_erratum_versions_replace_older() {
    let controller = controller_with_repos(&["errata"]);
    let client = controller.client();

    client.upload_erratum("errata", &erratum("RHSA-9", "1")).result().unwrap();
    client.upload_erratum("errata", &erratum("RHSA-9", "3")).result().unwrap();
    client.upload_erratum("errata", &erratum("RHSA-9", "2")).result().unwrap();

    let units = controller.content_units();
    assert_eq!(units.len(), 1);
    assert!(matches!(&units[0], Unit::Erratum(e) if e.version.as_deref() == Some("3")));
}

#[test]
fn upload_to_missing_repository_fails() {
    let client = FakeClient::new();
    let err = client.upload_file("absent", "f", b"x".to_vec()).result().unwrap_err();
    assert_eq!(err.to_string(), "repository not found: absent");
    assert!(client.controller().content_units().is_empty());
}

// ===========================================================================
// Search
// ===========================================================================

#[test]
fn search_results_come_in_small_pages() {
    let controller = controller_with_repos(&["r"]);
    let errata: Vec<Unit> = (0..7).map(|i| ErratumUnit::new(format!("RHBA-{i}")).into()).collect();
    controller.insert_units(Some("r"), errata);
    let client = controller.client();

    let page = client.search_content(&Criteria::true_()).result().unwrap();
    assert_eq!(page.data.len(), PAGE_SIZE);
    assert!(page.has_next());

    let mut seen = 0;
    let mut current = Some(page);
    while let Some(page) = current {
        seen += page.data.len();
        current = page.next_page().map(Result::unwrap);
    }
    assert_eq!(seen, 7);
}

#[test]
fn search_by_membership_and_type() {
    let controller = controller_with_repos(&["a", "b"]);
    controller.insert_units(Some("a"), vec![file("f1", SHA_HELLO), ErratumUnit::new("E1").into()]);
    controller.insert_units(Some("b"), vec![ErratumUnit::new("E2").into()]);
    let client = controller.client();

    let in_a = search_all(
        &client,
        &Criteria::with_field("repository_memberships", Matcher::equals("a")),
    );
    assert_eq!(in_a.len(), 2);

    let errata = search_all(&client, &Criteria::with_content_types(["erratum"]));
    assert_eq!(field_values(&errata, "id"), ["E1", "E2"]);
}

#[test]
fn unsupported_type_is_rejected() {
    let controller = controller_with_repos(&["a"]);
    controller.set_content_type_ids(["iso"]);
    let err = controller
        .client()
        .search_content(&Criteria::with_content_types(["rpm"]))
        .result()
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid request: Content type: rpm is not supported by server"
    );
}

#[test]
fn repository_search_and_type_listing() {
    let controller = controller_with_repos(&["c", "a", "b"]);
    let client = controller.client();

    let mut ids: Vec<String> = client
        .search_repository(&Criteria::with_ids(["a", "c", "zzz"]))
        .result()
        .unwrap()
        .all()
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.sort();
    assert_eq!(ids, ["a", "c"]);

    let types = client.get_content_type_ids().result().unwrap();
    let mut sorted = types.clone();
    sorted.sort();
    assert_eq!(types, sorted);
    assert!(types.iter().any(|t| t == "erratum"));
}

// ===========================================================================
// Content updates
// ===========================================================================

#[test]
fn update_content_changes_only_mutable_fields() {
    let controller = controller_with_repos(&["repo1"]);
    let client = controller.client();
    client.upload_file("repo1", "some-file.txt", b"hello".to_vec()).result().unwrap();
    let stored = search_all(&client, &Criteria::true_()).remove(0);

    let Unit::File(mut wanted) = stored.clone() else {
        panic!("expected a file unit");
    };
    wanted.size = 1000;
    wanted.cdn_path = Some("/foo/bar.txt".into());
    wanted.description = Some("My great file".into());
    client.update_content(&wanted.into()).result().unwrap();

    let Unit::File(updated) = search_all(&client, &Criteria::true_()).remove(0) else {
        panic!("expected a file unit");
    };
    assert_eq!(updated.size, 5);
    assert_eq!(updated.cdn_path.as_deref(), Some("/foo/bar.txt"));
    assert_eq!(updated.description.as_deref(), Some("My great file"));
    assert_eq!(updated.common.unit_id.as_deref(), stored.unit_id());
    assert_eq!(updated.common.repository_memberships, ["repo1"]);
}

#[test]
fn update_content_needs_an_existing_unit() {
    let client = FakeClient::new();
    let unit = file("x", SHA_HELLO);
    let err = client.update_content(&unit).result().unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid request: unit_id missing on call to update_content()"
    );

    let missing = unit.with_unit_id("this-unit-is-missing");
    let err = client.update_content(&missing).result().unwrap_err();
    assert_eq!(err.to_string(), "unit not found: this-unit-is-missing");
}

// ===========================================================================
// Shared state
// ===========================================================================

#[test]
fn clients_on_one_state_see_each_other() {
    let controller = controller_with_repos(&["shared"]);
    let writer = controller.client();
    let reader = controller.client();

    writer.upload_file("shared", "f", b"hello".to_vec()).result().unwrap();
    let found = search_all(&reader, &Criteria::with_field("path", Matcher::equals("f")));
    assert_eq!(found.len(), 1);

    writer.close();
    assert!(writer.get_repository("shared").result().unwrap_err().is_detached());
    assert_eq!(reader.get_repository("shared").result().unwrap().id, "shared");
}
