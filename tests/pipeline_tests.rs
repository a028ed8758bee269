use std::fs;
use std::path::Path;

use tableau_housekeeping::archive::{move_to_history, HISTORY_FOLDER};
use tableau_housekeeping::client::{DumpSource, ItemKind, Listing, TableauSource};
use tableau_housekeeping::export::{write_table, ExportFormat};
use tableau_housekeeping::hierarchy::{ItemTable, ProjectTable, ROOT_CONTENT_PERMISSIONS, ROOT_ID};
use tableau_housekeeping::metadata::run_queries;
use tableau_housekeeping::permissions::build_report;
use tableau_housekeeping::FlattenedTable;

const PROJECTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tsResponse xmlns="http://tableau.com/api">
  <pagination pageNumber="1" pageSize="1000" totalAvailable="3"/>
  <projects>
    <project id="A" name="Finance" contentPermissions="LockedToProject"><owner id="u1"/></project>
    <project id="B" name="Budgets" parentProjectId="A" contentPermissions="ManagedByOwner"><owner id="u1"/></project>
    <project id="C" name="Budgets 2024" parentProjectId="B" contentPermissions="ManagedByOwner"><owner id="u1"/></project>
  </projects>
</tsResponse>"#;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A saved site: XML projects, JSON everything else.
fn saved_site(root: &Path) {
    write(root, "projects.xml", PROJECTS_XML);
    write(
        root,
        "workbooks.json",
        r#"{"pagination": {"totalAvailable": "2"}, "workbooks": {"workbook": [
            {"id": "w1", "name": "Q1", "project": {"id": "C", "name": "Budgets 2024"}, "tags": {"tag": [{"label": "core"}]}},
            {"id": "w2", "name": "Orphan", "project": {"id": "gone", "name": "Deleted"}, "tags": {"tag": [{"label": "old"}]}}
        ]}}"#,
    );
    write(root, "datasources.json", "[]");
    write(root, "flows.json", "[]");
    write(root, "groups.json", r#"[{"id": "g1", "name": "Controllers"}]"#);
    write(root, "users.json", r#"[{"id": "u1", "name": "ann"}]"#);
    write(
        root,
        "permissions/project_A.xml",
        r#"<tsResponse><permissions>
            <project id="A"/>
            <granteeCapabilities>
              <group id="g1"/>
              <capabilities>
                <capability name="Read" mode="Allow"/>
                <capability name="ExportXml" mode="Allow"/>
              </capabilities>
            </granteeCapabilities>
          </permissions></tsResponse>"#,
    );
    write(
        root,
        "permissions/workbook_w1.json",
        r#"{"permissions": {"workbook": {"id": "w1"}, "granteeCapabilities": [
            {"user": {"id": "u1"}, "capabilities": {"capability": [{"name": "Write", "mode": "Deny"}]}}
        ]}}"#,
    );
    write(
        root,
        "metadata/databases.json",
        r#"{"data": {"databases": [{"id": "d1", "name": "dwh", "connectionType": "postgres"}]}}"#,
    );
    write(root, "metadata/broken.json", r#"{"data": null, "errors": [{"message": "timeout"}]}"#);
}

#[test]
fn saved_site_resolves_roots_and_drops_orphans() {
    let dir = tempfile::tempdir().unwrap();
    saved_site(dir.path());
    let source = DumpSource::new(dir.path());

    let projects =
        ProjectTable::new(FlattenedTable::from_records(source.listing(Listing::Projects).unwrap()).unwrap()).unwrap();
    for id in ["A", "B", "C"] {
        assert_eq!(projects.root_of(id).as_deref(), Some("A"));
        assert_eq!(projects.root_permissions_of(id).as_deref(), Some("LockedToProject"));
    }

    let workbooks = FlattenedTable::from_records(source.listing(Listing::Workbooks).unwrap()).unwrap();
    let workbooks = ItemTable::new(workbooks, &projects).unwrap();
    let table = workbooks.table();
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(0, "id").and_then(|c| c.to_text()).as_deref(), Some("w1"));
    assert_eq!(table.get(0, "tags_tag_label").and_then(|c| c.to_text()).as_deref(), Some("core"));
    assert_eq!(table.get(0, ROOT_ID).and_then(|c| c.to_text()).as_deref(), Some("A"));
    assert!(table.has_column(ROOT_CONTENT_PERMISSIONS));
}

#[test]
fn permission_report_from_saved_site() {
    let dir = tempfile::tempdir().unwrap();
    saved_site(dir.path());
    let report = build_report(&DumpSource::new(dir.path())).unwrap();

    // Two capabilities on project A, one on workbook w1.
    assert_eq!(report.len(), 3);
    let capabilities: Vec<String> = report
        .rows()
        .filter_map(|r| r.text("capabilities_capability_name"))
        .collect();
    assert_eq!(capabilities, vec!["View", "Download", "Save"]);
    let grantees: Vec<String> = report.rows().filter_map(|r| r.text("grantee")).collect();
    assert_eq!(grantees, vec!["Controllers", "Controllers", "ann"]);

    let out = dir.path().join("out").join("tableau_permissions.csv");
    write_table(&report, &out, ExportFormat::Csv).unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap().lines().count(), 4);
}

#[test]
fn metadata_run_archives_earlier_exports() {
    let dir = tempfile::tempdir().unwrap();
    saved_site(dir.path());
    let folder = dir.path().join("output").join("metadata");
    write(&folder, "databases_old.csv", "id\n");

    assert_eq!(move_to_history(&folder).unwrap(), 1);
    let written = run_queries(
        &DumpSource::new(dir.path()),
        &[("databases", "{ databases { id } }"), ("broken", "{}")],
        &folder,
        "tableau_sim_finance",
        ExportFormat::Parquet,
    )
    .unwrap();

    assert_eq!(written, vec![folder.join("databases_tableau_sim_finance.parquet")]);
    assert!(written[0].exists());
    assert_eq!(fs::read_dir(folder.join(HISTORY_FOLDER)).unwrap().count(), 1);
}

#[test]
fn missing_permission_dump_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    saved_site(dir.path());
    let source = DumpSource::new(dir.path());
    assert!(source.permissions(ItemKind::Flow, "nope").is_err());
}
