//! Site-wide permission audit.
//!
//! Every permission rule on projects, data sources, workbooks and flows ends
//! up as one row per capability, grouped under the root project it lives in
//! and named after the group or user it is granted to.

use tracing::info;

use crate::cell::Cell;
use crate::client::{ItemKind, Listing, TableauSource};
use crate::flattener::{FlattenedTable, SNAPSHOT_COLUMN};
use crate::hierarchy::{attach_roots, ProjectTable, ID, NAME, PARENT_ID, ROOT_CONTENT_PERMISSIONS, ROOT_ID};
use crate::table::{JoinKind, Row, Table};

pub const REPORT_NAME: &str = "tableau_permissions";

pub const ITEM_ID: &str = "item_id";
pub const ITEM_NAME: &str = "item_name";
pub const ITEM_TYPE: &str = "item_type";
pub const ITEM_PROJECT: &str = "item_project";
pub const CAPABILITY_NAME: &str = "capabilities_capability_name";

const GROUP_ID: &str = "group_id";
const GROUP_NAME: &str = "group_name";
const USER_ID: &str = "user_id";
const USER_NAME: &str = "user_name";
const ITEM_PROJECT_NAME: &str = "project_name";

/// Label the Tableau UI shows for a REST capability name. Unknown names are
/// passed through.
pub fn display_capability(name: &str) -> &str {
    match name {
        "AddComment" => "Add Comment",
        "ChangeHierarchy" => "Move",
        "ChangePermissions" => "Set Permissions",
        "CreateRefreshMetrics" => "Create/Refresh Metrics",
        "Execute" => "Run Flow",
        "ExportData" => "View Summary Data",
        "ExportImage" => "Export Image",
        "ExportXml" => "Download",
        "InheritedProjectLeader" | "ProjectLeader" => "Project Leader",
        "Read" => "View",
        "RunExplainData" => "Run Explain Data",
        "ShareView" => "Share Customized",
        "SaveAs" => "Save As",
        "ViewComments" => "View Comments",
        "ViewUnderlyingData" => "View Underlying Data",
        "WebAuthoring" => "Web Edit",
        "Write" => "Save",
        other => other,
    }
}

/// Fetches the rules of every row in `items`, tagged with the item they
/// belong to. `project_column` names the column holding the item's project.
pub fn permission_rows(
    source: &dyn TableauSource,
    kind: ItemKind,
    items: &Table,
    project_column: &str,
) -> anyhow::Result<Table> {
    let tags = Table::new(
        [ITEM_ID, ITEM_NAME, ITEM_TYPE, ITEM_PROJECT, ROOT_ID]
            .map(String::from)
            .to_vec(),
    );
    let mut parts = vec![tags];
    for row in items.rows() {
        let Some(id) = row.text(ID) else { continue };
        let rules = FlattenedTable::from_records(source.permissions(kind, &id)?)?
            .into_table()
            .drop_columns(&[SNAPSHOT_COLUMN]);
        parts.push(
            rules
                .with_constant(ITEM_ID, Cell::Text(id))
                .with_constant(ITEM_NAME, row.get(NAME).cloned().unwrap_or_default())
                .with_constant(ITEM_TYPE, Cell::from(kind.as_str()))
                .with_constant(ITEM_PROJECT, row.get(project_column).cloned().unwrap_or_default())
                .with_constant(ROOT_ID, row.get(ROOT_ID).cloned().unwrap_or_default()),
        );
    }
    let rows = Table::concat(parts);
    info!(kind = kind.as_str(), items = items.len(), rules = rows.len(), "retrieved permissions");
    Ok(rows)
}

fn flat_listing(source: &dyn TableauSource, listing: Listing) -> anyhow::Result<Table> {
    Ok(FlattenedTable::from_records(source.listing(listing)?)?.into_table())
}

/// Items of a listing with their root project attached.
fn items(source: &dyn TableauSource, listing: Listing, projects: &ProjectTable) -> anyhow::Result<Table> {
    Ok(attach_roots(&flat_listing(source, listing)?, projects)?)
}

/// `id`/`name` of groups or users, renamed for joining.
fn names(source: &dyn TableauSource, listing: Listing, id: &str, name: &str) -> anyhow::Result<Table> {
    Ok(flat_listing(source, listing)?
        .with_column_if_missing(ID)
        .with_column_if_missing(NAME)
        .select(&[ID, NAME])?
        .rename(&[(ID, id), (NAME, name)]))
}

/// A rule names either a group or a user.
fn pick_grantee(row: &Row<'_>, group: Cell, user: Cell) -> Cell {
    if row.text(USER_ID).is_some() {
        user
    } else if row.text(GROUP_ID).is_some() {
        group
    } else {
        Cell::Null
    }
}

/// Builds the full permission report for the site behind `source`.
pub fn build_report(source: &dyn TableauSource) -> anyhow::Result<Table> {
    let projects = ProjectTable::new(FlattenedTable::from_records(source.listing(Listing::Projects)?)?)?;
    let datasources = items(source, Listing::DataSources, &projects)?;
    let workbooks = items(source, Listing::Workbooks, &projects)?;
    let flows = items(source, Listing::Flows, &projects)?;
    let groups = names(source, Listing::Groups, GROUP_ID, GROUP_NAME)?;
    let users = names(source, Listing::Users, USER_ID, USER_NAME)?;

    let roots = projects.roots();
    // Locked sub-projects share the rules of their root.
    let project_rules = permission_rows(source, ItemKind::Project, &projects.with_own_permissions(), NAME)?;
    let mut parts = vec![roots.join(&project_rules, ID, ROOT_ID, JoinKind::Left)?];
    for (kind, table) in [
        (ItemKind::DataSource, &datasources),
        (ItemKind::Workbook, &workbooks),
        (ItemKind::Flow, &flows),
    ] {
        let rules = permission_rows(source, kind, table, ITEM_PROJECT_NAME)?;
        parts.push(roots.join(&rules, ID, ROOT_ID, JoinKind::Inner)?);
    }

    let report = Table::concat(parts)
        .with_column_if_missing(GROUP_ID)
        .with_column_if_missing(USER_ID)
        .with_column_if_missing(CAPABILITY_NAME)
        .join(&groups, GROUP_ID, GROUP_ID, JoinKind::Left)?
        .join(&users, USER_ID, USER_ID, JoinKind::Left)?;

    let report = report
        .with_computed("grantee_type", |row| pick_grantee(row, Cell::from("group"), Cell::from("user")))
        .with_computed("grantee_id", |row| {
            pick_grantee(
                row,
                row.get(GROUP_ID).cloned().unwrap_or_default(),
                row.get(USER_ID).cloned().unwrap_or_default(),
            )
        })
        .with_computed("grantee", |row| {
            pick_grantee(
                row,
                row.get(GROUP_NAME).cloned().unwrap_or_default(),
                row.get(USER_NAME).cloned().unwrap_or_default(),
            )
        })
        .drop_columns(&[PARENT_ID, GROUP_ID, USER_ID, GROUP_NAME, USER_NAME])
        .rename(&[
            (NAME, "root_parent_project_name"),
            (ROOT_ID, "root_parent_project_id"),
            (ROOT_CONTENT_PERMISSIONS, "root_parent_content_permissions"),
        ])
        .map_column(CAPABILITY_NAME, |cell| match cell {
            Cell::Text(name) => Cell::from(display_capability(name)),
            other => other.clone(),
        })?;

    info!(rows = report.len(), "combined permissions");
    Ok(report)
}
