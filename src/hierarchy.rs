//! Root-project resolution for the Tableau project tree.
//!
//! Permission locks are set on top-level projects and inherited by everything
//! below them, so projects and the items they contain are grouped by the root
//! of their lineage.

use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

use crate::cell::Cell;
use crate::error::{HousekeepingError, Result};
use crate::flattener::{FlattenedTable, SNAPSHOT_COLUMN};
use crate::table::{JoinKind, Table};

pub const ID: &str = "id";
pub const NAME: &str = "name";
pub const PARENT_ID: &str = "parentProjectId";
pub const CONTENT_PERMISSIONS: &str = "contentPermissions";
pub const ROOT_ID: &str = "rootParentProjectId";
pub const ROOT_CONTENT_PERMISSIONS: &str = "rootParentContentPermissions";
/// Project reference of a flattened workbook, data source or flow.
pub const ITEM_PROJECT_ID: &str = "project_id";

/// Permission mode that stops sub-projects from having their own rules.
pub const LOCKED_TO_PROJECT: &str = "LockedToProject";

/// Resolves the root project of every row in a project table.
///
/// The result is positionally aligned with the table's rows. Walks are
/// iterative, and every id met on the way is memoised so shared prefixes are
/// only followed once.
pub fn resolve_roots(projects: &Table) -> Result<Vec<String>> {
    if projects.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = projects
        .column(ID)?
        .enumerate()
        .map(|(i, c)| {
            c.to_text().ok_or_else(|| HousekeepingError::MalformedRecord {
                index: i,
                found: "a project without an id".to_string(),
            })
        })
        .collect::<Result<_>>()?;
    let parents: Vec<Option<String>> = if projects.has_column(PARENT_ID) {
        projects.column(PARENT_ID)?.map(Cell::to_text).collect()
    } else {
        vec![None; ids.len()]
    };

    let parent_of: AHashMap<&str, Option<&str>> = ids
        .iter()
        .zip(&parents)
        .map(|(id, parent)| (id.as_str(), parent.as_deref()))
        .collect();

    let mut root_of: AHashMap<&str, &str> = AHashMap::with_capacity(ids.len());
    for id in &ids {
        let mut path: Vec<&str> = Vec::new();
        let mut visited: AHashSet<&str> = AHashSet::new();
        let mut current: &str = id;
        let root = loop {
            if let Some(root) = root_of.get(current) {
                break *root;
            }
            if !visited.insert(current) {
                return Err(HousekeepingError::CyclicHierarchy {
                    project: current.to_string(),
                });
            }
            match parent_of.get(current).copied().flatten() {
                None => break current,
                Some(parent) => {
                    if !parent_of.contains_key(parent) {
                        return Err(HousekeepingError::BrokenHierarchy {
                            project: current.to_string(),
                            parent: parent.to_string(),
                        });
                    }
                    path.push(current);
                    current = parent;
                }
            }
        };
        root_of.insert(current, root);
        for node in path {
            root_of.insert(node, root);
        }
    }

    Ok(ids
        .iter()
        .map(|id| root_of.get(id.as_str()).map(|r| r.to_string()).unwrap_or_default())
        .collect())
}

/// Projects annotated with their root project and the root's permission lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectTable {
    table: Table,
}

impl ProjectTable {
    pub const COLUMNS_TO_KEEP: [&'static str; 6] = [
        SNAPSHOT_COLUMN,
        ID,
        NAME,
        PARENT_ID,
        ROOT_ID,
        ROOT_CONTENT_PERMISSIONS,
    ];

    pub fn new(projects: FlattenedTable) -> Result<Self> {
        Self::from_table(projects.into_table())
    }

    /// Resolves an already flattened project table.
    pub fn from_table(projects: Table) -> Result<Self> {
        if projects.is_empty() {
            return Ok(Self {
                table: Table::new(Self::COLUMNS_TO_KEEP.map(String::from).to_vec()),
            });
        }
        let roots = resolve_roots(&projects)?;
        let projects = projects
            .with_column_if_missing(PARENT_ID)
            .with_column_if_missing(CONTENT_PERMISSIONS)
            .with_values(ROOT_ID, roots.into_iter().map(Cell::Text).collect());

        let root_rows = projects
            .filter(|row| row.text(PARENT_ID).is_none())
            .select(&[ROOT_ID, CONTENT_PERMISSIONS])?
            .rename(&[(CONTENT_PERMISSIONS, ROOT_CONTENT_PERMISSIONS)]);

        let joined = projects.join(&root_rows, ROOT_ID, ROOT_ID, JoinKind::Inner)?;
        let table = joined.with_column_if_missing(SNAPSHOT_COLUMN).select(&Self::COLUMNS_TO_KEEP)?;
        debug!(projects = table.len(), "resolved root projects");
        Ok(Self { table })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }

    /// Projects without a parent.
    pub fn roots(&self) -> Table {
        self.table.filter(|row| row.text(PARENT_ID).is_none())
    }

    /// Root projects plus sub-projects that carry their own permission rules.
    pub fn with_own_permissions(&self) -> Table {
        self.table.filter(|row| {
            row.text(PARENT_ID).is_none()
                || row.text(ROOT_CONTENT_PERMISSIONS).as_deref() != Some(LOCKED_TO_PROJECT)
        })
    }

    fn lookup(&self, project_id: &str) -> Option<(Cell, Cell)> {
        self.table
            .rows()
            .find(|row| row.text(ID).as_deref() == Some(project_id))
            .map(|row| {
                (
                    row.get(ROOT_ID).cloned().unwrap_or_default(),
                    row.get(ROOT_CONTENT_PERMISSIONS).cloned().unwrap_or_default(),
                )
            })
    }

    pub fn root_of(&self, project_id: &str) -> Option<String> {
        self.lookup(project_id).and_then(|(root, _)| root.to_text())
    }

    pub fn root_permissions_of(&self, project_id: &str) -> Option<String> {
        self.lookup(project_id).and_then(|(_, lock)| lock.to_text())
    }
}

/// Attaches root project id and root permission lock to items.
///
/// Items whose project is unknown are left out; their project has usually
/// been deleted since the listing was taken.
pub fn attach_roots(items: &Table, projects: &ProjectTable) -> Result<Table> {
    if items.is_empty() {
        return Ok(items
            .drop_columns(&[ROOT_ID, ROOT_CONTENT_PERMISSIONS])
            .with_column_if_missing(ROOT_ID)
            .with_column_if_missing(ROOT_CONTENT_PERMISSIONS));
    }
    if !items.has_column(ITEM_PROJECT_ID) {
        return Err(HousekeepingError::MissingColumn(ITEM_PROJECT_ID.to_string()));
    }
    let lookup = projects
        .table()
        .select(&[ID, ROOT_ID, ROOT_CONTENT_PERMISSIONS])?
        .rename(&[(ID, "__project")]);
    // Earlier attachments are replaced, not suffixed.
    let items = items.drop_columns(&[ROOT_ID, ROOT_CONTENT_PERMISSIONS]);
    let joined = items.join(&lookup, ITEM_PROJECT_ID, "__project", JoinKind::Inner)?;

    let dropped = items.len() - joined.len().min(items.len());
    if dropped > 0 {
        warn!(dropped, "items reference projects that could not be resolved");
    }
    Ok(joined)
}

/// Workbooks, data sources or flows grouped under their root project.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemTable {
    table: Table,
}

impl ItemTable {
    pub fn new(items: FlattenedTable, projects: &ProjectTable) -> Result<Self> {
        Self::from_table(items.into_table(), projects)
    }

    pub fn from_table(items: Table, projects: &ProjectTable) -> Result<Self> {
        Ok(Self {
            table: attach_roots(&items, projects)?,
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    fn projects(value: Value) -> ProjectTable {
        let flat = FlattenedTable::with_snapshot_date(
            Table::from_json(value).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        ProjectTable::new(flat).unwrap()
    }

    fn chain() -> Value {
        json!([
            {"id": "C", "name": "c", "parentProjectId": "B", "contentPermissions": "ManagedByOwner"},
            {"id": "A", "name": "a", "parentProjectId": null, "contentPermissions": "LockedToProject"},
            {"id": "B", "name": "b", "parentProjectId": "A", "contentPermissions": "ManagedByOwner"}
        ])
    }

    #[test]
    fn every_project_resolves_to_its_root() {
        let table = Table::from_json(chain()).unwrap();
        assert_eq!(resolve_roots(&table).unwrap(), vec!["A", "A", "A"]);
    }

    #[test]
    fn descendants_inherit_the_root_lock() {
        let p = projects(chain());
        assert_eq!(p.table().columns(), &ProjectTable::COLUMNS_TO_KEEP);
        for id in ["A", "B", "C"] {
            assert_eq!(p.root_of(id).as_deref(), Some("A"));
            assert_eq!(p.root_permissions_of(id).as_deref(), Some(LOCKED_TO_PROJECT));
        }
        assert_eq!(p.roots().len(), 1);
        assert_eq!(p.with_own_permissions().len(), 1);
    }

    #[test]
    fn separate_trees_keep_separate_roots() {
        let p = projects(json!([
            {"id": "A", "name": "a", "parentProjectId": null, "contentPermissions": "LockedToProject"},
            {"id": "X", "name": "x", "parentProjectId": null, "contentPermissions": "ManagedByOwner"},
            {"id": "Y", "name": "y", "parentProjectId": "X", "contentPermissions": "ManagedByOwner"}
        ]));
        assert_eq!(p.root_of("Y").as_deref(), Some("X"));
        assert_eq!(p.root_permissions_of("Y").as_deref(), Some("ManagedByOwner"));
        assert_eq!(p.with_own_permissions().len(), 3);
    }

    #[test]
    fn dangling_parent_is_fatal() {
        let table = Table::from_json(json!([
            {"id": "A", "parentProjectId": null},
            {"id": "B", "parentProjectId": "gone"}
        ]))
        .unwrap();
        let err = resolve_roots(&table).unwrap_err();
        assert!(matches!(
            err,
            HousekeepingError::BrokenHierarchy { project, parent } if project == "B" && parent == "gone"
        ));
    }

    #[test]
    fn cycles_fail_fast() {
        let table = Table::from_json(json!([
            {"id": "A", "parentProjectId": "B"},
            {"id": "B", "parentProjectId": "A"}
        ]))
        .unwrap();
        assert!(matches!(
            resolve_roots(&table),
            Err(HousekeepingError::CyclicHierarchy { .. })
        ));
    }

    #[test]
    fn missing_parent_column_means_all_roots() {
        let p = projects(json!([
            {"id": "A", "name": "a", "contentPermissions": "ManagedByOwner"},
            {"id": "B", "name": "b", "contentPermissions": "LockedToProject"}
        ]));
        assert_eq!(p.root_of("B").as_deref(), Some("B"));
        assert_eq!(p.roots().len(), 2);
    }

    #[test]
    fn items_with_unknown_projects_are_dropped() {
        let p = projects(chain());
        let items = Table::from_json(json!([
            {"id": "w1", "name": "Revenue", "project": {"id": "C", "name": "c"}},
            {"id": "w2", "name": "Orphan", "project": {"id": "deleted", "name": "?"}}
        ]))
        .unwrap();
        let flat = FlattenedTable::new(items).unwrap();
        let items = ItemTable::new(flat, &p).unwrap();
        assert_eq!(items.table().len(), 1);
        let row = items.table().row(0).unwrap();
        assert_eq!(row.text("id").as_deref(), Some("w1"));
        assert_eq!(row.text(ROOT_ID).as_deref(), Some("A"));
        assert_eq!(row.text(ROOT_CONTENT_PERMISSIONS).as_deref(), Some(LOCKED_TO_PROJECT));
        assert!(!items.table().has_column("__project"));
    }

    #[test]
    fn joining_only_unknown_items_is_an_empty_result() {
        let p = projects(chain());
        let items = Table::from_json(json!([{"id": "w", "project_id": "nope"}])).unwrap();
        let items = ItemTable::from_table(items, &p).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn empty_item_listing_joins_to_nothing() {
        let p = projects(chain());
        let items = ItemTable::new(FlattenedTable::from_records(Vec::new()).unwrap(), &p).unwrap();
        assert!(items.is_empty());
        assert!(items.table().has_column(ROOT_ID));
        assert!(items.table().has_column(ROOT_CONTENT_PERMISSIONS));
    }

    #[test]
    fn empty_project_listing_has_no_roots() {
        assert!(resolve_roots(&Table::default()).unwrap().is_empty());
        let p = ProjectTable::new(FlattenedTable::from_records(Vec::new()).unwrap()).unwrap();
        assert_eq!(p.table().columns(), &ProjectTable::COLUMNS_TO_KEEP);
        assert!(p.table().is_empty());
        assert!(p.roots().is_empty());
        assert_eq!(p.root_of("A"), None);
    }
}
