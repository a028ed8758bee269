//! Unpacks nested API responses into flat tables.
//!
//! A column whose first non-null value is a mapping is replaced by one column
//! per key, a column holding sequences explodes every row into one row per
//! element. Passes repeat until only scalar columns remain.

use chrono::{Local, NaiveDate};
use tracing::{debug, info};

use crate::cell::Cell;
use crate::error::{HousekeepingError, Result};
use crate::table::Table;

pub const SNAPSHOT_COLUMN: &str = "snapshot_date";

/// Effective element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Mapping,
    Sequence,
    /// Every value is null, nothing to unpack.
    Empty,
}

impl Shape {
    pub fn is_nested(self) -> bool {
        matches!(self, Shape::Mapping | Shape::Sequence)
    }

    fn of(column: &str, cell: &Cell) -> Result<Shape> {
        match cell {
            _ if cell.is_null() => Ok(Shape::Empty),
            Cell::Map(_) => Ok(Shape::Mapping),
            Cell::List(_) => Ok(Shape::Sequence),
            Cell::Bytes(_) => Err(HousekeepingError::UnsupportedShape {
                column: column.to_string(),
                found: cell.kind().to_string(),
            }),
            _ => Ok(Shape::Scalar),
        }
    }
}

/// Classifies every column by the first non-null value it holds.
pub fn classify(table: &Table) -> Result<Vec<(String, Shape)>> {
    table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let first = table.rows().map(|row| &row.cells()[idx]).find(|c| !c.is_null());
            let shape = match first {
                Some(cell) => Shape::of(column, cell)?,
                None => Shape::Empty,
            };
            Ok((column.clone(), shape))
        })
        .collect()
}

/// Unpacks nested columns until none are left.
///
/// The first nested column in column order is expanded on every pass, so the
/// output layout is reproducible for the same input.
pub fn flatten(table: Table) -> Result<Table> {
    let mut table = table;
    loop {
        let next = classify(&table)?
            .into_iter()
            .enumerate()
            .find(|(_, (_, shape))| shape.is_nested());

        let Some((idx, (column, shape))) = next else {
            return Ok(table);
        };
        debug!(column = %column, ?shape, "unpacking column");
        table = match shape {
            Shape::Mapping => expand_mapping(&table, idx)?,
            Shape::Sequence => explode_sequence(&table, idx)?,
            Shape::Scalar | Shape::Empty => unreachable!("only nested columns are expanded"),
        };
    }
}

/// Ordered key set shared by all values of an unpacked column.
struct KeySet {
    column: String,
    keys: Vec<String>,
}

impl KeySet {
    fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            keys: Vec::new(),
        }
    }

    fn add(&mut self, key: &str) {
        if !self.keys.iter().any(|k| k == key) {
            self.keys.push(key.to_string());
        }
    }

    fn prefixed(&self, existing: &[String]) -> Result<Vec<String>> {
        self.keys
            .iter()
            .map(|key| {
                let name = format!("{}_{}", self.column, key);
                if existing.contains(&name) {
                    return Err(HousekeepingError::DuplicateColumn {
                        source_column: self.column.clone(),
                        column: name,
                    });
                }
                Ok(name)
            })
            .collect()
    }

    /// Values of `entries` in key-set order; keys an entry lacks are null.
    fn spread(&self, entries: &[(String, Cell)]) -> Vec<Cell> {
        self.keys
            .iter()
            .map(|key| {
                entries
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Cell::Null)
            })
            .collect()
    }
}

fn mismatch(column: &str, cell: &Cell, expected: &str) -> HousekeepingError {
    HousekeepingError::UnsupportedShape {
        column: column.to_string(),
        found: format!("{} (in a {expected} column)", cell.kind()),
    }
}

/// Columns other than `idx`, plus the remaining cells of each row.
fn split_off(columns: &[String], idx: usize) -> Vec<String> {
    columns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx)
        .map(|(_, c)| c.clone())
        .collect()
}

fn without(row: &[Cell], idx: usize) -> Vec<Cell> {
    row.iter()
        .enumerate()
        .filter(|(i, _)| *i != idx)
        .map(|(_, c)| c.clone())
        .collect()
}

fn expand_mapping(table: &Table, idx: usize) -> Result<Table> {
    let column = &table.columns()[idx];
    let mut keys = KeySet::new(column);
    for row in table.rows() {
        match &row.cells()[idx] {
            Cell::Map(entries) => entries.iter().for_each(|(k, _)| keys.add(k)),
            cell if cell.is_null() => {}
            cell => return Err(mismatch(column, cell, "mapping")),
        }
    }

    let mut columns = split_off(table.columns(), idx);
    let added = keys.prefixed(&columns)?;
    columns.extend(added);

    // Null rows read as a mapping of the same keys, all null.
    let mut out = Table::new(columns);
    for row in table.rows() {
        let mut cells = without(row.cells(), idx);
        match &row.cells()[idx] {
            Cell::Map(entries) => cells.extend(keys.spread(entries)),
            _ => cells.extend(keys.spread(&[])),
        }
        out.push_row(cells);
    }
    Ok(out)
}

/// Sequence elements that are not mappings get positional keys.
fn element_entries(element: &Cell) -> Vec<(String, Cell)> {
    match element {
        Cell::Map(entries) => entries.clone(),
        Cell::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), item.clone()))
            .collect(),
        other => vec![("0".to_string(), other.clone())],
    }
}

fn explode_sequence(table: &Table, idx: usize) -> Result<Table> {
    let column = &table.columns()[idx];
    let mut keys = KeySet::new(column);
    for row in table.rows() {
        if let Cell::List(items) = &row.cells()[idx] {
            for item in items {
                if let Cell::Bytes(_) = item {
                    return Err(mismatch(column, item, "sequence"));
                }
                if item.is_null() {
                    continue;
                }
                element_entries(item).iter().for_each(|(k, _)| keys.add(k));
            }
        }
    }

    let mut columns = split_off(table.columns(), idx);
    let added = keys.prefixed(&columns)?;
    columns.extend(added);

    // Records without a list produce no rows at all.
    let mut out = Table::new(columns);
    for row in table.rows() {
        let Cell::List(items) = &row.cells()[idx] else {
            continue;
        };
        let rest = without(row.cells(), idx);
        for item in items {
            let mut cells = rest.clone();
            if item.is_null() {
                cells.extend(keys.spread(&[]));
            } else {
                cells.extend(keys.spread(&element_entries(item)));
            }
            out.push_row(cells);
        }
    }
    Ok(out)
}

/// A flat table stamped with the date its data was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedTable {
    table: Table,
    snapshot_date: NaiveDate,
    added_columns: Vec<String>,
}

impl FlattenedTable {
    /// Flattens `table` and stamps it with today's date.
    pub fn new(table: Table) -> Result<Self> {
        Self::with_snapshot_date(table, Local::now().date_naive())
    }

    pub fn with_snapshot_date(table: Table, snapshot_date: NaiveDate) -> Result<Self> {
        let original: Vec<String> = table.columns().to_vec();
        let flat = flatten(table)?;

        let added_columns: Vec<String> = flat
            .columns()
            .iter()
            .filter(|c| !original.contains(c))
            .cloned()
            .collect();
        if added_columns.is_empty() {
            info!("data did not require unpacking, no new columns were added");
        } else {
            info!(
                count = added_columns.len(),
                columns = ?added_columns,
                "unpacking added new columns"
            );
        }

        let stamp = Cell::Text(snapshot_date.format("%Y-%m-%d").to_string());
        Ok(Self {
            table: flat.with_constant(SNAPSHOT_COLUMN, stamp),
            snapshot_date,
            added_columns,
        })
    }

    pub fn from_records(records: impl IntoIterator<Item = Cell>) -> Result<Self> {
        Self::new(Table::from_records(records)?)
    }

    pub fn snapshot_date(&self) -> NaiveDate {
        self.snapshot_date
    }

    pub fn added_columns(&self) -> &[String] {
        &self.added_columns
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}
