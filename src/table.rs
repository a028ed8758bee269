use ahash::AHashMap;
use serde_json::Value;

use crate::cell::Cell;
use crate::error::{HousekeepingError, Result};

/// Suffix given to right-hand columns whose name clashes in a [`Table::join`].
pub const JOIN_SUFFIX: &str = "_y";

/// Row-oriented table with named columns.
///
/// Every transformation takes the table by reference or value and hands back
/// a new one, nothing is patched in place behind the caller's back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

/// Borrowed view of one row, lets callers look cells up by column name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    cells: &'a [Cell],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.cells[idx])
    }

    /// Text of a cell, `None` when the column is missing or the cell is null.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(Cell::to_text)
    }

    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table out of mapping records. The column set is the union of
    /// all keys in the order they are first seen; absent keys become null.
    pub fn from_records(records: impl IntoIterator<Item = Cell>) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut sparse: Vec<Vec<(usize, Cell)>> = Vec::new();

        for (i, record) in records.into_iter().enumerate() {
            let entries = match record {
                Cell::Map(entries) => entries,
                other => {
                    return Err(HousekeepingError::MalformedRecord {
                        index: i,
                        found: other.kind().to_string(),
                    })
                }
            };
            let mut row = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let idx = *index.entry(key.clone()).or_insert_with(|| {
                    columns.push(key);
                    columns.len() - 1
                });
                row.push((idx, value));
            }
            sparse.push(row);
        }

        let width = columns.len();
        let rows = sparse
            .into_iter()
            .map(|entries| {
                let mut row = vec![Cell::Null; width];
                for (idx, value) in entries {
                    row[idx] = value;
                }
                row
            })
            .collect();
        Ok(Self { columns, rows })
    }

    /// Accepts a JSON array of objects, as returned by the listing endpoints.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Self::from_records(items.into_iter().map(Cell::from)),
            other => Err(HousekeepingError::UnexpectedResponse(format!(
                "expected a list of records, got {}",
                Cell::from(other).kind()
            ))),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn require(&self, column: &str) -> Result<usize> {
        self.column_index(column)
            .ok_or_else(|| HousekeepingError::MissingColumn(column.to_string()))
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row {
            columns: &self.columns,
            cells,
        })
    }

    pub fn row(&self, idx: usize) -> Option<Row<'_>> {
        self.rows.get(idx).map(|cells| Row {
            columns: &self.columns,
            cells,
        })
    }

    pub fn column(&self, column: &str) -> Result<impl Iterator<Item = &Cell>> {
        let idx = self.require(column)?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    pub(crate) fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Keeps the named columns, in the given order.
    pub fn select(&self, columns: &[&str]) -> Result<Table> {
        let indices = columns
            .iter()
            .map(|c| self.require(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Drops the named columns; names that are not present are ignored.
    pub fn drop_columns(&self, columns: &[&str]) -> Table {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !columns.contains(&self.columns[i].as_str()))
            .collect();
        Table {
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }

    pub fn rename(&self, renames: &[(&str, &str)]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                renames
                    .iter()
                    .find(|(from, _)| from == c)
                    .map(|(_, to)| to.to_string())
                    .unwrap_or_else(|| c.clone())
            })
            .collect();
        Table {
            columns,
            rows: self.rows.clone(),
        }
    }

    pub fn filter(&self, predicate: impl Fn(&Row<'_>) -> bool) -> Table {
        let rows = self
            .rows()
            .filter(|row| predicate(row))
            .map(|row| row.cells.to_vec())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Sets `column` to `value` on every row, appending the column if new.
    pub fn with_constant(mut self, column: &str, value: Cell) -> Table {
        match self.column_index(column) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
        self
    }

    pub fn with_column_if_missing(self, column: &str) -> Table {
        if self.has_column(column) {
            self
        } else {
            self.with_constant(column, Cell::Null)
        }
    }

    /// Computes `column` from each row, appending it if it is new.
    pub fn with_computed(self, column: &str, f: impl Fn(&Row<'_>) -> Cell) -> Table {
        let values: Vec<Cell> = self.rows().map(|row| f(&row)).collect();
        self.with_values(column, values)
    }

    /// Sets `column` to one value per row, appending it if it is new.
    pub fn with_values(mut self, column: &str, values: Vec<Cell>) -> Table {
        debug_assert_eq!(values.len(), self.rows.len());
        let idx = match self.column_index(column) {
            Some(idx) => idx,
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(Cell::Null);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
        self
    }

    pub fn map_column(mut self, column: &str, f: impl Fn(&Cell) -> Cell) -> Result<Table> {
        let idx = self.require(column)?;
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        Ok(self)
    }

    /// Stacks tables on top of each other. Columns are the union in first-seen
    /// order, cells a table does not have are null.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let tables: Vec<Table> = tables.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(tables.iter().map(Table::len).sum());
        for table in tables {
            let positions: Vec<Option<usize>> =
                columns.iter().map(|c| table.column_index(c)).collect();
            for row in table.rows {
                rows.push(
                    positions
                        .iter()
                        .map(|pos| pos.map(|i| row[i].clone()).unwrap_or(Cell::Null))
                        .collect(),
                );
            }
        }
        Table { columns, rows }
    }

    /// Joins `right` onto `self` where `left_on` equals `right_on`.
    ///
    /// The output has all left columns followed by the right columns minus
    /// `right_on`; right names that clash with a left name get [`JOIN_SUFFIX`].
    /// Null keys never match. Rows come out in left order, matches in right
    /// order.
    pub fn join(&self, right: &Table, left_on: &str, right_on: &str, kind: JoinKind) -> Result<Table> {
        let left_idx = self.require(left_on)?;
        let right_idx = right.require(right_on)?;

        let right_keep: Vec<usize> = (0..right.columns.len()).filter(|&i| i != right_idx).collect();
        let mut columns = self.columns.clone();
        for &i in &right_keep {
            let name = &right.columns[i];
            if self.columns.contains(name) {
                columns.push(format!("{name}{JOIN_SUFFIX}"));
            } else {
                columns.push(name.clone());
            }
        }

        let mut lookup: AHashMap<String, Vec<usize>> = AHashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            if let Some(key) = row[right_idx].to_text() {
                lookup.entry(key).or_default().push(i);
            }
        }

        let mut rows = Vec::new();
        for row in &self.rows {
            let matches = row[left_idx].to_text().and_then(|key| lookup.get(&key));
            match matches {
                Some(matches) => {
                    for &m in matches {
                        let mut out = row.clone();
                        out.extend(right_keep.iter().map(|&i| right.rows[m][i].clone()));
                        rows.push(out);
                    }
                }
                None if kind == JoinKind::Left => {
                    let mut out = row.clone();
                    out.extend(std::iter::repeat(Cell::Null).take(right_keep.len()));
                    rows.push(out);
                }
                None => {}
            }
        }
        Ok(Table { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(value: Value) -> Table {
        Table::from_json(value).unwrap()
    }

    #[test]
    fn records_union_their_keys() {
        let t = table(json!([{"a": 1}, {"b": 2, "a": 3}]));
        assert_eq!(t.columns(), &["a", "b"]);
        assert_eq!(t.get(0, "b"), Some(&Cell::Null));
        assert_eq!(t.get(1, "a"), Some(&Cell::Int(3)));
    }

    #[test]
    fn non_mapping_record_is_rejected() {
        let err = Table::from_json(json!([{"a": 1}, 5])).unwrap_err();
        assert!(matches!(err, HousekeepingError::MalformedRecord { index: 1, .. }));
    }

    #[test]
    fn select_reports_missing_columns() {
        let t = table(json!([{"a": 1}]));
        assert!(matches!(
            t.select(&["a", "nope"]),
            Err(HousekeepingError::MissingColumn(c)) if c == "nope"
        ));
    }

    #[test]
    fn concat_fills_missing_cells_with_null() {
        let a = table(json!([{"x": 1}]));
        let b = table(json!([{"y": 2}]));
        let t = Table::concat([a, b]);
        assert_eq!(t.columns(), &["x", "y"]);
        assert_eq!(t.get(1, "x"), Some(&Cell::Null));
        assert_eq!(t.get(1, "y"), Some(&Cell::Int(2)));
    }

    #[test]
    fn inner_join_drops_unmatched_and_suffixes_clashes() {
        let left = table(json!([{"id": "p1", "name": "Sales"}, {"id": "p2", "name": "HR"}]));
        let right = table(json!([
            {"root": "p1", "name": "wb-a"},
            {"root": "p1", "name": "wb-b"},
            {"root": "p9", "name": "wb-c"}
        ]));
        let joined = left.join(&right, "id", "root", JoinKind::Inner).unwrap();
        assert_eq!(joined.columns(), &["id", "name", "name_y"]);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.get(1, "name_y"), Some(&Cell::from("wb-b")));
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let left = table(json!([{"id": "p1"}, {"id": "p2"}]));
        let right = table(json!([{"root": "p1", "v": 1}]));
        let joined = left.join(&right, "id", "root", JoinKind::Left).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.get(1, "v"), Some(&Cell::Null));
    }

    #[test]
    fn with_constant_overwrites_existing_column() {
        let t = table(json!([{"a": 1, "b": 2}])).with_constant("a", Cell::from("x"));
        assert_eq!(t.columns(), &["a", "b"]);
        assert_eq!(t.get(0, "a"), Some(&Cell::from("x")));
    }
}
