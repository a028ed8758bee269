//! Writing tables to disk.

use std::path::Path;

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::parquet_writer::write_parquet;
use crate::table::Table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Parquet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }
}

/// Writes `table` to `path`, creating the parent folder when needed.
pub fn write_table(table: &Table, path: &Path, format: ExportFormat) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match format {
        ExportFormat::Csv => write_csv(table, path),
        ExportFormat::Parquet => write_parquet(table, path),
    }
    .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), rows = table.len(), "exported table");
    Ok(())
}

/// Header row, then one record per row. Nulls are empty fields.
fn write_csv(table: &Table, path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(
            row.cells()
                .iter()
                .map(|cell| cell.to_text().unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_has_header_and_empty_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("projects.csv");
        let table = Table::from_json(json!([
            {"id": "a", "name": "Sales, EMEA"},
            {"id": "b", "name": null}
        ]))
        .unwrap();

        write_table(&table, &path, ExportFormat::Csv).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["id,name", "a,\"Sales, EMEA\"", "b,"]);
    }

    #[test]
    fn parquet_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.parquet");
        let table = Table::from_json(json!([
            {"id": "a", "size": 3, "ok": true},
            {"id": "b", "size": null, "ok": false}
        ]))
        .unwrap();

        write_table(&table, &path, ExportFormat::Parquet).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }

    #[test]
    fn format_names_match_extensions() {
        assert_eq!(ExportFormat::default().extension(), "csv");
        assert_eq!(ExportFormat::Parquet.extension(), "parquet");
    }
}
