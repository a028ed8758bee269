use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::client::TableauSource;
use crate::export::{write_table, ExportFormat};
use crate::flattener::FlattenedTable;
use crate::response::unpack_response;
use crate::table::Table;

/// Runs each `(name, query)` and exports the flattened answer to
/// `<folder>/<name>_<environment>.<ext>`.
///
/// A query whose answer cannot be unpacked (GraphQL errors, no data) is
/// logged and skipped. Returns the files written.
pub fn run_queries(
    source: &dyn TableauSource,
    queries: &[(&str, &str)],
    folder: &Path,
    environment: &str,
    format: ExportFormat,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for &(name, query) in queries {
        info!(query = name, "executing query");
        let response = source.metadata(name, query)?;

        let records = match unpack_response(response) {
            Ok(records) => records,
            Err(err) => {
                warn!(query = name, error = %err, "query did not return a valid response, skipping");
                continue;
            }
        };

        let table = Table::from_json(serde_json::Value::Array(records))
            .and_then(FlattenedTable::new)
            .with_context(|| format!("failed to flatten the answer to {name}"))?;

        let path = folder.join(format!("{name}_{environment}.{}", format.extension()));
        write_table(table.table(), &path, format)?;
        written.push(path);
    }
    Ok(written)
}
