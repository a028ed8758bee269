use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use tableau_housekeeping::archive::move_to_history;
use tableau_housekeeping::client::{DumpSource, RestClient, TableauSource};
use tableau_housekeeping::config::{HousekeepingConfig, DEFAULT_CONFIG_FILE};
use tableau_housekeeping::export::{write_table, ExportFormat};
use tableau_housekeeping::metadata::run_queries;
use tableau_housekeeping::permissions::{build_report, REPORT_NAME};
use tableau_housekeeping::queries::METADATA_QUERIES;
use tableau_housekeeping::response::{records_from_xml, unpack_response};
use tableau_housekeeping::{log, FlattenedTable, Table};

/// Metadata and permission exports for Tableau Server sites
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write logs to a daily rolling file in this folder instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a sample configuration file with placeholder credentials
    InitConfig {
        /// Where to write it, defaults to --config
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Flatten a saved JSON or XML response into a table
    Flatten {
        input: PathBuf,
        /// Record element to collect from XML input
        #[arg(long)]
        record: Option<String>,
        /// Output file, defaults to the input name with the format's extension
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<ExportFormat>,
    },
    /// Run the Metadata API queries and export each answer
    Metadata {
        #[arg(long)]
        environment: Option<String>,
        /// Read saved responses from this folder instead of the server
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Export every permission rule on the site
    Permissions {
        #[arg(long)]
        environment: Option<String>,
        /// Read saved responses from this folder instead of the server
        #[arg(long)]
        dump: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = log::init(args.log_dir.as_deref());
    let start = Instant::now();

    match args.command {
        Command::InitConfig { path } => {
            let path = path.unwrap_or(args.config);
            HousekeepingConfig::sample().write(&path)?;
            info!(path = %path.display(), "wrote sample configuration, fill in the token names before use");
        }
        Command::Flatten {
            input,
            record,
            output,
            format,
        } => {
            let config = HousekeepingConfig::load(&args.config)?;
            let format = format.unwrap_or(config.export_format);
            let output = output.unwrap_or_else(|| input.with_extension(format.extension()));
            let table = flatten_file(&input, record.as_deref())?;
            write_table(table.table(), &output, format)?;
        }
        Command::Metadata { environment, dump } => {
            let config = HousekeepingConfig::load(&args.config)?;
            let folder = config.output_dir.join("metadata");
            with_source(&config, environment.as_deref(), dump.as_deref(), |source, env| {
                move_to_history(&folder)?;
                run_queries(source, METADATA_QUERIES, &folder, env, config.export_format)?;
                Ok(())
            })?;
        }
        Command::Permissions { environment, dump } => {
            let config = HousekeepingConfig::load(&args.config)?;
            let folder = config.output_dir.join("permissions");
            with_source(&config, environment.as_deref(), dump.as_deref(), |source, _| {
                let report = build_report(source)?;
                move_to_history(&folder)?;
                let path = folder.join(format!("{REPORT_NAME}.{}", config.export_format.extension()));
                write_table(&report, &path, config.export_format)
            })?;
        }
    }

    info!(seconds = start.elapsed().as_secs(), "done");
    Ok(())
}

/// Runs `f` against saved responses, or a signed-in session that is signed
/// out afterwards.
fn with_source(
    config: &HousekeepingConfig,
    environment: Option<&str>,
    dump: Option<&Path>,
    f: impl FnOnce(&dyn TableauSource, &str) -> Result<()>,
) -> Result<()> {
    if let Some(dump) = dump {
        let name = environment.unwrap_or("dump");
        return f(&DumpSource::new(dump), name);
    }
    let (name, env) = config.environment(environment)?;
    let client = RestClient::sign_in(name, env)?;
    let outcome = f(&client, name);
    end_session(outcome, client.sign_out())
}

/// The run's own error wins over a failed sign-out, which is only logged.
fn end_session(outcome: Result<()>, sign_out: Result<()>) -> Result<()> {
    match (outcome, sign_out) {
        (Err(err), Err(sign_out_err)) => {
            warn!(error = %sign_out_err, "sign-out failed");
            Err(err)
        }
        (outcome, sign_out) => outcome.and(sign_out),
    }
}

fn flatten_file(input: &Path, record: Option<&str>) -> Result<FlattenedTable> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let is_xml = input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml"));

    let table = if is_xml {
        let Some(record) = record else {
            bail!("--record is required for XML input");
        };
        FlattenedTable::from_records(records_from_xml(&text, record)?)?
    } else {
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", input.display()))?;
        let records = unpack_response(value)?;
        FlattenedTable::new(Table::from_json(Value::Array(records))?)?
    };
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn failed_run_keeps_its_error_when_sign_out_fails() {
        let err = end_session(Err(anyhow!("export failed")), Err(anyhow!("sign-out refused"))).unwrap_err();
        assert_eq!(err.to_string(), "export failed");
    }

    #[test]
    fn failed_sign_out_after_a_good_run_is_reported() {
        let err = end_session(Ok(()), Err(anyhow!("sign-out refused"))).unwrap_err();
        assert_eq!(err.to_string(), "sign-out refused");
        assert!(end_session(Ok(()), Ok(())).is_ok());
    }
}
