//! Housekeeping for a Tableau Server estate.
//!
//! Listings, permission rules and Metadata API answers arrive as nested
//! records. They are flattened into plain tables ([`flattener`]), projects
//! are resolved to their root project ([`hierarchy`]) and the results are
//! written out as CSV or Parquet ([`export`]).

pub mod archive;
pub mod cell;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod flattener;
pub mod hierarchy;
pub mod log;
pub mod metadata;
mod parquet_writer;
pub mod permissions;
pub mod queries;
pub mod response;
pub mod table;

pub use cell::Cell;
pub use error::{HousekeepingError, Result};
pub use flattener::{flatten, FlattenedTable};
pub use hierarchy::{ItemTable, ProjectTable};
pub use table::Table;
