use thiserror::Error;

/// Errors raised by the table transformations and response handling.
///
/// Failures of the collaborators (HTTP, file system) are not wrapped here;
/// they travel through `anyhow` unchanged.
#[derive(Debug, Error)]
pub enum HousekeepingError {
    #[error("column '{column}' holds {found} values, only scalars, mappings and sequences can be flattened")]
    UnsupportedShape { column: String, found: String },

    #[error("project '{project}' references parent '{parent}' which does not exist")]
    BrokenHierarchy { project: String, parent: String },

    #[error("project '{project}' is part of a parent cycle")]
    CyclicHierarchy { project: String },

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("unpacking '{source_column}' would create column '{column}' which already exists")]
    DuplicateColumn { source_column: String, column: String },

    #[error("record {index} is {found}, expected a mapping")]
    MalformedRecord { index: usize, found: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("xml error: {0}")]
    Xml(String),

    #[error("no status {status} known for method '{method}'")]
    UnknownStatus { method: String, status: u16 },

    #[error("login failed: {0}")]
    Login(String),
}

pub type Result<T> = std::result::Result<T, HousekeepingError>;
