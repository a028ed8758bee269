//! GraphQL queries run against the Metadata API, keyed by export name.

pub const DATABASE_SERVERS: &str = r#"
{
    databaseServers {
        id
        luid
        name
        hostName
        isEmbedded
        port
        connectionType
        tables {
            id
            name
            schema
            fullName
            isEmbedded
        }
    }
}"#;

pub const FILES: &str = r#"
{
    files {
        id
        luid
        name
        isEmbedded
        filePath
        __typename
        connectionType
        tables {
            id
            name
        }
    }
}"#;

pub const DATABASES: &str = r#"
{
    databases {
        id
        luid
        name
        __typename
        connectionType
    }
}"#;

pub const TABLES: &str = r#"
{
    tables {
        id
        name
        isEmbedded
    }
}"#;

pub const DATABASE_TABLES: &str = r#"
{
    databaseTables {
        id
        luid
        name
        isEmbedded
        schema
        fullName
    }
}"#;

pub const CUSTOM_SQL_TABLES: &str = r#"
{
    customSQLTables {
        id
        name
        isEmbedded
        query
    }
}"#;

pub const EMBEDDED_DATASOURCES: &str = r#"
{
    embeddedDatasources {
        id
        name
        hasExtracts
        extractLastRefreshTime
        extractLastUpdateTime
        extractLastIncrementalUpdateTime
        workbook {
            id
            name
            projectName
        }
        upstreamTables {
            id
            name
        }
    }
}"#;

pub const PUBLISHED_DATASOURCES: &str = r#"
{
    publishedDatasources {
        id
        name
        projectName
        site {
            id
            name
        }
        owner {
            id
            name
        }
        hasExtracts
        extractLastRefreshTime
        extractLastUpdateTime
        extractLastIncrementalUpdateTime
        downstreamWorkbooks {
            name
            projectName
        }
        upstreamTables {
            id
            name
            schema
            fullName
            database {
                name
            }
        }
        downstreamTables {
            id
            name
        }
    }
}"#;

/// Workbooks with their embedded sources, to spot sources with no upstream.
pub const DISCONNECTED_DATASOURCES: &str = r#"
{
    workbooks {
        name
        projectName
        embeddedDatasources {
            name
            upstreamDatasources {
                name
            }
            upstreamDatabases {
                name
            }
        }
    }
}"#;

pub const USERS: &str = r#"
{
    tableauUsers {
        id
        name
        username
        domain
        email
        ownedWorkbooks {
            id
            name
            projectName
        }
    }
}"#;

pub const WORKBOOKS: &str = r#"
{
    workbooks {
        id
        name
        projectName
        dashboards {
            id
            name
            sheets {
                id
                name
                datasourceFields {
                    id
                    name
                    upstreamTables {
                        id
                    }
                }
            }
        }
    }
}"#;

/// Every query the `metadata` command runs, in order.
pub const METADATA_QUERIES: &[(&str, &str)] = &[
    ("DatabaseServer", DATABASE_SERVERS),
    ("files", FILES),
    ("Databases", DATABASES),
    ("Tables", TABLES),
    ("databasetable", DATABASE_TABLES),
    ("customsqltables", CUSTOM_SQL_TABLES),
    ("EmbeddedDatasources", EMBEDDED_DATASOURCES),
    ("publisheddatasources", PUBLISHED_DATASOURCES),
    ("Disconnecteddatasources", DISCONNECTED_DATASOURCES),
    ("users", USERS),
    ("workbooks", WORKBOOKS),
];
