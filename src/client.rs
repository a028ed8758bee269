//! Where listings, permissions and metadata come from.
//!
//! [`RestClient`] talks to a live Tableau Server; [`DumpSource`] replays
//! responses saved to disk, which is what the tests and offline runs use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cell::Cell;
use crate::config::EnvironmentConfig;
use crate::error::HousekeepingError;
use crate::response::{listing_items, records_from_xml};

pub const PAGE_SIZE: u32 = 1000;
const AUTH_HEADER: &str = "X-Tableau-Auth";
const GRANTEE_CAPABILITIES: &str = "granteeCapabilities";

/// Site-wide listings the REST API pages through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Projects,
    Workbooks,
    DataSources,
    Flows,
    Groups,
    Users,
}

impl Listing {
    /// Path segment under `sites/{site}/`, also the wrapper key of a page.
    pub fn endpoint(self) -> &'static str {
        match self {
            Listing::Projects => "projects",
            Listing::Workbooks => "workbooks",
            Listing::DataSources => "datasources",
            Listing::Flows => "flows",
            Listing::Groups => "groups",
            Listing::Users => "users",
        }
    }

    pub fn singular(self) -> &'static str {
        match self {
            Listing::Projects => "project",
            Listing::Workbooks => "workbook",
            Listing::DataSources => "datasource",
            Listing::Flows => "flow",
            Listing::Groups => "group",
            Listing::Users => "user",
        }
    }
}

/// Content that carries its own permission rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Project,
    Workbook,
    DataSource,
    Flow,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Project => "project",
            ItemKind::Workbook => "workbook",
            ItemKind::DataSource => "datasource",
            ItemKind::Flow => "flow",
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            ItemKind::Project => "projects",
            ItemKind::Workbook => "workbooks",
            ItemKind::DataSource => "datasources",
            ItemKind::Flow => "flows",
        }
    }
}

pub trait TableauSource {
    /// Every record of a site-wide listing, all pages.
    fn listing(&self, listing: Listing) -> anyhow::Result<Vec<Cell>>;

    /// The `granteeCapabilities` records of one item.
    fn permissions(&self, kind: ItemKind, id: &str) -> anyhow::Result<Vec<Cell>>;

    /// Raw answer to a GraphQL metadata query.
    fn metadata(&self, name: &str, query: &str) -> anyhow::Result<Value>;
}

/// Explains a status code returned by a REST call.
pub fn lookup_status(method: &str, status: u16) -> Result<&'static str, HousekeepingError> {
    let text = match (method, status) {
        ("sign_in", 200) => Some("Signed in successfully"),
        ("sign_in", 400) => Some("Bad Request: the content of the request body is missing or incomplete, or contains malformed XML."),
        ("sign_in", 401) => Some("Login error: invalid credentials. Make sure the provided Personal Access Token (PAT) is correct."),
        ("sign_in", 405) => Some("Invalid request method: method was not POST"),
        _ => None,
    };
    text.ok_or_else(|| HousekeepingError::UnknownStatus {
        method: method.to_string(),
        status,
    })
}

/// One page of a listing.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Cell>,
    pub total_available: usize,
}

/// Fetches pages starting at 1 until `total_available` records are in, or a
/// page comes back empty.
pub fn collect_pages(
    mut fetch: impl FnMut(u32) -> anyhow::Result<Page>,
) -> anyhow::Result<Vec<Cell>> {
    let mut items = Vec::new();
    let mut page_number = 1;
    loop {
        let page = fetch(page_number)?;
        let empty = page.items.is_empty();
        items.extend(page.items);
        if empty || items.len() >= page.total_available {
            return Ok(items);
        }
        page_number += 1;
    }
}

fn total_available(page: &Value) -> usize {
    match page.pointer("/pagination/totalAvailable") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        _ => 0,
    }
}

/// Signed-in session against one site.
pub struct RestClient {
    http: Client,
    api_base: String,
    metadata_url: String,
    site_id: String,
    token: String,
}

impl RestClient {
    pub fn sign_in(environment: &str, config: &EnvironmentConfig) -> anyhow::Result<Self> {
        let (token_name, token_secret) = config.credentials(environment)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            // Corporate proxies re-sign TLS traffic.
            .danger_accept_invalid_certs(!config.ssl_verify)
            .build()
            .context("failed to create HTTP client")?;

        let api_base = config.api_base();
        let body = json!({
            "credentials": {
                "personalAccessTokenName": token_name,
                "personalAccessTokenSecret": token_secret,
                "site": {"contentUrl": config.site_url}
            }
        });
        let response = http
            .post(format!("{api_base}/auth/signin"))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .with_context(|| format!("failed to reach {}", config.server))?;

        let status = response.status().as_u16();
        if status != 200 {
            let reason = lookup_status("sign_in", status)?;
            return Err(HousekeepingError::Login(format!("{environment}: {reason}")).into());
        }
        let answer: Value = response.json().context("sign-in answer was not JSON")?;
        let token = answer
            .pointer("/credentials/token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("sign-in answer carries no token"))?
            .to_string();
        let site_id = answer
            .pointer("/credentials/site/id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("sign-in answer carries no site id"))?
            .to_string();
        info!(environment, site = %config.site_name, "signed in");

        Ok(Self {
            http,
            api_base,
            metadata_url: config.metadata_url(),
            site_id,
            token,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTH_HEADER, &self.token)
            .header("Accept", "application/json")
    }

    fn get_json(&self, path: &str) -> anyhow::Result<Value> {
        let url = format!("{}/sites/{}/{path}", self.api_base, self.site_id);
        debug!(%url, "GET");
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .with_context(|| format!("failed to fetch {path}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Tableau API error {status} for {path}: {}",
                body.chars().take(200).collect::<String>()
            ));
        }
        response
            .json()
            .with_context(|| format!("failed to parse response from {path}"))
    }

    pub fn sign_out(self) -> anyhow::Result<()> {
        self.authorized(self.http.post(format!("{}/auth/signout", self.api_base)))
            .send()
            .context("failed to sign out")?
            .error_for_status()?;
        info!("signed out");
        Ok(())
    }
}

impl TableauSource for RestClient {
    fn listing(&self, listing: Listing) -> anyhow::Result<Vec<Cell>> {
        let items = collect_pages(|page_number| {
            let page = self.get_json(&format!(
                "{}?pageSize={PAGE_SIZE}&pageNumber={page_number}",
                listing.endpoint()
            ))?;
            Ok(Page {
                items: listing_items(&page, listing.endpoint(), listing.singular())
                    .into_iter()
                    .map(Cell::from)
                    .collect(),
                total_available: total_available(&page),
            })
        })?;
        info!(listing = listing.endpoint(), count = items.len(), "fetched listing");
        Ok(items)
    }

    fn permissions(&self, kind: ItemKind, id: &str) -> anyhow::Result<Vec<Cell>> {
        let answer = self.get_json(&format!("{}/{id}/permissions", kind.endpoint()))?;
        Ok(grantee_capabilities(answer))
    }

    fn metadata(&self, name: &str, query: &str) -> anyhow::Result<Value> {
        debug!(query = name, "running metadata query");
        let response = self
            .authorized(self.http.post(&self.metadata_url))
            .json(&json!({ "query": query }))
            .send()
            .with_context(|| format!("failed to run metadata query {name}"))?
            .error_for_status()?;
        response
            .json()
            .with_context(|| format!("metadata query {name} did not answer JSON"))
    }
}

fn grantee_capabilities(answer: Value) -> Vec<Cell> {
    match answer.get("permissions").and_then(|p| p.get(GRANTEE_CAPABILITIES)) {
        Some(Value::Array(items)) => items.iter().cloned().map(Cell::from).collect(),
        Some(single @ Value::Object(_)) => vec![Cell::from(single.clone())],
        _ => Vec::new(),
    }
}

/// Saved responses in a folder:
///
/// ```text
/// projects.json | projects.xml          (one per listing)
/// permissions/project_<id>.json | .xml  (one per item)
/// metadata/<query name>.json
/// ```
///
/// JSON listings may be a bare array or a REST page.
pub struct DumpSource {
    root: PathBuf,
}

impl DumpSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reads `<stem>.json` or `<stem>.xml` under `dir`.
    fn read(&self, dir: &Path, stem: &str) -> anyhow::Result<Saved> {
        let json_path = dir.join(format!("{stem}.json"));
        if json_path.exists() {
            let text = std::fs::read_to_string(&json_path)?;
            let value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", json_path.display()))?;
            return Ok(Saved::Json(value));
        }
        let xml_path = dir.join(format!("{stem}.xml"));
        if xml_path.exists() {
            return Ok(Saved::Xml(std::fs::read_to_string(&xml_path)?));
        }
        Err(anyhow!("no saved response {stem}.json or {stem}.xml in {}", dir.display()))
    }
}

enum Saved {
    Json(Value),
    Xml(String),
}

impl TableauSource for DumpSource {
    fn listing(&self, listing: Listing) -> anyhow::Result<Vec<Cell>> {
        let records = match self.read(&self.root, listing.endpoint())? {
            Saved::Json(Value::Array(items)) => items.into_iter().map(Cell::from).collect(),
            Saved::Json(page) => listing_items(&page, listing.endpoint(), listing.singular())
                .into_iter()
                .map(Cell::from)
                .collect(),
            Saved::Xml(xml) => records_from_xml(&xml, listing.singular())?,
        };
        Ok(records)
    }

    fn permissions(&self, kind: ItemKind, id: &str) -> anyhow::Result<Vec<Cell>> {
        let dir = self.root.join("permissions");
        let records = match self.read(&dir, &format!("{}_{id}", kind.as_str()))? {
            Saved::Json(answer) => grantee_capabilities(answer),
            Saved::Xml(xml) => records_from_xml(&xml, GRANTEE_CAPABILITIES)?,
        };
        Ok(records)
    }

    fn metadata(&self, name: &str, _query: &str) -> anyhow::Result<Value> {
        let path = self.root.join("metadata").join(format!("{name}.json"));
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }
}
