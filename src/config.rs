use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use config::Config;
use serde::{Deserialize, Serialize};

use crate::export::ExportFormat;

pub const DEFAULT_CONFIG_FILE: &str = "housekeeping.toml";
pub const DEFAULT_API_VERSION: &str = "3.15";
/// Credential value written by `init-config`, rejected at sign-in.
pub const PLACEHOLDER_TOKEN_NAME: &str = "<YOUR_TOKEN_NAME>";
/// Environment variable prefix for overrides, e.g. `HOUSEKEEPING__OUTPUT_DIR`.
pub const ENV_PREFIX: &str = "HOUSEKEEPING";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HousekeepingConfig {
    #[serde(default)]
    pub default_environment: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub export_format: ExportFormat,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// One Tableau Server site to talk to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    pub server: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub site_name: String,
    /// Content URL of the site, empty for the default site.
    #[serde(default)]
    pub site_url: String,
    pub personal_access_token_name: String,
    #[serde(default)]
    pub personal_access_token_secret: Option<String>,
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_ssl_verify() -> bool {
    true
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            default_environment: None,
            output_dir: default_output_dir(),
            export_format: ExportFormat::default(),
            environments: BTreeMap::new(),
        }
    }
}

impl HousekeepingConfig {
    /// Reads the TOML file (if present) and `HOUSEKEEPING__*` overrides.
    /// A `.env` file in the working directory is loaded first.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let cfg = Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        Ok(cfg.try_deserialize()?)
    }

    /// Picks `name`, falling back to `default_environment`, or the only one.
    pub fn environment(&self, name: Option<&str>) -> anyhow::Result<(&str, &EnvironmentConfig)> {
        let name = match name.or(self.default_environment.as_deref()) {
            Some(name) => name,
            None if self.environments.len() == 1 => self
                .environments
                .keys()
                .next()
                .map(String::as_str)
                .unwrap_or_default(),
            None => bail!(
                "no environment selected, choose one of: {}",
                self.environment_names().join(", ")
            ),
        };
        // Keys may come back lowercased from the config loader.
        self.environments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| {
                anyhow!(
                    "unknown environment '{name}', choose one of: {}",
                    self.environment_names().join(", ")
                )
            })
    }

    fn environment_names(&self) -> Vec<&str> {
        self.environments.keys().map(String::as_str).collect()
    }

    /// Sample file with one environment per server and site.
    pub fn sample() -> Self {
        let servers = [
            ("tableau_prod", "https://tableau.example.com"),
            ("tableau_sim", "https://tableau-sim.example.com"),
        ];
        let sites = ["finance", "marketing", "operations"];

        let mut environments = BTreeMap::new();
        for (env, server) in servers {
            for site in sites {
                environments.insert(
                    format!("{env}_{site}"),
                    EnvironmentConfig {
                        server: server.to_string(),
                        api_version: default_api_version(),
                        site_name: site.to_string(),
                        site_url: site.to_string(),
                        personal_access_token_name: PLACEHOLDER_TOKEN_NAME.to_string(),
                        personal_access_token_secret: None,
                        ssl_verify: true,
                    },
                );
            }
        }
        Self {
            environments,
            ..Self::default()
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

impl EnvironmentConfig {
    /// Personal access token name and secret.
    ///
    /// The secret comes from the file, `TABLEAU_PAT_SECRET_<ENVIRONMENT>` or
    /// `TABLEAU_PAT_SECRET`, in that order.
    pub fn credentials(&self, environment: &str) -> anyhow::Result<(String, String)> {
        if self.personal_access_token_name == PLACEHOLDER_TOKEN_NAME {
            bail!(
                "environment '{environment}' still has the placeholder token name, fill in personal_access_token_name"
            );
        }
        let scoped = format!("TABLEAU_PAT_SECRET_{}", environment.to_uppercase());
        let secret = self
            .personal_access_token_secret
            .clone()
            .or_else(|| std::env::var(&scoped).ok())
            .or_else(|| std::env::var("TABLEAU_PAT_SECRET").ok())
            .ok_or_else(|| {
                anyhow!("no token secret for '{environment}', set {scoped} or TABLEAU_PAT_SECRET")
            })?;
        Ok((self.personal_access_token_name.clone(), secret))
    }

    pub fn api_base(&self) -> String {
        format!("{}/api/{}", self.server.trim_end_matches('/'), self.api_version)
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/api/metadata/graphql", self.server.trim_end_matches('/'))
    }
}
