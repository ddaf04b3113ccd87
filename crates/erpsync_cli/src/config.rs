//! Configuration file support for erpsync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `ERPSYNC_`, sections split by `__`,
//!    e.g. `ERPSYNC_HUBSPOT__TOKEN`)
//! 3. Config file (./erpsync.toml, then ~/.config/erpsync/config.toml)
//! 4. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [epicor]
//! base_url = "https://erp.example.com/ERP11"
//! company = "ACME"
//! username = "integration"
//! password = "..."        # or ERPSYNC_EPICOR__PASSWORD
//! api_key = "..."
//! page_size = 100
//!
//! [hubspot]
//! token = "pat-..."       # or ERPSYNC_HUBSPOT__TOKEN
//! requests_per_second = 9
//! quotes_pipeline_id = "default"
//! orders_pipeline_id = "12345"
//!
//! [sync]
//! parts = true
//! customers = true
//! contacts = true
//! quotes = true
//! orders = false
//! concurrency = 4
//! max_retries = 3
//! failed_records_path = "failed-records.json"
//!
//! [sync.filters]
//! quotes = "EntryDate ge 2024-01-01T00:00:00Z"
//!
//! [owners]
//! default_owner_id = "111"
//!
//! [owners.mappings]
//! jdoe = "222"
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use erpsync::destination::{DEFAULT_BASE_URL, DEFAULT_REQUESTS_PER_SECOND};
use erpsync::retry::RetryConfig;
use erpsync::sync::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE};
use erpsync::{EntityKind, EpicorCredentials, OwnerMapping, Pipelines, SyncOptions, TransformContext};
use serde::Deserialize;

/// A setting the requested command cannot run without, or one that is invalid.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing setting {0} (set it in erpsync.toml or the environment)")]
    Missing(&'static str),

    #[error("Invalid setting {setting}: {message}")]
    Invalid {
        setting: &'static str,
        message: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub epicor: EpicorConfig,
    pub hubspot: HubSpotConfig,
    pub sync: SyncConfig,
    pub owners: OwnersConfig,
}

/// ERP connection.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EpicorConfig {
    /// Server URL up to (not including) `/api/v2/odata`.
    pub base_url: Option<String>,
    pub company: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    /// Records requested per OData page.
    pub page_size: usize,
}

impl Default for EpicorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            company: None,
            username: None,
            password: None,
            api_key: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// CRM connection.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HubSpotConfig {
    /// Private app access token.
    pub token: Option<String>,
    pub base_url: String,
    /// Proactive client-side limit. 0 disables it.
    pub requests_per_second: u32,
    pub quotes_pipeline_id: Option<String>,
    pub orders_pipeline_id: Option<String>,
}

impl Default for HubSpotConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            quotes_pipeline_id: None,
            orders_pipeline_id: None,
        }
    }
}

/// Which kinds run and how.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub parts: bool,
    pub customers: bool,
    pub contacts: bool,
    pub quotes: bool,
    pub orders: bool,
    pub concurrency: usize,
    pub max_retries: usize,
    /// Copy the source record into failed-record entries.
    pub include_source_in_report: bool,
    /// OData `$filter` per kind, keyed by kind name ("quotes", "orders", ...).
    pub filters: HashMap<String, String>,
    /// Where to write the failed-record report. Not written when unset.
    pub failed_records_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parts: true,
            customers: true,
            contacts: true,
            quotes: true,
            orders: true,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            include_source_in_report: true,
            filters: HashMap::new(),
            failed_records_path: None,
        }
    }
}

impl SyncConfig {
    fn is_enabled(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Part => self.parts,
            EntityKind::Account => self.customers,
            EntityKind::Contact => self.contacts,
            EntityKind::Quote => self.quotes,
            EntityKind::Order => self.orders,
            EntityKind::QuoteLine | EntityKind::OrderLine => false,
        }
    }
}

/// Sales rep code to CRM owner id.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OwnersConfig {
    pub default_owner_id: Option<String>,
    pub mappings: HashMap<String, String>,
}

/// Command-line overrides for a run.
#[derive(Debug, Default)]
pub struct RunOverrides {
    /// Restrict the run to these kinds (still subject to the config toggles).
    pub only: Vec<EntityKind>,
    pub concurrency: Option<usize>,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/erpsync/config.toml)
    /// 3. Local config file (./erpsync.toml)
    /// 4. Environment variables with ERPSYNC_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path()
            && xdg_config.exists()
        {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let local_config = PathBuf::from("erpsync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./erpsync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g. ERPSYNC_EPICOR__BASE_URL -> epicor.base_url
        builder = builder.add_source(
            Environment::with_prefix("ERPSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// ERP URL, company and credentials.
    pub fn epicor(&self) -> Result<(String, String, EpicorCredentials), ConfigError> {
        let epicor = &self.epicor;
        let base_url = required(&epicor.base_url, "epicor.base_url")?;
        let company = required(&epicor.company, "epicor.company")?;
        let credentials = EpicorCredentials {
            username: required(&epicor.username, "epicor.username")?,
            password: required(&epicor.password, "epicor.password")?,
            api_key: required(&epicor.api_key, "epicor.api_key")?,
        };
        Ok((base_url, company, credentials))
    }

    pub fn hubspot_token(&self) -> Result<String, ConfigError> {
        required(&self.hubspot.token, "hubspot.token")
    }

    /// Engine options with CLI overrides applied.
    pub fn sync_options(&self, overrides: &RunOverrides) -> Result<SyncOptions, ConfigError> {
        let concurrency = overrides.concurrency.unwrap_or(self.sync.concurrency);
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                setting: "sync.concurrency",
                message: "must be at least 1".to_string(),
            });
        }
        if self.epicor.page_size == 0 {
            return Err(ConfigError::Invalid {
                setting: "epicor.page_size",
                message: "must be at least 1".to_string(),
            });
        }

        let enabled: BTreeSet<EntityKind> = EntityKind::SYNC_ORDER
            .into_iter()
            .filter(|kind| self.sync.is_enabled(*kind))
            .filter(|kind| overrides.only.is_empty() || overrides.only.contains(kind))
            .collect();

        let mut filters = HashMap::new();
        for (name, filter) in &self.sync.filters {
            let kind = name
                .parse::<EntityKind>()
                .map_err(|message| ConfigError::Invalid {
                    setting: "sync.filters",
                    message,
                })?;
            filters.insert(kind, filter.clone());
        }

        Ok(SyncOptions {
            concurrency,
            page_size: self.epicor.page_size,
            retry: RetryConfig::default().with_max_retries(self.sync.max_retries),
            enabled,
            filters,
            include_source_in_report: self.sync.include_source_in_report,
        })
    }

    /// Pipelines and owner mapping for transforms.
    pub fn transform_context(&self) -> TransformContext {
        TransformContext {
            pipelines: Pipelines {
                quotes: self.hubspot.quotes_pipeline_id.clone(),
                orders: self.hubspot.orders_pipeline_id.clone(),
            },
            owners: OwnerMapping {
                default_owner_id: self.owners.default_owner_id.clone(),
                mappings: self.owners.mappings.clone(),
            },
            ..TransformContext::default()
        }
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "erpsync").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn required(value: &Option<String>, setting: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(setting))
}
