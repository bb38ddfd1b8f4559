//! Process configuration, read once at startup from a TOML file.
//!
//! ```toml
//! bind = "127.0.0.1:3000"
//! timezone = "+05:30"
//!
//! [entry]
//! columns = ["col1", "col2", "col3", "col4"]
//! default_rows = 10
//!
//! [sheets]
//! backend = "google"
//! spreadsheet_id = "1AbC..."
//! token_file = "/run/secrets/sheets-token"
//!
//! [mapping]
//! template = "specialty_mapping.xlsx"
//!
//! [[users]]
//! username = "admin"
//! password_hash = "$argon2id$v=19$..."
//! role = "admin"
//! ```

use chrono::FixedOffset;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::locator::{DATA_PREFIX, MAPPING_PREFIX, parse_offset};
use crate::login::{Credential, CredentialTable};
use crate::reconcile::FrozenRegion;

pub const DEFAULT_CONFIG_FILE: &str = "secure-entry.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Fixed UTC offset deciding which calendar day "today" is
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub entry: EntryConfig,

    #[serde(default)]
    pub mapping: MappingConfig,

    #[serde(default)]
    pub sheets: SheetsConfig,

    #[serde(default)]
    pub users: Vec<Credential>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntryConfig {
    /// Column names, also written as the header of each new data worksheet
    pub columns: Vec<String>,
    /// Blank rows offered in a fresh entry grid
    pub default_rows: usize,
    /// Row capacity of newly created data worksheets
    pub sheet_rows: u32,
    pub data_prefix: String,
}

impl Default for EntryConfig {
    fn default() -> Self {
        EntryConfig {
            columns: ["col1", "col2", "col3", "col4"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            default_rows: 10,
            sheet_rows: 2000,
            data_prefix: DATA_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingConfig {
    /// Reference file; the mapping tab is disabled when unset
    pub template: Option<PathBuf>,
    pub prefix: String,
    pub frozen_rows: usize,
    pub frozen_cols: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        MappingConfig {
            template: None,
            prefix: MAPPING_PREFIX.to_string(),
            frozen_rows: 1,
            frozen_cols: 2,
        }
    }
}

impl MappingConfig {
    pub fn frozen(&self) -> FrozenRegion {
        FrozenRegion {
            rows: self.frozen_rows,
            cols: self.frozen_cols,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Google,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SheetsConfig {
    pub backend: Backend,
    pub spreadsheet_id: Option<String>,
    /// Literal bearer token
    pub token: Option<String>,
    /// Environment variable holding the bearer token
    pub token_env: Option<String>,
    /// File holding the bearer token, re-read on every call
    pub token_file: Option<PathBuf>,
    pub api_base: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        SheetsConfig {
            backend: Backend::Google,
            spreadsheet_id: None,
            token: None,
            token_env: None,
            token_file: None,
            api_base: "https://sheets.googleapis.com/v4".to_string(),
        }
    }
}

/// Where the bearer token for the spreadsheet API comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Static(String),
    Env(String),
    File(PathBuf),
}

impl TokenSource {
    /// Current token value
    pub fn token(&self) -> Result<String> {
        let token = match self {
            TokenSource::Static(token) => token.clone(),
            TokenSource::Env(var) => std::env::var(var)
                .map_err(|_| AppError::Config(format!("environment variable {var} is not set")))?,
            TokenSource::File(path) => fs::read_to_string(path)?,
        };
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(AppError::Config("spreadsheet access token is empty".to_string()));
        }
        Ok(token)
    }
}

impl SheetsConfig {
    pub fn token_source(&self) -> Option<TokenSource> {
        if let Some(token) = &self.token {
            Some(TokenSource::Static(token.clone()))
        } else if let Some(var) = &self.token_env {
            Some(TokenSource::Env(var.clone()))
        } else {
            self.token_file.clone().map(TokenSource::File)
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_timezone() -> String {
    // Asia/Kolkata, which observes no daylight saving
    "+05:30".to_string()
}

impl AppConfig {
    /// Parse and validate a configuration document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entry.columns.is_empty() {
            return Err(AppError::Config("entry.columns cannot be empty".to_string()));
        }
        if self.entry.data_prefix.is_empty() || self.mapping.prefix.is_empty() {
            return Err(AppError::Config("worksheet prefixes cannot be empty".to_string()));
        }
        if self.entry.data_prefix == self.mapping.prefix {
            return Err(AppError::Config(
                "entry.data_prefix and mapping.prefix must differ".to_string(),
            ));
        }
        if self.entry.sheet_rows == 0 {
            return Err(AppError::Config("entry.sheet_rows must be positive".to_string()));
        }
        self.offset()?;
        self.credentials()?;

        if self.sheets.backend == Backend::Google {
            if self.sheets.spreadsheet_id.as_deref().unwrap_or("").is_empty() {
                return Err(AppError::Config(
                    "sheets.spreadsheet_id is required for the google backend".to_string(),
                ));
            }
            if self.sheets.token_source().is_none() {
                return Err(AppError::Config(
                    "one of sheets.token, sheets.token_env or sheets.token_file is required"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone)
    }

    pub fn credentials(&self) -> Result<CredentialTable> {
        CredentialTable::new(self.users.clone())
    }
}
