use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::poller::RetryPolicy;

pub const REPORT_ACCOUNTS_METHOD: &str = "post";
pub const REPORT_ACCOUNTS_PATH: &str = "/rest/atlassian-connect/latest/report-accounts";
pub const RATE_LIMIT_STATUS: u16 = 429;
pub const DEFAULT_BATCH_SIZE: usize = 90;
pub const DEFAULT_DATABASE_URL: &str = "sqlite:gdpr.db?mode=rwc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerEndpoint {
    pub method: String,
    pub path: String,
}

impl Default for PartnerEndpoint {
    fn default() -> Self {
        Self {
            method: REPORT_ACCOUNTS_METHOD.to_string(),
            path: REPORT_ACCOUNTS_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserColumns {
    pub updated_at: String,
    pub user_account_id: String,
    pub client_key: String,
}

/// Where the reported user accounts live in the host application's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTableConfig {
    pub table_name: String,
    pub columns: UserColumns,
}

impl Default for UserTableConfig {
    fn default() -> Self {
        Self {
            table_name: "users".to_string(),
            columns: UserColumns {
                updated_at: "updated_at".to_string(),
                user_account_id: "user_account_id".to_string(),
                client_key: "client_key".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub users: UserTableConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            users: UserTableConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterConfig {
    pub partner: PartnerEndpoint,
    pub database: DatabaseConfig,
    /// Skip the cycle check and report right away.
    pub force_execution: bool,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            partner: PartnerEndpoint::default(),
            database: DatabaseConfig::default(),
            force_execution: false,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReporterConfig {
    /// Builds the configuration from process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(max) = parse_var::<u32, _>(&lookup, "DATABASE_MAX_CONNECTIONS")? {
            config.database.max_connections = max;
        }

        let users = &mut config.database.users;
        if let Some(table) = lookup("GDPR_USERS_TABLE") {
            users.table_name = table;
        }
        if let Some(column) = lookup("GDPR_USERS_UPDATED_AT_COLUMN") {
            users.columns.updated_at = column;
        }
        if let Some(column) = lookup("GDPR_USERS_ACCOUNT_ID_COLUMN") {
            users.columns.user_account_id = column;
        }
        if let Some(column) = lookup("GDPR_USERS_CLIENT_KEY_COLUMN") {
            users.columns.client_key = column;
        }

        if let Some(method) = lookup("GDPR_REPORT_METHOD") {
            config.partner.method = method;
        }
        if let Some(path) = lookup("GDPR_REPORT_PATH") {
            config.partner.path = path;
        }

        if let Some(flag) = lookup("GDPR_FORCE_EXECUTION") {
            config.force_execution = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(size) = parse_var::<usize, _>(&lookup, "GDPR_BATCH_SIZE")? {
            if size == 0 {
                return Err(anyhow!("GDPR_BATCH_SIZE must be a positive integer"));
            }
            config.batch_size = size;
        }

        if let Some(max_retries) = parse_var::<u32, _>(&lookup, "GDPR_MAX_RATE_LIMIT_RETRIES")? {
            config.retry = RetryPolicy::bounded(max_retries);
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid value for {}: {:?}", key, raw)))
        .transpose()
}
