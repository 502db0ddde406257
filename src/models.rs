use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use chrono::{DateTime, Utc};

/// Persisted reporting cycle, a single row in `ace_gdpr_settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReportSettings {
    pub cycle: Option<String>,
    pub last_reported_at: Option<DateTime<Utc>>,
}

/// Credentials a tenant registered with the partner platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClientCredential {
    pub client_key: String,
    /// JWT issuer (the add-on key).
    pub issuer: String,
    #[serde(skip_serializing)]
    pub shared_secret: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub account_id: String,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    pub client_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Updated,
    Closed,
    #[serde(other)]
    Unknown,
}

/// Per-account verdict returned by the partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatus {
    pub account_id: String,
    pub status: AccountStatus,
}

impl ReportStatus {
    pub fn new(account_id: impl Into<String>, status: AccountStatus) -> Self {
        Self { account_id: account_id.into(), status }
    }
}

/// Request body sent to the report-accounts endpoint.
#[derive(Debug, Serialize)]
pub struct ReportAccountsRequest<'a> {
    pub accounts: &'a [UserAccount],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResponse {
    pub accounts: Vec<ReportStatus>,
    pub new_cycle_period: Option<String>,
}

/// Everything a single tenant contributed to a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientUpdates {
    pub statuses: Vec<ReportStatus>,
    pub cycle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledResult {
    pub updated: Vec<String>,
    pub closed: Vec<String>,
    pub cycle: Option<String>,
}
