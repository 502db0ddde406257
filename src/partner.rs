use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::RATE_LIMIT_STATUS;
use crate::models::{PollResponse, ReportAccountsRequest, ReportStatus, UserAccount};

pub const CYCLE_PERIOD_HEADER: &str = "cycle-period";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

#[derive(Debug, Error)]
pub enum PartnerError {
    #[error("partner rejected client credentials (status {status})")]
    Unauthorized { status: u16 },

    #[error("partner request failed with status {status}: {body}")]
    HardFailure { status: u16, body: String },

    #[error("unsupported HTTP method: {0}")]
    InvalidMethod(String),

    #[error("still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("partner request could not be completed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One submission of a batch to the partner.
#[derive(Debug, Clone)]
pub struct PollRequest<'a> {
    pub method: &'a str,
    pub base_url: &'a str,
    pub path: &'a str,
    pub token: &'a str,
    pub accounts: &'a [UserAccount],
}

impl PollRequest<'_> {
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Delivered(PollResponse),
    /// `retry_after` is `None` when the header was missing or not a number of seconds.
    RateLimited { retry_after: Option<u64> },
}

#[async_trait]
pub trait PartnerApi: Send + Sync {
    async fn attempt(&self, request: &PollRequest<'_>) -> Result<PollOutcome, PartnerError>;
}

#[derive(Debug, Deserialize)]
struct ReportAccountsBody {
    accounts: Option<Vec<ReportStatus>>,
}

/// Maps a raw partner response onto a poll outcome.
pub fn classify_response(status: u16, headers: &HeaderMap, body: &str) -> Result<PollOutcome, PartnerError> {
    if status == RATE_LIMIT_STATUS {
        let retry_after = header_str(headers, RETRY_AFTER_HEADER).and_then(parse_retry_after);
        return Ok(PollOutcome::RateLimited { retry_after });
    }

    if status == StatusCode::UNAUTHORIZED.as_u16() || status == StatusCode::FORBIDDEN.as_u16() {
        return Err(PartnerError::Unauthorized { status });
    }

    if !(200..300).contains(&status) {
        return Err(PartnerError::HardFailure { status, body: body.to_string() });
    }

    let accounts = serde_json::from_str::<ReportAccountsBody>(body)
        .ok()
        .and_then(|parsed| parsed.accounts);

    let response = match accounts {
        Some(accounts) => PollResponse {
            accounts,
            new_cycle_period: header_str(headers, CYCLE_PERIOD_HEADER)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        },
        None => PollResponse::default(),
    };

    Ok(PollOutcome::Delivered(response))
}

/// Whole seconds from a `retry-after` value, reading leading digits only so `"1.5"` gives 1.
fn parse_retry_after(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub struct HttpPartnerApi {
    client: Client,
}

impl HttpPartnerApi {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpPartnerApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartnerApi for HttpPartnerApi {
    async fn attempt(&self, request: &PollRequest<'_>) -> Result<PollOutcome, PartnerError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| PartnerError::InvalidMethod(request.method.to_string()))?;
        let url = request.url();

        debug!("Submitting {} accounts to {} {}", request.accounts.len(), method, url);

        let response = self
            .client
            .request(method, &url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("JWT {}", request.token))
            .json(&ReportAccountsRequest { accounts: request.accounts })
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;

        classify_response(status, &headers, &body)
    }
}
