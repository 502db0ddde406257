use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::sign_request_token;
use crate::config::PartnerEndpoint;
use crate::models::{ClientCredential, PollResponse, UserAccount};
use crate::partner::{PartnerApi, PartnerError, PollOutcome, PollRequest};

/// How many rate-limited answers to tolerate for a single batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// `None` waits as long as the partner keeps asking.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_retries: None }
    }

    pub fn bounded(max_retries: u32) -> Self {
        Self { max_retries: Some(max_retries) }
    }

    fn allows_retry(&self, retries_so_far: u32) -> bool {
        self.max_retries.map_or(true, |max| retries_so_far < max)
    }
}

#[async_trait]
pub trait Backoff: Send + Sync {
    async fn wait(&self, delay: Duration);
}

pub struct TokioBackoff;

#[async_trait]
impl Backoff for TokioBackoff {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Submits one batch, waiting out rate limits until the partner gives a real answer.
///
/// A fresh token is signed for every attempt since an advertised back-off can outlast
/// the token lifetime.
pub async fn poll_until_settled<P, B>(
    partner: &P,
    backoff: &B,
    policy: &RetryPolicy,
    endpoint: &PartnerEndpoint,
    credential: &ClientCredential,
    accounts: &[UserAccount],
) -> Result<PollResponse>
where
    P: PartnerApi + ?Sized,
    B: Backoff + ?Sized,
{
    let mut retries: u32 = 0;

    loop {
        let token = sign_request_token(
            &endpoint.method,
            &endpoint.path,
            &credential.issuer,
            &credential.shared_secret,
        )?;

        let request = PollRequest {
            method: &endpoint.method,
            base_url: &credential.base_url,
            path: &endpoint.path,
            token: &token,
            accounts,
        };

        match partner.attempt(&request).await? {
            PollOutcome::Delivered(response) => return Ok(response),
            PollOutcome::RateLimited { retry_after: None } => {
                warn!(
                    "Rate limited for client {} without a usable retry-after, treating batch as empty",
                    credential.client_key
                );
                return Ok(PollResponse::default());
            }
            PollOutcome::RateLimited { retry_after: Some(seconds) } => {
                if !policy.allows_retry(retries) {
                    return Err(PartnerError::RetriesExhausted { attempts: retries + 1 }.into());
                }
                retries += 1;
                warn!(
                    "Rate limited for client {}, retry {} in {}s",
                    credential.client_key, retries, seconds
                );
                backoff.wait(Duration::from_secs(seconds)).await;
                info!("Resuming submission for client {}", credential.client_key);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Partner double that replays a fixed script of outcomes.
    pub struct ScriptedPartner {
        script: Mutex<VecDeque<Result<PollOutcome, PartnerError>>>,
        pub calls: Mutex<Vec<(String, String, usize)>>,
    }

    impl ScriptedPartner {
        pub fn new(script: Vec<Result<PollOutcome, PartnerError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PartnerApi for ScriptedPartner {
        async fn attempt(&self, request: &PollRequest<'_>) -> Result<PollOutcome, PartnerError> {
            self.calls.lock().unwrap().push((
                request.base_url.to_string(),
                request.token.to_string(),
                request.accounts.len(),
            ));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PollOutcome::Delivered(PollResponse::default())))
        }
    }

    #[derive(Default)]
    pub struct RecordingBackoff {
        pub waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Backoff for RecordingBackoff {
        async fn wait(&self, delay: Duration) {
            self.waits.lock().unwrap().push(delay);
        }
    }
}
