use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::batch::break_into_chunks;
use crate::config::ReporterConfig;
use crate::models::{AccountStatus, ClientUpdates, CompiledResult, PollResponse, UserAccount};
use crate::partner::{PartnerApi, PartnerError};
use crate::poller::{poll_until_settled, Backoff};
use crate::repository::ReportRepository;
use crate::schedule::should_send_report;

/// Drives one GDPR reporting run: gate, per-client submission, aggregation, persistence.
pub struct GdprReportService<R, P, B> {
    repository: R,
    partner: P,
    backoff: B,
    config: ReporterConfig,
}

impl<R, P, B> GdprReportService<R, P, B>
where
    R: ReportRepository,
    P: PartnerApi,
    B: Backoff,
{
    pub fn new(repository: R, partner: P, backoff: B, config: ReporterConfig) -> Self {
        Self { repository, partner, backoff, config }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub async fn run_report(&self) -> Result<CompiledResult> {
        self.run_report_at(Utc::now()).await
    }

    /// Runs the job as if the current time were `now`.
    ///
    /// Any error other than a client's authorization failure aborts the run before
    /// the settings are touched.
    pub async fn run_report_at(&self, now: DateTime<Utc>) -> Result<CompiledResult> {
        self.repository.ensure_report_table().await?;

        let settings = self.repository.find_or_insert_settings().await?;
        let mut client_results = Vec::new();

        if should_send_report(&settings, self.config.force_execution, now) {
            info!(
                "Found report settings: cycle={:?}, last_reported_at={:?}",
                settings.cycle, settings.last_reported_at
            );

            for client_key in self.client_keys().await? {
                info!("Getting user account info for client: {}", client_key);
                let updates = match self.client_updates(&client_key).await {
                    Ok(updates) => updates,
                    Err(e) if is_unauthorized(&e) => {
                        warn!("Skipping client {}: {}", client_key, e);
                        ClientUpdates::default()
                    }
                    Err(e) => return Err(e),
                };
                client_results.push(updates);
            }
        } else {
            info!("Report not due yet, only refreshing last reported date");
        }

        let result = compile_result(&client_results);

        self.repository.update_report_settings(result.cycle.as_deref()).await?;

        info!(
            "Report finished: {} updated, {} closed, cycle {:?}",
            result.updated.len(),
            result.closed.len(),
            result.cycle
        );
        Ok(result)
    }

    pub async fn client_keys(&self) -> Result<Vec<String>> {
        let keys = self.repository.find_client_keys().await?;
        Ok(keys.into_iter().filter(|k| !k.is_empty()).collect())
    }

    pub async fn user_account_batches(&self, client_key: &str) -> Result<Vec<Vec<UserAccount>>> {
        let accounts = self.repository.find_user_accounts(client_key).await?;
        Ok(break_into_chunks(&accounts, self.config.batch_size))
    }

    /// Submits one batch for `client_key`, or returns `None` when the client has no credentials.
    pub async fn poll(&self, batch: &[UserAccount], client_key: &str) -> Result<Option<PollResponse>> {
        let credential = match self.repository.find_client_info(client_key).await? {
            Some(credential) => credential,
            None => {
                debug!("No client info stored for {}, nothing to report", client_key);
                return Ok(None);
            }
        };

        let response = poll_until_settled(
            &self.partner,
            &self.backoff,
            &self.config.retry,
            &self.config.partner,
            &credential,
            batch,
        )
        .await?;

        Ok(Some(response))
    }

    /// Collects every status the partner returned for a client, plus the first cycle it advertised.
    pub async fn client_updates(&self, client_key: &str) -> Result<ClientUpdates> {
        let mut updates = ClientUpdates::default();

        for batch in self.user_account_batches(client_key).await? {
            if let Some(response) = self.poll(&batch, client_key).await? {
                updates = updates.absorb(response);
            }
        }

        Ok(updates)
    }
}

fn is_unauthorized(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<PartnerError>(), Some(PartnerError::Unauthorized { .. }))
}

impl ClientUpdates {
    fn absorb(mut self, response: PollResponse) -> Self {
        self.statuses.extend(response.accounts);
        if self.cycle.is_none() {
            self.cycle = response.new_cycle_period.filter(|c| !c.is_empty());
        }
        self
    }
}

impl CompiledResult {
    fn merge(mut self, client: &ClientUpdates) -> Self {
        for status in &client.statuses {
            match status.status {
                AccountStatus::Updated => self.updated.push(status.account_id.clone()),
                AccountStatus::Closed => self.closed.push(status.account_id.clone()),
                AccountStatus::Unknown => {}
            }
        }
        // last client with a cycle wins
        if let Some(cycle) = &client.cycle {
            self.cycle = Some(cycle.clone());
        }
        self
    }
}

/// Folds per-client results into the run's output, preserving client then response order.
pub fn compile_result(client_updates: &[ClientUpdates]) -> CompiledResult {
    client_updates
        .iter()
        .fold(CompiledResult::default(), |agg, client| agg.merge(client))
}
