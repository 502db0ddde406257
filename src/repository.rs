use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::info;
use sqlx::{Row, SqlitePool};

use crate::config::UserTableConfig;
use crate::models::{ClientCredential, ReportSettings, UserAccount};

pub const DEFAULT_CYCLE: &str = "15 Days";

/// Storage the reporting job reads tenants and accounts from and keeps its cycle in.
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn ensure_report_table(&self) -> Result<()>;

    /// Loads the report settings, inserting the default cycle on first use.
    async fn find_or_insert_settings(&self) -> Result<ReportSettings>;

    /// Distinct, non-empty client keys in ascending order.
    async fn find_client_keys(&self) -> Result<Vec<String>>;

    /// Accounts of one client ordered by account id.
    async fn find_user_accounts(&self, client_key: &str) -> Result<Vec<UserAccount>>;

    async fn find_client_info(&self, client_key: &str) -> Result<Option<ClientCredential>>;

    /// Stamps `last_reported_at` with now, and replaces the cycle when one is given.
    async fn update_report_settings(&self, cycle: Option<&str>) -> Result<()>;
}

pub struct SqliteReportRepository {
    pool: SqlitePool,
    users: UserTableConfig,
}

impl SqliteReportRepository {
    pub fn new(pool: SqlitePool, users: UserTableConfig) -> Self {
        Self { pool, users }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl ReportRepository for SqliteReportRepository {
    async fn ensure_report_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ace_gdpr_settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                last_reported_at TIMESTAMP,
                updated_at TIMESTAMP,
                created_at TIMESTAMP,
                cycle TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_or_insert_settings(&self) -> Result<ReportSettings> {
        let existing = sqlx::query_as::<_, ReportSettings>(
            "SELECT cycle, last_reported_at FROM ace_gdpr_settings ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(settings) = existing {
            return Ok(settings);
        }

        let now = Utc::now();
        let settings = ReportSettings {
            cycle: Some(DEFAULT_CYCLE.to_string()),
            last_reported_at: Some(now - Duration::days(1)),
        };

        info!("No report settings found, inserting default cycle of {}", DEFAULT_CYCLE);
        sqlx::query(
            r#"
            INSERT INTO ace_gdpr_settings (last_reported_at, cycle, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(settings.last_reported_at)
        .bind(DEFAULT_CYCLE)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(settings)
    }

    async fn find_client_keys(&self) -> Result<Vec<String>> {
        let column = quote_ident(&self.users.columns.client_key);
        let query = format!(
            r#"
            SELECT DISTINCT {column} AS client_key
            FROM {table}
            WHERE {column} IS NOT NULL AND {column} <> ''
            ORDER BY {column} ASC
            "#,
            column = column,
            table = quote_ident(&self.users.table_name),
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let keys = rows
            .iter()
            .map(|row| row.try_get::<String, _>("client_key"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    async fn find_user_accounts(&self, client_key: &str) -> Result<Vec<UserAccount>> {
        let columns = &self.users.columns;
        let query = format!(
            r#"
            SELECT {account_id} AS account_id, {updated_at} AS updated_at, {client_key} AS client_key
            FROM {table}
            WHERE {client_key} = ?
            ORDER BY {account_id} ASC
            "#,
            account_id = quote_ident(&columns.user_account_id),
            updated_at = quote_ident(&columns.updated_at),
            client_key = quote_ident(&columns.client_key),
            table = quote_ident(&self.users.table_name),
        );

        let accounts = sqlx::query_as::<_, UserAccount>(&query)
            .bind(client_key)
            .fetch_all(&self.pool)
            .await?;

        Ok(accounts)
    }

    async fn find_client_info(&self, client_key: &str) -> Result<Option<ClientCredential>> {
        let credential = sqlx::query_as::<_, ClientCredential>(
            r#"
            SELECT "clientKey" AS client_key,
                   json_extract(val, '$.key') AS issuer,
                   json_extract(val, '$.sharedSecret') AS shared_secret,
                   json_extract(val, '$.baseUrl') AS base_url
            FROM "AddonSettings"
            WHERE "key" = 'clientInfo'
              AND "clientKey" = ?
              AND json_extract(val, '$.key') IS NOT NULL
              AND json_extract(val, '$.sharedSecret') IS NOT NULL
              AND json_extract(val, '$.baseUrl') IS NOT NULL
            LIMIT 1
            "#,
        )
        .bind(client_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(credential)
    }

    async fn update_report_settings(&self, cycle: Option<&str>) -> Result<()> {
        let now = Utc::now();

        match cycle.filter(|c| !c.is_empty()) {
            Some(cycle) => {
                info!("Updating report cycle to {}", cycle);
                sqlx::query("UPDATE ace_gdpr_settings SET last_reported_at = ?, updated_at = ?, cycle = ?")
                    .bind(now)
                    .bind(now)
                    .bind(cycle)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE ace_gdpr_settings SET last_reported_at = ?, updated_at = ?")
                    .bind(now)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
