//! Shared fixtures: an in-memory SQLite store and a scripted mock partner server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gdpr_reporter::config::UserTableConfig;
use gdpr_reporter::poller::Backoff;
use gdpr_reporter::repository::SqliteReportRepository;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub const REPORT_PATH: &str = "/rest/atlassian-connect/latest/report-accounts";

/// One canned answer from the mock partner.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self { status, headers: Vec::new(), body: body.to_string() }
    }

    pub fn empty(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: String::new() }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// What the mock partner saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct MockPartner {
    pub base_url: String,
    state: MockState,
}

impl MockPartner {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_report(req: HttpRequest, body: web::Bytes, state: web::Data<MockState>) -> HttpResponse {
    state.requests.lock().unwrap().push(RecordedRequest {
        method: req.method().to_string(),
        path: req.path().to_string(),
        authorization: header(&req, "authorization"),
        accept: header(&req, "accept"),
        content_type: header(&req, "content-type"),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let reply = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| MockReply::json(200, json!({ "accounts": [] })));

    let mut response = HttpResponse::build(StatusCode::from_u16(reply.status).unwrap());
    for (name, value) in &reply.headers {
        response.insert_header((name.as_str(), value.as_str()));
    }
    response.content_type("application/json").body(reply.body)
}

/// Starts a mock partner on an ephemeral port that answers with `replies` in order.
///
/// Must be called from inside an actix system (`#[actix_web::test]`).
pub fn spawn_partner(replies: Vec<MockReply>) -> MockPartner {
    let state = MockState {
        replies: Arc::new(Mutex::new(replies.into())),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .default_service(web::to(handle_report))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());

    MockPartner { base_url: format!("http://{}", addr), state }
}

pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

pub async fn setup_repository() -> SqliteReportRepository {
    SqliteReportRepository::new(memory_pool().await, UserTableConfig::default())
}

pub async fn create_users_table(pool: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            updated_at TIMESTAMP,
            created_at TIMESTAMP,
            user_account_id TEXT,
            client_key TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_user(pool: &SqlitePool, client_key: &str, account_id: &str, updated_at: DateTime<Utc>) {
    sqlx::query("INSERT INTO users (client_key, user_account_id, updated_at, created_at) VALUES (?, ?, ?, ?)")
        .bind(client_key)
        .bind(account_id)
        .bind(updated_at)
        .bind(updated_at)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn create_addon_settings_table(pool: &SqlitePool) {
    sqlx::query(r#"CREATE TABLE "AddonSettings" (id INTEGER PRIMARY KEY, "clientKey" TEXT, "key" TEXT, val JSON)"#)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_client_info(pool: &SqlitePool, client_key: &str, issuer: &str, secret: &str, base_url: &str) {
    let val = json!({
        "key": issuer,
        "clientKey": client_key,
        "sharedSecret": secret,
        "baseUrl": base_url,
    });
    sqlx::query(r#"INSERT INTO "AddonSettings" ("clientKey", "key", val) VALUES (?, 'clientInfo', ?)"#)
        .bind(client_key)
        .bind(val.to_string())
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_settings(pool: &SqlitePool, cycle: &str, last_reported_at: DateTime<Utc>) {
    sqlx::query("INSERT INTO ace_gdpr_settings (cycle, last_reported_at) VALUES (?, ?)")
        .bind(cycle)
        .bind(last_reported_at)
        .execute(pool)
        .await
        .unwrap();
}

/// Records requested delays instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingBackoff {
    pub waits: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Backoff for RecordingBackoff {
    async fn wait(&self, delay: Duration) {
        self.waits.lock().unwrap().push(delay);
    }
}
