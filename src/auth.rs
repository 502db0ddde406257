//! Request-bound JWTs for calling the partner platform on behalf of a tenant.
//!
//! Each token carries a `qsh` claim, the SHA-256 of the canonical request, so a token
//! minted for one endpoint cannot be replayed against another.

use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const TOKEN_LIFETIME_SECS: i64 = 180;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub qsh: String,
}

pub fn token_expiration(issued_at: i64) -> i64 {
    issued_at + TOKEN_LIFETIME_SECS
}

/// Signs a token for `method` + `path` issued right now.
pub fn sign_request_token(method: &str, path: &str, issuer: &str, shared_secret: &str) -> Result<String> {
    sign_request_token_at(method, path, issuer, shared_secret, Utc::now().timestamp())
}

pub fn sign_request_token_at(
    method: &str,
    path: &str,
    issuer: &str,
    shared_secret: &str,
    issued_at: i64,
) -> Result<String> {
    let claims = Claims {
        iss: issuer.to_string(),
        iat: issued_at,
        exp: token_expiration(issued_at),
        qsh: query_string_hash(method, path),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(shared_secret.as_bytes()),
    )?;

    Ok(token)
}

/// Hex-encoded SHA-256 of the canonical request.
pub fn query_string_hash(method: &str, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_request(method, path).as_bytes());
    hex::encode(hasher.finalize())
}

/// `METHOD&path&query` with the path and query normalised.
pub fn canonical_request(method: &str, path_and_query: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    };

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        canonical_path(path),
        canonical_query(query)
    )
}

fn canonical_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };
    let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
    path.replace('&', "%26")
}

fn canonical_query(query: &str) -> String {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "jwt" {
            continue;
        }
        params
            .entry(urlencoding::encode(key).into_owned())
            .or_default()
            .push(urlencoding::encode(value).into_owned());
    }

    params
        .into_iter()
        .map(|(key, mut values)| {
            values.sort();
            format!("{}={}", key, values.join(","))
        })
        .collect::<Vec<_>>()
        .join("&")
}
