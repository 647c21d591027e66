use std::collections::HashMap;

use axum::http::HeaderMap;
use serde::Serialize;
use sha2::Digest as _;

use crate::config::env_truthy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    Admin,
    Official,
    Resident,
}

impl Role {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "official" => Some(Role::Official),
            "resident" => Some(Role::Resident),
            _ => None,
        }
    }
}

/// The authenticated owner of a push connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Principal {
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub(crate) fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Session check delegated to the auth service. The push transport only asks
/// whether a presented credential maps to a live principal.
pub(crate) trait SessionVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Principal>;
}

/// Verifier backed by a fixed token table, keyed by SHA-256 of the token.
#[derive(Debug, Default)]
pub(crate) struct StaticSessions {
    debug: bool,
    by_digest: HashMap<String, Principal>,
}

impl StaticSessions {
    /// Loads `TOWNHALL_SESSION_TOKENS` (`token=role:name,...`) and `TOWNHALL_DEBUG`.
    pub(crate) fn from_env() -> Self {
        std::env::var("TOWNHALL_SESSION_TOKENS")
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
            .with_debug(env_truthy("TOWNHALL_DEBUG"))
    }

    pub(crate) fn parse(raw: &str) -> Self {
        let mut by_digest = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((token, who)) = entry.split_once('=') else {
                tracing::warn!("ignoring session entry without '='");
                continue;
            };
            let (role_raw, name) = who.split_once(':').unwrap_or((who, who));
            let Some(role) = Role::parse(role_raw) else {
                tracing::warn!(role = %role_raw, "ignoring session entry with unknown role");
                continue;
            };
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            by_digest.insert(
                digest_hex(token),
                Principal {
                    name: name.trim().to_string(),
                    role,
                },
            );
        }
        Self {
            debug: false,
            by_digest,
        }
    }

    pub(crate) fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub(crate) fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub(crate) fn debug(&self) -> bool {
        self.debug
    }
}

impl SessionVerifier for StaticSessions {
    fn verify(&self, token: &str) -> Option<Principal> {
        let want = digest_hex(token);
        let found = self
            .by_digest
            .iter()
            .find(|(digest, _)| ct_eq(digest.as_bytes(), want.as_bytes()))
            .map(|(_, p)| p.clone());
        if found.is_none() && self.debug {
            return Some(Principal {
                name: "debug".into(),
                role: Role::Admin,
            });
        }
        found
    }
}

/// Credential from `Authorization: Bearer`, `X-Townhall-Session`, or the
/// `token` query parameter (event-source clients cannot set headers).
pub(crate) fn presented_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(bearer) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|hv| hv.strip_prefix("Bearer "))
    {
        return Some(bearer.trim().to_string());
    }
    if let Some(hv) = headers
        .get("X-Townhall-Session")
        .and_then(|h| h.to_str().ok())
    {
        return Some(hv.trim().to_string());
    }
    query_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Resolve the caller. An empty credential still reaches the verifier so debug
/// mode can admit it.
pub(crate) fn authenticate(
    verifier: &dyn SessionVerifier,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<Principal> {
    let token = presented_token(headers, query_token).unwrap_or_default();
    verifier.verify(&token)
}

fn digest_hex(token: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
