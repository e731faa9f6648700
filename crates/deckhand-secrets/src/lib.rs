#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **deckhand-secrets** – Secret store client contract for Deckhand.
//!
//! Documents written with `storagePolicy: encrypted` never have their payload
//! persisted in the revision store; the payload is pushed to an external
//! secret store and an opaque URL-like reference is stored in its place. This
//! crate defines the [`SecretStore`] trait the rest of the workspace programs
//! against, the heuristic that recognizes such references, the mapping from
//! document schemas to the store's secret-kind taxonomy, and an in-memory
//! driver for tests and development.
//!
//! Production drivers (Barbican, Vault, …) implement the same trait in
//! separate crates.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use deckhand_types::{Error, Result};

/// Default endpoint used by the in-memory driver when minting references.
const DEFAULT_ENDPOINT: &str = "https://secrets.deckhand.test:9311";

//─────────────────────────────
//  Secret kind taxonomy
//─────────────────────────────

/// Secret store taxonomy a document payload is filed under.
///
/// Derived from the second component of the document's `schema`; e.g.
/// `deckhand/CertificateKey/v1` payloads are stored as private keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretKind {
    /// Certificates and certificate authorities.
    Certificate,
    /// Private key material.
    Private,
    /// Public key material.
    Public,
    /// Passphrases and other opaque credentials.
    Passphrase,
    /// Any other kind, passed through lower-cased.
    Other(String),
}

impl SecretKind {
    /// Derives the secret kind from a document schema identifier.
    pub fn from_schema(schema: &str) -> Self {
        let component = schema
            .split('/')
            .nth(1)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match component.as_str() {
            "certificateauthoritykey" | "certificatekey" | "privatekey" => SecretKind::Private,
            "certificateauthority" | "certificate" => SecretKind::Certificate,
            "publickey" => SecretKind::Public,
            "passphrase" => SecretKind::Passphrase,
            _ => SecretKind::Other(component),
        }
    }

    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            SecretKind::Certificate => "certificate",
            SecretKind::Private => "private",
            SecretKind::Public => "public",
            SecretKind::Passphrase => "passphrase",
            SecretKind::Other(name) => name,
        }
    }
}

impl std::fmt::Display for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//─────────────────────────────
//  Reference recognition
//─────────────────────────────

/// Heuristic recognizer for secret references.
///
/// A value is a reference iff it is a string, parses as a URL, contains the
/// substring `secrets`, and its final path component is a UUID.
pub fn is_secret_reference(value: &Value) -> bool {
    let Some(raw) = value.as_str() else {
        return false;
    };
    if !raw.contains("secrets") || Url::parse(raw).is_err() {
        return false;
    }
    raw.rsplit('/')
        .next()
        .map(|last| Uuid::from_str(last).is_ok())
        .unwrap_or(false)
}

//─────────────────────────────
//  Store trait
//─────────────────────────────

/// Abstraction over an external secret store.
///
/// Implementations must be thread-safe; the store is shared across
/// concurrent bucket writes and render sessions.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Persists `payload` under `name` with the given kind, returning the
    /// opaque reference that stands in for the payload from then on.
    async fn store(&self, name: &str, kind: SecretKind, payload: Value) -> Result<String>;

    /// Retrieves the payload behind a previously minted reference.
    async fn fetch(&self, reference: &str) -> Result<Value>;
}

//─────────────────────────────
//  In-memory driver
//─────────────────────────────

/// An in-memory, non-persistent secret store.
///
/// Mints `<endpoint>/v1/secrets/<uuid>` references that satisfy
/// [`is_secret_reference`]. All payloads are lost when the process
/// terminates; use a real driver in production.
#[derive(Debug, Clone)]
pub struct MemorySecretStore {
    endpoint: String,
    secrets: Arc<RwLock<HashMap<Uuid, Value>>>,
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySecretStore {
    /// Creates an empty store minting references under the default endpoint.
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    /// Creates an empty store minting references under `endpoint`.
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            secrets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of payloads currently held.
    pub async fn secret_count(&self) -> usize {
        self.secrets.read().await.len()
    }

    fn uuid_of(&self, reference: &str) -> Result<Uuid> {
        let last = reference.rsplit('/').next().unwrap_or_default();
        Uuid::from_str(last).map_err(|_| Error::SecretStoreError {
            detail: format!("not a recognizable secret reference: {reference}"),
            transient: false,
        })
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn store(&self, name: &str, kind: SecretKind, payload: Value) -> Result<String> {
        let id = Uuid::new_v4();
        self.secrets.write().await.insert(id, payload);
        let reference = format!("{}/v1/secrets/{}", self.endpoint, id);
        debug!(%name, %kind, %reference, "stored secret payload");
        Ok(reference)
    }

    async fn fetch(&self, reference: &str) -> Result<Value> {
        let id = self.uuid_of(reference)?;
        let payload = self
            .secrets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::SecretStoreError {
                detail: format!("no secret behind reference {reference}"),
                transient: false,
            })?;
        debug!(%reference, "resolved secret reference");
        Ok(payload)
    }
}
