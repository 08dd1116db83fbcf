pub mod abs;
pub mod auth;
pub mod bulk;
pub mod config;
pub mod connection;
pub mod hosts;
pub mod log;
pub mod nspooler;
pub mod poller;
pub mod service;
pub mod types;
pub mod vmpooler;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use connection::Connection;
pub use poller::{PollOutcome, PollSchedule, Poller};
pub use service::Service;
pub use types::{
    DeleteOutcome, ModifyPatch, OsRequest, Probe, ProvisioningRequest, RetrieveRequest, Retrieved,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("token error: {0}")]
    Token(String),

    #[error("modify failed: {0}")]
    Modify(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("HTTP 403: request to {url} exceeds the configured pool maximum: {body}")]
    PoolMaximum { url: String, body: String },

    #[error("HTTP {status}: failed to obtain VMs from {url}: {body}")]
    Acquisition {
        status: u16,
        url: String,
        body: String,
    },

    #[error("{operation} is not supported by the {kind} service type")]
    Unsupported {
        operation: &'static str,
        kind: BackendKind,
    },

    #[error("no snapshot id provided, could not revert {0}")]
    MissingSnapshot(String),

    #[error("HTTP 404: request {request_id} cannot be found: {body}")]
    RequestNotFound { request_id: String, body: String },

    #[error("{0} not found")]
    HostNotFound(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("invalid filter: {0}")]
    Filter(#[from] regex::Error),

    #[error("pooler {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Transport(#[from] pool_http::Error),

    #[error("could not decode pooler response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Known pooler backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// The full-featured pool manager (vmpooler).
    #[serde(rename = "vmpooler")]
    Primary,
    /// The scheduling broker (ABS): job ids and allocated resources.
    #[serde(rename = "abs")]
    Broker,
    /// The non-standard pooler (nspooler): reservations with a reason.
    #[serde(rename = "nspooler")]
    Legacy,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "vmpooler",
            Self::Broker => "abs",
            Self::Legacy => "nspooler",
        }
    }

    /// Resolve an optional configured `type`, defaulting to [`BackendKind::Primary`].
    pub fn from_config(kind: Option<&str>) -> Result<Self> {
        kind.map_or(Ok(Self::Primary), str::parse)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vmpooler" => Ok(Self::Primary),
            "abs" | "alwaysbescheduling" | "always_be_scheduling" => Ok(Self::Broker),
            "ns" | "nspooler" | "nonstandard" | "nonstandard_pooler" => Ok(Self::Legacy),
            other => Err(Error::Configuration(format!(
                "unknown service type '{other}' (expected vmpooler, abs or nspooler)"
            ))),
        }
    }
}

/// Backend-agnostic pooler operations.
///
/// Each backend translates the uniform operation set into its own REST
/// shape. Operations a backend has no equivalent for keep the default
/// implementation, which fails with [`Error::Unsupported`] without touching
/// the network.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            operation,
            kind: self.kind(),
        }
    }

    /// Templates (or platforms) the pooler can provide, optionally filtered.
    async fn list(&self, conn: &Connection, filter: Option<&Regex>) -> Result<Vec<String>>;

    /// Hosts (or job ids) currently held by the caller.
    async fn list_active(
        &self,
        conn: &Connection,
        token: Option<&str>,
        user: Option<&str>,
    ) -> Result<Vec<String>>;

    async fn list_active_job_ids(&self, _conn: &Connection, _user: Option<&str>) -> Result<Vec<String>> {
        Err(self.unsupported("list_active_job_ids"))
    }

    async fn retrieve(&self, conn: &Connection, req: &RetrieveRequest<'_>) -> Result<Retrieved>;

    /// One status probe of a pending provisioning request.
    async fn probe(
        &self,
        _conn: &Connection,
        _request: &ProvisioningRequest,
        _token: Option<&str>,
    ) -> Result<Probe> {
        Err(self.unsupported("wait_for_request"))
    }

    fn poll_schedule(&self) -> PollSchedule {
        PollSchedule::ONDEMAND
    }

    /// Raw detail response for one host (or job).
    async fn query(&self, conn: &Connection, name: &str) -> Result<Value>;

    async fn modify(
        &self,
        _conn: &Connection,
        _hostname: &str,
        _token: Option<&str>,
        _patch: &ModifyPatch,
    ) -> Result<Value> {
        Err(self.unsupported("modify"))
    }

    async fn delete(
        &self,
        conn: &Connection,
        names: &[String],
        token: Option<&str>,
        user: Option<&str>,
    ) -> Result<DeleteOutcome>;

    async fn snapshot(&self, _conn: &Connection, _hostname: &str, _token: Option<&str>) -> Result<Value> {
        Err(self.unsupported("snapshot"))
    }

    async fn revert(
        &self,
        _conn: &Connection,
        _hostname: &str,
        _token: Option<&str>,
        _snapshot: Option<&str>,
    ) -> Result<Value> {
        Err(self.unsupported("revert"))
    }

    async fn status(&self, conn: &Connection) -> Result<Value>;

    async fn summary(&self, _conn: &Connection) -> Result<Value> {
        Err(self.unsupported("summary"))
    }

    async fn get_token(&self, conn: &Connection, user: &str, password: &str) -> Result<String> {
        auth::get_token(conn, user, password).await
    }

    async fn delete_token(
        &self,
        conn: &Connection,
        user: &str,
        password: &str,
        token: Option<&str>,
    ) -> Result<Value> {
        auth::delete_token(conn, user, password, token).await
    }

    async fn token_status(&self, conn: &Connection, token: Option<&str>) -> Result<Value> {
        auth::token_status(conn, token).await
    }
}

/// Construct the adapter for a backend kind.
pub fn build_backend(kind: BackendKind) -> Arc<dyn Backend> {
    tracing::debug!(%kind, "selecting pooler backend");
    match kind {
        BackendKind::Primary => Arc::new(vmpooler::VmpoolerBackend),
        BackendKind::Broker => Arc::new(abs::AbsBackend),
        BackendKind::Legacy => Arc::new(nspooler::NspoolerBackend),
    }
}
