use std::sync::Arc;

use pool_http::Transport;
use regex::Regex;
use serde_json::Value;

use crate::config::{self, EffectiveConfig, GlobalConfig};
use crate::log::UserLog;
use crate::types::{
    DeleteOutcome, ModifyPatch, OsRequest, Probe, ProvisioningRequest, RetrieveRequest, Retrieved,
};
use crate::{Backend, BackendKind, Connection, Error, PollOutcome, Poller, Result, build_backend};

/// One configured pooler: the resolved settings plus the adapter for its
/// backend kind. Every operation forwards the configured token and user.
pub struct Service {
    config: EffectiveConfig,
    backend: Arc<dyn Backend>,
    conn: Connection,
}

impl Service {
    pub fn new(
        config: EffectiveConfig,
        transport: Arc<dyn Transport>,
        log: Arc<dyn UserLog>,
        verbose: bool,
    ) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            Error::Configuration(match &config.service {
                Some(name) => format!("no url configured for service '{name}'"),
                None => "no url configured; set `url` in the config file or pass --url".into(),
            })
        })?;
        let conn = Connection::new(transport, url, verbose, log);
        let backend = build_backend(config.kind);

        Ok(Self {
            config,
            backend,
            conn,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.config.kind
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        self.conn.base_url()
    }

    /// Host part of the service URL, for messages.
    pub fn host(&self) -> &str {
        let url = self.url();
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let authority = rest.split('/').next().unwrap_or(rest);
        let authority = authority.rsplit('@').next().unwrap_or(authority);
        if let Some(bracketed) = authority.strip_prefix('[') {
            return bracketed.split(']').next().unwrap_or(bracketed);
        }
        authority.split(':').next().unwrap_or(authority)
    }

    pub fn user(&self) -> Option<&str> {
        self.config.user.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.config.token.as_deref()
    }

    pub fn log(&self) -> &dyn UserLog {
        self.conn.log()
    }

    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<String>> {
        let filter = filter.map(Regex::new).transpose()?;
        self.backend.list(&self.conn, filter.as_ref()).await
    }

    pub async fn list_active(&self) -> Result<Vec<String>> {
        self.backend
            .list_active(&self.conn, self.token(), self.user())
            .await
    }

    pub async fn list_active_job_ids(&self) -> Result<Vec<String>> {
        self.backend
            .list_active_job_ids(&self.conn, self.user())
            .await
    }

    /// Acquire hosts. With `use_token` off the request is sent anonymously.
    pub async fn retrieve(&self, os: &OsRequest, use_token: bool, ondemand: bool) -> Result<Retrieved> {
        let token = self.request_token(use_token);
        self.backend
            .retrieve(
                &self.conn,
                &RetrieveRequest {
                    os,
                    token,
                    user: self.user(),
                    priority: self.config.priority,
                    ondemand,
                    resume: None,
                },
            )
            .await
    }

    /// Pick up a request issued by an earlier run. ABS needs the original
    /// `os` to replay the request body.
    pub async fn resume(&self, request_id: &str, os: &OsRequest, use_token: bool) -> Result<Retrieved> {
        let token = self.request_token(use_token);
        self.backend
            .retrieve(
                &self.conn,
                &RetrieveRequest {
                    os,
                    token,
                    user: self.user(),
                    priority: self.config.priority,
                    ondemand: true,
                    resume: Some(request_id),
                },
            )
            .await
    }

    /// A single status check of a pending request.
    pub async fn probe(&self, request: &ProvisioningRequest, use_token: bool) -> Result<Probe> {
        let token = use_token.then(|| self.token()).flatten();
        self.backend.probe(&self.conn, request, token).await
    }

    /// Probe `request` on the backend's schedule until it is fulfilled or
    /// the schedule times out.
    pub async fn wait_for_request(
        &self,
        request: &ProvisioningRequest,
        use_token: bool,
    ) -> Result<PollOutcome> {
        let token = use_token.then(|| self.token()).flatten();
        Poller::new(self.backend.poll_schedule(), self.log())
            .wait(request, || self.backend.probe(&self.conn, request, token))
            .await
    }

    pub async fn query(&self, name: &str) -> Result<Value> {
        self.backend.query(&self.conn, name).await
    }

    pub async fn modify(&self, hostname: &str, patch: &ModifyPatch) -> Result<Value> {
        self.backend
            .modify(&self.conn, hostname, self.token(), patch)
            .await
    }

    pub async fn delete(&self, names: &[String]) -> Result<DeleteOutcome> {
        self.backend
            .delete(&self.conn, names, self.token(), self.user())
            .await
    }

    pub async fn snapshot(&self, hostname: &str) -> Result<Value> {
        self.backend
            .snapshot(&self.conn, hostname, self.token())
            .await
    }

    pub async fn revert(&self, hostname: &str, snapshot: Option<&str>) -> Result<Value> {
        self.backend
            .revert(&self.conn, hostname, self.token(), snapshot)
            .await
    }

    pub async fn status(&self) -> Result<Value> {
        self.backend.status(&self.conn).await
    }

    pub async fn summary(&self) -> Result<Value> {
        self.backend.summary(&self.conn).await
    }

    pub async fn get_token(&self, password: &str) -> Result<String> {
        let user = self.require_user("request a token")?;
        self.backend.get_token(&self.conn, user, password).await
    }

    /// Delete `token`, or the configured token when none is given.
    pub async fn delete_token(&self, password: &str, token: Option<&str>) -> Result<Value> {
        let user = self.require_user("delete a token")?;
        let token = token.or(self.token());
        self.backend
            .delete_token(&self.conn, user, password, token)
            .await
    }

    pub async fn token_status(&self, token: Option<&str>) -> Result<Value> {
        let token = token.or(self.token());
        self.backend.token_status(&self.conn, token).await
    }

    /// The vmpooler service an ABS service delegates host details to, if one
    /// is declared with `vmpooler_fallback`.
    pub fn fallback(&self, global: &GlobalConfig) -> Result<Option<Service>> {
        if self.kind() != BackendKind::Broker {
            return Ok(None);
        }
        let Some(name) = self.config.vmpooler_fallback.as_deref() else {
            return Ok(None);
        };

        let config = config::vmpooler_fallback(global, Some(name))?;
        tracing::debug!(fallback = name, url = ?config.url, "resolved vmpooler fallback");
        Self::new(
            config,
            self.conn.transport(),
            self.conn.log_handle(),
            self.conn.verbose(),
        )
        .map(Some)
    }

    fn request_token(&self, use_token: bool) -> Option<&str> {
        if use_token {
            return self.token();
        }
        self.log().info(&format!(
            "Requesting vms from {} without a token...",
            self.host()
        ));
        None
    }

    fn require_user(&self, action: &str) -> Result<&str> {
        self.user().ok_or_else(|| {
            Error::Configuration(format!("a user is required to {action}; set `user` or pass --user"))
        })
    }
}
