use async_trait::async_trait;
use pool_http::Method;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::connection::{
    acquisition_error, auth_error, expect_json, is_ok, parse_body, require_token, string_list,
};
use crate::types::{DeleteOutcome, ModifyPatch, Probe, ProvisioningRequest, RetrieveRequest, Retrieved};
use crate::{Backend, BackendKind, Connection, Error, Result, auth};

const MODIFIABLE: [&str; 3] = ["tags", "lifetime", "disk"];

/// vmpooler: the full-featured pool manager.
///
/// Hosts live under `vm/`, on-demand requests under `ondemandvm/`.
pub struct VmpoolerBackend;

impl VmpoolerBackend {
    /// Grow a VM's disk. vmpooler takes this as its own request, not as part
    /// of the modify body.
    async fn disk(&self, conn: &Connection, hostname: &str, token: &str, size: u32) -> Result<Value> {
        let resp = conn
            .send(
                conn.request(Method::Post, &format!("vm/{hostname}/disk/{size}"))
                    .token(Some(token)),
            )
            .await?;
        let body = parse_body(&resp);

        if resp.status == 401 {
            return Err(auth_error(&resp));
        }
        if !is_ok(&body) {
            return Err(Error::Modify(format!(
                "HTTP {}: failed to add {size}GB of disk to {hostname}: {}",
                resp.status, resp.body
            )));
        }

        info!(hostname, size, "vmpooler: disk change requested");
        Ok(body)
    }
}

#[async_trait]
impl Backend for VmpoolerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }

    async fn list(&self, conn: &Connection, filter: Option<&Regex>) -> Result<Vec<String>> {
        let resp = conn.send(conn.request(Method::Get, "vm")).await?;
        let body = expect_json(&resp, "list templates")?;

        let templates = body
            .as_array()
            .ok_or_else(|| Error::InvalidResponse(format!("expected a template list: {}", resp.body)))?;

        Ok(templates
            .iter()
            .filter_map(Value::as_str)
            .filter(|t| filter.is_none_or(|re| re.is_match(t)))
            .map(str::to_string)
            .collect())
    }

    async fn list_active(
        &self,
        conn: &Connection,
        token: Option<&str>,
        _user: Option<&str>,
    ) -> Result<Vec<String>> {
        let token = require_token(token, "list active vms")?;
        let status = auth::token_status(conn, Some(token)).await?;
        Ok(string_list(&status, &[token, "vms", "running"]))
    }

    async fn retrieve(&self, conn: &Connection, req: &RetrieveRequest<'_>) -> Result<Retrieved> {
        if let Some(request_id) = req.resume {
            return Ok(Retrieved::Pending(ProvisioningRequest::new(request_id)));
        }

        let os = req.os.flatten();
        if os.is_empty() {
            return Err(Error::MissingParameter(
                "no operating systems provided to obtain".into(),
            ));
        }

        let path = if req.ondemand {
            format!("ondemandvm/{os}")
        } else {
            format!("vm/{os}")
        };
        let request = conn.request(Method::Post, &path).token(req.token);
        let url = request.url.clone();
        let resp = conn.send(request).await?;
        let body = parse_body(&resp);

        if !is_ok(&body) {
            return Err(acquisition_error(&resp, url));
        }

        if !req.ondemand {
            return Ok(Retrieved::Allocated(body));
        }

        let request_id = body
            .get("request_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidResponse(format!("ondemand request accepted without a request_id: {}", resp.body))
            })?;
        info!(request_id, "vmpooler: ondemand request accepted");
        Ok(Retrieved::Pending(ProvisioningRequest::new(request_id)))
    }

    async fn probe(
        &self,
        conn: &Connection,
        request: &ProvisioningRequest,
        _token: Option<&str>,
    ) -> Result<Probe> {
        let resp = conn
            .send(conn.request(Method::Get, &format!("ondemandvm/{}", request.request_id)))
            .await?;

        match resp.status {
            200 => Ok(Probe::Fulfilled(resp.json()?)),
            202 => Ok(Probe::Pending),
            401 => Err(auth_error(&resp)),
            404 => Err(Error::RequestNotFound {
                request_id: request.request_id.clone(),
                body: resp.body,
            }),
            status => {
                tracing::debug!(status, request_id = %request.request_id, "unexpected probe status, still waiting");
                Ok(Probe::Pending)
            }
        }
    }

    async fn query(&self, conn: &Connection, hostname: &str) -> Result<Value> {
        let resp = conn
            .send(conn.request(Method::Get, &format!("vm/{hostname}")))
            .await?;
        if resp.status == 404 {
            return Err(Error::HostNotFound(hostname.to_string()));
        }
        expect_json(&resp, "query vm")
    }

    async fn modify(
        &self,
        conn: &Connection,
        hostname: &str,
        token: Option<&str>,
        patch: &ModifyPatch,
    ) -> Result<Value> {
        let token = require_token(token, "modify a vm")?;
        if let Some(key) = patch.keys().into_iter().find(|k| !MODIFIABLE.contains(k)) {
            return Err(Error::Modify(format!(
                "the vmpooler service type does not support modification of {key}"
            )));
        }

        let mut result = None;
        if let Some(size) = patch.disk {
            result = Some(self.disk(conn, hostname, token, size).await?);
        }

        let mut body = Map::new();
        if let Some(lifetime) = patch.lifetime {
            body.insert("lifetime".into(), lifetime.into());
        }
        if let Some(tags) = &patch.tags {
            body.insert("tags".into(), Value::Object(tags.clone()));
        }
        if body.is_empty() {
            return Ok(result.unwrap_or_else(|| json!({ "ok": true })));
        }

        let resp = conn
            .send(
                conn.request(Method::Put, &format!("vm/{hostname}"))
                    .token(Some(token))
                    .json(&Value::Object(body)),
            )
            .await?;
        let parsed = parse_body(&resp);

        if resp.status == 401 {
            return Err(auth_error(&resp));
        }
        if !is_ok(&parsed) {
            return Err(Error::Modify(format!(
                "HTTP {}: failed to modify {hostname}: {}",
                resp.status, resp.body
            )));
        }

        info!(hostname, "vmpooler: vm modified");
        Ok(parsed)
    }

    async fn delete(
        &self,
        conn: &Connection,
        names: &[String],
        token: Option<&str>,
        _user: Option<&str>,
    ) -> Result<DeleteOutcome> {
        let token = require_token(token, "delete vms")?;
        let mut outcome = DeleteOutcome::default();

        for hostname in names {
            let resp = conn
                .send(
                    conn.request(Method::Delete, &format!("vm/{hostname}"))
                        .token(Some(token)),
                )
                .await?;
            if resp.status == 401 {
                return Err(auth_error(&resp));
            }
            outcome.push(hostname.clone(), is_ok(&parse_body(&resp)));
        }

        Ok(outcome)
    }

    async fn snapshot(&self, conn: &Connection, hostname: &str, token: Option<&str>) -> Result<Value> {
        let token = require_token(token, "snapshot a vm")?;
        let resp = conn
            .send(
                conn.request(Method::Post, &format!("vm/{hostname}/snapshot"))
                    .token(Some(token)),
            )
            .await?;
        expect_json(&resp, "snapshot")
    }

    async fn revert(
        &self,
        conn: &Connection,
        hostname: &str,
        token: Option<&str>,
        snapshot: Option<&str>,
    ) -> Result<Value> {
        let token = require_token(token, "revert a vm")?;
        let snapshot = snapshot.ok_or_else(|| Error::MissingSnapshot(hostname.to_string()))?;
        let resp = conn
            .send(
                conn.request(Method::Post, &format!("vm/{hostname}/snapshot/{snapshot}"))
                    .token(Some(token)),
            )
            .await?;
        expect_json(&resp, "revert")
    }

    async fn status(&self, conn: &Connection) -> Result<Value> {
        let resp = conn.send(conn.request(Method::Get, "status")).await?;
        expect_json(&resp, "status")
    }

    async fn summary(&self, conn: &Connection) -> Result<Value> {
        let resp = conn.send(conn.request(Method::Get, "summary")).await?;
        expect_json(&resp, "summary")
    }
}
