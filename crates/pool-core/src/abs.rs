use async_trait::async_trait;
use chrono::Utc;
use pool_http::{Method, Response};
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::connection::{auth_error, expect_json, require_token, string_list};
use crate::types::{DeleteOutcome, Probe, ProvisioningRequest, RetrieveRequest, Retrieved};
use crate::{Backend, BackendKind, Connection, Error, PollSchedule, Result};

/// Platform sources ABS reports on, each under `<source>_platforms`.
const PLATFORM_SOURCES: [&str; 4] = ["vmpooler", "ondemand_vmpooler", "nspooler", "aws"];

/// Job states whose resources can be returned.
const RETURNABLE_STATES: [&str; 2] = ["allocated", "filled"];

/// ABS: the scheduling broker.
///
/// Requests are queued under a job id and fulfilled by whichever pooler ABS
/// delegates to. Hosts are returned per job, not per VM.
pub struct AbsBackend;

impl AbsBackend {
    /// Queue records, optionally restricted to jobs owned by `user`.
    ///
    /// `status/queue` lists records either as objects or as JSON-encoded
    /// strings.
    async fn active_requests(&self, conn: &Connection, user: Option<&str>) -> Result<Vec<Value>> {
        let resp = conn.send(conn.request(Method::Get, "status/queue")).await?;
        let body = expect_json(&resp, "status/queue")?;

        let entries = match body {
            Value::Array(entries) => entries,
            Value::Object(mut page) => match page.remove("queue") {
                Some(Value::Array(entries)) => entries,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        let mut records = Vec::new();
        for entry in entries {
            let record = match entry {
                Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "abs: skipping undecodable queue entry");
                        continue;
                    }
                },
                record => record,
            };
            if user.is_some_and(|u| job_field(&record, "user") != Some(u)) {
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }
}

fn job_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get("request")
        .and_then(|r| r.get("job"))
        .and_then(|j| j.get(field))
        .and_then(Value::as_str)
}

fn allocated_hostnames(record: &Value) -> Vec<String> {
    record
        .get("allocated_resources")
        .and_then(Value::as_array)
        .map(|resources| {
            resources
                .iter()
                .filter_map(|r| r.get("hostname").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Accept 200/201/202 from the request endpoint; reject everything else.
fn check_queue_status(resp: &Response, url: &str) -> Result<()> {
    match resp.status {
        200..=202 => Ok(()),
        401 => Err(auth_error(resp)),
        status => Err(Error::Acquisition {
            status,
            url: url.to_string(),
            body: resp.body.clone(),
        }),
    }
}

/// Reshape ABS's allocated host list into the pooler response shape:
/// `{"job_id": .., "<type>": {"hostname": [..]}, "ok": true}`.
pub fn translate(job_id: &str, hosts: &[Value]) -> Value {
    let mut body = Map::new();
    body.insert("job_id".into(), job_id.into());

    for host in hosts {
        let (Some(kind), Some(hostname)) = (
            host.get("type").and_then(Value::as_str),
            host.get("hostname").and_then(Value::as_str),
        ) else {
            continue;
        };
        let entry = body
            .entry(kind)
            .or_insert_with(|| json!({ "hostname": [] }));
        if let Some(list) = entry.get_mut("hostname").and_then(Value::as_array_mut) {
            list.push(hostname.into());
        }
    }

    body.insert("ok".into(), true.into());
    Value::Object(body)
}

#[async_trait]
impl Backend for AbsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Broker
    }

    async fn list(&self, conn: &Connection, filter: Option<&Regex>) -> Result<Vec<String>> {
        let mut platforms = Vec::new();

        for source in PLATFORM_SOURCES {
            let resp = conn
                .send(conn.request(Method::Get, &format!("status/platforms/{source}")))
                .await?;
            if !resp.is_success() {
                conn.log().info(&format!(
                    "could not list {source} platforms: HTTP {}",
                    resp.status
                ));
                continue;
            }
            let key = format!("{source}_platforms");
            match resp.json::<Value>() {
                Ok(body) => platforms.extend(string_list(&body, &[key.as_str()])),
                Err(e) => warn!(source, error = %e, "abs: undecodable platform list"),
            }
        }

        Ok(platforms
            .into_iter()
            .filter(|p| filter.is_none_or(|re| re.is_match(p)))
            .collect())
    }

    async fn list_active(
        &self,
        conn: &Connection,
        _token: Option<&str>,
        user: Option<&str>,
    ) -> Result<Vec<String>> {
        self.list_active_job_ids(conn, user).await
    }

    async fn list_active_job_ids(&self, conn: &Connection, user: Option<&str>) -> Result<Vec<String>> {
        let Some(user) = user else {
            return Ok(Vec::new());
        };
        Ok(self
            .active_requests(conn, Some(user))
            .await?
            .iter()
            .filter_map(|r| job_field(r, "id"))
            .map(str::to_string)
            .collect())
    }

    async fn retrieve(&self, conn: &Connection, req: &RetrieveRequest<'_>) -> Result<Retrieved> {
        let user = req.user.ok_or_else(|| {
            Error::Configuration("a user is required to request vms from abs".into())
        })?;
        if req.os.is_empty() {
            return Err(Error::MissingParameter(
                "no operating systems provided to obtain".into(),
            ));
        }

        let job_id = match req.resume {
            Some(id) => id.to_string(),
            None => format!("{user}-{}", Utc::now().timestamp_millis()),
        };
        let mut payload = json!({
            "resources": req.os.to_json(),
            "job": { "id": job_id, "tags": { "user": user } },
        });
        if let Some(priority) = req.priority {
            payload["priority"] = priority.into();
        }

        if req.resume.is_none() {
            let resp = conn
                .send(
                    conn.request(Method::Post, "request")
                        .token(req.token)
                        .json(&payload),
                )
                .await?;
            check_queue_status(&resp, &conn.url("request"))?;
            info!(job_id = %job_id, "abs: request queued");
            conn.log().info(&format!(
                "Requested {} as job {job_id}; resume with `--resume {job_id}` if interrupted",
                req.os.flatten()
            ));
        }

        Ok(Retrieved::Pending(
            ProvisioningRequest::new(job_id).with_payload(payload),
        ))
    }

    async fn probe(
        &self,
        conn: &Connection,
        request: &ProvisioningRequest,
        token: Option<&str>,
    ) -> Result<Probe> {
        let payload = request.payload.as_ref().ok_or_else(|| {
            Error::MissingParameter(format!(
                "abs job {} must be resumed with the resources it requested",
                request.request_id
            ))
        })?;

        let resp = conn
            .send(conn.request(Method::Post, "request").token(token).json(payload))
            .await?;
        check_queue_status(&resp, &conn.url("request"))?;

        if resp.status == 200
            && let Ok(Value::Array(hosts)) = resp.json::<Value>()
            && !hosts.is_empty()
        {
            return Ok(Probe::Fulfilled(translate(&request.request_id, &hosts)));
        }
        Ok(Probe::Pending)
    }

    fn poll_schedule(&self) -> PollSchedule {
        PollSchedule::QUEUE
    }

    async fn query(&self, conn: &Connection, job_id: &str) -> Result<Value> {
        self.active_requests(conn, None)
            .await?
            .into_iter()
            .find(|r| job_field(r, "id") == Some(job_id))
            .ok_or_else(|| Error::HostNotFound(job_id.to_string()))
    }

    /// Return jobs to ABS. Each name is a job id or one of a job's hosts; a
    /// job is only returned when it is named or all of its hosts are.
    async fn delete(
        &self,
        conn: &Connection,
        names: &[String],
        token: Option<&str>,
        user: Option<&str>,
    ) -> Result<DeleteOutcome> {
        let token = require_token(token, "return abs jobs")?;
        let requests = self.active_requests(conn, user).await?;
        let mut jobs = Vec::new();

        for record in &requests {
            let Some(id) = job_field(record, "id") else {
                continue;
            };
            let hosts = allocated_hostnames(record);
            let id_named = names.iter().any(|n| n == id);
            let named = hosts.iter().filter(|h| names.contains(h)).count();
            if !id_named && named == 0 {
                continue;
            }

            let state = record.get("state").and_then(Value::as_str).unwrap_or_default();
            if !RETURNABLE_STATES.contains(&state) {
                conn.log().info(&format!(
                    "Can't return job {id}: it is {}, only allocated or filled jobs can be returned",
                    if state.is_empty() { "in an unknown state" } else { state }
                ));
                continue;
            }

            if id_named || named == hosts.len() {
                jobs.push((id, hosts, record));
            } else {
                conn.log().info(&format!(
                    "Can't return job {id}: all of its hosts must be deleted together ({})",
                    hosts.join(", ")
                ));
            }
        }

        let mut returned = Vec::new();
        for (id, hosts, record) in jobs {
            let body = json!({
                "job_id": id,
                "hosts": record.get("allocated_resources").cloned().unwrap_or_else(|| json!([])),
            });
            let resp = conn
                .send(
                    conn.request(Method::Post, "return_vms")
                        .token(Some(token))
                        .json(&body),
                )
                .await?;
            if resp.status == 401 {
                return Err(auth_error(&resp));
            }
            if resp.is_success() {
                info!(job_id = id, "abs: job returned");
                returned.push(id.to_string());
                returned.extend(hosts);
            } else {
                warn!(job_id = id, status = resp.status, "abs: return_vms rejected");
            }
        }

        let mut outcome = DeleteOutcome::default();
        for name in names {
            outcome.push(name.clone(), returned.contains(name));
        }
        Ok(outcome)
    }

    async fn status(&self, conn: &Connection) -> Result<Value> {
        let resp = conn.send(conn.request(Method::Get, "status")).await?;
        Ok(json!({ "ok": resp.status == 200 }))
    }
}
