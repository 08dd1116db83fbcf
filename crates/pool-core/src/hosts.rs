//! Rendering pooler responses for people.
//!
//! The three backends describe hosts differently: vmpooler returns bare
//! names plus a shared `domain`, nspooler returns fully qualified names and
//! ABS nests hosts under a job. Everything here turns those shapes into one
//! `- <fqdn> (...)` line per host.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::{BackendKind, Error, Result, Service};

/// Hostnames grouped by template (or platform), in response order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostGroups(Vec<(String, Vec<String>)>);

impl HostGroups {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flat_map(|(_, hosts)| hosts.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for HostGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (group, hosts) in &self.0 {
            map.serialize_entry(group, hosts)?;
        }
        map.end()
    }
}

/// Append `.domain` to bare names. Dotted names are already qualified.
fn qualify(hostname: &str, domain: Option<&str>) -> String {
    match domain {
        Some(domain) if !hostname.contains('.') && !domain.is_empty() => {
            format!("{hostname}.{domain}")
        }
        _ => hostname.to_string(),
    }
}

/// Strings without quotes, numbers and booleans as written, null as empty.
fn scalar(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Normalize an acquisition response into groups of fully qualified names.
///
/// `ok`, `domain` and anything that is not a `{"hostname": ..}` object (the
/// ABS `job_id`, for one) are dropped.
pub fn standardize_hostnames(raw: &Value) -> Result<HostGroups> {
    let body = raw
        .as_object()
        .filter(|body| body.get("ok").and_then(Value::as_bool) == Some(true))
        .ok_or_else(|| Error::InvalidResponse(format!("expected a successful host response: {raw}")))?;
    let domain = body.get("domain").and_then(Value::as_str);

    let mut groups = Vec::new();
    for (group, value) in body {
        if group == "ok" || group == "domain" {
            continue;
        }
        let Some(hostname) = value.as_object().and_then(|v| v.get("hostname")) else {
            continue;
        };
        let hosts = match hostname {
            Value::String(name) => vec![qualify(name, domain)],
            Value::Array(names) => names
                .iter()
                .filter_map(Value::as_str)
                .map(|name| qualify(name, domain))
                .collect(),
            _ => continue,
        };
        groups.push((group.clone(), hosts));
    }

    Ok(HostGroups(groups))
}

/// `- <fqdn> (<group>)`, one line per host.
pub fn format_host_output(groups: &HostGroups) -> String {
    groups
        .iter()
        .flat_map(|(group, hosts)| hosts.iter().map(move |host| format!("- {host} ({group})")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The detail record for `name` inside a query response. vmpooler and
/// nspooler key it by hostname; ABS returns the job record itself.
pub fn host_record<'a>(kind: BackendKind, name: &str, raw: &'a Value) -> Option<&'a Value> {
    match kind {
        BackendKind::Broker => Some(raw),
        BackendKind::Primary | BackendKind::Legacy => raw.get(name),
    }
}

fn primary_line(hostname: &str, record: &Value, domain: Option<&str>) -> String {
    let domain = record.get("domain").and_then(Value::as_str).or(domain);
    let fqdn = qualify(hostname, domain);

    if record.get("state").and_then(Value::as_str) == Some("destroyed") {
        return format!("- DESTROYED {fqdn}");
    }

    let mut line = format!(
        "- {fqdn} ({}, {}, {}/{} hours",
        scalar(record.get("state")),
        scalar(record.get("template")),
        scalar(record.get("running")),
        scalar(record.get("lifetime")),
    );
    if let Some(tags) = record.get("tags").and_then(Value::as_object) {
        for (key, value) in tags {
            line.push_str(&format!(", {key}: {}", scalar(Some(value))));
        }
    }
    line.push(')');
    line
}

fn legacy_line(record: &Value) -> String {
    let mut line = format!(
        "- {} ({}, {}h remaining",
        scalar(record.get("fqdn")),
        scalar(record.get("os_triple")),
        scalar(record.get("hours_left_on_reservation")),
    );
    let reason = scalar(record.get("reserved_for_reason"));
    if !reason.is_empty() {
        line.push_str(&format!(", reason: {reason}"));
    }
    line.push(')');
    line
}

/// Rendered lines and where they go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostLines {
    pub lines: Vec<String>,
    pub to_stderr: bool,
}

impl HostLines {
    pub fn emit(&self) {
        for line in &self.lines {
            if self.to_stderr {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }
    }
}

/// Renders host detail lines for one service. An ABS service with a
/// vmpooler fallback enriches its vmpooler-provisioned resources with the
/// fallback's view of each VM.
pub struct HostPrinter<'a> {
    service: &'a Service,
    fallback: Option<&'a Service>,
    to_stderr: bool,
}

impl<'a> HostPrinter<'a> {
    pub fn new(service: &'a Service, fallback: Option<&'a Service>) -> Self {
        Self {
            service,
            fallback,
            to_stderr: false,
        }
    }

    pub fn to_stderr(mut self, to_stderr: bool) -> Self {
        self.to_stderr = to_stderr;
        self
    }

    pub async fn host_data(&self, name: &str) -> Result<Value> {
        self.service.query(name).await
    }

    /// Lines for one host given its raw query response.
    pub async fn print_fqdn_for_host(&self, name: &str, raw: &Value) -> Result<HostLines> {
        let kind = self.service.kind();
        let record = host_record(kind, name, raw).ok_or_else(|| {
            Error::InvalidResponse(format!("no record for {name} in response: {raw}"))
        })?;

        let lines = match kind {
            BackendKind::Primary => {
                vec![primary_line(name, record, raw.get("domain").and_then(Value::as_str))]
            }
            BackendKind::Legacy => vec![legacy_line(record)],
            BackendKind::Broker => self.broker_lines(record).await,
        };

        Ok(HostLines {
            lines,
            to_stderr: self.to_stderr,
        })
    }

    async fn broker_lines(&self, job: &Value) -> Vec<String> {
        let job_id = job
            .get("request")
            .and_then(|r| r.get("job"))
            .and_then(|j| j.get("id"));
        let mut lines = vec![format!(
            "- [JobID:{}] <{}>",
            scalar(job_id),
            scalar(job.get("state"))
        )];

        let resources = job
            .get("allocated_resources")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for resource in resources {
            let fqdn = scalar(resource.get("hostname"));
            let plain = format!("  - {fqdn} ({})", scalar(resource.get("type")));

            let engine = resource.get("engine").and_then(Value::as_str);
            let Some(fallback) = self
                .fallback
                .filter(|_| matches!(engine, Some("vmpooler" | "ondemand")))
            else {
                lines.push(plain);
                continue;
            };

            let bare = fqdn.split('.').next().unwrap_or(&fqdn);
            match fallback.query(bare).await {
                Ok(detail) => match detail.get(bare) {
                    Some(record) => {
                        let domain = detail.get("domain").and_then(Value::as_str);
                        let mut line = primary_line(bare, record, domain);
                        if line.starts_with("- DESTROYED") {
                            line = format!("- DESTROYED {fqdn}");
                        }
                        lines.push(format!("  {line}"));
                    }
                    None => lines.push(plain),
                },
                Err(e) => {
                    self.service.log().error(&format!(
                        "Could not get details for {fqdn} from {}: {e}",
                        fallback.host()
                    ));
                    lines.push(plain);
                }
            }
        }

        lines
    }

    /// Query and render each host. A host that cannot be queried is
    /// reported through the user log and skipped.
    pub async fn pretty_print_hosts(&self, hosts: &[String]) -> HostLines {
        let mut out = HostLines {
            lines: Vec::new(),
            to_stderr: self.to_stderr,
        };

        for host in hosts {
            let rendered = match self.host_data(host).await {
                Ok(raw) => self.print_fqdn_for_host(host, &raw).await,
                Err(e) => Err(e),
            };
            match rendered {
                Ok(lines) => out.lines.extend(lines.lines),
                Err(e) => {
                    tracing::debug!(host = %host, error = %e, "could not render host");
                    self.service.log().error(&format!(
                        "Something went wrong while trying to gather information on {host}:"
                    ));
                    self.service.log().error(&e.to_string());
                }
            }
        }

        out
    }
}

fn bar(segments: &[(char, i64)]) -> String {
    segments
        .iter()
        .map(|(c, n)| c.to_string().repeat((*n).max(0) as usize))
        .collect()
}

fn count(pool: &Value, key: &str) -> i64 {
    pool.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Pool capacity lines: `o` ready, `*` pending, `.` missing. Only pools
/// below capacity are shown unless `verbose`.
pub fn render_status(kind: BackendKind, status: &Value, verbose: bool) -> Vec<String> {
    let pools: Vec<(&String, i64, i64, i64)> = match kind {
        BackendKind::Broker => {
            let ok = status.get("ok").and_then(Value::as_bool) == Some(true);
            return vec![if ok { "ABS is OK" } else { "ABS is not OK" }.to_string()];
        }
        BackendKind::Primary => status
            .get("pools")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .map(|(name, pool)| {
                (name, count(pool, "max"), count(pool, "ready"), count(pool, "pending"))
            })
            .collect(),
        BackendKind::Legacy => status
            .as_object()
            .into_iter()
            .flatten()
            .filter(|(name, pool)| name.as_str() != "ok" && pool.is_object())
            .map(|(name, pool)| {
                (
                    name,
                    count(pool, "total_hosts"),
                    count(pool, "available_hosts"),
                    count(pool, "pending"),
                )
            })
            .collect(),
    };

    let shown: Vec<_> = pools
        .into_iter()
        .filter(|(_, max, ready, _)| verbose || ready < max)
        .collect();
    let width = shown.iter().map(|(name, ..)| name.len()).max().unwrap_or(0);

    let mut lines: Vec<String> = shown
        .iter()
        .map(|(name, max, ready, pending)| {
            let missing = max - ready - pending;
            format!(
                "{name:<width$} {}",
                bar(&[('o', *ready), ('*', *pending), ('.', missing)])
            )
        })
        .collect();

    if kind == BackendKind::Primary
        && let Some(message) = status
            .get("status")
            .and_then(|s| s.get("message"))
            .and_then(Value::as_str)
    {
        lines.push(message.to_string());
    }
    lines
}
