use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Operating systems to acquire and how many of each, in the order given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRequest(Vec<(String, u32)>);

impl OsRequest {
    /// Largest count accepted for a single operating system.
    pub const MAX_COUNT: u32 = 100;

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the count for `os`. A repeated name keeps its first position and
    /// takes the latest count.
    pub fn set(&mut self, os: impl Into<String>, count: u32) {
        let os = os.into();
        match self.0.iter_mut().find(|(name, _)| *name == os) {
            Some(entry) => entry.1 = count,
            None => self.0.push((os, count)),
        }
    }

    /// Parse arguments of the form `name` (one VM) or `name=count`, with
    /// `count` between 1 and [`OsRequest::MAX_COUNT`].
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = Self::new();
        for arg in args {
            let arg = arg.as_ref();
            let (os, count) = match arg.split_once('=') {
                None => (arg, 1),
                Some((os, count)) => {
                    let count = count
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|n| (1..=Self::MAX_COUNT).contains(n))
                        .ok_or_else(|| {
                            Error::MissingParameter(format!(
                                "'{arg}' must request between 1 and {} VMs",
                                Self::MAX_COUNT
                            ))
                        })?;
                    (os, count)
                }
            };
            let os = os.trim();
            if os.is_empty() {
                return Err(Error::MissingParameter(format!(
                    "'{arg}' does not name an operating system"
                )));
            }
            request.set(os, count);
        }
        Ok(request)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(os, n)| (os.as_str(), *n))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> u32 {
        self.0.iter().map(|(_, n)| n).sum()
    }

    /// Repeat each name by its count: `centos+centos+debian`.
    pub fn flatten(&self) -> String {
        self.0
            .iter()
            .flat_map(|(os, n)| std::iter::repeat_n(os.as_str(), *n as usize))
            .collect::<Vec<_>>()
            .join("+")
    }

    /// `{"centos": 2, "debian": 1}`
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(os, n)| (os.clone(), Value::from(*n)))
                .collect(),
        )
    }
}

/// Everything an adapter needs to issue one acquisition.
#[derive(Debug, Clone, Copy)]
pub struct RetrieveRequest<'a> {
    pub os: &'a OsRequest,
    pub token: Option<&'a str>,
    pub user: Option<&'a str>,
    pub priority: Option<i64>,
    pub ondemand: bool,
    /// Pick up an already issued request instead of creating a new one.
    pub resume: Option<&'a str>,
}

/// An accepted asynchronous acquisition awaiting fulfillment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningRequest {
    pub request_id: String,
    pub started_at: DateTime<Utc>,
    /// Request body replayed on every probe (ABS).
    pub payload: Option<Value>,
}

impl ProvisioningRequest {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            started_at: Utc::now(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Result of an acquisition call.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    /// Hosts were allocated synchronously; the raw response body.
    Allocated(Value),
    /// The pooler queued the request; poll it to completion.
    Pending(ProvisioningRequest),
}

/// Result of a single status probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    Pending,
    Fulfilled(Value),
}

/// Requested changes to one host. Absent fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyPatch {
    /// Hours.
    pub lifetime: Option<u32>,
    /// Additional disk in GB.
    pub disk: Option<u32>,
    pub tags: Option<Map<String, Value>>,
    pub reason: Option<String>,
}

impl ModifyPatch {
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.lifetime.is_some() {
            keys.push("lifetime");
        }
        if self.disk.is_some() {
            keys.push("disk");
        }
        if self.tags.is_some() {
            keys.push("tags");
        }
        if self.reason.is_some() {
            keys.push("reason");
        }
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// Per-name result of a delete, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome(Vec<(String, bool)>);

impl DeleteOutcome {
    pub fn push(&mut self, name: impl Into<String>, ok: bool) {
        self.0.push((name.into(), ok));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(name, ok)| (name.as_str(), *ok))
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.iter().filter(|(_, ok)| *ok).map(|(n, _)| n).collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.iter().filter(|(_, ok)| !*ok).map(|(n, _)| n).collect()
    }
}
