//! Operations over many hosts at once (`--all`).

use serde::Serialize;

use crate::types::ModifyPatch;
use crate::{Error, Result, Service};

/// Per-host results of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub succeeded: Vec<String>,
    /// `(host, reason)`
    pub failed: Vec<(String, String)>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Apply `patch` to every host. A host the pooler refuses to modify is
/// recorded and the rest are still attempted; any other error (missing
/// token, rejected credentials, transport failure) stops the run.
pub async fn modify_many(service: &Service, hosts: &[String], patch: &ModifyPatch) -> Result<BulkReport> {
    let mut report = BulkReport::default();

    for host in hosts {
        match service.modify(host, patch).await {
            Ok(_) => report.succeeded.push(host.clone()),
            Err(Error::Modify(reason)) => {
                tracing::warn!(host = %host, reason = %reason, "modify failed");
                report.failed.push((host.clone(), reason));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

pub async fn delete_many(service: &Service, hosts: &[String]) -> Result<BulkReport> {
    let outcome = service.delete(hosts).await?;
    let mut report = BulkReport::default();

    for (host, ok) in outcome.iter() {
        if ok {
            report.succeeded.push(host.to_string());
        } else {
            report
                .failed
                .push((host.to_string(), format!("could not delete {host}")));
        }
    }

    Ok(report)
}
