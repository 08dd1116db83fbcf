use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::log::UserLog;
use crate::types::{Probe, ProvisioningRequest};
use crate::Result;

/// How often to probe a pending request and when to give up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    /// vmpooler on-demand requests.
    pub const ONDEMAND: Self = Self {
        interval: Duration::from_secs(5),
        timeout: Duration::from_secs(300),
    };

    /// ABS jobs, which can sit in the queue for a long time.
    pub const QUEUE: Self = Self {
        interval: Duration::from_secs(10),
        timeout: Duration::from_secs(3600),
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Fulfilled(Value),
    TimedOut,
}

/// Drives one provisioning request to completion by probing on a fixed
/// interval. A probe error ends the wait immediately.
pub struct Poller<'a> {
    schedule: PollSchedule,
    log: &'a dyn UserLog,
}

impl<'a> Poller<'a> {
    pub fn new(schedule: PollSchedule, log: &'a dyn UserLog) -> Self {
        Self { schedule, log }
    }

    pub async fn wait<F, Fut>(&self, request: &ProvisioningRequest, mut probe: F) -> Result<PollOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Probe::Fulfilled(body) = probe().await? {
                tracing::info!(request_id = %request.request_id, attempts, "request fulfilled");
                return Ok(PollOutcome::Fulfilled(body));
            }

            if started.elapsed() > self.schedule.timeout {
                tracing::warn!(
                    request_id = %request.request_id,
                    attempts,
                    timeout_secs = self.schedule.timeout.as_secs(),
                    "gave up waiting for request"
                );
                return Ok(PollOutcome::TimedOut);
            }

            self.log.info(&format!(
                "waiting for request {} to be fulfilled",
                request.request_id
            ));
            tokio::time::sleep(self.schedule.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::testing::{RecordingLog, reply, test_service};
    use crate::{BackendKind, Error, OsRequest, Retrieved};

    async fn pending_request(
        responses: Vec<pool_http::Response>,
    ) -> (crate::Service, ProvisioningRequest, Arc<RecordingLog>) {
        let mut all = vec![reply(201, json!({ "ok": true, "request_id": "req-7" }))];
        all.extend(responses);
        let (service, _, log) = test_service(BackendKind::Primary, all);
        let os = OsRequest::from_args(["centos"]).unwrap();
        let Retrieved::Pending(request) = service.retrieve(&os, true, true).await.unwrap() else {
            panic!("ondemand retrieve is pending");
        };
        (service, request, log)
    }

    #[tokio::test(start_paused = true)]
    async fn fulfilled_after_two_pending_probes() {
        let body = json!({ "ok": true, "centos": { "hostname": "h1" } });
        let (service, request, log) = pending_request(vec![
            reply(202, json!({ "ok": false })),
            reply(202, json!({ "ok": false })),
            reply(200, body.clone()),
        ])
        .await;

        let outcome = service.wait_for_request(&request, true).await.unwrap();

        assert_eq!(outcome, PollOutcome::Fulfilled(body));
        assert_eq!(
            log.infos()
                .iter()
                .filter(|m| *m == "waiting for request req-7 to be fulfilled")
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_fulfilled() {
        let schedule = PollSchedule {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(12),
        };
        let log = RecordingLog::default();
        let request = ProvisioningRequest::new("req-1");
        let mut probes = 0;

        let outcome = Poller::new(schedule, &log)
            .wait(&request, || {
                probes += 1;
                async { Ok::<_, Error>(Probe::Pending) }
            })
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::TimedOut);
        // t = 0, 5, 10 and 15; the last one is past the timeout.
        assert_eq!(probes, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn all_pending_ondemand_times_out_after_five_minutes() {
        // 61 probes at 5s intervals cover t = 0..=300, the 62nd is past it.
        let pending = (0..62).map(|_| reply(202, json!({ "ok": false }))).collect();
        let (service, request, _) = pending_request(pending).await;

        let outcome = service.wait_for_request(&request, true).await.unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_request_is_fatal() {
        let (service, request, log) = pending_request(vec![
            reply(202, json!({ "ok": false })),
            reply(404, json!({ "ok": false })),
        ])
        .await;

        let err = service.wait_for_request(&request, true).await.unwrap_err();
        assert!(
            matches!(&err, Error::RequestNotFound { request_id, .. } if request_id == "req-7"),
            "{err}"
        );
        assert_eq!(log.infos().len(), 1);
    }
}
