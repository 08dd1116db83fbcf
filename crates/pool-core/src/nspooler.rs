use async_trait::async_trait;
use pool_http::Method;
use regex::Regex;
use serde_json::{Value, json};
use tracing::info;

use crate::connection::{
    acquisition_error, auth_error, expect_json, is_ok, parse_body, require_token, string_list,
};
use crate::types::{DeleteOutcome, ModifyPatch, RetrieveRequest, Retrieved};
use crate::{Backend, BackendKind, Connection, Error, Result, auth};

/// nspooler: reservations of non-standard hosts under `host/`.
///
/// Hosts come back already qualified (`fqdn`), carry a reservation reason
/// instead of tags, and there is no disk, snapshot or on-demand support.
pub struct NspoolerBackend;

#[async_trait]
impl Backend for NspoolerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    async fn list(&self, conn: &Connection, filter: Option<&Regex>) -> Result<Vec<String>> {
        let resp = conn.send(conn.request(Method::Get, "status")).await?;
        let body = expect_json(&resp, "status")?;

        let pools = body
            .as_object()
            .ok_or_else(|| Error::InvalidResponse(format!("expected a pool status map: {}", resp.body)))?;

        Ok(pools
            .keys()
            .filter(|k| k.as_str() != "ok")
            .filter(|k| filter.is_none_or(|re| re.is_match(k)))
            .cloned()
            .collect())
    }

    async fn list_active(
        &self,
        conn: &Connection,
        token: Option<&str>,
        _user: Option<&str>,
    ) -> Result<Vec<String>> {
        let token = require_token(token, "list active hosts")?;
        let status = auth::token_status(conn, Some(token)).await?;
        Ok(string_list(&status, &["reserved_hosts"]))
    }

    async fn retrieve(&self, conn: &Connection, req: &RetrieveRequest<'_>) -> Result<Retrieved> {
        if req.ondemand || req.resume.is_some() {
            return Err(self.unsupported("ondemand retrieve"));
        }

        let os = req.os.flatten();
        if os.is_empty() {
            return Err(Error::MissingParameter(
                "no operating systems provided to obtain".into(),
            ));
        }

        let request = conn
            .request(Method::Post, &format!("host/{os}"))
            .token(req.token);
        let url = request.url.clone();
        let resp = conn.send(request).await?;
        let body = parse_body(&resp);

        if !is_ok(&body) {
            return Err(acquisition_error(&resp, url));
        }
        Ok(Retrieved::Allocated(body))
    }

    async fn query(&self, conn: &Connection, hostname: &str) -> Result<Value> {
        let resp = conn
            .send(conn.request(Method::Get, &format!("host/{hostname}")))
            .await?;
        if resp.status == 404 {
            return Err(Error::HostNotFound(hostname.to_string()));
        }
        expect_json(&resp, "query host")
    }

    async fn modify(
        &self,
        conn: &Connection,
        hostname: &str,
        token: Option<&str>,
        patch: &ModifyPatch,
    ) -> Result<Value> {
        let token = require_token(token, "modify a host")?;
        if let Some(key) = patch.keys().into_iter().find(|k| *k != "reason") {
            return Err(Error::Modify(format!(
                "the nspooler service type does not support modification of {key}"
            )));
        }
        let Some(reason) = &patch.reason else {
            return Ok(json!({ "ok": true }));
        };

        let resp = conn
            .send(
                conn.request(Method::Put, &format!("host/{hostname}"))
                    .token(Some(token))
                    .json(&json!({ "reserved_for_reason": reason })),
            )
            .await?;
        let body = parse_body(&resp);

        if resp.status == 401 {
            return Err(auth_error(&resp));
        }
        if !is_ok(&body) {
            return Err(Error::Modify(format!(
                "HTTP {}: failed to modify {hostname}: {}",
                resp.status, resp.body
            )));
        }

        info!(hostname, "nspooler: reservation reason updated");
        Ok(body)
    }

    async fn delete(
        &self,
        conn: &Connection,
        names: &[String],
        token: Option<&str>,
        _user: Option<&str>,
    ) -> Result<DeleteOutcome> {
        let token = require_token(token, "delete hosts")?;
        let mut outcome = DeleteOutcome::default();

        for hostname in names {
            let resp = conn
                .send(
                    conn.request(Method::Delete, &format!("host/{hostname}"))
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

    async fn status(&self, conn: &Connection) -> Result<Value> {
        let resp = conn.send(conn.request(Method::Get, "status")).await?;
        expect_json(&resp, "status")
    }

    async fn summary(&self, conn: &Connection) -> Result<Value> {
        let resp = conn.send(conn.request(Method::Get, "summary")).await?;
        expect_json(&resp, "summary")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::testing::{reply, test_service};
    use crate::{BackendKind, Error, ModifyPatch, OsRequest};

    #[tokio::test]
    async fn retrieve_uses_host_endpoint() {
        let (service, transport, _) = test_service(
            BackendKind::Legacy,
            vec![reply(200, json!({ "ok": true, "solaris-11-sparc": { "hostname": "sol11-4.example.net" } }))],
        );
        let os = OsRequest::from_args(["solaris-11-sparc=2"]).unwrap();
        service.retrieve(&os, true, false).await.unwrap();
        assert_eq!(
            transport.calls(),
            vec!["POST host/solaris-11-sparc+solaris-11-sparc"]
        );
    }

    #[tokio::test]
    async fn ondemand_is_unsupported() {
        let (service, transport, _) = test_service(BackendKind::Legacy, vec![]);
        let os = OsRequest::from_args(["aix"]).unwrap();
        let err = service.retrieve(&os, true, true).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { kind: BackendKind::Legacy, .. }), "{err}");
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn modify_sends_reservation_reason() {
        let (service, transport, _) =
            test_service(BackendKind::Legacy, vec![reply(200, json!({ "ok": true }))]);
        let patch = ModifyPatch {
            reason: Some("release testing".into()),
            ..Default::default()
        };
        service.modify("sol11-4", &patch).await.unwrap();

        assert_eq!(transport.calls(), vec!["PUT host/sol11-4"]);
        assert_eq!(
            transport.requests()[0].body.as_deref(),
            Some(r#"{"reserved_for_reason":"release testing"}"#)
        );
    }

    #[tokio::test]
    async fn modify_rejects_lifetime_and_disk() {
        let (service, _, _) = test_service(BackendKind::Legacy, vec![]);
        for patch in [
            ModifyPatch {
                lifetime: Some(4),
                ..Default::default()
            },
            ModifyPatch {
                disk: Some(10),
                ..Default::default()
            },
        ] {
            let err = service.modify("sol11-4", &patch).await.unwrap_err();
            assert!(matches!(err, Error::Modify(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn snapshot_and_revert_are_unsupported() {
        let (service, _, _) = test_service(BackendKind::Legacy, vec![]);
        assert!(matches!(
            service.snapshot("h").await.unwrap_err(),
            Error::Unsupported { operation: "snapshot", .. }
        ));
        assert!(matches!(
            service.revert("h", Some("s")).await.unwrap_err(),
            Error::Unsupported { operation: "revert", .. }
        ));
    }

    #[tokio::test]
    async fn list_skips_ok_key() {
        let (service, _, _) = test_service(
            BackendKind::Legacy,
            vec![reply(
                200,
                json!({ "ok": true, "solaris-11-sparc": { "total_hosts": 2 }, "aix-7.2-power": { "total_hosts": 1 } }),
            )],
        );
        assert_eq!(
            service.list(None).await.unwrap(),
            vec!["solaris-11-sparc", "aix-7.2-power"]
        );
    }

    #[tokio::test]
    async fn list_active_reads_reserved_hosts() {
        let (service, _, _) = test_service(
            BackendKind::Legacy,
            vec![reply(200, json!({ "ok": true, "reserved_hosts": ["sol11-4.example.net"] }))],
        );
        assert_eq!(service.list_active().await.unwrap(), vec!["sol11-4.example.net"]);
    }
}
