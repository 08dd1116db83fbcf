use std::sync::Arc;

use pool_http::{Method, Request, Response, Transport};
use serde_json::Value;

use crate::log::UserLog;
use crate::{Error, Result};

/// One resolved pooler endpoint: base URL, transport and the diagnostic
/// flag, shared by every call a backend makes for a service.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    base_url: String,
    verbose: bool,
    log: Arc<dyn UserLog>,
}

impl Connection {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: &str,
        verbose: bool,
        log: Arc<dyn UserLog>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            verbose,
            log,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn log(&self) -> &dyn UserLog {
        self.log.as_ref()
    }

    pub fn log_handle(&self) -> Arc<dyn UserLog> {
        Arc::clone(&self.log)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn request(&self, method: Method, path: &str) -> Request {
        Request::new(method, self.url(path))
    }

    pub async fn send(&self, req: Request) -> Result<Response> {
        if self.verbose {
            tracing::info!(method = %req.method, url = %req.url, body = ?req.body, "pooler request");
        }
        let resp = self.transport.request(req).await?;
        if self.verbose {
            tracing::info!(status = resp.status, body = %resp.body, "pooler response");
        }
        Ok(resp)
    }
}

// ── Response helpers shared by the backends ─────────────────────────

/// Decode a body that may not be JSON (error pages, plain `OK`). Non-JSON
/// text becomes a JSON string; an empty body becomes `null`.
pub(crate) fn parse_body(resp: &Response) -> Value {
    if resp.body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&resp.body).unwrap_or_else(|_| Value::String(resp.body.clone()))
}

/// The pooler convention: success is signalled by `"ok": true` in the body.
pub(crate) fn is_ok(body: &Value) -> bool {
    body.get("ok").and_then(Value::as_bool).unwrap_or(false)
}

/// Require a 2xx status and a JSON body.
pub(crate) fn expect_json(resp: &Response, endpoint: &'static str) -> Result<Value> {
    if resp.status == 401 {
        return Err(auth_error(resp));
    }
    if !resp.is_success() {
        return Err(Error::Api {
            endpoint,
            status: resp.status,
            body: resp.body.clone(),
        });
    }
    Ok(resp.json()?)
}

pub(crate) fn auth_error(resp: &Response) -> Error {
    Error::Auth(format!(
        "HTTP {}: the token provided could not authenticate to the pooler: {}",
        resp.status, resp.body
    ))
}

/// Map a rejected acquisition onto its error kind.
pub(crate) fn acquisition_error(resp: &Response, url: String) -> Error {
    match resp.status {
        401 => auth_error(resp),
        403 => Error::PoolMaximum {
            url,
            body: resp.body.clone(),
        },
        status => Error::Acquisition {
            status,
            url,
            body: resp.body.clone(),
        },
    }
}

/// Fail with a token error before any request is made.
pub(crate) fn require_token<'a>(token: Option<&'a str>, action: &str) -> Result<&'a str> {
    token.ok_or_else(|| Error::Token(format!("a token is required to {action}")))
}

/// Follow `path` through nested objects and collect the string array found
/// there. Anything missing or of another shape yields an empty list.
pub(crate) fn string_list(value: &Value, path: &[&str]) -> Vec<String> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_joins_without_double_slash() {
        let conn = Connection::new(
            Arc::new(crate::testing::MockTransport::new(vec![])),
            "https://pooler.example.com/api/v1/",
            false,
            Arc::new(crate::log::ConsoleLog::silent()),
        );
        assert_eq!(conn.url("/vm/abc"), "https://pooler.example.com/api/v1/vm/abc");
        assert_eq!(conn.url("status"), "https://pooler.example.com/api/v1/status");
    }

    #[test]
    fn parse_body_tolerates_plain_text() {
        assert_eq!(parse_body(&Response::new(200, "OK")), json!("OK"));
        assert_eq!(parse_body(&Response::new(204, "")), Value::Null);
        assert_eq!(parse_body(&Response::new(200, r#"{"ok":true}"#)), json!({ "ok": true }));
    }

    #[test]
    fn acquisition_errors_are_distinct() {
        let url = "http://p/vm/centos".to_string();
        assert!(matches!(
            acquisition_error(&Response::new(401, "{}"), url.clone()),
            Error::Auth(_)
        ));
        assert!(matches!(
            acquisition_error(&Response::new(403, "{}"), url.clone()),
            Error::PoolMaximum { .. }
        ));
        assert!(matches!(
            acquisition_error(&Response::new(503, "{}"), url),
            Error::Acquisition { status: 503, .. }
        ));
    }

    #[test]
    fn string_list_missing_path_is_empty() {
        let value = json!({ "tok": { "vms": { "running": ["a", "b"] } } });
        assert_eq!(string_list(&value, &["tok", "vms", "running"]), vec!["a", "b"]);
        assert!(string_list(&value, &["tok", "vms", "stopped"]).is_empty());
        assert!(string_list(&json!({}), &["tok"]).is_empty());
    }
}
