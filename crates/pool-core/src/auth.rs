//! Token endpoints, shared by every backend.

use pool_http::Method;
use serde_json::Value;

use crate::connection::{auth_error, is_ok, parse_body, require_token};
use crate::{Connection, Error, Result};

/// Request a new token with HTTP basic auth.
pub async fn get_token(conn: &Connection, user: &str, password: &str) -> Result<String> {
    let resp = conn
        .send(conn.request(Method::Post, "token").basic_auth(user, password))
        .await?;
    let body = parse_body(&resp);

    if resp.status == 401 {
        return Err(auth_error(&resp));
    }
    if !is_ok(&body) {
        return Err(Error::Token(format!(
            "HTTP {}: there was a problem requesting a token: {}",
            resp.status, resp.body
        )));
    }

    body.get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidResponse(format!("token response without a token: {}", resp.body)))
}

pub async fn delete_token(
    conn: &Connection,
    user: &str,
    password: &str,
    token: Option<&str>,
) -> Result<Value> {
    let token = require_token(token, "delete a token")?;
    let resp = conn
        .send(
            conn.request(Method::Delete, &format!("token/{token}"))
                .basic_auth(user, password),
        )
        .await?;
    let body = parse_body(&resp);

    if resp.status == 401 {
        return Err(auth_error(&resp));
    }
    if !is_ok(&body) {
        return Err(Error::Token(format!(
            "HTTP {}: there was a problem deleting the token: {}",
            resp.status, resp.body
        )));
    }
    Ok(body)
}

pub async fn token_status(conn: &Connection, token: Option<&str>) -> Result<Value> {
    let token = require_token(token, "check a token's status")?;
    let resp = conn
        .send(conn.request(Method::Get, &format!("token/{token}")))
        .await?;
    let body = parse_body(&resp);

    if resp.status == 401 {
        return Err(auth_error(&resp));
    }
    if !is_ok(&body) {
        return Err(Error::Token(format!(
            "HTTP {}: there was a problem getting the status of the token: {}",
            resp.status, resp.body
        )));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::BackendKind;
    use crate::testing::{reply, test_service};

    #[tokio::test]
    async fn get_token_uses_basic_auth() {
        let (service, transport, _) = test_service(
            BackendKind::Primary,
            vec![reply(200, json!({ "ok": true, "token": "fresh" }))],
        );

        let token = service.get_token("hunter2").await.unwrap();
        assert_eq!(token, "fresh");

        let requests = transport.requests();
        assert_eq!(transport.calls(), vec!["POST token"]);
        assert!(
            requests[0]
                .header_value("authorization")
                .is_some_and(|v| v.starts_with("Basic "))
        );
    }

    #[tokio::test]
    async fn get_token_rejected_credentials_are_an_auth_error() {
        let (service, _, _) = test_service(
            BackendKind::Legacy,
            vec![reply(401, json!({ "ok": false }))],
        );
        let err = service.get_token("wrong").await.unwrap_err();
        assert!(matches!(err, crate::Error::Auth(_)), "{err}");
    }

    #[tokio::test]
    async fn token_status_failure_is_a_token_error() {
        let (service, _, _) = test_service(
            BackendKind::Primary,
            vec![reply(404, json!({ "ok": false }))],
        );
        let err = service.token_status(None).await.unwrap_err();
        assert!(matches!(err, crate::Error::Token(_)), "{err}");
    }

    #[tokio::test]
    async fn delete_token_requires_a_token() {
        let mut config = crate::testing::test_config(BackendKind::Primary);
        config.token = None;
        let (service, transport, _) = crate::testing::service_with_config(config, vec![]);

        let err = service.delete_token("pw", None).await.unwrap_err();
        assert!(matches!(err, crate::Error::Token(_)), "{err}");
        assert!(transport.requests().is_empty());
    }
}
