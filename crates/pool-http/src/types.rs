use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;

pub const AUTH_TOKEN_HEADER: &str = "X-AUTH-TOKEN";

// ── Request ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A fully resolved request: absolute URL, headers in insertion order and an
/// optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach `X-AUTH-TOKEN` when a token is known. Anonymous requests are
    /// left untouched.
    pub fn token(self, token: Option<&str>) -> Self {
        match token {
            Some(t) => self.header(AUTH_TOKEN_HEADER, t),
            None => self,
        }
    }

    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{user}:{password}"));
        self.header("Authorization", format!("Basic {encoded}"))
    }

    pub fn json(mut self, body: &serde_json::Value) -> Self {
        self.body = Some(body.to_string());
        self.header("Content-Type", "application/json")
    }

    /// Look up a header by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ── Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_header_only_when_present() {
        let req = Request::new(Method::Get, "http://pooler/vm").token(None);
        assert!(req.headers.is_empty());

        let req = Request::new(Method::Get, "http://pooler/vm").token(Some("abc"));
        assert_eq!(req.header_value("x-auth-token"), Some("abc"));
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        let req = Request::new(Method::Post, "http://pooler/token").basic_auth("alice", "hunter2");
        assert_eq!(req.header_value("Authorization"), Some("Basic YWxpY2U6aHVudGVyMg=="));
    }

    #[test]
    fn json_body_sets_content_type() {
        let req = Request::new(Method::Put, "http://pooler/vm/h1")
            .json(&serde_json::json!({ "lifetime": 12 }));
        assert_eq!(req.body.as_deref(), Some(r#"{"lifetime":12}"#));
        assert_eq!(req.header_value("content-type"), Some("application/json"));
    }

    #[test]
    fn response_decodes_json() {
        let resp = Response::new(200, r#"{"ok":true}"#);
        assert!(resp.is_success());
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["ok"], true);

        assert!(!Response::new(404, "").is_success());
    }
}
