//! Test doubles: a scripted transport and a recording user log.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pool_http::{Request, Response, Transport};
use serde_json::Value;

use crate::config::EffectiveConfig;
use crate::log::UserLog;
use crate::{BackendKind, Service};

pub const TEST_URL: &str = "http://pooler.test/api/v1";

/// Transport that replays canned responses in order and records every request.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<Vec<Response>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new(responses: Vec<Response>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// `"METHOD path"` for each request, with the test base URL stripped.
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| {
                let path = r.url.strip_prefix(TEST_URL).unwrap_or(&r.url);
                format!("{} {}", r.method, path.trim_start_matches('/'))
            })
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, req: Request) -> pool_http::Result<Response> {
        self.requests.lock().unwrap().push(req.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            panic!("no more mock responses for {} {}", req.method, req.url);
        }
        Ok(responses.remove(0))
    }
}

/// Shorthand for a JSON response.
pub fn reply(status: u16, body: Value) -> Response {
    Response::new(status, body.to_string())
}

/// Log that keeps every message for assertions.
#[derive(Default)]
pub struct RecordingLog {
    infos: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingLog {
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl UserLog for RecordingLog {
    fn info(&self, msg: &str) {
        self.infos.lock().unwrap().push(msg.to_string());
    }

    fn error(&self, msg: &str) {
        self.errors.lock().unwrap().push(msg.to_string());
    }
}

/// Config for a service at [`TEST_URL`] owned by `alice` with token `tok`.
pub fn test_config(kind: BackendKind) -> EffectiveConfig {
    EffectiveConfig {
        service: Some("test".into()),
        url: Some(TEST_URL.into()),
        user: Some("alice".into()),
        token: Some("tok".into()),
        kind,
        vmpooler_fallback: None,
        priority: None,
        extra: Default::default(),
    }
}

/// A service of `kind` wired to a fresh mock transport and recording log.
pub fn test_service(
    kind: BackendKind,
    responses: Vec<Response>,
) -> (Service, Arc<MockTransport>, Arc<RecordingLog>) {
    service_with_config(test_config(kind), responses)
}

pub fn service_with_config(
    config: EffectiveConfig,
    responses: Vec<Response>,
) -> (Service, Arc<MockTransport>, Arc<RecordingLog>) {
    let transport = Arc::new(MockTransport::new(responses));
    let log = Arc::new(RecordingLog::default());
    let service = Service::new(config, transport.clone(), log.clone(), false)
        .expect("test config has a url");
    (service, transport, log)
}
