//! HTTP transport for the pooler backends.
//!
//! Backends never hold a `reqwest::Client` themselves. They build a
//! [`Request`] and hand it to a [`Transport`], so the same adapter code runs
//! against the real network or a scripted transport in tests.
//!
//! The transport reports the status code verbatim: no retries, no redirect
//! following, no error mapping. Interpreting a 401 or a 404 is the caller's job.

mod types;

pub use types::*;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pooler request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Anything that can carry a [`Request`] to a pooler and bring back the
/// status and body.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn request(&self, req: Request) -> Result<Response>;
}

/// `reqwest`-backed transport used by the CLI.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("poolctl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, req: Request) -> Result<Response> {
        tracing::debug!(method = %req.method, url = %req.url, "sending request");

        let mut builder = self.http.request(req.method.into(), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        tracing::debug!(status, bytes = body.len(), "received response");

        Ok(Response { status, body })
    }
}
