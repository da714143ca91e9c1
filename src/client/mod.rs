use anyhow::Context;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use thiserror::Error;
use tokio_rustls::TlsConnector;

mod connector;
mod tls;

pub use connector::{Connector, Dial};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    /// Skip certificate verification of the target.
    pub insecure: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(30),
            insecure: false,
        }
    }
}

/// Why a single attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("failed to build request: {0}")]
    Build(String),
}

/// Pooled HTTP/1.1 client. Cloning shares the pool.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client<Connector, Empty<Bytes>>,
}

impl HttpClient {
    pub fn new(dial: Dial, settings: ClientSettings) -> anyhow::Result<Self> {
        let tls = tls::client_config(settings.insecure).context("failed to build TLS config")?;
        let connector = Connector::new(dial, TlsConnector::from(tls), settings.connect_timeout);

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(settings.pool_idle_timeout)
            .pool_timer(TokioTimer::new())
            .build(connector);

        Ok(Self { inner })
    }

    pub fn direct(settings: ClientSettings) -> anyhow::Result<Self> {
        Self::new(Dial::Direct, settings)
    }

    /// Sends the request and drains the response body so the connection can
    /// go back to the pool. The body itself is discarded.
    pub async fn execute(&self, request: Request<Empty<Bytes>>) -> Result<StatusCode, RequestError> {
        let response = self.inner.request(request).await.map_err(|e| {
            if e.is_connect() {
                RequestError::Connect(describe(&e))
            } else {
                RequestError::Transport(describe(&e))
            }
        })?;

        let status = response.status();
        response
            .into_body()
            .collect()
            .await
            .map_err(|e| RequestError::Transport(describe(&e)))?;

        Ok(status)
    }
}

fn describe(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
