use crate::client::{HttpClient, RequestError};
use crate::config::{Config, ConfigError, read_entries};
use bytes::Bytes;
use http::header::{HeaderValue, USER_AGENT};
use http::{Method, Request, Uri};
use http_body_util::Empty;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub enum UserAgents {
    /// Same header on every request; `None` sends no user-agent.
    Fixed(Option<HeaderValue>),
    /// Sampled uniformly per request.
    Pool(Vec<HeaderValue>),
}

/// Read-only description of the outbound request, shared by all senders.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    uri: Uri,
    method: Method,
    user_agents: UserAgents,
}

impl RequestTemplate {
    pub fn new(url: &str, method: &str, user_agents: UserAgents) -> Result<Self, ConfigError> {
        let uri = url.parse::<Uri>().map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(method.to_string()))?;

        Ok(Self {
            uri,
            method,
            user_agents,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let pool = match &config.user_agents_list {
            Some(path) => {
                let entries = read_entries(path)?;
                info!(count = entries.len(), "Parsed user agents list");
                entries
            }
            None => {
                info!("No user agents list provided, using default user agent");
                Vec::new()
            }
        };

        let user_agents = if pool.is_empty() {
            let fixed = if config.user_agent.is_empty() {
                None
            } else {
                Some(header_value(&config.user_agent)?)
            };
            UserAgents::Fixed(fixed)
        } else {
            UserAgents::Pool(
                pool.iter()
                    .map(|agent| header_value(agent))
                    .collect::<Result<_, _>>()?,
            )
        };

        Self::new(&config.url, &config.method, user_agents)
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Builds an independent request instance.
    pub fn build(&self) -> Result<Request<Empty<Bytes>>, http::Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());
        if let Some(agent) = self.user_agent() {
            builder = builder.header(USER_AGENT, agent.clone());
        }
        builder.body(Empty::new())
    }

    fn user_agent(&self) -> Option<&HeaderValue> {
        match &self.user_agents {
            UserAgents::Fixed(agent) => agent.as_ref(),
            UserAgents::Pool(pool) => pool.choose(&mut rand::rng()),
        }
    }
}

fn header_value(agent: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(agent).map_err(|_| ConfigError::InvalidUserAgent(agent.to_string()))
}

/// Result of one attempt. `status` is 0 when no response was received.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: u16,
    pub duration: Duration,
    pub error: Option<RequestError>,
}

/// Everything a single attempt needs. Cloned once per admitted request.
#[derive(Clone)]
pub struct RequestSender {
    client: HttpClient,
    template: Arc<RequestTemplate>,
    timeout: Duration,
    results: UnboundedSender<Outcome>,
    token: CancellationToken,
}

impl RequestSender {
    pub fn new(
        client: HttpClient,
        template: Arc<RequestTemplate>,
        timeout: Duration,
        results: UnboundedSender<Outcome>,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            template,
            timeout,
            results,
            token,
        }
    }

    /// Performs one attempt and reports it. The admission permit is released
    /// when this returns, whichever way it returns.
    pub async fn run(self, permit: OwnedSemaphorePermit) {
        let _permit = permit;

        let outcome = tokio::select! {
            _ = self.token.cancelled() => {
                debug!("Shutting down, request abandoned");
                return;
            }
            outcome = self.attempt() => outcome,
        };

        if self.token.is_cancelled() {
            return;
        }
        // the receiver only goes away once the dispatcher has stopped
        let _ = self.results.send(outcome);
    }

    async fn attempt(&self) -> Outcome {
        let start = Instant::now();

        let request = match self.template.build() {
            Ok(request) => request,
            Err(e) => {
                return Outcome {
                    status: 0,
                    duration: start.elapsed(),
                    error: Some(RequestError::Build(e.to_string())),
                };
            }
        };

        let (status, error) = match time::timeout(self.timeout, self.client.execute(request)).await
        {
            Ok(Ok(status)) if status.is_success() => (status.as_u16(), None),
            Ok(Ok(status)) => (status.as_u16(), Some(RequestError::Status(status.as_u16()))),
            Ok(Err(e)) => (0, Some(e)),
            Err(_) => (0, Some(RequestError::Timeout)),
        };

        Outcome {
            status,
            duration: start.elapsed(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientSettings;
    use crate::testing::spawn_target;
    use http::StatusCode;
    use std::collections::HashSet;
    use tokio::sync::{Semaphore, mpsc};

    fn agents(names: &[&str]) -> UserAgents {
        UserAgents::Pool(names.iter().map(|n| HeaderValue::from_str(n).unwrap()).collect())
    }

    #[test]
    fn test_build_uses_template() {
        let template = RequestTemplate::new(
            "http://example.com:8080/path?q=1",
            "post",
            UserAgents::Fixed(Some(HeaderValue::from_static("volley-test"))),
        )
        .unwrap();

        let request = template.build().unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://example.com:8080/path?q=1");
        assert_eq!(request.headers()[USER_AGENT], "volley-test");
    }

    #[test]
    fn test_fixed_none_sends_no_user_agent() {
        let template =
            RequestTemplate::new("http://example.com/", "GET", UserAgents::Fixed(None)).unwrap();
        assert!(template.build().unwrap().headers().get(USER_AGENT).is_none());
    }

    #[test]
    fn test_pool_samples_every_member() {
        let template =
            RequestTemplate::new("http://example.com/", "GET", agents(&["a/1", "b/2", "c/3"]))
                .unwrap();

        let mut seen = HashSet::new();
        for _ in 0..300 {
            let request = template.build().unwrap();
            seen.insert(request.headers()[USER_AGENT].to_str().unwrap().to_string());
        }
        let expected: HashSet<String> = ["a/1", "b/2", "c/3"].map(String::from).into();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_user_agent_file_overrides_default() {
        let path = std::env::temp_dir().join(format!("volley-agents-{}.txt", std::process::id()));
        std::fs::write(&path, "agent-one\n\n  agent-two  \n").unwrap();

        let config = Config {
            url: "http://example.com/".to_string(),
            user_agents_list: Some(path.clone()),
            ..Config::default()
        };
        let template = RequestTemplate::from_config(&config).unwrap();
        std::fs::remove_file(&path).ok();

        for _ in 0..50 {
            let request = template.build().unwrap();
            let agent = request.headers()[USER_AGENT].to_str().unwrap();
            assert!(agent == "agent-one" || agent == "agent-two", "{agent}");
        }
    }

    #[test]
    fn test_invalid_user_agent_is_config_error() {
        let config = Config {
            url: "http://example.com/".to_string(),
            user_agent: "bad\nagent".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            RequestTemplate::from_config(&config),
            Err(ConfigError::InvalidUserAgent(_))
        ));
    }

    async fn send_once(
        url: &str,
        timeout: Duration,
        token: CancellationToken,
    ) -> (Option<Outcome>, Arc<Semaphore>) {
        let template = Arc::new(RequestTemplate::new(url, "GET", UserAgents::Fixed(None)).unwrap());
        let client = HttpClient::direct(ClientSettings::default()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(1));
        let permit = semaphore.clone().acquire_owned().await.unwrap();

        let sender = RequestSender::new(client, template, timeout, tx, token);
        sender.run(permit).await;

        (rx.try_recv().ok(), semaphore)
    }

    #[tokio::test]
    async fn test_successful_outcome() {
        let target = spawn_target(Duration::from_millis(5), StatusCode::OK).await;
        let (outcome, semaphore) =
            send_once(&target.url(), Duration::from_secs(2), CancellationToken::new()).await;

        let outcome = outcome.expect("outcome reported");
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.error, None);
        assert!(outcome.duration >= Duration::from_millis(5));
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let target = spawn_target(Duration::ZERO, StatusCode::SERVICE_UNAVAILABLE).await;
        let (outcome, _) =
            send_once(&target.url(), Duration::from_secs(2), CancellationToken::new()).await;

        let outcome = outcome.unwrap();
        assert_eq!(outcome.status, 503);
        assert_eq!(outcome.error, Some(RequestError::Status(503)));
    }

    #[tokio::test]
    async fn test_timeout_outcome() {
        let target = spawn_target(Duration::from_secs(5), StatusCode::OK).await;
        let (outcome, semaphore) =
            send_once(&target.url(), Duration::from_millis(100), CancellationToken::new()).await;

        let outcome = outcome.unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.error, Some(RequestError::Timeout));
        assert!(outcome.duration < Duration::from_secs(2));
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_sender_reports_nothing_and_releases_slot() {
        let target = spawn_target(Duration::from_secs(5), StatusCode::OK).await;
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let (outcome, semaphore) = send_once(&target.url(), Duration::from_secs(10), token).await;

        assert!(outcome.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(semaphore.available_permits(), 1);
    }
}
