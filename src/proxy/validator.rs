use futures::future::join_all;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, error};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Validation {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

/// Probes every candidate in parallel with a single TCP connect and
/// partitions them by reachability. Returns once every probe has resolved.
pub async fn validate_proxies(candidates: Vec<String>, timeout: Duration) -> Validation {
    let probes = candidates.into_iter().map(|proxy| async move {
        let task = tokio::spawn({
            let proxy = proxy.clone();
            async move { check_proxy(&proxy, timeout).await }
        });

        match task.await {
            Ok(reachable) => (proxy, reachable),
            Err(e) => {
                error!("Proxy probe task for {} failed: {}", proxy, e);
                (proxy, false)
            }
        }
    });

    let mut validation = Validation::default();
    for (proxy, reachable) in join_all(probes).await {
        if reachable {
            validation.valid.push(proxy);
        } else {
            validation.invalid.push(proxy);
        }
    }
    validation
}

async fn check_proxy(proxy: &str, timeout: Duration) -> bool {
    debug!("Probing proxy {}", proxy);

    match time::timeout(timeout, TcpStream::connect(proxy)).await {
        Ok(Ok(_stream)) => {
            debug!("Proxy probe SUCCESS for {}", proxy);
            true
        }
        Ok(Err(e)) => {
            debug!("Proxy probe FAILED for {}: {}", proxy, e);
            false
        }
        Err(_) => {
            debug!("Proxy probe TIMEOUT for {}", proxy);
            false
        }
    }
}
