use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod dispatcher;
mod limiter;
mod proxy;
mod request;
mod stats;
#[cfg(test)]
mod testing;

use client::{ClientSettings, HttpClient};
use config::{Cli, Config};
use dispatcher::{DispatchSettings, Dispatcher};
use proxy::ProxyRotator;
use request::RequestTemplate;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(Cli::parse())?;
    init_tracing(&config)?;

    let template = Arc::new(RequestTemplate::from_config(&config)?);
    let client = build_client(&config).await?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                token.cancel();
            }
        }
    });

    countdown(config.starting_timeout, &token).await;

    let dispatcher = Dispatcher::new(client, template, DispatchSettings::from(&config), token);
    let report = dispatcher.run().await;
    report.log();

    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let level = config::log_directive(&config.lvl)?;
    let directive = if level == "off" {
        level.to_string()
    } else {
        format!("volley={level},warn")
    };
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log filter {directive:?}"))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.pretty {
        builder.init();
    } else {
        builder.json().init();
    }
    Ok(())
}

async fn build_client(config: &Config) -> Result<HttpClient> {
    let settings = ClientSettings {
        connect_timeout: config.request_timeout,
        insecure: config.insecure,
        ..ClientSettings::default()
    };

    let Some(path) = &config.proxy_list else {
        info!("No proxy list provided, using direct connection");
        return HttpClient::direct(settings);
    };

    let proxies = config::read_entries(path)?;
    let total = proxies.len();
    info!(proxies_count = total, "Validating proxy list");

    let validation = proxy::validate_proxies(proxies, config.proxy_timeout).await;
    info!(
        valid_proxies = %format!("{}/{}", validation.valid.len(), total),
        "Validated proxy list"
    );
    for proxy in &validation.invalid {
        debug!(proxy = %proxy, "Excluding unreachable proxy");
    }

    let rotator = Arc::new(ProxyRotator::new(validation.valid));
    if rotator.is_empty() {
        warn!("No reachable proxies, every request will fail");
    }
    info!(proxies = rotator.len(), "Using proxy list");
    rotator.client(settings)
}

async fn countdown(seconds: u64, token: &CancellationToken) {
    for remaining in (1..=seconds).rev() {
        info!("Starting execution in {} second(s)", remaining);
        tokio::select! {
            _ = token.cancelled() => return,
            _ = time::sleep(Duration::from_secs(1)) => {}
        }
    }
}
