use crate::client::HttpClient;
use crate::config::Config;
use crate::limiter::Pacer;
use crate::request::{RequestSender, RequestTemplate};
use crate::stats::{Report, RunStatistics};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    /// Zero runs until cancelled.
    pub exec_time: Duration,
    /// Zero disables pacing.
    pub delay: Duration,
}

impl From<&Config> for DispatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrency: config.max_goroutines,
            request_timeout: config.request_timeout,
            exec_time: config.exec_time,
            delay: config.delay,
        }
    }
}

pub struct Dispatcher {
    client: HttpClient,
    template: Arc<RequestTemplate>,
    settings: DispatchSettings,
    token: CancellationToken,
    stats: Arc<RunStatistics>,
}

impl Dispatcher {
    pub fn new(
        client: HttpClient,
        template: Arc<RequestTemplate>,
        settings: DispatchSettings,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            template,
            settings,
            token,
            stats: Arc::new(RunStatistics::new()),
        }
    }

    /// Issues requests until the execution time elapses or the token is
    /// cancelled, then waits for every aggregation task and returns the
    /// final report.
    pub async fn run(self) -> Report {
        let admission = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let (results_tx, mut results) = mpsc::unbounded_channel();
        let aggregation = TaskTracker::new();

        let mut pacer = Pacer::new(self.settings.delay);
        let pacing = pacer.is_some();
        let mut paced = !pacing;

        let has_deadline = !self.settings.exec_time.is_zero();
        let deadline = time::sleep(self.settings.exec_time);
        tokio::pin!(deadline);

        let sender = RequestSender::new(
            self.client,
            self.template.clone(),
            self.settings.request_timeout,
            results_tx,
            self.token.clone(),
        );

        info!(
            url = %self.template.uri(),
            method = %self.template.method(),
            max_concurrency = self.settings.max_concurrency,
            delay = ?self.settings.delay,
            exec_time = ?self.settings.exec_time,
            "Sending requests to target"
        );

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = &mut deadline, if has_deadline => {
                    debug!("Execution time reached, shutting down");
                    self.token.cancel();
                    break;
                }
                _ = next_admission(&mut pacer), if !paced => {
                    paced = true;
                }
                permit = admission.clone().acquire_owned(), if paced => {
                    let Ok(permit) = permit else { break };
                    tokio::spawn(sender.clone().run(permit));
                    paced = !pacing;
                }
                Some(outcome) = results.recv() => {
                    let stats = self.stats.clone();
                    aggregation.spawn(async move { stats.record(&outcome) });
                }
            }
        }

        aggregation.close();
        aggregation.wait().await;
        debug!("All aggregation tasks finished");

        self.stats.report()
    }
}

async fn next_admission(pacer: &mut Option<Pacer>) {
    match pacer {
        Some(pacer) => {
            pacer.admit().await;
        }
        None => std::future::pending().await,
    }
}
