use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError, Host, ProbeProtocol};
use crate::probe::{PathProbe, ProbeError};
use crate::state::{MetricsStore, ProbeResult};
use crate::trace::parser::{Anomaly, parse_round};

/// Minimum pause after a failed round, so an engine that fails instantly cannot spin
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Turns the host list into one perpetual measurement loop per host
pub struct ProbeScheduler {
    config: Arc<Config>,
    engine: Arc<dyn PathProbe>,
    store: MetricsStore,
    cancel: CancellationToken,
}

impl ProbeScheduler {
    pub fn new(
        config: Config,
        engine: Arc<dyn PathProbe>,
        store: MetricsStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            store,
            cancel,
        }
    }

    /// Validate the config and spawn one worker per host
    ///
    /// Nothing is spawned if the config is invalid. Must be called from
    /// within a tokio runtime.
    pub fn start(self) -> Result<SchedulerHandle, ConfigError> {
        self.config.validate()?;

        let round_timeout = self.config.round_timeout();
        let mut handles = Vec::with_capacity(self.config.hosts.len());

        for host in &self.config.hosts {
            let worker = HostWorker::new(
                host,
                &self.config,
                round_timeout,
                self.engine.clone(),
                self.store.clone(),
                self.cancel.clone(),
            );
            self.store.register(&worker.alias);
            handles.push(tokio::spawn(worker.run()));
        }

        tracing::info!(
            hosts = handles.len(),
            protocol = %self.config.protocol,
            cycles = self.config.report_cycles,
            "probe scheduler started"
        );

        Ok(SchedulerHandle {
            handles,
            cancel: self.cancel,
        })
    }
}

/// Running workers, returned by [`ProbeScheduler::start`]
pub struct SchedulerHandle {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl SchedulerHandle {
    /// Number of running host loops
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every host loop and wait for them to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "host worker panicked");
            }
        }
    }
}

/// Measurement loop for a single host
pub struct HostWorker {
    alias: String,
    target: String,
    protocol: ProbeProtocol,
    cycles: u32,
    interval: Duration,
    round_timeout: Duration,
    engine: Arc<dyn PathProbe>,
    store: MetricsStore,
    cancel: CancellationToken,
}

impl HostWorker {
    pub fn new(
        host: &Host,
        config: &Config,
        round_timeout: Duration,
        engine: Arc<dyn PathProbe>,
        store: MetricsStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            alias: host.metric_alias().to_string(),
            target: host.name.clone(),
            protocol: config.protocol,
            cycles: config.report_cycles,
            interval: config.interval,
            round_timeout,
            engine,
            store,
            cancel,
        }
    }

    /// Run rounds until cancelled
    pub async fn run(self) {
        tracing::debug!(alias = %self.alias, host = %self.target, "host worker started");

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.run_round() => outcome,
            };

            let delay = match outcome {
                Ok(hops) => {
                    tracing::debug!(alias = %self.alias, hops, "round complete");
                    self.interval
                }
                Err(e) => {
                    tracing::warn!(
                        alias = %self.alias,
                        host = %self.target,
                        error = %e,
                        "probe round failed, keeping previous values"
                    );
                    self.interval.max(FAILURE_BACKOFF)
                }
            };

            if delay.is_zero() {
                // Give the cancellation branch a chance between back-to-back rounds
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!(alias = %self.alias, "host worker stopped");
    }

    /// Probe once, parse and publish; returns the number of hops stored
    ///
    /// On error the store is left untouched.
    pub async fn run_round(&self) -> Result<usize, RoundError> {
        let raw = tokio::time::timeout(
            self.round_timeout,
            self.engine.probe(&self.target, self.protocol, self.cycles),
        )
        .await
        .map_err(|_| ProbeError::Timeout(self.round_timeout))??;

        let parsed = parse_round(raw);
        for anomaly in &parsed.anomalies {
            log_anomaly(&self.alias, anomaly);
        }

        if parsed.is_empty() {
            return Err(RoundError::NoHops);
        }

        let hops = parsed.hops.len();
        if parsed.truncated() {
            tracing::debug!(alias = %self.alias, hops, "publishing path up to the first gap");
        }
        self.store.apply(ProbeResult {
            alias: self.alias.clone(),
            hops: parsed.hops,
        });
        Ok(hops)
    }
}

/// Why a round did not update the store
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("probe returned no usable hops")]
    NoHops,
}

fn log_anomaly(alias: &str, anomaly: &Anomaly) {
    match *anomaly {
        Anomaly::ExcessReceived {
            index,
            sent,
            received,
        } => {
            tracing::warn!(
                alias,
                hop = index,
                sent,
                received,
                "engine reported more replies than probes"
            );
        }
        Anomaly::Gap { expected, found } => {
            tracing::debug!(alias, expected, found, "path not contiguous, truncated");
        }
        Anomaly::DroppedEmpty { index } => {
            tracing::debug!(alias, hop = index, "dropped hop with no probes sent");
        }
        Anomaly::Duplicate { index } => {
            tracing::debug!(alias, hop = index, "dropped duplicate hop");
        }
    }
}
