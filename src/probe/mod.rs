//! Path-probe engines.
//!
//! The scheduler only sees [`PathProbe`]; any engine that can report per-hop
//! sent/received counts for one round can be plugged in.

pub mod correlate;
pub mod icmp;
pub mod mtr;
pub mod native;
pub mod socket;

pub use correlate::*;
pub use icmp::*;
pub use mtr::*;
pub use native::*;
pub use socket::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Config, EngineKind, ProbeProtocol};
use crate::state::HopStat;

/// Why a probe round produced no result
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("probe exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },
    #[error("failed to resolve {target}: {reason}")]
    Resolve { target: String, reason: String },
    #[error("socket error: {0}")]
    Socket(String),
    #[error("protocol {0} not supported by this engine")]
    Unsupported(ProbeProtocol),
    #[error("probe round timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe cancelled")]
    Cancelled,
    #[error("probe task failed: {0}")]
    Join(String),
}

/// Performs one full multi-hop measurement round
#[async_trait]
pub trait PathProbe: Send + Sync {
    /// Probe `target` with `cycles` packets per hop and return raw per-hop counters
    async fn probe(
        &self,
        target: &str,
        protocol: ProbeProtocol,
        cycles: u32,
    ) -> Result<Vec<HopStat>, ProbeError>;
}

/// Build the engine selected in the config
pub fn engine_from_config(config: &Config) -> Arc<dyn PathProbe> {
    match config.engine {
        EngineKind::Mtr => Arc::new(MtrCommand::new(config.mtr_path.clone(), config.max_hops)),
        EngineKind::Native => Arc::new(IcmpProber::new(config.max_hops, config.timeout)),
    }
}
