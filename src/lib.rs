//! goprobe-rs: a passive network flow recorder with a distributed query
//! layer. Packets observed on monitored interfaces are aggregated into
//! flows, periodically rotated out to a [`writeout::WriteoutSink`], and can
//! be queried — locally or across a fleet — through [`query`].

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod flow;
pub mod logging;
pub mod metrics;
pub mod packet;
pub mod query;
pub mod writeout;

pub use error::{Error, Result};

use std::sync::Arc;

use tracing::info;

use crate::capture::CaptureManager;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::query::{DistributedQuery, ResolverRegistry};
use crate::writeout::WriteoutSink;

/// Top-level handle wiring capture, query, and API state together. A
/// binary constructs one of these from [`Config`] and drives it until
/// shutdown.
pub struct Engine {
    pub capture: Arc<CaptureManager>,
    pub resolvers: Arc<ResolverRegistry>,
    pub metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(config: &Config, writeout: Arc<dyn WriteoutSink>) -> Self {
        let pool = Arc::new(capture::RingBufferPool::new(
            config.local_buffers.num_buffers,
            config.local_buffers.size_limit,
        ));
        let capture = CaptureManager::new(pool, writeout);
        let resolvers = ResolverRegistry::new();
        let metrics = Arc::new(Metrics::new(config.api.drop_iface_label));
        info!(addr = %config.api.addr, "engine initialized");
        Self {
            capture,
            resolvers,
            metrics,
        }
    }

    pub fn query_engine(&self, runner: Arc<dyn query::Runner>) -> DistributedQuery {
        DistributedQuery::new(Arc::clone(&self.resolvers), runner)
    }
}
