//! `Runner` — the per-host query backend (spec.md §6). Local and remote
//! transports are external collaborators; this crate only defines the
//! contract and a local in-memory stub used by tests.

use async_trait::async_trait;

use super::types::{QueryArgs, QueryResult};

#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, host: &str, args: &QueryArgs) -> QueryResult;
}

/// Capability some backends have: enumerate every reachable host without
/// going through the resolver (spec.md §4.8 "any-selector semantics").
#[async_trait]
pub trait AllHosts: Send + Sync {
    async fn all_hosts(&self) -> Vec<String>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::query::types::{Hits, HostStatus, HostsStatuses, QueryStatus, Row, StatusCode, Summary};
    use std::collections::HashMap;

    /// Returns a fixed set of rows per host, or an error status for hosts
    /// listed in `failing`. Used by the distributed-query unit tests.
    pub struct FixedRunner {
        pub rows_by_host: HashMap<String, Vec<Row>>,
        pub failing: Vec<String>,
    }

    #[async_trait]
    impl Runner for FixedRunner {
        async fn run(&self, host: &str, _args: &QueryArgs) -> QueryResult {
            let mut hosts_statuses: HostsStatuses = HashMap::new();
            if self.failing.contains(&host.to_string()) {
                hosts_statuses.insert(
                    host.to_string(),
                    HostStatus {
                        code: StatusCode::Error,
                        message: "simulated failure".to_string(),
                    },
                );
                return QueryResult {
                    rows: Vec::new(),
                    summary: Summary::default(),
                    status: QueryStatus {
                        code: StatusCode::Error,
                        message: "simulated failure".to_string(),
                    },
                    hosts_statuses,
                };
            }
            let rows = self.rows_by_host.get(host).cloned().unwrap_or_default();
            hosts_statuses.insert(
                host.to_string(),
                HostStatus {
                    code: if rows.is_empty() { StatusCode::Empty } else { StatusCode::Ok },
                    message: String::new(),
                },
            );
            QueryResult {
                rows,
                summary: Summary {
                    interfaces: vec![],
                    hits: Hits { total: 0, displayed: 0 },
                    ..Summary::default()
                },
                status: QueryStatus {
                    code: StatusCode::Ok,
                    message: String::new(),
                },
                hosts_statuses,
            }
        }
    }
}
