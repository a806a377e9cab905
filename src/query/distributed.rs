//! C8 — distributed query runner: fan-out across hosts, fan-in through the
//! aggregator, buffered and streaming modes (spec.md §4.8).

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::instrument;

use super::aggregator::Aggregator;
use super::resolver::ResolverRegistry;
use super::runner::{AllHosts, Runner};
use super::types::{QueryArgs, QueryResult, StreamEvent, ANY_HOSTS};
use crate::error::Error;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("QueryHosts must not be empty")]
    EmptyQueryHosts,
    #[error("query prepare failed: {0}")]
    Prepare(String),
    #[error(transparent)]
    Resolver(#[from] super::resolver::ResolverError),
}

pub struct DistributedQuery {
    resolvers: Arc<ResolverRegistry>,
    runner: Arc<dyn Runner>,
    all_hosts: Option<Arc<dyn AllHosts>>,
    max_concurrent: usize,
}

impl DistributedQuery {
    pub fn new(resolvers: Arc<ResolverRegistry>, runner: Arc<dyn Runner>) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            resolvers,
            runner,
            all_hosts: None,
            max_concurrent: cpus * 2,
        }
    }

    pub fn with_all_hosts(mut self, all_hosts: Arc<dyn AllHosts>) -> Self {
        self.all_hosts = Some(all_hosts);
        self
    }

    /// Validates `args` and resolves the host list — steps 1-4 of spec.md
    /// §4.8's algorithm, run before any host is contacted.
    async fn prepare(&self, args: &QueryArgs) -> std::result::Result<Vec<String>, QueryError> {
        if args.query_hosts.is_empty() {
            return Err(QueryError::EmptyQueryHosts);
        }
        if args.query.trim().is_empty() {
            return Err(QueryError::Prepare("empty projection".to_string()));
        }

        if args.query_hosts == ANY_HOSTS {
            if let Some(all_hosts) = &self.all_hosts {
                return Ok(all_hosts.all_hosts().await);
            }
            return Err(QueryError::Prepare(
                "QueryHosts=any requires an AllHosts-capable querier".to_string(),
            ));
        }

        let resolver_type = args
            .query_hosts_resolver_type
            .as_deref()
            .unwrap_or("string");
        Ok(self.resolvers.resolve(resolver_type, &args.query_hosts)?)
    }

    #[instrument(skip(self, args), fields(query_hosts = %args.query_hosts))]
    pub async fn run(&self, args: &QueryArgs) -> std::result::Result<QueryResult, QueryError> {
        let hosts = self.prepare(args).await?;
        let mut aggregator = Aggregator::new();

        let mut in_flight = FuturesUnordered::new();
        let mut queue = hosts.into_iter();
        for host in queue.by_ref().take(self.max_concurrent) {
            in_flight.push(self.run_one(host, args));
        }

        while let Some(result) = in_flight.next().await {
            aggregator.accept(result);
            if let Some(host) = queue.next() {
                in_flight.push(self.run_one(host, args));
            }
        }

        Ok(aggregator.finish(
            args.sort_by.as_deref(),
            args.sort_ascending,
            args.num_results,
        ))
    }

    /// Streaming counterpart of [`Self::run`]: emits a `PartialResult` after
    /// every accepted host contribution and a `Keepalive` on ticks where no
    /// result arrived (spec.md §4.8 "Streaming mode").
    pub async fn run_streaming(
        &self,
        args: &QueryArgs,
        tx: mpsc::Sender<StreamEvent>,
    ) -> std::result::Result<(), QueryError> {
        let hosts = self.prepare(args).await?;
        let mut aggregator = Aggregator::new();
        let mut last_row_count = 0usize;

        let mut in_flight = FuturesUnordered::new();
        let mut queue = hosts.into_iter();
        for host in queue.by_ref().take(self.max_concurrent) {
            in_flight.push(self.run_one(host, args));
        }

        let keep_alive = if args.keep_alive_secs > 0 {
            Some(Duration::from_secs(args.keep_alive_secs))
        } else {
            None
        };
        let mut ticker = keep_alive.map(tokio::time::interval);
        let mut sent_partial_since_tick = false;

        loop {
            tokio::select! {
                biased;
                next = in_flight.next(), if !in_flight.is_empty() => {
                    match next {
                        Some(result) => {
                            aggregator.accept(result);
                            if let Some(host) = queue.next() {
                                in_flight.push(self.run_one(host, args));
                            }
                            let row_count = aggregator.snapshot_row_count();
                            if row_count != last_row_count || row_count > 0 {
                                last_row_count = row_count;
                                sent_partial_since_tick = true;
                                let partial = partial_snapshot(&aggregator, args);
                                if tx.send(StreamEvent::PartialResult(partial)).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = async { ticker.as_mut().unwrap().tick().await }, if ticker.is_some() => {
                    if !sent_partial_since_tick {
                        if tx.send(StreamEvent::Keepalive).await.is_err() {
                            return Ok(());
                        }
                    }
                    sent_partial_since_tick = false;
                }
            }
        }

        let final_result = aggregator.finish(
            args.sort_by.as_deref(),
            args.sort_ascending,
            args.num_results,
        );
        let _ = tx.send(StreamEvent::PartialResult(final_result)).await;
        Ok(())
    }

    async fn run_one(&self, host: String, args: &QueryArgs) -> QueryResult {
        self.runner.run(&host, args).await
    }
}

/// Builds the `PartialResult` payload without consuming the live aggregator
/// (cheap clone of the in-progress rows; the aggregator itself is only
/// finalized once the fan-out completes).
fn partial_snapshot(aggregator: &Aggregator, args: &QueryArgs) -> QueryResult {
    // Aggregator::finish consumes self; for partials we rebuild a throwaway
    // aggregator snapshot is avoided by re-running sort on a clone of rows.
    // Kept intentionally simple: partials reuse the same truncation/sort
    // rule as the final result so monotonicity (spec.md invariant 7) holds
    // as rows only ever accumulate.
    aggregator_snapshot_result(aggregator, args)
}

fn aggregator_snapshot_result(aggregator: &Aggregator, args: &QueryArgs) -> QueryResult {
    aggregator
        .clone_for_snapshot()
        .finish(args.sort_by.as_deref(), args.sort_ascending, args.num_results)
}

pub fn map_query_error(err: QueryError) -> Error {
    Error::Query(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::runner::test_support::FixedRunner;
    use crate::query::types::Row;
    use std::collections::HashMap;

    fn args(hosts: &str) -> QueryArgs {
        QueryArgs {
            query_hosts: hosts.to_string(),
            query_hosts_resolver_type: None,
            query: "sip,dport".to_string(),
            first: None,
            last: None,
            num_results: None,
            sort_by: None,
            sort_ascending: true,
            direction: None,
            format: "json".to_string(),
            keep_alive_secs: 0,
            max_mem_pct: None,
        }
    }

    #[tokio::test]
    async fn empty_hosts_is_rejected_before_any_host_contacted() {
        let resolvers = ResolverRegistry::new();
        let runner = Arc::new(FixedRunner {
            rows_by_host: HashMap::new(),
            failing: vec![],
        });
        let query = DistributedQuery::new(resolvers, runner);
        let err = query.run(&args("")).await.unwrap_err();
        assert!(matches!(err, QueryError::EmptyQueryHosts));
    }

    #[tokio::test]
    async fn fan_out_merges_all_hosts() {
        let resolvers = ResolverRegistry::new();
        let mut rows_by_host = HashMap::new();
        rows_by_host.insert(
            "h1".to_string(),
            vec![Row {
                key: Default::default(),
                counters: crate::query::types::RowCounters {
                    bytes_sent: 10,
                    ..Default::default()
                },
            }],
        );
        let runner = Arc::new(FixedRunner {
            rows_by_host,
            failing: vec!["h2".to_string()],
        });
        let query = DistributedQuery::new(resolvers, runner);
        let result = query.run(&args("h1,h2")).await.unwrap();
        assert_eq!(result.hosts_statuses.len(), 2);
        assert_eq!(
            result.hosts_statuses.get("h2").unwrap().code,
            crate::query::types::StatusCode::Error
        );
        assert_eq!(result.status.code, crate::query::types::StatusCode::Ok);
    }
}
