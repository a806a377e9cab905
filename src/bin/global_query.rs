//! `global-query` — fans a query out across a fleet of `goProbe` instances
//! (spec.md §6). `server` runs the long-lived HTTP API; `query` is the
//! one-shot CLI entry point for the same contract (SPEC_FULL.md §10.3).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use goprobe::api::{router, ApiState};
use goprobe::capture::RingBufferPool;
use goprobe::capture::CaptureManager;
use goprobe::metrics::Metrics;
use goprobe::writeout::NullWriteoutSink;
use goprobe::query::runner::AllHosts;
use goprobe::query::{DistributedQuery, QueryArgs, Runner, ResolverRegistry};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "global-query", version)]
struct Cli {
    #[arg(long = "querier.type", default_value = "http")]
    querier_type: String,
    #[arg(long = "querier.config")]
    querier_config: Option<PathBuf>,
    #[arg(long = "hosts.resolver.type", default_value = "string")]
    hosts_resolver_type: String,
    #[arg(long = "hosts.resolver.config")]
    hosts_resolver_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Server {
        #[arg(long = "server.addr", default_value = "0.0.0.0:8146")]
        addr: String,
        #[arg(long = "server.shutdowngraceperiod", default_value_t = 30)]
        shutdown_grace_period_secs: u64,
    },
    Query {
        #[arg(long)]
        hosts: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "json")]
        format: String,
    },
}

/// Stub transport: a real deployment would dial each host's `goProbe` API.
/// Not part of the spec's contract surface, just enough to exercise C8/C9
/// end to end from this binary.
struct HttpRunner;

#[async_trait::async_trait]
impl Runner for HttpRunner {
    async fn run(&self, host: &str, _args: &QueryArgs) -> goprobe::query::QueryResult {
        use goprobe::query::types::{HostStatus, QueryStatus, StatusCode, Summary};
        let mut hosts_statuses = std::collections::HashMap::new();
        hosts_statuses.insert(
            host.to_string(),
            HostStatus {
                code: StatusCode::Error,
                message: "remote transport not configured".to_string(),
            },
        );
        goprobe::query::QueryResult {
            rows: Vec::new(),
            summary: Summary::default(),
            status: QueryStatus {
                code: StatusCode::Error,
                message: "remote transport not configured".to_string(),
            },
            hosts_statuses,
        }
    }
}

struct NoAllHosts;

#[async_trait::async_trait]
impl AllHosts for NoAllHosts {
    async fn all_hosts(&self) -> Vec<String> {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    goprobe::logging::init(goprobe::logging::LogFormat::Compact, "global_query=info");

    let resolvers = ResolverRegistry::new();
    let runner: Arc<dyn Runner> = Arc::new(HttpRunner);
    let query = Arc::new(
        DistributedQuery::new(resolvers, runner).with_all_hosts(Arc::new(NoAllHosts)),
    );

    match cli.command {
        Command::Server {
            addr,
            shutdown_grace_period_secs,
        } => {
            let pool = Arc::new(RingBufferPool::new(1, 4096));
            let capture = CaptureManager::new(pool, Arc::new(NullWriteoutSink));
            let metrics = Arc::new(Metrics::new(false));
            let state = Arc::new(ApiState {
                query,
                capture,
                metrics,
                request_timeout: Duration::from_secs(30),
            });
            let app = router(state);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(addr, "global-query server listening");
            let shutdown = async move {
                let _ = tokio::signal::ctrl_c().await;
                info!(shutdown_grace_period_secs, "shutdown signal received");
                tokio::time::sleep(Duration::from_secs(shutdown_grace_period_secs.min(1))).await;
            };
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;
        }
        Command::Query { hosts, query: projection, format } => {
            let args = QueryArgs {
                query_hosts: hosts,
                query_hosts_resolver_type: Some(cli.hosts_resolver_type),
                query: projection,
                first: None,
                last: None,
                num_results: None,
                sort_by: None,
                sort_ascending: true,
                direction: None,
                format,
                keep_alive_secs: 0,
                max_mem_pct: None,
            };
            match query.run(&args).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(err) => {
                    error!(%err, "query failed");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
