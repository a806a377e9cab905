//! `goProbe` — the capture daemon (spec.md §6).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use goprobe::api::{router, ApiState};
use goprobe::capture::SyntheticSource;
use goprobe::config::Config;
use goprobe::logging::{self, LogFormat};
use goprobe::query::Runner;
use goprobe::writeout::NullWriteoutSink;
use goprobe::Engine;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "goProbe", version, about = "Passive network flow recorder")]
struct Cli {
    #[arg(long, default_value = "goprobe.yaml")]
    config: PathBuf,

    /// Writes the OpenAPI document for the query API to this path instead
    /// of starting the server (SPEC_FULL.md §10.4).
    #[arg(long = "openapi.spec-outfile")]
    openapi_spec_outfile: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(LogFormat::Compact, "goprobe=info,tower_http=info");

    if let Some(outfile) = cli.openapi_spec_outfile {
        let doc = goprobe::api::openapi::document();
        std::fs::write(&outfile, doc.to_pretty_json()?)?;
        info!(path = %outfile.display(), "wrote OpenAPI document");
        return Ok(());
    }

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let writeout = Arc::new(NullWriteoutSink);
    let engine = Engine::new(&config, writeout);

    // Kernel packet sourcing is out of scope (spec.md §1); `SyntheticSource`
    // stands in for a real `PacketSource` so the reconciliation and
    // rotation pipeline below has something to drive end to end, the same
    // role `HttpRunner` plays in `global_query.rs` for the remote query
    // transport.
    let available: Vec<String> = config.interfaces.keys().cloned().collect();
    let desired: Vec<String> = config
        .interfaces
        .iter()
        .filter(|(_, cfg)| !cfg.disable)
        .map(|(name, _)| name.clone())
        .collect();
    match engine
        .capture
        .update::<SyntheticSource, _>(
            &desired,
            config.autodetection.enabled,
            &available,
            &config.interfaces,
            |name: &str| SyntheticSource::new(name),
        )
        .await
    {
        Ok(changes) => {
            for change in changes {
                if !change.success {
                    warn!(iface = change.name, error = ?change.error, "failed to start capture");
                }
            }
        }
        Err(err) => error!(%err, "interface reconciliation failed at startup"),
    }

    let rotation_interval = std::time::Duration::from_secs(config.db.rotation_interval_secs.max(1));
    let rotation_capture = Arc::clone(&engine.capture);
    let rotation_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(rotation_interval);
        loop {
            ticker.tick().await;
            for (iface, result) in rotation_capture.rotate_all().await {
                if let Err(err) = result {
                    warn!(iface, %err, "scheduled rotation failed");
                }
            }
        }
    });

    struct NoopRunner;
    #[async_trait::async_trait]
    impl Runner for NoopRunner {
        async fn run(&self, _host: &str, args: &goprobe::query::QueryArgs) -> goprobe::query::QueryResult {
            let _ = args;
            unreachable!("goProbe daemon does not serve remote query fan-out")
        }
    }
    let query = Arc::new(engine.query_engine(Arc::new(NoopRunner)));

    let state = Arc::new(ApiState {
        query,
        capture: Arc::clone(&engine.capture),
        metrics: Arc::clone(&engine.metrics),
        request_timeout: std::time::Duration::from_secs(config.api.request_timeout_secs),
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.api.addr).await?;
    info!(addr = %config.api.addr, "goProbe listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining in-flight requests");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    rotation_task.abort();

    Ok(())
}
