//! `tracing` initialization. Replaces the teacher's bitflag `BreadcrumbFlags`
//! sink with per-subsystem targets (`goprobe::capture`, `goprobe::query`, …)
//! gated through `RUST_LOG`/`EnvFilter`, the idiomatic equivalent.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

pub fn init(format: LogFormat, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => {
            subscriber.json().init();
        }
        LogFormat::Compact => {
            subscriber.compact().init();
        }
    }
}
