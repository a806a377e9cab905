//! Query wire types (spec.md §4.8, §6 `QueryAPI`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryArgs {
    pub query_hosts: String,
    #[serde(default)]
    pub query_hosts_resolver_type: Option<String>,
    pub query: String,
    #[serde(default)]
    pub first: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub last: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub num_results: Option<usize>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_ascending: bool,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub max_mem_pct: Option<u8>,
}

fn default_format() -> String {
    "json".to_string()
}

pub const ANY_HOSTS: &str = "any";

/// Attribute aliasing table applied during projection normalization
/// (spec.md §4.8 step 2).
pub fn resolve_attribute_alias(attr: &str) -> &str {
    match attr {
        "src" => "sip",
        "dst" => "dip",
        "port" => "dport",
        "interface" => "iface",
        "host" => "hostname",
        other => other,
    }
}

pub fn normalize_projection(query: &str, format: &str) -> Vec<String> {
    let mut attrs: Vec<String> = query
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| resolve_attribute_alias(s).to_string())
        .collect();
    if format == "txt" && !attrs.iter().any(|a| a == "hostname") {
        attrs.push("hostname".to_string());
    }
    attrs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum StatusCode {
    Ok,
    Empty,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HostStatus {
    pub code: StatusCode,
    pub message: String,
}

pub type HostsStatuses = HashMap<String, HostStatus>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct RowKey {
    pub iface: Option<String>,
    pub sip: Option<String>,
    pub dip: Option<String>,
    pub dport: Option<u16>,
    pub proto: Option<u8>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RowCounters {
    pub bytes_rcvd: u64,
    pub bytes_sent: u64,
    pub packets_rcvd: u64,
    pub packets_sent: u64,
}

impl std::ops::AddAssign for RowCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_rcvd = self.bytes_rcvd.saturating_add(rhs.bytes_rcvd);
        self.bytes_sent = self.bytes_sent.saturating_add(rhs.bytes_sent);
        self.packets_rcvd = self.packets_rcvd.saturating_add(rhs.packets_rcvd);
        self.packets_sent = self.packets_sent.saturating_add(rhs.packets_sent);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Row {
    pub key: RowKey,
    pub counters: RowCounters,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct Hits {
    pub total: usize,
    pub displayed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Summary {
    pub time_first: Option<chrono::DateTime<chrono::Utc>>,
    pub time_last: Option<chrono::DateTime<chrono::Utc>>,
    pub totals: RowCounters,
    pub interfaces: Vec<String>,
    pub hits: Hits,
}

impl Default for Summary {
    fn default() -> Self {
        Self {
            time_first: None,
            time_last: None,
            totals: RowCounters::default(),
            interfaces: Vec::new(),
            hits: Hits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryStatus {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub summary: Summary,
    pub status: QueryStatus,
    pub hosts_statuses: HostsStatuses,
}

/// One streamed event for `RunStreaming` (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    PartialResult(QueryResult),
    Keepalive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolution_maps_src_dst() {
        assert_eq!(resolve_attribute_alias("src"), "sip");
        assert_eq!(resolve_attribute_alias("dst"), "dip");
        assert_eq!(resolve_attribute_alias("sip"), "sip");
    }

    #[test]
    fn txt_format_forces_hostname() {
        let attrs = normalize_projection("sip,dport", "txt");
        assert!(attrs.iter().any(|a| a == "hostname"));
        let attrs = normalize_projection("sip,dport", "json");
        assert!(!attrs.iter().any(|a| a == "hostname"));
    }
}
