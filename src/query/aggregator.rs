//! C9 — merges per-host [`QueryResult`]s into one aggregate (spec.md §4.9).

use std::collections::HashMap;

use super::types::{
    Hits, HostsStatuses, QueryResult, QueryStatus, Row, RowCounters, RowKey, StatusCode, Summary,
};

#[derive(Default, Clone)]
pub struct Aggregator {
    rows: HashMap<RowKey, RowCounters>,
    summary: Summary,
    hosts_statuses: HostsStatuses,
    any_host_errored: bool,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one host's contribution in. Commutative/associative over the
    /// order hosts arrive in (spec.md §4.8 concurrency guarantees).
    pub fn accept(&mut self, result: QueryResult) {
        for row in result.rows {
            *self.rows.entry(row.key).or_default() += row.counters;
        }
        self.summary.totals += result.summary.totals;
        for iface in result.summary.interfaces {
            if !self.summary.interfaces.contains(&iface) {
                self.summary.interfaces.push(iface);
            }
        }
        self.summary.time_first = min_opt(self.summary.time_first, result.summary.time_first);
        self.summary.time_last = max_opt(self.summary.time_last, result.summary.time_last);

        for (host, status) in result.hosts_statuses {
            if status.code == StatusCode::Error {
                self.any_host_errored = true;
            }
            self.hosts_statuses.insert(host, status);
        }
    }

    /// Snapshot used for `PartialResult` streaming events — same rows, same
    /// sort applied lazily by the caller.
    pub fn snapshot_row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cheap clone used to compute a streaming `PartialResult` without
    /// consuming the live aggregator (spec.md §4.8 streaming mode).
    pub fn clone_for_snapshot(&self) -> Self {
        self.clone()
    }

    /// Produces the final sorted, truncated [`QueryResult`] (spec.md §4.8
    /// step 7, §4.9 empty-result rule).
    pub fn finish(
        mut self,
        sort_by: Option<&str>,
        ascending: bool,
        num_results: Option<usize>,
    ) -> QueryResult {
        let mut rows: Vec<Row> = self
            .rows
            .drain()
            .map(|(key, counters)| Row { key, counters })
            .collect();

        sort_rows(&mut rows, sort_by, ascending);

        let total_hits = rows.len();
        if let Some(limit) = num_results {
            rows.truncate(limit);
        }
        self.summary.hits = Hits {
            total: total_hits,
            displayed: rows.len(),
        };

        let status = if total_hits == 0 && !self.any_host_errored {
            QueryStatus {
                code: StatusCode::Empty,
                message: "no results".to_string(),
            }
        } else {
            QueryStatus {
                code: StatusCode::Ok,
                message: String::new(),
            }
        };

        QueryResult {
            rows,
            summary: self.summary,
            status,
            hosts_statuses: self.hosts_statuses,
        }
    }
}

fn sort_rows(rows: &mut [Row], sort_by: Option<&str>, ascending: bool) {
    let Some(field) = sort_by else { return };
    rows.sort_by(|a, b| {
        let ordering = match field {
            "bytes" => (a.counters.bytes_sent + a.counters.bytes_rcvd)
                .cmp(&(b.counters.bytes_sent + b.counters.bytes_rcvd)),
            "packets" => (a.counters.packets_sent + a.counters.packets_rcvd)
                .cmp(&(b.counters.packets_sent + b.counters.packets_rcvd)),
            _ => std::cmp::Ordering::Equal,
        };
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

fn min_opt<T: Ord + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn max_opt<T: Ord + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::{HostStatus, QueryStatus as QS};
    use std::collections::HashMap;

    fn row(dport: u16, bytes: u64) -> Row {
        Row {
            key: RowKey {
                dport: Some(dport),
                ..Default::default()
            },
            counters: RowCounters {
                bytes_sent: bytes,
                ..Default::default()
            },
        }
    }

    fn result(rows: Vec<Row>, host: &str, status: StatusCode) -> QueryResult {
        let mut hosts_statuses = HashMap::new();
        hosts_statuses.insert(
            host.to_string(),
            HostStatus {
                code: status,
                message: String::new(),
            },
        );
        QueryResult {
            rows,
            summary: Summary::default(),
            status: QS { code: status, message: String::new() },
            hosts_statuses,
        }
    }

    #[test]
    fn per_host_exactness_merges_all_contributions() {
        let mut agg = Aggregator::new();
        agg.accept(result(vec![row(80, 10)], "h1", StatusCode::Ok));
        agg.accept(result(vec![row(80, 5)], "h2", StatusCode::Ok));
        agg.accept(result(vec![row(443, 1)], "h3", StatusCode::Ok));
        let final_result = agg.finish(None, true, None);
        assert_eq!(final_result.hosts_statuses.len(), 3);
        assert_eq!(final_result.rows.len(), 2);
        let merged_80 = final_result
            .rows
            .iter()
            .find(|r| r.key.dport == Some(80))
            .unwrap();
        assert_eq!(merged_80.counters.bytes_sent, 15);
    }

    #[test]
    fn empty_with_no_errors_is_status_empty() {
        let mut agg = Aggregator::new();
        agg.accept(result(vec![], "h1", StatusCode::Empty));
        let final_result = agg.finish(None, true, None);
        assert_eq!(final_result.status.code, StatusCode::Empty);
    }

    #[test]
    fn error_host_with_some_rows_is_status_ok() {
        let mut agg = Aggregator::new();
        agg.accept(result(vec![row(80, 10)], "h1", StatusCode::Ok));
        agg.accept(result(vec![], "h2", StatusCode::Error));
        let final_result = agg.finish(None, true, None);
        assert_eq!(final_result.status.code, StatusCode::Ok);
        assert_eq!(
            final_result.hosts_statuses.get("h2").unwrap().code,
            StatusCode::Error
        );
    }

    #[test]
    fn num_results_truncates_after_sort() {
        let mut agg = Aggregator::new();
        agg.accept(result(vec![row(1, 1), row(2, 5), row(3, 3)], "h1", StatusCode::Ok));
        let final_result = agg.finish(Some("bytes"), false, Some(2));
        assert_eq!(final_result.rows.len(), 2);
        assert_eq!(final_result.summary.hits.total, 3);
        assert_eq!(final_result.summary.hits.displayed, 2);
        assert_eq!(final_result.rows[0].counters.bytes_sent, 5);
    }
}
