//! Process-wide Prometheus registry (spec.md §6 `api.metrics`, §9
//! "iface-label cardinality").

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub packets_processed: IntCounterVec,
    pub packets_dropped: IntCounterVec,
    pub parse_errors: IntCounterVec,
    pub rotation_duration: HistogramVec,
    drop_iface_label: bool,
}

impl Metrics {
    pub fn new(drop_iface_label: bool) -> Self {
        let registry = Registry::new();
        let label = if drop_iface_label { &[][..] } else { &["iface"][..] };

        let packets_processed = IntCounterVec::new(
            Opts::new("goprobe_packets_processed_total", "Packets successfully parsed"),
            label,
        )
        .expect("metric registration");
        let packets_dropped = IntCounterVec::new(
            Opts::new("goprobe_packets_dropped_total", "Packets dropped after parsing"),
            label,
        )
        .expect("metric registration");
        let parse_errors = IntCounterVec::new(
            Opts::new("goprobe_parse_errors_total", "Packets rejected during parsing"),
            &[label, &["errno"][..]].concat(),
        )
        .expect("metric registration");
        let rotation_duration = HistogramVec::new(
            HistogramOpts::new(
                "goprobe_rotation_duration_seconds",
                "Time spent draining one interface's ring buffer during rotation",
            ),
            label,
        )
        .expect("metric registration");

        registry
            .register(Box::new(packets_processed.clone()))
            .expect("register packets_processed");
        registry
            .register(Box::new(packets_dropped.clone()))
            .expect("register packets_dropped");
        registry
            .register(Box::new(parse_errors.clone()))
            .expect("register parse_errors");
        registry
            .register(Box::new(rotation_duration.clone()))
            .expect("register rotation_duration");

        Self {
            registry,
            packets_processed,
            packets_dropped,
            parse_errors,
            rotation_duration,
            drop_iface_label,
        }
    }

    /// Labels to use for a per-interface observation, honoring the
    /// cardinality-reduction switch (spec.md §9).
    pub fn iface_labels<'a>(&self, iface: &'a str) -> Vec<&'a str> {
        if self.drop_iface_label {
            vec![]
        } else {
            vec![iface]
        }
    }

    pub fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .expect("prometheus text encoding");
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new(false);
        metrics
            .packets_processed
            .with_label_values(&["eth0"])
            .inc();
        let rendered = metrics.render();
        assert!(rendered.contains("goprobe_packets_processed_total"));
    }

    #[test]
    fn drop_iface_label_uses_unlabeled_series() {
        let metrics = Metrics::new(true);
        metrics.packets_processed.with_label_values(&[]).inc();
        assert!(metrics.render().contains("goprobe_packets_processed_total"));
    }
}
