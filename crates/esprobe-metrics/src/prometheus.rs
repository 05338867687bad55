//! Prometheus text exposition format.
//!
//! Renders a `MetricsSnapshot` into the text exposition format (0.0.4) for
//! scraping by a Prometheus server or compatible agent. Every metric family
//! is declared with HELP and TYPE even when it has no samples.

use crate::store::{MetricsSnapshot, NodeSeriesSnapshot};
use crate::summary::SummarySnapshot;

pub const ERRORS_COUNT: &str = "es_probe_errors_count";
pub const NODE_COUNT: &str = "es_node_count";
pub const SHARDS_SUCCESSFUL: &str = "es_node_shards_successful";
pub const DOCUMENTS_HIT: &str = "es_node_documents_hit";
pub const ES_AVAILABILITY: &str = "es_node_availability";
pub const KIBANA_AVAILABILITY: &str = "kibana_node_availability";
pub const SEARCH_LATENCY: &str = "es_node_search_latency";
pub const DISCOVERY_DURATION: &str = "es_probe_consul_discovery_duration";
pub const CLEANING_DURATION: &str = "es_probe_metrics_cleaning_duration";

pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_NODENAME: &str = "nodename";

/// Content type of the rendered body.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render a store snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    header(
        &mut out,
        ERRORS_COUNT,
        "Reports Espoke internal errors absolute counter since start",
        "counter",
    );
    out.push_str(&format!("{ERRORS_COUNT} {}\n", snapshot.errors_count));

    header(&mut out, NODE_COUNT, "Reports current discovered nodes amount", "gauge");
    out.push_str(&format!("{NODE_COUNT} {}\n", snapshot.node_count));

    node_gauge(
        &mut out,
        SHARDS_SUCCESSFUL,
        "Reports current successful shards",
        &snapshot.nodes,
        |n| n.shards_successful,
    );
    node_gauge(
        &mut out,
        DOCUMENTS_HIT,
        "Reports current documents hit by the probe search",
        &snapshot.nodes,
        |n| n.documents_hit,
    );
    node_gauge(
        &mut out,
        ES_AVAILABILITY,
        "Reflects node availabity : 1 is OK, 0 means node unavailable",
        &snapshot.nodes,
        |n| n.es_availability,
    );
    node_gauge(
        &mut out,
        KIBANA_AVAILABILITY,
        "Reflects node availabity : 1 is OK, 0 means node unavailable",
        &snapshot.nodes,
        |n| n.kibana_availability,
    );

    header(
        &mut out,
        SEARCH_LATENCY,
        "Measure latency for every node (quantiles - in ns)",
        "summary",
    );
    for n in &snapshot.nodes {
        if let Some(latency) = &n.search_latency {
            summary_samples(&mut out, SEARCH_LATENCY, &node_labels(n), latency);
        }
    }

    header(
        &mut out,
        DISCOVERY_DURATION,
        "Time spent for discovering nodes using Consul API (in ns)",
        "summary",
    );
    summary_samples(&mut out, DISCOVERY_DURATION, "", &snapshot.discovery_duration);

    header(
        &mut out,
        CLEANING_DURATION,
        "Time spent for cleaning vanished nodes metrics (in ns)",
        "summary",
    );
    summary_samples(&mut out, CLEANING_DURATION, "", &snapshot.cleaning_duration);

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} {kind}\n"));
}

fn node_gauge(
    out: &mut String,
    name: &str,
    help: &str,
    nodes: &[NodeSeriesSnapshot],
    value: impl Fn(&NodeSeriesSnapshot) -> Option<f64>,
) {
    header(out, name, help, "gauge");
    for n in nodes {
        if let Some(v) = value(n) {
            out.push_str(&format!("{name}{{{}}} {}\n", node_labels(n), format_value(v)));
        }
    }
}

fn summary_samples(out: &mut String, name: &str, labels: &str, summary: &SummarySnapshot) {
    let sep = if labels.is_empty() { "" } else { "," };
    for (q, v) in &summary.quantiles {
        out.push_str(&format!(
            "{name}{{{labels}{sep}quantile=\"{q}\"}} {}\n",
            format_value(*v)
        ));
    }
    let braced = if labels.is_empty() {
        String::new()
    } else {
        format!("{{{labels}}}")
    };
    out.push_str(&format!("{name}_sum{braced} {}\n", format_value(summary.sum)));
    out.push_str(&format!("{name}_count{braced} {}\n", summary.count));
}

fn node_labels(n: &NodeSeriesSnapshot) -> String {
    format!(
        "{LABEL_CLUSTER}=\"{}\",{LABEL_NODENAME}=\"{}\"",
        escape_label(&n.identity.cluster),
        escape_label(&n.identity.name)
    )
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let sign = if v > 0.0 { "+" } else { "-" };
        format!("{sign}Inf")
    } else {
        v.to_string()
    }
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
