//! Prometheus text exposition format.
//!
//! Renders the last closed window of each version, plus the live
//! traffic split, for scraping by a Prometheus server.

use std::fmt::Write;

use vecswap_state::PerformanceSnapshot;

struct Gauge {
    name: &'static str,
    help: &'static str,
    value: fn(&PerformanceSnapshot) -> String,
}

const GAUGES: &[Gauge] = &[
    Gauge {
        name: "vecswap_latency_p50_ms",
        help: "P50 query latency in milliseconds.",
        value: |s| format!("{:.2}", s.p50_latency_ms),
    },
    Gauge {
        name: "vecswap_latency_p95_ms",
        help: "P95 query latency in milliseconds.",
        value: |s| format!("{:.2}", s.p95_latency_ms),
    },
    Gauge {
        name: "vecswap_latency_p99_ms",
        help: "P99 query latency in milliseconds.",
        value: |s| format!("{:.2}", s.p99_latency_ms),
    },
    Gauge {
        name: "vecswap_throughput_qps",
        help: "Queries per second over the last window.",
        value: |s| format!("{:.2}", s.throughput_qps),
    },
    Gauge {
        name: "vecswap_error_rate",
        help: "Query error rate (0.0-1.0).",
        value: |s| format!("{:.4}", s.error_rate),
    },
    Gauge {
        name: "vecswap_memory_usage_percent",
        help: "Index memory as a percentage of the budget.",
        value: |s| format!("{:.2}", s.memory_usage_percent),
    },
    Gauge {
        name: "vecswap_search_latency_percent",
        help: "Search time as a percentage of request time.",
        value: |s| format!("{:.2}", s.search_latency_percent),
    },
    Gauge {
        name: "vecswap_window_samples",
        help: "Queries recorded in the last window.",
        value: |s| s.sample_count.to_string(),
    },
];

/// Render version snapshots and the traffic split (version → percent).
pub fn render_prometheus(snapshots: &[PerformanceSnapshot], traffic: &[(String, u8)]) -> String {
    let mut out = String::new();

    for gauge in GAUGES {
        let _ = writeln!(out, "# HELP {} {}", gauge.name, gauge.help);
        let _ = writeln!(out, "# TYPE {} gauge", gauge.name);
        for s in snapshots {
            let _ = writeln!(
                out,
                "{}{{version=\"{}\"}} {}",
                gauge.name,
                escape_label(&s.version_id),
                (gauge.value)(s)
            );
        }
    }

    out.push_str("# HELP vecswap_traffic_percent Share of queries routed to each version.\n");
    out.push_str("# TYPE vecswap_traffic_percent gauge\n");
    for (version, percent) in traffic {
        let _ = writeln!(
            out,
            "vecswap_traffic_percent{{version=\"{}\"}} {percent}",
            escape_label(version)
        );
    }

    out
}

/// Escape a label value: backslash, double quote and newline.
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
