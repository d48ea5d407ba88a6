//! Statistics Aggregator (§4.6): consumes the full batch of `ProbeResult`s
//! and emits countable/measurable/descending-progression tables plus the
//! scalar `JobMetrics` run summary.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::geoip::GeoipResolver;
use crate::model::{JobMetrics, LoopMode, ProbeResult, StatTable, Transport, PERCENTILES};

/// Runs the full aggregation pass over `results` and returns the ordered
/// list of tables to render plus the job's scalar metrics.
pub fn aggregate(
    results: &[ProbeResult],
    transport: Transport,
    loop_mode: LoopMode,
    geoip: Option<&GeoipResolver>,
    duration: Duration,
) -> (Vec<StatTable>, JobMetrics) {
    let mut tables = Vec::new();

    tables.push(success_rate_table(results));
    tables.push(errors_table(results));

    let mut has_proxy_status_table = false;
    if transport == Transport::Tcp {
        tables.push(target_status_table(results));
        if results
            .iter()
            .any(|r| r.proxy_url.starts_with("http://") || r.proxy_url.starts_with("https://"))
        {
            tables.push(proxy_status_table(results));
            has_proxy_status_table = true;
        }
    }

    tables.push(latency_table(results, transport, has_proxy_status_table));

    if let Some(geoip) = geoip {
        if let Some(table) = country_table(results, geoip) {
            tables.push(table);
        }
    }

    if let LoopMode::Intervaled { count, .. } = loop_mode {
        tables.push(rotation_table(results, count));
    }

    let metrics = job_metrics(results, duration);
    (tables, metrics)
}

fn countable(name: &str, counts: HashMap<String, usize>) -> StatTable {
    let total: usize = counts.values().sum();
    let mut rows: Vec<(String, usize, f64)> = counts
        .into_iter()
        .map(|(value, count)| {
            let percent = if total == 0 {
                0.0
            } else {
                (count as f64 / total as f64) * 100.0
            };
            (value, count, percent)
        })
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    StatTable::Countable {
        name: name.to_string(),
        rows,
    }
}

fn success_rate_table(results: &[ProbeResult]) -> StatTable {
    let mut counts = HashMap::new();
    for r in results {
        let key = if r.status { "ok" } else { "error" };
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    countable("Success Rate", counts)
}

fn errors_table(results: &[ProbeResult]) -> StatTable {
    let mut counts = HashMap::new();
    for r in results {
        let key = if r.status {
            "ok".to_string()
        } else {
            let msg = r.error_message();
            if msg.is_empty() { "ok".to_string() } else { msg }
        };
        *counts.entry(key).or_insert(0) += 1;
    }
    countable("Errors", counts)
}

fn target_status_table(results: &[ProbeResult]) -> StatTable {
    let mut counts = HashMap::new();
    for r in results {
        *counts.entry(r.target_status_code.to_string()).or_insert(0) += 1;
    }
    countable("Target HTTP status codes", counts)
}

fn proxy_status_table(results: &[ProbeResult]) -> StatTable {
    let mut counts = HashMap::new();
    for r in results {
        *counts.entry(r.proxy_status_code.to_string()).or_insert(0) += 1;
    }
    countable("Proxy HTTP status codes", counts)
}

fn percentile(sorted: &[u64], p: u8) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64) * (p as f64 / 100.0)).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx] as f64
}

fn measurable_row(name: &str, mut values: Vec<u64>) -> (String, Vec<(u8, f64)>) {
    values.sort_unstable();
    let cols = PERCENTILES
        .iter()
        .map(|&p| (p, percentile(&values, p)))
        .collect();
    (name.to_string(), cols)
}

fn latency_table(results: &[ProbeResult], transport: Transport, has_proxy_status_table: bool) -> StatTable {
    let ok: Vec<&ProbeResult> = results.iter().filter(|r| r.status).collect();
    let mut metrics = Vec::new();

    metrics.push(measurable_row("TTFB", ok.iter().map(|r| r.latency.ttfb).collect()));

    if transport == Transport::Tcp {
        metrics.push(measurable_row(
            "DNS resolve",
            ok.iter().map(|r| r.latency.dns_resolve).collect(),
        ));
        metrics.push(measurable_row("Connect", ok.iter().map(|r| r.latency.connect).collect()));
        metrics.push(measurable_row(
            "TLS handshake",
            ok.iter().map(|r| r.latency.tls_handshake).collect(),
        ));
        if has_proxy_status_table {
            metrics.push(measurable_row(
                "Proxy response",
                ok.iter().map(|r| r.latency.proxy_resp).collect(),
            ));
        }
    } else {
        metrics.push(measurable_row(
            "Proxy response",
            ok.iter().map(|r| r.latency.proxy_resp).collect(),
        ));
    }

    StatTable::Measurable {
        name: "Latency".to_string(),
        metrics,
    }
}

fn country_table(results: &[ProbeResult], geoip: &GeoipResolver) -> Option<StatTable> {
    let mut counts = HashMap::new();
    let mut any = false;
    for r in results {
        if !r.status || r.proxy_node_ip_addr.is_empty() {
            continue;
        }
        if let Some((iso, name)) = geoip.lookup(&r.proxy_node_ip_addr) {
            any = true;
            *counts.entry(format!("{iso} - {name}")).or_insert(0) += 1;
        }
    }
    if !any {
        return None;
    }
    Some(countable("Exit IP countries", counts))
}

/// Rotation progression (§4.6, §9 "Rotation accounting"): entries drop out
/// once their exit IP diverges from what the same proxy reported in loop
/// 1, and are never re-added even if a later loop matches again.
fn rotation_table(results: &[ProbeResult], loop_count: u32) -> StatTable {
    let mut live: HashMap<&str, &str> = HashMap::new();
    for r in results {
        if r.loop_index == 0 && r.status && !r.proxy_node_ip_addr.is_empty() {
            live.insert(r.proxy_url.as_str(), r.proxy_node_ip_addr.as_str());
        }
    }
    let baseline = live.len();

    let mut iterations = Vec::with_capacity(loop_count as usize);
    iterations.push(("Loop 1".to_string(), baseline, 100.0));

    for loop_index in 1..loop_count {
        let this_loop: HashMap<&str, &str> = results
            .iter()
            .filter(|r| r.loop_index == loop_index)
            .map(|r| (r.proxy_url.as_str(), r.proxy_node_ip_addr.as_str()))
            .collect();
        live.retain(|proxy_url, seeded_ip| {
            matches!(this_loop.get(proxy_url), Some(ip) if ip == seeded_ip && !ip.is_empty())
        });
        let percent = if baseline == 0 {
            0.0
        } else {
            (live.len() as f64 / baseline as f64) * 100.0
        };
        iterations.push((format!("Loop {}", loop_index + 1), live.len(), percent));
    }

    StatTable::DescendingProgression {
        name: "Rotation stability".to_string(),
        iterations,
    }
}

fn job_metrics(results: &[ProbeResult], duration: Duration) -> JobMetrics {
    let resp_cnt = results.iter().filter(|r| r.status).count();
    let unique: HashSet<&str> = results
        .iter()
        .filter(|r| r.status && !r.proxy_node_ip_addr.is_empty())
        .map(|r| r.proxy_node_ip_addr.as_str())
        .collect();
    JobMetrics {
        duration_ms: duration.as_millis(),
        reqs_cnt: results.len(),
        resp_cnt,
        unique_exit_nodes_ip_cnt: unique.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ok_result(proxy: &str, ip: &str, ttfb: u64, loop_index: u32) -> ProbeResult {
        let mut r = ProbeResult::new(proxy.to_string(), "https://t/ip".to_string(), Utc::now());
        r.status = true;
        r.target_status_code = 200;
        r.proxy_node_ip_addr = ip.to_string();
        r.latency.ttfb = ttfb;
        r.loop_index = loop_index;
        r
    }

    fn err_result(proxy: &str, msg: &str) -> ProbeResult {
        use crate::model::{ProbeError, ProbeErrorKind};
        let mut r = ProbeResult::new(proxy.to_string(), "https://t/ip".to_string(), Utc::now());
        r.error = Some(ProbeError::new(ProbeErrorKind::ProxyConnectFailure, msg));
        r
    }

    #[test]
    fn success_and_error_counts_sum_to_total() {
        let results = vec![
            ok_result("p1", "1.1.1.1", 10, 0),
            ok_result("p2", "2.2.2.2", 20, 0),
            err_result("p3", "boom"),
        ];
        let (tables, metrics) = aggregate(&results, Transport::Tcp, LoopMode::Single, None, Duration::from_secs(1));
        assert_eq!(metrics.reqs_cnt, 3);
        assert_eq!(metrics.resp_cnt, 2);
        assert_eq!(metrics.unique_exit_nodes_ip_cnt, 2);
        let success = tables.iter().find(|t| t.name() == "Success Rate").unwrap();
        if let StatTable::Countable { rows, .. } = success {
            let total: usize = rows.iter().map(|(_, c, _)| c).sum();
            assert_eq!(total, 3);
            let percent_sum: f64 = rows.iter().map(|(_, _, p)| p).sum();
            assert!((percent_sum - 100.0).abs() < 0.01);
        } else {
            panic!("expected countable table");
        }
    }

    #[test]
    fn percentiles_are_monotone_nondecreasing() {
        let results: Vec<ProbeResult> = (1..=20u64).map(|i| ok_result("p", "1.1.1.1", i * 5, 0)).collect();
        let (tables, _) = aggregate(&results, Transport::Tcp, LoopMode::Single, None, Duration::from_secs(1));
        let latency = tables.iter().find(|t| t.name() == "Latency").unwrap();
        if let StatTable::Measurable { metrics, .. } = latency {
            let (_, cols) = metrics.iter().find(|(n, _)| n == "TTFB").unwrap();
            let values: Vec<f64> = cols.iter().map(|(_, v)| *v).collect();
            for w in values.windows(2) {
                assert!(w[0] <= w[1], "{:?}", values);
            }
        } else {
            panic!("expected measurable table");
        }
    }

    #[test]
    fn rotation_never_re_adds_a_dropped_proxy() {
        let results = vec![
            ok_result("p1", "1.1.1.1", 1, 0),
            ok_result("p2", "2.2.2.2", 1, 0),
            ok_result("p1", "1.1.1.1", 1, 1),
            ok_result("p2", "9.9.9.9", 1, 1), // rotated away in loop 2
            ok_result("p1", "1.1.1.1", 1, 2),
            ok_result("p2", "2.2.2.2", 1, 2), // back to original IP, still excluded
        ];
        let loop_mode = LoopMode::Intervaled {
            count: 3,
            interval: Duration::from_millis(10),
        };
        let (tables, _) = aggregate(&results, Transport::Tcp, loop_mode, None, Duration::from_secs(1));
        let rotation = tables.iter().find(|t| t.name() == "Rotation stability").unwrap();
        if let StatTable::DescendingProgression { iterations, .. } = rotation {
            assert_eq!(iterations[0].1, 2);
            assert_eq!(iterations[0].2, 100.0);
            assert_eq!(iterations[1].1, 1);
            assert_eq!(iterations[2].1, 1);
        } else {
            panic!("expected descending progression table");
        }
    }

    #[test]
    fn proxy_status_table_only_emitted_for_http_family_proxies() {
        let results = vec![ok_result("socks5://p1:1080", "1.1.1.1", 1, 0)];
        let (tables, _) = aggregate(&results, Transport::Tcp, LoopMode::Single, None, Duration::from_secs(1));
        assert!(tables.iter().all(|t| t.name() != "Proxy HTTP status codes"));

        let results_http = vec![ok_result("http://p1:8080", "1.1.1.1", 1, 0)];
        let (tables_http, _) = aggregate(&results_http, Transport::Tcp, LoopMode::Single, None, Duration::from_secs(1));
        assert!(tables_http.iter().any(|t| t.name() == "Proxy HTTP status codes"));
    }

    #[test]
    fn empty_batch_yields_zero_results_and_empty_tables() {
        let (tables, metrics) = aggregate(&[], Transport::Tcp, LoopMode::Single, None, Duration::from_secs(0));
        assert_eq!(metrics.reqs_cnt, 0);
        assert_eq!(metrics.resp_cnt, 0);
        let success = tables.iter().find(|t| t.name() == "Success Rate").unwrap();
        if let StatTable::Countable { rows, .. } = success {
            assert!(rows.is_empty());
        }
    }
}
