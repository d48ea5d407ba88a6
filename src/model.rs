//! Core data types shared by every component: normalized proxy endpoints,
//! probe targets, latency breakdowns, per-attempt results and job metrics.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proxy schemes accepted on the stable surface (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks4a,
    Socks5,
    Socks5h,
}

impl ProxyScheme {
    pub const ALL: [ProxyScheme; 6] = [
        ProxyScheme::Http,
        ProxyScheme::Https,
        ProxyScheme::Socks4,
        ProxyScheme::Socks4a,
        ProxyScheme::Socks5,
        ProxyScheme::Socks5h,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks4a => "socks4a",
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Socks5h => "socks5h",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    pub fn is_http_family(&self) -> bool {
        matches!(self, ProxyScheme::Http | ProxyScheme::Https)
    }

    pub fn is_socks5(&self) -> bool {
        matches!(self, ProxyScheme::Socks5 | ProxyScheme::Socks5h)
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical, immutable proxy endpoint produced by the normalizer (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Echo form used for `Result.ProxyURL` — deliberately omits the
    /// password so CSV/JSON output never leaks credentials.
    pub fn display_url(&self) -> String {
        match &self.user {
            Some(user) => format!("{}://{}@{}:{}", self.scheme, user, self.host, self.port),
            None => format!("{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}

/// Probe target, TCP or UDP mode (§3). Mutually exclusive with the batch's
/// transport mode: a TCP batch always carries `Tcp`, a UDP batch `Udp`.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    Tcp {
        scheme: String,
        host: String,
        port: u16,
        path: String,
    },
    Udp {
        host: String,
        port: u16,
    },
}

impl TargetSpec {
    /// The string stored verbatim in `Result.TargetURL` and matched against
    /// the enricher's introspection-endpoint whitelist.
    pub fn url_string(&self) -> String {
        match self {
            TargetSpec::Tcp {
                scheme,
                host,
                port,
                path,
            } => {
                let default_port = if scheme == "https" { 443 } else { 80 };
                if *port == default_port {
                    format!("{scheme}://{host}{path}")
                } else {
                    format!("{scheme}://{host}:{port}{path}")
                }
            }
            TargetSpec::Udp { host, port } => format!("{host}:{port}"),
        }
    }
}

/// Five non-negative-millisecond phase timings (§3). A phase not reached
/// during a given attempt keeps its zero value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    pub ttfb: u64,
    pub dns_resolve: u64,
    pub connect: u64,
    pub tls_handshake: u64,
    pub proxy_resp: u64,
}

/// Error kind tags (§7). Not surfaced directly in serialized output — only
/// `Result.Error`'s rendered message is — but used internally to decide
/// enrichment and test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProbeErrorKind {
    #[error("malformed proxy")]
    MalformedProxy,
    #[error("proxy connect failure")]
    ProxyConnectFailure,
    #[error("target connect failure")]
    TargetConnectFailure,
    #[error("proxy protocol error")]
    ProxyProtocolError,
}

/// A typed probe error: the kind plus the human message stored in `Result.Error`.
#[derive(Debug, Clone)]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// CSV-safe rendering: commas become semicolons so the error column
    /// never breaks the row shape (§4.6, ported from the Go original's
    /// `PChickError.MarshalCSV`).
    pub fn csv_message(&self) -> String {
        self.message.replace(',', ";")
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One probe attempt's outcome (§3). `RespPayload` and `ProxyRespHeader`
/// are excluded from `Serialize` — they exist only for the enricher to
/// read before the Result is handed to the Aggregator / Output Writer.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    #[serde(rename = "proxy")]
    pub proxy_url: String,
    #[serde(rename = "result")]
    pub status: bool,
    #[serde(rename = "endpoint")]
    pub target_url: String,
    pub target_status_code: u16,
    pub proxy_status_code: u16,
    pub latency: LatencyBreakdown,
    pub proxy_serv_ip_addr: String,
    pub proxy_node_ip_addr: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ProbeError>,
    pub timestamp: DateTime<Utc>,

    /// Raw reply body. Stripped before serialization (`#[serde(skip)]`);
    /// carried only so the Enricher can parse it.
    #[serde(skip)]
    pub resp_payload: String,
    /// CONNECT response headers, HTTP-CONNECT probes only. Stripped before
    /// serialization for the same reason.
    #[serde(skip)]
    pub proxy_resp_header: Vec<(String, String)>,

    /// Which loop pass (0-based) produced this Result. Internal only —
    /// used by the Aggregator's rotation analysis (§4.6), never on the
    /// wire.
    #[serde(skip)]
    pub loop_index: u32,
}

fn serialize_error<S>(err: &Option<ProbeError>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match err {
        Some(e) => s.serialize_str(&e.csv_message()),
        None => s.serialize_str(""),
    }
}

impl ProbeResult {
    pub fn new(proxy_url: String, target_url: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            proxy_url,
            status: false,
            target_url,
            target_status_code: 0,
            proxy_status_code: 0,
            latency: LatencyBreakdown::default(),
            proxy_serv_ip_addr: String::new(),
            proxy_node_ip_addr: String::new(),
            error: None,
            timestamp,
            resp_payload: String::new(),
            proxy_resp_header: Vec::new(),
            loop_index: 0,
        }
    }

    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.csv_message())
            .unwrap_or_default()
    }
}

/// Transport mode selected for the whole batch (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// The three looping modes of §4.5, modeled as a closed sum instead of a
/// re-derived `(loop, interval)` pair at every call site.
#[derive(Debug, Clone, Copy)]
pub enum LoopMode {
    Single,
    Flatten { count: u32 },
    Intervaled { count: u32, interval: Duration },
}

impl LoopMode {
    pub fn from_loop_and_interval(loop_count: u32, interval: Duration) -> Self {
        if loop_count <= 1 {
            LoopMode::Single
        } else if interval.is_zero() {
            LoopMode::Flatten { count: loop_count }
        } else {
            LoopMode::Intervaled {
                count: loop_count,
                interval,
            }
        }
    }

    pub fn pass_count(&self) -> u32 {
        match self {
            LoopMode::Single => 1,
            LoopMode::Flatten { count } => *count,
            LoopMode::Intervaled { count, .. } => *count,
        }
    }
}

/// Batch-wide configuration (§3). Owned by the caller, borrowed by the
/// executor for the duration of a batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_concurrency: usize,
    pub target: TargetSpec,
    pub timeout: Duration,
    pub transport: Transport,
    pub default_proxy_scheme: ProxyScheme,
    pub loop_mode: LoopMode,
    pub debug: bool,
}

/// Scalar run summary (§3).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobMetrics {
    pub duration_ms: u128,
    pub reqs_cnt: usize,
    pub resp_cnt: usize,
    pub unique_exit_nodes_ip_cnt: usize,
}

/// The fixed percentile columns every Measurable table reports (§4.6).
pub const PERCENTILES: [u8; 7] = [50, 75, 85, 90, 95, 99, 100];

/// A tagged rendering-ready stat table (§3). Three shapes share one
/// capability set (`render` in `pretty.rs`) rather than a class tree.
#[derive(Debug, Clone)]
pub enum StatTable {
    Countable {
        name: String,
        /// (value, count, percent), sorted by count descending.
        rows: Vec<(String, usize, f64)>,
    },
    Measurable {
        name: String,
        /// (row label, percentile -> value in ms), one row per latency phase.
        metrics: Vec<(String, Vec<(u8, f64)>)>,
    },
    DescendingProgression {
        name: String,
        /// (label, value, percent-of-first-row).
        iterations: Vec<(String, usize, f64)>,
    },
}

impl StatTable {
    pub fn name(&self) -> &str {
        match self {
            StatTable::Countable { name, .. } => name,
            StatTable::Measurable { name, .. } => name,
            StatTable::DescendingProgression { name, .. } => name,
        }
    }
}
