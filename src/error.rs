//! Fatal, process-level error taxonomy (§7 `ConfigError`). Per-probe errors
//! never reach here — they're typed as `ProbeError` in `model.rs` and
//! rendered into a `ProbeResult`, not propagated.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't parse target URL: {0}")]
    InvalidTargetUrl(String),

    #[error("can't parse timeout: {0}")]
    InvalidTimeout(String),

    #[error("can't read input file {path}: {source}")]
    UnreadableInput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed proxy line: {0}")]
    MalformedProxyLine(String),

    #[error("can't open GeoIP database at {path}: {source}")]
    UnreadableGeoipDb {
        path: PathBuf,
        #[source]
        source: maxminddb::MaxMindDbError,
    },

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("can't write output to {path}: {source}")]
    UnwritableOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
