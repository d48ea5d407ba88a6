//! Assembles a `BatchConfig` from parsed CLI args plus environment
//! overrides (§6 "Environment").

use std::time::Duration;

use url::Url;

use crate::cli::Args;
use crate::error::ConfigError;
use crate::model::{BatchConfig, LoopMode, ProxyScheme, TargetSpec, Transport};

const DEFAULT_TCP_TARGET: &str = "https://api.datascrape.tech/latest/ip";
const DEFAULT_UDP_TARGET: &str = "api.datascrape.tech:80";

pub const ENV_DEBUG: &str = "PROXYCHICK_DEBUG";
pub const ENV_MMDB_COUNTRY: &str = "PROXYCHICK_MMDB_COUNTRY";

/// Resolves `-verbose`/`PROXYCHICK_DEBUG` into one "should we log at debug
/// level" flag. `-verbose` wins when both are present (§6).
pub fn resolve_debug(verbose_flag: bool) -> bool {
    verbose_flag || std::env::var(ENV_DEBUG).is_ok_and(|v| !v.is_empty())
}

/// Resolves `-countryMmdb`/`PROXYCHICK_MMDB_COUNTRY` into an optional path.
/// The CLI flag wins when both are present.
pub fn resolve_mmdb_path(flag: Option<&str>) -> Option<String> {
    flag.map(|s| s.to_string())
        .or_else(|| std::env::var(ENV_MMDB_COUNTRY).ok().filter(|v| !v.is_empty()))
}

fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|_| ConfigError::InvalidTimeout(raw.to_string()))
}

fn parse_tcp_target(raw: &str) -> Result<TargetSpec, ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidTargetUrl(raw.to_string()))?;
    let scheme = url.scheme().to_string();
    if scheme != "http" && scheme != "https" {
        return Err(ConfigError::InvalidTargetUrl(raw.to_string()));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidTargetUrl(raw.to_string()))?
        .to_string();
    let port = url.port().unwrap_or(if scheme == "https" { 443 } else { 80 });
    let mut path = url.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok(TargetSpec::Tcp {
        scheme,
        host,
        port,
        path,
    })
}

fn parse_udp_target(raw: &str) -> Result<TargetSpec, ConfigError> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidTargetUrl(raw.to_string()))?;
    let host = host.trim_start_matches("udp://");
    let port: u16 = port.parse().map_err(|_| ConfigError::InvalidTargetUrl(raw.to_string()))?;
    Ok(TargetSpec::Udp {
        host: host.to_string(),
        port,
    })
}

/// Turns the parsed `Args` into a `BatchConfig`, a `Transport`, the default
/// proxy scheme, and the input/output paths. Selecting UDP transport forces
/// the default proxy scheme to `socks5` regardless of `-p` (§6 "Defaults").
pub fn build_batch_config(args: &Args) -> Result<BatchConfig, ConfigError> {
    let transport = match args.transport.as_str() {
        "tcp" => Transport::Tcp,
        "udp" => Transport::Udp,
        other => return Err(ConfigError::UnsupportedTransport(other.to_string())),
    };

    let default_proxy_scheme = if transport == Transport::Udp {
        ProxyScheme::Socks5
    } else {
        ProxyScheme::parse(&args.proxy_scheme)
            .ok_or_else(|| ConfigError::InvalidTargetUrl(args.proxy_scheme.clone()))?
    };

    let target = match transport {
        Transport::Tcp => parse_tcp_target(args.target.as_deref().unwrap_or(DEFAULT_TCP_TARGET))?,
        Transport::Udp => parse_udp_target(args.target.as_deref().unwrap_or(DEFAULT_UDP_TARGET))?,
    };

    let timeout = parse_duration(&args.timeout)?;
    let interval = parse_duration(&args.interval)?;
    let loop_mode = LoopMode::from_loop_and_interval(args.loop_count.max(1), interval);

    Ok(BatchConfig {
        max_concurrency: args.concurrency,
        target,
        timeout,
        transport,
        default_proxy_scheme,
        loop_mode,
        debug: resolve_debug(args.verbose),
    })
}
