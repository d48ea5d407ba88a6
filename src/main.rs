mod cli;
mod config;
mod enrich;
mod error;
mod executor;
mod geoip;
mod input;
mod model;
mod normalize;
mod output;
mod pretty;
mod probe_http;
mod probe_udp;
mod socks5;
mod stats;

use std::time::Instant;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;

use cli::{Args, Commands};
use model::{ProbeResult, ProxyEndpoint};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let argv = cli::normalize_single_dash_long_flags(std::env::args());
    let args = Args::parse_from(argv);

    if let Some(Commands::Completions { shell }) = args.cmd {
        let mut cmd = Args::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let debug = config::resolve_debug(args.verbose);
    tracing_subscriber::fmt()
        .with_env_filter(if debug {
            tracing_subscriber::EnvFilter::new("debug")
        } else {
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        })
        .with_writer(std::io::stderr)
        .init();

    let batch_config = config::build_batch_config(&args)?;

    let default_scheme = batch_config.default_proxy_scheme;
    let raw_lines = input::read_proxy_lines(&args.input)?;
    let mut endpoints: Vec<ProxyEndpoint> = Vec::with_capacity(raw_lines.len());
    for line in &raw_lines {
        match normalize::parse_proxy_line(line, default_scheme) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => {
                return Err(error::ConfigError::MalformedProxyLine(format!("{line:?}: {e}")).into());
            }
        }
    }

    let mmdb_path = config::resolve_mmdb_path(args.country_mmdb.as_deref());
    let geoip_resolver = mmdb_path.map(|path| geoip::GeoipResolver::open(path)).transpose()?;

    let total_attempts = endpoints.len() * batch_config.loop_mode.pass_count().max(1) as usize;
    let progress = pretty::build(total_attempts as u64, !args.no_progress_bar);

    let transport = batch_config.transport;
    let loop_mode = batch_config.loop_mode;

    let started = Instant::now();
    let (mut rx, expected) = executor::spawn_batch(endpoints, batch_config);
    let mut results: Vec<ProbeResult> = Vec::with_capacity(expected);
    while let Some(result) = rx.recv().await {
        progress.inc(1);
        results.push(result);
    }
    progress.finish_and_clear();
    let duration = started.elapsed();

    let out_path = if args.output == "STDOUT" { None } else { Some(args.output.as_str()) };
    let format = output::format_for_path(out_path);
    let (tables, metrics) = if args.no_stat {
        (Vec::new(), model::JobMetrics::default())
    } else {
        stats::aggregate(&results, transport, loop_mode, geoip_resolver.as_ref(), duration)
    };
    output::write_report(&results, &tables, &metrics, format, out_path).context("writing report")?;

    Ok(())
}
