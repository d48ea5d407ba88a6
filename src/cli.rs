//! Stable CLI surface (§6). Flag names and defaults match the spec exactly,
//! including accepting either one or two leading dashes on every flag (see
//! `normalize_single_dash_long_flags`, applied to argv before parsing);
//! everything else (duration parsing, target-URL parsing, env overrides) is
//! resolved by `config.rs` after `Args::parse_from()`.

use clap::Parser;
use clap_complete::Shell;

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Commands {
    /// Emit a shell completion script and exit.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "proxychick",
    version,
    about = "Validate forward-proxy lists by driving HTTP and SOCKS5-UDP probes through each endpoint"
)]
pub struct Args {
    /// Max concurrent probes in flight.
    #[arg(short = 'c', long = "concurrency", default_value_t = 300)]
    pub concurrency: usize,

    /// Input path, or the literal STDIN.
    #[arg(short = 'i', long = "input", default_value = "STDIN")]
    pub input: String,

    /// Output path, or the literal STDOUT.
    #[arg(short = 'o', long = "output", default_value = "STDOUT")]
    pub output: String,

    /// Default proxy scheme used for lines without an explicit scheme.
    #[arg(short = 'p', long = "proxy-scheme", default_value = "http")]
    pub proxy_scheme: String,

    /// Target URL (TCP transport) or host:port (UDP transport).
    #[arg(short = 't', long = "target")]
    pub target: Option<String>,

    /// Per-phase timeout, e.g. "10s", "500ms".
    #[arg(long = "to", default_value = "10s")]
    pub timeout: String,

    /// Number of passes over the input list.
    #[arg(long = "loop", default_value_t = 1)]
    pub loop_count: u32,

    /// Delay between passes, e.g. "10ms". Zero/absent means no delay.
    #[arg(long = "interval", default_value = "0s")]
    pub interval: String,

    /// "tcp" or "udp".
    #[arg(long = "transport", default_value = "tcp")]
    pub transport: String,

    #[arg(long = "noProgressBar", action = clap::ArgAction::SetTrue)]
    pub no_progress_bar: bool,

    #[arg(long = "noStat", action = clap::ArgAction::SetTrue)]
    pub no_stat: bool,

    /// Path to a MaxMind GeoIP2/GeoLite2 Country database.
    #[arg(long = "countryMmdb")]
    pub country_mmdb: Option<String>,

    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

/// Multi-character flag names that, per §6, are accepted with either one or
/// two leading dashes (inherited from Go's `flag` package, where `-name` and
/// `--name` are interchangeable). clap only recognizes these as `--name`, so
/// rewrite a lone-dash spelling to the double-dash one before `Args::parse`
/// sees it. Single-character flags (`-c`, `-i`, `-o`, `-p`, `-t`) are left
/// alone — they're already single-dash short flags clap understands natively.
const LONG_FLAG_NAMES: &[&str] = &[
    "to",
    "loop",
    "interval",
    "transport",
    "noProgressBar",
    "noStat",
    "countryMmdb",
    "verbose",
    "version",
    "help",
];

/// Rewrites `-flagname[=value]` to `--flagname[=value]` for every name in
/// `LONG_FLAG_NAMES`, leaving everything else (short flags, `--` forms,
/// positional args, values) untouched. Call this on the raw argv before
/// `Args::parse_from`.
pub fn normalize_single_dash_long_flags(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if let Some(rest) = arg.strip_prefix('-') {
                if !rest.starts_with('-') {
                    let name = rest.split('=').next().unwrap_or(rest);
                    if LONG_FLAG_NAMES.contains(&name) {
                        return format!("-{arg}");
                    }
                }
            }
            arg
        })
        .collect()
}
