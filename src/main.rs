use std::{
    error::Error,
    io::{self, BufReader},
    net::IpAddr,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use slog::{Drain, debug, o};

mod connectivity;
use self::connectivity::spawn_monitor;
mod error;
mod fetcher;
use self::fetcher::{FetcherConfig, LocationFetcher, MAX_RETRIES, Phase};
mod location;
use self::location::Slot;
// all network related code is there, and only there
mod network;
use self::network::{DEFAULT_ENDPOINT, HttpLocationSource};
mod runtime;
use self::runtime::{Mode, Runtime, spawn_refresh_reader};
mod view;
use self::view::TerminalView;

/// Look up where your public IP address is located
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Location API to query, must answer with ipapi.co style JSON
    #[arg(long, env = "IPLOCATE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Timeout for every request
    #[arg(long, short = 't', value_name = "SECONDS", default_value_t = 10)]
    timeout: u64,

    /// How often a timed out or failed request is retried
    #[arg(long, value_name = "N", default_value_t = MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=100))]
    max_retries: u32,

    /// The n-th retry waits n times this long
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 2000, value_parser = clap::value_parser!(u64).range(0..=3_600_000))]
    retry_step: u64,

    /// Only show these fields (comma separated, e.g. ip_address,city_name)
    #[arg(long, value_name = "FIELD", value_delimiter = ',')]
    fields: Vec<Slot>,

    /// Round coordinates to N decimals
    #[arg(long, value_name = "N")]
    precision: Option<usize>,

    /// Print the result as a JSON object
    #[arg(long)]
    json: bool,

    /// Keep running, look up again on Enter or when the network comes back (Ctrl-D quits)
    #[arg(long)]
    watch: bool,

    /// Ping this address to notice connectivity changes (needs ICMP permissions)
    #[arg(long, value_name = "IP", requires = "watch")]
    probe: Option<IpAddr>,

    /// Seconds between connectivity probes
    #[arg(long, value_name = "SECONDS", default_value_t = 5)]
    probe_interval: u64,

    #[arg(long, env = "DEBUG")]
    debug: bool,
}

fn make_logger(debug: bool) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .overflow_strategy(slog_async::OverflowStrategy::Block)
        .build()
        .fuse();
    let drain = drain
        .filter_level(if debug {
            slog::Level::Debug
        } else {
            slog::Level::Info
        })
        .fuse();

    slog::Logger::root(drain, o!())
}

fn make_tls_config() -> rustls::client::ClientConfig {
    let verifier = rustls_platform_verifier::Verifier::new();

    rustls::ClientConfig::builder()
        .dangerous() // required to provide our own verifier, but that verifier is safe
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth()
}

fn make_http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .tls_config(Arc::new(make_tls_config()))
        .user_agent(format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).as_str())
        .build()
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli_args = Cli::parse();
    let log = make_logger(cli_args.debug);

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "could not install default crypto provider")?;
    let http_agent = make_http_agent(Duration::from_secs(cli_args.timeout));

    debug!(log, "startup"; "args" => format!("{:?}", cli_args));

    let layout = if cli_args.fields.is_empty() {
        Slot::ALL.to_vec()
    } else {
        cli_args.fields.clone()
    };
    let view = TerminalView::new(io::stdout(), layout, cli_args.json, cli_args.watch);
    let config = FetcherConfig {
        max_retries: cli_args.max_retries,
        retry_step: Duration::from_millis(cli_args.retry_step),
        coordinate_precision: cli_args.precision,
    };
    let fetcher = LocationFetcher::new(&log, view, config);
    let source = HttpLocationSource::new(&log, http_agent, cli_args.endpoint.clone());
    let runtime = Runtime::new(&log, fetcher, source);

    let mut _monitor = None;
    let mode = if cli_args.watch {
        spawn_refresh_reader(&log, BufReader::new(io::stdin()), runtime.sender());
        if let Some(probe) = cli_args.probe {
            _monitor = Some(spawn_monitor(
                &log,
                probe,
                Duration::from_secs(cli_args.probe_interval),
                runtime.sender(),
            )?);
        }
        Mode::Watch
    } else {
        Mode::Once
    };

    let fetcher = runtime.run(mode);
    drop(log); // flush all log messages

    if fetcher.phase() == Phase::Failed {
        return Err(format!(
            "unable to retrieve location information after {} retries",
            fetcher.retry_count()
        )
        .into());
    }
    Ok(())
}
