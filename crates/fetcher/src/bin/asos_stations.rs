use clap::Parser;
use nexrad_fetcher::{
    parse_station_list, setup_logger, write_stations_csv, AsosService, HttpFetcher, RetryPolicy,
    DEFAULT_STATES,
};
use slog::info;
use std::{io, sync::Arc, time::Duration};

/// Lists ASOS/AWOS stations from the Iowa Environmental Mesonet as CSV
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Comma separated state codes, all 50 states when omitted
    #[arg(short, long)]
    states: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "NEXRAD_SEARCH_LEVEL")]
    level: Option<String>,

    /// HTTP User-Agent header
    #[arg(short, long, env = "NEXRAD_SEARCH_USER_AGENT")]
    user_agent: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let logger = setup_logger(args.level.as_deref());

    let states = match args.states.as_deref() {
        Some(states) => parse_station_list(states),
        None => DEFAULT_STATES.iter().map(|s| s.to_string()).collect(),
    };
    info!(logger, "fetching ASOS networks for {} states", states.len());

    let user_agent = args
        .user_agent
        .unwrap_or_else(|| format!("nexrad-fetcher/{}", env!("CARGO_PKG_VERSION")));
    let fetcher = Arc::new(HttpFetcher::new(
        logger.clone(),
        &user_agent,
        Duration::from_secs(60),
    )?);
    let service = AsosService::new(logger, fetcher, RetryPolicy::default());
    let stations = service.get_network_stations(&states).await;

    write_stations_csv(io::stdout().lock(), &stations)?;
    Ok(())
}
