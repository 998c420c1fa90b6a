use anyhow::{anyhow, Error};
use clap::Parser;
use futures::TryStreamExt;
use nexrad_search_core::{
    find_config_file, find_data_file, is_directory, load_config, ConfigSource, DEFAULT_BUCKET_URL,
    DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_KEY_SUFFIX, DEFAULT_MAX_WORKERS,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS,
};
use reqwest::{Client, StatusCode};
use slog::{debug, o, warn, Drain, Level, Logger};
use std::{env, future::Future, path::PathBuf, time::Duration};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};
use tokio::time::sleep;
use tokio_util::compat::FuturesAsyncReadCompatExt;

use crate::{ArchiveError, Domain, ObjectReader, SearchError, StationCatalog, WrfGrid};

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "NEXRAD fetcher - finds and downloads Level II radar archives covering a domain"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $NEXRAD_SEARCH_CONFIG, ./nexrad-search.toml,
    /// $XDG_CONFIG_HOME/nexrad-search/nexrad-search.toml, /etc/nexrad-search/nexrad-search.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "NEXRAD_SEARCH_LEVEL")]
    pub level: Option<String>,

    /// Base URL of the Level II bucket
    #[arg(long, env = "NEXRAD_SEARCH_BUCKET_URL")]
    pub bucket_url: Option<String>,

    /// Existing directory downloads are written to
    #[arg(short, long, env = "NEXRAD_SEARCH_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Maximum concurrent downloads
    #[arg(short = 'w', long, env = "NEXRAD_SEARCH_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Attempts per listing or download before giving up
    #[arg(long, env = "NEXRAD_SEARCH_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<usize>,

    /// Seconds to wait between attempts
    #[arg(long, env = "NEXRAD_SEARCH_RETRY_DELAY_SECS")]
    pub retry_delay_secs: Option<u64>,

    /// Seconds a single download may take, retries included
    #[arg(long, env = "NEXRAD_SEARCH_DOWNLOAD_TIMEOUT_SECS")]
    pub download_timeout_secs: Option<u64>,

    /// JSON station catalog to use instead of the bundled one
    #[arg(long, env = "NEXRAD_SEARCH_STATION_CATALOG")]
    pub station_catalog: Option<String>,

    /// Only keys ending with this suffix are kept
    #[arg(long)]
    pub key_suffix: Option<String>,

    /// Gunzip files while downloading
    #[arg(long)]
    pub decompress: Option<bool>,

    /// Search from the end of the dual polarization upgrade (2013-08-01) onwards
    #[arg(long)]
    pub dual_pol_only: Option<bool>,

    /// HTTP User-Agent header
    #[arg(short, long, env = "NEXRAD_SEARCH_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Talk to the bucket through the AWS SDK (requires the `s3` feature)
    #[arg(long)]
    pub use_sdk: Option<bool>,

    /// Endpoint for the AWS SDK client, e.g. a local S3 mirror. The SDK
    /// resolves the regional endpoint when unset.
    #[arg(long, env = "NEXRAD_SEARCH_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Start of the time window, RFC 3339 or YYYY-MM-DDTHH:MM:SS in UTC
    #[arg(short, long)]
    pub start: Option<String>,

    /// End of the time window, RFC 3339 or YYYY-MM-DDTHH:MM:SS in UTC
    #[arg(short, long)]
    pub end: Option<String>,

    /// Domain as min_lon,min_lat,max_lon,max_lat
    #[arg(long, allow_hyphen_values = true)]
    pub bbox: Option<String>,

    /// Domain as a WRF grid: dx,dy,e_sn,e_we,ref_lat,ref_lon
    #[arg(long, allow_hyphen_values = true)]
    pub wrf_grid: Option<String>,

    /// Height of interest in meters above sea level
    #[arg(long)]
    pub height: Option<f64>,

    /// Comma separated station ids, skips the domain search
    #[arg(long)]
    pub stations: Option<String>,

    /// Print matching keys and exit without downloading
    #[arg(long)]
    #[serde(default)]
    pub list_only: bool,
}

impl Cli {
    pub fn bucket_url(&self) -> String {
        self.bucket_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BUCKET_URL.to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(
            self.data_dir
                .clone()
                .unwrap_or_else(|| "./data/raw".to_string()),
        )
    }

    /// The download directory, which has to exist unless only listing
    pub fn destination(&self) -> Result<PathBuf, SearchError> {
        let dir = self.data_dir();
        if !self.list_only && !is_directory(&dir) {
            return Err(SearchError::MissingDestination(dir.display().to_string()));
        }
        Ok(dir)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            delay: Duration::from_secs(self.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS)),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(
            self.download_timeout_secs
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        )
    }

    pub fn key_suffix(&self) -> String {
        self.key_suffix
            .clone()
            .unwrap_or_else(|| DEFAULT_KEY_SUFFIX.to_string())
    }

    pub fn decompress(&self) -> bool {
        self.decompress.unwrap_or(false)
    }

    pub fn dual_pol_only(&self) -> bool {
        self.dual_pol_only.unwrap_or(false)
    }

    pub fn use_sdk(&self) -> bool {
        self.use_sdk.unwrap_or(false)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("nexrad-fetcher/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn start(&self) -> Result<OffsetDateTime, Error> {
        let raw = self
            .start
            .as_deref()
            .ok_or_else(|| anyhow!("a start time is required (--start)"))?;
        parse_datetime(raw)
    }

    pub fn end(&self) -> Result<OffsetDateTime, Error> {
        let raw = self
            .end
            .as_deref()
            .ok_or_else(|| anyhow!("an end time is required (--end)"))?;
        parse_datetime(raw)
    }

    /// Explicit station list, upper-cased, if one was given
    pub fn stations(&self) -> Option<Vec<String>> {
        self.stations.as_deref().map(parse_station_list)
    }

    /// The search domain from either `bbox` or `wrf_grid`
    pub fn domain(&self) -> Result<Domain, Error> {
        let height = self
            .height
            .ok_or_else(|| anyhow!("a height in meters is required (--height)"))?;
        match (self.bbox.as_deref(), self.wrf_grid.as_deref()) {
            (Some(bbox), _) => {
                let [min_lon, min_lat, max_lon, max_lat] = parse_numbers::<4>(bbox, "bbox")?;
                Ok(Domain::new(min_lat, min_lon, max_lat, max_lon, height)?)
            }
            (None, Some(grid)) => {
                let grid = parse_wrf_grid(grid)?;
                Ok(Domain::from_wrf_grid(&grid, height)?)
            }
            (None, None) => Err(anyhow!(
                "a domain is required (--bbox or --wrf-grid), or pass --stations"
            )),
        }
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("NEXRAD_SEARCH_CONFIG", "nexrad-search.toml")
    };

    let file_config: Cli = load_config(&source).unwrap_or_default();

    merge_config(cli_args, file_config)
}

/// CLI args override file config (env vars are handled by clap)
fn merge_config(cli_args: Cli, file_config: Cli) -> Cli {
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        bucket_url: cli_args.bucket_url.or(file_config.bucket_url),
        data_dir: cli_args.data_dir.or(file_config.data_dir),
        max_workers: cli_args.max_workers.or(file_config.max_workers),
        retry_attempts: cli_args.retry_attempts.or(file_config.retry_attempts),
        retry_delay_secs: cli_args.retry_delay_secs.or(file_config.retry_delay_secs),
        download_timeout_secs: cli_args
            .download_timeout_secs
            .or(file_config.download_timeout_secs),
        station_catalog: cli_args.station_catalog.or(file_config.station_catalog),
        key_suffix: cli_args.key_suffix.or(file_config.key_suffix),
        decompress: cli_args.decompress.or(file_config.decompress),
        dual_pol_only: cli_args.dual_pol_only.or(file_config.dual_pol_only),
        user_agent: cli_args.user_agent.or(file_config.user_agent),
        use_sdk: cli_args.use_sdk.or(file_config.use_sdk),
        s3_endpoint: cli_args.s3_endpoint.or(file_config.s3_endpoint),
        start: cli_args.start.or(file_config.start),
        end: cli_args.end.or(file_config.end),
        bbox: cli_args.bbox.or(file_config.bbox),
        wrf_grid: cli_args.wrf_grid.or(file_config.wrf_grid),
        height: cli_args.height.or(file_config.height),
        stations: cli_args.stations.or(file_config.stations),
        list_only: cli_args.list_only || file_config.list_only,
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub fn setup_logger(level: Option<&str>) -> Logger {
    let log_level = match level {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    };

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

/// Catalog from an explicit path, else the user's data directory, else the
/// one compiled in
pub fn load_catalog(cli: &Cli, logger: &Logger) -> Result<StationCatalog, SearchError> {
    let catalog = match cli.station_catalog.as_ref() {
        Some(path) => StationCatalog::load(&PathBuf::from(path))?,
        None => match find_data_file("stations.json") {
            Some(path) => StationCatalog::load(&path)?,
            None => StationCatalog::bundled()?,
        },
    };
    if catalog.is_empty() {
        return Err(SearchError::EmptyCatalog);
    }
    debug!(logger, "station catalog holds {} stations", catalog.len());
    Ok(catalog)
}

/// Accepts RFC 3339, or a bare `YYYY-MM-DDTHH:MM:SS` taken as UTC
pub fn parse_datetime(raw: &str) -> Result<OffsetDateTime, Error> {
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(parsed);
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(raw, naive)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| anyhow!("invalid time '{}': {}", raw, e))
}

pub fn parse_station_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_numbers<const N: usize>(raw: &str, what: &str) -> Result<[f64; N], Error> {
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|e| anyhow!("invalid {} '{}': {}", what, raw, e))?;
    values
        .try_into()
        .map_err(|v: Vec<f64>| anyhow!("{} needs {} values, got {}", what, N, v.len()))
}

pub fn parse_wrf_grid(raw: &str) -> Result<WrfGrid, Error> {
    let [dx, dy, e_sn, e_we, ref_lat, ref_lon] = parse_numbers::<6>(raw, "wrf grid")?;
    if e_sn < 1.0 || e_we < 1.0 || e_sn.fract() != 0.0 || e_we.fract() != 0.0 {
        return Err(anyhow!("e_sn and e_we must be positive whole numbers"));
    }
    Ok(WrfGrid {
        dx,
        dy,
        e_sn: e_sn as u32,
        e_we: e_we as u32,
        ref_lat,
        ref_lon,
    })
}

/// Fixed-delay retry for connection level failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds, fails with a non-transient error,
    /// or the attempts are used up.
    pub async fn run<T, F, Fut>(
        &self,
        logger: &Logger,
        what: &str,
        mut operation: F,
    ) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        logger,
                        "attempt {}/{} for {} failed: {}, retrying in {}s",
                        attempt,
                        attempts,
                        what,
                        err,
                        self.delay.as_secs_f64()
                    );
                    sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub struct HttpFetcher {
    logger: Logger,
    client: Client,
    request_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(
        logger: Logger,
        user_agent: &str,
        request_timeout: Duration,
    ) -> Result<HttpFetcher, Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            logger,
            client,
            request_timeout,
        })
    }

    pub async fn fetch_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, ArchiveError> {
        debug!(self.logger, "requesting: {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ArchiveError::Transient(format!("error sending request: {}", e)))?;
        check_status(response.status(), url)?;

        response
            .text()
            .await
            .map_err(|e| ArchiveError::Transient(format!("error reading body of request: {}", e)))
    }

    /// Streams a body without an overall timeout, callers bound it themselves
    pub async fn fetch_stream(&self, url: &str) -> Result<ObjectReader, ArchiveError> {
        debug!(self.logger, "requesting: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ArchiveError::Transient(format!("error sending request: {}", e)))?;
        check_status(response.status(), url)?;

        let stream = response
            .bytes_stream()
            .map_err(|e| futures::io::Error::new(futures::io::ErrorKind::Other, e))
            .into_async_read()
            .compat();
        Ok(Box::pin(stream))
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<(), ArchiveError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(ArchiveError::NotFound(url.to_string()))
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(ArchiveError::Transient(format!("{} returned {}", url, status)))
    } else {
        Err(ArchiveError::Status(status.as_u16(), url.to_string()))
    }
}
