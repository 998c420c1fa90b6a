use anyhow::anyhow;
use nexrad_fetcher::{
    get_config_info, load_catalog, relevant_stations, setup_logger, ArchiveStore, Cli,
    Downloader, HttpArchive, HttpFetcher, KeyEnumerator, DUAL_POL_DEPLOYMENT_COMPLETION,
    S3_NEXRAD_START,
};
use slog::{error, info, warn, Logger};
use std::{sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = get_config_info();
    let logger = setup_logger(cli.level.as_deref());

    info!(logger, "NEXRAD fetcher starting...");
    info!(logger, "  Bucket: {}", cli.bucket_url());
    info!(logger, "  Data dir: {}", cli.data_dir().display());
    info!(logger, "  Workers: {}", cli.max_workers());

    let start = cli.start()?;
    let end = cli.end()?;
    let destination = cli.destination()?;
    let catalog = Arc::new(load_catalog(&cli, &logger)?);

    let station_ids = match cli.stations() {
        Some(stations) => stations,
        None => {
            let domain = cli.domain()?;
            relevant_stations(&domain, &catalog, &logger)?
        }
    };
    if station_ids.is_empty() {
        warn!(logger, "no radar can observe the requested domain");
        return Ok(());
    }
    info!(logger, "stations: {}", station_ids.join(","));

    let fetcher = Arc::new(HttpFetcher::new(
        logger.clone(),
        &cli.user_agent(),
        Duration::from_secs(60),
    )?);
    let archive = build_archive(&cli, &logger, fetcher).await?;

    let archive_start = if cli.dual_pol_only() {
        DUAL_POL_DEPLOYMENT_COMPLETION
    } else {
        S3_NEXRAD_START
    };
    let enumerator = KeyEnumerator::new(
        logger.clone(),
        archive.clone(),
        catalog.clone(),
        cli.retry_policy(),
    )
    .with_key_suffix(&cli.key_suffix())
    .with_archive_start(archive_start);
    let keys = enumerator.list_keys(start, end, &station_ids).await?;

    if cli.list_only {
        for key in &keys {
            println!("{}", key);
        }
        return Ok(());
    }
    if keys.is_empty() {
        info!(logger, "no archive files in the requested window");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone(), logger.clone()));

    let downloader = Downloader::new(logger.clone(), archive, cli.retry_policy())
        .with_timeout(cli.download_timeout())
        .with_decompression(cli.decompress())
        .with_cancellation(cancel);
    let outcomes = downloader
        .download_all(&keys, &destination, cli.max_workers())
        .await?;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.key.as_str())
        .collect();
    if !failed.is_empty() {
        error!(logger, "{} downloads failed", failed.len());
        for key in &failed {
            error!(logger, "  {}", key);
        }
        return Err(anyhow!("{} of {} downloads failed", failed.len(), outcomes.len()));
    }
    Ok(())
}

async fn build_archive(
    cli: &Cli,
    logger: &Logger,
    fetcher: Arc<HttpFetcher>,
) -> Result<Arc<dyn ArchiveStore>, anyhow::Error> {
    if cli.use_sdk() {
        #[cfg(feature = "s3")]
        {
            let archive = nexrad_fetcher::S3Archive::new(
                nexrad_search_core::DEFAULT_BUCKET.to_string(),
                nexrad_search_core::DEFAULT_BUCKET_REGION.to_string(),
                cli.s3_endpoint.clone(),
                logger.clone(),
            )
            .await?;
            return Ok(Arc::new(archive));
        }
        #[cfg(not(feature = "s3"))]
        warn!(
            logger,
            "use_sdk requested but built without the s3 feature, using HTTP"
        );
    }
    Ok(Arc::new(HttpArchive::new(
        logger.clone(),
        fetcher,
        &cli.bucket_url(),
    )))
}

/// Cancels outstanding downloads on Ctrl+C or SIGTERM
async fn cancel_on_shutdown(cancel: CancellationToken, logger: Logger) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(logger, "failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(logger, "failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!(logger, "shutdown requested, cancelling downloads");
    cancel.cancel();
}
