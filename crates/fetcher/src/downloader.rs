use async_compression::tokio::bufread::GzipDecoder;
use nexrad_search_core::{is_directory, key_basename, staging_path, DEFAULT_DOWNLOAD_TIMEOUT_SECS};
use slog::{debug, error, info, warn, Logger};
use std::{
    collections::{HashMap, HashSet},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufReader},
    sync::Semaphore,
    task::JoinSet,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{ArchiveError, ArchiveStore, RetryPolicy, SearchError};

/// What happened to one requested key
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub key: String,
    pub destination: PathBuf,
    pub success: bool,
}

/// Fetches archive keys into a directory with a bounded number of workers
pub struct Downloader {
    logger: Logger,
    archive: Arc<dyn ArchiveStore>,
    retry: RetryPolicy,
    timeout: Duration,
    decompress: bool,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(logger: Logger, archive: Arc<dyn ArchiveStore>, retry: RetryPolicy) -> Self {
        Self {
            logger,
            archive,
            retry,
            timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            decompress: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Upper bound on one key, retries included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Gunzip while writing and drop `.gz` from the file name
    pub fn with_decompression(mut self, decompress: bool) -> Self {
        self.decompress = decompress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn destination_for(&self, key: &str, destination_dir: &Path) -> PathBuf {
        let name = key_basename(key);
        let name = if self.decompress {
            name.strip_suffix(".gz").unwrap_or(name)
        } else {
            name
        };
        destination_dir.join(name)
    }

    /// Downloads every key into `destination_dir`, at most `max_workers` at a
    /// time, and waits for all of them.
    ///
    /// Outcomes are reported in completion order. A key is only marked
    /// successful once its complete file sits at the destination path.
    pub async fn download_all(
        &self,
        keys: &[String],
        destination_dir: &Path,
        max_workers: usize,
    ) -> Result<Vec<DownloadOutcome>, SearchError> {
        if !is_directory(destination_dir) {
            error!(
                self.logger,
                "Destination directory does not exist: {}",
                destination_dir.display()
            );
            return Err(SearchError::MissingDestination(
                destination_dir.display().to_string(),
            ));
        }
        if max_workers == 0 {
            return Err(SearchError::InvalidWorkerLimit);
        }

        info!(
            self.logger,
            "downloading {} keys with {} workers into {}",
            keys.len(),
            max_workers,
            destination_dir.display()
        );

        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::with_capacity(keys.len());
        let mut requested = HashSet::new();
        let mut claimed = HashSet::new();
        let mut running = HashMap::new();

        for key in keys {
            if !requested.insert(key.as_str()) {
                debug!(self.logger, "{} requested twice, downloading once", key);
                continue;
            }

            let destination = self.destination_for(key, destination_dir);
            if !claimed.insert(destination.clone()) {
                warn!(
                    self.logger,
                    "{} would overwrite {}, skipping",
                    key,
                    destination.display()
                );
                outcomes.push(DownloadOutcome {
                    key: key.clone(),
                    destination,
                    success: false,
                });
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                warn!(self.logger, "download of {} cancelled before it started", key);
                outcomes.push(DownloadOutcome {
                    key: key.clone(),
                    destination,
                    success: false,
                });
                continue;
            };

            let task = self.task(key, destination.clone());
            let handle = tasks.spawn(async move {
                let outcome = task.run().await;
                drop(permit);
                outcome
            });
            running.insert(handle.id(), (key.clone(), destination));
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    running.remove(&id);
                    outcomes.push(outcome);
                }
                Err(err) => {
                    let Some((key, destination)) = running.remove(&err.id()) else {
                        error!(self.logger, "unknown download worker failed: {}", err);
                        continue;
                    };
                    error!(self.logger, "download worker for {} failed: {}", key, err);
                    remove_staged(&self.logger, &staging_path(&destination)).await;
                    outcomes.push(DownloadOutcome {
                        key,
                        destination,
                        success: false,
                    });
                }
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            self.logger,
            "{} of {} downloads succeeded",
            succeeded,
            outcomes.len()
        );
        Ok(outcomes)
    }

    fn task(&self, key: &str, destination: PathBuf) -> DownloadTask {
        DownloadTask {
            logger: self.logger.clone(),
            archive: self.archive.clone(),
            retry: self.retry,
            timeout: self.timeout,
            decompress: self.decompress,
            cancel: self.cancel.clone(),
            key: key.to_string(),
            destination,
        }
    }
}

struct DownloadTask {
    logger: Logger,
    archive: Arc<dyn ArchiveStore>,
    retry: RetryPolicy,
    timeout: Duration,
    decompress: bool,
    cancel: CancellationToken,
    key: String,
    destination: PathBuf,
}

impl DownloadTask {
    async fn run(self) -> DownloadOutcome {
        let staging = staging_path(&self.destination);

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ArchiveError::Cancelled),
            fetched = timeout(self.timeout, self.fetch_with_retry(&staging)) => {
                fetched.unwrap_or_else(|_| Err(ArchiveError::Timeout(self.timeout.as_secs())))
            }
        };
        let result = match fetched {
            Ok(()) => fs::rename(&staging, &self.destination)
                .await
                .map_err(ArchiveError::from),
            Err(err) => Err(err),
        };

        let success = match result {
            Ok(()) => {
                info!(self.logger, "downloaded {}", self.destination.display());
                true
            }
            Err(ArchiveError::NotFound(_)) => {
                warn!(self.logger, "Unable to find file {}, skipping", self.key);
                self.discard(&staging).await;
                false
            }
            Err(err) => {
                error!(self.logger, "failed to download {}: {}", self.key, err);
                self.discard(&staging).await;
                false
            }
        };

        DownloadOutcome {
            key: self.key,
            destination: self.destination,
            success,
        }
    }

    async fn fetch_with_retry(&self, staging: &Path) -> Result<(), ArchiveError> {
        self.retry
            .run(&self.logger, &self.key, || self.fetch_once(staging))
            .await
    }

    async fn fetch_once(&self, staging: &Path) -> Result<(), ArchiveError> {
        let reader = self.archive.fetch_object(&self.key).await?;
        let mut file = File::create(staging).await?;

        let copied = if self.decompress {
            let mut decoder = GzipDecoder::new(BufReader::new(reader));
            tokio::io::copy(&mut decoder, &mut file).await
        } else {
            let mut reader = reader;
            tokio::io::copy(&mut reader, &mut file).await
        };
        let bytes = copied.map_err(|e| match e.kind() {
            ErrorKind::InvalidData => ArchiveError::Malformed(format!("{}: {}", self.key, e)),
            _ => ArchiveError::Transient(format!("reading {} failed: {}", self.key, e)),
        })?;
        file.flush().await?;

        debug!(self.logger, "wrote {} bytes for {}", bytes, self.key);
        Ok(())
    }

    /// Removes a partial download, if one was written
    async fn discard(&self, staging: &Path) {
        remove_staged(&self.logger, staging).await;
    }
}

async fn remove_staged(logger: &Logger, staging: &Path) {
    if let Err(err) = fs::remove_file(staging).await {
        if err.kind() != ErrorKind::NotFound {
            warn!(
                logger,
                "could not remove partial file {}: {}",
                staging.display(),
                err
            );
        }
    }
}
