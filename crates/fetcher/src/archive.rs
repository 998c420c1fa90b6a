use async_trait::async_trait;
use serde::Deserialize;
use slog::{debug, Logger};
use std::{pin::Pin, sync::Arc};
use tokio::io::AsyncRead;

use crate::{ArchiveError, HttpFetcher};

/// Body of one archive object, read as it arrives
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Read access to a Level II archive laid out as `YYYY/MM/DD/STATION/file`
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Every key under `prefix`, across all listing pages
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, ArchiveError>;

    /// The stored bytes of a single object
    async fn fetch_object(&self, key: &str) -> Result<ObjectReader, ArchiveError>;
}

/// One page of an S3 `ListObjectsV2` response
#[derive(Debug, Default, Deserialize)]
pub struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ListedObject>,
    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,
    #[serde(rename = "NextContinuationToken", default)]
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListedObject {
    #[serde(rename = "Key")]
    pub key: String,
}

pub fn parse_listing(xml: &str) -> Result<ListBucketResult, ArchiveError> {
    serde_xml_rs::from_str(xml).map_err(|e| ArchiveError::Malformed(e.to_string()))
}

/// Anonymous access to a public bucket over its REST endpoint
pub struct HttpArchive {
    logger: Logger,
    fetcher: Arc<HttpFetcher>,
    bucket_url: String,
}

impl HttpArchive {
    pub fn new(logger: Logger, fetcher: Arc<HttpFetcher>, bucket_url: &str) -> Self {
        Self {
            logger,
            fetcher,
            bucket_url: bucket_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url, key)
    }
}

#[async_trait]
impl ArchiveStore for HttpArchive {
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, ArchiveError> {
        let listing_url = format!("{}/", self.bucket_url);
        let mut keys = vec![];
        let mut continuation: Option<String> = None;
        let mut pages = 0;
        loop {
            let mut query = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = continuation.as_deref() {
                query.push(("continuation-token", token));
            }
            let raw = self.fetcher.fetch_text(&listing_url, &query).await?;
            let page = parse_listing(&raw)?;
            pages += 1;
            keys.extend(page.contents.into_iter().map(|object| object.key));

            if !page.is_truncated {
                break;
            }
            continuation = match page.next_continuation_token {
                Some(token) => Some(token),
                None => {
                    return Err(ArchiveError::Malformed(format!(
                        "truncated listing of {} without a continuation token",
                        prefix
                    )))
                }
            };
        }
        debug!(
            self.logger,
            "listed {} keys under {} in {} pages",
            keys.len(),
            prefix,
            pages
        );
        Ok(keys)
    }

    async fn fetch_object(&self, key: &str) -> Result<ObjectReader, ArchiveError> {
        self.fetcher.fetch_stream(&self.object_url(key)).await
    }
}
