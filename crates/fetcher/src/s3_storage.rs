use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{operation::get_object::GetObjectError, Client};
use slog::{debug, info, Logger};

use crate::{ArchiveError, ArchiveStore, ObjectReader};

/// The archive read through the AWS SDK, unsigned
pub struct S3Archive {
    client: Client,
    bucket: String,
    logger: Logger,
}

impl S3Archive {
    pub async fn new(
        bucket: String,
        region: String,
        endpoint: Option<String>,
        logger: Logger,
    ) -> Result<Self, anyhow::Error> {
        let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .no_credentials();

        if let Some(endpoint_url) = endpoint {
            info!(logger, "Using custom S3 endpoint: {}", endpoint_url);
            config_loader = config_loader.endpoint_url(endpoint_url);
        }

        let config = config_loader.load().await;
        let client = Client::new(&config);

        info!(logger, "S3 archive initialized for bucket: {}", bucket);

        Ok(Self {
            client,
            bucket,
            logger,
        })
    }
}

#[async_trait]
impl ArchiveStore for S3Archive {
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, ArchiveError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = vec![];
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                ArchiveError::Transient(format!("listing {} failed: {}", prefix, e))
            })?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }
        debug!(self.logger, "listed {} keys under {}", keys.len(), prefix);
        Ok(keys)
    }

    async fn fetch_object(&self, key: &str) -> Result<ObjectReader, ArchiveError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                GetObjectError::NoSuchKey(_) => ArchiveError::NotFound(key.to_string()),
                other => ArchiveError::Transient(format!("fetching {} failed: {}", key, other)),
            })?;

        Ok(Box::pin(object.body.into_async_read()))
    }
}
