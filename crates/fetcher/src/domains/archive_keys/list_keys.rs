use slog::{debug, error, info, warn, Logger};
use std::sync::Arc;
use time::{
    macros::{datetime, format_description},
    Date, OffsetDateTime, PrimitiveDateTime, UtcOffset,
};

use crate::{ArchiveStore, RetryPolicy, SearchError, StationCatalog};

/// Earliest data in the Level II bucket
pub const S3_NEXRAD_START: OffsetDateTime = datetime!(1991-06-01 0:00 UTC);

/// Every WSR-88D site had been upgraded to dual polarization by this date
pub const DUAL_POL_DEPLOYMENT_COMPLETION: OffsetDateTime = datetime!(2013-08-01 0:00 UTC);

/// Keys look like `YYYY/MM/DD/SSSS/SSSSYYYYMMDD_HHMMSS...`
const KEY_TIMESTAMP_START: usize = 20;
const KEY_TIMESTAMP_END: usize = 35;

/// Listing prefix holding one station's files for one UTC day
pub fn day_prefix(day: Date, station_id: &str) -> String {
    format!(
        "{:04}/{:02}/{:02}/{}/",
        day.year(),
        u8::from(day.month()),
        day.day(),
        station_id
    )
}

/// Scan time encoded in an archive key, read as UTC
pub fn key_timestamp(key: &str) -> Option<OffsetDateTime> {
    let raw = key.get(KEY_TIMESTAMP_START..KEY_TIMESTAMP_END)?;
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    PrimitiveDateTime::parse(raw, format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Finds the archive keys of a set of stations inside a time window
pub struct KeyEnumerator {
    logger: Logger,
    archive: Arc<dyn ArchiveStore>,
    catalog: Arc<StationCatalog>,
    retry: RetryPolicy,
    key_suffix: String,
    archive_start: OffsetDateTime,
}

impl KeyEnumerator {
    pub fn new(
        logger: Logger,
        archive: Arc<dyn ArchiveStore>,
        catalog: Arc<StationCatalog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            logger,
            archive,
            catalog,
            retry,
            key_suffix: nexrad_search_core::DEFAULT_KEY_SUFFIX.to_string(),
            archive_start: S3_NEXRAD_START,
        }
    }

    pub fn with_key_suffix(mut self, key_suffix: &str) -> Self {
        self.key_suffix = key_suffix.to_string();
        self
    }

    /// Requests starting earlier than this are moved forward to it
    pub fn with_archive_start(mut self, archive_start: OffsetDateTime) -> Self {
        self.archive_start = archive_start;
        self
    }

    pub async fn list_keys(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        station_ids: &[String],
    ) -> Result<Vec<String>, SearchError> {
        self.list_keys_until(start, end, station_ids, OffsetDateTime::now_utc())
            .await
    }

    /// Keys of `station_ids` scanned between `start` and `end` inclusive,
    /// grouped by station in the given order and by day within a station.
    ///
    /// `end` is capped at `now`. A day whose listing still fails after all
    /// retries contributes nothing.
    pub async fn list_keys_until(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        station_ids: &[String],
        now: OffsetDateTime,
    ) -> Result<Vec<String>, SearchError> {
        if station_ids.is_empty() {
            return Err(SearchError::EmptyInput("no stations to search"));
        }

        let mut start = start.to_offset(UtcOffset::UTC);
        let mut end = end.to_offset(UtcOffset::UTC);
        if start < self.archive_start {
            info!(
                self.logger,
                "start {} precedes the archive, searching from {}", start, self.archive_start
            );
            start = self.archive_start;
        }
        if end > now {
            info!(self.logger, "end {} is in the future, searching until {}", end, now);
            end = now.to_offset(UtcOffset::UTC);
        }
        if start > end {
            warn!(
                self.logger,
                "empty time window {} to {}, nothing to list", start, end
            );
            return Ok(vec![]);
        }

        let (first_day, last_day) = (start.date(), end.date());
        let mut keys = vec![];
        for station_id in station_ids {
            let Some(station) = self.catalog.get(station_id) else {
                warn!(self.logger, "Station {} not found, skipping", station_id);
                continue;
            };

            let mut day = first_day;
            loop {
                let prefix = day_prefix(day, &station.station_id);
                let listed = match self
                    .retry
                    .run(&self.logger, &prefix, || self.archive.list_prefix(&prefix))
                    .await
                {
                    Ok(listed) => listed,
                    Err(err) => {
                        error!(self.logger, "listing {} failed: {}", prefix, err);
                        vec![]
                    }
                };

                let before = keys.len();
                keys.extend(listed.into_iter().filter(|key| {
                    self.keep_key(key, day == first_day, day == last_day, start, end)
                }));
                debug!(self.logger, "{}: {} keys", prefix, keys.len() - before);

                if day >= last_day {
                    break;
                }
                match day.next_day() {
                    Some(next) => day = next,
                    None => break,
                }
            }
        }

        info!(
            self.logger,
            "found {} keys for {} stations", keys.len(), station_ids.len()
        );
        Ok(keys)
    }

    /// Only the first and last day need their scan times checked
    fn keep_key(
        &self,
        key: &str,
        first_day: bool,
        last_day: bool,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> bool {
        if !key.ends_with(&self.key_suffix) {
            return false;
        }
        if !first_day && !last_day {
            return true;
        }
        match key_timestamp(key) {
            Some(scanned) => !(first_day && scanned < start) && !(last_day && scanned > end),
            None => {
                warn!(self.logger, "no scan time in key {}, skipping", key);
                false
            }
        }
    }
}
