use crate::helpers::{catalog, logger, quick_retry, MockArchive};
use mockall::predicate::eq;
use nexrad_fetcher::{ArchiveError, KeyEnumerator, SearchError, DUAL_POL_DEPLOYMENT_COMPLETION};
use std::sync::Arc;
use time::macros::datetime;

fn enumerator(archive: MockArchive) -> KeyEnumerator {
    KeyEnumerator::new(logger(), Arc::new(archive), catalog(), quick_retry())
}

fn stations(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn day_keys(prefix: &str, station: &str, times: &[&str]) -> Vec<String> {
    let day = prefix[..10].replace('/', "");
    times
        .iter()
        .map(|time| format!("{}{}{}_{}_V06.gz", prefix, station, day, time))
        .collect()
}

#[tokio::test]
async fn single_day_window_is_inclusive_at_both_ends() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .with(eq("2015/05/05/KOKX/"))
        .times(1)
        .returning(|prefix| {
            let mut keys = day_keys(
                prefix,
                "KOKX",
                &["045959", "050000", "053012", "060000", "060001"],
            );
            // metadata files and uncompressed scans are not wanted
            keys.push(format!("{}KOKX20150505_053500_V06", prefix));
            keys.push(format!("{}KOKX20150505_054000_V06_MDM", prefix));
            Ok(keys)
        });

    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-05 05:00 UTC),
            datetime!(2015-05-05 06:00 UTC),
            &stations(&["KOKX"]),
        )
        .await
        .unwrap();

    assert_eq!(
        keys,
        vec![
            "2015/05/05/KOKX/KOKX20150505_050000_V06.gz",
            "2015/05/05/KOKX/KOKX20150505_053012_V06.gz",
            "2015/05/05/KOKX/KOKX20150505_060000_V06.gz",
        ]
    );
}

#[tokio::test]
async fn middle_days_are_taken_whole() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .times(3)
        .returning(|prefix| Ok(day_keys(prefix, "KDIX", &["000100", "120000", "235900"])));

    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-04 23:00 UTC),
            datetime!(2015-05-06 01:00 UTC),
            &stations(&["KDIX"]),
        )
        .await
        .unwrap();

    assert_eq!(
        keys,
        vec![
            "2015/05/04/KDIX/KDIX20150504_235900_V06.gz",
            "2015/05/05/KDIX/KDIX20150505_000100_V06.gz",
            "2015/05/05/KDIX/KDIX20150505_120000_V06.gz",
            "2015/05/05/KDIX/KDIX20150505_235900_V06.gz",
            "2015/05/06/KDIX/KDIX20150506_000100_V06.gz",
        ]
    );
}

#[tokio::test]
async fn keys_are_grouped_by_station_in_request_order() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .times(2)
        .returning(|prefix| {
            let station = &prefix[11..15];
            Ok(day_keys(prefix, station, &["100000"]))
        });

    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-05 09:00 UTC),
            datetime!(2015-05-05 11:00 UTC),
            &stations(&["KOKX", "kdix"]),
        )
        .await
        .unwrap();

    assert_eq!(
        keys,
        vec![
            "2015/05/05/KOKX/KOKX20150505_100000_V06.gz",
            "2015/05/05/KDIX/KDIX20150505_100000_V06.gz",
        ]
    );
}

#[tokio::test]
async fn unknown_stations_are_skipped() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .with(eq("2015/05/05/KOKX/"))
        .times(1)
        .returning(|prefix| Ok(day_keys(prefix, "KOKX", &["100000"])));

    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-05 09:00 UTC),
            datetime!(2015-05-05 11:00 UTC),
            &stations(&["KXXX", "KOKX"]),
        )
        .await
        .unwrap();

    assert_eq!(keys, vec!["2015/05/05/KOKX/KOKX20150505_100000_V06.gz"]);
}

#[tokio::test]
async fn empty_station_list_is_an_error() {
    let mut archive = MockArchive::new();
    archive.expect_list_prefix().times(0);

    let err = enumerator(archive)
        .list_keys(
            datetime!(2015-05-05 09:00 UTC),
            datetime!(2015-05-05 11:00 UTC),
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::EmptyInput(_)));
}

#[tokio::test]
async fn start_before_archive_is_moved_forward() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .with(eq("1991/06/01/KTLX/"))
        .times(1)
        .returning(|prefix| Ok(day_keys(prefix, "KTLX", &["060000"])));

    let keys = enumerator(archive)
        .list_keys(
            datetime!(1990-01-01 00:00 UTC),
            datetime!(1991-06-01 12:00 UTC),
            &stations(&["KTLX"]),
        )
        .await
        .unwrap();

    assert_eq!(keys, vec!["1991/06/01/KTLX/KTLX19910601_060000_V06.gz"]);
}

#[tokio::test]
async fn dual_pol_only_starts_at_deployment_completion() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .with(eq("2013/08/01/KTLX/"))
        .times(1)
        .returning(|_| Ok(vec![]));

    let keys = enumerator(archive)
        .with_archive_start(DUAL_POL_DEPLOYMENT_COMPLETION)
        .list_keys(
            datetime!(2013-07-30 00:00 UTC),
            datetime!(2013-08-01 12:00 UTC),
            &stations(&["KTLX"]),
        )
        .await
        .unwrap();

    assert!(keys.is_empty());
}

#[tokio::test]
async fn end_in_the_future_is_capped_at_now() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .with(eq("2020/01/01/KOKX/"))
        .times(1)
        .returning(|prefix| Ok(day_keys(prefix, "KOKX", &["110000", "115959", "120001"])));

    let keys = enumerator(archive)
        .list_keys_until(
            datetime!(2020-01-01 00:00 UTC),
            datetime!(2020-01-03 00:00 UTC),
            &stations(&["KOKX"]),
            datetime!(2020-01-01 12:00 UTC),
        )
        .await
        .unwrap();

    assert_eq!(
        keys,
        vec![
            "2020/01/01/KOKX/KOKX20200101_110000_V06.gz",
            "2020/01/01/KOKX/KOKX20200101_115959_V06.gz",
        ]
    );
}

#[tokio::test]
async fn reversed_window_lists_nothing() {
    let mut archive = MockArchive::new();
    archive.expect_list_prefix().times(0);

    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-06 00:00 UTC),
            datetime!(2015-05-05 00:00 UTC),
            &stations(&["KOKX"]),
        )
        .await
        .unwrap();
    assert!(keys.is_empty());
}

#[tokio::test]
async fn window_in_another_offset_is_read_as_utc() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .with(eq("2015/05/05/KOKX/"))
        .times(1)
        .returning(|prefix| Ok(day_keys(prefix, "KOKX", &["035959", "040000", "050000"])));

    // 00:00 to 01:00 at UTC-4
    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-05 00:00 -4),
            datetime!(2015-05-05 01:00 -4),
            &stations(&["KOKX"]),
        )
        .await
        .unwrap();

    assert_eq!(
        keys,
        vec![
            "2015/05/05/KOKX/KOKX20150505_040000_V06.gz",
            "2015/05/05/KOKX/KOKX20150505_050000_V06.gz",
        ]
    );
}

#[tokio::test]
async fn exhausted_retries_leave_the_day_empty() {
    let mut archive = MockArchive::new();
    archive
        .expect_list_prefix()
        .with(eq("2015/05/05/KOKX/"))
        .times(6)
        .returning(|_| Err(ArchiveError::Transient("connection reset".to_string())));
    archive
        .expect_list_prefix()
        .with(eq("2015/05/06/KOKX/"))
        .times(1)
        .returning(|prefix| Ok(day_keys(prefix, "KOKX", &["000500"])));

    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-05 23:00 UTC),
            datetime!(2015-05-06 01:00 UTC),
            &stations(&["KOKX"]),
        )
        .await
        .unwrap();

    assert_eq!(keys, vec!["2015/05/06/KOKX/KOKX20150506_000500_V06.gz"]);
}

#[tokio::test]
async fn transient_listing_failures_are_retried() {
    let mut archive = MockArchive::new();
    let mut calls = 0;
    archive
        .expect_list_prefix()
        .times(3)
        .returning(move |prefix| {
            calls += 1;
            if calls < 3 {
                Err(ArchiveError::Transient("503 Slow Down".to_string()))
            } else {
                Ok(day_keys(prefix, "KOKX", &["100000"]))
            }
        });

    let keys = enumerator(archive)
        .list_keys(
            datetime!(2015-05-05 09:00 UTC),
            datetime!(2015-05-05 11:00 UTC),
            &stations(&["KOKX"]),
        )
        .await
        .unwrap();

    assert_eq!(keys, vec!["2015/05/05/KOKX/KOKX20150505_100000_V06.gz"]);
}
