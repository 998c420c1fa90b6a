use crate::helpers::{logger, quick_retry, FakeArchive, MockArchive};
use async_compression::tokio::write::GzipEncoder;
use nexrad_fetcher::{ArchiveError, Downloader, SearchError};
use std::{fs, path::Path, sync::Arc, time::Duration};
use tokio::{io::AsyncWriteExt, time::sleep};
use tokio_util::sync::CancellationToken;

const KEY_A: &str = "2015/05/05/KOKX/KOKX20150505_050152_V06.gz";
const KEY_B: &str = "2015/05/05/KOKX/KOKX20150505_050721_V06.gz";
const KEY_C: &str = "2015/05/05/KDIX/KDIX20150505_050340_V06.gz";

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| key.to_string()).collect()
}

fn leftover_partials(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".part"))
        .collect()
}

#[tokio::test]
async fn downloads_every_key_into_destination() {
    let archive = Arc::new(
        FakeArchive::new()
            .with_object(KEY_A, b"radar volume a")
            .with_object(KEY_B, b"radar volume b")
            .with_object(KEY_C, b"radar volume c"),
    );
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive, quick_retry())
        .download_all(&keys(&[KEY_A, KEY_B, KEY_C]), dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(
        fs::read(dir.path().join("KOKX20150505_050152_V06.gz")).unwrap(),
        b"radar volume a"
    );
    assert_eq!(
        fs::read(dir.path().join("KDIX20150505_050340_V06.gz")).unwrap(),
        b"radar volume c"
    );
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn single_worker_downloads_one_at_a_time() {
    let archive = Arc::new(
        FakeArchive::new()
            .with_object(KEY_A, b"a")
            .with_object(KEY_B, b"b")
            .with_object(KEY_C, b"c")
            .with_fetch_delay(Duration::from_millis(20)),
    );
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive.clone(), quick_retry())
        .download_all(&keys(&[KEY_A, KEY_B, KEY_C]), dir.path(), 1)
        .await
        .unwrap();

    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(archive.max_active(), 1);
    assert_eq!(archive.fetches(), keys(&[KEY_A, KEY_B, KEY_C]));
}

#[tokio::test]
async fn worker_limit_bounds_concurrency() {
    let all_keys: Vec<String> = (0..9)
        .map(|i| format!("2015/05/05/KOKX/KOKX20150505_05{:02}00_V06.gz", i))
        .collect();
    let archive = all_keys
        .iter()
        .fold(FakeArchive::new(), |archive, key| {
            archive.with_object(key, key.as_bytes())
        })
        .with_fetch_delay(Duration::from_millis(30));
    let archive = Arc::new(archive);
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive.clone(), quick_retry())
        .download_all(&all_keys, dir.path(), 3)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 9);
    assert!(outcomes.iter().all(|o| o.success));
    assert!(archive.max_active() <= 3, "{} overlapped", archive.max_active());
    assert!(archive.max_active() >= 2, "downloads never overlapped");
}

#[tokio::test]
async fn missing_destination_is_rejected() {
    let archive = Arc::new(FakeArchive::new().with_object(KEY_A, b"a"));
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("not-created");

    let err = Downloader::new(logger(), archive.clone(), quick_retry())
        .download_all(&keys(&[KEY_A]), &missing, 2)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::MissingDestination(_)));
    assert!(archive.fetches().is_empty());
}

#[tokio::test]
async fn zero_workers_is_rejected() {
    let archive = Arc::new(FakeArchive::new());
    let dir = tempfile::tempdir().unwrap();

    let err = Downloader::new(logger(), archive, quick_retry())
        .download_all(&keys(&[KEY_A]), dir.path(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidWorkerLimit));
}

#[tokio::test]
async fn empty_key_list_is_a_no_op() {
    let archive = Arc::new(FakeArchive::new());
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive, quick_retry())
        .download_all(&[], dir.path(), 4)
        .await
        .unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn missing_object_fails_without_stopping_the_batch() {
    let mut archive = MockArchive::new();
    archive
        .expect_fetch_object()
        .withf(|key| key == KEY_A)
        .times(1)
        .returning(|key| Err(ArchiveError::NotFound(key.to_string())));
    archive
        .expect_fetch_object()
        .withf(|key| key == KEY_B)
        .times(1)
        .returning(|_| Ok(Box::pin(std::io::Cursor::new(b"volume b".to_vec()))));
    let dir = tempfile::tempdir().unwrap();

    let mut outcomes = Downloader::new(logger(), Arc::new(archive), quick_retry())
        .download_all(&keys(&[KEY_A, KEY_B]), dir.path(), 2)
        .await
        .unwrap();
    outcomes.sort_by(|a, b| a.key.cmp(&b.key));

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].key, KEY_A);
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[1].key, KEY_B);
    assert!(outcomes[1].success);
    assert!(!dir.path().join("KOKX20150505_050152_V06.gz").exists());
    assert!(dir.path().join("KOKX20150505_050721_V06.gz").exists());
}

#[tokio::test]
async fn panicking_worker_is_reported_as_failed() {
    let archive = Arc::new(
        FakeArchive::new()
            .with_object(KEY_A, b"a")
            .with_panicking(KEY_B)
            .with_object(KEY_C, b"c"),
    );
    let dir = tempfile::tempdir().unwrap();

    let mut outcomes = Downloader::new(logger(), archive, quick_retry())
        .download_all(&keys(&[KEY_A, KEY_B, KEY_C]), dir.path(), 2)
        .await
        .unwrap();
    outcomes.sort_by(|a, b| a.key.cmp(&b.key));

    assert_eq!(outcomes.len(), 3);
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.key.as_str())
        .collect();
    assert_eq!(failed, vec![KEY_B]);
    let panicked = outcomes.iter().find(|o| o.key == KEY_B).unwrap();
    assert_eq!(
        panicked.destination,
        dir.path().join("KOKX20150505_050721_V06.gz")
    );
    assert!(!panicked.destination.exists());
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn broken_transfer_leaves_no_partial_file() {
    let archive = Arc::new(FakeArchive::new().with_truncated(KEY_A, b"first half of a vol"));
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive.clone(), quick_retry())
        .download_all(&keys(&[KEY_A]), dir.path(), 1)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    // every attempt is made before giving up
    assert_eq!(archive.fetches().len(), 6);
    assert!(!outcomes[0].destination.exists());
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn transient_fetch_failure_is_retried() {
    let mut archive = MockArchive::new();
    let mut calls = 0;
    archive
        .expect_fetch_object()
        .times(2)
        .returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ArchiveError::Transient("connection reset".to_string()))
            } else {
                Ok(Box::pin(std::io::Cursor::new(b"volume a".to_vec())))
            }
        });
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), Arc::new(archive), quick_retry())
        .download_all(&keys(&[KEY_A]), dir.path(), 1)
        .await
        .unwrap();

    assert!(outcomes[0].success);
    assert_eq!(fs::read(&outcomes[0].destination).unwrap(), b"volume a");
}

#[tokio::test]
async fn duplicate_keys_are_downloaded_once() {
    let archive = Arc::new(FakeArchive::new().with_object(KEY_A, b"a"));
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive.clone(), quick_retry())
        .download_all(&keys(&[KEY_A, KEY_A]), dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(archive.fetches().len(), 1);
}

#[tokio::test]
async fn same_file_name_from_two_keys_is_not_overwritten() {
    let other_day = "2015/05/06/KOKX/KOKX20150505_050152_V06.gz";
    let archive = Arc::new(
        FakeArchive::new()
            .with_object(KEY_A, b"first")
            .with_object(other_day, b"second"),
    );
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive, quick_retry())
        .download_all(&keys(&[KEY_A, other_day]), dir.path(), 2)
        .await
        .unwrap();

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.key.as_str())
        .collect();
    assert_eq!(failed, vec![other_day]);
    assert_eq!(
        fs::read(dir.path().join("KOKX20150505_050152_V06.gz")).unwrap(),
        b"first"
    );
}

#[tokio::test]
async fn decompression_strips_gz_suffix() {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(b"AR2V0006.").await.unwrap();
    encoder.shutdown().await.unwrap();
    let compressed = encoder.into_inner();

    let archive = Arc::new(FakeArchive::new().with_object(KEY_A, &compressed));
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive, quick_retry())
        .with_decompression(true)
        .download_all(&keys(&[KEY_A]), dir.path(), 1)
        .await
        .unwrap();

    assert!(outcomes[0].success);
    assert_eq!(
        outcomes[0].destination,
        dir.path().join("KOKX20150505_050152_V06")
    );
    assert_eq!(fs::read(&outcomes[0].destination).unwrap(), b"AR2V0006.");
}

#[tokio::test]
async fn corrupt_gzip_is_not_retried() {
    let archive = Arc::new(FakeArchive::new().with_object(KEY_A, b"not gzip at all"));
    let dir = tempfile::tempdir().unwrap();

    let outcomes = Downloader::new(logger(), archive.clone(), quick_retry())
        .with_decompression(true)
        .download_all(&keys(&[KEY_A]), dir.path(), 1)
        .await
        .unwrap();

    assert!(!outcomes[0].success);
    assert_eq!(archive.fetches().len(), 1);
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn slow_download_times_out() {
    let archive = Arc::new(
        FakeArchive::new()
            .with_stalled(KEY_A)
            .with_object(KEY_B, b"b"),
    );
    let dir = tempfile::tempdir().unwrap();

    let mut outcomes = Downloader::new(logger(), archive, quick_retry())
        .with_timeout(Duration::from_millis(50))
        .download_all(&keys(&[KEY_A, KEY_B]), dir.path(), 2)
        .await
        .unwrap();
    outcomes.sort_by(|a, b| a.key.cmp(&b.key));

    assert!(!outcomes[0].success);
    assert!(outcomes[1].success);
}

#[tokio::test]
async fn cancellation_stops_outstanding_downloads() {
    let archive = Arc::new(
        FakeArchive::new()
            .with_stalled(KEY_A)
            .with_stalled(KEY_B)
            .with_stalled(KEY_C),
    );
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcomes = Downloader::new(logger(), archive.clone(), quick_retry())
        .with_cancellation(cancel)
        .download_all(&keys(&[KEY_A, KEY_B, KEY_C]), dir.path(), 1)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| !o.success));
    // the other two never got a worker
    assert_eq!(archive.fetches(), keys(&[KEY_A]));
    assert!(leftover_partials(dir.path()).is_empty());
}
