//! Integration tests for the response file watcher.
//!
//! Intervals are scaled down from the production defaults (2 s poll, 3 s
//! settle) so the timing relationships hold while the suite stays fast.

use response_watch::{CancellationToken, FileSetSnapshot, FileSystemWatcher, WatchConfig};
use std::fs::File;
use std::time::{Duration, Instant, SystemTime};

fn watcher(dir: &std::path::Path) -> FileSystemWatcher {
    FileSystemWatcher::new(
        dir.to_path_buf(),
        vec!["txt".into(), "md".into(), "json".into()],
        true,
    )
}

#[tokio::test]
async fn test_new_file_after_one_poll_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());
    let config = WatchConfig::new(
        Duration::from_millis(200),
        Duration::from_secs(5),
        1,
        Duration::from_millis(100),
    );

    let target = dir.path().join("a.md");
    let writer_target = target.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        std::fs::write(writer_target, "content of a").unwrap();
    });

    let changed = watcher
        .wait_for_new_file(&FileSetSnapshot::new(), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(changed.path, target);
    assert_eq!(changed.content, "content of a");
}

#[tokio::test]
async fn test_other_extensions_do_not_count() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());
    let config = WatchConfig::new(
        Duration::from_millis(30),
        Duration::from_millis(300),
        1,
        Duration::ZERO,
    );

    std::fs::write(dir.path().join("image.png"), b"png").unwrap();
    let err = watcher
        .wait_for_new_file(&FileSetSnapshot::new(), &config, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

/// Submit at T0, the answer lands at T0+0.4s; with a 0.2s poll and 0.3s
/// settle the watcher returns at roughly T0+0.7s.
#[tokio::test]
async fn test_latest_response_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());
    let config = WatchConfig::new(
        Duration::from_millis(200),
        Duration::from_secs(18),
        1,
        Duration::from_millis(300),
    );

    let t0 = Instant::now();
    let reference = SystemTime::now();

    let response = dir.path().join("response.md");
    let writer_target = response.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        std::fs::write(writer_target, "result text").unwrap();
    });

    let latest = watcher
        .wait_for_latest_after(reference, &config, &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = t0.elapsed();

    assert_eq!(latest.content, "result text");
    assert_eq!(latest.path, response);
    assert!(elapsed >= Duration::from_millis(650), "returned too early: {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(1500), "returned too late: {:?}", elapsed);
}

#[tokio::test]
async fn test_latest_picks_most_recent_file() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());
    let config = WatchConfig::new(
        Duration::from_millis(50),
        Duration::from_secs(5),
        1,
        Duration::from_millis(50),
    );
    let reference = SystemTime::now() - Duration::from_secs(60);

    let older = dir.path().join("draft.md");
    let newer = dir.path().join("final.md");
    std::fs::write(&older, "draft").unwrap();
    std::fs::write(&newer, "final").unwrap();
    File::options()
        .write(true)
        .open(&older)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(30))
        .unwrap();

    let latest = watcher
        .wait_for_latest_after(reference, &config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(latest.path, newer);
    assert_eq!(latest.content, "final");
}

#[tokio::test]
async fn test_cancellation_ends_wait_within_a_poll() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());
    let config = WatchConfig::new(
        Duration::from_millis(500),
        Duration::from_secs(60),
        1,
        Duration::ZERO,
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = watcher
        .wait_for_new_file(&FileSetSnapshot::new(), &config, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[test]
fn test_purge_respects_age() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());

    let stale = dir.path().join("stale.md");
    let stale_png = dir.path().join("stale.png");
    let fresh = dir.path().join("fresh.md");
    for path in [&stale, &stale_png, &fresh] {
        std::fs::write(path, "x").unwrap();
    }

    let two_hours_ago = SystemTime::now() - Duration::from_secs(2 * 3600);
    for path in [&stale, &stale_png] {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(two_hours_ago)
            .unwrap();
    }

    let removed = watcher.purge_older_than(Duration::from_secs(3600));

    assert_eq!(removed, 2);
    assert!(!stale.exists());
    assert!(!stale_png.exists());
    assert!(fresh.exists());
}

#[test]
fn test_purge_of_missing_dir_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(&dir.path().join("never-created"));
    assert_eq!(watcher.purge_older_than(Duration::ZERO), 0);
}

#[tokio::test]
async fn test_invalid_utf8_response_is_still_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());
    let config = WatchConfig::new(
        Duration::from_millis(20),
        Duration::from_secs(2),
        1,
        Duration::from_millis(10),
    );

    let reference = SystemTime::now() - Duration::from_secs(1);
    let target = dir.path().join("answer.md");
    std::fs::write(&target, b"caf\xe9 result text").unwrap();

    let changed = watcher
        .wait_for_latest_after(reference, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(changed.path, target);
    assert_eq!(changed.content, "caf\u{FFFD} result text");
}

#[tokio::test]
async fn test_binary_junk_does_not_block_new_file_wait() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher(dir.path());
    let config = WatchConfig::new(
        Duration::from_millis(20),
        Duration::from_secs(2),
        1,
        Duration::from_millis(10),
    );

    std::fs::write(dir.path().join("a.md"), b"\xff\xfe junk").unwrap();
    std::fs::write(dir.path().join("b.md"), "good answer").unwrap();

    let changed = watcher
        .wait_for_new_file(&FileSetSnapshot::new(), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(changed.path, dir.path().join("a.md"));
    assert!(changed.content.ends_with(" junk"));
}
