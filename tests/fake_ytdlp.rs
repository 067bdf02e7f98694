//! End-to-end tests against a fake yt-dlp shell script
//!
//! These exercise the real subprocess path (argument construction, output capture,
//! timeout kill, directory listing) without network access.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test fake_ytdlp
//! ```

#![cfg(unix)]

mod common;

use common::{create_fake_downloader, test_config, wait_for_state, write_fake_ytdlp};
use media_dl::{
    DownloadError, DownloadResult, Error, MediaDownloader, MediaKind, RequestId, RequestState,
    RequesterId, SourcePlatform,
};
use std::time::{Duration, Instant};

#[tokio::test]
async fn single_download_returns_merged_file_only() {
    let (downloader, _temp_dir) = create_fake_downloader(|_| {});
    let request = downloader
        .request(
            RequesterId(1),
            "https://www.youtube.com/watch?v=abc",
            MediaKind::Video,
        )
        .unwrap();

    let artifact = downloader.download_single(&request).await.unwrap();

    assert_eq!(artifact.file_name(), "Fake clip.mp4");
    assert_eq!(artifact.size(), "fake media payload".len() as u64);
    let remaining: Vec<_> = std::fs::read_dir(request.destination())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(remaining, vec![std::ffi::OsString::from("Fake clip.mp4")]);

    let uploaded = artifact
        .consume(|path| async move { std::fs::read(path).map(|bytes| bytes.len()) })
        .await
        .unwrap();
    assert_eq!(uploaded, 18);
    assert!(!request.destination().exists());
}

#[tokio::test]
async fn explicit_tool_path_is_used_by_new() {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = write_fake_ytdlp(temp_dir.path());
    let mut config = test_config(temp_dir.path());
    config.tools.ytdlp_path = Some(script);

    let downloader = MediaDownloader::new(config).await.unwrap();
    assert!(temp_dir.path().join("downloads").is_dir());

    let info = downloader
        .fetch_info("https://www.youtube.com/watch?v=abc")
        .await
        .unwrap();
    assert_eq!(info.id, "fake123");
    assert_eq!(info.title, "Fake clip");
    assert_eq!(info.estimated_size(), Some(2048));
}

#[tokio::test]
async fn playlist_keeps_entries_that_finished_before_the_failure() {
    let (downloader, _temp_dir) = create_fake_downloader(|_| {});
    let request = downloader
        .request(
            RequesterId(1),
            "https://www.youtube.com/playlist?list=PLfake",
            MediaKind::Video,
        )
        .unwrap();

    let artifacts = match downloader.download(&request).await.unwrap() {
        DownloadResult::Playlist(artifacts) => artifacts,
        other => panic!("expected a playlist, got {other:?}"),
    };

    let names: Vec<String> = artifacts.iter().map(|a| a.file_name().to_string()).collect();
    assert_eq!(names, vec!["1 - First.mp4", "2 - Second.mp4"]);
    for artifact in artifacts {
        artifact.release().await;
    }
    assert!(!request.destination().exists());
}

#[tokio::test]
async fn failing_tool_is_process_failed_without_leaking_stderr() {
    let (downloader, _temp_dir) = create_fake_downloader(|_| {});
    let request = downloader
        .request(RequesterId(1), "https://example.com/broken", MediaKind::Video)
        .unwrap();

    let err = downloader.download_single(&request).await.unwrap_err();

    match &err {
        Error::Download(DownloadError::ProcessFailed { exit_code, stderr }) => {
            assert_eq!(*exit_code, Some(1));
            assert!(stderr.contains("video unavailable"));
        }
        other => panic!("expected ProcessFailed, got {other:?}"),
    }
    assert!(!err.user_message().contains("video unavailable"));
    assert!(!request.destination().exists());
}

#[tokio::test]
async fn slow_tool_is_killed_at_the_timeout() {
    let (downloader, _temp_dir) = create_fake_downloader(|c| {
        c.download.timeout = Duration::from_millis(500);
    });
    let mut events = downloader.subscribe();
    let request = downloader
        .request(RequesterId(1), "https://example.com/slow", MediaKind::Audio)
        .unwrap();

    let started = Instant::now();
    let err = downloader.download_single(&request).await.unwrap_err();

    assert!(matches!(
        err.as_download(),
        Some(DownloadError::Timeout { .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(wait_for_state(&mut events, RequestId(1), RequestState::TimedOut, Duration::from_secs(1)).await);
    assert_eq!(downloader.available_slots(), 3);
}

#[tokio::test]
async fn cooldown_applies_per_requester() {
    let (downloader, _temp_dir) = create_fake_downloader(|_| {});
    let url = "https://www.instagram.com/p/abc/";
    assert_eq!(SourcePlatform::detect(url), SourcePlatform::Instagram);

    let alice = downloader.request(RequesterId(1), url, MediaKind::Video).unwrap();
    let bob = downloader.request(RequesterId(2), url, MediaKind::Video).unwrap();

    let first = downloader.download_single(&alice).await.unwrap();
    let denied = downloader.download_single(&alice).await.unwrap_err();
    let other = downloader.download_single(&bob).await.unwrap();

    assert!(matches!(
        denied.as_download(),
        Some(DownloadError::RateLimited { .. })
    ));
    assert!(denied.user_message().contains("wait"));

    first.release().await;
    other.release().await;
}

#[tokio::test]
async fn abandoned_download_leaves_no_helper_behind() {
    let (downloader, _temp_dir) = create_fake_downloader(|_| {});
    let request = downloader
        .request(RequesterId(1), "https://example.com/helper", MediaKind::Video)
        .unwrap();

    let handle = {
        let downloader = downloader.clone();
        let request = request.clone();
        tokio::spawn(async move { downloader.download_single(&request).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.abort();
    let _ = handle.await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!request.destination().join("late.mp4").exists());
    assert!(!request.destination().exists());
    assert_eq!(downloader.available_slots(), 3);
}
