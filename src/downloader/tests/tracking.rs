use super::*;
use crate::types::MediaKind;

#[tokio::test]
async fn successful_request_walks_the_whole_lifecycle() {
    let retriever = fake(FakeRetriever::new().with_file("clip.mp4", 1));
    let (downloader, _temp_dir) = create_test_downloader(retriever);
    let mut events = downloader.subscribe();
    let request = video_request(&downloader, 1);

    let artifact = downloader.download_single(&request).await.unwrap();
    assert!(downloader.active_requests().is_empty());
    artifact.release().await;

    assert_eq!(
        states_of(&drain_events(&mut events), RequestId(1)),
        vec![
            RequestState::Pending,
            RequestState::RateLimitCheck,
            RequestState::Admitted,
            RequestState::Running,
            RequestState::Succeeded,
            RequestState::Selected,
            RequestState::HandedOff,
            RequestState::CleanedUp,
        ]
    );
}

#[tokio::test]
async fn rejected_request_stops_at_rate_limit_check() {
    let retriever = fake(FakeRetriever::new().with_file("clip.mp4", 1));
    let (downloader, _temp_dir) = create_test_downloader(retriever);
    let request = video_request(&downloader, 1);

    let first = downloader.download_single(&request).await.unwrap();
    let mut events = downloader.subscribe();
    downloader.download_single(&request).await.unwrap_err();

    assert_eq!(
        states_of(&drain_events(&mut events), RequestId(2)),
        vec![
            RequestState::Pending,
            RequestState::RateLimitCheck,
            RequestState::Rejected,
        ]
    );
    first.release().await;
}

#[tokio::test]
async fn active_requests_reports_running_downloads() {
    let retriever = fake(
        FakeRetriever::new()
            .with_file("clip.mp4", 1)
            .with_delay(Duration::from_millis(300)),
    );
    let (downloader, _temp_dir) = create_test_downloader(retriever);

    let handle = {
        let downloader = downloader.clone();
        let request = video_request(&downloader, 9);
        tokio::spawn(async move { downloader.download_single(&request).await })
    };

    assert!(
        eventually(|| {
            downloader
                .active_requests()
                .first()
                .is_some_and(|r| r.state == RequestState::Running)
        })
        .await
    );
    let active = downloader.active_requests();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].requester, RequesterId(9));
    assert_eq!(active[0].kind, MediaKind::Video);

    handle.await.unwrap().unwrap().release().await;
    assert!(downloader.active_requests().is_empty());
}

#[tokio::test]
async fn abandoned_request_is_cancelled_and_cleaned() {
    let retriever = fake(
        FakeRetriever::new()
            .with_file("clip.mp4.part", 1)
            .with_delay(Duration::from_secs(10)),
    );
    let (downloader, _temp_dir) = create_test_downloader(retriever);
    let mut events = downloader.subscribe();
    let request = video_request(&downloader, 1);

    let handle = {
        let downloader = downloader.clone();
        let request = request.clone();
        tokio::spawn(async move { downloader.download_single(&request).await })
    };
    assert!(eventually(|| request.destination().join("clip.mp4.part").exists()).await);

    handle.abort();
    let _ = handle.await;

    assert!(downloader.active_requests().is_empty());
    assert!(eventually(|| !request.destination().exists()).await);
    assert_eq!(downloader.available_slots(), 3);
    assert_eq!(
        states_of(&drain_events(&mut events), RequestId(1)).last(),
        Some(&RequestState::Cancelled)
    );
}

#[tokio::test]
async fn request_scopes_destination_by_requester() {
    let (downloader, temp_dir) = create_test_downloader(fake(FakeRetriever::new()));

    let request = downloader
        .request(RequesterId(1234), " https://youtu.be/abc ", MediaKind::Audio)
        .unwrap();

    assert_eq!(
        request.destination(),
        &temp_dir.path().join("downloads").join("1234")
    );
    assert_eq!(request.url(), "https://youtu.be/abc");
    assert!(matches!(
        downloader.request(RequesterId(1), "javascript:alert(1)", MediaKind::Video),
        Err(Error::InvalidUrl { .. })
    ));
}
