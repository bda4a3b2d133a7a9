//! Integration tests for the download module.
//!
//! These tests verify single-request and fragmented transfers against mock
//! HTTP servers.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use unidl_core::download::{
    DownloadError, FailureType, FragmentTransfer, HttpClient, RateLimiter, RetryPolicy, SizeWindow,
    classify_error, resolve_hls_segments,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn client() -> HttpClient {
    HttpClient::new(Duration::from_secs(10), None, "unidl-test/0.1").expect("client builds")
}

async fn mount_file(server: &MockServer, path_str: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_download_full_flow_preserves_content() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let content = b"This is the complete media content for testing.\nLine 2.\nLine 3.";
    mount_file(&mock_server, "/clip.mp4", content).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let target = temp_dir.path().join("clip.mp4");

    let url = format!("{}/clip.mp4", mock_server.uri());
    let mut last_progress = 0;
    let written = client()
        .download_to_path(
            &url,
            &BTreeMap::new(),
            &target,
            SizeWindow::default(),
            &RateLimiter::disabled(),
            |n| last_progress = n,
        )
        .await
        .expect("download should succeed");

    assert_eq!(written, content.len() as u64);
    assert_eq!(last_progress, written);
    assert_eq!(std::fs::read(&target).unwrap(), content);
}

#[tokio::test]
async fn test_download_handles_500_error() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/error"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let target = temp_dir.path().join("error.bin");

    let url = format!("{}/error", mock_server.uri());
    let result = client()
        .download_to_path(
            &url,
            &BTreeMap::new(),
            &target,
            SizeWindow::default(),
            &RateLimiter::disabled(),
            |_| {},
        )
        .await;

    match result {
        Err(ref e @ DownloadError::HttpStatus { status: 500, .. }) => {
            assert_eq!(classify_error(e), FailureType::Transient);
        }
        other => panic!("Expected HttpStatus(500), got: {other:?}"),
    }
    assert!(!target.exists(), "no partial file may remain");
}

#[tokio::test]
async fn test_download_client_is_reusable() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_file(&mock_server, "/file1.m4a", b"file1").await;
    mount_file(&mock_server, "/file2.m4a", b"file2").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let client = client();

    for name in ["file1.m4a", "file2.m4a"] {
        let url = format!("{}/{name}", mock_server.uri());
        client
            .download_to_path(
                &url,
                &BTreeMap::new(),
                &temp_dir.path().join(name),
                SizeWindow::default(),
                &RateLimiter::disabled(),
                |_| {},
            )
            .await
            .unwrap();
    }

    assert_eq!(std::fs::read(temp_dir.path().join("file1.m4a")).unwrap(), b"file1");
    assert_eq!(std::fs::read(temp_dir.path().join("file2.m4a")).unwrap(), b"file2");
}

#[tokio::test]
async fn test_download_to_nonexistent_directory_fails() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_file(&mock_server, "/file.mp4", b"content").await;
    let target = Path::new("/this/path/definitely/does/not/exist/anywhere/file.mp4");

    let url = format!("{}/file.mp4", mock_server.uri());
    let result = client()
        .download_to_path(
            &url,
            &BTreeMap::new(),
            target,
            SizeWindow::default(),
            &RateLimiter::disabled(),
            |_| {},
        )
        .await;

    assert!(
        matches!(result, Err(DownloadError::Io { .. })),
        "Expected IO error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_hls_master_playlist_assembles_best_variant_in_order() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let master = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=640x360\n\
        low/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=1280x720\n\
        high/index.m3u8\n";
    let media = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\nseg1.ts\n#EXTINF:4.0,\nseg2.ts\n#EXT-X-ENDLIST\n";
    mount_file(&mock_server, "/live/master.m3u8", master.as_bytes()).await;
    mount_file(&mock_server, "/live/high/index.m3u8", media.as_bytes()).await;
    // Later segments answer first; assembly must still follow playlist order.
    for (i, delay) in [(0, 150), (1, 50), (2, 0)] {
        Mock::given(method("GET"))
            .and(path(format!("/live/high/seg{i}.ts")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(format!("[{i}]").into_bytes())
                    .set_delay(Duration::from_millis(delay)),
            )
            .mount(&mock_server)
            .await;
    }

    let client = client();
    let headers = BTreeMap::new();
    let url = format!("{}/live/master.m3u8", mock_server.uri());
    let segments = resolve_hls_segments(&client, &url, &headers).await.unwrap();
    assert_eq!(segments.len(), 3);
    assert!(segments[0].ends_with("/live/high/seg0.ts"));

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let target = temp_dir.path().join("live.ts");
    let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, 2.0);
    let limiter = RateLimiter::disabled();
    let transfer = FragmentTransfer {
        client: &client,
        headers: &headers,
        policy: &policy,
        limiter: &limiter,
        concurrency: 3,
        window: SizeWindow::default(),
    };
    let mut reported = Vec::new();
    let written = transfer
        .download(&url, &segments, &target, |done, total, _| {
            reported.push((done, total));
        })
        .await
        .unwrap();

    assert_eq!(written, 9);
    assert_eq!(std::fs::read(&target).unwrap(), b"[0][1][2]");
    assert_eq!(reported, vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn test_rate_limit_bounds_throughput() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_file(&mock_server, "/slow.bin", &vec![9u8; 20_000]).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let url = format!("{}/slow.bin", mock_server.uri());
    let limiter = RateLimiter::new(10_000);
    let started = Instant::now();
    client()
        .download_to_path(
            &url,
            &BTreeMap::new(),
            &temp_dir.path().join("slow.bin"),
            SizeWindow::default(),
            &limiter,
            |_| {},
        )
        .await
        .unwrap();

    // The bucket starts with one second of budget; the rest must wait.
    assert!(
        started.elapsed() >= Duration::from_millis(800),
        "transfer finished too fast: {:?}",
        started.elapsed()
    );
    assert!(limiter.cumulative_delay() > Duration::ZERO);
}
