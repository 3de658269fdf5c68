use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use uploader::{
    EventKind, HttpMethod, ManagerConfig, RetryStrategy, UploadEvent, UploadManager, UploadManagerHandle,
    UploadOptions, UploadType,
};
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn start_manager(staging: &Path) -> UploadManagerHandle {
    let config = ManagerConfig::default()
        .with_retry(RetryStrategy::Fixed { delay_ms: 10 })
        .with_staging_dir(staging)
        .with_chunk_size(4);
    UploadManager::new(config).unwrap()
}

async fn write_file(dir: &Path, name: &str, contents: &[u8]) -> String {
    let path = dir.join(name);
    tokio::fs::write(&path, contents).await.unwrap();
    path.to_str().unwrap().to_string()
}

async fn next_terminal(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> UploadEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if event.is_terminal() {
            return event;
        }
    }
}

#[tokio::test]
async fn test_binary_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("content-type", "image/jpeg"))
        .and(header("authorization", "Bearer token"))
        .and(body_bytes(b"jpeg-bytes".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "photo.jpg", b"jpeg-bytes").await;
    let handle = start_manager(dir.path());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe().await.unwrap();

    let options = UploadOptions::default().with_header("Authorization", "Bearer token");
    let id = manager
        .start_upload(&file, &format!("{}/upload", server.uri()), options)
        .await
        .unwrap();

    let mut percents = Vec::new();
    let event = loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event.kind {
            EventKind::Uploading { percent } => percents.push(percent),
            _ => break event,
        }
    };

    assert_eq!(event.id, id);
    assert_eq!(event.kind, EventKind::Completed { status_code: Some(201) });
    assert_eq!(percents.last().copied(), Some(100.0));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_multipart_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "photo.jpg", b"jpeg-bytes").await;
    let handle = start_manager(staging.path());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe().await.unwrap();

    let options = UploadOptions::default()
        .with_upload_type(UploadType::Multipart)
        .with_parameter("a", "1")
        .with_file_field("upload");
    manager
        .start_upload(&file, &format!("{}/form", server.uri()), options)
        .await
        .unwrap();

    let event = next_terminal(&mut events).await;
    assert_eq!(event.kind, EventKind::Completed { status_code: Some(200) });

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let content_type = requests[0].headers.get("content-type").unwrap().to_str().unwrap().to_string();
    let boundary = content_type.strip_prefix("multipart/form-data; boundary=").unwrap();

    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    let param = body.find("Content-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n").unwrap();
    let file_part = body
        .find("Content-Disposition: form-data; name=\"upload\"; filename=\"photo.jpg\"\r\nContent-Type: image/jpeg\r\n\r\njpeg-bytes\r\n")
        .unwrap();
    assert!(param < file_part);
    assert!(body.starts_with(&format!("--{}\r\n", boundary)));
    assert!(body.ends_with(&format!("--{}--\r\n", boundary)));

    // 暂存文件在完成后删除
    let mut entries = tokio::fs::read_dir(staging.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_retried_then_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "photo.jpg", b"jpeg-bytes").await;
    let handle = start_manager(dir.path());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe().await.unwrap();

    let id = manager
        .start_upload(&file, &format!("{}/upload", server.uri()), UploadOptions::default().with_max_retries(2))
        .await
        .unwrap();

    let event = next_terminal(&mut events).await;
    assert_eq!(event.id, id);
    assert_eq!(
        event.kind,
        EventKind::Failed { error: "HTTP error! status: 500".to_string(), status_code: Some(500) }
    );

    let pending = manager.pending_events().await.unwrap();
    assert_eq!(pending, vec![event]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_put_sends_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/photo.jpg"))
        .and(header("content-type", "image/jpeg"))
        .and(body_bytes(b"jpeg-bytes".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "photo.jpg", b"jpeg-bytes").await;
    let handle = start_manager(dir.path());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe().await.unwrap();

    let options = UploadOptions::default()
        .with_method(HttpMethod::Put)
        .with_upload_type(UploadType::Multipart)
        .with_parameter("ignored", "yes");
    manager
        .start_upload(&file, &format!("{}/bucket/photo.jpg?X-Amz-Signature=abc", server.uri()), options)
        .await
        .unwrap();

    let event = next_terminal(&mut events).await;
    assert_eq!(event.kind, EventKind::Completed { status_code: Some(200) });

    handle.shutdown().await.unwrap();
}
