use dslr_control::errors::CameraError;
use dslr_control::gphoto2_sys::{GP_ERROR_CAMERA_BUSY, GP_ERROR_NOT_SUPPORTED};
use dslr_control::testing::{DriverCall, FakeDriver};
use dslr_control::{capture_async, CameraSession, LiveView, SessionConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn shared_session(driver: &FakeDriver, incoming: &Path) -> Arc<CameraSession<FakeDriver>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = SessionConfig::default().with_incoming_dir(incoming);
    Arc::new(CameraSession::new(driver.clone(), config).expect("session"))
}

#[tokio::test]
async fn live_view_publishes_frames_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    driver.state().preview_buffer = vec![0xFF, 0xD8, 0xFF, 0xD9];
    let session = shared_session(&driver, dir.path());

    let live = LiveView::start(session.clone(), Duration::from_millis(5));
    let mut frames = live.frames();
    timeout(Duration::from_secs(5), frames.changed())
        .await
        .expect("frame within timeout")
        .expect("pump alive");

    let frame = live.latest().expect("latest frame");
    assert_eq!(frame.data(), &[0xFF, 0xD8, 0xFF, 0xD9]);
    assert_eq!(frame.to_live_view().data, "/9j/2Q==");
    assert!(live.is_running());
    assert!(session.is_liveview_enabled());

    live.stop().await;

    assert!(!session.is_liveview_enabled());
    let polls = driver.state().count(&DriverCall::CapturePreview);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(driver.state().count(&DriverCall::CapturePreview), polls);
}

#[tokio::test]
async fn live_view_keeps_polling_without_frames() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    driver.state().fail_preview = Some(GP_ERROR_NOT_SUPPORTED);
    let session = shared_session(&driver, dir.path());

    let live = LiveView::start(session.clone(), Duration::from_millis(2));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(live.latest().is_none());
    assert!(live.is_running());
    assert!(driver.state().count(&DriverCall::CapturePreview) > 1);

    live.stop().await;
}

#[tokio::test]
async fn capture_runs_alongside_live_view() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let session = shared_session(&driver, dir.path());

    let live = LiveView::start(session.clone(), Duration::from_millis(1));
    let image = capture_async(session.clone()).await.unwrap();
    live.stop().await;

    assert!(image.local_path.is_file());
    assert_eq!(driver.state().overlapping_calls, 0);
}

#[tokio::test]
async fn capture_async_reports_session_errors() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    driver.state().fail_capture = Some(GP_ERROR_CAMERA_BUSY);
    let session = shared_session(&driver, dir.path());

    let err = capture_async(session).await.unwrap_err();
    assert!(matches!(err, CameraError::Capture(_)));
}
