mod common;

use common::*;
use open_screenstudio_recorder::capture::{CameraDeviceOpener, ManualCamera, TrackKind, VideoFrame};
use open_screenstudio_recorder::recorder::{
    spawn_failure_watchdog, CameraConfig, CameraMode, CompositeConfig, EventLogRecorder,
    RecordingConfig,
};
use open_screenstudio_recorder::writer::{FaultPlan, MemoryLog};
use chrono::{DateTime, Utc};
use open_screenstudio_recorder::{RecordingEvent, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Mutex;

const CAMERA: [u8; 4] = [200, 100, 50, 255];

fn camera_config(mode: CameraMode) -> RecordingConfig {
    RecordingConfig {
        camera: Some(CameraConfig {
            width: 20,
            height: 20,
            mode,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn files_in(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_composited_into_screen() {
    let dir = tempdir().unwrap();
    let sampler = PixelSampler::new(176, 76);
    let (camera, camera_feed) = ManualCamera::new(20, 20, 30);
    let opener: Arc<dyn CameraDeviceOpener> = Arc::new(camera);
    let mut rig = rig(dir.path(), false, Arc::new(sampler.clone()), Some(opener));
    rig.clock.set(ms(1_000));

    rig.coordinator
        .start(camera_config(CameraMode::Composite(CompositeConfig::default())))
        .await
        .unwrap();
    let producer = rig.coordinator.camera().unwrap().clone();
    assert!(producer.is_running());

    // No camera frame yet: screen goes out untouched
    rig.feed.push(video(990));

    camera_feed.push(VideoFrame::solid(20, 20, CAMERA));
    assert!(wait_until(|| producer.frames_captured() >= 1));
    rig.feed.push(video(1_000));
    rig.feed.push(video(1_150));
    // Past the staleness window
    rig.feed.push(video(1_151));

    let artifact = rig.coordinator.stop(false).await.unwrap().unwrap();
    assert_eq!(artifact.secondary_path, None);
    assert_eq!(artifact.secondary_offset_ms, None);
    assert!(!producer.is_running());

    let pixels = sampler.pixels.lock().clone();
    assert_eq!(pixels.len(), 4);
    assert!(close(pixels[0], SCREEN));
    assert!(close(pixels[1], CAMERA));
    assert!(close(pixels[2], CAMERA));
    assert!(close(pixels[3], SCREEN));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_recorded_to_separate_file() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let (camera, camera_feed) = ManualCamera::new(20, 20, 30);
    let mut rig = rig(
        dir.path(),
        false,
        memory_writers(&log, FaultPlan::default()),
        Some(Arc::new(camera)),
    );
    rig.clock.set(ms(1_000));

    rig.coordinator
        .start(camera_config(CameraMode::SeparateFile))
        .await
        .unwrap();
    let producer = rig.coordinator.camera().unwrap().clone();
    rig.feed.push(video(1_000));

    rig.clock.set(ms(1_200));
    camera_feed.push(VideoFrame::solid(20, 20, CAMERA));
    assert!(wait_until(|| producer.frames_captured() >= 1));
    rig.clock.set(ms(1_233));
    camera_feed.push(VideoFrame::solid(20, 20, CAMERA));
    assert!(wait_until(|| producer.frames_captured() >= 2));
    rig.feed.push(video(1_033));

    let artifact = rig.coordinator.stop(false).await.unwrap().unwrap();
    let secondary = artifact.secondary_path.clone().unwrap();
    assert!(secondary.exists());
    assert!((artifact.secondary_offset_ms.unwrap() - 200.0).abs() < 0.5);
    assert_eq!(artifact.files().len(), 2);

    let camera_log = log.session_for(&secondary).unwrap();
    assert_eq!(camera_log.count(TrackKind::Video), 2);
    assert_eq!(camera_log.times(TrackKind::Video), vec![ms(0), ms(33)]);
    assert!(camera_log.finished);

    // The screen file never sees a camera frame
    let screen_log = log.session_for(&artifact.primary_path).unwrap();
    assert_eq!(screen_log.count(TrackKind::Video), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unavailable_camera_degrades_to_screen_only() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let (camera, camera_feed) = ManualCamera::new(20, 20, 30);
    camera_feed.set_unavailable(true);
    let mut rig = rig(
        dir.path(),
        false,
        memory_writers(&log, FaultPlan::default()),
        Some(Arc::new(camera)),
    );
    let mut events = rig.coordinator.subscribe();

    rig.coordinator
        .start(camera_config(CameraMode::SeparateFile))
        .await
        .unwrap();
    assert_eq!(rig.coordinator.warnings().len(), 1);
    rig.feed.push(video(0));

    let artifact = rig.coordinator.stop(false).await.unwrap().unwrap();
    assert_eq!(artifact.secondary_path, None);
    assert_eq!(artifact.warnings.len(), 1);
    assert!(artifact.primary_path.exists());
    assert_eq!(log.sessions().len(), 1);

    let mut warned = false;
    while let Ok(event) = events.try_recv() {
        warned |= matches!(event, RecordingEvent::Warning(_));
    }
    assert!(warned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_log_sidecar_written() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let mut rig = rig(dir.path(), false, memory_writers(&log, FaultPlan::default()), None);
    rig.coordinator.add_sidecar(Box::new(EventLogRecorder::new()));

    rig.coordinator.start(RecordingConfig::default()).await.unwrap();
    rig.feed.push(video(0));
    rig.coordinator.pause().unwrap();
    rig.coordinator.resume().unwrap();

    let artifact = rig.coordinator.stop(false).await.unwrap().unwrap();
    assert_eq!(artifact.sidecar_files.len(), 1);

    let body = std::fs::read_to_string(&artifact.sidecar_files[0]).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let events = json["events"].as_array().unwrap();
    assert!(events.len() >= 2);
    assert!(json["startedAt"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_log_aligned_to_first_frame() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let mut rig = rig(dir.path(), false, memory_writers(&log, FaultPlan::default()), None);
    rig.coordinator.add_sidecar(Box::new(EventLogRecorder::new()));

    rig.coordinator.start(RecordingConfig::default()).await.unwrap();
    let armed = Utc::now();
    tokio::time::sleep(Duration::from_millis(300)).await;
    rig.feed.push(video(0));
    rig.coordinator.pause().unwrap();
    rig.coordinator.resume().unwrap();

    let artifact = rig.coordinator.stop(false).await.unwrap().unwrap();
    assert!(artifact.started_at - armed >= chrono::Duration::milliseconds(300));

    let body = std::fs::read_to_string(&artifact.sidecar_files[0]).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let started_at: DateTime<Utc> = serde_json::from_value(json["startedAt"].clone()).unwrap();
    assert_eq!(started_at, artifact.started_at);

    let events = json["events"].as_array().unwrap();
    let paused = events
        .iter()
        .find(|e| e["event"]["type"] == "paused")
        .unwrap();
    let offset = paused["processTimeMs"].as_f64().unwrap();
    assert!((0.0..300.0).contains(&offset));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_lost_mid_recording_degrades() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let (camera, camera_feed) = ManualCamera::new(20, 20, 30);
    let mut rig = rig(
        dir.path(),
        false,
        memory_writers(&log, FaultPlan::default()),
        Some(Arc::new(camera)),
    );
    let mut events = rig.coordinator.subscribe();

    rig.coordinator
        .start(camera_config(CameraMode::SeparateFile))
        .await
        .unwrap();
    assert!(rig.coordinator.warnings().is_empty());
    let producer = rig.coordinator.camera().unwrap().clone();
    rig.feed.push(video(0));
    camera_feed.push(VideoFrame::solid(20, 20, CAMERA));
    assert!(wait_until(|| producer.frames_captured() >= 1));

    // Unplugged while recording
    drop(camera_feed);
    assert!(wait_until(|| rig.coordinator.warnings().len() == 1));
    rig.feed.push(video(33));

    let artifact = rig.coordinator.stop(false).await.unwrap().unwrap();
    assert!(artifact.primary_path.exists());
    assert_eq!(artifact.warnings.len(), 1);
    assert!(artifact.warnings[0].contains("Camera lost"));
    assert_eq!(log.session_for(&artifact.primary_path).unwrap().count(TrackKind::Video), 2);

    let mut warned = false;
    while let Ok(event) = events.try_recv() {
        if let RecordingEvent::Warning(message) = event {
            warned |= message.contains("Camera lost");
        }
    }
    assert!(warned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discard_removes_every_file() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let (camera, camera_feed) = ManualCamera::new(20, 20, 30);
    let mut rig = rig(
        dir.path(),
        false,
        memory_writers(&log, FaultPlan::default()),
        Some(Arc::new(camera)),
    );
    rig.coordinator.add_sidecar(Box::new(EventLogRecorder::new()));

    rig.coordinator
        .start(camera_config(CameraMode::SeparateFile))
        .await
        .unwrap();
    let producer = rig.coordinator.camera().unwrap().clone();
    rig.feed.push(video(0));
    camera_feed.push(VideoFrame::solid(20, 20, CAMERA));
    assert!(wait_until(|| producer.frames_captured() >= 1));

    assert!(rig.coordinator.stop(true).await.unwrap().is_none());
    assert_eq!(files_in(&rig.dir), 0);
    assert_eq!(rig.coordinator.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_primary_failure_removes_camera_file() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let faults = FaultPlan {
        fail_finish: true,
        ..Default::default()
    };
    let (camera, camera_feed) = ManualCamera::new(20, 20, 30);
    let mut rig = rig(dir.path(), false, memory_writers(&log, faults), Some(Arc::new(camera)));

    rig.coordinator
        .start(camera_config(CameraMode::SeparateFile))
        .await
        .unwrap();
    let producer = rig.coordinator.camera().unwrap().clone();
    rig.feed.push(video(0));
    camera_feed.push(VideoFrame::solid(20, 20, CAMERA));
    assert!(wait_until(|| producer.frames_captured() >= 1));

    assert!(rig.coordinator.stop(false).await.is_err());
    assert_eq!(files_in(&rig.dir), 0);
    assert!(!rig.coordinator.is_recording());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watchdog_aborts_on_writer_failure() {
    let dir = tempdir().unwrap();
    let log = MemoryLog::new();
    let faults = FaultPlan {
        fatal_append_at: Some((TrackKind::Video, 3)),
        ..Default::default()
    };
    let Rig {
        coordinator, feed, ..
    } = rig(dir.path(), false, memory_writers(&log, faults), None);
    let mut events = coordinator.subscribe();
    let coordinator = Arc::new(Mutex::new(coordinator));

    coordinator
        .lock()
        .await
        .start(RecordingConfig::default())
        .await
        .unwrap();
    let primary = coordinator.lock().await.paths().unwrap().primary.clone();
    let watchdog = spawn_failure_watchdog(coordinator.clone()).await;

    for i in 0..5 {
        feed.push(video(i * 33));
    }

    tokio::time::timeout(Duration::from_secs(5), watchdog)
        .await
        .unwrap()
        .unwrap();
    assert!(!coordinator.lock().await.is_recording());
    assert!(!primary.exists());

    let mut failed = 0;
    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        match event {
            RecordingEvent::WriterFailed(_) => failed += 1,
            RecordingEvent::Error(_) => aborted = true,
            _ => {}
        }
    }
    assert_eq!(failed, 1);
    assert!(aborted);
}
