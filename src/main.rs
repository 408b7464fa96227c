use anyhow::{Context, Result};
use clap::Parser;
use open_screenstudio_recorder::capture::{
    CameraDeviceOpener, CaptureBackend, SourceSet, StaticPermission, SyntheticAudio,
    SyntheticCamera, SyntheticScreen,
};
use open_screenstudio_recorder::recorder::{
    spawn_failure_watchdog, CameraConfig, CameraMode, CompositeConfig, EventLogRecorder,
    RecordingConfig, RecordingCoordinator,
};
use open_screenstudio_recorder::utils::{SystemClock, TimestampedNaming};
use open_screenstudio_recorder::writer::{FfmpegWriterFactory, MemoryLog, MemoryWriterFactory, WriterFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Record a test pattern through the full capture pipeline
#[derive(Parser, Debug)]
#[command(name = "screenstudio-record")]
#[command(about = "Record synthetic screen, audio and camera sources to MP4")]
struct Args {
    /// JSON recording config; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to record, in seconds
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,

    /// Screen width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Screen height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Add a camera (composited unless the config says otherwise)
    #[arg(long)]
    camera: bool,

    /// Record the camera to its own file
    #[arg(long)]
    separate_camera: bool,

    /// Pause for this many seconds halfway through
    #[arg(long)]
    pause: Option<u64>,

    /// Write JSON manifests instead of encoding with ffmpeg
    #[arg(long)]
    dry_run: bool,

    /// Print the cameras nokhwa can see and exit
    #[cfg(feature = "native-camera")]
    #[arg(long)]
    list_cameras: bool,
}

fn screen_backend(args: &Args, config: &RecordingConfig) -> Box<dyn CaptureBackend> {
    let screen: Box<dyn CaptureBackend> = Box::new(SyntheticScreen::new(args.width, args.height));
    if !config.capture_microphone {
        return screen;
    }

    #[cfg(feature = "native-audio")]
    let mic: Box<dyn CaptureBackend> =
        Box::new(open_screenstudio_recorder::capture::microphone::CpalMicrophone::new());
    #[cfg(not(feature = "native-audio"))]
    let mic: Box<dyn CaptureBackend> = Box::new(SyntheticAudio::default());

    Box::new(SourceSet::new(vec![screen, mic]))
}

fn camera_opener(camera: &CameraConfig) -> Arc<dyn CameraDeviceOpener> {
    #[cfg(feature = "native-camera")]
    if camera.device_id.is_some() {
        return Arc::new(open_screenstudio_recorder::capture::nokhwa_camera::NokhwaCamera::new(camera));
    }
    Arc::new(SyntheticCamera::new(camera.width, camera.height, camera.fps))
}

#[tokio::main]
async fn main() -> Result<()> {
    open_screenstudio_recorder::init_tracing();
    let args = Args::parse();

    #[cfg(feature = "native-camera")]
    if args.list_cameras {
        let cameras = open_screenstudio_recorder::capture::nokhwa_camera::get_cameras();
        println!("{}", serde_json::to_string_pretty(&cameras)?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => RecordingConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RecordingConfig::default(),
    };
    if args.camera || args.separate_camera {
        let camera = config.camera.get_or_insert_with(CameraConfig::default);
        if args.separate_camera {
            camera.mode = CameraMode::SeparateFile;
        } else if camera.mode == CameraMode::SeparateFile {
            camera.mode = CameraMode::Composite(CompositeConfig::default());
        }
    }

    let writers: Arc<dyn WriterFactory> = if args.dry_run {
        Arc::new(MemoryWriterFactory::new(MemoryLog::new()))
    } else {
        Arc::new(FfmpegWriterFactory::default())
    };

    let mut coordinator = RecordingCoordinator::new(
        screen_backend(&args, &config),
        writers,
        Arc::new(StaticPermission(true)),
        Arc::new(SystemClock::new()),
        Arc::new(TimestampedNaming::new(&config.output_dir, "recording")),
    );
    if let Some(camera) = &config.camera {
        coordinator = coordinator.with_camera(camera_opener(camera));
    }
    coordinator.add_sidecar(Box::new(EventLogRecorder::new()));

    let coordinator = Arc::new(Mutex::new(coordinator));
    coordinator.lock().await.start(config).await?;
    let watchdog = spawn_failure_watchdog(coordinator.clone()).await;

    let total = Duration::from_secs(args.seconds);
    match args.pause {
        Some(pause) => {
            tokio::time::sleep(total / 2).await;
            coordinator.lock().await.pause()?;
            tokio::time::sleep(Duration::from_secs(pause)).await;
            coordinator.lock().await.resume()?;
            tokio::time::sleep(total - total / 2).await;
        }
        None => tokio::time::sleep(total).await,
    }

    let artifact = {
        let mut coordinator = coordinator.lock().await;
        // The watchdog may already have aborted it
        if coordinator.is_recording() {
            coordinator.stop(false).await?
        } else {
            None
        }
    };
    let _ = watchdog.await;

    match artifact {
        Some(artifact) => println!("{}", serde_json::to_string_pretty(&artifact)?),
        None => anyhow::bail!("recording was aborted"),
    }
    Ok(())
}
