//! Microphone capture using cpal
//!
//! The cpal stream is not `Send` on every host, so it is built and kept
//! alive on a dedicated thread; the data callback stamps each buffer on the
//! host timeline and hands it to the pipeline.

use super::sample::{AudioBuffer, AudioFormat, Sample};
use super::traits::{CaptureBackend, CaptureRequest, SampleSink, StreamInfo};
use crate::utils::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Names of the available input devices
pub fn list_microphones() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate microphones: {}", e);
            Vec::new()
        }
    }
}

fn find_input_device(device_id: Option<&str>) -> Option<Device> {
    let host = cpal::default_host();
    match device_id {
        Some(id) => host
            .input_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == id).unwrap_or(false)),
        None => host.default_input_device(),
    }
}

/// Microphone capture backend
pub struct CpalMicrophone {
    device_id: Option<String>,
    format: Option<AudioFormat>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            device_id: None,
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalMicrophone {
    fn name(&self) -> &str {
        "microphone"
    }

    fn prepare(&mut self, request: &CaptureRequest) -> Result<StreamInfo, CaptureError> {
        if !request.microphone {
            return Ok(StreamInfo::default());
        }
        let device = find_input_device(request.microphone_device_id.as_deref()).ok_or_else(|| {
            CaptureError::NoSource(format!(
                "microphone {}",
                request.microphone_device_id.as_deref().unwrap_or("(default)")
            ))
        })?;

        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::Handshake(format!("Failed to get audio config: {}", e)))?;
        if config.sample_format() != SampleFormat::F32 {
            return Err(CaptureError::Handshake(format!(
                "unsupported microphone sample format {:?}",
                config.sample_format()
            )));
        }

        let format = AudioFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        };
        tracing::info!(
            "Microphone prepared: {} ({}Hz, {}ch)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            format.sample_rate,
            format.channels
        );
        self.device_id = request.microphone_device_id.clone();
        self.format = Some(format);
        Ok(StreamInfo {
            microphone: Some(format),
            ..StreamInfo::default()
        })
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), CaptureError> {
        let Some(format) = self.format else {
            return Ok(());
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let running = self.running.clone();
        let device_id = self.device_id.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

        let handle = std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || {
                let Some(device) = find_input_device(device_id.as_deref()) else {
                    let _ = ready_tx.send(Err(CaptureError::NoSource("microphone".to_string())));
                    return;
                };
                let stream_config = StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let callback_running = running.clone();
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !callback_running.load(Ordering::Relaxed) {
                            return;
                        }
                        let buffer = AudioBuffer::new(format, data.to_vec());
                        // Stamp with the time the first frame was captured
                        let at = sink.now().saturating_sub(buffer.duration());
                        sink.deliver(Sample::mic_audio(buffer, at));
                    },
                    |err| tracing::error!("Microphone stream error: {}", err),
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(CaptureError::Device(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Device(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                tracing::info!("Microphone stream stopped");
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let ready = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| Err(CaptureError::Handshake("microphone did not start".to_string())));
        if let Err(e) = ready {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        self.thread = Some(handle);
        tracing::info!("Microphone capture started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Microphone thread panicked");
            }
        }
        Ok(())
    }
}
