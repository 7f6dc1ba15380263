//! Microphone capture as a live lip-sync source
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! platform). The callback forwards PCM blocks over a bounded channel; the
//! animation tick drains them into a rolling mono window and turns the window
//! into analyser magnitudes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;

use super::device::open_input_device;
use super::spectrum::byte_magnitudes;
use crate::animation::MagnitudeSource;
use crate::errors::AvatarError;

/// Blocks buffered before the callback starts dropping.
/// At 48kHz with ~10ms callbacks this is about 2.5s.
const MAX_BUFFER_BLOCKS: usize = 256;

/// Samples per analysis window (matches a 256-point analyser)
pub const WINDOW_SAMPLES: usize = 256;

pub struct MicrophoneSource {
    receiver: crossbeam_channel::Receiver<Vec<f32>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    window: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl MicrophoneSource {
    /// Start capturing from `device` (system default when `None`)
    pub fn start(device: Option<&str>) -> Result<Self, AvatarError> {
        let (sender, receiver) = crossbeam_channel::bounded(MAX_BUFFER_BLOCKS);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(u32, u16), AvatarError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let device = device.map(str::to_string);

        let thread = std::thread::Builder::new()
            .name("crabavatar-mic".to_string())
            .spawn(move || {
                let stream = match build_stream(device.as_deref(), sender) {
                    Ok((stream, rate, channels)) => {
                        let _ = ready_tx.send(Ok((rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while thread_running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
            })
            .map_err(|e| AvatarError::Audio(format!("Failed to spawn capture thread: {}", e)))?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| AvatarError::Audio("capture thread exited early".to_string()))??;
        log::info!("Microphone capture at {}Hz x{}", sample_rate, channels);

        Ok(Self {
            receiver,
            running,
            thread: Some(thread),
            window: Vec::with_capacity(WINDOW_SAMPLES),
            channels,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop capture and join the capture thread (idempotent)
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn push_block(&mut self, block: &[f32]) {
        let channels = self.channels.max(1) as usize;
        for frame in block.chunks(channels) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            self.window.push(mono);
        }
        if self.window.len() > WINDOW_SAMPLES {
            let excess = self.window.len() - WINDOW_SAMPLES;
            self.window.drain(..excess);
        }
    }
}

impl MagnitudeSource for MicrophoneSource {
    fn snapshot(&mut self, buf: &mut Vec<u8>) -> bool {
        let mut fresh = false;
        while let Ok(block) = self.receiver.try_recv() {
            self.push_block(&block);
            fresh = true;
        }
        if !fresh || self.window.len() < WINDOW_SAMPLES {
            return false;
        }
        byte_magnitudes(&self.window, buf);
        true
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device: Option<&str>,
    sender: crossbeam_channel::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32, u16), AvatarError> {
    let device = open_input_device(device)?;
    let supported = device
        .default_input_config()
        .map_err(|e| AvatarError::DeviceUnavailable(format!("No supported config: {}", e)))?;

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Non-blocking: a slow consumer loses blocks, never stalls the callback.
                let _ = sender.try_send(data.to_vec());
            },
            move |err| {
                log::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AvatarError::DeviceUnavailable("audio input busy or missing".to_string())
            }
            other => AvatarError::Audio(format!("Failed to build stream: {}", other)),
        })?;
    stream
        .play()
        .map_err(|e| AvatarError::Audio(format!("Failed to start stream: {}", e)))?;

    Ok((stream, config.sample_rate.0, config.channels))
}
