//! System audio through cpal, encoded with Opus.
//!
//! cpal streams are not `Send`, so each one is owned by a blocking task that
//! parks on a control channel until told to stop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, StreamConfig};
use opus::{Application, Channels as OpusChannels, Decoder, Encoder};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use voxmesh_common::Quality;

use super::{AudioDecoder, AudioError, AudioOutput, LevelMeter, CHANNELS, FRAME_SIZE, FRAME_SIZE_MS, SAMPLE_RATE};
use crate::media::{CaptureGuard, MediaBackend, MediaError, MediaFrame};

/// Upper bound on queued playback samples (about one second).
const MAX_PLAYBACK_SAMPLES: usize = SAMPLE_RATE as usize * CHANNELS as usize;

/// Control messages for capture and playback tasks
enum StreamControl {
    Stop,
}

const fn stream_config() -> StreamConfig {
    StreamConfig {
        channels: CHANNELS,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    }
}

fn stop_guard(control: mpsc::Sender<StreamControl>) -> CaptureGuard {
    CaptureGuard::new(move || {
        let _ = control.try_send(StreamControl::Stop);
    })
}

/// Microphone capture on the default input device.
#[derive(Debug, Default)]
pub struct NativeBackend;

impl MediaBackend for NativeBackend {
    fn open_microphone(
        &mut self,
        frames: mpsc::Sender<MediaFrame>,
        meter: LevelMeter,
    ) -> Result<CaptureGuard, MediaError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)
            .map_err(|e| MediaError::Microphone(e.to_string()))?;
        let encoder = Encoder::new(SAMPLE_RATE, OpusChannels::Stereo, Application::Voip)
            .map_err(|e| MediaError::Microphone(AudioError::EncoderError(e.to_string()).to_string()))?;

        let (control_tx, mut control_rx) = mpsc::channel(1);
        tokio::task::spawn_blocking(move || {
            run_capture_task(device, encoder, meter, frames, &mut control_rx);
        });

        info!("Audio capture started");
        Ok(stop_guard(control_tx))
    }

    fn open_display(
        &mut self,
        _quality: Quality,
        _frames: mpsc::Sender<MediaFrame>,
    ) -> Result<CaptureGuard, MediaError> {
        Err(MediaError::Unsupported("display capture"))
    }
}

/// Run capture task (owns the Stream)
fn run_capture_task(
    device: Device,
    mut encoder: Encoder,
    meter: LevelMeter,
    frames: mpsc::Sender<MediaFrame>,
    control_rx: &mut mpsc::Receiver<StreamControl>,
) {
    let frame_samples = FRAME_SIZE * CHANNELS as usize;
    let frame_duration = Duration::from_millis(FRAME_SIZE_MS as u64);
    let mut buffer: Vec<f32> = Vec::with_capacity(frame_samples * 2);
    let stream_meter = meter.clone();

    let stream = match device.build_input_stream(
        &stream_config(),
        move |data: &[f32], _| {
            buffer.extend_from_slice(data);

            while buffer.len() >= frame_samples {
                let frame: Vec<f32> = buffer.drain(..frame_samples).collect();
                stream_meter.measure(&frame);

                let samples_i16: Vec<i16> = frame
                    .iter()
                    .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                    .collect();

                let mut encoded = vec![0u8; 4000];
                match encoder.encode(&samples_i16, &mut encoded) {
                    Ok(len) => {
                        encoded.truncate(len);
                        let frame = MediaFrame {
                            data: Bytes::from(encoded),
                            duration: frame_duration,
                        };
                        if let Err(e) = frames.try_send(frame) {
                            warn!("Failed to send encoded audio: {}", e);
                        }
                    }
                    Err(e) => error!("Opus encode error: {}", e),
                }
            }
        },
        |err| {
            error!("Audio capture stream error: {}", err);
        },
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build capture stream: {}", e);
            return;
        }
    };

    if let Err(e) = stream.play() {
        error!("Failed to start capture stream: {}", e);
        return;
    }

    // Block until stop signal
    while let Some(msg) = control_rx.blocking_recv() {
        match msg {
            StreamControl::Stop => break,
        }
    }

    drop(stream);
    meter.reset();
    info!("Capture task stopped");
}

/// Opus decoder for one incoming stream.
pub struct OpusDecoder {
    decoder: Decoder,
    buffer: Vec<i16>,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, AudioError> {
        let decoder = Decoder::new(SAMPLE_RATE, OpusChannels::Stereo)
            .map_err(|e| AudioError::DecoderError(e.to_string()))?;
        Ok(Self {
            decoder,
            // Room for the longest Opus frame (120 ms).
            buffer: vec![0; FRAME_SIZE * 6 * CHANNELS as usize],
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>, AudioError> {
        let per_channel = self
            .decoder
            .decode(packet, &mut self.buffer, false)
            .map_err(|e| AudioError::DecoderError(e.to_string()))?;
        Ok(self.buffer[..per_channel * CHANNELS as usize]
            .iter()
            .map(|&s| f32::from(s) / 32768.0)
            .collect())
    }
}

/// Running playback on the default output device. Stops when dropped.
pub struct Playback {
    control: mpsc::Sender<StreamControl>,
}

impl Drop for Playback {
    fn drop(&mut self) {
        let _ = self.control.try_send(StreamControl::Stop);
        debug!("Audio playback stopped");
    }
}

/// Start playback on the default output device.
///
/// Returns the output to hand to remote stream readers and the handle that
/// keeps the device open.
pub fn start_playback() -> Result<(AudioOutput, Playback), AudioError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let (pcm_tx, pcm_rx) = mpsc::channel::<Vec<f32>>(64);
    let (control_tx, mut control_rx) = mpsc::channel(1);

    tokio::task::spawn_blocking(move || {
        run_playback_task(device, pcm_rx, &mut control_rx);
    });

    info!("Audio playback started");
    Ok((AudioOutput::with_sink(pcm_tx), Playback { control: control_tx }))
}

/// Run playback task (owns the Stream)
fn run_playback_task(
    device: Device,
    mut pcm_rx: mpsc::Receiver<Vec<f32>>,
    control_rx: &mut mpsc::Receiver<StreamControl>,
) {
    let playback_buffer = Arc::new(Mutex::new(VecDeque::<f32>::new()));

    // TODO: mix concurrent speakers instead of queueing their frames back to back.
    let feeder_buffer = playback_buffer.clone();
    std::thread::spawn(move || {
        while let Some(pcm) = pcm_rx.blocking_recv() {
            if let Ok(mut buffer) = feeder_buffer.lock() {
                buffer.extend(pcm);
                let excess = buffer.len().saturating_sub(MAX_PLAYBACK_SAMPLES);
                buffer.drain(..excess);
            }
        }
    });

    let stream = match device.build_output_stream(
        &stream_config(),
        move |data: &mut [f32], _| {
            let Ok(mut buffer) = playback_buffer.lock() else {
                data.fill(0.0);
                return;
            };
            for sample in data.iter_mut() {
                *sample = buffer.pop_front().unwrap_or(0.0);
            }
        },
        |err| {
            error!("Audio playback stream error: {}", err);
        },
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build playback stream: {}", e);
            return;
        }
    };

    if let Err(e) = stream.play() {
        error!("Failed to start playback stream: {}", e);
        return;
    }

    while let Some(msg) = control_rx.blocking_recv() {
        match msg {
            StreamControl::Stop => break,
        }
    }

    drop(stream);
    info!("Playback task stopped");
}
