//! Capture from the default input device through cpal.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::capture::{
    LocalStream, LocalTrack, MediaConstraints, MediaDevices, MediaSample, TrackFeed, TrackKind,
};
use crate::error::MediaError;
use crate::pcmu;

const CAPTURE_RATE: u32 = 48_000;
const WIRE_RATE: u32 = 8_000;
const FRAME: Duration = Duration::from_millis(20);
// 20 ms at 48 kHz mono.
const CAPTURE_FRAME: usize = (CAPTURE_RATE / 50) as usize;

/// Real microphone, no camera source. The video track exists so the
/// camera toggle keeps working, but it never carries frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrophoneDevices;

#[async_trait]
impl MediaDevices for MicrophoneDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        let mut tracks = Vec::new();
        if constraints.audio {
            let track = LocalTrack::new(TrackKind::Audio, "microphone");
            start_capture(track.feed())?;
            tracks.push(track);
        }
        if constraints.video {
            warn!("No camera source, the video track stays empty");
            tracks.push(LocalTrack::new(TrackKind::Video, "camera"));
        }
        Ok(LocalStream::new(tracks))
    }
}

fn start_capture(feed: TrackFeed) -> Result<(), MediaError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::Capture("no microphone available".into()))?;

    info!(device = ?device.name(), "Using input device");

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(CAPTURE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let decimation = (CAPTURE_RATE / WIRE_RATE) as usize;
    let mut buffer = Vec::with_capacity(CAPTURE_FRAME);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                if feed.is_closed() {
                    return;
                }
                buffer.extend_from_slice(data);
                while buffer.len() >= CAPTURE_FRAME {
                    let frame: Vec<f32> = buffer.drain(..CAPTURE_FRAME).collect();
                    feed.push(MediaSample {
                        data: pcmu::encode_frame(&frame, decimation),
                        duration: FRAME,
                    });
                }
            },
            move |err| {
                error!("Audio input error: {err}");
            },
            None,
        )
        .map_err(|e| MediaError::Capture(e.to_string()))?;

    stream
        .play()
        .map_err(|e| MediaError::Capture(e.to_string()))?;

    // The callback goes quiet once the track is stopped.
    std::mem::forget(stream);

    debug!("Microphone capture started");
    Ok(())
}
