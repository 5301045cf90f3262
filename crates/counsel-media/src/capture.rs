//! Local camera/microphone capture.
//!
//! A [`LocalStream`] is owned by exactly one call screen and must be
//! released on every exit path. Muting or hiding the camera only flips a
//! track's `enabled` flag; samples pushed while a track is disabled never
//! reach the peer, and no renegotiation happens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

const SAMPLE_BUFFER: usize = 64;

/// One encoded media frame: PCMU at 8 kHz for audio, VP8 for video.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub data: Bytes,
    pub duration: Duration,
}

#[derive(Debug)]
struct TrackFlags {
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Producer side of a track, handed to whatever source fills it.
#[derive(Debug, Clone)]
pub struct TrackFeed {
    flags: Arc<TrackFlags>,
    samples: broadcast::Sender<MediaSample>,
}

impl TrackFeed {
    /// Forward `sample` to the track's subscribers. Dropped, returning
    /// `false`, while the track is disabled or stopped.
    pub fn push(&self, sample: MediaSample) -> bool {
        if !self.is_live() {
            return false;
        }
        self.samples.send(sample).is_ok()
    }

    fn is_live(&self) -> bool {
        self.flags.enabled.load(Ordering::Relaxed) && !self.is_closed()
    }

    /// `true` once the track was stopped; sources should wind down.
    pub fn is_closed(&self) -> bool {
        self.flags.stopped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct LocalTrack {
    kind: TrackKind,
    label: String,
    flags: Arc<TrackFlags>,
    samples: broadcast::Sender<MediaSample>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (samples, _) = broadcast::channel(SAMPLE_BUFFER);
        Self {
            kind,
            label: label.into(),
            flags: Arc::new(TrackFlags {
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
            samples,
        }
    }

    pub fn feed(&self) -> TrackFeed {
        TrackFeed {
            flags: self.flags.clone(),
            samples: self.samples.clone(),
        }
    }

    /// Receive every sample pushed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaSample> {
        self.samples.subscribe()
    }

    fn set_enabled(&self, enabled: bool) {
        self.flags.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.enabled.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::SeqCst)
    }
}

/// The single local capture of a call.
#[derive(Debug)]
pub struct LocalStream {
    tracks: Vec<LocalTrack>,
    released: Arc<AtomicBool>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            tracks,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag that turns `true` once the hardware is released.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Flip every track of `kind`. Returns the new state, or `None` if the
    /// stream has no such track.
    pub fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let mut state = None;
        for track in self.tracks.iter().filter(|t| t.kind == kind && !t.is_stopped()) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            state = Some(enabled);
        }
        if let Some(enabled) = state {
            debug!(kind = ?kind, enabled, "Local track toggled");
        }
        state
    }

    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind == kind && t.is_enabled() && !t.is_stopped())
    }

    /// Stop every track. Idempotent.
    pub fn stop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for track in &self.tracks {
            track.flags.stopped.store(true, Ordering::SeqCst);
            track.set_enabled(false);
        }
        info!(tracks = self.tracks.len(), "Local capture released");
    }

    pub fn is_stopped(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError>;
}

/// Device set for headless clients: tracks carry no source, frames only
/// arrive through [`LocalTrack::feed`].
#[derive(Debug, Clone, Copy)]
pub struct HeadlessDevices {
    pub microphone: bool,
    pub camera: bool,
}

impl Default for HeadlessDevices {
    fn default() -> Self {
        Self {
            microphone: true,
            camera: true,
        }
    }
}

#[async_trait]
impl MediaDevices for HeadlessDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        let mut tracks = Vec::new();
        if constraints.audio {
            if !self.microphone {
                return Err(MediaError::Capture("no microphone available".into()));
            }
            tracks.push(LocalTrack::new(TrackKind::Audio, "microphone"));
        }
        if constraints.video {
            if !self.camera {
                return Err(MediaError::Capture("no camera available".into()));
            }
            tracks.push(LocalTrack::new(TrackKind::Video, "camera"));
        }
        debug!(tracks = tracks.len(), "Local capture acquired");
        Ok(LocalStream::new(tracks))
    }
}
