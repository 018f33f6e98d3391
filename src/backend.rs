// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Playback backends. A backend starts clips on numbered channels and hands back a
//! [`SoundHandle`] that controls gain, fading and stopping of that one sound.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;

pub mod cpal;
pub mod decoder;
pub mod mixer;
pub mod mock;

pub use self::cpal::DeviceDescriptor;

/// Global sound ID counter.
static NEXT_SOUND_ID: AtomicU64 = AtomicU64::new(1);

/// Errors reported by playback backends.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("channel {channel} is out of range, backend has {count} channels")]
    ChannelOutOfRange { channel: usize, count: usize },

    #[error("no audio output device found with name {0}")]
    DeviceNotFound(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("unable to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("unable to resample from {0}Hz to {1}Hz")]
    Resample(u32, u32),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("audio output has stopped")]
    OutputClosed,

    #[error("start rejected for {0}")]
    Rejected(PathBuf),
}

/// A playback backend. Calls are expected to return quickly; fades and natural
/// completion happen asynchronously and are observed through [`Backend::is_busy`].
pub trait Backend: fmt::Display + Send + Sync {
    /// Starts the clip on the given channel at the given gain. Any sound already on
    /// the channel is stopped.
    fn start(
        &self,
        channel: usize,
        clip: &Path,
        looped: bool,
        gain: f32,
    ) -> Result<SoundHandle, BackendError>;

    /// Returns true while the channel still has a sound that has not finished.
    fn is_busy(&self, channel: usize) -> bool;

    /// Prepares one clip so that a later start of it is cheap. Called without any
    /// engine lock held.
    fn prepare(&self, clip: &Path) -> Result<(), BackendError> {
        let _ = clip;
        Ok(())
    }

    /// Prepares the given clips ahead of time so that starting them is cheap. Clips
    /// prepared earlier that are no longer listed may be forgotten.
    fn preload(&self, clips: &[PathBuf]) {
        let _ = clips;
    }
}

/// Lists the audio output devices known to cpal.
pub fn list_devices() -> Result<Vec<DeviceDescriptor>, BackendError> {
    cpal::list()
}

/// Opens the backend with the given device name. Names starting with "mock" open a
/// mock backend that doesn't make any sound.
pub fn get_backend(name: &str) -> Result<Arc<dyn Backend>, BackendError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Backend::get(name)));
    }

    Ok(Arc::new(cpal::Backend::open(name)?))
}

/// A requested fade to silence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fade {
    /// When the fade was requested.
    pub requested_at: Instant,
    /// How long the fade lasts.
    pub duration: Duration,
}

impl Fade {
    /// Returns true once the fade duration has elapsed.
    pub fn is_complete(&self) -> bool {
        self.requested_at.elapsed() >= self.duration
    }
}

struct SoundState {
    id: u64,
    channel: usize,
    clip: PathBuf,
    gain_bits: AtomicU32,
    fade: Mutex<Option<Fade>>,
    stopped: AtomicBool,
    finished: AtomicBool,
}

/// A handle to one started sound. Cloning is cheap and all clones control the same
/// sound, so the handle can be shared between the engine and the audio thread.
#[derive(Clone)]
pub struct SoundHandle {
    state: Arc<SoundState>,
}

impl SoundHandle {
    pub fn new(channel: usize, clip: &Path, gain: f32) -> SoundHandle {
        SoundHandle {
            state: Arc::new(SoundState {
                id: NEXT_SOUND_ID.fetch_add(1, Ordering::Relaxed),
                channel,
                clip: clip.to_path_buf(),
                gain_bits: AtomicU32::new(clamp_gain(gain).to_bits()),
                fade: Mutex::new(None),
                stopped: AtomicBool::new(false),
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn channel(&self) -> usize {
        self.state.channel
    }

    pub fn clip(&self) -> &Path {
        &self.state.clip
    }

    /// Sets the gain, clamped to [0, 1].
    pub fn set_gain(&self, gain: f32) {
        self.state
            .gain_bits
            .store(clamp_gain(gain).to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.state.gain_bits.load(Ordering::Relaxed))
    }

    /// Fades the sound to silence over the given duration. A fade in progress can't
    /// be restarted, so only the first request takes effect. Returns true if this
    /// call started the fade.
    pub fn fade_to_silence(&self, duration: Duration) -> bool {
        let mut fade = self.state.fade.lock();
        if fade.is_some() {
            return false;
        }
        *fade = Some(Fade {
            requested_at: Instant::now(),
            duration,
        });
        true
    }

    /// The fade requested for this sound, if any.
    pub fn fade(&self) -> Option<Fade> {
        *self.state.fade.lock()
    }

    /// Stops the sound immediately.
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Relaxed)
    }

    /// Marks the sound as finished. Called by the backend once nothing more of the
    /// sound will be heard.
    pub fn mark_finished(&self) {
        self.state.finished.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SoundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundHandle")
            .field("id", &self.id())
            .field("channel", &self.channel())
            .field("clip", &self.clip())
            .field("gain", &self.gain())
            .field("fade", &self.fade())
            .field("stopped", &self.is_stopped())
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gain_is_clamped() {
        let handle = SoundHandle::new(0, Path::new("1/a.wav"), 1.5);
        assert_eq!(handle.gain(), 1.0);
        handle.set_gain(-0.2);
        assert_eq!(handle.gain(), 0.0);
        handle.set_gain(f32::NAN);
        assert_eq!(handle.gain(), 0.0);
        handle.set_gain(0.4);
        assert_eq!(handle.gain(), 0.4);
    }

    #[test]
    fn test_first_fade_wins() {
        let handle = SoundHandle::new(3, Path::new("4/a.wav"), 1.0);
        assert!(handle.fade().is_none());
        assert!(handle.fade_to_silence(Duration::from_millis(500)));
        assert!(!handle.fade_to_silence(Duration::from_millis(10)));
        assert_eq!(
            handle.fade().map(|fade| fade.duration),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_clones_share_state() {
        let handle = SoundHandle::new(1, Path::new("2/a.wav"), 1.0);
        let clone = handle.clone();
        clone.stop();
        clone.mark_finished();
        assert!(handle.is_stopped());
        assert!(handle.is_finished());
        assert_eq!(handle.id(), clone.id());
        assert_ne!(handle.id(), SoundHandle::new(1, Path::new("2/a.wav"), 1.0).id());
    }
}
