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
use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{BackendError, SoundHandle};
use crate::switch::SWITCH_COUNT;

#[derive(Default)]
struct State {
    sounds: HashMap<usize, SoundHandle>,
    starts: Vec<(usize, PathBuf)>,
    rejected: HashSet<PathBuf>,
    reject_all: bool,
    preloaded: Vec<PathBuf>,
    prepared: Vec<PathBuf>,
}

/// A mock backend. Doesn't actually play anything. Sounds loop until they are
/// stopped, their fade elapses, or [`Backend::finish`] is called.
pub struct Backend {
    name: String,
    state: Mutex<State>,
}

impl Backend {
    /// Gets the given mock backend.
    pub fn get(name: &str) -> Backend {
        Backend {
            name: name.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Simulates the sound on the channel reaching its end.
    pub fn finish(&self, channel: usize) {
        if let Some(sound) = self.state.lock().sounds.get(&channel) {
            sound.mark_finished();
        }
    }

    /// The most recent sound started on the channel.
    pub fn sound(&self, channel: usize) -> Option<SoundHandle> {
        self.state.lock().sounds.get(&channel).cloned()
    }

    /// Every start request that succeeded, in order.
    pub fn starts(&self) -> Vec<(usize, PathBuf)> {
        self.state.lock().starts.clone()
    }

    /// Makes every future start of the given clip fail.
    pub fn reject(&self, clip: &Path) {
        self.state.lock().rejected.insert(clip.to_path_buf());
    }

    /// Makes every future start fail while set.
    pub fn reject_all(&self, reject_all: bool) {
        self.state.lock().reject_all = reject_all;
    }

    /// Every clip passed to prepare, in order.
    pub fn prepared(&self) -> Vec<PathBuf> {
        self.state.lock().prepared.clone()
    }

    /// Every clip passed to preload, in order.
    pub fn preloaded(&self) -> Vec<PathBuf> {
        self.state.lock().preloaded.clone()
    }
}

impl super::Backend for Backend {
    fn start(
        &self,
        channel: usize,
        clip: &Path,
        looped: bool,
        gain: f32,
    ) -> Result<SoundHandle, BackendError> {
        let count = SWITCH_COUNT as usize;
        if channel >= count {
            return Err(BackendError::ChannelOutOfRange { channel, count });
        }

        let mut state = self.state.lock();
        if state.reject_all || state.rejected.contains(clip) {
            return Err(BackendError::Rejected(clip.to_path_buf()));
        }

        if let Some(previous) = state.sounds.remove(&channel) {
            previous.stop();
        }

        let sound = SoundHandle::new(channel, clip, gain);
        state.sounds.insert(channel, sound.clone());
        state.starts.push((channel, clip.to_path_buf()));

        info!(
            backend = self.name,
            channel,
            clip = ?clip,
            looped,
            gain,
            "Starting clip."
        );
        Ok(sound)
    }

    fn is_busy(&self, channel: usize) -> bool {
        let state = self.state.lock();
        let sound = match state.sounds.get(&channel) {
            Some(sound) => sound,
            None => return false,
        };

        if sound.fade().is_some_and(|fade| fade.is_complete()) {
            debug!(channel, "Mock fade complete.");
            sound.mark_finished();
        }

        !sound.is_finished() && !sound.is_stopped()
    }

    fn prepare(&self, clip: &Path) -> Result<(), BackendError> {
        self.state.lock().prepared.push(clip.to_path_buf());
        Ok(())
    }

    fn preload(&self, clips: &[PathBuf]) {
        self.state.lock().preloaded.extend_from_slice(clips);
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::backend::Backend as _;

    #[test]
    fn test_start_replaces_channel_sound() -> Result<(), BackendError> {
        let backend = Backend::get("mock");
        let first = backend.start(0, Path::new("1/a.wav"), true, 1.0)?;
        assert!(backend.is_busy(0));
        assert!(!backend.is_busy(1));

        let second = backend.start(0, Path::new("1/b.wav"), true, 0.5)?;
        assert!(first.is_stopped());
        assert!(!second.is_stopped());
        assert_eq!(second.gain(), 0.5);
        assert_eq!(backend.starts().len(), 2);
        Ok(())
    }

    #[test]
    fn test_finish_and_fade() -> Result<(), BackendError> {
        let backend = Backend::get("mock");
        backend.start(2, Path::new("3/a.wav"), true, 1.0)?;
        backend.finish(2);
        assert!(!backend.is_busy(2));

        let sound = backend.start(4, Path::new("5/a.wav"), true, 1.0)?;
        sound.fade_to_silence(Duration::ZERO);
        assert!(!backend.is_busy(4));
        assert!(sound.is_finished());
        Ok(())
    }

    #[test]
    fn test_rejections() {
        let backend = Backend::get("mock");
        backend.reject(Path::new("1/bad.wav"));
        assert!(matches!(
            backend.start(0, Path::new("1/bad.wav"), true, 1.0),
            Err(BackendError::Rejected(_))
        ));
        assert!(matches!(
            backend.start(10, Path::new("11/a.wav"), true, 1.0),
            Err(BackendError::ChannelOutOfRange {
                channel: 10,
                count: 10
            })
        ));
        backend.reject_all(true);
        assert!(backend.start(0, Path::new("1/a.wav"), true, 1.0).is_err());
        assert!(backend.starts().is_empty());
    }
}
