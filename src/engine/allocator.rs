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

//! The playback state table. Tracks which switch is sounding and which clip is
//! waiting to follow it. Nothing here locks; the engine owns the single lock.

use std::{collections::BTreeMap, time::Duration};

use tracing::{debug, info};

use super::{
    gain::{GainSource, GainState},
    EngineError,
};
use crate::{
    backend::{Backend, SoundHandle},
    library::ClipRef,
    switch::Switch,
};

/// A clip that is sounding on its switch's channel, possibly fading out.
#[derive(Clone, Debug)]
pub struct PlayingEntry {
    clip: ClipRef,
    handle: SoundHandle,
    fading: bool,
}

impl PlayingEntry {
    pub fn clip(&self) -> &ClipRef {
        &self.clip
    }

    pub fn handle(&self) -> &SoundHandle {
        &self.handle
    }

    pub fn is_fading(&self) -> bool {
        self.fading
    }
}

/// What happened when a switch's sound finished.
#[derive(Clone, Debug, PartialEq)]
pub enum FinishOutcome {
    /// Nothing was queued, so the switch is now idle.
    Idle,
    /// The queued clip was started.
    Restarted(ClipRef),
    /// The switch wasn't playing.
    Stale,
}

pub struct Allocator {
    playing: BTreeMap<Switch, PlayingEntry>,
    queued: BTreeMap<Switch, ClipRef>,
    gain: GainState,
}

impl Allocator {
    pub fn new(gain: GainState) -> Allocator {
        Allocator {
            playing: BTreeMap::new(),
            queued: BTreeMap::new(),
            gain,
        }
    }

    pub fn is_playing(&self, switch: Switch) -> bool {
        self.playing.contains_key(&switch)
    }

    pub fn playing(&self, switch: Switch) -> Option<&PlayingEntry> {
        self.playing.get(&switch)
    }

    pub fn queued(&self, switch: Switch) -> Option<&ClipRef> {
        self.queued.get(&switch)
    }

    /// The number of switches with a sounding channel.
    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }

    pub fn gain(&self) -> GainState {
        self.gain
    }

    /// Starts the clip looped on the switch's channel at the current gain. Fails
    /// without touching any state if the switch is already playing or the backend
    /// refuses the clip.
    pub fn start(
        &mut self,
        backend: &dyn Backend,
        switch: Switch,
        clip: ClipRef,
    ) -> Result<(), EngineError> {
        if self.is_playing(switch) {
            return Err(EngineError::AlreadyPlaying(switch));
        }

        let handle = backend
            .start(switch.channel(), clip.path(), true, self.gain.value())
            .map_err(|source| EngineError::StartFailed {
                switch,
                clip: clip.clone(),
                source,
            })?;

        info!(switch = switch.number(), clip = clip.name(), "Started clip.");
        self.playing.insert(
            switch,
            PlayingEntry {
                clip,
                handle,
                fading: false,
            },
        );
        Ok(())
    }

    /// Queues the clip to follow the one playing on the switch, replacing any clip
    /// already queued. Returns false and queues nothing if the switch is idle.
    pub fn enqueue(&mut self, switch: Switch, clip: ClipRef) -> bool {
        if !self.is_playing(switch) {
            return false;
        }

        debug!(switch = switch.number(), clip = clip.name(), "Queued clip.");
        self.queued.insert(switch, clip);
        true
    }

    /// Fades the switch's sound to silence. The entry stays until the backend
    /// reports the sound finished. Returns false if the switch is idle.
    pub fn begin_fade_out(&mut self, switch: Switch, duration: Duration) -> bool {
        let Some(entry) = self.playing.get_mut(&switch) else {
            return false;
        };

        entry.handle.fade_to_silence(duration);
        entry.fading = true;
        debug!(
            switch = switch.number(),
            duration = ?duration,
            "Fading out."
        );
        true
    }

    /// Drops the queued clip for the switch, if any.
    pub fn discard_queued(&mut self, switch: Switch) -> Option<ClipRef> {
        self.queued.remove(&switch)
    }

    /// Retires the switch's sound and starts its queued clip, if there is one. The
    /// queued clip is consumed even if it fails to start.
    pub fn on_finished(
        &mut self,
        backend: &dyn Backend,
        switch: Switch,
    ) -> Result<FinishOutcome, EngineError> {
        if self.playing.remove(&switch).is_none() {
            return Ok(FinishOutcome::Stale);
        }

        match self.queued.remove(&switch) {
            Some(clip) => {
                self.start(backend, switch, clip.clone())?;
                Ok(FinishOutcome::Restarted(clip))
            }
            None => {
                info!(switch = switch.number(), "Switch idle.");
                Ok(FinishOutcome::Idle)
            }
        }
    }

    /// Every playing switch whose channel the backend no longer reports busy.
    pub fn finished_switches(&self, backend: &dyn Backend) -> Vec<Switch> {
        self.playing
            .keys()
            .copied()
            .filter(|switch| !backend.is_busy(switch.channel()))
            .collect()
    }

    /// Applies the gain to every sounding channel and remembers it for new starts.
    pub fn set_gain_all(&mut self, gain: GainState) {
        for entry in self.playing.values() {
            entry.handle.set_gain(gain.value());
        }
        self.gain = gain;
    }

    /// Stops every sound and forgets all playing and queued clips.
    pub fn stop_all(&mut self) {
        for entry in self.playing.values() {
            entry.handle.stop();
        }
        self.playing.clear();
        self.queued.clear();
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Allocator::new(GainState::new(1.0, GainSource::Local))
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;
    use crate::backend::mock;

    fn clip(switch: Switch, name: &str) -> ClipRef {
        ClipRef::new(
            switch,
            PathBuf::from(switch.number().to_string()).join(name),
        )
    }

    #[test]
    fn test_start_is_exclusive() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::get("mock");
        let mut allocator = Allocator::default();
        let switch = Switch::new(1)?;

        allocator.start(&backend, switch, clip(switch, "a.wav"))?;
        assert!(allocator.is_playing(switch));
        assert!(matches!(
            allocator.start(&backend, switch, clip(switch, "b.wav")),
            Err(EngineError::AlreadyPlaying(_))
        ));
        assert_eq!(backend.starts().len(), 1);
        assert_eq!(
            allocator.playing(switch).map(|entry| entry.clip().name()),
            Some("a.wav".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_enqueue_requires_playing() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::get("mock");
        let mut allocator = Allocator::default();
        let switch = Switch::new(2)?;

        assert!(!allocator.enqueue(switch, clip(switch, "a.wav")));
        assert!(allocator.queued(switch).is_none());

        allocator.start(&backend, switch, clip(switch, "a.wav"))?;
        assert!(allocator.enqueue(switch, clip(switch, "b.wav")));
        assert!(allocator.enqueue(switch, clip(switch, "c.wav")));
        assert_eq!(allocator.queued(switch), Some(&clip(switch, "c.wav")));
        Ok(())
    }

    #[test]
    fn test_start_failure_leaves_state() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::get("mock");
        backend.reject_all(true);
        let mut allocator = Allocator::default();
        let switch = Switch::new(3)?;

        let result = allocator.start(&backend, switch, clip(switch, "a.wav"));
        assert!(matches!(result, Err(EngineError::StartFailed { .. })));
        assert!(!allocator.is_playing(switch));
        assert_eq!(allocator.playing_count(), 0);
        Ok(())
    }

    #[test]
    fn test_finish_drains_queue() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::get("mock");
        let mut allocator = Allocator::default();
        let switch = Switch::new(4)?;

        assert_eq!(
            allocator.on_finished(&backend, switch)?,
            FinishOutcome::Stale
        );

        allocator.start(&backend, switch, clip(switch, "a.wav"))?;
        allocator.enqueue(switch, clip(switch, "b.wav"));
        backend.finish(switch.channel());
        assert_eq!(allocator.finished_switches(&backend), vec![switch]);

        assert_eq!(
            allocator.on_finished(&backend, switch)?,
            FinishOutcome::Restarted(clip(switch, "b.wav"))
        );
        assert!(allocator.queued(switch).is_none());
        assert!(allocator.finished_switches(&backend).is_empty());

        backend.finish(switch.channel());
        assert_eq!(allocator.on_finished(&backend, switch)?, FinishOutcome::Idle);
        assert!(!allocator.is_playing(switch));
        Ok(())
    }

    #[test]
    fn test_fade_out_keeps_entry() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::get("mock");
        let mut allocator = Allocator::default();
        let switch = Switch::new(5)?;

        assert!(!allocator.begin_fade_out(switch, Duration::from_millis(500)));
        allocator.start(&backend, switch, clip(switch, "a.wav"))?;
        assert!(allocator.begin_fade_out(switch, Duration::from_secs(60)));

        let entry = allocator.playing(switch).expect("expected entry");
        assert!(entry.is_fading());
        assert!(entry.handle().fade().is_some());
        assert!(allocator.finished_switches(&backend).is_empty());
        Ok(())
    }

    #[test]
    fn test_set_gain_all() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::get("mock");
        let mut allocator = Allocator::default();
        let first = Switch::new(1)?;
        let second = Switch::new(6)?;

        allocator.start(&backend, first, clip(first, "a.wav"))?;
        allocator.set_gain_all(GainState::from_local(25));
        allocator.start(&backend, second, clip(second, "a.wav"))?;

        for switch in [first, second] {
            let entry = allocator.playing(switch).expect("expected entry");
            assert_eq!(entry.handle().gain(), 0.25);
        }
        Ok(())
    }

    #[test]
    fn test_stop_all() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::get("mock");
        let mut allocator = Allocator::default();
        let switch = Switch::new(7)?;

        allocator.start(&backend, switch, clip(switch, "a.wav"))?;
        allocator.enqueue(switch, clip(switch, "b.wav"));
        let handle = allocator
            .playing(switch)
            .map(|entry| entry.handle().clone())
            .expect("expected entry");

        allocator.stop_all();
        assert!(handle.is_stopped());
        assert!(!allocator.is_playing(switch));
        assert!(allocator.queued(switch).is_none());
        Ok(())
    }
}
