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

//! The trigger engine. Turns switch presses and releases into clip starts, queued
//! follow-ups and fade-outs, and drains the queue as channels finish.

use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info, span, warn, Level};

use crate::{
    backend::{Backend, BackendError},
    config::ReleaseBehavior,
    library::{pick_random, ClipLibrary, ClipRef},
    switch::Switch,
};

pub mod allocator;
pub mod gain;

use self::allocator::Allocator;
pub use self::allocator::FinishOutcome;
pub use self::gain::{GainSource, GainState};

/// Errors produced while handling switch events.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unable to start {clip} on switch {switch}: {source}")]
    StartFailed {
        switch: Switch,
        clip: ClipRef,
        #[source]
        source: BackendError,
    },

    #[error("switch {0} is already playing")]
    AlreadyPlaying(Switch),
}

/// Why a switch event didn't change anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoredReason {
    /// The switch's folder has no clips.
    NoClips,
    /// The switch was released while idle.
    NotPlaying,
}

/// The result of a switch event.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerOutcome {
    Started(ClipRef),
    Queued(ClipRef),
    FadingOut,
    Ignored(IgnoredReason),
}

/// The state of one switch at the time of a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchView {
    pub switch: Switch,
    pub playing: Option<ClipRef>,
    pub fading: bool,
    pub queued: Option<ClipRef>,
}

impl fmt::Display for SwitchView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.switch)?;
        match &self.playing {
            Some(clip) if self.fading => write!(f, "{} (fading)", clip.name())?,
            Some(clip) => write!(f, "{}", clip.name())?,
            None => write!(f, "-")?,
        }
        if let Some(queued) = &self.queued {
            write!(f, " -> {}", queued.name())?;
        }
        Ok(())
    }
}

/// A consistent view of the engine, taken under its lock.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub switches: Vec<SwitchView>,
    pub gain: GainState,
    /// The last value received from the controller, in [0, 1].
    pub input_level: f32,
    /// The number of channels the backend reports as sounding.
    pub sounding: usize,
}

/// Owns the playback state for every switch. All state changes go through one lock.
pub struct Engine {
    library: ClipLibrary,
    backend: Arc<dyn Backend>,
    fade_out: Duration,
    release: ReleaseBehavior,
    state: Mutex<Allocator>,
    input_level: AtomicU8,
}

impl Engine {
    pub fn new(
        library: ClipLibrary,
        backend: Arc<dyn Backend>,
        fade_out: Duration,
        release: ReleaseBehavior,
        gain: GainState,
    ) -> Engine {
        Engine {
            library,
            backend,
            fade_out,
            release,
            state: Mutex::new(Allocator::new(gain)),
            input_level: AtomicU8::new(0),
        }
    }

    pub fn library(&self) -> &ClipLibrary {
        &self.library
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Handles a switch being pressed or released.
    pub fn on_switch_event(
        &self,
        switch: Switch,
        pressed: bool,
    ) -> Result<TriggerOutcome, EngineError> {
        let span = span!(Level::INFO, "switch", switch = switch.number());
        let _enter = span.enter();

        if pressed {
            self.press(switch)
        } else {
            Ok(self.release(switch))
        }
    }

    fn press(&self, switch: Switch) -> Result<TriggerOutcome, EngineError> {
        // The folder is read before taking the lock.
        let candidates = self.library.list_candidates(switch);
        let Some(clip) = pick_random(&candidates).cloned() else {
            warn!(folder = ?self.library.folder(switch), "No clips for switch.");
            return Ok(TriggerOutcome::Ignored(IgnoredReason::NoClips));
        };

        // Loading happens here, outside the lock, whether the clip starts now or is
        // queued. A failure surfaces again when the clip is started.
        if let Err(e) = self.backend.prepare(clip.path()) {
            warn!(clip = clip.name(), err = e.to_string(), "Unable to prepare clip.");
        }

        let mut state = self.state.lock();
        if state.enqueue(switch, clip.clone()) {
            info!(clip = clip.name(), "Queued clip.");
            return Ok(TriggerOutcome::Queued(clip));
        }

        state.start(self.backend.as_ref(), switch, clip.clone())?;
        Ok(TriggerOutcome::Started(clip))
    }

    fn release(&self, switch: Switch) -> TriggerOutcome {
        let mut state = self.state.lock();
        if !state.begin_fade_out(switch, self.fade_out) {
            debug!("Released idle switch.");
            return TriggerOutcome::Ignored(IgnoredReason::NotPlaying);
        }

        if self.release == ReleaseBehavior::DiscardQueue {
            if let Some(discarded) = state.discard_queued(switch) {
                info!(clip = discarded.name(), "Discarded queued clip.");
            }
        }
        TriggerOutcome::FadingOut
    }

    /// Handles the sound on a switch's channel finishing.
    pub fn on_finished(&self, switch: Switch) -> Result<FinishOutcome, EngineError> {
        self.state.lock().on_finished(self.backend.as_ref(), switch)
    }

    /// Retires every switch whose channel has gone quiet and starts any queued
    /// clips, all under one lock acquisition.
    pub fn poll_finished(&self) -> Vec<(Switch, Result<FinishOutcome, EngineError>)> {
        let mut state = self.state.lock();
        state
            .finished_switches(self.backend.as_ref())
            .into_iter()
            .map(|switch| (switch, state.on_finished(self.backend.as_ref(), switch)))
            .collect()
    }

    /// Applies a raw expression controller value (0-127) to every channel.
    pub fn set_from_external(&self, raw: u8) -> GainState {
        self.set_gain(GainState::from_external(raw))
    }

    /// Applies a raw local volume value (0-100) to every channel.
    pub fn set_from_local(&self, raw: u8) -> GainState {
        self.set_gain(GainState::from_local(raw))
    }

    fn set_gain(&self, gain: GainState) -> GainState {
        self.state.lock().set_gain_all(gain);
        debug!(gain = gain.value(), source = %gain.source(), "Gain changed.");
        gain
    }

    pub fn gain(&self) -> GainState {
        self.state.lock().gain()
    }

    /// Remembers the last raw controller value (0-127) for display.
    pub fn record_input_level(&self, raw: u8) {
        self.input_level
            .store(raw.min(gain::EXTERNAL_MAX), Ordering::Relaxed);
    }

    pub fn input_level(&self) -> f32 {
        self.input_level.load(Ordering::Relaxed) as f32 / gain::EXTERNAL_MAX as f32
    }

    /// Returns true if the switch is currently playing the clip with the given file name.
    pub fn is_playing_clip(&self, switch: Switch, name: &str) -> bool {
        self.state
            .lock()
            .playing(switch)
            .is_some_and(|entry| entry.clip().name() == name)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let switches = Switch::all()
            .map(|switch| {
                let playing = state.playing(switch);
                SwitchView {
                    switch,
                    playing: playing.map(|entry| entry.clip().clone()),
                    fading: playing.is_some_and(|entry| entry.is_fading()),
                    queued: state.queued(switch).cloned(),
                }
            })
            .collect();
        let sounding = Switch::all()
            .filter(|switch| self.backend.is_busy(switch.channel()))
            .count();

        Snapshot {
            switches,
            gain: state.gain(),
            input_level: self.input_level(),
            sounding,
        }
    }

    /// Lists the library again and hands every clip to the backend to preload.
    pub fn refresh(&self) -> Vec<ClipRef> {
        let clips = self.library.list_all();
        let paths: Vec<PathBuf> = clips.iter().map(|clip| clip.path().to_path_buf()).collect();
        self.backend.preload(&paths);
        info!(
            root = ?self.library.root(),
            clips = clips.len(),
            "Refreshed clip library."
        );
        clips
    }

    /// Stops every channel and clears all state.
    pub fn stop_all(&self) {
        self.state.lock().stop_all();
        info!("Stopped all switches.");
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Engine (clips={}, backend={})",
            self.library.root().display(),
            self.backend
        )
    }
}
