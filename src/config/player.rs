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
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::{error::ConfigError, midi::MidiMapping};

const DEFAULT_AUDIO_DEVICE: &str = "default";
const DEFAULT_CLIPS: &str = ".";
const DEFAULT_FADE_OUT: Duration = Duration::from_millis(500);
const DEFAULT_REFRESH_RATE: u32 = 30;
const DEFAULT_INITIAL_GAIN: f32 = 1.0;

/// Environment variables with this prefix override file settings.
const ENVIRONMENT_PREFIX: &str = "STOMPLOOP";

/// What a release does to a clip queued behind the fading one.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseBehavior {
    /// The queued clip starts once the fade finishes.
    #[default]
    PreserveQueue,
    /// The queued clip is dropped.
    DiscardQueue,
}

/// The configuration for the player.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Player {
    /// The audio output device. "default" is the host's default output.
    audio_device: Option<String>,

    /// The MIDI input device. No MIDI input when unset.
    midi_device: Option<String>,

    /// The folder holding the numbered clip folders.
    clips: Option<PathBuf>,

    /// How long a released switch takes to fade to silence.
    fade_out: Option<String>,

    /// How many times per second finished channels are polled.
    refresh_rate: Option<u32>,

    /// The gain before any volume input arrives.
    initial_gain: Option<f32>,

    /// What a release does to a queued clip.
    release: Option<ReleaseBehavior>,

    /// Whether to read switch presses from the console.
    keyboard: Option<bool>,

    /// How MIDI control changes map to switches and gain.
    midi_mapping: Option<MidiMapping>,
}

impl Player {
    /// Loads the configuration from the given file, if any, with environment
    /// overrides applied on top.
    pub fn load(path: Option<&Path>) -> Result<Player, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let player = builder
            .add_source(Environment::with_prefix(ENVIRONMENT_PREFIX))
            .build()?
            .try_deserialize::<Player>()?;
        player.validate()?;
        Ok(player)
    }

    /// Checks values that deserialize but can't be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fade_out()?;
        if self.refresh_rate == Some(0) {
            return Err(ConfigError::Invalid {
                key: "refresh_rate",
                reason: "must be at least 1".to_string(),
            });
        }
        if self
            .initial_gain
            .is_some_and(|gain| !(0.0..=1.0).contains(&gain))
        {
            return Err(ConfigError::Invalid {
                key: "initial_gain",
                reason: "must be between 0 and 1".to_string(),
            });
        }
        if let Some(midi_mapping) = &self.midi_mapping {
            midi_mapping.validate()?;
        }
        Ok(())
    }

    pub fn audio_device(&self) -> &str {
        self.audio_device.as_deref().unwrap_or(DEFAULT_AUDIO_DEVICE)
    }

    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    pub fn clips(&self) -> PathBuf {
        self.clips
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIPS))
    }

    /// Returns the fade out duration (default: 500ms).
    pub fn fade_out(&self) -> Result<Duration, ConfigError> {
        match &self.fade_out {
            Some(fade_out) => Ok(DurationString::from_string(fade_out.clone())?.into()),
            None => Ok(DEFAULT_FADE_OUT),
        }
    }

    /// Returns the refresh rate in Hz (default: 30).
    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate.unwrap_or(DEFAULT_REFRESH_RATE).max(1)
    }

    pub fn initial_gain(&self) -> f32 {
        self.initial_gain
            .unwrap_or(DEFAULT_INITIAL_GAIN)
            .clamp(0.0, 1.0)
    }

    pub fn release(&self) -> ReleaseBehavior {
        self.release.unwrap_or_default()
    }

    pub fn keyboard(&self) -> bool {
        self.keyboard.unwrap_or(true)
    }

    pub fn midi_mapping(&self) -> MidiMapping {
        self.midi_mapping.clone().unwrap_or_default()
    }

    /// Overrides the clip folder.
    pub fn with_clips(mut self, clips: PathBuf) -> Player {
        self.clips = Some(clips);
        self
    }
}
