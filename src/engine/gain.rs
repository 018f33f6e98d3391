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
use std::fmt;

/// The largest raw value of the external expression controller.
pub const EXTERNAL_MAX: u8 = 127;

/// The largest raw value of the local volume control.
pub const LOCAL_MAX: u8 = 100;

/// Which input last wrote the gain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GainSource {
    External,
    Local,
}

impl fmt::Display for GainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainSource::External => write!(f, "external"),
            GainSource::Local => write!(f, "local"),
        }
    }
}

/// The one gain shared by every channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainState {
    value: f32,
    source: GainSource,
}

impl GainState {
    pub fn new(value: f32, source: GainSource) -> GainState {
        GainState {
            value: clamp(value),
            source,
        }
    }

    /// A gain state from a raw expression controller value.
    pub fn from_external(raw: u8) -> GainState {
        GainState::new(raw as f32 / EXTERNAL_MAX as f32, GainSource::External)
    }

    /// A gain state from a raw local volume value.
    pub fn from_local(raw: u8) -> GainState {
        GainState::new(raw as f32 / LOCAL_MAX as f32, GainSource::Local)
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn source(&self) -> GainSource {
        self.source
    }

    /// The local volume position that shows the current gain, whichever source wrote it.
    pub fn local_position(&self) -> u8 {
        (self.value * LOCAL_MAX as f32).round() as u8
    }
}

impl Default for GainState {
    fn default() -> Self {
        GainState::new(1.0, GainSource::Local)
    }
}

impl fmt::Display for GainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} ({})", self.value, self.source)
    }
}

fn clamp(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
