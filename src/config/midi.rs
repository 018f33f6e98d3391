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
use serde::Deserialize;

use super::error::ConfigError;
use crate::switch::{Switch, SWITCH_COUNT};

/// Controllers 1-10 drive switches 1-10.
const DEFAULT_SWITCH_CONTROLLERS: [u8; SWITCH_COUNT as usize] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

/// Controller 7 is the expression pedal.
const DEFAULT_EXPRESSION_CONTROLLER: u8 = 7;

/// A YAML representation of how MIDI control changes map to switches and gain.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct MidiMapping {
    /// The controller number for each switch, in switch order.
    switches: Option<Vec<u8>>,

    /// The controller number of the expression pedal.
    expression: Option<u8>,

    /// Only listen to this MIDI channel (1-16). All channels when unset.
    channel: Option<u8>,
}

impl MidiMapping {
    /// Checks the mapping for values that can't be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(switches) = &self.switches {
            if switches.len() > SWITCH_COUNT as usize {
                return Err(ConfigError::Invalid {
                    key: "midi_mapping.switches",
                    reason: format!("at most {} controllers may be mapped", SWITCH_COUNT),
                });
            }
            if let Some(controller) = switches.iter().find(|controller| **controller > 127) {
                return Err(ConfigError::Invalid {
                    key: "midi_mapping.switches",
                    reason: format!("controller {} is out of range", controller),
                });
            }
        }
        if self.expression.is_some_and(|controller| controller > 127) {
            return Err(ConfigError::Invalid {
                key: "midi_mapping.expression",
                reason: "controller must be 0-127".to_string(),
            });
        }
        if self.channel.is_some_and(|channel| !(1..=16).contains(&channel)) {
            return Err(ConfigError::Invalid {
                key: "midi_mapping.channel",
                reason: "channel must be 1-16".to_string(),
            });
        }
        Ok(())
    }

    /// The controller numbers for each switch, in switch order.
    pub fn switch_controllers(&self) -> &[u8] {
        match &self.switches {
            Some(switches) => switches,
            None => &DEFAULT_SWITCH_CONTROLLERS,
        }
    }

    /// The switch driven by the given controller, if any. The expression pedal takes
    /// precedence over a switch mapped to the same controller.
    pub fn switch_for(&self, controller: u8) -> Option<Switch> {
        if controller == self.expression() {
            return None;
        }
        self.switch_controllers()
            .iter()
            .position(|mapped| *mapped == controller)
            .and_then(|index| Switch::new(index as u8 + 1).ok())
    }

    pub fn expression(&self) -> u8 {
        self.expression.unwrap_or(DEFAULT_EXPRESSION_CONTROLLER)
    }

    /// The zero-based MIDI channel to listen to, or None for all channels.
    pub fn channel(&self) -> Option<u8> {
        self.channel.map(|channel| channel.saturating_sub(1))
    }

    /// Switches whose controller is shadowed by the expression pedal.
    pub fn shadowed_switches(&self) -> Vec<Switch> {
        let expression = self.expression();
        self.switch_controllers()
            .iter()
            .enumerate()
            .filter(|(_, controller)| **controller == expression)
            .filter_map(|(index, _)| Switch::new(index as u8 + 1).ok())
            .collect()
    }
}
