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

//! Logical switch identities.
//!
//! A switch is one of [`SWITCH_COUNT`] momentary inputs. Each switch owns exactly
//! one backend channel, so the channel index is derived from the switch number
//! and never shared.

use std::fmt;

/// The number of logical switches (and backend channels).
pub const SWITCH_COUNT: u8 = 10;

/// Errors produced when validating switch input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SwitchError {
    #[error("switch {0} is out of range (1..={SWITCH_COUNT})")]
    OutOfRange(u8),
}

/// A validated switch number in `1..=SWITCH_COUNT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Switch(u8);

impl Switch {
    /// Creates a switch, rejecting numbers outside of `1..=SWITCH_COUNT`.
    pub fn new(number: u8) -> Result<Switch, SwitchError> {
        if (1..=SWITCH_COUNT).contains(&number) {
            Ok(Switch(number))
        } else {
            Err(SwitchError::OutOfRange(number))
        }
    }

    /// The 1-based switch number.
    pub fn number(&self) -> u8 {
        self.0
    }

    /// The backend channel owned by this switch.
    pub fn channel(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// Maps a digit key to a switch. Keys 1-9 are switches 1-9, 0 is switch 10.
    pub fn from_digit_key(key: char) -> Option<Switch> {
        match key.to_digit(10)? {
            0 => Switch::new(10).ok(),
            digit => Switch::new(digit as u8).ok(),
        }
    }

    /// Iterates over every switch in ascending order.
    pub fn all() -> impl Iterator<Item = Switch> {
        (1..=SWITCH_COUNT).map(Switch)
    }
}

impl TryFrom<u8> for Switch {
    type Error = SwitchError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Switch::new(number)
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
