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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::{engine::gain::LOCAL_MAX, switch::Switch};

const VOLUME: &str = "vol";
const REFRESH: &str = "refresh";
const STATUS: &str = "status";

/// A controller that presses switches from the console.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads one line of commands and sends its events. Returns false once the
    /// reader is exhausted.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command (0-9 or +N holds a switch down, -N releases it, {} <0-{}>, {}, {}): ",
            VOLUME, LOCAL_MAX, REFRESH, STATUS,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        for event in parse_line(&input) {
            events_tx.blocking_send(event).map_err(io::Error::other)?;
        }
        Ok(true)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

/// Parses a line of whitespace separated commands. Unrecognized tokens are logged
/// and skipped.
pub fn parse_line(input: &str) -> Vec<Event> {
    let mut events = Vec::new();
    let mut tokens = input.split_whitespace();
    while let Some(token) = tokens.next() {
        let token = token.to_lowercase();
        let event = match token.as_str() {
            VOLUME => match tokens.next().and_then(|value| value.parse::<u8>().ok()) {
                Some(volume) if volume <= LOCAL_MAX => Some(Event::LocalVolume(volume)),
                _ => {
                    warn!("Volume must be a number from 0 to {}", LOCAL_MAX);
                    None
                }
            },
            REFRESH => Some(Event::Refresh),
            STATUS => Some(Event::Status),
            _ => parse_switch(&token),
        };

        match event {
            Some(event) => events.push(event),
            None if token != VOLUME => warn!(input = token, "Unrecognized input"),
            None => {}
        }
    }
    events
}

fn parse_switch(token: &str) -> Option<Event> {
    let (pressed, number) = match token.strip_prefix('+') {
        Some(number) => (true, number),
        None => match token.strip_prefix('-') {
            Some(number) => (false, number),
            None => {
                // A bare digit key holds the switch down until its release.
                let mut chars = token.chars();
                let key = chars.next()?;
                if chars.next().is_some() {
                    return None;
                }
                return Switch::from_digit_key(key).map(|switch| Event::Switch {
                    switch,
                    pressed: true,
                });
            }
        },
    };

    let switch = match number.parse::<u8>().ok()? {
        0 => Switch::from_digit_key('0')?,
        number => Switch::new(number).ok()?,
    };
    Some(Event::Switch { switch, pressed })
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}

            info!("Keyboard input closed.");
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, BufReader, BufWriter};

    use tokio::sync::mpsc;

    use super::*;

    fn get_events(line: &str) -> Result<Vec<Event>, io::Error> {
        let (sender, mut receiver) = mpsc::channel::<Event>(16);

        let reader = BufReader::new(line.as_bytes());
        let writer = BufWriter::new(Vec::new());
        assert!(Driver::monitor_io(&sender, reader, writer)?);

        // Force the sender to close.
        drop(sender);
        let mut events = Vec::new();
        while let Some(event) = receiver.blocking_recv() {
            events.push(event);
        }
        Ok(events)
    }

    fn press(number: u8, pressed: bool) -> Event {
        Event::Switch {
            switch: Switch::new(number).expect("valid switch"),
            pressed,
        }
    }

    #[test]
    fn test_keyboard_events() -> Result<(), io::Error> {
        assert_eq!(get_events("1\n")?, vec![press(1, true)]);
        assert_eq!(get_events("0")?, vec![press(10, true)]);
        assert_eq!(
            get_events("+3 -3 +10 -0")?,
            vec![press(3, true), press(3, false), press(10, true), press(10, false)]
        );
        assert_eq!(
            get_events("vol 40 REFRESH status")?,
            vec![Event::LocalVolume(40), Event::Refresh, Event::Status]
        );
        Ok(())
    }

    #[test]
    fn test_held_until_released() -> Result<(), io::Error> {
        let (sender, mut receiver) = mpsc::channel::<Event>(16);
        let mut prompt = Vec::new();
        assert!(Driver::monitor_io(
            &sender,
            BufReader::new("4\n".as_bytes()),
            &mut prompt
        )?);
        assert!(String::from_utf8_lossy(&prompt).contains("-N releases it"));

        // Only the press is sent; the release needs its own command.
        drop(sender);
        assert_eq!(receiver.blocking_recv(), Some(press(4, true)));
        assert_eq!(receiver.blocking_recv(), None);
        assert_eq!(get_events("-4")?, vec![press(4, false)]);
        Ok(())
    }

    #[test]
    fn test_unrecognized_input() -> Result<(), io::Error> {
        assert!(get_events("unrecognized")?.is_empty());
        assert!(get_events("11 +11 -12 vol 101 vol")?.is_empty());
        assert_eq!(get_events("x 2 y")?, vec![press(2, true)]);
        Ok(())
    }

    #[test]
    fn test_end_of_input() -> Result<(), io::Error> {
        let (sender, _receiver) = mpsc::channel::<Event>(1);
        let reader = BufReader::new("".as_bytes());
        let writer = BufWriter::new(Vec::new());
        assert!(!Driver::monitor_io(&sender, reader, writer)?);
        Ok(())
    }
}
