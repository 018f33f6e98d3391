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
use std::{io, sync::Arc};

use midly::{live::LiveEvent, MidiMessage};
use tokio::{
    sync::mpsc::{self, Sender},
    task::JoinHandle,
};
use tracing::{error, info, span, warn, Level};

use super::Event;
use crate::{config::MidiMapping, midi::Device};

/// A controller that presses switches and moves the gain from MIDI control changes.
pub struct Driver {
    /// The MIDI device.
    midi_device: Arc<dyn Device>,
    /// How control changes map to switches and gain.
    mapping: MidiMapping,
}

impl Driver {
    pub fn new(midi_device: Arc<dyn Device>, mapping: MidiMapping) -> Arc<Self> {
        for switch in mapping.shadowed_switches() {
            warn!(
                switch = switch.number(),
                controller = mapping.expression(),
                "Switch shares its controller with the expression pedal and can't be pressed over MIDI."
            );
        }
        Arc::new(Driver {
            midi_device,
            mapping,
        })
    }
}

/// Maps a raw MIDI message to controller events. Anything other than a control
/// change on the mapped channel produces no events.
pub fn map_event(mapping: &MidiMapping, raw_event: &[u8]) -> Vec<Event> {
    let (channel, controller, value) = match LiveEvent::parse(raw_event) {
        Ok(LiveEvent::Midi {
            channel,
            message: MidiMessage::Controller { controller, value },
        }) => (u8::from(channel), u8::from(controller), u8::from(value)),
        Ok(_) => return Vec::new(),
        Err(e) => {
            error!(err = format!("{:?}", e), "Error parsing event.");
            return Vec::new();
        }
    };

    if mapping
        .channel()
        .is_some_and(|mapped_channel| mapped_channel != channel)
    {
        return Vec::new();
    }

    let mut events = vec![Event::InputLevel(value)];
    if controller == mapping.expression() {
        events.push(Event::Expression(value));
    } else if let Some(switch) = mapping.switch_for(controller) {
        events.push(Event::Switch {
            switch,
            pressed: value > 0,
        });
    }
    events
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let (midi_events_tx, mut midi_events_rx) = mpsc::channel::<Vec<u8>>(10);
        let device = self.midi_device.clone();

        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "MIDI driver");
            let _enter = span.enter();

            info!(device = device.name(), "MIDI driver started.");

            if let Err(e) = device.watch_events(midi_events_tx) {
                error!(err = e.to_string(), "Error watching MIDI events");
            }
        });

        let device = self.midi_device.clone();
        let mapping = self.mapping.clone();
        tokio::spawn(async move {
            loop {
                let raw_event = match midi_events_rx.recv().await {
                    Some(raw_event) => raw_event,
                    None => {
                        info!("MIDI watcher closed.");
                        device.stop_watch_events();
                        return Ok(());
                    }
                };

                for event in map_event(&mapping, &raw_event) {
                    if events_tx.send(event).await.is_err() {
                        info!("Controller closed, no longer watching MIDI.");
                        device.stop_watch_events();
                        return Ok(());
                    }
                }
            }
        })
    }
}
