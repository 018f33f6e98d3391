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
use std::{error::Error, fmt, mem};

use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use midly::live::LiveEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, span, Level};

pub struct Device {
    name: String,
    input_port: MidiInputPort,
    event_connection: Mutex<Option<MidiInputConnection<()>>>,
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "wait for event (midir)");
        let _enter = span.enter();

        let mut event_connection = self.event_connection.lock();
        if event_connection.is_some() {
            return Err("Already watching events.".into());
        }

        info!(device = self.name, "Watching MIDI events.");

        let input = MidiInput::new("stomploop input")?;
        *event_connection = Some(input.connect(
            &self.input_port,
            "stomploop input watcher",
            move |_, raw_event, _| {
                if let Ok(event) = LiveEvent::parse(raw_event) {
                    debug!(event = format!("{:?}", event), "Received MIDI event.");
                }
                if let Err(e) = sender.blocking_send(Vec::from(raw_event)) {
                    error!(
                        err = format!("{:?}", e),
                        "Error sending MIDI event to receiver."
                    );
                }
            },
            (),
        )?);

        Ok(())
    }

    fn stop_watch_events(&self) {
        // Explicitly drop the connection.
        let event_connection = self.event_connection.lock().take();
        mem::drop(event_connection);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Input)", self.name)
    }
}

/// Lists midir devices and produces the Device trait.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

/// Lists midir input devices.
fn list_midir_devices() -> Result<Vec<Device>, Box<dyn Error>> {
    let input = MidiInput::new("stomploop input listing")?;

    let mut devices = Vec::new();
    for port in input.ports() {
        let name = input.port_name(&port)?;
        if devices.iter().any(|device: &Device| device.name == name) {
            continue;
        }
        devices.push(Device {
            name,
            input_port: port,
            event_connection: Mutex::new(None),
        });
    }

    devices.sort_by_key(|device| device.name.clone());
    Ok(devices)
}

/// Gets the given midir device. The name may be any unambiguous part of the port name.
pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
    let mut matches = list_midir_devices()?
        .into_iter()
        .filter(|device| device.name.contains(name))
        .collect::<Vec<Device>>();

    if matches.is_empty() {
        return Err(format!("no device found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|device| device.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    Ok(matches.swap_remove(0))
}
