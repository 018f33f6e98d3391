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
use std::{error::Error, fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

/// A mock device. Events are injected with [`Device::mock_event`].
#[derive(Clone)]
pub struct Device {
    name: String,
    sender: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Sends the mock event through to the watcher. Returns false if nothing is watching.
    pub fn mock_event(&self, event: &[u8]) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => match sender.try_send(event.to_vec()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(err = e.to_string(), "Unable to send mock event.");
                    false
                }
            },
            None => false,
        }
    }

    /// Returns true while something is watching events.
    pub fn is_watching(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>> {
        let mut current = self.sender.lock();
        if current.is_some() {
            return Err("Already watching events.".into());
        }
        info!(device = self.name, "Watching mock MIDI events.");
        *current = Some(sender);
        Ok(())
    }

    fn stop_watch_events(&self) {
        self.sender.lock().take();
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::midi::Device as _;

    #[tokio::test]
    async fn test_watch_events() -> Result<(), Box<dyn Error>> {
        let device = Device::get("mock-midi");
        assert!(!device.mock_event(&[0xB0, 1, 127]));

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        device.watch_events(tx.clone())?;
        assert!(device.watch_events(tx).is_err());

        assert!(device.mock_event(&[0xB0, 1, 127]));
        assert_eq!(rx.recv().await, Some(vec![0xB0, 1, 127]));

        device.stop_watch_events();
        assert!(!device.is_watching());
        assert_eq!(rx.recv().await, None);
        Ok(())
    }
}
