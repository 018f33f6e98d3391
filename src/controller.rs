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
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, error, info, span, Instrument, Level};

use crate::engine::{Engine, Snapshot};
use crate::library::ClipRef;
use crate::switch::Switch;

pub mod keyboard;
pub mod midi;

/// Controller events that will trigger behavior in the engine.
#[derive(Debug, PartialEq)]
pub enum Event {
    /// A switch was pressed or released.
    Switch { switch: Switch, pressed: bool },

    /// The expression pedal moved. Carries the raw controller value (0-127).
    Expression(u8),

    /// The local volume was set. Carries the raw volume (0-100).
    LocalVolume(u8),

    /// The last raw value seen from the controller (0-127), for display.
    InputLevel(u8),

    /// Re-reads the clip folders.
    Refresh,

    /// Logs the state of every switch.
    Status,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Feeds events from every driver into the engine.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given drivers.
    pub fn new(engine: Arc<Engine>, drivers: Vec<Arc<dyn Driver>>) -> Controller {
        let span = span!(Level::INFO, "controller");
        Controller {
            handle: tokio::spawn(Controller::trigger_events(engine, drivers).instrument(span)),
        }
    }

    /// Join will block until every driver has stopped.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers engine events by watching the drivers and getting events from them.
    async fn trigger_events(engine: Arc<Engine>, drivers: Vec<Arc<dyn Driver>>) {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let join_handles: Vec<JoinHandle<Result<(), io::Error>>> = drivers
            .iter()
            .map(|driver| driver.monitor_events(events_tx.clone()))
            .collect();
        drop(events_tx);

        info!(drivers = join_handles.len(), "Controller started.");

        while let Some(event) = events_rx.recv().await {
            debug!(event = format!("{:?}", event), "Received event.");

            if event == Event::Refresh {
                let refreshed = tokio::task::spawn_blocking({
                    let engine = engine.clone();
                    move || engine.refresh()
                })
                .await;
                match refreshed {
                    Ok(clips) => Controller::report_clips(&engine, &clips),
                    Err(e) => error!(err = e.to_string(), "Error refreshing clips"),
                }
                continue;
            }
            Controller::handle_event(&engine, event);
        }

        info!("Controller closing.");
        for join_handle in join_handles {
            match join_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(err = e.to_string(), "Driver stopped with an error"),
                Err(e) => error!("Error waiting for event monitor to stop: {}", e),
            }
        }
    }

    /// Logs the clip listing, marking the clips that are playing right now.
    fn report_clips(engine: &Engine, clips: &[ClipRef]) {
        for line in clip_listing(engine, clips) {
            info!("{}", line);
        }
    }

    /// Applies one event to the engine. Errors are logged, never returned.
    fn handle_event(engine: &Engine, event: Event) {
        match event {
            Event::Switch { switch, pressed } => match engine.on_switch_event(switch, pressed) {
                Ok(outcome) => debug!(
                    switch = switch.number(),
                    pressed,
                    outcome = format!("{:?}", outcome),
                    "Switch handled."
                ),
                Err(e) => error!(err = e.to_string(), "Error handling switch"),
            },
            Event::Expression(raw) => {
                engine.set_from_external(raw);
            }
            Event::LocalVolume(raw) => {
                engine.set_from_local(raw);
            }
            Event::InputLevel(raw) => engine.record_input_level(raw),
            Event::Refresh => {
                let clips = engine.refresh();
                Controller::report_clips(engine, &clips);
            }
            Event::Status => {
                let snapshot = engine.snapshot();
                for view in &snapshot.switches {
                    info!("{}", view);
                }
                info!("{}", status_summary(&snapshot));
            }
        }
    }
}

/// One line per clip, with the clips that are playing marked.
pub fn clip_listing(engine: &Engine, clips: &[ClipRef]) -> Vec<String> {
    clips
        .iter()
        .map(|clip| {
            let name = clip.name();
            if engine.is_playing_clip(clip.switch(), &name) {
                format!("{}: {} (playing)", clip.switch(), name)
            } else {
                format!("{}: {}", clip.switch(), name)
            }
        })
        .collect()
}

/// The gain, the volume slider position and the input level on one line.
pub fn status_summary(snapshot: &Snapshot) -> String {
    format!(
        "Gain {}, volume {}, input {:.2}, sounding {}",
        snapshot.gain,
        snapshot.gain.local_position(),
        snapshot.input_level,
        snapshot.sounding
    )
}
