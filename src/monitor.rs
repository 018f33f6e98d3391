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

//! Polls the backend for finished channels at a fixed rate, drains queued clips
//! and logs every change to the switch states.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, span, Instrument, Level};

use crate::engine::{Engine, FinishOutcome, Snapshot};

pub struct Monitor {
    handle: JoinHandle<()>,
}

impl Monitor {
    /// Starts polling the engine the given number of times per second.
    pub fn new(engine: Arc<Engine>, refresh_rate: u32) -> Monitor {
        let period = Duration::from_secs(1) / refresh_rate.max(1);
        let span = span!(Level::INFO, "monitor", refresh_rate);
        Monitor {
            handle: tokio::spawn(Monitor::watch(engine, period).instrument(span)),
        }
    }

    /// Stops polling.
    pub fn stop(&self) {
        self.handle.abort();
    }

    async fn watch(engine: Arc<Engine>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period = ?period, "Monitor started.");
        let mut previous = engine.snapshot();
        loop {
            interval.tick().await;

            for (switch, result) in engine.poll_finished() {
                match result {
                    Ok(FinishOutcome::Restarted(clip)) => info!(
                        switch = switch.number(),
                        clip = clip.name(),
                        "Started queued clip."
                    ),
                    Ok(outcome) => debug!(
                        switch = switch.number(),
                        outcome = format!("{:?}", outcome),
                        "Channel finished."
                    ),
                    Err(e) => error!(
                        switch = switch.number(),
                        err = e.to_string(),
                        "Unable to start queued clip"
                    ),
                }
            }

            let current = engine.snapshot();
            for change in changes(&previous, &current) {
                info!("{}", change);
            }
            previous = current;
        }
    }
}

/// Describes every switch whose state differs between the two snapshots.
pub fn changes(previous: &Snapshot, current: &Snapshot) -> Vec<String> {
    let mut changes: Vec<String> = previous
        .switches
        .iter()
        .zip(current.switches.iter())
        .filter(|(before, after)| before != after)
        .map(|(_, after)| after.to_string())
        .collect();
    if previous.gain != current.gain {
        changes.push(format!("Gain: {}", current.gain));
    }
    changes
}
