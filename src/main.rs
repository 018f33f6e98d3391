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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stomploop::backend::{self, Backend};
use stomploop::config;
use stomploop::controller::{self, Controller, Driver};
use stomploop::engine::{Engine, GainSource, GainState};
use stomploop::library::ClipLibrary;
use stomploop::midi;
use stomploop::monitor::Monitor;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=switch-triggered clip looper

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/stomploop
ExecStart=/usr/local/bin/stomploop start --config "$STOMPLOOP_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=stomploop.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Loops audio clips triggered from foot-controller switches."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start will start the looper.
    Start {
        /// The path to the player config.
        #[arg[short, long]]
        config: Option<PathBuf>,
        /// The folder holding the numbered clip folders. Overrides the config.
        #[arg[long]]
        clips: Option<PathBuf>,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Lists the clips found for every switch.
    Clips {
        /// The folder holding the numbered clip folders.
        root: Option<PathBuf>,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config, clips } => {
            let mut player = config::Player::load(config.as_deref())?;
            if let Some(clips) = clips {
                player = player.with_clips(clips);
            }
            start(player).await?;
        }
        Commands::Devices {} => {
            let devices = backend::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Clips { root } => {
            let root = root.unwrap_or_else(|| PathBuf::from("."));
            let clips = ClipLibrary::new(&root).list_all();

            if clips.is_empty() {
                println!("No clips found in {}.", root.display());
                return Ok(());
            }

            println!("Clips (count: {}):", clips.len());
            for clip in clips {
                println!("- {}", clip);
            }
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}

/// Opens the configured audio device, falling back to the default device.
fn open_backend(name: &str) -> Result<Arc<dyn Backend>, Box<dyn Error>> {
    match backend::get_backend(name) {
        Ok(backend) => Ok(backend),
        Err(e) if name != "default" => {
            warn!(
                device = name,
                err = e.to_string(),
                "Unable to open audio device, falling back to the default device"
            );
            Ok(backend::get_backend("default")?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs the looper until every input closes or the process is interrupted.
async fn start(player: config::Player) -> Result<(), Box<dyn Error>> {
    let backend = open_backend(player.audio_device())?;
    info!(backend = %backend, "Audio backend ready.");

    let midi_device = match player.midi_device() {
        Some(name) => match midi::get_device(name) {
            Ok(device) => Some(device),
            Err(e) => {
                error!(
                    device = name,
                    err = e.to_string(),
                    "Unable to open MIDI device, continuing without MIDI"
                );
                None
            }
        },
        None => None,
    };

    let source = if midi_device.is_some() {
        GainSource::External
    } else {
        GainSource::Local
    };
    let engine = Arc::new(Engine::new(
        ClipLibrary::new(player.clips()),
        backend,
        player.fade_out()?,
        player.release(),
        GainState::new(player.initial_gain(), source),
    ));
    tokio::task::spawn_blocking({
        let engine = engine.clone();
        move || engine.refresh()
    })
    .await?;

    let mut drivers: Vec<Arc<dyn Driver>> = Vec::new();
    if let Some(midi_device) = midi_device {
        drivers.push(controller::midi::Driver::new(
            midi_device,
            player.midi_mapping(),
        ));
    }
    if player.keyboard() {
        drivers.push(Arc::new(controller::keyboard::Driver::new()));
    }
    if drivers.is_empty() {
        warn!("No inputs configured, switches can't be pressed.");
    }

    let monitor = Monitor::new(engine.clone(), player.refresh_rate());
    let mut controller = Controller::new(engine.clone(), drivers);
    info!(engine = %engine, "Looper started.");

    tokio::select! {
        result = controller.join() => {
            if let Err(e) = result {
                error!(err = e.to_string(), "Controller stopped unexpectedly");
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(err = e.to_string(), "Unable to wait for interrupt");
            }
        }
    }

    monitor.stop();
    engine.stop_all();
    info!("Looper stopped.");
    Ok(())
}
