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
use std::{
    fmt,
    path::{Path, PathBuf},
    thread,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SizedSample,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level};

use super::{
    decoder::ClipLoader,
    mixer::{Mixer, Voice},
    BackendError, SoundHandle,
};
use crate::switch::SWITCH_COUNT;

/// Describes an output device found on one of the cpal hosts.
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    pub name: String,
    pub host: String,
    pub channels: u16,
    pub sample_rate: u32,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, SampleRate={}) ({})",
            self.name, self.channels, self.sample_rate, self.host
        )
    }
}

/// Lists every output device on every available host.
pub fn list() -> Result<Vec<DeviceDescriptor>, BackendError> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to open host"
                );
                continue;
            }
        };
        let host_devices = match host.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let config = match device.default_output_config() {
                Ok(config) => config,
                Err(_) => continue,
            };
            let name = match device.name() {
                Ok(name) => name,
                Err(_) => continue,
            };
            devices.push(DeviceDescriptor {
                name,
                host: host_id.name().to_string(),
                channels: config.channels(),
                sample_rate: config.sample_rate(),
            });
        }
    }

    devices.sort_by_key(|device| device.name.to_string());
    Ok(devices)
}

/// Finds an output device by name. "default" is the default output of the default host.
fn find_device(name: &str) -> Result<cpal::Device, BackendError> {
    if name == "default" {
        return cpal::default_host()
            .default_output_device()
            .ok_or_else(|| BackendError::DeviceNotFound(name.to_string()));
    }

    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(devices) = host.output_devices() else {
            continue;
        };
        for device in devices {
            if device.name().is_ok_and(|device_name| device_name.trim() == name) {
                return Ok(device);
            }
        }
    }

    Err(BackendError::DeviceNotFound(name.to_string()))
}

/// A backend that mixes every channel into one cpal output stream.
pub struct Backend {
    name: String,
    num_channels: u16,
    sample_rate: u32,
    voice_tx: crossbeam_channel::Sender<Voice>,
    /// The current sound of each channel.
    slots: Mutex<Vec<Option<SoundHandle>>>,
    loader: ClipLoader,
    shutdown_tx: crossbeam_channel::Sender<()>,
    output_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Backend {
    /// Opens the named output device and starts its output stream.
    pub fn open(name: &str) -> Result<Backend, BackendError> {
        let span = span!(Level::INFO, "open output", device = name);
        let _enter = span.enter();

        let device = find_device(name)?;
        let supported = device
            .default_output_config()
            .map_err(|e| BackendError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        let num_channels = stream_config.channels;
        let sample_rate: u32 = stream_config.sample_rate;

        let (voice_tx, voice_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        // The stream is created and dropped on the output thread.
        let output_thread = thread::spawn(move || {
            let mixer = Mixer::new(num_channels, sample_rate, voice_rx);
            let stream = match build_stream(&device, &stream_config, sample_format, mixer) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(BackendError::Device(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until shutdown is requested or the backend is gone.
            let _ = shutdown_rx.recv();
            debug!("Output stream stopping.");
        });

        ready_rx.recv().map_err(|_| BackendError::OutputClosed)??;
        info!(
            device = name,
            channels = num_channels,
            sample_rate,
            "Output stream started."
        );

        Ok(Backend {
            name: name.to_string(),
            num_channels,
            sample_rate,
            voice_tx,
            slots: Mutex::new(vec![None; SWITCH_COUNT as usize]),
            loader: ClipLoader::new(sample_rate),
            shutdown_tx,
            output_thread: Mutex::new(Some(output_thread)),
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: Mixer,
) -> Result<cpal::Stream, BackendError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_typed_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_typed_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_typed_stream::<i32>(device, config, mixer),
        cpal::SampleFormat::U16 => build_typed_stream::<u16>(device, config, mixer),
        other => Err(BackendError::Device(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream, BackendError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.process(&mut scratch);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            |err| error!("CPAL output stream error: {}", err),
            None,
        )
        .map_err(|e| BackendError::Device(e.to_string()))
}

impl super::Backend for Backend {
    fn start(
        &self,
        channel: usize,
        clip: &Path,
        looped: bool,
        gain: f32,
    ) -> Result<SoundHandle, BackendError> {
        let count = SWITCH_COUNT as usize;
        if channel >= count {
            return Err(BackendError::ChannelOutOfRange { channel, count });
        }

        // Decode before taking the slots lock.
        let decoded = self.loader.load(clip)?;

        let sound = SoundHandle::new(channel, clip, gain);
        let mut slots = self.slots.lock();
        if let Some(previous) = slots[channel].take() {
            previous.stop();
        }
        self.voice_tx
            .send(Voice::new(decoded, sound.clone(), looped))
            .map_err(|_| BackendError::OutputClosed)?;
        slots[channel] = Some(sound.clone());

        info!(
            channel,
            clip = ?clip,
            looped,
            gain,
            "Starting clip."
        );
        Ok(sound)
    }

    fn is_busy(&self, channel: usize) -> bool {
        self.slots
            .lock()
            .get(channel)
            .and_then(|slot| slot.as_ref())
            .is_some_and(|sound| !sound.is_finished() && !sound.is_stopped())
    }

    fn prepare(&self, clip: &Path) -> Result<(), BackendError> {
        self.loader.load(clip).map(|_| ())
    }

    fn preload(&self, clips: &[PathBuf]) {
        let dropped = self.loader.retain_current(clips);
        for clip in clips {
            if let Err(e) = self.loader.load(clip) {
                warn!(clip = ?clip, err = e.to_string(), "Unable to preload clip");
            }
        }
        info!(
            clips = clips.len(),
            dropped,
            bytes = self.loader.total_memory_usage(),
            "Preloaded clips."
        );
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        for sound in self.slots.lock().iter().flatten() {
            sound.stop();
        }
        let _ = self.shutdown_tx.try_send(());
        if let Some(output_thread) = self.output_thread.lock().take() {
            let _ = output_thread.join();
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, SampleRate={}) (CPAL)",
            self.name, self.num_channels, self.sample_rate
        )
    }
}
