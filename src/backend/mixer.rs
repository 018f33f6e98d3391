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

// Core mixing logic, independent of the output device so it can be tested directly.
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use super::decoder::Clip;
use super::SoundHandle;

/// A linear ramp to silence, counted in frames.
struct FadeRamp {
    total: u64,
    remaining: u64,
}

impl FadeRamp {
    fn new(duration: Duration, sample_rate: u32) -> FadeRamp {
        let total = (duration.as_secs_f64() * sample_rate as f64).round() as u64;
        FadeRamp {
            total: total.max(1),
            remaining: total,
        }
    }

    /// The gain multiplier for the next frame, or None once the ramp reached silence.
    fn next(&mut self) -> Option<f32> {
        if self.remaining == 0 {
            return None;
        }
        let gain = self.remaining as f32 / self.total as f32;
        self.remaining -= 1;
        Some(gain)
    }
}

/// A clip being played by the mixer.
pub struct Voice {
    clip: Arc<Clip>,
    handle: SoundHandle,
    looped: bool,
    frame: usize,
    fade: Option<FadeRamp>,
}

impl Voice {
    pub fn new(clip: Arc<Clip>, handle: SoundHandle, looped: bool) -> Voice {
        Voice {
            clip,
            handle,
            looped,
            frame: 0,
            fade: None,
        }
    }

    /// Mixes this voice into the interleaved output. Returns false once the voice
    /// has nothing more to play.
    fn mix_into(&mut self, output: &mut [f32], output_channels: usize, sample_rate: u32) -> bool {
        if self.handle.is_stopped() {
            return false;
        }
        if self.fade.is_none() {
            if let Some(fade) = self.handle.fade() {
                self.fade = Some(FadeRamp::new(fade.duration, sample_rate));
            }
        }

        let clip_frames = self.clip.frames();
        if clip_frames == 0 {
            return false;
        }

        let gain = self.handle.gain();
        for frame in output.chunks_exact_mut(output_channels) {
            if self.frame >= clip_frames {
                if !self.looped {
                    return false;
                }
                self.frame = 0;
            }

            let fade_gain = match self.fade.as_mut() {
                Some(ramp) => match ramp.next() {
                    Some(fade_gain) => fade_gain,
                    None => return false,
                },
                None => 1.0,
            };

            for (channel, out) in frame.iter_mut().enumerate() {
                if let Some(sample) = self.clip.sample(self.frame, channel) {
                    *out += sample * gain * fade_gain;
                }
            }
            self.frame += 1;
        }

        true
    }
}

/// Mixes voices into an interleaved output buffer. New voices arrive over a channel
/// so the audio callback never waits on the engine.
pub struct Mixer {
    num_channels: u16,
    sample_rate: u32,
    voices: Vec<Voice>,
    voice_rx: Receiver<Voice>,
}

impl Mixer {
    pub fn new(num_channels: u16, sample_rate: u32, voice_rx: Receiver<Voice>) -> Mixer {
        Mixer {
            num_channels,
            sample_rate,
            voices: Vec::new(),
            voice_rx,
        }
    }

    /// Fills the interleaved output with the next block of audio. Voices that end
    /// during the block are marked finished on their handles.
    pub fn process(&mut self, output: &mut [f32]) {
        while let Ok(voice) = self.voice_rx.try_recv() {
            self.voices.push(voice);
        }

        output.fill(0.0);
        let output_channels = self.num_channels as usize;
        if output_channels == 0 {
            return;
        }

        let sample_rate = self.sample_rate;
        self.voices.retain_mut(|voice| {
            let playing = voice.mix_into(output, output_channels, sample_rate);
            if !playing {
                voice.handle.mark_finished();
            }
            playing
        });
    }

    /// The number of voices currently mixed.
    pub fn active_count(&self) -> usize {
        self.voices.len()
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crossbeam_channel::Sender;

    use super::*;

    fn create_mixer(num_channels: u16) -> (Mixer, Sender<Voice>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Mixer::new(num_channels, 1000, rx), tx)
    }

    fn start(tx: &Sender<Voice>, samples: Vec<f32>, channels: u16, looped: bool) -> SoundHandle {
        let handle = SoundHandle::new(0, Path::new("1/test.wav"), 1.0);
        let clip = Arc::new(Clip::new(samples, channels, 1000));
        tx.send(Voice::new(clip, handle.clone(), looped))
            .expect("unable to send voice");
        handle
    }

    #[test]
    fn test_looping() {
        let (mut mixer, tx) = create_mixer(1);
        let handle = start(&tx, vec![0.1, 0.2, 0.3], 1, true);

        let mut output = vec![0.0f32; 7];
        mixer.process(&mut output);
        assert_eq!(output, vec![0.1, 0.2, 0.3, 0.1, 0.2, 0.3, 0.1]);
        assert_eq!(mixer.active_count(), 1);
        assert!(!handle.is_finished());
    }

    #[test]
    fn test_one_shot_finishes() {
        let (mut mixer, tx) = create_mixer(2);
        let handle = start(&tx, vec![0.5, -0.5], 2, false);

        let mut output = vec![0.0f32; 6];
        mixer.process(&mut output);
        assert_eq!(output, vec![0.5, -0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(mixer.active_count(), 0);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_mono_plays_on_every_channel() {
        let (mut mixer, tx) = create_mixer(2);
        start(&tx, vec![0.25], 1, true);

        let mut output = vec![0.0f32; 4];
        mixer.process(&mut output);
        assert_eq!(output, vec![0.25, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_gain_and_mixing() {
        let (mut mixer, tx) = create_mixer(1);
        let first = start(&tx, vec![0.5], 1, true);
        start(&tx, vec![0.25], 1, true);
        first.set_gain(0.5);

        let mut output = vec![0.0f32; 2];
        mixer.process(&mut output);
        assert_eq!(output, vec![0.5, 0.5]);
    }

    #[test]
    fn test_fade_to_silence() {
        let (mut mixer, tx) = create_mixer(1);
        let handle = start(&tx, vec![1.0], 1, true);

        let mut output = vec![0.0f32; 2];
        mixer.process(&mut output);
        assert_eq!(output, vec![1.0, 1.0]);

        // 4ms at 1000Hz is four frames.
        handle.fade_to_silence(Duration::from_millis(4));
        let mut output = vec![0.0f32; 6];
        mixer.process(&mut output);
        assert_eq!(output, vec![1.0, 0.75, 0.5, 0.25, 0.0, 0.0]);
        assert!(handle.is_finished());
        assert_eq!(mixer.active_count(), 0);
    }

    #[test]
    fn test_stop() {
        let (mut mixer, tx) = create_mixer(1);
        let handle = start(&tx, vec![1.0], 1, true);
        handle.stop();

        let mut output = vec![0.0f32; 2];
        mixer.process(&mut output);
        assert_eq!(output, vec![0.0, 0.0]);
        assert!(handle.is_finished());
    }
}
