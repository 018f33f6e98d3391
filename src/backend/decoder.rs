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

//! Clip decoding and caching.
//!
//! Clips are decoded entirely into memory at the output sample rate so that looping
//! them in the audio callback never touches the disk.

use std::{
    collections::{HashMap, HashSet},
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use rubato::{
    ResampleError, Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, warn};

use super::BackendError;

/// A decoded clip held in memory as interleaved f32 samples.
pub struct Clip {
    samples: Vec<f32>,
    channel_count: u16,
    sample_rate: u32,
}

impl Clip {
    pub fn new(samples: Vec<f32>, channel_count: u16, sample_rate: u32) -> Clip {
        Clip {
            samples,
            channel_count,
            sample_rate,
        }
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channel_count == 0 {
            return 0;
        }
        self.samples.len() / self.channel_count as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// The sample to play on the given output channel. Mono clips play on every
    /// output channel; otherwise source channels map one to one and output channels
    /// beyond the clip's channel count stay silent.
    #[inline]
    pub fn sample(&self, frame: usize, output_channel: usize) -> Option<f32> {
        let channels = self.channel_count as usize;
        let source_channel = if channels == 1 {
            0
        } else if output_channel < channels {
            output_channel
        } else {
            return None;
        };
        self.samples.get(frame * channels + source_channel).copied()
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

/// Decodes an audio file into memory, resampling it to the target sample rate.
pub fn decode_file(path: &Path, target_sample_rate: u32) -> Result<Clip, BackendError> {
    let decode_error = |reason: String| BackendError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| {
        BackendError::Io(io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_error(e.to_string()))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error("no audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let source_sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| decode_error("sample rate not specified".to_string()))?;
    let mut channel_count = codec_params
        .channels
        .map(|channels| channels.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(decode_error(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // A corrupt packet only drops that packet.
                warn!(path = ?path, err = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(decode_error(e.to_string())),
        };

        let spec = *decoded.spec();
        channel_count = spec.channels.count() as u16;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if channel_count == 0 {
        return Err(decode_error("unable to determine channel count".to_string()));
    }

    let samples = if source_sample_rate != target_sample_rate {
        debug!(
            path = ?path,
            source_rate = source_sample_rate,
            target_rate = target_sample_rate,
            "Resampling clip"
        );
        resample(
            &samples,
            channel_count,
            source_sample_rate,
            target_sample_rate,
        )?
    } else {
        samples
    };

    Ok(Clip::new(samples, channel_count, target_sample_rate))
}

const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Resamples interleaved samples from one sample rate to another with a windowed
/// sinc filter. The output is trimmed to the resampler's delay so the clip still
/// starts on its first frame and loops cleanly.
pub fn resample(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, BackendError> {
    let channels = channel_count as usize;
    if channels == 0 || source_rate == 0 || target_rate == 0 {
        return Err(BackendError::Resample(source_rate, target_rate));
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, RESAMPLE_CHUNK_SIZE, channels)
            .map_err(|_| BackendError::Resample(source_rate, target_rate))?;
    let resample_error = |_: ResampleError| BackendError::Resample(source_rate, target_rate);

    // Planar throughout, interleaved again at the end.
    let source_frames = samples.len() / channels;
    let planar: Vec<Vec<f32>> = (0..channels)
        .map(|channel| {
            samples
                .iter()
                .skip(channel)
                .step_by(channels)
                .copied()
                .collect()
        })
        .collect();

    let delay = resampler.output_delay();
    let target_frames =
        (source_frames as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize;
    let mut resampled: Vec<Vec<f32>> = vec![Vec::with_capacity(delay + target_frames); channels];
    let mut scratch = resampler.output_buffer_allocate(true);

    let mut position = 0;
    while source_frames - position >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let input: Vec<&[f32]> = planar
            .iter()
            .map(|channel| &channel[position..position + needed])
            .collect();
        let (consumed, produced) = resampler
            .process_into_buffer(&input, &mut scratch, None)
            .map_err(resample_error)?;
        append_planar(&mut resampled, &scratch, produced);
        position += consumed;
    }

    if position < source_frames {
        let input: Vec<&[f32]> = planar.iter().map(|channel| &channel[position..]).collect();
        let (_, produced) = resampler
            .process_partial_into_buffer(Some(input.as_slice()), &mut scratch, None)
            .map_err(resample_error)?;
        append_planar(&mut resampled, &scratch, produced);
    }

    // Flush the filter until the delayed tail is out.
    while resampled[0].len() < delay + target_frames {
        let (_, produced) = resampler
            .process_partial_into_buffer(None::<&[Vec<f32>]>, &mut scratch, None)
            .map_err(resample_error)?;
        if produced == 0 {
            break;
        }
        append_planar(&mut resampled, &scratch, produced);
    }

    let mut output = Vec::with_capacity(target_frames * channels);
    for frame in delay..delay + target_frames {
        for channel in &resampled {
            output.push(channel.get(frame).copied().unwrap_or(0.0));
        }
    }
    Ok(output)
}

fn append_planar(output: &mut [Vec<f32>], chunk: &[Vec<f32>], frames: usize) {
    for (out, chunk) in output.iter_mut().zip(chunk.iter()) {
        out.extend_from_slice(&chunk[..frames]);
    }
}

struct CachedClip {
    clip: Arc<Clip>,
    modified: Option<SystemTime>,
}

/// Decodes clips on first use and keeps them for later starts. The cache lock is
/// only held for lookups and inserts, never while decoding.
pub struct ClipLoader {
    cache: Mutex<HashMap<PathBuf, CachedClip>>,
    target_sample_rate: u32,
}

impl ClipLoader {
    pub fn new(target_sample_rate: u32) -> ClipLoader {
        ClipLoader {
            cache: Mutex::new(HashMap::new()),
            target_sample_rate,
        }
    }

    /// Loads a clip, returning the cached copy if it was loaded before.
    pub fn load(&self, path: &Path) -> Result<Arc<Clip>, BackendError> {
        if let Some(cached) = self.cache.lock().get(path) {
            return Ok(cached.clip.clone());
        }

        let modified = modified_time(path);
        let clip = Arc::new(decode_file(path, self.target_sample_rate)?);
        info!(
            path = ?path,
            channels = clip.channel_count(),
            sample_rate = clip.sample_rate(),
            duration_ms = clip.duration().as_millis() as u64,
            memory_kb = clip.memory_size() / 1024,
            "Clip loaded"
        );

        // Another load of the same path may have finished first; keep that one.
        let mut cache = self.cache.lock();
        let cached = cache
            .entry(path.to_path_buf())
            .or_insert(CachedClip { clip, modified });
        Ok(cached.clip.clone())
    }

    /// Drops cached clips that are no longer in the given listing or whose file
    /// changed since it was decoded. Returns the number of clips dropped.
    pub fn retain_current(&self, paths: &[PathBuf]) -> usize {
        let listed: HashSet<&PathBuf> = paths.iter().collect();
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|path, cached| {
            let keep = listed.contains(path) && modified_time(path) == cached.modified;
            if !keep {
                debug!(path = ?path, "Dropping cached clip");
            }
            keep
        });
        before - cache.len()
    }

    /// Returns the total memory used by cached clips.
    pub fn total_memory_usage(&self) -> usize {
        self.cache
            .lock()
            .values()
            .map(|cached| cached.clip.memory_size())
            .sum()
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

impl std::fmt::Debug for ClipLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipLoader")
            .field("cached_clips", &self.cached())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use hound::{SampleFormat, WavSpec, WavWriter};

    use super::*;

    fn write_wav(
        path: &Path,
        channels: u16,
        sample_rate: u32,
        frames: usize,
    ) -> Result<(), Box<dyn Error>> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for frame in 0..frames {
            for channel in 0..channels {
                let value = if channel == 0 { 8192 } else { -8192 };
                writer.write_sample(if frame % 2 == 0 { value } else { 0i16 })?;
            }
        }
        writer.finalize()?;
        Ok(())
    }

    #[test]
    fn test_decode_wav() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("loop.wav");
        write_wav(&path, 2, 44100, 4410)?;

        let clip = decode_file(&path, 44100)?;
        assert_eq!(clip.channel_count(), 2);
        assert_eq!(clip.sample_rate(), 44100);
        assert_eq!(clip.frames(), 4410);
        assert!((clip.sample(0, 0).unwrap_or_default() - 0.25).abs() < 0.001);
        assert!((clip.sample(0, 1).unwrap_or_default() + 0.25).abs() < 0.001);
        assert_eq!(clip.sample(0, 2), None);
        Ok(())
    }

    #[test]
    fn test_decode_resamples() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 44100, 4410)?;

        let clip = decode_file(&path, 48000)?;
        assert_eq!(clip.sample_rate(), 48000);
        assert_eq!(clip.frames(), 4800);
        // Mono clips play on every output channel.
        assert_eq!(clip.sample(0, 0), clip.sample(0, 5));
        Ok(())
    }

    #[test]
    fn test_decode_failures() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(
            decode_file(&dir.path().join("missing.wav"), 44100),
            Err(BackendError::Io(_))
        ));

        let garbage = dir.path().join("garbage.wav");
        std::fs::write(&garbage, b"definitely not audio")?;
        assert!(matches!(
            decode_file(&garbage, 44100),
            Err(BackendError::Decode { .. })
        ));
        Ok(())
    }

    fn sine(frequency: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_resample_keeps_length_and_level() -> Result<(), Box<dyn Error>> {
        let source = sine(440.0, 44100, 4410);
        let result = resample(&source, 1, 44100, 48000)?;
        assert_eq!(result.len(), 4800);

        // Away from the edges a 440Hz tone keeps its level.
        let middle = &result[1000..3800];
        assert!((rms(middle) - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.02);
        Ok(())
    }

    #[test]
    fn test_resample_keeps_channels_apart() -> Result<(), Box<dyn Error>> {
        let stereo: Vec<f32> = (0..2000).flat_map(|_| [0.5f32, -0.5]).collect();
        let result = resample(&stereo, 2, 48000, 44100)?;
        assert_eq!(result.len(), 1838 * 2);

        let frame = 900;
        assert!((result[frame * 2] - 0.5).abs() < 0.01);
        assert!((result[frame * 2 + 1] + 0.5).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn test_resample_filters_above_target_nyquist() -> Result<(), Box<dyn Error>> {
        // 23.5kHz can't be represented at 24kHz and must not fold back down.
        let source = sine(23500.0, 48000, 9600);
        let result = resample(&source, 1, 48000, 24000)?;
        assert_eq!(result.len(), 4800);
        assert!(rms(&result[1000..3800]) < 0.05);
        Ok(())
    }

    #[test]
    fn test_resample_rejects_zero_rates() {
        assert!(matches!(
            resample(&[0.0; 4], 1, 0, 48000),
            Err(BackendError::Resample(0, 48000))
        ));
    }

    #[test]
    fn test_loader_caches() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.wav");
        write_wav(&path, 1, 44100, 100)?;

        let loader = ClipLoader::new(44100);
        let first = loader.load(&path)?;
        let second = loader.load(&path)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.cached(), 1);
        assert_eq!(loader.total_memory_usage(), 100 * std::mem::size_of::<f32>());
        Ok(())
    }

    #[test]
    fn test_loader_drops_stale_clips() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let kept = dir.path().join("kept.wav");
        let replaced = dir.path().join("replaced.wav");
        let removed = dir.path().join("removed.wav");
        write_wav(&kept, 1, 44100, 100)?;
        write_wav(&replaced, 1, 44100, 100)?;
        write_wav(&removed, 1, 44100, 100)?;

        let loader = ClipLoader::new(44100);
        let kept_clip = loader.load(&kept)?;
        loader.load(&replaced)?;
        loader.load(&removed)?;
        assert_eq!(loader.cached(), 3);

        // Replace one file with a longer clip and make sure its timestamp moves.
        write_wav(&replaced, 1, 44100, 200)?;
        File::options()
            .write(true)
            .open(&replaced)?
            .set_modified(SystemTime::now() + Duration::from_secs(60))?;
        fs::remove_file(&removed)?;

        let dropped = loader.retain_current(&[kept.clone(), replaced.clone()]);
        assert_eq!(dropped, 2);
        assert_eq!(loader.cached(), 1);
        assert!(Arc::ptr_eq(&kept_clip, &loader.load(&kept)?));
        assert_eq!(loader.load(&replaced)?.frames(), 200);
        Ok(())
    }
}
