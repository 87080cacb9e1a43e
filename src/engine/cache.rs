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

//! Sample decoding and caching.
//!
//! Samples mapped in the configuration are decoded into memory at
//! startup so that triggering is an `Arc` clone. Anything else is
//! decoded progressively on the loader thread, with playback reading
//! whatever has arrived so far.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use parking_lot::RwLock;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use super::EngineError;

/// A fully decoded sample, interleaved f32 at the output sample rate.
/// The data is behind an `Arc` so voices share it without copying.
#[derive(Clone, Debug)]
pub struct LoadedSample {
    data: Arc<Vec<f32>>,
    channels: u16,
}

impl LoadedSample {
    /// Returns the interleaved sample data.
    pub fn data(&self) -> &Arc<Vec<f32>> {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Returns the number of frames.
    pub fn frames(&self) -> usize {
        self.data.len() / usize::from(self.channels.max(1))
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
impl LoadedSample {
    /// Builds a sample directly from interleaved data (test only).
    pub fn from_data(data: Vec<f32>, channels: u16) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channels,
        }
    }
}

/// A progressively filled sample buffer. The loader thread appends
/// resampled data under a short write lock; the render context reads
/// with `try_read` so it never blocks on the loader.
pub struct StreamingBuffer {
    samples: RwLock<Vec<f32>>,
    /// Channel count, 0 until the header has been probed.
    channels: AtomicU32,
    complete: AtomicBool,
    failed: AtomicBool,
}

impl StreamingBuffer {
    pub fn new() -> StreamingBuffer {
        StreamingBuffer {
            samples: RwLock::new(Vec::new()),
            channels: AtomicU32::new(0),
            complete: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    /// Returns the channel count, or `None` if the header has not been
    /// probed yet.
    pub fn channels(&self) -> Option<u16> {
        match self.channels.load(Ordering::Acquire) {
            0 => None,
            n => Some(n as u16),
        }
    }

    pub fn set_channels(&self, channels: u16) {
        self.channels.store(u32::from(channels), Ordering::Release);
    }

    pub fn push(&self, chunk: &[f32]) {
        self.samples.write().extend_from_slice(chunk);
    }

    /// Takes a read guard on the sample data without blocking. Returns
    /// `None` if the buffer is currently write-locked by the loader.
    pub fn try_read(&self) -> Option<parking_lot::RwLockReadGuard<'_, Vec<f32>>> {
        self.samples.try_read()
    }

    pub fn finish(&self) {
        self.complete.store(true, Ordering::Release);
    }

    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

impl Default for StreamingBuffer {
    fn default() -> StreamingBuffer {
        StreamingBuffer::new()
    }
}

/// The audio data backing a source.
pub enum SourceAudio {
    /// Fully decoded, shared from the cache.
    Ready(LoadedSample),
    /// Decoding in flight on the loader thread.
    Streaming(Arc<StreamingBuffer>),
}

/// A decode job for the loader thread.
pub struct LoadJob {
    pub path: PathBuf,
    pub buffer: Arc<StreamingBuffer>,
}

/// Cache of decoded samples by file path.
pub struct SampleCache {
    cache: RwLock<HashMap<PathBuf, LoadedSample>>,
    target_sample_rate: u32,
}

impl SampleCache {
    /// Creates a cache targeting the given output sample rate.
    pub fn new(target_sample_rate: u32) -> SampleCache {
        SampleCache {
            cache: RwLock::new(HashMap::new()),
            target_sample_rate,
        }
    }

    /// Returns the cached sample for the given path, if present.
    pub fn get(&self, path: &Path) -> Option<LoadedSample> {
        self.cache.read().get(path).cloned()
    }

    /// Decodes the given file into the cache, returning the cached
    /// version when already loaded.
    pub fn load(&self, path: &Path) -> Result<LoadedSample, EngineError> {
        if let Some(sample) = self.get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(sample);
        }

        let (data, channels) = decode_file(path, self.target_sample_rate, None)?;
        let loaded = LoadedSample {
            data: Arc::new(data),
            channels,
        };

        info!(
            path = ?path,
            channels,
            frames = loaded.frames(),
            memory_kb = loaded.memory_size() / 1024,
            "Sample loaded"
        );

        self.cache.write().insert(path.to_path_buf(), loaded.clone());
        Ok(loaded)
    }

    /// Preloads all the given paths, returning the number loaded.
    /// Individual failures are logged and skipped; the corresponding
    /// notes will fail at trigger time instead.
    pub fn preload<'a>(&self, paths: impl Iterator<Item = &'a Path>) -> usize {
        let mut loaded = 0;
        for path in paths {
            match self.load(path) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(path = ?path, error = %e, "Unable to preload sample"),
            }
        }
        info!(
            samples = loaded,
            memory_kb = self.total_memory_usage() / 1024,
            "Samples preloaded"
        );
        loaded
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.read().values().map(|s| s.memory_size()).sum()
    }

    /// Returns the target sample rate.
    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Runs a decode job for the loader thread, feeding the streaming
    /// buffer as data arrives and caching the finished sample.
    pub fn run_job(&self, job: &LoadJob) {
        match decode_file(&job.path, self.target_sample_rate, Some(&job.buffer)) {
            Ok((data, channels)) => {
                job.buffer.finish();
                let loaded = LoadedSample {
                    data: Arc::new(data),
                    channels,
                };
                self.cache.write().insert(job.path.clone(), loaded);
                debug!(path = ?job.path, "Streaming decode finished");
            }
            Err(e) => {
                warn!(path = ?job.path, error = %e, "Streaming decode failed");
                job.buffer.fail();
            }
        }
    }
}

impl std::fmt::Debug for SampleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleCache")
            .field("cached_samples", &self.cache.read().len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

/// Decodes a file to interleaved f32 at the target sample rate. When a
/// streaming buffer is given, resampled chunks are pushed to it as they
/// are produced.
fn decode_file(
    path: &Path,
    target_rate: u32,
    progress: Option<&StreamingBuffer>,
) -> Result<(Vec<f32>, u16), EngineError> {
    let decode_err = |reason: String| EngineError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| decode_err(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no supported audio track".to_string()))?;
    let track_id = track.id;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| decode_err("unknown channel count".to_string()))?;
    let source_rate = track.codec_params.sample_rate.unwrap_or(target_rate);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(e.to_string()))?;

    if let Some(buffer) = progress {
        buffer.set_channels(channels);
    }

    let mut resampler = if source_rate != target_rate {
        Some(ChunkResampler::new(
            usize::from(channels),
            source_rate,
            target_rate,
        ))
    } else {
        None
    };

    let mut data: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut chunk: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);

                chunk.clear();
                match resampler.as_mut() {
                    Some(resampler) => resampler.process(buf.samples(), &mut chunk),
                    None => chunk.extend_from_slice(buf.samples()),
                }
                if let Some(buffer) = progress {
                    buffer.push(&chunk);
                }
                data.extend_from_slice(&chunk);
            }
            // Recoverable per symphonia's contract; skip the packet.
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(path = ?path, error = e, "Skipping undecodable packet");
            }
            Err(e) => return Err(decode_err(e.to_string())),
        }
    }

    if let Some(mut resampler) = resampler {
        chunk.clear();
        resampler.flush(&mut chunk);
        if let Some(buffer) = progress {
            buffer.push(&chunk);
        }
        data.extend_from_slice(&chunk);
    }

    Ok((data, channels))
}

/// Linear-interpolation resampler that works across chunk boundaries.
/// Sufficient quality for drum hits and one-shots.
struct ChunkResampler {
    channels: usize,
    /// Source frames advanced per output frame.
    step: f64,
    /// Source frame position of the next output frame.
    next_pos: f64,
    /// Absolute index of the first frame held in `carry`.
    consumed: usize,
    /// The last frame of the previous chunk, for interpolation across
    /// the boundary.
    carry: Vec<f32>,
}

impl ChunkResampler {
    fn new(channels: usize, source_rate: u32, target_rate: u32) -> ChunkResampler {
        ChunkResampler {
            channels,
            step: f64::from(source_rate) / f64::from(target_rate),
            next_pos: 0.0,
            consumed: 0,
            carry: Vec::new(),
        }
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }

        let channels = self.channels;
        let mut frames = std::mem::take(&mut self.carry);
        frames.extend_from_slice(input);
        let frame_count = frames.len() / channels;

        // Interpolation needs the frame after the current one, so stop
        // one short and carry the last frame into the next chunk.
        while self.next_pos + 1.0 < (self.consumed + frame_count) as f64 {
            let rel = self.next_pos - self.consumed as f64;
            let i0 = rel.floor() as usize;
            let frac = rel.fract() as f32;
            for c in 0..channels {
                let s0 = frames[i0 * channels + c];
                let s1 = frames[(i0 + 1) * channels + c];
                out.push(s0 + (s1 - s0) * frac);
            }
            self.next_pos += self.step;
        }

        self.carry = frames[(frame_count - 1) * channels..].to_vec();
        self.consumed += frame_count - 1;
    }

    fn flush(&mut self, out: &mut Vec<f32>) {
        if self.carry.is_empty() {
            return;
        }
        // Emit any remaining positions within the final frame, holding
        // the last sample.
        while self.next_pos <= self.consumed as f64 {
            out.extend_from_slice(&self.carry);
            self.next_pos += self.step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                let value = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32)
                    .sin();
                writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_wav(&path, 44100, 2, 4410);

        let cache = SampleCache::new(44100);
        let loaded = cache.load(&path).unwrap();
        assert_eq!(loaded.channels(), 2);
        assert_eq!(loaded.frames(), 4410);

        // Second load comes from the cache and shares the data.
        let again = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(loaded.data(), again.data()));
        assert_eq!(cache.total_memory_usage(), loaded.memory_size());
    }

    #[test]
    fn test_load_resamples_to_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_wav(&path, 44100, 1, 4410);

        let cache = SampleCache::new(48000);
        let loaded = cache.load(&path).unwrap();
        let expected = (4410.0_f64 * 48000.0 / 44100.0) as usize;
        // Chunked linear interpolation lands within a frame or two of
        // the exact ratio.
        assert!((loaded.frames() as i64 - expected as i64).abs() <= 2);
    }

    #[test]
    fn test_load_missing_file() {
        let cache = SampleCache::new(44100);
        let err = cache.load(Path::new("/nonexistent/kick.wav")).unwrap_err();
        assert!(matches!(err, EngineError::Decode { .. }));
    }

    #[test]
    fn test_streaming_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snare.wav");
        write_wav(&path, 44100, 2, 1000);

        let cache = SampleCache::new(44100);
        let buffer = Arc::new(StreamingBuffer::new());
        cache.run_job(&LoadJob {
            path: path.clone(),
            buffer: buffer.clone(),
        });

        assert!(buffer.is_complete());
        assert!(!buffer.is_failed());
        assert_eq!(buffer.channels(), Some(2));
        assert_eq!(buffer.try_read().unwrap().len(), 2000);
        // The finished decode lands in the cache too.
        assert!(cache.get(&path).is_some());
    }

    #[test]
    fn test_streaming_decode_failure() {
        let cache = SampleCache::new(44100);
        let buffer = Arc::new(StreamingBuffer::new());
        cache.run_job(&LoadJob {
            path: PathBuf::from("/nonexistent/snare.wav"),
            buffer: buffer.clone(),
        });

        assert!(buffer.is_failed());
        assert!(!buffer.is_complete());
    }

    #[test]
    fn test_chunk_resampler_matches_single_pass() {
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 / 50.0).sin()).collect();

        let mut single = Vec::new();
        let mut resampler = ChunkResampler::new(1, 44100, 48000);
        resampler.process(&input, &mut single);
        resampler.flush(&mut single);

        let mut chunked = Vec::new();
        let mut resampler = ChunkResampler::new(1, 44100, 48000);
        for chunk in input.chunks(37) {
            resampler.process(chunk, &mut chunked);
        }
        resampler.flush(&mut chunked);

        assert_eq!(single.len(), chunked.len());
        for (a, b) in single.iter().zip(chunked.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
