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

//! Core mixing logic, independent of the audio backend.
//!
//! The mixer is owned by the render context. Everything else talks to
//! it through the command channel (attach/release) or through shared
//! atomics (transport, volumes, completion flags), so the callback
//! never contends on a lock with the trigger path.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use crossbeam_channel::Receiver;

use super::cache::SourceAudio;

/// State shared between the engine handle and the render context.
pub struct MixerShared {
    /// Whether the transport is running. When stopped the mixer emits
    /// silence and does not advance any source.
    running: AtomicBool,
    /// Global output volume, f32 bits.
    global_volume: AtomicU32,
}

impl MixerShared {
    pub fn new() -> MixerShared {
        MixerShared {
            running: AtomicBool::new(true),
            global_volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sets the transport state, returning the previous state.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::AcqRel)
    }

    pub fn global_volume(&self) -> f32 {
        f32::from_bits(self.global_volume.load(Ordering::Relaxed))
    }

    pub fn set_global_volume(&self, volume: f32) {
        self.global_volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for MixerShared {
    fn default() -> MixerShared {
        MixerShared::new()
    }
}

/// Commands sent from the engine handle to the render context.
pub enum MixerCommand {
    /// Add a source to the graph.
    Attach(ActiveSource),
    /// Drop the source with the given id.
    Release(u64),
}

/// A source attached to the mix bus.
pub struct ActiveSource {
    pub id: u64,
    pub audio: SourceAudio,
    /// Frames already consumed.
    pub position: usize,
    /// Source volume, f32 bits, shared with the engine handle.
    pub volume: Arc<AtomicU32>,
    /// Set by the engine handle once playback should begin. Until then
    /// the source stays attached but silent.
    pub started: Arc<AtomicBool>,
    /// The completion flag shared with the owning voice.
    pub finished: Arc<AtomicBool>,
}

impl ActiveSource {
    /// Mixes this source into the interleaved output buffer. Returns
    /// false once the source has drained and should be dropped.
    fn mix_into(&mut self, out: &mut [f32], channels: usize, global_volume: f32) -> bool {
        if !self.started.load(Ordering::Acquire) {
            return true;
        }
        let gain = f32::from_bits(self.volume.load(Ordering::Relaxed)) * global_volume;

        let drained = match &self.audio {
            SourceAudio::Ready(sample) => mix_data(
                sample.data(),
                usize::from(sample.channels()),
                &mut self.position,
                out,
                channels,
                gain,
                true,
            ),
            SourceAudio::Streaming(buffer) => {
                if buffer.is_failed() {
                    true
                } else {
                    match (buffer.channels(), buffer.try_read()) {
                        (Some(source_channels), Some(data)) => mix_data(
                            &data,
                            usize::from(source_channels),
                            &mut self.position,
                            out,
                            channels,
                            gain,
                            buffer.is_complete(),
                        ),
                        // Header not probed yet, or the loader holds the
                        // write lock. Skip this block; no data is lost,
                        // the source simply starts a block later.
                        _ => false,
                    }
                }
            }
        };

        if drained {
            self.finished.store(true, Ordering::Release);
        }
        !drained
    }
}

/// Mixes interleaved source data into the output, advancing `position`.
/// Mono sources fan out to every output channel; otherwise channels map
/// one to one and extra source channels fold into the last output.
/// Returns true once the source is drained (`complete` distinguishes a
/// fully loaded source from one still streaming in).
#[allow(clippy::too_many_arguments)]
fn mix_data(
    data: &[f32],
    source_channels: usize,
    position: &mut usize,
    out: &mut [f32],
    out_channels: usize,
    gain: f32,
    complete: bool,
) -> bool {
    if source_channels == 0 || out_channels == 0 {
        return complete;
    }
    let total_frames = data.len() / source_channels;
    let out_frames = out.len() / out_channels;
    let frames = out_frames.min(total_frames.saturating_sub(*position));

    for frame in 0..frames {
        let source_base = (*position + frame) * source_channels;
        let out_base = frame * out_channels;
        for channel in 0..out_channels {
            let source_channel = if source_channels == 1 {
                0
            } else {
                channel.min(source_channels - 1)
            };
            out[out_base + channel] += data[source_base + source_channel] * gain;
        }
    }

    *position += frames;
    complete && *position >= total_frames
}

/// The mixer proper, owned by the render context.
pub struct Mixer {
    channels: usize,
    shared: Arc<MixerShared>,
    commands: Receiver<MixerCommand>,
    sources: Vec<ActiveSource>,
}

impl Mixer {
    pub fn new(
        channels: usize,
        shared: Arc<MixerShared>,
        commands: Receiver<MixerCommand>,
    ) -> Mixer {
        Mixer {
            channels,
            shared,
            commands,
            sources: Vec::new(),
        }
    }

    /// Fills the interleaved output buffer with one block of audio.
    pub fn fill(&mut self, out: &mut [f32]) {
        self.drain_commands();

        out.fill(0.0);
        if !self.shared.is_running() {
            return;
        }

        let channels = self.channels;
        let global_volume = self.shared.global_volume();
        self.sources
            .retain_mut(|source| source.mix_into(out, channels, global_volume));
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::Attach(source) => self.sources.push(source),
                MixerCommand::Release(id) => self.sources.retain(|s| s.id != id),
            }
        }
    }

    /// Returns the number of attached sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}
