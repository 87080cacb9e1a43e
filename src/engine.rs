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

//! The audio render engine.
//!
//! The engine owns the audio graph and advances playback on its own
//! real-time context. The trigger path only ever talks to it through
//! non-blocking calls: source initialization is cache-backed or handed
//! to a loader thread, attachment and release are channel sends, and
//! the per-source completion flag is an atomic the render context
//! stores and the voice pool polls.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub mod cache;
pub mod cpal;
pub mod mixer;
pub mod mock;

/// The only mixing bus the engine exposes. Sources are never attached
/// implicitly; the caller attaches to this bus explicitly.
pub const MIX_BUS: usize = 0;

/// Typed error for render engine failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("unable to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("invalid mix bus index {0}")]
    InvalidBus(usize),
    #[error("unknown source {0}")]
    UnknownSource(u64),
    #[error("source {0} is not attached to the graph")]
    NotAttached(u64),
}

/// How a source should be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Decode the whole file before returning.
    Blocking,
    /// Return immediately. A cached sample is shared as-is; otherwise
    /// decoding continues on the loader thread and playback begins as
    /// data arrives.
    Async,
}

/// A handle to a source owned by the engine.
///
/// The handle carries the source's completion flag. The render context
/// stores `true` once the source has fully drained and never clears it;
/// clearing happens implicitly when the owning voice is recycled and
/// the source released.
#[derive(Clone)]
pub struct SourceHandle {
    id: u64,
    finished: Arc<AtomicBool>,
}

impl SourceHandle {
    pub(crate) fn new(id: u64) -> SourceHandle {
        SourceHandle {
            id,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the engine-assigned source id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns whether the source has fully drained. Paired with the
    /// `Release` store in `mark_finished` so a caller that observes
    /// `true` also observes everything the render context did before.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Marks the source as finished, making the owning voice eligible
    /// for recycling.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub(crate) fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// The render engine interface consumed by the dispatcher and the
/// voice pool. Every call is non-blocking.
pub trait RenderEngine: Send + Sync {
    /// Starts (resumes) rendering. A no-op when already running.
    fn start(&self) -> Result<(), EngineError>;

    /// Stops (pauses) rendering. Attached sources are neither released
    /// nor recycled; resuming continues unchanged. A no-op when already
    /// stopped.
    fn stop(&self) -> Result<(), EngineError>;

    /// Returns whether the engine is currently rendering.
    fn is_running(&self) -> bool;

    /// Sets the global output volume as a fraction in [0, 1].
    fn set_global_volume(&self, volume: f32);

    /// Initializes a source from the given sample file.
    fn init_source(&self, path: &Path, mode: LoadMode) -> Result<SourceHandle, EngineError>;

    /// Attaches the source to the given mixing bus.
    fn attach(&self, handle: &SourceHandle, bus: usize) -> Result<(), EngineError>;

    /// Sets the source volume as a fraction in [0, 1].
    fn set_volume(&self, handle: &SourceHandle, volume: f32);

    /// Starts playback of an attached source.
    fn start_source(&self, handle: &SourceHandle) -> Result<(), EngineError>;

    /// Releases the source, detaching it from the graph and freeing its
    /// resources.
    fn release_source(&self, handle: &SourceHandle);
}

/// Lists the names of audio output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    cpal::list()
}
