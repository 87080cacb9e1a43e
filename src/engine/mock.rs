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

//! A mock render engine. Doesn't actually play anything.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{EngineError, LoadMode, RenderEngine, SourceHandle, MIX_BUS};

/// The state the mock keeps per source.
#[derive(Clone)]
pub struct MockSource {
    pub path: PathBuf,
    pub mode: LoadMode,
    pub volume: f32,
    pub attached: bool,
    pub started: bool,
    pub handle: SourceHandle,
}

/// A mock render engine recording every interaction for inspection.
pub struct Engine {
    running: AtomicBool,
    /// Actual transport transitions, not counting idempotent no-ops.
    transport_starts: AtomicUsize,
    transport_stops: AtomicUsize,
    global_volume: Mutex<f32>,
    next_source_id: AtomicU64,
    sources: Mutex<HashMap<u64, MockSource>>,
    released: Mutex<Vec<u64>>,
    fail_init_paths: Mutex<HashSet<PathBuf>>,
    fail_start_paths: Mutex<HashSet<PathBuf>>,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            running: AtomicBool::new(true),
            transport_starts: AtomicUsize::new(0),
            transport_stops: AtomicUsize::new(0),
            global_volume: Mutex::new(1.0),
            next_source_id: AtomicU64::new(1),
            sources: Mutex::new(HashMap::new()),
            released: Mutex::new(Vec::new()),
            fail_init_paths: Mutex::new(HashSet::new()),
            fail_start_paths: Mutex::new(HashSet::new()),
        }
    }

    /// Makes `init_source` fail for the given path.
    pub fn fail_init_for(&self, path: &Path) {
        self.fail_init_paths.lock().insert(path.to_path_buf());
    }

    /// Makes `start_source` fail for sources loaded from the given path.
    pub fn fail_start_for(&self, path: &Path) {
        self.fail_start_paths.lock().insert(path.to_path_buf());
    }

    /// Marks the source behind the handle as drained, as the render
    /// context would once the audio has played out.
    pub fn finish(&self, handle: &SourceHandle) {
        handle.mark_finished();
    }

    /// Returns the recorded state of a source, if it still exists.
    pub fn source(&self, id: u64) -> Option<MockSource> {
        self.sources.lock().get(&id).cloned()
    }

    /// Returns the number of live (non-released) sources.
    pub fn live_sources(&self) -> usize {
        self.sources.lock().len()
    }

    /// Returns the ids of released sources, in release order.
    pub fn released(&self) -> Vec<u64> {
        self.released.lock().clone()
    }

    pub fn global_volume(&self) -> f32 {
        *self.global_volume.lock()
    }

    pub fn transport_starts(&self) -> usize {
        self.transport_starts.load(Ordering::SeqCst)
    }

    pub fn transport_stops(&self) -> usize {
        self.transport_stops.load(Ordering::SeqCst)
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}

impl RenderEngine for Engine {
    fn start(&self) -> Result<(), EngineError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.transport_starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        if self.running.swap(false, Ordering::SeqCst) {
            self.transport_stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_global_volume(&self, volume: f32) {
        *self.global_volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn init_source(&self, path: &Path, mode: LoadMode) -> Result<SourceHandle, EngineError> {
        if self.fail_init_paths.lock().contains(path) {
            return Err(EngineError::Decode {
                path: path.to_path_buf(),
                reason: "mock init failure".to_string(),
            });
        }

        let id = self.next_source_id.fetch_add(1, Ordering::SeqCst);
        let handle = SourceHandle::new(id);
        self.sources.lock().insert(
            id,
            MockSource {
                path: path.to_path_buf(),
                mode,
                volume: 1.0,
                attached: false,
                started: false,
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    fn attach(&self, handle: &SourceHandle, bus: usize) -> Result<(), EngineError> {
        if bus != MIX_BUS {
            return Err(EngineError::InvalidBus(bus));
        }
        let mut sources = self.sources.lock();
        let source = sources
            .get_mut(&handle.id())
            .ok_or(EngineError::UnknownSource(handle.id()))?;
        source.attached = true;
        Ok(())
    }

    fn set_volume(&self, handle: &SourceHandle, volume: f32) {
        if let Some(source) = self.sources.lock().get_mut(&handle.id()) {
            source.volume = volume.clamp(0.0, 1.0);
        }
    }

    fn start_source(&self, handle: &SourceHandle) -> Result<(), EngineError> {
        let mut sources = self.sources.lock();
        let source = sources
            .get_mut(&handle.id())
            .ok_or(EngineError::UnknownSource(handle.id()))?;
        if !source.attached {
            return Err(EngineError::NotAttached(handle.id()));
        }
        if self.fail_start_paths.lock().contains(&source.path) {
            return Err(EngineError::Stream("mock start failure".to_string()));
        }
        source.started = true;
        Ok(())
    }

    fn release_source(&self, handle: &SourceHandle) {
        if self.sources.lock().remove(&handle.id()).is_some() {
            self.released.lock().push(handle.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_transitions() {
        let engine = Engine::new();
        assert!(engine.is_running());

        // Stopping twice records a single transition.
        engine.stop().unwrap();
        engine.stop().unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.transport_stops(), 1);

        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.transport_starts(), 1);
    }

    #[test]
    fn test_source_lifecycle() {
        let engine = Engine::new();
        let handle = engine
            .init_source(Path::new("kick.wav"), LoadMode::Async)
            .unwrap();

        // Starting before attaching is an error.
        assert!(matches!(
            engine.start_source(&handle),
            Err(EngineError::NotAttached(_))
        ));

        assert!(matches!(
            engine.attach(&handle, 1),
            Err(EngineError::InvalidBus(1))
        ));
        engine.attach(&handle, MIX_BUS).unwrap();
        engine.set_volume(&handle, 0.5);
        engine.start_source(&handle).unwrap();

        let source = engine.source(handle.id()).unwrap();
        assert!(source.attached);
        assert!(source.started);
        assert_eq!(source.volume, 0.5);
        assert!(!handle.is_finished());

        engine.finish(&handle);
        assert!(handle.is_finished());

        engine.release_source(&handle);
        assert_eq!(engine.live_sources(), 0);
        assert_eq!(engine.released(), vec![handle.id()]);
    }
}
