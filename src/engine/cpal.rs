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

//! cpal-backed render engine.

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, error, info, warn};

use super::cache::{LoadJob, SampleCache, SourceAudio, StreamingBuffer};
use super::mixer::{ActiveSource, Mixer, MixerCommand, MixerShared};
use super::{EngineError, LoadMode, RenderEngine, SourceHandle, MIX_BUS};

/// Priority for the audio callback thread.
const CALLBACK_THREAD_PRIORITY: u8 = 70;

/// Per-source state kept by the engine handle. The atomics are shared
/// with the render context's `ActiveSource`.
struct SourceState {
    /// The audio data, present until the source is attached.
    audio: Option<SourceAudio>,
    volume: Arc<AtomicU32>,
    started: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    attached: bool,
}

/// The cpal render engine. The stream lives on its own thread; this
/// handle communicates with the render context exclusively through the
/// command channel and shared atomics.
pub struct Engine {
    device_name: String,
    sample_rate: u32,
    channels: usize,
    shared: Arc<MixerShared>,
    command_tx: Sender<MixerCommand>,
    cache: Arc<SampleCache>,
    loader_tx: Sender<LoadJob>,
    sources: Mutex<HashMap<u64, SourceState>>,
    next_source_id: AtomicU64,
    /// Dropping this disconnects the stream thread's park and shuts it
    /// down.
    _stop_tx: Sender<()>,
}

impl Engine {
    /// Creates an engine on the default output device and starts the
    /// output stream. The transport starts running.
    pub fn new() -> Result<Engine, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::NoOutputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let default_config = device
            .default_output_config()
            .map_err(|e| EngineError::Stream(e.to_string()))?;
        let supported = if default_config.sample_format() == cpal::SampleFormat::F32 {
            default_config
        } else {
            device
                .supported_output_configs()
                .map_err(|e| EngineError::Stream(e.to_string()))?
                .find(|c| c.sample_format() == cpal::SampleFormat::F32)
                .map(|c| c.with_max_sample_rate())
                .ok_or_else(|| {
                    EngineError::Stream("device has no f32 output format".to_string())
                })?
        };
        let config: cpal::StreamConfig = supported.config();
        let sample_rate = config.sample_rate;
        let channels = usize::from(config.channels);

        let shared = Arc::new(MixerShared::new());
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let mut mixer = Mixer::new(channels, shared.clone(), command_rx);

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        // The stream is not Send on every platform, so it is created and
        // kept on a dedicated thread.
        thread::spawn(move || {
            let mut priority_set = false;
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    promote_callback_thread(&mut priority_set);
                    mixer.fill(data);
                },
                |err| error!(error = %err, "Output stream error"),
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until the engine is dropped.
            let _ = stop_rx.recv();
        });

        ready_rx
            .recv()
            .map_err(|_| EngineError::Stream("output thread exited".to_string()))?
            .map_err(EngineError::Stream)?;

        let cache = Arc::new(SampleCache::new(sample_rate));
        let (loader_tx, loader_rx) = crossbeam_channel::unbounded::<LoadJob>();
        {
            let cache = cache.clone();
            thread::spawn(move || {
                for job in loader_rx.iter() {
                    cache.run_job(&job);
                }
            });
        }

        info!(
            device = device_name,
            sample_rate, channels, "Audio engine initialized"
        );

        Ok(Engine {
            device_name,
            sample_rate,
            channels,
            shared,
            command_tx,
            cache,
            loader_tx,
            sources: Mutex::new(HashMap::new()),
            next_source_id: AtomicU64::new(1),
            _stop_tx: stop_tx,
        })
    }

    /// Preloads the given sample files into the cache so triggering
    /// never waits on the decoder. Returns the number loaded.
    pub fn preload<'a>(&self, paths: impl Iterator<Item = &'a Path>) -> usize {
        self.cache.preload(paths)
    }

    /// Returns the output device name.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Returns the output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of output channels.
    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl RenderEngine for Engine {
    fn start(&self) -> Result<(), EngineError> {
        if !self.shared.set_running(true) {
            info!("Transport started");
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        if self.shared.set_running(false) {
            info!("Transport stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    fn set_global_volume(&self, volume: f32) {
        self.shared.set_global_volume(volume);
        debug!(volume, "Global volume set");
    }

    fn init_source(&self, path: &Path, mode: LoadMode) -> Result<SourceHandle, EngineError> {
        let audio = match mode {
            LoadMode::Blocking => SourceAudio::Ready(self.cache.load(path)?),
            LoadMode::Async => match self.cache.get(path) {
                Some(sample) => SourceAudio::Ready(sample),
                None => {
                    // Not preloaded; decode on the loader thread while
                    // playback starts on whatever has arrived.
                    let buffer = Arc::new(StreamingBuffer::new());
                    self.loader_tx
                        .send(LoadJob {
                            path: path.to_path_buf(),
                            buffer: buffer.clone(),
                        })
                        .map_err(|_| EngineError::Stream("loader thread exited".to_string()))?;
                    SourceAudio::Streaming(buffer)
                }
            },
        };

        let id = self.next_source_id.fetch_add(1, Ordering::SeqCst);
        let handle = SourceHandle::new(id);
        self.sources.lock().insert(
            id,
            SourceState {
                audio: Some(audio),
                volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
                started: Arc::new(AtomicBool::new(false)),
                finished: handle.finished_flag(),
                attached: false,
            },
        );
        Ok(handle)
    }

    fn attach(&self, handle: &SourceHandle, bus: usize) -> Result<(), EngineError> {
        if bus != MIX_BUS {
            return Err(EngineError::InvalidBus(bus));
        }

        let mut sources = self.sources.lock();
        let state = sources
            .get_mut(&handle.id())
            .ok_or(EngineError::UnknownSource(handle.id()))?;
        let Some(audio) = state.audio.take() else {
            // Already attached.
            return Ok(());
        };
        state.attached = true;

        self.command_tx
            .send(MixerCommand::Attach(ActiveSource {
                id: handle.id(),
                audio,
                position: 0,
                volume: state.volume.clone(),
                started: state.started.clone(),
                finished: state.finished.clone(),
            }))
            .map_err(|_| EngineError::Stream("render context exited".to_string()))
    }

    fn set_volume(&self, handle: &SourceHandle, volume: f32) {
        if let Some(state) = self.sources.lock().get(&handle.id()) {
            state
                .volume
                .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        }
    }

    fn start_source(&self, handle: &SourceHandle) -> Result<(), EngineError> {
        let sources = self.sources.lock();
        let state = sources
            .get(&handle.id())
            .ok_or(EngineError::UnknownSource(handle.id()))?;
        if !state.attached {
            return Err(EngineError::NotAttached(handle.id()));
        }
        state.started.store(true, Ordering::Release);
        Ok(())
    }

    fn release_source(&self, handle: &SourceHandle) {
        if self.sources.lock().remove(&handle.id()).is_some() {
            if self
                .command_tx
                .send(MixerCommand::Release(handle.id()))
                .is_err()
            {
                warn!(source = handle.id(), "Render context exited, release dropped");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("device", &self.device_name)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Promotes the audio callback thread the first time it runs.
fn promote_callback_thread(priority_set: &mut bool) {
    if *priority_set {
        return;
    }
    *priority_set = true;
    if let Ok(priority) = ThreadPriorityValue::try_from(CALLBACK_THREAD_PRIORITY) {
        if let Err(e) = set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
            debug!(error = ?e, "Unable to raise audio thread priority");
        }
    }
}

/// Lists the names of output-capable devices across all hosts.
pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
    let mut names: Vec<String> = Vec::new();
    for host_id in cpal::available_hosts() {
        let devices = match cpal::host_from_id(host_id)?.devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!(
                    error = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in devices {
            let has_output = device
                .supported_output_configs()
                .map(|mut configs| configs.next().is_some())
                .unwrap_or(false);
            if has_output {
                names.push(device.name()?);
            }
        }
    }
    names.sort();
    Ok(names)
}
