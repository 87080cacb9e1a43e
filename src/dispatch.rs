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

//! Maps decoded controller events onto engine and voice pool actions.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, error, trace, warn};

use crate::assets::AssetResolver;
use crate::engine::RenderEngine;
use crate::events::{Decoder, Event, EventKind, RawMessage};
use crate::voices::{TriggerOutcome, VoicePool};

/// The highest controller value, used to normalize the volume control.
const MAX_CONTROL_VALUE: u8 = 127;

/// The transport control threshold. Values at or above it stop the
/// transport; values below it start it.
const TRANSPORT_STOP_THRESHOLD: f32 = 127.0 / 2.0;

/// Routes controller events to the render engine and the voice pool.
pub struct Dispatcher {
    engine: Arc<dyn RenderEngine>,
    pool: VoicePool,
    resolver: AssetResolver,
    /// When false, every hit is triggered at full velocity.
    adaptive_volume: bool,
    decoder: Decoder,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        pool: VoicePool,
        resolver: AssetResolver,
        adaptive_volume: bool,
    ) -> Dispatcher {
        Dispatcher {
            engine,
            pool,
            resolver,
            adaptive_volume,
            decoder: Decoder::new(),
        }
    }

    /// Consumes raw messages until the channel disconnects. Each message
    /// is decoded and dispatched in arrival order.
    pub fn run(&mut self, messages: Receiver<RawMessage>) {
        for raw in messages.iter() {
            if let Some(event) = self.decoder.decode(&raw) {
                self.handle_event(&event);
            }
        }
        debug!("Message channel closed, dispatcher exiting");
    }

    /// Dispatches a single decoded event.
    pub fn handle_event(&self, event: &Event) {
        match event.kind {
            EventKind::NoteOn { note, velocity } => {
                let velocity = if self.adaptive_volume {
                    velocity
                } else {
                    MAX_CONTROL_VALUE
                };
                match self.pool.trigger(self.engine.as_ref(), &self.resolver, note, velocity) {
                    TriggerOutcome::Success | TriggerOutcome::NoAsset => {}
                    outcome @ TriggerOutcome::AllocationFailure
                    | outcome @ TriggerOutcome::StartFailure => {
                        warn!(note, velocity, ?outcome, "Trigger failed");
                    }
                }
            }
            EventKind::ControlChange { value } => {
                let volume =
                    (f32::from(value) / f32::from(MAX_CONTROL_VALUE)).clamp(0.0, 1.0);
                debug!(value, volume, "Global volume change");
                self.engine.set_global_volume(volume);
            }
            EventKind::PitchBend { value } => {
                let result = if f32::from(value) >= TRANSPORT_STOP_THRESHOLD {
                    debug!(value, "Transport stop");
                    self.engine.stop()
                } else {
                    debug!(value, "Transport start");
                    self.engine.start()
                };
                if let Err(e) = result {
                    error!(error = %e, "Unable to switch transport");
                }
            }
            EventKind::Unclassified => {
                trace!(
                    status = event.status,
                    data1 = event.data1,
                    data2 = event.data2,
                    "Ignoring event"
                );
            }
        }
    }

    /// Returns the number of currently linked voices.
    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }
}
