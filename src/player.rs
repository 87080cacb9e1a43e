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

//! The trigger player, wiring input, dispatch, and the render engine
//! together.

use std::error::Error;
use std::sync::Arc;

use tracing::info;

use crate::assets::AssetResolver;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::engine::{self, RenderEngine};
use crate::input;
use crate::voices::VoicePool;

/// A trigger player.
pub struct Player {
    engine: Arc<dyn RenderEngine>,
    device: Arc<dyn input::Device>,
    dispatcher: Dispatcher,
}

impl Player {
    /// Creates a player from the given configuration, opening the
    /// default audio output and the configured input device. All mapped
    /// samples are preloaded before the player starts listening.
    pub fn new(config: &Config) -> Result<Player, Box<dyn Error>> {
        let engine = engine::cpal::Engine::new()?;
        let resolver = AssetResolver::from_config(config)?;
        let loaded = engine.preload(resolver.paths());
        info!(
            device = engine.device_name(),
            loaded,
            mapped = resolver.len(),
            "Samples preloaded"
        );

        let device = input::get_device(config.input_device_id())?;
        Ok(Player::assemble(config, Arc::new(engine), device, resolver))
    }

    fn assemble(
        config: &Config,
        engine: Arc<dyn RenderEngine>,
        device: Arc<dyn input::Device>,
        resolver: AssetResolver,
    ) -> Player {
        engine.set_global_volume(config.global_volume());
        let pool = VoicePool::new(config.max_voices(), config.overflow());
        let dispatcher =
            Dispatcher::new(engine.clone(), pool, resolver, config.adaptive_volume());
        Player {
            engine,
            device,
            dispatcher,
        }
    }

    /// Runs the player until the input device stops delivering events.
    /// Messages are dispatched in arrival order on the calling thread.
    pub fn run(&mut self) -> Result<(), Box<dyn Error>> {
        let (message_tx, message_rx) = crossbeam_channel::unbounded();
        self.device.watch_events(message_tx)?;
        info!(device = self.device.name(), "Listening for triggers");

        self.dispatcher.run(message_rx);

        self.device.stop_watch_events();
        self.engine.stop()?;
        info!("Player stopped");
        Ok(())
    }

    /// Returns the number of currently linked voices.
    pub fn active_voices(&self) -> usize {
        self.dispatcher.active_voices()
    }
}
