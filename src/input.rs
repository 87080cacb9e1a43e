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

//! Controller input devices.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::events::RawMessage;

mod midir;
#[cfg(test)]
mod mock;

/// An error interacting with an input device.
#[derive(Debug, Error)]
pub enum InputError {
    /// The input backend could not be initialized.
    #[error("unable to initialize input backend: {0}")]
    Init(String),

    /// The configured device id does not exist.
    #[error("no input device with id {id}, {available} device(s) available")]
    NoSuchDevice { id: usize, available: usize },

    /// The device could not be connected.
    #[error("unable to connect to input device: {0}")]
    Connect(String),

    /// The device is already being watched.
    #[error("device is already being watched")]
    AlreadyWatching,
}

/// An input device that delivers raw controller messages.
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Watches the device and sends every incoming message to the given
    /// sender until `stop_watch_events` is called.
    fn watch_events(&self, sender: Sender<RawMessage>) -> Result<(), InputError>;

    /// Stops watching events.
    fn stop_watch_events(&self);
}

/// Lists the names of available input devices, in id order.
pub fn list_devices() -> Result<Vec<String>, InputError> {
    midir::list()
}

/// Gets the input device with the given id.
pub fn get_device(id: usize) -> Result<Arc<dyn Device>, InputError> {
    Ok(Arc::new(midir::get(id)?))
}

#[cfg(test)]
pub mod test {
    pub use super::mock::Device;
}
