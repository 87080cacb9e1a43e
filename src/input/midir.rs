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

//! midir-backed input device.

use std::{fmt, mem};

use midir::{MidiInput, MidiInputConnection};
use parking_lot::Mutex;
use tracing::{error, info};

use super::InputError;
use crate::events::RawMessage;

pub struct Device {
    name: String,
    /// Index of the input port, which doubles as the device id.
    port_index: usize,
    connection: Mutex<Option<MidiInputConnection<()>>>,
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(
        &self,
        sender: crossbeam_channel::Sender<RawMessage>,
    ) -> Result<(), InputError> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(InputError::AlreadyWatching);
        }

        let input = new_input()?;
        let ports = input.ports();
        let port = ports
            .get(self.port_index)
            .ok_or(InputError::NoSuchDevice {
                id: self.port_index,
                available: ports.len(),
            })?;

        info!(device = self.name, "Watching controller events");

        *connection = Some(
            input
                .connect(
                    port,
                    "mpad input watcher",
                    move |timestamp, bytes, _| {
                        // Timestamps arrive in microseconds.
                        let Some(raw) = RawMessage::from_bytes(timestamp, bytes) else {
                            return;
                        };
                        if let Err(e) = sender.send(raw) {
                            error!(error = %e, "Unable to deliver controller message");
                        }
                    },
                    (),
                )
                .map_err(|e| InputError::Connect(e.to_string()))?,
        );

        Ok(())
    }

    fn stop_watch_events(&self) {
        // Dropping the connection closes the port and stops the callback.
        let connection = self.connection.lock().take();
        mem::drop(connection);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.port_index, self.name)
    }
}

fn new_input() -> Result<MidiInput, InputError> {
    MidiInput::new("mpad input").map_err(|e| InputError::Init(e.to_string()))
}

/// Lists input port names, in port order.
pub fn list() -> Result<Vec<String>, InputError> {
    let input = new_input()?;
    input
        .ports()
        .iter()
        .map(|port| {
            input
                .port_name(port)
                .map_err(|e| InputError::Init(e.to_string()))
        })
        .collect()
}

/// Gets the device on the input port with the given index.
pub fn get(id: usize) -> Result<Device, InputError> {
    let input = new_input()?;
    let ports = input.ports();
    let port = ports.get(id).ok_or(InputError::NoSuchDevice {
        id,
        available: ports.len(),
    })?;
    let name = input
        .port_name(port)
        .map_err(|e| InputError::Init(e.to_string()))?;

    Ok(Device {
        name,
        port_index: id,
        connection: Mutex::new(None),
    })
}
