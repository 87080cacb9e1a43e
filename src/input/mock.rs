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

//! A mock input device. Doesn't listen to anything.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::InputError;
use crate::events::RawMessage;

/// A mock device that forwards scripted messages to the watcher.
#[derive(Clone)]
pub struct Device {
    name: String,
    sender: Arc<Mutex<Option<Sender<RawMessage>>>>,
}

impl Device {
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns whether a watcher is installed.
    pub fn is_watching(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Delivers a message as if the controller had sent it. Panics when
    /// the device is not being watched.
    pub fn mock_message(&self, raw: RawMessage) {
        let sender = self.sender.lock();
        sender
            .as_ref()
            .expect("device is not being watched")
            .send(raw)
            .expect("unable to deliver mock message");
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<RawMessage>) -> Result<(), InputError> {
        let mut slot = self.sender.lock();
        if slot.is_some() {
            return Err(InputError::AlreadyWatching);
        }
        *slot = Some(sender);
        Ok(())
    }

    fn stop_watch_events(&self) {
        // Dropping the sender disconnects the watcher's channel.
        self.sender.lock().take();
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Device as _;
    use super::*;

    #[test]
    fn test_mock_device_forwards_messages() {
        let device = Device::get("mock-pad");
        let (tx, rx) = crossbeam_channel::unbounded();

        device.watch_events(tx).unwrap();
        assert!(matches!(
            device.watch_events(crossbeam_channel::unbounded().0),
            Err(InputError::AlreadyWatching)
        ));

        let raw = RawMessage {
            timestamp: 1,
            status: 0x90,
            data1: 60,
            data2: 100,
        };
        device.mock_message(raw);
        assert_eq!(rx.recv().unwrap(), raw);

        // Stopping disconnects the watcher.
        device.stop_watch_events();
        assert!(rx.recv().is_err());
    }
}
