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

//! Raw controller message decoding.
//!
//! Incoming messages are classified into the handful of event kinds the
//! player reacts to. The decoder is stateful: a message carrying the
//! same timestamp as its predecessor is an idle poll of an already-seen
//! message and produces no event.

/// The status byte high nibble for a Note On message.
const NOTE_ON_NIBBLE: u8 = 0x9;

/// The status byte carrying the global volume control change (channel 1).
const GLOBAL_VOLUME_STATUS: u8 = 0xB0;

/// The controller number used for global volume (mod wheel).
const GLOBAL_VOLUME_CONTROLLER: u8 = 1;

/// The status byte carrying the transport control (pitch bend, channel 1).
const TRANSPORT_STATUS: u8 = 0xE0;

/// The pitch bend neutral position. Controllers jitter around this value
/// when the wheel is released, so it never produces a transport event.
const TRANSPORT_CENTER: u8 = 64;

/// A raw, timestamped three-byte message as delivered by the input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    /// Timestamp of the message in microseconds.
    pub timestamp: u64,
    /// The status byte.
    pub status: u8,
    /// The first data byte.
    pub data1: u8,
    /// The second data byte.
    pub data2: u8,
}

impl RawMessage {
    /// Builds a raw message from a timestamp and a byte slice, taking the
    /// status byte and up to two data bytes. Returns `None` for empty
    /// messages.
    pub fn from_bytes(timestamp: u64, bytes: &[u8]) -> Option<RawMessage> {
        let status = *bytes.first()?;
        Some(RawMessage {
            timestamp,
            status,
            data1: bytes.get(1).copied().unwrap_or(0),
            data2: bytes.get(2).copied().unwrap_or(0),
        })
    }
}

/// The classification of a decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A key was struck.
    NoteOn { note: u8, velocity: u8 },
    /// The global volume control moved. Value is 0-127.
    ControlChange { value: u8 },
    /// The transport control moved. Value is 0-127, never the center.
    PitchBend { value: u8 },
    /// Anything the player does not react to.
    Unclassified,
}

/// A decoded controller event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Timestamp of the underlying message in microseconds.
    pub timestamp: u64,
    /// The raw status byte.
    pub status: u8,
    /// The channel the message arrived on (status low nibble).
    pub channel: u8,
    /// The first data byte.
    pub data1: u8,
    /// The second data byte.
    pub data2: u8,
    /// What the message means to the player.
    pub kind: EventKind,
}

/// Classifies raw messages into events, suppressing duplicate polls.
#[derive(Debug, Default)]
pub struct Decoder {
    /// The timestamp of the last message that produced an event.
    last_timestamp: Option<u64>,
}

impl Decoder {
    /// Creates a new decoder.
    pub fn new() -> Decoder {
        Decoder::default()
    }

    /// Decodes a raw message. Returns `None` when the message carries the
    /// same timestamp as the previous one, which marks an idle poll and
    /// must not re-trigger anything.
    pub fn decode(&mut self, raw: &RawMessage) -> Option<Event> {
        if self.last_timestamp == Some(raw.timestamp) {
            return None;
        }
        self.last_timestamp = Some(raw.timestamp);

        Some(Event {
            timestamp: raw.timestamp,
            status: raw.status,
            channel: raw.status & 0x0F,
            data1: raw.data1,
            data2: raw.data2,
            kind: Self::classify(raw),
        })
    }

    fn classify(raw: &RawMessage) -> EventKind {
        if raw.status >> 4 == NOTE_ON_NIBBLE {
            return EventKind::NoteOn {
                note: raw.data1,
                velocity: raw.data2,
            };
        }
        if raw.status == GLOBAL_VOLUME_STATUS && raw.data1 == GLOBAL_VOLUME_CONTROLLER {
            return EventKind::ControlChange { value: raw.data2 };
        }
        if raw.status == TRANSPORT_STATUS && raw.data1 != TRANSPORT_CENTER {
            return EventKind::PitchBend { value: raw.data1 };
        }
        EventKind::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(timestamp: u64, status: u8, data1: u8, data2: u8) -> RawMessage {
        RawMessage {
            timestamp,
            status,
            data1,
            data2,
        }
    }

    #[test]
    fn test_duplicate_timestamp_suppression() {
        let mut decoder = Decoder::new();

        assert!(decoder.decode(&raw(100, 0x90, 60, 100)).is_some());
        // Polling the same message again must not produce an event.
        assert!(decoder.decode(&raw(100, 0x90, 60, 100)).is_none());
        assert!(decoder.decode(&raw(100, 0x90, 61, 100)).is_none());
        // A new timestamp does.
        assert!(decoder.decode(&raw(101, 0x90, 60, 100)).is_some());
    }

    #[test]
    fn test_note_on_classification() {
        let mut decoder = Decoder::new();

        let event = decoder.decode(&raw(1, 0x90, 60, 100)).unwrap();
        assert_eq!(
            event.kind,
            EventKind::NoteOn {
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(event.channel, 0);

        // Note On is matched on the high nibble, any channel.
        let event = decoder.decode(&raw(2, 0x9A, 36, 127)).unwrap();
        assert_eq!(
            event.kind,
            EventKind::NoteOn {
                note: 36,
                velocity: 127
            }
        );
        assert_eq!(event.channel, 0x0A);
    }

    #[test]
    fn test_global_volume_classification() {
        let mut decoder = Decoder::new();

        let event = decoder.decode(&raw(1, 0xB0, 1, 90)).unwrap();
        assert_eq!(event.kind, EventKind::ControlChange { value: 90 });

        // Other controllers on the same status byte are ignored.
        let event = decoder.decode(&raw(2, 0xB0, 7, 90)).unwrap();
        assert_eq!(event.kind, EventKind::Unclassified);

        // Other channels are ignored.
        let event = decoder.decode(&raw(3, 0xB1, 1, 90)).unwrap();
        assert_eq!(event.kind, EventKind::Unclassified);
    }

    #[test]
    fn test_transport_classification() {
        let mut decoder = Decoder::new();

        let event = decoder.decode(&raw(1, 0xE0, 127, 0)).unwrap();
        assert_eq!(event.kind, EventKind::PitchBend { value: 127 });

        let event = decoder.decode(&raw(2, 0xE0, 0, 0)).unwrap();
        assert_eq!(event.kind, EventKind::PitchBend { value: 0 });

        // The center position is wheel jitter, not a transport command.
        let event = decoder.decode(&raw(3, 0xE0, 64, 0)).unwrap();
        assert_eq!(event.kind, EventKind::Unclassified);
    }

    #[test]
    fn test_unclassified() {
        let mut decoder = Decoder::new();

        // Note Off: key releases do not stop playback.
        let event = decoder.decode(&raw(1, 0x80, 60, 0)).unwrap();
        assert_eq!(event.kind, EventKind::Unclassified);

        // Aftertouch.
        let event = decoder.decode(&raw(2, 0xD0, 60, 0)).unwrap();
        assert_eq!(event.kind, EventKind::Unclassified);
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(
            RawMessage::from_bytes(5, &[0x90, 60, 100]),
            Some(raw(5, 0x90, 60, 100))
        );
        // Short messages pad the data bytes with zeroes.
        assert_eq!(RawMessage::from_bytes(5, &[0xF8]), Some(raw(5, 0xF8, 0, 0)));
        assert_eq!(RawMessage::from_bytes(5, &[]), None);
    }
}
