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

//! A MIDI-triggered sample pad player.
//!
//! Notes from a MIDI controller trigger one-shot sample playback through
//! a voice-recycling pool; a mod wheel message adjusts the global volume
//! and pitch bend acts as a transport start/stop switch.

pub mod assets;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod input;
pub mod player;
pub mod voices;
