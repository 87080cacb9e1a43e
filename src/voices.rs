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

//! The voice pool.
//!
//! Voices live in an arena of slots threaded onto an intrusive,
//! most-recently-triggered-first doubly-linked list. Triggering scans
//! the list for the first voice whose source has drained and recycles
//! its slot instead of allocating; in the steady state a stream of
//! triggers allocates nothing.
//!
//! The pool lock guards only list splicing and slot bookkeeping. The
//! render context never touches the list; it communicates solely by
//! storing each voice's completion flag, which the scan reads with
//! acquire ordering. Recycling is trigger-driven: a finished voice
//! keeps its slot and source until a later trigger happens to scan past
//! it.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::assets::AssetResolver;
use crate::config::OverflowPolicy;
use crate::engine::{LoadMode, RenderEngine, SourceHandle, MIX_BUS};

/// Velocity-to-volume divisor. Deliberately larger than the maximum
/// velocity so a full-strength hit lands below unity, leaving headroom
/// when voices overlap.
const VELOCITY_DIVISOR: f32 = 150.0;

/// The maximum trigger velocity; larger inputs clamp to this.
const MAX_VELOCITY: u8 = 127;

/// The result of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A voice is sounding.
    Success,
    /// The note has no sample mapped; nothing changed.
    NoAsset,
    /// No voice slot could be obtained.
    AllocationFailure,
    /// The source could not be initialized or started. A voice that got
    /// as far as being linked is already marked recyclable.
    StartFailure,
}

/// One playback slot, exclusively owned by the pool while linked. The
/// engine holds only the shared completion flag inside the handle.
struct Voice {
    handle: SourceHandle,
    volume: f32,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena and list state, guarded by the pool lock.
struct PoolState {
    slots: Vec<Option<Voice>>,
    free: Vec<usize>,
    /// Most recently triggered voice.
    head: Option<usize>,
    /// Least recently triggered voice, the eviction candidate.
    tail: Option<usize>,
}

impl PoolState {
    /// Returns the first linked voice whose source has drained,
    /// scanning most-recent-first. List order carries no playback
    /// meaning; it is only the scan order.
    fn find_finished(&self) -> Option<usize> {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let voice = self.slots[idx].as_ref()?;
            if voice.handle.is_finished() {
                return Some(idx);
            }
            cursor = voice.next;
        }
        None
    }

    /// Unlinks the voice at `idx` in O(1), fixing neighbor links.
    fn unlink(&mut self, idx: usize) -> Option<Voice> {
        let voice = self.slots[idx].take()?;
        match voice.prev {
            Some(prev) => {
                if let Some(p) = self.slots[prev].as_mut() {
                    p.next = voice.next;
                }
            }
            None => self.head = voice.next,
        }
        match voice.next {
            Some(next) => {
                if let Some(n) = self.slots[next].as_mut() {
                    n.prev = voice.prev;
                }
            }
            None => self.tail = voice.prev,
        }
        Some(voice)
    }

    /// Links a voice into the slot at `idx`, at the head of the list.
    fn link_at_head(&mut self, idx: usize, mut voice: Voice) {
        voice.prev = None;
        voice.next = self.head;
        if let Some(old_head) = self.head {
            if let Some(o) = self.slots[old_head].as_mut() {
                o.prev = Some(idx);
            }
        } else {
            self.tail = Some(idx);
        }
        self.head = Some(idx);
        self.slots[idx] = Some(voice);
    }

    /// Takes a free slot, growing the arena when none is available.
    fn acquire_slot(&mut self) -> usize {
        match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        }
    }
}

/// A recyclable pool of playback voices.
pub struct VoicePool {
    state: Mutex<PoolState>,
    /// Number of linked voices. Kept equal to the list length at all
    /// times; readable without the lock.
    active: AtomicUsize,
    max_voices: usize,
    overflow: OverflowPolicy,
}

impl VoicePool {
    /// Creates a pool holding at most `max_voices` concurrent voices,
    /// applying `overflow` when a trigger arrives at capacity.
    pub fn new(max_voices: u32, overflow: OverflowPolicy) -> VoicePool {
        VoicePool {
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                free: Vec::new(),
                head: None,
                tail: None,
            }),
            active: AtomicUsize::new(0),
            max_voices: max_voices as usize,
            overflow,
        }
    }

    /// Triggers the sample mapped to `note` at the given velocity.
    ///
    /// The critical section covers only slot recycling and list
    /// splicing; every engine call made inside it is non-blocking, and
    /// playback is started after the lock is released.
    pub fn trigger(
        &self,
        engine: &dyn RenderEngine,
        resolver: &AssetResolver,
        note: u8,
        velocity: u8,
    ) -> TriggerOutcome {
        // Resolution happens before the lock; an unmapped note changes
        // no state at all.
        let Some(path) = resolver.resolve(note) else {
            debug!(note, "No sample mapped");
            return TriggerOutcome::NoAsset;
        };

        let mut state = self.state.lock();

        let slot = match state.find_finished() {
            Some(idx) => {
                // Recycle: unlink, retire the drained source, reuse the
                // slot memory.
                if let Some(voice) = state.unlink(idx) {
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    debug!(
                        source = voice.handle.id(),
                        volume = voice.volume,
                        "Recycling finished voice"
                    );
                    engine.release_source(&voice.handle);
                }
                idx
            }
            None => {
                if self.active.load(Ordering::SeqCst) >= self.max_voices {
                    match self.overflow {
                        OverflowPolicy::RejectNew => {
                            drop(state);
                            warn!(note, max_voices = self.max_voices, "Voice pool full");
                            return TriggerOutcome::AllocationFailure;
                        }
                        OverflowPolicy::EvictOldest => {
                            let Some(oldest) = state.tail else {
                                drop(state);
                                warn!(note, "Voice pool has no capacity");
                                return TriggerOutcome::AllocationFailure;
                            };
                            match state.unlink(oldest) {
                                Some(voice) => {
                                    self.active.fetch_sub(1, Ordering::SeqCst);
                                    warn!(
                                        source = voice.handle.id(),
                                        max_voices = self.max_voices,
                                        "Voice pool full, evicting oldest voice"
                                    );
                                    engine.release_source(&voice.handle);
                                    oldest
                                }
                                None => {
                                    drop(state);
                                    return TriggerOutcome::AllocationFailure;
                                }
                            }
                        }
                    }
                } else {
                    state.acquire_slot()
                }
            }
        };

        // (Re)initialize the source. The engine contract keeps this
        // non-blocking: a cached sample is shared as-is and anything
        // else decodes on the loader thread.
        let handle = match engine.init_source(path, LoadMode::Async) {
            Ok(handle) => handle,
            Err(e) => {
                state.free.push(slot);
                drop(state);
                warn!(note, error = %e, "Unable to initialize source");
                return TriggerOutcome::StartFailure;
            }
        };
        if let Err(e) = engine.attach(&handle, MIX_BUS) {
            engine.release_source(&handle);
            state.free.push(slot);
            drop(state);
            warn!(note, error = %e, "Unable to attach source");
            return TriggerOutcome::StartFailure;
        }

        let volume = Self::volume_for_velocity(velocity);
        engine.set_volume(&handle, volume);

        state.link_at_head(
            slot,
            Voice {
                handle: handle.clone(),
                volume,
                prev: None,
                next: None,
            },
        );
        self.active.fetch_add(1, Ordering::SeqCst);
        drop(state);

        // Start outside the lock. On failure the voice stays linked but
        // is immediately recyclable by the next trigger's scan.
        if let Err(e) = engine.start_source(&handle) {
            handle.mark_finished();
            warn!(note, error = %e, "Unable to start source");
            return TriggerOutcome::StartFailure;
        }

        debug!(note, velocity, volume, source = handle.id(), "Voice triggered");
        TriggerOutcome::Success
    }

    /// Returns the number of linked voices.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the number of allocated voice slots, linked or free.
    pub fn slot_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Maps trigger velocity to voice volume: velocity / 150, so the
    /// full 0-127 range stays below unity. Out-of-range inputs clamp to
    /// 127 rather than being rejected; a glitching controller should
    /// still make a sound.
    fn volume_for_velocity(velocity: u8) -> f32 {
        f32::from(velocity.min(MAX_VELOCITY)) / VELOCITY_DIVISOR
    }
}

impl std::fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePool")
            .field("active", &self.active_count())
            .field("slots", &self.slot_count())
            .field("max_voices", &self.max_voices)
            .field("overflow", &self.overflow)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::engine::mock;

    fn resolver(notes: &[(u8, &str)]) -> AssetResolver {
        AssetResolver::from_table(
            notes
                .iter()
                .map(|(note, file)| (*note, PathBuf::from(file)))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn pool(max_voices: u32, overflow: OverflowPolicy) -> VoicePool {
        VoicePool::new(max_voices, overflow)
    }

    #[test]
    fn test_volume_for_velocity() {
        assert_eq!(VoicePool::volume_for_velocity(0), 0.0);
        assert_eq!(VoicePool::volume_for_velocity(127), 127.0 / 150.0);
        assert_eq!(VoicePool::volume_for_velocity(75), 0.5);
        // Monotonic over the whole input range.
        for velocity in 1..=127u8 {
            assert!(
                VoicePool::volume_for_velocity(velocity)
                    > VoicePool::volume_for_velocity(velocity - 1)
            );
        }
        // Out-of-range input clamps to the maximum.
        assert_eq!(
            VoicePool::volume_for_velocity(200),
            VoicePool::volume_for_velocity(127)
        );
    }

    #[test]
    fn test_unmapped_note_changes_nothing() {
        let engine = mock::Engine::new();
        let pool = pool(32, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);

        assert_eq!(
            pool.trigger(&engine, &resolver, 61, 100),
            TriggerOutcome::NoAsset
        );
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.slot_count(), 0);
        assert_eq!(engine.live_sources(), 0);
    }

    #[test]
    fn test_trigger_recycle_scenario() {
        let engine = mock::Engine::new();
        let pool = pool(32, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);

        // First hit: one voice at velocity 100.
        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 100),
            TriggerOutcome::Success
        );
        assert_eq!(pool.active_count(), 1);
        let first = engine.source(1).unwrap();
        assert!((first.volume - 100.0 / 150.0).abs() < f32::EPSILON);
        assert!(first.attached);
        assert!(first.started);

        // Second hit before the first finishes: two distinct voices.
        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 50),
            TriggerOutcome::Success
        );
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.slot_count(), 2);

        // The render context drains the first voice; the next trigger
        // recycles its slot instead of allocating.
        engine.finish(&first.handle);
        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 75),
            TriggerOutcome::Success
        );
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.slot_count(), 2);
        assert_eq!(engine.released(), vec![first.handle.id()]);
    }

    #[test]
    fn test_finished_voice_is_reused_before_allocating() {
        let engine = mock::Engine::new();
        let pool = pool(32, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);

        for _ in 0..4 {
            assert_eq!(
                pool.trigger(&engine, &resolver, 60, 100),
                TriggerOutcome::Success
            );
        }
        assert_eq!(pool.slot_count(), 4);

        // Finish one voice in the middle of the list; a long run of
        // further triggers keeps reusing drained slots and the arena
        // never grows.
        for id in [2u64, 3, 1, 4] {
            engine.finish(&engine.source(id).unwrap().handle);
            assert_eq!(
                pool.trigger(&engine, &resolver, 60, 100),
                TriggerOutcome::Success
            );
            assert_eq!(pool.active_count(), 4);
            assert_eq!(pool.slot_count(), 4);
        }
    }

    #[test]
    fn test_active_count_never_exceeds_triggers() {
        let engine = mock::Engine::new();
        let pool = pool(256, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);

        for triggers in 1..=20 {
            pool.trigger(&engine, &resolver, 60, 100);
            assert!(pool.active_count() <= triggers);
        }
    }

    #[test]
    fn test_start_failure_marks_voice_recyclable() {
        let engine = mock::Engine::new();
        let pool = pool(32, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);
        engine.fail_start_for(&PathBuf::from("kick.wav"));

        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 100),
            TriggerOutcome::StartFailure
        );
        // The voice is linked but already recyclable.
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.slot_count(), 1);

        // The next trigger reuses the failed slot rather than growing.
        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 100),
            TriggerOutcome::StartFailure
        );
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.slot_count(), 1);
        assert_eq!(engine.released(), vec![1]);
    }

    #[test]
    fn test_init_failure_frees_slot() {
        let engine = mock::Engine::new();
        let pool = pool(32, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);
        engine.fail_init_for(&PathBuf::from("kick.wav"));

        for _ in 0..3 {
            assert_eq!(
                pool.trigger(&engine, &resolver, 60, 100),
                TriggerOutcome::StartFailure
            );
        }
        assert_eq!(pool.active_count(), 0);
        // The slot goes back on the free list each time.
        assert_eq!(pool.slot_count(), 1);
        assert_eq!(engine.live_sources(), 0);
    }

    #[test]
    fn test_reject_new_at_capacity() {
        let engine = mock::Engine::new();
        let pool = pool(2, OverflowPolicy::RejectNew);
        let resolver = resolver(&[(60, "kick.wav")]);

        pool.trigger(&engine, &resolver, 60, 100);
        pool.trigger(&engine, &resolver, 60, 100);
        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 100),
            TriggerOutcome::AllocationFailure
        );
        assert_eq!(pool.active_count(), 2);
        assert_eq!(engine.live_sources(), 2);

        // Capacity pressure clears once a voice drains.
        engine.finish(&engine.source(1).unwrap().handle);
        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 100),
            TriggerOutcome::Success
        );
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn test_evict_oldest_at_capacity() {
        let engine = mock::Engine::new();
        let pool = pool(2, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);

        pool.trigger(&engine, &resolver, 60, 100);
        pool.trigger(&engine, &resolver, 60, 100);
        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 100),
            TriggerOutcome::Success
        );
        assert_eq!(pool.active_count(), 2);
        // The least recently triggered voice was cut.
        assert_eq!(engine.released(), vec![1]);
        assert_eq!(pool.slot_count(), 2);
    }

    #[test]
    fn test_zero_capacity_pool() {
        let engine = mock::Engine::new();
        let pool = pool(0, OverflowPolicy::EvictOldest);
        let resolver = resolver(&[(60, "kick.wav")]);

        assert_eq!(
            pool.trigger(&engine, &resolver, 60, 100),
            TriggerOutcome::AllocationFailure
        );
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_concurrent_triggers() {
        let engine = Arc::new(mock::Engine::new());
        let pool = Arc::new(pool(256, OverflowPolicy::EvictOldest));
        let resolver = Arc::new(resolver(&[(60, "kick.wav"), (61, "snare.wav")]));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = engine.clone();
                let pool = pool.clone();
                let resolver = resolver.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let note = if i % 2 == 0 { 60 } else { 61 };
                        assert_eq!(
                            pool.trigger(engine.as_ref(), &resolver, note, 100),
                            TriggerOutcome::Success
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.active_count(), 100);
        assert_eq!(engine.live_sources(), 100);
        assert_eq!(pool.slot_count(), 100);
    }
}
