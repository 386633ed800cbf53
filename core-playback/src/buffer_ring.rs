//! # Buffer Ring
//!
//! Fixed pool of [`OutputBuffer`]s shared between the fill stage and the
//! voice. Buffers are allocated once and then cycle through
//!
//! ```text
//! Free --acquire_free--> Queued --mark_in_flight--> InFlight
//!  ^                       |                            |
//!  |                    reclaim                  mark_processed
//!  |                       v                            v
//!  +---------------------Free <------release------- Processed
//! ```
//!
//! Ownership moves with the state: the ring holds Free and Processed
//! buffers, the fill stage holds Queued ones, the voice holds InFlight ones.
//! A buffer is never copied, so it can never be queued twice.

use crate::error::{PlaybackError, Result};
use bridge_traits::{BufferId, OutputBuffer};
use std::collections::VecDeque;
use tracing::trace;

/// Lifecycle state of one ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    /// Acquired for filling, not yet accepted by the voice.
    Queued,
    /// Owned by the voice.
    InFlight,
    /// Played and returned, waiting for `release`.
    Processed,
}

impl BufferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferState::Free => "free",
            BufferState::Queued => "queued",
            BufferState::InFlight => "in_flight",
            BufferState::Processed => "processed",
        }
    }
}

#[derive(Debug)]
struct Slot {
    state: BufferState,
    /// Present while the ring owns the buffer.
    buffer: Option<OutputBuffer>,
}

/// Fixed-capacity pool of output buffers.
#[derive(Debug)]
pub struct BufferRing {
    slots: Vec<Slot>,
    free: VecDeque<usize>,
    buffer_bytes: usize,
}

impl BufferRing {
    /// Allocate `capacity` buffers of `buffer_bytes` bytes each.
    pub fn new(capacity: usize, buffer_bytes: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                state: BufferState::Free,
                buffer: Some(OutputBuffer::new(BufferId::new(i as u32), buffer_bytes)),
            })
            .collect();
        Self {
            slots,
            free: (0..capacity).collect(),
            buffer_bytes,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_bytes
    }

    /// Take a Free buffer for filling; it becomes Queued.
    pub fn acquire_free(&mut self) -> Option<OutputBuffer> {
        let index = self.free.pop_front()?;
        let slot = &mut self.slots[index];
        slot.state = BufferState::Queued;
        let buffer = slot.buffer.take();
        trace!(id = index, "Buffer acquired");
        buffer
    }

    /// Record that the voice accepted a Queued buffer.
    pub fn mark_in_flight(&mut self, id: BufferId) -> Result<()> {
        self.transition(id, BufferState::Queued, BufferState::InFlight)?;
        Ok(())
    }

    /// Take back a Queued buffer that never reached the voice.
    pub fn reclaim(&mut self, mut buffer: OutputBuffer) -> Result<()> {
        let index = self.transition(buffer.id(), BufferState::Queued, BufferState::Free)?;
        buffer.clear();
        self.slots[index].buffer = Some(buffer);
        self.free.push_back(index);
        Ok(())
    }

    /// Take back a buffer the voice finished playing.
    pub fn mark_processed(&mut self, buffer: OutputBuffer) -> Result<()> {
        let index = self.transition(buffer.id(), BufferState::InFlight, BufferState::Processed)?;
        self.slots[index].buffer = Some(buffer);
        Ok(())
    }

    /// Make a Processed buffer available for reuse.
    pub fn release(&mut self, id: BufferId) -> Result<()> {
        let index = self.transition(id, BufferState::Processed, BufferState::Free)?;
        if let Some(buffer) = self.slots[index].buffer.as_mut() {
            buffer.clear();
        }
        self.free.push_back(index);
        trace!(%id, "Buffer released");
        Ok(())
    }

    /// Buffers out of the ring's hands: Queued plus InFlight.
    pub fn queued_count(&self) -> usize {
        self.count(BufferState::Queued) + self.count(BufferState::InFlight)
    }

    /// Buffers owned by the voice.
    pub fn in_flight_count(&self) -> usize {
        self.count(BufferState::InFlight)
    }

    pub fn processed_count(&self) -> usize {
        self.count(BufferState::Processed)
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// `true` when every buffer is Free.
    pub fn all_free(&self) -> bool {
        self.free.len() == self.slots.len()
    }

    pub fn state_of(&self, id: BufferId) -> Option<BufferState> {
        self.slots.get(id.index()).map(|slot| slot.state)
    }

    fn count(&self, state: BufferState) -> usize {
        self.slots.iter().filter(|slot| slot.state == state).count()
    }

    fn transition(&mut self, id: BufferId, from: BufferState, to: BufferState) -> Result<usize> {
        let index = id.index();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PlaybackError::InvalidBufferTransition {
                id,
                from: "unknown",
                to: to.as_str(),
            })?;
        if slot.state != from {
            return Err(PlaybackError::InvalidBufferTransition {
                id,
                from: slot.state.as_str(),
                to: to.as_str(),
            });
        }
        slot.state = to;
        Ok(index)
    }
}
