//! Avatar repository
//!
//! Owns every live avatar of one kind, indexed by protocol index. Indices
//! released by the game layer stay reserved until no observer's tracker
//! references them, so a new occupant never inherits another avatar's
//! high-resolution slot on some client.

use bitvec::prelude::*;
use tracing::{debug, trace};

use crate::game::avatar::{Avatar, AvatarKind, SpawnParams};
use crate::game::pool::{ObjectPool, PoolStats};
use crate::game::thread_guard::{ThreadGuard, ThreadSafetyMode, ThreadViolation};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("index {index} is outside 0..{capacity}")]
    IndexOutOfRange { index: u16, capacity: u16 },

    #[error("index {index} is already occupied")]
    IndexOccupied { index: u16 },

    #[error("index {index} is still referenced by an observer")]
    IndexPendingRelease { index: u16 },

    #[error("no avatar at index {index}")]
    NotAllocated { index: u16 },

    #[error("no free index")]
    Exhausted,

    #[error("spawn kind {requested:?} does not match repository kind {expected:?}")]
    KindMismatch {
        requested: AvatarKind,
        expected: AvatarKind,
    },

    #[error(transparent)]
    Thread(#[from] ThreadViolation),
}

/// Work done by [`AvatarRepository::finish_tick`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinishStats {
    /// Dirty avatars no observer scheduled a read for
    pub cleared_unread: usize,
    /// Indices freed for reuse
    pub released: usize,
}

pub struct AvatarRepository {
    kind: AvatarKind,
    capacity: u16,
    slots: Vec<Option<Box<Avatar>>>,
    /// Released indices some tracker may still reference
    pending: BitVec,
    pending_list: Vec<u16>,
    pool: ObjectPool<Avatar>,
    next_generation: u32,
    tick: u32,
    live: usize,
    guard: ThreadGuard,
}

impl AvatarRepository {
    /// Repository for indices `0..capacity`, owned by the calling thread
    pub fn new(kind: AvatarKind, capacity: u16, pool_capacity: usize, mode: ThreadSafetyMode) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || None);
        Self {
            kind,
            capacity,
            slots,
            pending: bitvec![0; capacity as usize],
            pending_list: Vec::new(),
            pool: ObjectPool::new(pool_capacity),
            next_generation: 1,
            tick: 0,
            live: 0,
            guard: ThreadGuard::new(mode),
        }
    }

    pub fn kind(&self) -> AvatarKind {
        self.kind
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Current tick number
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn thread_guard(&self) -> &ThreadGuard {
        &self.guard
    }

    /// Make the calling thread the communication thread
    pub fn bind_current_thread(&mut self) {
        self.guard.bind_current();
    }

    pub fn set_thread_safety_mode(&mut self, mode: ThreadSafetyMode) {
        self.guard.set_mode(mode);
    }

    fn check_index(&self, index: u16) -> Result<(), RepositoryError> {
        if index >= self.capacity {
            return Err(RepositoryError::IndexOutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Place an avatar at `index`
    pub fn allocate(&mut self, index: u16, params: SpawnParams) -> Result<&mut Avatar, RepositoryError> {
        self.guard.check("allocate")?;
        self.check_index(index)?;
        if params.kind != self.kind {
            return Err(RepositoryError::KindMismatch {
                requested: params.kind,
                expected: self.kind,
            });
        }
        if self.slots[index as usize].is_some() {
            return Err(RepositoryError::IndexOccupied { index });
        }
        if self.pending[index as usize] {
            return Err(RepositoryError::IndexPendingRelease { index });
        }

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let params = SpawnParams {
            generation,
            allocation_tick: self.tick,
            ..params
        };

        let avatar = self.pool.acquire(index, &params);
        self.live += 1;
        trace!(index, generation, tick = self.tick, "avatar allocated");
        Ok(&mut **self.slots[index as usize].insert(avatar))
    }

    /// Place an avatar at the lowest free index
    pub fn allocate_next(&mut self, params: SpawnParams) -> Result<u16, RepositoryError> {
        let index = (0..self.capacity)
            .find(|&i| self.slots[i as usize].is_none() && !self.pending[i as usize])
            .ok_or(RepositoryError::Exhausted)?;
        self.allocate(index, params)?;
        Ok(index)
    }

    /// Remove the avatar at `index`. The index becomes reusable once no
    /// tracker references it.
    pub fn release(&mut self, index: u16) -> Result<(), RepositoryError> {
        self.guard.check("release")?;
        self.check_index(index)?;
        let avatar = self.slots[index as usize]
            .take()
            .ok_or(RepositoryError::NotAllocated { index })?;
        self.pool.release(index, avatar);
        self.pending.set(index as usize, true);
        self.pending_list.push(index);
        self.live -= 1;
        trace!(index, "avatar released");
        Ok(())
    }

    /// Released but not yet reusable
    pub fn is_pending_release(&self, index: u16) -> bool {
        self.pending.get(index as usize).is_some_and(|b| *b)
    }

    // ========================================================================
    // Access
    // ========================================================================

    pub fn get(&self, index: u16) -> Option<&Avatar> {
        self.slots.get(index as usize)?.as_deref()
    }

    /// Mutable access for game systems; checked against the owning thread
    pub fn get_mut(&mut self, index: u16) -> Result<&mut Avatar, RepositoryError> {
        self.guard.check("get_mut")?;
        self.check_index(index)?;
        self.slots[index as usize]
            .as_deref_mut()
            .ok_or(RepositoryError::NotAllocated { index })
    }

    /// Live avatars in ascending index order
    pub fn iter(&self) -> impl Iterator<Item = &Avatar> {
        self.slots.iter().filter_map(|slot| slot.as_deref())
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Option<Box<Avatar>>] {
        &mut self.slots
    }

    // ========================================================================
    // Tick end
    // ========================================================================

    /// Clear unread dirty blocks, roll coordinates forward, free released
    /// indices nobody references, and advance the tick.
    pub(crate) fn finish_tick(&mut self, is_referenced: impl Fn(u16) -> bool) -> FinishStats {
        let mut stats = FinishStats::default();
        for avatar in self.slots.iter_mut().flatten() {
            if avatar.clear_if_unread() {
                stats.cleared_unread += 1;
            }
            avatar.end_tick();
        }

        let pending = &mut self.pending;
        self.pending_list.retain(|&index| {
            if is_referenced(index) {
                return true;
            }
            pending.set(index as usize, false);
            stats.released += 1;
            false
        });

        if stats.released > 0 {
            debug!(released = stats.released, tick = self.tick, "indices freed");
        }
        self.tick = self.tick.wrapping_add(1);
        stats
    }
}
