//! Per-observer resolution tracking
//!
//! Every observer holds a [`ResolutionTracker`] recording which avatars its
//! client currently renders in high resolution. Each tick the tracker plans
//! the transitions (keep, remove, add) against the avatars in range, and
//! commits the plan only after the observer's packet was built.

use bitvec::prelude::*;
use tracing::trace;

use crate::game::repository::AvatarRepository;
use crate::info::ObserverId;

use super::error::BroadcastError;
use super::profile::ProtocolProfile;

/// Resolution tier of an avatar from one observer's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// In the observer's high-resolution set
    High,
    /// Exists but is not rendered by the observer
    Low,
    /// No avatar at the index
    Absent,
}

/// Extended-info reads planned for one entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PlannedRead {
    /// Counted read of the avatar's dirty blocks
    pub scheduled: bool,
    /// Present persistent blocks are included
    pub persistent: bool,
    /// The avatar's blocks failed to precompute this tick
    pub blocked: bool,
    /// Last revision the observer received; dirty blocks mutated after it
    /// make up the counted read
    pub seen: u32,
    /// Avatar revision at planning time
    pub revision: u32,
}

impl PlannedRead {
    pub fn wants_info(&self) -> bool {
        self.scheduled || self.persistent || self.blocked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlannedUpdate {
    Keep { index: u16, read: PlannedRead },
    Remove { index: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlannedAdd {
    pub index: u16,
    pub generation: u32,
    pub read: PlannedRead,
}

/// Transitions for one observer and tick
#[derive(Debug, Default)]
pub(crate) struct TickPlan {
    pub updates: Vec<PlannedUpdate>,
    pub adds: Vec<PlannedAdd>,
}

impl TickPlan {
    pub fn clear(&mut self) {
        self.updates.clear();
        self.adds.clear();
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.adds.len()
    }

    /// Every planned read that holds a reader count
    pub fn scheduled_reads(&self) -> impl Iterator<Item = u16> + '_ {
        let updates = self.updates.iter().filter_map(|u| match u {
            PlannedUpdate::Keep { index, read } if read.scheduled => Some(*index),
            _ => None,
        });
        let adds = self
            .adds
            .iter()
            .filter(|a| a.read.scheduled)
            .map(|a| a.index);
        updates.chain(adds)
    }
}

/// What happened to an entry's extended info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InfoOutcome {
    /// Nothing was requested
    NotRequested,
    /// Written, or requested but nothing was visible to this observer
    Delivered,
    /// Refused by the admission filter, or failed to encode
    Withheld,
}

pub struct ResolutionTracker {
    profile: ProtocolProfile,
    high_res: BitVec,
    list: Vec<u16>,
    generations: Vec<u32>,
    seen_revisions: Vec<u32>,
    needs_persistent: BitVec,
    next_list: Vec<u16>,
}

impl ResolutionTracker {
    pub fn new(profile: ProtocolProfile) -> Self {
        let capacity = profile.index_capacity() as usize;
        Self {
            profile,
            high_res: bitvec![0; capacity],
            list: Vec::new(),
            generations: vec![0; capacity],
            seen_revisions: vec![0; capacity],
            needs_persistent: bitvec![0; capacity],
            next_list: Vec::new(),
        }
    }

    #[inline]
    pub fn contains(&self, index: u16) -> bool {
        self.high_res.get(index as usize).is_some_and(|b| *b)
    }

    /// High-resolution indices in ascending order
    pub fn high_res(&self) -> &[u16] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn tier(&self, index: u16, repository: &AvatarRepository) -> Tier {
        if self.contains(index) {
            Tier::High
        } else if repository.get(index).is_some() {
            Tier::Low
        } else {
            Tier::Absent
        }
    }

    /// Plan this tick's transitions against `candidates`, the sorted and
    /// deduplicated indices of live avatars in range (excluding the
    /// observer's own avatar).
    pub(crate) fn plan(
        &self,
        observer: ObserverId,
        candidates: &[u16],
        repository: &AvatarRepository,
        plan: &mut TickPlan,
    ) -> Result<(), BroadcastError> {
        plan.clear();
        let mut kept = 0usize;

        for &index in &self.list {
            let Some(avatar) = repository.get(index) else {
                plan.updates.push(PlannedUpdate::Remove { index });
                continue;
            };
            if avatar.record().generation() != self.generations[index as usize] {
                return Err(BroadcastError::ProtocolViolation {
                    observer,
                    avatar: Some(index),
                    reason: format!(
                        "tracked generation {} but index now holds generation {}",
                        self.generations[index as usize],
                        avatar.record().generation()
                    ),
                });
            }
            if candidates.binary_search(&index).is_err() {
                plan.updates.push(PlannedUpdate::Remove { index });
                continue;
            }

            let info = avatar.info();
            let poisoned = avatar.is_poisoned();
            let revision = info.revision();
            let needs_persistent = self.needs_persistent[index as usize];
            let seen = self.seen_revisions[index as usize];
            let unseen = info.is_dirty_since(seen);
            let read = PlannedRead {
                scheduled: unseen && !poisoned,
                persistent: needs_persistent && !poisoned,
                blocked: poisoned && (unseen || needs_persistent),
                seen,
                revision,
            };
            plan.updates.push(PlannedUpdate::Keep { index, read });
            kept += 1;
        }

        let mut room = self.profile.max_high_res.saturating_sub(kept);
        for &index in candidates {
            if room == 0 {
                trace!(observer = observer.0, "high-resolution set full, adds deferred");
                break;
            }
            if self.contains(index) {
                continue;
            }
            let Some(avatar) = repository.get(index) else {
                continue;
            };
            let info = avatar.info();
            let poisoned = avatar.is_poisoned();
            let read = PlannedRead {
                scheduled: info.is_dirty() && !poisoned,
                persistent: !poisoned,
                blocked: poisoned,
                seen: 0,
                revision: info.revision(),
            };
            plan.adds.push(PlannedAdd {
                index,
                generation: avatar.record().generation(),
                read,
            });
            room -= 1;
        }
        Ok(())
    }

    /// Apply a plan whose packet was delivered. `outcomes` holds one entry
    /// per update followed by one per add, in plan order.
    pub(crate) fn commit(&mut self, plan: &TickPlan, outcomes: &[InfoOutcome]) {
        debug_assert_eq!(outcomes.len(), plan.len());
        let (update_outcomes, add_outcomes) = outcomes.split_at(plan.updates.len());

        self.next_list.clear();
        let mut adds = plan.adds.iter().zip(add_outcomes).peekable();

        for (update, outcome) in plan.updates.iter().zip(update_outcomes) {
            match *update {
                PlannedUpdate::Remove { index } => {
                    self.high_res.set(index as usize, false);
                    self.needs_persistent.set(index as usize, false);
                    trace!(index, "high -> low");
                }
                PlannedUpdate::Keep { index, read } => {
                    while let Some((add, add_outcome)) = adds.next_if(|(a, _)| a.index < index) {
                        self.apply_add(add, *add_outcome);
                    }
                    if *outcome == InfoOutcome::Delivered {
                        if read.scheduled {
                            self.seen_revisions[index as usize] = read.revision;
                        }
                        if read.persistent {
                            self.needs_persistent.set(index as usize, false);
                        }
                    }
                    self.next_list.push(index);
                }
            }
        }
        for (add, add_outcome) in adds {
            self.apply_add(add, *add_outcome);
        }

        std::mem::swap(&mut self.list, &mut self.next_list);
    }

    fn apply_add(&mut self, add: &PlannedAdd, outcome: InfoOutcome) {
        let slot = add.index as usize;
        self.high_res.set(slot, true);
        self.generations[slot] = add.generation;
        match outcome {
            InfoOutcome::Delivered | InfoOutcome::NotRequested => {
                self.seen_revisions[slot] = add.read.revision;
                self.needs_persistent.set(slot, false);
            }
            InfoOutcome::Withheld => {
                // Nothing received yet: every still-dirty block is re-read.
                self.seen_revisions[slot] = 0;
                self.needs_persistent.set(slot, true);
            }
        }
        self.next_list.push(add.index);
        trace!(index = add.index, "low -> high");
    }

    /// Forget everything, as after a client reconnect
    pub fn reset(&mut self) {
        self.high_res.fill(false);
        self.needs_persistent.fill(false);
        self.list.clear();
    }

    #[cfg(test)]
    pub(crate) fn needs_persistent(&self, index: u16) -> bool {
        self.needs_persistent[index as usize]
    }
}
