//! Extended-info admission
//!
//! Before an avatar's extended info is written into an observer's buffer the
//! filter decides whether it still fits. Refused info is not lost: the blocks
//! stay dirty and the observer picks them up on a later tick.

use serde::{Deserialize, Serialize};

use crate::game::constants::packet;
use crate::info::catalogue::{BlockMask, MAX_EXTENDED_INFO_SIZE};

/// Decides whether one avatar's extended info is written this tick
pub trait AdmissionFilter: Send + Sync {
    /// `writable_bytes` is the soft limit minus what is written so far and
    /// the worst-case position cost of every entry not yet written.
    /// `remaining_avatars` counts entries after this one.
    fn accept(
        &self,
        writable_bytes: usize,
        mask: BlockMask,
        remaining_avatars: usize,
        previously_observed: bool,
    ) -> bool;
}

/// Which avatars win when space runs short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum PriorityPolicy {
    /// Newly added avatars need this many extra bytes of headroom, so
    /// avatars the observer already tracks are served first
    PreferObserved { new_avatar_reserve: usize },
    /// Every avatar is judged the same
    Uniform,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        PriorityPolicy::PreferObserved {
            new_avatar_reserve: MAX_EXTENDED_INFO_SIZE,
        }
    }
}

/// Accepts while the worst case of this avatar plus a minimum for every
/// remaining one still fits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultAdmissionFilter {
    per_avatar_ceiling: usize,
    policy: PriorityPolicy,
}

impl DefaultAdmissionFilter {
    pub fn new(per_avatar_ceiling: usize, policy: PriorityPolicy) -> Self {
        Self {
            per_avatar_ceiling,
            policy,
        }
    }

    pub fn per_avatar_ceiling(&self) -> usize {
        self.per_avatar_ceiling
    }

    pub fn policy(&self) -> PriorityPolicy {
        self.policy
    }
}

impl Default for DefaultAdmissionFilter {
    fn default() -> Self {
        Self::new(MAX_EXTENDED_INFO_SIZE, PriorityPolicy::default())
    }
}

impl AdmissionFilter for DefaultAdmissionFilter {
    fn accept(
        &self,
        writable_bytes: usize,
        mask: BlockMask,
        remaining_avatars: usize,
        previously_observed: bool,
    ) -> bool {
        if mask.is_empty() {
            return true;
        }
        let reserve = match self.policy {
            PriorityPolicy::PreferObserved { new_avatar_reserve } if !previously_observed => {
                new_avatar_reserve
            }
            _ => 0,
        };
        let required = self.per_avatar_ceiling
            + remaining_avatars * packet::MIN_BYTES_PER_AVATAR
            + reserve;
        writable_bytes >= required
    }
}
