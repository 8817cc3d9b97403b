//! Extended-info block catalogue
//!
//! One row per block kind: mask flag, encoding strategy, lifecycle, the
//! worst-case encoded size, and the position the block takes on the wire.
//! Every size the admission filter budgets with comes from this table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Set on the first mask byte when a second mask byte follows
pub const MASK_EXTENSION: u8 = 0x80;

/// Largest mask header (low byte with extension bit plus high byte)
pub const MAX_MASK_HEADER: usize = 2;

/// How a block's bytes are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingStrategy {
    /// Encoded once per tick and copied verbatim to every observer
    Precomputed,
    /// Encoded separately for each observer
    OnDemand,
}

/// What happens to a block's content after a tick's broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Reset to default when cleared
    Transient,
    /// Kept across clears and re-sent when an observer adds the avatar
    Persistent,
}

/// Extended-info block kinds, declared in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    ExactMove,
    SpotAnim,
    Sequence,
    FaceAngle,
    Say,
    Chat,
    FacePathingEntity,
    Appearance,
    MoveSpeed,
    Tint,
    Hit,
}

impl BlockKind {
    /// Every kind in wire order
    pub const ALL: [BlockKind; 11] = [
        BlockKind::ExactMove,
        BlockKind::SpotAnim,
        BlockKind::Sequence,
        BlockKind::FaceAngle,
        BlockKind::Say,
        BlockKind::Chat,
        BlockKind::FacePathingEntity,
        BlockKind::Appearance,
        BlockKind::MoveSpeed,
        BlockKind::Tint,
        BlockKind::Hit,
    ];

    pub const fn flag(self) -> u16 {
        match self {
            BlockKind::Appearance => 0x01,
            BlockKind::Sequence => 0x02,
            BlockKind::FacePathingEntity => 0x04,
            BlockKind::Say => 0x08,
            BlockKind::Hit => 0x10,
            BlockKind::Chat => 0x20,
            BlockKind::FaceAngle => 0x40,
            BlockKind::MoveSpeed => 0x100,
            BlockKind::SpotAnim => 0x200,
            BlockKind::ExactMove => 0x400,
            BlockKind::Tint => 0x800,
        }
    }

    pub const fn strategy(self) -> EncodingStrategy {
        match self {
            BlockKind::Hit | BlockKind::Tint => EncodingStrategy::OnDemand,
            _ => EncodingStrategy::Precomputed,
        }
    }

    pub const fn lifecycle(self) -> Lifecycle {
        match self {
            BlockKind::Appearance | BlockKind::FacePathingEntity | BlockKind::MoveSpeed => {
                Lifecycle::Persistent
            }
            _ => Lifecycle::Transient,
        }
    }

    /// Content can differ between observers
    pub const fn is_observer_dependent(self) -> bool {
        matches!(self.strategy(), EncodingStrategy::OnDemand)
    }

    /// Worst-case encoded size in bytes
    pub const fn max_encoded_size(self) -> usize {
        match self {
            BlockKind::Appearance => 64,
            BlockKind::Sequence => 3,
            BlockKind::FacePathingEntity => 2,
            BlockKind::Say => 81,
            BlockKind::Hit => 74,
            BlockKind::Chat => 105,
            BlockKind::FaceAngle => 3,
            BlockKind::MoveSpeed => 1,
            BlockKind::SpotAnim => 6,
            BlockKind::ExactMove => 10,
            BlockKind::Tint => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BlockKind::ExactMove => "exact_move",
            BlockKind::SpotAnim => "spot_anim",
            BlockKind::Sequence => "sequence",
            BlockKind::FaceAngle => "face_angle",
            BlockKind::Say => "say",
            BlockKind::Chat => "chat",
            BlockKind::FacePathingEntity => "face_pathing_entity",
            BlockKind::Appearance => "appearance",
            BlockKind::MoveSpeed => "move_speed",
            BlockKind::Tint => "tint",
            BlockKind::Hit => "hit",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Worst-case size of one avatar's whole extended-info entry
pub const MAX_EXTENDED_INFO_SIZE: usize = {
    let mut total = MAX_MASK_HEADER;
    let mut i = 0;
    while i < BlockKind::ALL.len() {
        total += BlockKind::ALL[i].max_encoded_size();
        i += 1;
    }
    total
};

/// Set of block kinds, laid out as the wire mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BlockMask(u16);

impl BlockMask {
    pub const EMPTY: BlockMask = BlockMask(0);

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Mask from raw wire bits, ignoring the extension flag and unknown bits
    pub fn from_bits(bits: u16) -> Self {
        let known = BlockKind::ALL.iter().fold(0u16, |acc, k| acc | k.flag());
        BlockMask(bits & known)
    }

    pub fn all() -> Self {
        BlockKind::ALL.iter().copied().collect()
    }

    #[inline]
    pub const fn contains(self, kind: BlockKind) -> bool {
        self.0 & kind.flag() != 0
    }

    #[inline]
    pub fn insert(&mut self, kind: BlockKind) {
        self.0 |= kind.flag();
    }

    #[inline]
    pub fn remove(&mut self, kind: BlockKind) {
        self.0 &= !kind.flag();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: BlockMask) -> BlockMask {
        BlockMask(self.0 | other.0)
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Kinds in wire order
    pub fn iter(self) -> impl Iterator<Item = BlockKind> {
        BlockKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    /// Bytes the mask header takes on the wire
    pub const fn header_size(self) -> usize {
        if self.0 > 0xFF {
            2
        } else {
            1
        }
    }

    /// Worst-case size of the header plus every contained block
    pub fn max_encoded_size(self) -> usize {
        self.header_size() + self.iter().map(BlockKind::max_encoded_size).sum::<usize>()
    }
}

impl FromIterator<BlockKind> for BlockMask {
    fn from_iter<I: IntoIterator<Item = BlockKind>>(iter: I) -> Self {
        let mut mask = BlockMask::EMPTY;
        for kind in iter {
            mask.insert(kind);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_unique_and_skip_extension_bit() {
        let mut seen = 0u16;
        for kind in BlockKind::ALL {
            assert_eq!(seen & kind.flag(), 0, "{} shares a flag", kind);
            assert_ne!(kind.flag(), MASK_EXTENSION as u16);
            assert_eq!(kind.flag().count_ones(), 1);
            seen |= kind.flag();
        }
    }

    #[test]
    fn test_all_is_declaration_order() {
        let mut sorted = BlockKind::ALL;
        sorted.sort();
        assert_eq!(sorted, BlockKind::ALL);
    }

    #[test]
    fn test_observer_dependent_blocks_are_on_demand() {
        assert!(BlockKind::Hit.is_observer_dependent());
        assert!(BlockKind::Tint.is_observer_dependent());
        assert!(!BlockKind::Say.is_observer_dependent());
        assert_eq!(BlockKind::Appearance.lifecycle(), Lifecycle::Persistent);
        assert_eq!(BlockKind::Say.lifecycle(), Lifecycle::Transient);
    }

    #[test]
    fn test_mask_header_size() {
        let low: BlockMask = [BlockKind::Say, BlockKind::Appearance].into_iter().collect();
        assert_eq!(low.header_size(), 1);
        let high: BlockMask = [BlockKind::Say, BlockKind::Tint].into_iter().collect();
        assert_eq!(high.header_size(), 2);
    }

    #[test]
    fn test_mask_iterates_in_wire_order() {
        let mask: BlockMask = [BlockKind::Hit, BlockKind::Say, BlockKind::ExactMove]
            .into_iter()
            .collect();
        let order: Vec<_> = mask.iter().collect();
        assert_eq!(order, vec![BlockKind::ExactMove, BlockKind::Say, BlockKind::Hit]);
        assert_eq!(mask.len(), 3);
    }

    #[test]
    fn test_full_mask_matches_constant() {
        assert_eq!(BlockMask::all().max_encoded_size(), MAX_EXTENDED_INFO_SIZE);
        assert_eq!(BlockMask::from_bits(0xFFFF), BlockMask::all());
    }
}
