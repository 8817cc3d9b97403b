//! Per-kind protocol parameters
//!
//! Players, NPCs and world entities share one update algorithm and differ
//! only in the widths and limits below.

use crate::game::avatar::AvatarKind;
use crate::game::constants::{npc, player, wire, world_entity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolProfile {
    pub kind: AvatarKind,
    /// Width of an index in an add transition and of the terminator
    pub index_bits: u32,
    /// Width of the variant (type id) in an add transition; zero for none
    pub variant_bits: u32,
    /// Most avatars one observer can hold in high resolution
    pub max_high_res: usize,
    /// Add transitions carry a spawn cycle
    pub spawn_tick: bool,
}

impl ProtocolProfile {
    pub const PLAYER: ProtocolProfile = ProtocolProfile {
        kind: AvatarKind::Player,
        index_bits: player::INDEX_BITS,
        variant_bits: 0,
        max_high_res: player::MAX_HIGH_RES,
        spawn_tick: false,
    };

    pub const NPC: ProtocolProfile = ProtocolProfile {
        kind: AvatarKind::Npc,
        index_bits: npc::INDEX_BITS,
        variant_bits: npc::VARIANT_BITS,
        max_high_res: npc::MAX_HIGH_RES,
        spawn_tick: true,
    };

    pub const WORLD_ENTITY: ProtocolProfile = ProtocolProfile {
        kind: AvatarKind::WorldEntity,
        index_bits: world_entity::INDEX_BITS,
        variant_bits: world_entity::VARIANT_BITS,
        max_high_res: world_entity::MAX_HIGH_RES,
        spawn_tick: true,
    };

    pub const fn for_kind(kind: AvatarKind) -> Self {
        match kind {
            AvatarKind::Player => Self::PLAYER,
            AvatarKind::Npc => Self::NPC,
            AvatarKind::WorldEntity => Self::WORLD_ENTITY,
        }
    }

    /// Reserved all-ones index ending the add section
    pub const fn terminator(&self) -> u32 {
        (1 << self.index_bits) - 1
    }

    /// Number of usable indices; the terminator is excluded
    pub const fn index_capacity(&self) -> u16 {
        self.terminator() as u16
    }

    /// Worst-case bits of one high-resolution entry (a large teleport)
    pub const fn max_update_bits(&self) -> usize {
        let teleport = 1 + wire::OPCODE_BITS + 1 + 1 + 1 + wire::LEVEL_BITS + 2 * wire::COORD_BITS;
        (teleport + 1) as usize
    }

    /// Worst-case bits of one add transition
    pub const fn max_add_bits(&self) -> usize {
        let mut bits = self.index_bits
            + 1
            + 1
            + wire::LEVEL_BITS
            + 2 * wire::COORD_BITS
            + wire::FACING_BITS
            + self.variant_bits;
        if self.spawn_tick {
            bits += 1 + wire::SPAWN_TICK_BITS;
        }
        bits as usize
    }

    /// Largest variant an add transition can carry
    pub const fn max_variant(&self) -> u32 {
        if self.variant_bits == 0 {
            0
        } else {
            (1 << self.variant_bits) - 1
        }
    }
}
