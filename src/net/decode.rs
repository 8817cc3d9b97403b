//! Client-side packet decoding
//!
//! [`PacketDecoder`] keeps the high-resolution list a client would keep and
//! parses observer packets against it. Used by simulated clients and by
//! tests that check the produced bits exactly.

use crate::broadcast::movement::{read_entry, DecodedEntry};
use crate::broadcast::profile::ProtocolProfile;
use crate::game::avatar::Direction;
use crate::game::constants::wire;
use crate::info::catalogue::{BlockKind, BlockMask, MASK_EXTENSION};
use crate::net::bits::BitReader;
use crate::net::bytes::ByteReader;
use crate::util::coord::CoordGrid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet truncated in {section}")]
    Truncated { section: &'static str },

    #[error("add for index {index} which is already in high resolution")]
    DuplicateAdd { index: u16 },

    #[error("invalid facing direction {0}")]
    InvalidFacing(u32),

    #[error("mask bits {bits:#06x} name no known block")]
    UnknownBlocks { bits: u16 },

    #[error("{count} bytes left after the last entry")]
    TrailingBytes { count: usize },
}

/// One entry of the high-resolution section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedUpdate {
    pub index: u16,
    /// `None` for an idle entry
    pub entry: Option<DecodedEntry>,
}

impl DecodedUpdate {
    pub fn has_extended_info(&self) -> bool {
        matches!(
            self.entry,
            Some(DecodedEntry::Moved {
                extended_info: true,
                ..
            })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedAdd {
    pub index: u16,
    pub extended_info: bool,
    pub jump: bool,
    pub coord: CoordGrid,
    pub facing: Direction,
    pub variant: u32,
    /// `None` when the profile sends no spawn tick or the avatar was not
    /// newly spawned
    pub spawn_tick: Option<u32>,
}

/// Raw blocks of one extended-info entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInfo {
    pub index: u16,
    pub mask: BlockMask,
    pub blocks: Vec<(BlockKind, Vec<u8>)>,
}

impl DecodedInfo {
    pub fn block(&self, kind: BlockKind) -> Option<&[u8]> {
        self.blocks
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, bytes)| bytes.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPacket {
    pub updates: Vec<DecodedUpdate>,
    pub adds: Vec<DecodedAdd>,
    pub extended_info: Vec<DecodedInfo>,
}

impl DecodedPacket {
    pub fn update(&self, index: u16) -> Option<&DecodedUpdate> {
        self.updates.iter().find(|u| u.index == index)
    }

    pub fn add(&self, index: u16) -> Option<&DecodedAdd> {
        self.adds.iter().find(|a| a.index == index)
    }

    pub fn info(&self, index: u16) -> Option<&DecodedInfo> {
        self.extended_info.iter().find(|i| i.index == index)
    }

    pub fn removals(&self) -> impl Iterator<Item = u16> + '_ {
        self.updates
            .iter()
            .filter(|u| u.entry == Some(DecodedEntry::Removed))
            .map(|u| u.index)
    }
}

/// Client model of one observer's high-resolution list
pub struct PacketDecoder {
    profile: ProtocolProfile,
    high_res: Vec<u16>,
}

impl PacketDecoder {
    pub fn new(profile: ProtocolProfile) -> Self {
        Self {
            profile,
            high_res: Vec::new(),
        }
    }

    /// Indices the client currently renders, ascending
    pub fn high_res(&self) -> &[u16] {
        &self.high_res
    }

    /// Parse one packet and apply its transitions to the client view.
    ///
    /// On error the view is left unchanged.
    pub fn decode(&mut self, payload: &[u8]) -> Result<DecodedPacket, DecodeError> {
        let mut packet = DecodedPacket::default();
        let mut bits = BitReader::new(payload);
        let mut pending_info: Vec<u16> = Vec::new();

        for &index in &self.high_res {
            let active = bits
                .read_bool()
                .ok_or(DecodeError::Truncated { section: "high resolution" })?;
            let entry = if active {
                let entry = read_entry(&mut bits)
                    .ok_or(DecodeError::Truncated { section: "high resolution" })?;
                Some(entry)
            } else {
                None
            };
            let update = DecodedUpdate { index, entry };
            if update.has_extended_info() {
                pending_info.push(index);
            }
            packet.updates.push(update);
        }

        let terminator = self.profile.terminator();
        loop {
            let index = bits
                .read(self.profile.index_bits)
                .ok_or(DecodeError::Truncated { section: "adds" })?;
            if index == terminator {
                break;
            }
            let add = self.read_add(&mut bits, index as u16)?;
            if self.high_res.binary_search(&add.index).is_ok()
                || packet.adds.iter().any(|a| a.index == add.index)
            {
                return Err(DecodeError::DuplicateAdd { index: add.index });
            }
            if add.extended_info {
                pending_info.push(add.index);
            }
            packet.adds.push(add);
        }

        let mut bytes = ByteReader::new(payload);
        bytes
            .read(bits.byte_position())
            .ok_or(DecodeError::Truncated { section: "bit padding" })?;
        for index in pending_info {
            packet.extended_info.push(read_info(&mut bytes, index)?);
        }
        if bytes.has_remaining() {
            return Err(DecodeError::TrailingBytes {
                count: bytes.remaining().len(),
            });
        }

        self.apply(&packet);
        Ok(packet)
    }

    fn read_add(&self, bits: &mut BitReader<'_>, index: u16) -> Result<DecodedAdd, DecodeError> {
        const SECTION: DecodeError = DecodeError::Truncated { section: "adds" };
        let extended_info = bits.read_bool().ok_or(SECTION)?;
        let jump = bits.read_bool().ok_or(SECTION)?;
        let level = bits.read(wire::LEVEL_BITS).ok_or(SECTION)?;
        let x = bits.read(wire::COORD_BITS).ok_or(SECTION)?;
        let z = bits.read(wire::COORD_BITS).ok_or(SECTION)?;
        let facing_id = bits.read(wire::FACING_BITS).ok_or(SECTION)?;
        let facing = Direction::from_id(facing_id).ok_or(DecodeError::InvalidFacing(facing_id))?;
        let variant = if self.profile.variant_bits > 0 {
            bits.read(self.profile.variant_bits).ok_or(SECTION)?
        } else {
            0
        };
        let spawn_tick = if self.profile.spawn_tick && bits.read_bool().ok_or(SECTION)? {
            Some(bits.read(wire::SPAWN_TICK_BITS).ok_or(SECTION)?)
        } else {
            None
        };
        Ok(DecodedAdd {
            index,
            extended_info,
            jump,
            coord: CoordGrid::new(level, x, z),
            facing,
            variant,
            spawn_tick,
        })
    }

    fn apply(&mut self, packet: &DecodedPacket) {
        self.high_res.retain(|index| {
            packet
                .update(*index)
                .map_or(true, |u| u.entry != Some(DecodedEntry::Removed))
        });
        self.high_res.extend(packet.adds.iter().map(|a| a.index));
        self.high_res.sort_unstable();
    }
}

fn read_info(bytes: &mut ByteReader<'_>, index: u16) -> Result<DecodedInfo, DecodeError> {
    const SECTION: DecodeError = DecodeError::Truncated { section: "extended info" };
    let low = bytes.read_u8().ok_or(SECTION)?;
    let mut raw = (low & !MASK_EXTENSION) as u16;
    if low & MASK_EXTENSION != 0 {
        raw |= (bytes.read_u8().ok_or(SECTION)? as u16) << 8;
    }
    let mask = BlockMask::from_bits(raw);
    if mask.bits() != raw {
        return Err(DecodeError::UnknownBlocks { bits: raw });
    }

    let mut blocks = Vec::with_capacity(mask.len());
    for kind in mask.iter() {
        let len = block_len(kind, bytes.remaining()).ok_or(SECTION)?;
        let body = bytes.read(len).ok_or(SECTION)?;
        blocks.push((kind, body.to_vec()));
    }
    Ok(DecodedInfo { index, mask, blocks })
}

/// Encoded length of the block at the start of `data`
fn block_len(kind: BlockKind, data: &[u8]) -> Option<usize> {
    let len = match kind {
        BlockKind::ExactMove => 10,
        BlockKind::SpotAnim => 6,
        BlockKind::Sequence | BlockKind::FaceAngle => 3,
        BlockKind::FacePathingEntity => 2,
        BlockKind::MoveSpeed => 1,
        BlockKind::Tint => 8,
        BlockKind::Appearance => 1 + *data.first()? as usize,
        BlockKind::Say => data.iter().position(|&b| b == 0)? + 1,
        BlockKind::Chat => 5 + *data.get(4)? as usize,
        BlockKind::Hit => {
            let hitmarks = *data.first()? as usize;
            let headbars_at = 1 + hitmarks * 5;
            let headbars = *data.get(headbars_at)? as usize;
            headbars_at + 1 + headbars * 8
        }
    };
    (len <= data.len()).then_some(len)
}
