//! Position deltas of high-resolution avatars
//!
//! Classifies how an avatar moved between two ticks and writes the matching
//! opcode and payload into the bit section. The activity bit in front of an
//! entry is written by the caller.

use crate::game::avatar::{AvatarRecord, Direction};
use crate::game::constants::wire;
use crate::net::bits::{BitReader, BitWriter};
use crate::util::coord::CoordGrid;

/// Two-tile run deltas, indexed by run direction id
const RUN_DELTAS: [(i32, i32); 16] = [
    (-2, -2),
    (-1, -2),
    (0, -2),
    (1, -2),
    (2, -2),
    (-2, -1),
    (2, -1),
    (-2, 0),
    (2, 0),
    (-2, 1),
    (2, 1),
    (-2, 2),
    (-1, 2),
    (0, 2),
    (1, 2),
    (2, 2),
];

fn run_direction(dx: i32, dz: i32) -> Option<u32> {
    RUN_DELTAS
        .iter()
        .position(|&d| d == (dx, dz))
        .map(|i| i as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionDelta {
    Stationary,
    Step {
        direction: Direction,
        crawl: bool,
    },
    Run {
        dx: i32,
        dz: i32,
    },
    /// Teleport within a small window of the previous tile. The level delta
    /// wraps modulo 4.
    TeleportSmall {
        dlevel: u32,
        dx: i32,
        dz: i32,
        jump: bool,
    },
    TeleportLarge {
        coord: CoordGrid,
        jump: bool,
    },
}

impl PositionDelta {
    /// Delta between the record's previous and current coordinate
    pub fn classify(record: &AvatarRecord) -> Self {
        let previous = record.previous_coord();
        let current = record.current_coord();
        let movement = record.movement();
        let (dx, dz) = previous.delta_to(current);
        let same_level = previous.level() == current.level();
        let distance = previous.chebyshev_distance(current);

        if !movement.is_teleport() && same_level {
            match distance {
                0 => return PositionDelta::Stationary,
                1 => {
                    if let Some(direction) = Direction::from_delta(dx, dz) {
                        return PositionDelta::Step {
                            direction,
                            crawl: movement.crawl,
                        };
                    }
                }
                2 => {
                    if run_direction(dx, dz).is_some() {
                        return PositionDelta::Run { dx, dz };
                    }
                }
                _ => {}
            }
        }

        // Anything else is a teleport; only an explicit interpolating
        // teleport lets the client glide.
        let jump = !movement.teleport;
        let small = (wire::SMALL_DELTA_MIN..=wire::SMALL_DELTA_MAX).contains(&dx)
            && (wire::SMALL_DELTA_MIN..=wire::SMALL_DELTA_MAX).contains(&dz);
        if small {
            PositionDelta::TeleportSmall {
                dlevel: current.level().wrapping_sub(previous.level()) & 0b11,
                dx,
                dz,
                jump,
            }
        } else {
            PositionDelta::TeleportLarge { coord: current, jump }
        }
    }

    pub fn jump(&self) -> bool {
        match self {
            PositionDelta::TeleportSmall { jump, .. } | PositionDelta::TeleportLarge { jump, .. } => *jump,
            _ => false,
        }
    }

    /// Write opcode, payload and the extended-info flag
    pub fn write(&self, bits: &mut BitWriter, extended_info: bool) {
        match *self {
            PositionDelta::Stationary => {
                bits.write(wire::OPCODE_BITS, wire::OPCODE_STATIONARY);
            }
            PositionDelta::Step { direction, crawl } => {
                bits.write(wire::OPCODE_BITS, wire::OPCODE_STEP);
                bits.write_bool(crawl);
                bits.write(wire::STEP_DIRECTION_BITS, direction.id());
            }
            PositionDelta::Run { dx, dz } => {
                bits.write(wire::OPCODE_BITS, wire::OPCODE_RUN);
                // classify only produces table deltas
                bits.write(wire::RUN_DIRECTION_BITS, run_direction(dx, dz).unwrap_or(0));
            }
            PositionDelta::TeleportSmall { dlevel, dx, dz, jump } => {
                bits.write(wire::OPCODE_BITS, wire::OPCODE_TELEPORT);
                bits.write_bool(false);
                bits.write_bool(jump);
                bits.write_bool(false);
                bits.write(wire::LEVEL_BITS, dlevel);
                bits.write_signed(wire::SMALL_DELTA_BITS, dx);
                bits.write_signed(wire::SMALL_DELTA_BITS, dz);
            }
            PositionDelta::TeleportLarge { coord, jump } => {
                bits.write(wire::OPCODE_BITS, wire::OPCODE_TELEPORT);
                bits.write_bool(false);
                bits.write_bool(jump);
                bits.write_bool(true);
                bits.write(wire::LEVEL_BITS, coord.level());
                bits.write(wire::COORD_BITS, coord.x());
                bits.write(wire::COORD_BITS, coord.z());
            }
        }
        bits.write_bool(extended_info);
    }

    /// Write the removal form of the teleport opcode
    pub fn write_removal(bits: &mut BitWriter) {
        bits.write(wire::OPCODE_BITS, wire::OPCODE_TELEPORT);
        bits.write_bool(true);
    }
}

/// A decoded high-resolution entry body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedEntry {
    Moved {
        delta: PositionDelta,
        extended_info: bool,
    },
    Removed,
}

/// Read an entry body written by [`PositionDelta::write`] or
/// [`PositionDelta::write_removal`]
pub fn read_entry(reader: &mut BitReader<'_>) -> Option<DecodedEntry> {
    let delta = match reader.read(wire::OPCODE_BITS)? {
        wire::OPCODE_STATIONARY => PositionDelta::Stationary,
        wire::OPCODE_STEP => {
            let crawl = reader.read_bool()?;
            let direction = Direction::from_id(reader.read(wire::STEP_DIRECTION_BITS)?)?;
            PositionDelta::Step { direction, crawl }
        }
        wire::OPCODE_RUN => {
            let (dx, dz) = *RUN_DELTAS.get(reader.read(wire::RUN_DIRECTION_BITS)? as usize)?;
            PositionDelta::Run { dx, dz }
        }
        _ => {
            if reader.read_bool()? {
                return Some(DecodedEntry::Removed);
            }
            let jump = reader.read_bool()?;
            if reader.read_bool()? {
                let level = reader.read(wire::LEVEL_BITS)?;
                let x = reader.read(wire::COORD_BITS)?;
                let z = reader.read(wire::COORD_BITS)?;
                PositionDelta::TeleportLarge {
                    coord: CoordGrid::new(level, x, z),
                    jump,
                }
            } else {
                PositionDelta::TeleportSmall {
                    dlevel: reader.read(wire::LEVEL_BITS)?,
                    dx: reader.read_signed(wire::SMALL_DELTA_BITS)?,
                    dz: reader.read_signed(wire::SMALL_DELTA_BITS)?,
                    jump,
                }
            }
        }
    };
    let extended_info = reader.read_bool()?;
    Some(DecodedEntry::Moved { delta, extended_info })
}
