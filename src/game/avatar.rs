//! Avatar records
//!
//! An [`Avatar`] pairs the movement record the position section is built from
//! with the avatar's extended-info blocks and the bookkeeping the broadcast
//! engine needs while a tick is in flight.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::game::pool::Poolable;
use crate::info::ExtendedInfoSet;
use crate::util::bitfield::BitField;
use crate::util::coord::CoordGrid;

// ============================================================================
// Kinds and directions
// ============================================================================

/// Which protocol an avatar is broadcast through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarKind {
    Player,
    Npc,
    WorldEntity,
}

/// Eight-way direction, numbered as the client's walk table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    SouthWest,
    #[default]
    South,
    SouthEast,
    West,
    East,
    NorthWest,
    North,
    NorthEast,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::SouthWest,
        Direction::South,
        Direction::SouthEast,
        Direction::West,
        Direction::East,
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
    ];

    pub const fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Unit tile delta (dx, dz)
    pub const fn delta(self) -> (i32, i32) {
        match self {
            Direction::SouthWest => (-1, -1),
            Direction::South => (0, -1),
            Direction::SouthEast => (1, -1),
            Direction::West => (-1, 0),
            Direction::East => (1, 0),
            Direction::NorthWest => (-1, 1),
            Direction::North => (0, 1),
            Direction::NorthEast => (1, 1),
        }
    }

    pub fn from_delta(dx: i32, dz: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.delta() == (dx, dz))
    }
}

// ============================================================================
// Movement flags
// ============================================================================

/// Bit layout of [`MovementFlags::pack`]
pub mod movement_bits {
    use crate::util::bitfield::BitField;

    pub const CRAWL: BitField = BitField::new(0, 1);
    pub const WALK: BitField = BitField::new(1, 1);
    pub const RUN: BitField = BitField::new(2, 1);
    pub const TELEPORT: BitField = BitField::new(3, 1);
    pub const TELEPORT_JUMP: BitField = BitField::new(4, 1);
}

/// How the avatar moved this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovementFlags {
    pub crawl: bool,
    pub walk: bool,
    pub run: bool,
    /// Moved by teleport; the client may interpolate
    pub teleport: bool,
    /// Moved by teleport; the client must snap
    pub teleport_jump: bool,
}

impl MovementFlags {
    pub const NONE: MovementFlags = MovementFlags {
        crawl: false,
        walk: false,
        run: false,
        teleport: false,
        teleport_jump: false,
    };

    pub const fn is_teleport(self) -> bool {
        self.teleport || self.teleport_jump
    }

    pub fn pack(self) -> u8 {
        const FIELDS: [BitField; 5] = [
            movement_bits::CRAWL,
            movement_bits::WALK,
            movement_bits::RUN,
            movement_bits::TELEPORT,
            movement_bits::TELEPORT_JUMP,
        ];
        let values = [self.crawl, self.walk, self.run, self.teleport, self.teleport_jump];
        FIELDS
            .iter()
            .zip(values)
            .fold(0u32, |packed, (field, value)| field.set(packed, value as u32)) as u8
    }

    pub fn unpack(packed: u8) -> Self {
        let packed = packed as u32;
        Self {
            crawl: movement_bits::CRAWL.get(packed) == 1,
            walk: movement_bits::WALK.get(packed) == 1,
            run: movement_bits::RUN.get(packed) == 1,
            teleport: movement_bits::TELEPORT.get(packed) == 1,
            teleport_jump: movement_bits::TELEPORT_JUMP.get(packed) == 1,
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Parameters for placing an avatar at an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnParams {
    pub kind: AvatarKind,
    /// NPC type or world entity type; zero for players
    pub variant: u32,
    pub coord: CoordGrid,
    pub facing: Direction,
    /// Client cycle the spawn animation starts at; zero for none
    pub spawn_tick: u32,
    /// Set by the repository
    pub generation: u32,
    /// Set by the repository
    pub allocation_tick: u32,
}

impl SpawnParams {
    pub fn new(kind: AvatarKind, coord: CoordGrid) -> Self {
        Self {
            kind,
            variant: 0,
            coord,
            facing: Direction::default(),
            spawn_tick: 0,
            generation: 0,
            allocation_tick: 0,
        }
    }

    pub fn with_variant(mut self, variant: u32) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_facing(mut self, facing: Direction) -> Self {
        self.facing = facing;
        self
    }

    pub fn with_spawn_tick(mut self, spawn_tick: u32) -> Self {
        self.spawn_tick = spawn_tick;
        self
    }
}

/// Position and identity of one avatar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarRecord {
    index: u16,
    kind: AvatarKind,
    variant: u32,
    generation: u32,
    allocation_tick: u32,
    spawn_tick: u32,
    current: CoordGrid,
    previous: CoordGrid,
    movement: MovementFlags,
    facing: Direction,
}

impl AvatarRecord {
    fn spawned(index: u16, params: &SpawnParams) -> Self {
        Self {
            index,
            kind: params.kind,
            variant: params.variant,
            generation: params.generation,
            allocation_tick: params.allocation_tick,
            spawn_tick: params.spawn_tick,
            current: params.coord,
            previous: params.coord,
            movement: MovementFlags::NONE,
            facing: params.facing,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn kind(&self) -> AvatarKind {
        self.kind
    }

    pub fn variant(&self) -> u32 {
        self.variant
    }

    /// Distinguishes successive occupants of the same index
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Tick the avatar was placed at its index
    pub fn allocation_tick(&self) -> u32 {
        self.allocation_tick
    }

    pub fn spawn_tick(&self) -> u32 {
        self.spawn_tick
    }

    pub fn current_coord(&self) -> CoordGrid {
        self.current
    }

    /// Coordinate at the end of the previous tick
    pub fn previous_coord(&self) -> CoordGrid {
        self.previous
    }

    pub fn movement(&self) -> MovementFlags {
        self.movement
    }

    pub fn facing(&self) -> Direction {
        self.facing
    }
}

// ============================================================================
// Avatar
// ============================================================================

/// Per-tick read bookkeeping, touched concurrently by observer units
#[derive(Debug, Default)]
pub(crate) struct TickState {
    /// Observers that still have to read this avatar's dirty blocks
    readers: AtomicU32,
    /// Some observer refused the dirty blocks this tick
    deferred: AtomicBool,
    /// Precompute failed this tick
    poisoned: AtomicBool,
    /// Blocks were cleared by the last reader
    cleared: AtomicBool,
}

impl TickState {
    fn reset(&self) {
        self.readers.store(0, Ordering::Relaxed);
        self.deferred.store(false, Ordering::Relaxed);
        self.poisoned.store(false, Ordering::Relaxed);
        self.cleared.store(false, Ordering::Relaxed);
    }
}

/// A pooled avatar: record, extended info and tick state
#[derive(Debug)]
pub struct Avatar {
    record: AvatarRecord,
    info: RwLock<ExtendedInfoSet>,
    tick: TickState,
}

impl Avatar {
    pub fn new(index: u16, params: &SpawnParams) -> Self {
        Self {
            record: AvatarRecord::spawned(index, params),
            info: RwLock::new(ExtendedInfoSet::new()),
            tick: TickState::default(),
        }
    }

    pub fn record(&self) -> &AvatarRecord {
        &self.record
    }

    pub fn index(&self) -> u16 {
        self.record.index
    }

    /// Shared view of the extended-info blocks
    pub fn info(&self) -> RwLockReadGuard<'_, ExtendedInfoSet> {
        self.info.read()
    }

    /// Exclusive access for game systems between ticks
    pub fn info_mut(&mut self) -> &mut ExtendedInfoSet {
        self.info.get_mut()
    }

    // ========================================================================
    // Movement
    // ========================================================================

    /// Move by walking, running or crawling
    pub fn move_to(&mut self, coord: CoordGrid, movement: MovementFlags) {
        self.record.current = coord;
        self.record.movement = movement;
    }

    pub fn walk_to(&mut self, coord: CoordGrid) {
        self.move_to(coord, MovementFlags { walk: true, ..MovementFlags::NONE });
    }

    pub fn run_to(&mut self, coord: CoordGrid) {
        self.move_to(coord, MovementFlags { run: true, ..MovementFlags::NONE });
    }

    pub fn crawl_to(&mut self, coord: CoordGrid) {
        self.move_to(coord, MovementFlags { crawl: true, ..MovementFlags::NONE });
    }

    /// Teleport; `jump` makes the client snap instead of interpolating
    pub fn teleport(&mut self, coord: CoordGrid, jump: bool) {
        self.record.current = coord;
        self.record.movement = MovementFlags {
            teleport: !jump,
            teleport_jump: jump,
            ..MovementFlags::NONE
        };
    }

    pub fn set_facing(&mut self, facing: Direction) {
        self.record.facing = facing;
    }

    pub fn set_variant(&mut self, variant: u32) {
        self.record.variant = variant;
    }

    pub fn set_spawn_tick(&mut self, spawn_tick: u32) {
        self.record.spawn_tick = spawn_tick;
    }

    /// Roll the current coordinate into the previous one
    pub(crate) fn end_tick(&mut self) {
        self.record.previous = self.record.current;
        self.record.movement = MovementFlags::NONE;
    }

    // ========================================================================
    // Tick bookkeeping
    // ========================================================================

    pub(crate) fn begin_tick(&self) {
        self.tick.reset();
    }

    pub(crate) fn poison(&self) {
        self.tick.poisoned.store(true, Ordering::Release);
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.tick.poisoned.load(Ordering::Acquire)
    }

    pub(crate) fn schedule_read(&self) {
        self.tick.readers.fetch_add(1, Ordering::AcqRel);
    }

    /// Consume one scheduled read. The read that brings the count to zero
    /// clears the blocks unless some reader deferred them.
    ///
    /// The caller must not hold an [`Avatar::info`] guard.
    pub(crate) fn finish_read(&self, deferred: bool) {
        if deferred {
            self.tick.deferred.store(true, Ordering::Release);
        }
        let previous = self.tick.readers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "read finished without being scheduled");
        if previous == 1 && !self.tick.deferred.load(Ordering::Acquire) {
            self.info.write().clear();
            self.tick.cleared.store(true, Ordering::Release);
        }
    }

    pub(crate) fn pending_reads(&self) -> u32 {
        self.tick.readers.load(Ordering::Acquire)
    }

    /// Dirty blocks that nobody scheduled a read for can be cleared at tick end
    pub(crate) fn clear_if_unread(&mut self) -> bool {
        let tick = &self.tick;
        let idle = tick.readers.load(Ordering::Acquire) == 0
            && !tick.deferred.load(Ordering::Acquire)
            && !tick.poisoned.load(Ordering::Acquire)
            && !tick.cleared.load(Ordering::Acquire);
        let info = self.info.get_mut();
        if idle && info.is_dirty() {
            info.clear();
            return true;
        }
        false
    }
}

impl Poolable for Avatar {
    type Params = SpawnParams;

    fn create(index: u16, params: &SpawnParams) -> Self {
        Avatar::new(index, params)
    }

    fn on_alloc(&mut self, index: u16, params: &SpawnParams, is_new_instance: bool) {
        if !is_new_instance {
            self.record = AvatarRecord::spawned(index, params);
            self.info.get_mut().reset();
        }
        self.tick.reset();
    }

    fn on_dealloc(&mut self) {
        self.info.get_mut().release_buffers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn() -> SpawnParams {
        SpawnParams::new(AvatarKind::Player, CoordGrid::new(0, 3200, 3200))
    }

    #[test]
    fn test_direction_deltas_round_trip() {
        for dir in Direction::ALL {
            let (dx, dz) = dir.delta();
            assert_eq!(Direction::from_delta(dx, dz), Some(dir));
            assert_eq!(Direction::from_id(dir.id()), Some(dir));
        }
        assert_eq!(Direction::from_delta(0, 0), None);
        assert_eq!(Direction::from_delta(2, 0), None);
    }

    #[test]
    fn test_movement_flag_fields() {
        let cases = [
            (MovementFlags { crawl: true, ..MovementFlags::NONE }, 0b00001),
            (MovementFlags { walk: true, ..MovementFlags::NONE }, 0b00010),
            (MovementFlags { run: true, ..MovementFlags::NONE }, 0b00100),
            (MovementFlags { teleport: true, ..MovementFlags::NONE }, 0b01000),
            (MovementFlags { teleport_jump: true, ..MovementFlags::NONE }, 0b10000),
        ];
        for (flags, packed) in cases {
            assert_eq!(flags.pack(), packed);
            assert_eq!(MovementFlags::unpack(packed), flags);
        }
    }

    #[test]
    fn test_movement_flags_round_trip_all() {
        for packed in 0u8..32 {
            assert_eq!(MovementFlags::unpack(packed).pack(), packed);
        }
    }

    #[test]
    fn test_teleport_sets_one_flag() {
        let mut avatar = Avatar::new(1, &spawn());
        avatar.teleport(CoordGrid::new(0, 100, 100), false);
        assert!(avatar.record().movement().teleport);
        assert!(!avatar.record().movement().teleport_jump);

        avatar.teleport(CoordGrid::new(0, 100, 100), true);
        assert!(!avatar.record().movement().teleport);
        assert!(avatar.record().movement().teleport_jump);
    }

    #[test]
    fn test_end_tick_rolls_coordinates() {
        let mut avatar = Avatar::new(1, &spawn());
        let next = CoordGrid::new(0, 3201, 3200);
        avatar.walk_to(next);
        assert_eq!(avatar.record().previous_coord(), CoordGrid::new(0, 3200, 3200));
        avatar.end_tick();
        assert_eq!(avatar.record().previous_coord(), next);
        assert_eq!(avatar.record().movement(), MovementFlags::NONE);
    }

    #[test]
    fn test_last_reader_clears() {
        let mut avatar = Avatar::new(1, &spawn());
        avatar.info_mut().set_say("once");
        avatar.begin_tick();
        avatar.schedule_read();
        avatar.schedule_read();

        avatar.finish_read(false);
        assert!(avatar.info().is_dirty());
        avatar.finish_read(false);
        assert!(!avatar.info().is_dirty());
        assert_eq!(avatar.info().flush_count(), 1);
        assert!(!avatar.clear_if_unread());
    }

    #[test]
    fn test_deferred_read_keeps_blocks() {
        let mut avatar = Avatar::new(1, &spawn());
        avatar.info_mut().set_say("later");
        avatar.begin_tick();
        avatar.schedule_read();
        avatar.schedule_read();

        avatar.finish_read(true);
        avatar.finish_read(false);
        assert!(avatar.info().is_dirty());
        assert!(!avatar.clear_if_unread());
        assert_eq!(avatar.pending_reads(), 0);
    }

    #[test]
    fn test_unread_dirty_blocks_cleared_at_tick_end() {
        let mut avatar = Avatar::new(1, &spawn());
        avatar.info_mut().set_say("nobody near");
        avatar.begin_tick();
        assert!(avatar.clear_if_unread());
        assert!(!avatar.info().is_dirty());
    }

    #[test]
    fn test_poisoned_avatar_stays_dirty() {
        let mut avatar = Avatar::new(1, &spawn());
        avatar.info_mut().set_say("broken");
        avatar.begin_tick();
        avatar.poison();
        assert!(!avatar.clear_if_unread());
        avatar.begin_tick();
        assert!(!avatar.is_poisoned());
    }
}
