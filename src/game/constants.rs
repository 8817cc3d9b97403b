/// Outgoing packet sizing
pub mod packet {
    /// Hard capacity of one observer buffer in bytes
    pub const HARD_CAPACITY: usize = 40_000;
    /// Soft limit the admission filter budgets against
    pub const SOFT_LIMIT: usize = 30_000;
    /// Minimum bytes reserved per unwritten avatar when admitting extended info
    pub const MIN_BYTES_PER_AVATAR: usize = 1;
}

/// Tick timing
pub mod tick {
    /// Game tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 600;
    /// Rolling window of tick samples kept by the budget monitor
    pub const BUDGET_SAMPLES: usize = 100;
}

/// Observer view
pub mod view {
    /// Default Chebyshev radius within which avatars become high-resolution
    pub const DEFAULT_RADIUS: u32 = 15;
    /// Largest radius an observer may request
    pub const MAX_RADIUS: u32 = 64;
}

/// Player avatar protocol
pub mod player {
    /// Bits used to encode an avatar index
    pub const INDEX_BITS: u32 = 11;
    /// Largest number of simultaneous high-resolution avatars per observer
    pub const MAX_HIGH_RES: usize = 255;
}

/// NPC avatar protocol
pub mod npc {
    pub const INDEX_BITS: u32 = 16;
    pub const VARIANT_BITS: u32 = 16;
    pub const MAX_HIGH_RES: usize = 250;
}

/// World entity protocol
pub mod world_entity {
    pub const INDEX_BITS: u32 = 16;
    pub const VARIANT_BITS: u32 = 16;
    pub const MAX_HIGH_RES: usize = 249;
}

/// Object pooling
pub mod pool {
    /// Default number of released avatars retained for reuse
    pub const DEFAULT_CAPACITY: usize = 4096;
}

/// Parallel dispatch
pub mod dispatch {
    /// Work units per worker below which dispatch runs inline
    pub const UNITS_PER_WORKER: usize = 2;
}

/// Bit widths of the position section
pub mod wire {
    /// Opcode following the activity bit of a high-resolution entry
    pub const OPCODE_BITS: u32 = 2;
    pub const OPCODE_STATIONARY: u32 = 0;
    pub const OPCODE_STEP: u32 = 1;
    pub const OPCODE_RUN: u32 = 2;
    pub const OPCODE_TELEPORT: u32 = 3;
    /// Walk direction width
    pub const STEP_DIRECTION_BITS: u32 = 3;
    /// Run direction width
    pub const RUN_DIRECTION_BITS: u32 = 4;
    /// Signed width of a small teleport axis delta
    pub const SMALL_DELTA_BITS: u32 = 5;
    /// Level delta width of a small teleport
    pub const LEVEL_BITS: u32 = 2;
    /// Absolute axis width of a large teleport
    pub const COORD_BITS: u32 = 14;
    /// Facing direction width in an add transition
    pub const FACING_BITS: u32 = 3;
    /// Spawn tick width
    pub const SPAWN_TICK_BITS: u32 = 32;
    /// Largest delta a small teleport carries on each axis. The field could
    /// hold -16 but the range is kept symmetric.
    pub const SMALL_DELTA_MAX: i32 = 15;
    pub const SMALL_DELTA_MIN: i32 = -15;
}

/// Text limits for chat-like blocks
pub mod text {
    /// Longest public chat or overhead message
    pub const MAX_MESSAGE_CHARS: usize = 80;
    /// Longest compressed chat payload
    pub const MAX_COMPRESSED_BYTES: usize = 100;
    /// Longest display name
    pub const MAX_NAME_CHARS: usize = 12;
}

/// Hit block limits
pub mod hit {
    /// Hitmarks shown per tick
    pub const MAX_HITMARKS: usize = 8;
    /// Headbars shown per tick
    pub const MAX_HEADBARS: usize = 4;
}
