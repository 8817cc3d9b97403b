//! Extended-info blocks
//!
//! Each avatar owns one [`ExtendedInfoSet`] holding a slot per block kind.
//! Game systems mutate blocks through the typed setters between ticks; the
//! broadcast engine reads them during a tick and clears them once every
//! observer scheduled to read them has done so.
//!
//! Two encoding strategies coexist:
//! - Precomputed blocks are encoded once per tick into a cache that every
//!   observer copies
//! - On-demand blocks (hit, tint) are encoded per observer because their
//!   content depends on who is watching

pub mod blocks;
pub mod catalogue;
pub mod codec;
pub mod overrides;
pub mod slot;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::bytes::ByteWriter;

use blocks::{
    Appearance, Chat, ExactMove, FaceAngle, FacePathingEntity, Headbar, HitBlock, Hitmark,
    MoveSpeed, Say, Sequence, SpotAnim, Tint, TintBlock,
};
use catalogue::{BlockKind, BlockMask, Lifecycle, MASK_EXTENSION};
use codec::TextCodec;
use slot::{ExtendedInfoBlock, OnDemandSlot, PrecomputedSlot};

/// Identifies an observer (the receiving client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObserverId(pub u16);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Block encoding failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{kind} block encoded to {size} bytes, above its {max} byte maximum")]
    Oversized {
        kind: BlockKind,
        size: usize,
        max: usize,
    },

    #[error("{kind} block was not precomputed this tick")]
    NotPrecomputed { kind: BlockKind },

    #[error("{kind} block has no content for {observer}")]
    NoContent { kind: BlockKind, observer: ObserverId },

    #[error("{field} is {len} long, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: i64 },
}

/// Shared collaborators for block encoders
#[derive(Clone, Copy)]
pub struct EncodeContext<'a> {
    pub codec: &'a dyn TextCodec,
}

/// All extended-info blocks of one avatar
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtendedInfoSet {
    appearance: PrecomputedSlot<Appearance>,
    sequence: PrecomputedSlot<Sequence>,
    face_pathing_entity: PrecomputedSlot<FacePathingEntity>,
    say: PrecomputedSlot<Say>,
    hit: OnDemandSlot<HitBlock>,
    chat: PrecomputedSlot<Chat>,
    face_angle: PrecomputedSlot<FaceAngle>,
    move_speed: PrecomputedSlot<MoveSpeed>,
    spot_anim: PrecomputedSlot<SpotAnim>,
    exact_move: PrecomputedSlot<ExactMove>,
    tint: OnDemandSlot<TintBlock>,
    /// Bumped by every mutation
    revision: u32,
    /// Revision of the last mutation of each block, indexed by kind
    block_revisions: [u32; BlockKind::ALL.len()],
    /// Number of times the set has been cleared
    flush_count: u64,
}

impl ExtendedInfoSet {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    #[inline]
    fn touch(&mut self, kind: BlockKind) {
        self.revision = self.revision.wrapping_add(1);
        self.block_revisions[kind as usize] = self.revision;
    }

    pub fn set_appearance(&mut self, appearance: Appearance) {
        self.appearance.set(appearance);
        self.touch(BlockKind::Appearance);
    }

    pub fn update_appearance(&mut self, f: impl FnOnce(&mut Appearance)) {
        self.appearance.update(f);
        self.touch(BlockKind::Appearance);
    }

    pub fn set_sequence(&mut self, id: u16, delay: u8) {
        self.sequence.set(Sequence { id, delay });
        self.touch(BlockKind::Sequence);
    }

    pub fn set_face_pathing_entity(&mut self, target: Option<u16>) {
        self.face_pathing_entity.set(FacePathingEntity { target });
        self.touch(BlockKind::FacePathingEntity);
    }

    pub fn set_say(&mut self, text: impl Into<String>) {
        self.say.set(Say { text: text.into() });
        self.touch(BlockKind::Say);
    }

    pub fn set_chat(&mut self, chat: Chat) {
        self.chat.set(chat);
        self.touch(BlockKind::Chat);
    }

    pub fn set_face_angle(&mut self, angle: u16, instant: bool) {
        self.face_angle.set(FaceAngle { angle, instant });
        self.touch(BlockKind::FaceAngle);
    }

    pub fn set_move_speed(&mut self, speed: MoveSpeed) {
        self.move_speed.set(speed);
        self.touch(BlockKind::MoveSpeed);
    }

    pub fn set_spot_anim(&mut self, spot_anim: SpotAnim) {
        self.spot_anim.set(spot_anim);
        self.touch(BlockKind::SpotAnim);
    }

    pub fn set_exact_move(&mut self, exact_move: ExactMove) {
        self.exact_move.set(exact_move);
        self.touch(BlockKind::ExactMove);
    }

    /// Returns false when this tick's hitmark slots are full
    pub fn add_hitmark(&mut self, hitmark: Hitmark) -> bool {
        let added = self.hit.update(|hit| hit.push_hitmark(hitmark));
        self.touch(BlockKind::Hit);
        added
    }

    pub fn add_headbar(&mut self, headbar: Headbar) -> bool {
        let added = self.hit.update(|hit| hit.push_headbar(headbar));
        self.touch(BlockKind::Hit);
        added
    }

    /// Tint shown to every observer without an override
    pub fn set_tint(&mut self, tint: Tint) {
        self.tint.update(|block| block.variants.set_global(tint));
        self.touch(BlockKind::Tint);
    }

    /// Tint shown only to `observer`
    pub fn set_tint_for(&mut self, observer: ObserverId, tint: Tint) {
        self.tint.update(|block| block.variants.set_for(observer, tint));
        self.touch(BlockKind::Tint);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn appearance(&self) -> &Appearance {
        self.appearance.get()
    }

    pub fn say(&self) -> &Say {
        self.say.get()
    }

    pub fn hits(&self) -> &HitBlock {
        self.hit.get()
    }

    pub fn tint(&self) -> &TintBlock {
        self.tint.get()
    }

    pub fn move_speed(&self) -> MoveSpeed {
        *self.move_speed.get()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Revision of the last mutation of `kind`, zero if never set
    pub fn block_revision(&self, kind: BlockKind) -> u32 {
        self.block_revisions[kind as usize]
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    pub fn block(&self, kind: BlockKind) -> &dyn ExtendedInfoBlock {
        match kind {
            BlockKind::Appearance => &self.appearance,
            BlockKind::Sequence => &self.sequence,
            BlockKind::FacePathingEntity => &self.face_pathing_entity,
            BlockKind::Say => &self.say,
            BlockKind::Hit => &self.hit,
            BlockKind::Chat => &self.chat,
            BlockKind::FaceAngle => &self.face_angle,
            BlockKind::MoveSpeed => &self.move_speed,
            BlockKind::SpotAnim => &self.spot_anim,
            BlockKind::ExactMove => &self.exact_move,
            BlockKind::Tint => &self.tint,
        }
    }

    fn block_mut(&mut self, kind: BlockKind) -> &mut dyn ExtendedInfoBlock {
        match kind {
            BlockKind::Appearance => &mut self.appearance,
            BlockKind::Sequence => &mut self.sequence,
            BlockKind::FacePathingEntity => &mut self.face_pathing_entity,
            BlockKind::Say => &mut self.say,
            BlockKind::Hit => &mut self.hit,
            BlockKind::Chat => &mut self.chat,
            BlockKind::FaceAngle => &mut self.face_angle,
            BlockKind::MoveSpeed => &mut self.move_speed,
            BlockKind::SpotAnim => &mut self.spot_anim,
            BlockKind::ExactMove => &mut self.exact_move,
            BlockKind::Tint => &mut self.tint,
        }
    }

    /// Blocks mutated since the last clear
    pub fn dirty_mask(&self) -> BlockMask {
        BlockKind::ALL
            .into_iter()
            .filter(|&k| self.block(k).is_dirty())
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        BlockKind::ALL.into_iter().any(|k| self.block(k).is_dirty())
    }

    /// Whether a dirty block was mutated after revision `seen`
    pub fn is_dirty_since(&self, seen: u32) -> bool {
        BlockKind::ALL
            .into_iter()
            .any(|k| self.block(k).is_dirty() && self.block_revision(k) > seen)
    }

    /// Persistent blocks holding content
    pub fn persistent_mask(&self) -> BlockMask {
        BlockKind::ALL
            .into_iter()
            .filter(|&k| k.lifecycle() == Lifecycle::Persistent && self.block(k).is_present())
            .collect()
    }

    /// Blocks `observer` can see among the dirty ones mutated after
    /// revision `dirty_since` and the present persistent ones
    /// (`include_persistent`). `None` leaves dirty blocks out.
    pub fn observer_mask(
        &self,
        observer: ObserverId,
        dirty_since: Option<u32>,
        include_persistent: bool,
    ) -> BlockMask {
        let mut mask = BlockMask::EMPTY;
        for kind in BlockKind::ALL {
            let block = self.block(kind);
            let newer = dirty_since.is_some_and(|seen| self.block_revision(kind) > seen);
            let wanted = (newer && block.is_dirty())
                || (include_persistent
                    && kind.lifecycle() == Lifecycle::Persistent
                    && block.is_present());
            if wanted && block.is_visible_to(observer) {
                mask.insert(kind);
            }
        }
        mask
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Fill the cache of every precomputed block that will be sent this tick
    pub fn precompute(&mut self, ctx: &EncodeContext<'_>) -> Result<(), EncodeError> {
        self.appearance.precompute(ctx)?;
        self.sequence.precompute(ctx)?;
        self.face_pathing_entity.precompute(ctx)?;
        self.say.precompute(ctx)?;
        self.chat.precompute(ctx)?;
        self.face_angle.precompute(ctx)?;
        self.move_speed.precompute(ctx)?;
        self.spot_anim.precompute(ctx)?;
        self.exact_move.precompute(ctx)?;
        Ok(())
    }

    /// Append the mask header and the blocks in `mask` for `observer`.
    ///
    /// On failure `out` is restored to its original length.
    pub fn write_blocks(
        &self,
        observer: ObserverId,
        mask: BlockMask,
        out: &mut Vec<u8>,
    ) -> Result<usize, EncodeError> {
        let start = out.len();
        let bits = mask.bits();
        if bits > 0xFF {
            out.write_u8((bits & 0xFF) as u8 | MASK_EXTENSION);
            out.write_u8((bits >> 8) as u8);
        } else {
            out.write_u8(bits as u8);
        }
        for kind in mask.iter() {
            if let Err(e) = self.block(kind).encode(observer, out) {
                out.truncate(start);
                return Err(e);
            }
        }
        Ok(out.len() - start)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// End-of-tick reset of every block
    pub fn clear(&mut self) {
        for kind in BlockKind::ALL {
            self.block_mut(kind).clear();
        }
        self.flush_count += 1;
    }

    /// Back to the freshly constructed state
    pub fn reset(&mut self) {
        self.appearance.reset();
        self.sequence.reset();
        self.face_pathing_entity.reset();
        self.say.reset();
        self.hit.reset();
        self.chat.reset();
        self.face_angle.reset();
        self.move_speed.reset();
        self.spot_anim.reset();
        self.exact_move.reset();
        self.tint.reset();
        self.revision = 0;
        self.block_revisions = [0; BlockKind::ALL.len()];
        self.flush_count = 0;
    }

    /// Drop buffers and heap content held by the blocks
    pub fn release_buffers(&mut self) {
        for kind in BlockKind::ALL {
            self.block_mut(kind).release_buffers();
        }
    }
}
