//! Storage slots that pair block content with its dirty flag and cache

use std::fmt;

use super::catalogue::{BlockKind, EncodingStrategy, Lifecycle};
use super::{EncodeContext, EncodeError, ObserverId};

/// Content whose bytes are the same for every observer
pub trait SharedBlock: Default + Clone + PartialEq + fmt::Debug + Send + Sync {
    const KIND: BlockKind;

    fn encode(&self, ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError>;
}

/// Content encoded separately for each observer
pub trait ObserverBlock: Default + Clone + PartialEq + fmt::Debug + Send + Sync {
    const KIND: BlockKind;

    /// Whether `observer` has anything to see
    fn has_content_for(&self, observer: ObserverId) -> bool;

    fn encode_for(&self, observer: ObserverId, out: &mut Vec<u8>) -> Result<(), EncodeError>;
}

/// Uniform view of one block slot, used by the assembler
pub trait ExtendedInfoBlock: Send + Sync {
    fn kind(&self) -> BlockKind;

    /// Mutated since the last clear
    fn is_dirty(&self) -> bool;

    /// Holds non-default content
    fn is_present(&self) -> bool;

    /// Whether encoding for `observer` would produce content
    fn is_visible_to(&self, observer: ObserverId) -> bool;

    /// Append this block's bytes for `observer`
    fn encode(&self, observer: ObserverId, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    /// End-of-broadcast reset: drops the dirty flag, and the content for
    /// transient blocks
    fn clear(&mut self);

    /// Drop cached buffers and heap content when the avatar returns to the pool
    fn release_buffers(&mut self);
}

fn check_size(kind: BlockKind, out: &mut Vec<u8>, start: usize) -> Result<(), EncodeError> {
    let size = out.len() - start;
    if size > kind.max_encoded_size() {
        out.truncate(start);
        return Err(EncodeError::Oversized {
            kind,
            size,
            max: kind.max_encoded_size(),
        });
    }
    Ok(())
}

// ============================================================================
// Precomputed
// ============================================================================

/// Slot for a block encoded once per tick
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrecomputedSlot<B: SharedBlock> {
    content: B,
    dirty: bool,
    cache: Vec<u8>,
    cached: bool,
}

impl<B: SharedBlock> PrecomputedSlot<B> {
    pub fn get(&self) -> &B {
        &self.content
    }

    /// Replace the content and mark the slot dirty
    pub fn set(&mut self, content: B) {
        self.content = content;
        self.mark_dirty();
    }

    /// Mutate the content in place and mark the slot dirty
    pub fn update(&mut self, f: impl FnOnce(&mut B)) {
        f(&mut self.content);
        self.mark_dirty();
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.cached = false;
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Encode into the cache if the slot will be sent and is not cached yet
    pub fn precompute(&mut self, ctx: &EncodeContext<'_>) -> Result<(), EncodeError> {
        if self.cached || !(self.dirty || self.is_present()) {
            return Ok(());
        }
        self.cache.clear();
        self.content.encode(ctx, &mut self.cache)?;
        check_size(B::KIND, &mut self.cache, 0)?;
        self.cached = true;
        Ok(())
    }

    /// Back to a freshly constructed slot, keeping the cache allocation
    pub fn reset(&mut self) {
        self.content = B::default();
        self.dirty = false;
        self.cache.clear();
        self.cached = false;
    }
}

impl<B: SharedBlock> ExtendedInfoBlock for PrecomputedSlot<B> {
    fn kind(&self) -> BlockKind {
        debug_assert_eq!(B::KIND.strategy(), EncodingStrategy::Precomputed);
        B::KIND
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn is_present(&self) -> bool {
        self.content != B::default()
    }

    fn is_visible_to(&self, _observer: ObserverId) -> bool {
        true
    }

    fn encode(&self, _observer: ObserverId, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if !self.cached {
            return Err(EncodeError::NotPrecomputed { kind: B::KIND });
        }
        out.extend_from_slice(&self.cache);
        Ok(())
    }

    fn clear(&mut self) {
        self.dirty = false;
        if B::KIND.lifecycle() == Lifecycle::Transient {
            self.content = B::default();
            self.cache.clear();
            self.cached = false;
        }
    }

    fn release_buffers(&mut self) {
        self.content = B::default();
        self.cache = Vec::new();
        self.cached = false;
    }
}

// ============================================================================
// On-demand
// ============================================================================

/// Slot for a block encoded per observer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnDemandSlot<B: ObserverBlock> {
    content: B,
    dirty: bool,
}

impl<B: ObserverBlock> OnDemandSlot<B> {
    pub fn get(&self) -> &B {
        &self.content
    }

    pub fn set(&mut self, content: B) {
        self.content = content;
        self.dirty = true;
    }

    pub fn update<R>(&mut self, f: impl FnOnce(&mut B) -> R) -> R {
        let result = f(&mut self.content);
        self.dirty = true;
        result
    }

    pub fn reset(&mut self) {
        self.content = B::default();
        self.dirty = false;
    }
}

impl<B: ObserverBlock> ExtendedInfoBlock for OnDemandSlot<B> {
    fn kind(&self) -> BlockKind {
        debug_assert_eq!(B::KIND.strategy(), EncodingStrategy::OnDemand);
        B::KIND
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn is_present(&self) -> bool {
        self.content != B::default()
    }

    fn is_visible_to(&self, observer: ObserverId) -> bool {
        self.content.has_content_for(observer)
    }

    fn encode(&self, observer: ObserverId, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let start = out.len();
        if let Err(e) = self.content.encode_for(observer, out) {
            out.truncate(start);
            return Err(e);
        }
        check_size(B::KIND, out, start)
    }

    fn clear(&mut self) {
        self.dirty = false;
        if B::KIND.lifecycle() == Lifecycle::Transient {
            self.content = B::default();
        }
    }

    fn release_buffers(&mut self) {
        self.content = B::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::blocks::{Appearance, Say, Tint, TintBlock};
    use crate::info::codec::Latin1Codec;

    fn ctx() -> EncodeContext<'static> {
        EncodeContext { codec: &Latin1Codec }
    }

    #[test]
    fn test_precompute_once_until_mutated() {
        let mut slot = PrecomputedSlot::<Say>::default();
        slot.set(Say { text: "hello".into() });
        slot.precompute(&ctx()).unwrap();
        assert!(slot.is_cached());

        let mut first = Vec::new();
        slot.encode(ObserverId(1), &mut first).unwrap();
        let mut second = Vec::new();
        slot.encode(ObserverId(2), &mut second).unwrap();
        assert_eq!(first, second);

        slot.update(|say| say.text.push('!'));
        assert!(!slot.is_cached());
        assert!(slot.encode(ObserverId(1), &mut Vec::new()).is_err());
    }

    #[test]
    fn test_transient_clear_resets_content() {
        let mut slot = PrecomputedSlot::<Say>::default();
        slot.set(Say { text: "bye".into() });
        slot.precompute(&ctx()).unwrap();
        slot.clear();

        assert!(!slot.is_dirty());
        assert!(!slot.is_present());
        assert!(!slot.is_cached());
    }

    #[test]
    fn test_persistent_clear_keeps_content_and_cache() {
        let mut slot = PrecomputedSlot::<Appearance>::default();
        slot.set(Appearance { name: "Kept".into(), ..Appearance::default() });
        slot.precompute(&ctx()).unwrap();
        slot.clear();

        assert!(!slot.is_dirty());
        assert!(slot.is_present());
        assert!(slot.is_cached());
        assert!(slot.encode(ObserverId(3), &mut Vec::new()).is_ok());
    }

    #[test]
    fn test_precompute_skips_idle_slot() {
        let mut slot = PrecomputedSlot::<Say>::default();
        slot.precompute(&ctx()).unwrap();
        assert!(!slot.is_cached());
    }

    #[test]
    fn test_failed_precompute_leaves_slot_uncached() {
        let mut slot = PrecomputedSlot::<Say>::default();
        slot.set(Say { text: "x".repeat(200) });
        assert!(slot.precompute(&ctx()).is_err());
        assert!(!slot.is_cached());
        assert!(slot.is_dirty());
    }

    #[test]
    fn test_on_demand_encode_failure_truncates() {
        let mut slot = OnDemandSlot::<TintBlock>::default();
        slot.update(|b| b.variants.set_for(ObserverId(1), Tint::default()));

        let mut out = vec![0xAA];
        assert!(slot.encode(ObserverId(2), &mut out).is_err());
        assert_eq!(out, vec![0xAA]);
        assert!(slot.encode(ObserverId(1), &mut out).is_ok());
        assert_eq!(out.len(), 1 + BlockKind::Tint.max_encoded_size());
    }

    #[test]
    fn test_release_buffers_drops_content() {
        let mut slot = PrecomputedSlot::<Appearance>::default();
        slot.set(Appearance { name: "Gone".into(), ..Appearance::default() });
        slot.precompute(&ctx()).unwrap();
        slot.release_buffers();
        assert!(!slot.is_present());
        assert!(!slot.is_cached());
    }
}
