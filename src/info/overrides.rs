//! Observer-keyed content with a global fallback

use rustc_hash::FxHashMap;

use super::ObserverId;

/// A global variant plus per-observer overrides.
///
/// Lookups fall back to the global variant when an observer has no override.
/// The map is only written between ticks and read during encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOverrides<T> {
    global: Option<T>,
    overrides: FxHashMap<ObserverId, T>,
}

impl<T> Default for ObserverOverrides<T> {
    fn default() -> Self {
        Self {
            global: None,
            overrides: FxHashMap::default(),
        }
    }
}

impl<T> ObserverOverrides<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&mut self, value: T) {
        self.global = Some(value);
    }

    pub fn set_for(&mut self, observer: ObserverId, value: T) {
        self.overrides.insert(observer, value);
    }

    pub fn global(&self) -> Option<&T> {
        self.global.as_ref()
    }

    /// Variant `observer` sees
    #[inline]
    pub fn resolve(&self, observer: ObserverId) -> Option<&T> {
        self.overrides.get(&observer).or(self.global.as_ref())
    }

    pub fn has_override(&self, observer: ObserverId) -> bool {
        self.overrides.contains_key(&observer)
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_none() && self.overrides.is_empty()
    }

    /// Drop all content, keeping the map's allocation
    pub fn clear(&mut self) {
        self.global = None;
        self.overrides.clear();
    }

    /// Drop all content and the map's allocation
    pub fn release(&mut self) {
        self.global = None;
        self.overrides = FxHashMap::default();
    }
}
