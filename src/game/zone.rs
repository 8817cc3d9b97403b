//! Zone-bucketed spatial index
//!
//! Avatars are bucketed by 8x8 zone so a radius query only visits the zones
//! the query square overlaps. Rebuilt once per tick before the resolution
//! pass, then shared read-only by every observer unit.

use hashbrown::HashMap;

use crate::game::repository::AvatarRepository;
use crate::util::coord::{CoordGrid, ZoneKey, ZONE_SIZE};

/// Initial capacity for the zone map (number of expected non-empty zones)
const ZONE_INITIAL_CAPACITY: usize = 256;

/// Initial capacity for avatar vectors within zones
const ZONE_ENTRY_INITIAL_CAPACITY: usize = 8;

/// Answers "which avatars are near this coordinate"
pub trait RangeQuery: Sync {
    /// Append the indices of avatars within `radius` of `center` to `out`
    fn collect_in_range(&self, center: CoordGrid, radius: u32, out: &mut Vec<u16>);
}

#[derive(Debug, Clone, Copy)]
struct ZoneEntry {
    index: u16,
    coord: CoordGrid,
}

pub struct ZoneIndex {
    zones: HashMap<ZoneKey, Vec<ZoneEntry>>,
}

impl ZoneIndex {
    pub fn new() -> Self {
        Self {
            zones: HashMap::with_capacity(ZONE_INITIAL_CAPACITY),
        }
    }

    /// Empty every zone, keeping allocations
    #[inline]
    pub fn clear(&mut self) {
        for zone in self.zones.values_mut() {
            zone.clear();
        }
    }

    #[inline]
    pub fn insert(&mut self, index: u16, coord: CoordGrid) {
        self.zones
            .entry(coord.zone())
            .or_insert_with(|| Vec::with_capacity(ZONE_ENTRY_INITIAL_CAPACITY))
            .push(ZoneEntry { index, coord });
    }

    /// Re-bucket every live avatar at its current coordinate
    pub fn rebuild(&mut self, repository: &AvatarRepository) {
        self.clear();
        for avatar in repository.iter() {
            self.insert(avatar.index(), avatar.record().current_coord());
        }
        self.zones.retain(|_, zone| !zone.is_empty());
    }

    /// Number of occupied zones
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Number of indexed avatars
    pub fn len(&self) -> usize {
        self.zones.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.values().all(Vec::is_empty)
    }
}

impl Default for ZoneIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeQuery for ZoneIndex {
    fn collect_in_range(&self, center: CoordGrid, radius: u32, out: &mut Vec<u16>) {
        let min_x = center.x().saturating_sub(radius) / ZONE_SIZE;
        let max_x = (center.x() + radius) / ZONE_SIZE;
        let min_z = center.z().saturating_sub(radius) / ZONE_SIZE;
        let max_z = (center.z() + radius) / ZONE_SIZE;

        for zone_x in min_x..=max_x {
            for zone_z in min_z..=max_z {
                let key = ZoneKey {
                    level: center.level() as u8,
                    zone_x: zone_x as u16,
                    zone_z: zone_z as u16,
                };
                let Some(zone) = self.zones.get(&key) else {
                    continue;
                };
                out.extend(
                    zone.iter()
                        .filter(|entry| center.in_range(entry.coord, radius))
                        .map(|entry| entry.index),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::avatar::{AvatarKind, SpawnParams};
    use crate::game::thread_guard::ThreadSafetyMode;

    fn query(index: &ZoneIndex, center: CoordGrid, radius: u32) -> Vec<u16> {
        let mut out = Vec::new();
        index.collect_in_range(center, radius, &mut out);
        out.sort_unstable();
        out
    }

    #[test]
    fn test_finds_avatars_across_zone_edges() {
        let mut index = ZoneIndex::new();
        index.insert(1, CoordGrid::new(0, 100, 100));
        index.insert(2, CoordGrid::new(0, 115, 100));
        index.insert(3, CoordGrid::new(0, 116, 100));
        index.insert(4, CoordGrid::new(0, 85, 85));

        assert_eq!(query(&index, CoordGrid::new(0, 100, 100), 15), vec![1, 2, 4]);
    }

    #[test]
    fn test_levels_are_separate() {
        let mut index = ZoneIndex::new();
        index.insert(1, CoordGrid::new(0, 100, 100));
        index.insert(2, CoordGrid::new(1, 100, 100));

        assert_eq!(query(&index, CoordGrid::new(1, 101, 101), 5), vec![2]);
    }

    #[test]
    fn test_query_near_origin() {
        let mut index = ZoneIndex::new();
        index.insert(7, CoordGrid::new(0, 0, 3));
        assert_eq!(query(&index, CoordGrid::new(0, 2, 2), 15), vec![7]);
    }

    #[test]
    fn test_clear_keeps_zones() {
        let mut index = ZoneIndex::new();
        index.insert(1, CoordGrid::new(0, 10, 10));
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert!(query(&index, CoordGrid::new(0, 10, 10), 5).is_empty());
    }

    #[test]
    fn test_rebuild_drops_vacated_zones() {
        let mut repo = AvatarRepository::new(AvatarKind::Npc, 8, 8, ThreadSafetyMode::Strict);
        repo.allocate(1, SpawnParams::new(AvatarKind::Npc, CoordGrid::new(0, 10, 10)))
            .unwrap();
        let mut index = ZoneIndex::new();
        index.rebuild(&repo);
        assert_eq!(index.zone_count(), 1);

        for step in 1..=20u32 {
            let coord = CoordGrid::new(0, 10 + step * ZONE_SIZE, 10);
            repo.get_mut(1).unwrap().teleport(coord, false);
            index.rebuild(&repo);
            assert_eq!(index.zone_count(), 1);
            assert_eq!(query(&index, coord, 0), vec![1]);
        }
    }
}
