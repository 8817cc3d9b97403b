//! Per-observer work unit
//!
//! An [`Observer`] owns everything one client's buffer needs: its tracker,
//! the plan for the current tick, and scratch buffers reused across ticks.
//! Units read shared avatars only; the single shared write (consuming a
//! scheduled read) happens after the unit's packet has been assembled.

use tracing::trace;

use crate::game::avatar::{Avatar, AvatarRecord};
use crate::game::constants::{view, wire};
use crate::game::repository::AvatarRepository;
use crate::game::zone::RangeQuery;
use crate::info::ObserverId;
use crate::net::assembler::{assemble, ObserverPacket, PacketStats};
use crate::net::bits::BitWriter;
use crate::util::coord::CoordGrid;

use super::error::BroadcastError;
use super::exceptions::{AvatarFault, ExceptionHandler};
use super::filter::AdmissionFilter;
use super::movement::PositionDelta;
use super::profile::ProtocolProfile;
use super::tracker::{InfoOutcome, PlannedRead, PlannedUpdate, ResolutionTracker, TickPlan};

/// Shared, read-only inputs of every unit in a tick
pub(crate) struct UnitContext<'a> {
    pub tick: u32,
    pub repository: &'a AvatarRepository,
    pub ranges: &'a dyn RangeQuery,
    pub profile: ProtocolProfile,
    pub filter: &'a dyn AdmissionFilter,
    pub handler: &'a dyn ExceptionHandler,
    pub soft_limit: usize,
    pub hard_capacity: usize,
}

/// Budget inputs for one entry's extended info
#[derive(Clone, Copy)]
struct EntryBudget {
    /// Worst-case bits of this entry and every one after it
    pending_bits: usize,
    remaining: usize,
    previously_observed: bool,
}

#[derive(Default)]
struct Scratch {
    bits: BitWriter,
    info: Vec<u8>,
    candidates: Vec<u16>,
    outcomes: Vec<InfoOutcome>,
    /// Scheduled reads to consume once the packet is built: (index, deferred)
    reads: Vec<(u16, bool)>,
}

impl Scratch {
    fn reset(&mut self) {
        self.bits.clear();
        self.info.clear();
        self.outcomes.clear();
        self.reads.clear();
    }

    /// Write `avatar`'s extended info if the filter admits it. Returns
    /// whether bytes were written and the outcome for the tracker.
    fn write_info(
        &mut self,
        ctx: &UnitContext<'_>,
        observer: ObserverId,
        avatar: &Avatar,
        read: PlannedRead,
        budget: EntryBudget,
        stats: &mut PacketStats,
    ) -> (bool, InfoOutcome) {
        if !read.wants_info() {
            return (false, InfoOutcome::NotRequested);
        }
        if read.blocked {
            return (false, InfoOutcome::Withheld);
        }

        let index = avatar.index();
        let info = avatar.info();
        let dirty_since = read.scheduled.then_some(read.seen);
        let mask = info.observer_mask(observer, dirty_since, read.persistent);
        if mask.is_empty() {
            if read.scheduled {
                self.reads.push((index, false));
            }
            return (false, InfoOutcome::Delivered);
        }

        let projected = (self.bits.bit_len() + budget.pending_bits).div_ceil(8) + self.info.len();
        let writable = ctx.soft_limit.saturating_sub(projected);
        if !ctx
            .filter
            .accept(writable, mask, budget.remaining, budget.previously_observed)
        {
            trace!(observer = observer.0, index, writable, "extended info deferred");
            stats.info_deferred += 1;
            if read.scheduled {
                self.reads.push((index, true));
            }
            return (false, InfoOutcome::Withheld);
        }

        match info.write_blocks(observer, mask, &mut self.info) {
            Ok(_) => {
                stats.info_written += 1;
                if read.scheduled {
                    self.reads.push((index, false));
                }
                (true, InfoOutcome::Delivered)
            }
            Err(source) => {
                stats.info_faults += 1;
                ctx.handler.on_fault(AvatarFault {
                    tick: ctx.tick,
                    observer: Some(observer),
                    avatar: Some(index),
                    error: BroadcastError::Encode {
                        avatar: index,
                        source,
                    },
                });
                if read.scheduled {
                    self.reads.push((index, true));
                }
                (false, InfoOutcome::Withheld)
            }
        }
    }
}

/// A receiving client and its view state
pub struct Observer {
    id: ObserverId,
    coord: CoordGrid,
    radius: u32,
    /// The observer's own avatar, never shown to itself
    avatar: Option<u16>,
    tracker: ResolutionTracker,
    plan: TickPlan,
    planned: bool,
    scratch: Scratch,
}

impl Observer {
    pub fn new(
        id: ObserverId,
        coord: CoordGrid,
        radius: u32,
        avatar: Option<u16>,
        profile: ProtocolProfile,
    ) -> Self {
        Self {
            id,
            coord,
            radius: radius.min(view::MAX_RADIUS),
            avatar,
            tracker: ResolutionTracker::new(profile),
            plan: TickPlan::default(),
            planned: false,
            scratch: Scratch::default(),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// View centre; follows the observer's own avatar when it has one
    pub fn coord(&self) -> CoordGrid {
        self.coord
    }

    pub fn set_coord(&mut self, coord: CoordGrid) {
        self.coord = coord;
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: u32) {
        self.radius = radius.min(view::MAX_RADIUS);
    }

    pub fn avatar(&self) -> Option<u16> {
        self.avatar
    }

    pub fn tracker(&self) -> &ResolutionTracker {
        &self.tracker
    }

    /// Forget the client view, as after a reconnect
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.plan.clear();
        self.planned = false;
    }

    // ========================================================================
    // Resolution pass
    // ========================================================================

    pub(crate) fn plan_tick(&mut self, ctx: &UnitContext<'_>) -> Result<(), BroadcastError> {
        self.planned = false;
        if let Some(own) = self.avatar.and_then(|index| ctx.repository.get(index)) {
            self.coord = own.record().current_coord();
        }

        let candidates = &mut self.scratch.candidates;
        candidates.clear();
        ctx.ranges.collect_in_range(self.coord, self.radius, candidates);
        candidates.sort_unstable();
        candidates.dedup();
        if let Some(own) = self.avatar {
            candidates.retain(|&index| index != own);
        }

        self.tracker
            .plan(self.id, candidates, ctx.repository, &mut self.plan)?;
        for index in self.plan.scheduled_reads() {
            if let Some(avatar) = ctx.repository.get(index) {
                avatar.schedule_read();
            }
        }
        self.planned = true;
        Ok(())
    }

    // ========================================================================
    // Encode pass
    // ========================================================================

    /// Build this tick's packet. `None` when the resolution pass failed.
    pub(crate) fn encode_tick(
        &mut self,
        ctx: &UnitContext<'_>,
    ) -> Result<Option<ObserverPacket>, BroadcastError> {
        if !self.planned {
            return Ok(None);
        }
        self.planned = false;

        let Self {
            id,
            tracker,
            plan,
            scratch,
            ..
        } = self;
        let id = *id;
        let profile = ctx.profile;
        scratch.reset();

        let mut stats = PacketStats::default();
        let total = plan.len();
        let mut pending_bits = plan.updates.len() * profile.max_update_bits()
            + plan.adds.len() * profile.max_add_bits()
            + profile.index_bits as usize;
        let mut written_entries = 0usize;

        for update in &plan.updates {
            written_entries += 1;
            match *update {
                PlannedUpdate::Remove { .. } => {
                    scratch.bits.write_bool(true);
                    PositionDelta::write_removal(&mut scratch.bits);
                    scratch.outcomes.push(InfoOutcome::NotRequested);
                    stats.removals += 1;
                }
                PlannedUpdate::Keep { index, read } => {
                    let avatar = planned_avatar(ctx, id, index)?;
                    let budget = EntryBudget {
                        pending_bits,
                        remaining: total - written_entries,
                        previously_observed: true,
                    };
                    let (extended_info, outcome) =
                        scratch.write_info(ctx, id, avatar, read, budget, &mut stats);

                    let delta = PositionDelta::classify(avatar.record());
                    if delta == PositionDelta::Stationary && !extended_info {
                        scratch.bits.write_bool(false);
                        stats.idle += 1;
                    } else {
                        scratch.bits.write_bool(true);
                        delta.write(&mut scratch.bits, extended_info);
                        stats.active += 1;
                    }
                    scratch.outcomes.push(outcome);
                }
            }
            pending_bits -= profile.max_update_bits();
        }

        for add in &plan.adds {
            written_entries += 1;
            let avatar = planned_avatar(ctx, id, add.index)?;
            check_variant(id, avatar.record(), &profile)?;
            let budget = EntryBudget {
                pending_bits,
                remaining: total - written_entries,
                previously_observed: false,
            };
            let (extended_info, outcome) =
                scratch.write_info(ctx, id, avatar, add.read, budget, &mut stats);
            write_add(&mut scratch.bits, &profile, ctx.tick, avatar.record(), extended_info);
            scratch.outcomes.push(outcome);
            stats.adds += 1;
            pending_bits -= profile.max_add_bits();
        }
        scratch.bits.write(profile.index_bits, profile.terminator());

        let packet = assemble(
            id,
            ctx.tick,
            &mut scratch.bits,
            &scratch.info,
            ctx.hard_capacity,
            stats,
        )?;

        for &(index, deferred) in &scratch.reads {
            if let Some(avatar) = ctx.repository.get(index) {
                avatar.finish_read(deferred);
            }
        }
        tracker.commit(plan, &scratch.outcomes);
        Ok(Some(packet))
    }
}

fn planned_avatar<'a>(
    ctx: &UnitContext<'a>,
    observer: ObserverId,
    index: u16,
) -> Result<&'a Avatar, BroadcastError> {
    ctx.repository
        .get(index)
        .ok_or_else(|| BroadcastError::ProtocolViolation {
            observer,
            avatar: Some(index),
            reason: "planned avatar disappeared during the tick".to_string(),
        })
}

fn check_variant(
    observer: ObserverId,
    record: &AvatarRecord,
    profile: &ProtocolProfile,
) -> Result<(), BroadcastError> {
    if record.variant() > profile.max_variant() {
        return Err(BroadcastError::ProtocolViolation {
            observer,
            avatar: Some(record.index()),
            reason: format!(
                "variant {} does not fit in {} bits",
                record.variant(),
                profile.variant_bits
            ),
        });
    }
    Ok(())
}

/// Jump is implied for an add, except for an avatar allocated this tick
/// that teleported without jumping.
pub(crate) fn add_jump(record: &AvatarRecord, tick: u32) -> bool {
    let movement = record.movement();
    let same_tick_glide =
        record.allocation_tick() == tick && movement.teleport && !movement.teleport_jump;
    !same_tick_glide
}

fn write_add(
    bits: &mut BitWriter,
    profile: &ProtocolProfile,
    tick: u32,
    record: &AvatarRecord,
    extended_info: bool,
) {
    let coord = record.current_coord();
    bits.write(profile.index_bits, record.index() as u32);
    bits.write_bool(extended_info);
    bits.write_bool(add_jump(record, tick));
    bits.write(wire::LEVEL_BITS, coord.level());
    bits.write(wire::COORD_BITS, coord.x());
    bits.write(wire::COORD_BITS, coord.z());
    bits.write(wire::FACING_BITS, record.facing().id());
    bits.write(profile.variant_bits, record.variant());
    if profile.spawn_tick {
        let spawned = record.spawn_tick() != 0;
        bits.write_bool(spawned);
        if spawned {
            bits.write(wire::SPAWN_TICK_BITS, record.spawn_tick());
        }
    }
}
