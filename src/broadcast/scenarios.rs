//! End-to-end tick scenarios, checked through the client decoder

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BroadcastConfig;
use crate::game::avatar::{AvatarKind, Direction, SpawnParams};
use crate::game::repository::{AvatarRepository, RepositoryError};
use crate::game::thread_guard::ThreadSafetyMode;
use crate::info::blocks::{
    Appearance, Chat, ExactMove, Headbar, Hitmark, MoveSpeed, SpotAnim, Tint,
};
use crate::info::catalogue::{BlockKind, BlockMask};
use crate::info::{ExtendedInfoSet, ObserverId};
use crate::net::assembler::ObserverPacket;
use crate::net::decode::PacketDecoder;
use crate::util::coord::CoordGrid;

use super::dispatcher::DispatchMode;
use super::engine::BroadcastEngine;
use super::error::BroadcastError;
use super::exceptions::ChannelExceptionHandler;
use super::filter::{AdmissionFilter, PriorityPolicy};
use super::movement::{DecodedEntry, PositionDelta};
use super::profile::ProtocolProfile;
use super::tracker::Tier;

const CENTER: CoordGrid = CoordGrid::new(0, 100, 100);
const NPC: ProtocolProfile = ProtocolProfile::NPC;

fn repo(capacity: u16) -> AvatarRepository {
    AvatarRepository::new(AvatarKind::Npc, capacity, 256, ThreadSafetyMode::Strict)
}

fn config(threshold: usize) -> BroadcastConfig {
    BroadcastConfig {
        parallel_threshold: Some(threshold),
        worker_threads: 4,
        ..BroadcastConfig::default()
    }
}

fn engine_with(config: BroadcastConfig) -> BroadcastEngine {
    BroadcastEngine::new(NPC, config).unwrap()
}

fn spawn_at(repo: &mut AvatarRepository, index: u16, coord: CoordGrid) {
    repo.allocate(index, SpawnParams::new(AvatarKind::Npc, coord))
        .unwrap();
}

/// Every block set to (close to) its largest encoding
fn fill_every_block(info: &mut ExtendedInfoSet, seed: u32) {
    info.set_appearance(Appearance {
        name: format!("npc{:09}", seed),
        gender: 0,
        skull_icon: Some(1),
        overhead_icon: Some(2),
        transmog: None,
        body: [0x100; 12],
        colours: [1; 5],
        base_animations: [808; 7],
        combat_level: 99,
        skill_level: 1000,
        hidden: false,
    });
    info.set_sequence(seed as u16, 0);
    info.set_face_pathing_entity(Some(1));
    info.set_say("s".repeat(80));
    info.set_chat(Chat {
        text: "c".repeat(80),
        colour: 0,
        effects: 0,
        mod_icon: 0,
        autotyper: false,
    });
    info.set_face_angle((seed % 2048) as u16, false);
    info.set_move_speed(MoveSpeed::Run);
    info.set_spot_anim(SpotAnim { id: 1, height: 2, delay: 3 });
    info.set_exact_move(ExactMove::default());
    for _ in 0..8 {
        info.add_hitmark(Hitmark {
            source: Some(ObserverId((seed % 7) as u16)),
            self_type: 1,
            other_type: Some(2),
            value: 10,
            delay: 0,
        });
    }
    for _ in 0..4 {
        info.add_headbar(Headbar {
            source: None,
            self_id: 0,
            other_id: Some(0),
            start_fill: 30,
            end_fill: 10,
            delay: 0,
            duration: 20,
        });
    }
    info.set_tint(Tint {
        start: 0,
        end: 10,
        hue: 1,
        saturation: 2,
        lightness: 3,
        weight: 4,
    });
}

// ============================================================================
// Movement and transitions
// ============================================================================

#[test]
fn test_step_east_is_short_delta_without_jump() {
    let mut repo = repo(16);
    spawn_at(&mut repo, 5, CENTER);
    let mut engine = engine_with(config(usize::MAX));
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    let mut client = PacketDecoder::new(NPC);

    let out = engine.process(&mut repo).unwrap();
    let packet = client.decode(&out.packets[0].payload).unwrap();
    assert!(packet.add(5).is_some());

    repo.get_mut(5).unwrap().walk_to(CENTER.translate(0, 1, 0));
    let out = engine.process(&mut repo).unwrap();
    let payload = &out.packets[0].payload;
    // active, step, no crawl, east, no extended info; then the terminator
    assert_eq!(payload, &vec![0b1010_1000, 0xFF, 0xFF]);

    let packet = client.decode(payload).unwrap();
    assert!(packet.adds.is_empty());
    assert_eq!(packet.removals().count(), 0);
    let update = packet.update(5).unwrap();
    let Some(DecodedEntry::Moved { delta, extended_info }) = update.entry else {
        panic!("expected a movement entry, got {:?}", update.entry);
    };
    assert_eq!(
        delta,
        PositionDelta::Step {
            direction: Direction::East,
            crawl: false
        }
    );
    assert!(!delta.jump());
    assert!(!extended_info);
    assert_eq!(engine.tier_of(ObserverId(0), 5, &repo), Some(Tier::High));
}

#[test]
fn test_same_tick_teleport_without_jump_adds_without_jump() {
    let mut repo = repo(16);
    spawn_at(&mut repo, 7, CENTER);
    repo.release(7).unwrap();
    let mut engine = engine_with(config(usize::MAX));
    engine.process(&mut repo).unwrap();
    assert!(!repo.is_pending_release(7));

    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    let tick = repo.tick();
    let avatar = repo
        .allocate(7, SpawnParams::new(AvatarKind::Npc, CENTER))
        .unwrap();
    assert_eq!(avatar.record().allocation_tick(), tick);
    avatar.teleport(CENTER.translate(0, 3, 3), false);
    spawn_at(&mut repo, 8, CENTER);

    let out = engine.process(&mut repo).unwrap();
    let packet = PacketDecoder::new(NPC).decode(&out.packets[0].payload).unwrap();

    let add = packet.add(7).unwrap();
    assert!(!add.jump);
    assert_eq!(add.coord, CENTER.translate(0, 3, 3));
    assert!(packet.add(8).unwrap().jump);
}

#[test]
fn test_leaving_range_emits_removal() {
    let mut repo = repo(16);
    spawn_at(&mut repo, 1, CENTER);
    spawn_at(&mut repo, 2, CENTER.translate(0, 1, 1));
    let mut engine = engine_with(config(usize::MAX));
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    let mut client = PacketDecoder::new(NPC);
    client.decode(&engine.process(&mut repo).unwrap().packets[0].payload).unwrap();

    repo.get_mut(2).unwrap().teleport(CENTER.translate(0, 40, 0), true);
    let out = engine.process(&mut repo).unwrap();
    let packet = client.decode(&out.packets[0].payload).unwrap();

    assert_eq!(packet.removals().collect::<Vec<_>>(), vec![2]);
    assert_eq!(packet.update(1).unwrap().entry, None);
    assert_eq!(client.high_res(), &[1]);
    assert_eq!(engine.tier_of(ObserverId(0), 2, &repo), Some(Tier::Low));
}

#[test]
fn test_own_avatar_hidden_and_view_follows_it() {
    let mut repo = repo(16);
    spawn_at(&mut repo, 0, CENTER);
    spawn_at(&mut repo, 1, CENTER.translate(0, 2, 0));
    let mut engine = engine_with(config(usize::MAX));
    engine
        .register_observer(ObserverId(0), CoordGrid::new(0, 3000, 3000), Some(0))
        .unwrap();

    engine.process(&mut repo).unwrap();

    let observer = engine.observer(ObserverId(0)).unwrap();
    assert_eq!(observer.coord(), CENTER);
    assert_eq!(observer.tracker().high_res(), &[1]);
}

#[test]
fn test_tiers_match_client_view_over_many_ticks() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut repo = repo(64);
    for index in 0..40 {
        let coord = CENTER.translate(0, rng.gen_range(-20..=20), rng.gen_range(-20..=20));
        spawn_at(&mut repo, index, coord);
    }

    let mut engine = engine_with(config(2));
    let mut clients = Vec::new();
    for id in 0..3u16 {
        let coord = CENTER.translate(0, id as i32 * 6, 0);
        engine.register_observer(ObserverId(id), coord, None).unwrap();
        clients.push(PacketDecoder::new(NPC));
    }

    for tick in 0..12 {
        let out = engine.process(&mut repo).unwrap();
        assert!(out.failed.is_empty());

        for (id, client) in clients.iter_mut().enumerate() {
            let observer = ObserverId(id as u16);
            client.decode(&out.packet(observer).unwrap().payload).unwrap();
            let tracker = engine.observer_tracker(observer).unwrap();
            assert_eq!(tracker.high_res(), client.high_res());

            for index in 0..64u16 {
                let tier = engine.tier_of(observer, index, &repo).unwrap();
                let in_client = client.high_res().binary_search(&index).is_ok();
                match tier {
                    Tier::High => assert!(in_client),
                    Tier::Low => assert!(!in_client && repo.get(index).is_some()),
                    Tier::Absent => assert!(!in_client && repo.get(index).is_none()),
                }
            }
        }

        let live: Vec<u16> = repo.iter().map(|a| a.index()).collect();
        for index in live {
            if rng.gen_bool(0.05) {
                repo.release(index).unwrap();
                continue;
            }
            let avatar = repo.get_mut(index).unwrap();
            let step = Direction::ALL[rng.gen_range(0..8)];
            let (dx, dz) = step.delta();
            let to = avatar.record().current_coord().translate(0, dx, dz);
            avatar.walk_to(to);
            if rng.gen_bool(0.2) {
                avatar.info_mut().set_say(format!("tick {tick}"));
            }
        }
        if rng.gen_bool(0.5) {
            let coord = CENTER.translate(0, rng.gen_range(-10..=10), rng.gen_range(-10..=10));
            repo.allocate_next(SpawnParams::new(AvatarKind::Npc, coord))
                .unwrap();
        }
    }
}

// ============================================================================
// Extended info
// ============================================================================

#[test]
fn test_refused_info_is_retried_and_delivered_once() {
    let mut repo = repo(16);
    for index in 1..=6 {
        spawn_at(&mut repo, index, CENTER);
        repo.get_mut(index).unwrap().info_mut().set_say("x".repeat(30));
    }
    let mut engine = engine_with(BroadcastConfig {
        extended_info_ceiling: 100,
        priority_policy: PriorityPolicy::Uniform,
        soft_limit: 250,
        ..config(usize::MAX)
    });
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    let mut client = PacketDecoder::new(NPC);
    let mut deliveries = [0u32; 7];

    for tick in 0..3 {
        let out = engine.process(&mut repo).unwrap();
        let packet = &out.packets[0];
        assert!(packet.len() <= 250);
        match tick {
            0 => {
                assert_eq!(packet.stats.info_written, 3);
                assert_eq!(packet.stats.info_deferred, 3);
                for index in 1..=6 {
                    assert_eq!(engine.tier_of(ObserverId(0), index, &repo), Some(Tier::High));
                }
                // refused blocks are still pending
                for index in 4..=6 {
                    assert!(repo.get(index).unwrap().info().is_dirty());
                }
            }
            1 => assert_eq!(packet.stats.info_written, 3),
            _ => assert_eq!(packet.stats.info_written, 0),
        }

        let decoded = client.decode(&packet.payload).unwrap();
        for info in &decoded.extended_info {
            let say = info.block(BlockKind::Say).unwrap();
            assert_eq!(say.len(), 31);
            deliveries[info.index as usize] += 1;
        }
    }

    assert_eq!(&deliveries[1..], &[1; 6]);
    for index in 1..=6 {
        let info = repo.get(index).unwrap().info();
        assert!(!info.is_dirty());
        assert_eq!(info.flush_count(), 1);
    }
}

/// Refuses only the `refused`-th call, counted from one
struct RefuseNth {
    refused: usize,
    calls: AtomicUsize,
}

impl AdmissionFilter for RefuseNth {
    fn accept(&self, _writable: usize, _mask: BlockMask, _remaining: usize, _seen: bool) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst) + 1 != self.refused
    }
}

#[test]
fn test_block_pending_for_slow_observer_not_resent_to_others() {
    let mut repo = repo(4);
    spawn_at(&mut repo, 1, CENTER);
    repo.get_mut(1).unwrap().info_mut().set_say("hello");
    let filter = RefuseNth { refused: 2, calls: AtomicUsize::new(0) };
    let mut engine = engine_with(config(usize::MAX)).with_filter(Arc::new(filter));
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    engine.register_observer(ObserverId(1), CENTER, None).unwrap();
    let mut clients = [PacketDecoder::new(NPC), PacketDecoder::new(NPC)];
    let mut says = [0u32; 2];

    for tick in 0..3 {
        if tick == 1 {
            repo.get_mut(1).unwrap().info_mut().set_sequence(808, 0);
        }
        let out = engine.process(&mut repo).unwrap();
        assert_eq!(out.mode, DispatchMode::Inline);
        for packet in &out.packets {
            let id = packet.observer.0 as usize;
            let decoded = clients[id].decode(&packet.payload).unwrap();
            let Some(info) = decoded.info(1) else {
                continue;
            };
            if info.block(BlockKind::Say).is_some() {
                says[id] += 1;
            }
            if (id, tick) == (0, 1) {
                assert_eq!(info.mask.iter().collect::<Vec<_>>(), vec![BlockKind::Sequence]);
            }
            if (id, tick) == (1, 1) {
                assert!(info.block(BlockKind::Sequence).is_some());
            }
        }
        if tick == 0 {
            // observer 1 was refused, so the say is still pending
            assert!(repo.get(1).unwrap().info().is_dirty());
        }
    }

    assert_eq!(says, [1, 1]);
    assert!(!repo.get(1).unwrap().info().is_dirty());
}

#[test]
fn test_shared_block_cleared_once_after_every_reader() {
    let mut repo = repo(4);
    spawn_at(&mut repo, 1, CENTER);
    let mut engine = engine_with(config(1));
    let mut clients = Vec::new();
    for id in 0..64 {
        engine.register_observer(ObserverId(id), CENTER, None).unwrap();
        clients.push(PacketDecoder::new(NPC));
    }

    for round in 0..20u64 {
        let text = format!("round {round}");
        repo.get_mut(1).unwrap().info_mut().set_say(text.clone());

        let out = engine.process(&mut repo).unwrap();
        assert_eq!(out.mode, DispatchMode::Parallel);
        assert_eq!(out.packets.len(), 64);

        let mut expected = text.into_bytes();
        expected.push(0);
        for packet in &out.packets {
            let client = &mut clients[packet.observer.0 as usize];
            let decoded = client.decode(&packet.payload).unwrap();
            assert_eq!(decoded.info(1).unwrap().block(BlockKind::Say), Some(&expected[..]));
        }

        let info = repo.get(1).unwrap().info();
        assert!(!info.is_dirty());
        assert_eq!(info.flush_count(), round + 1);
    }
}

#[test]
fn test_observer_dependent_blocks() {
    let mut repo = repo(4);
    spawn_at(&mut repo, 1, CENTER);
    {
        let info = repo.get_mut(1).unwrap().info_mut();
        info.add_hitmark(Hitmark {
            source: Some(ObserverId(1)),
            self_type: 5,
            other_type: Some(6),
            value: 10,
            delay: 0,
        });
        info.set_tint_for(ObserverId(2), Tint { weight: 9, ..Tint::default() });
    }
    let mut engine = engine_with(config(usize::MAX));
    engine.register_observer(ObserverId(1), CENTER, None).unwrap();
    engine.register_observer(ObserverId(2), CENTER, None).unwrap();

    let out = engine.process(&mut repo).unwrap();
    let source = PacketDecoder::new(NPC)
        .decode(&out.packet(ObserverId(1)).unwrap().payload)
        .unwrap();
    let bystander = PacketDecoder::new(NPC)
        .decode(&out.packet(ObserverId(2)).unwrap().payload)
        .unwrap();

    let source_info = source.info(1).unwrap();
    assert_eq!(source_info.block(BlockKind::Hit), Some(&[1, 0, 5, 0, 10, 0, 0][..]));
    assert_eq!(source_info.block(BlockKind::Tint), None);

    let bystander_info = bystander.info(1).unwrap();
    assert_eq!(bystander_info.block(BlockKind::Hit), Some(&[1, 0, 6, 0, 10, 0, 0][..]));
    assert_eq!(bystander_info.block(BlockKind::Tint).map(|t| t[7]), Some(9));
}

#[test]
fn test_persistent_blocks_sent_on_add() {
    let mut repo = repo(4);
    spawn_at(&mut repo, 1, CENTER);
    repo.get_mut(1).unwrap().info_mut().set_move_speed(MoveSpeed::Run);
    let mut engine = engine_with(config(usize::MAX));
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    engine.process(&mut repo).unwrap();

    // a later observer still learns the persistent move speed
    engine.register_observer(ObserverId(1), CENTER, None).unwrap();
    let out = engine.process(&mut repo).unwrap();
    let late = PacketDecoder::new(NPC)
        .decode(&out.packet(ObserverId(1)).unwrap().payload)
        .unwrap();
    assert_eq!(late.info(1).unwrap().block(BlockKind::MoveSpeed), Some(&[2][..]));
    assert_eq!(out.packet(ObserverId(0)).unwrap().stats.info_written, 0);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_encoder_failure_is_isolated_and_reported() {
    let mut repo = repo(4);
    spawn_at(&mut repo, 1, CENTER);
    spawn_at(&mut repo, 2, CENTER);
    repo.get_mut(1).unwrap().info_mut().set_say("ok");
    repo.get_mut(2).unwrap().info_mut().set_say("x".repeat(81));

    let (handler, faults) = ChannelExceptionHandler::new(16);
    let mut engine = engine_with(config(usize::MAX)).with_exception_handler(Arc::new(handler));
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    let mut client = PacketDecoder::new(NPC);

    let out = engine.process(&mut repo).unwrap();
    assert!(out.failed.is_empty());
    let packet = client.decode(&out.packets[0].payload).unwrap();
    assert_eq!(packet.info(1).unwrap().block(BlockKind::Say), Some(&b"ok\0"[..]));
    assert!(packet.info(2).is_none());
    assert!(packet.add(2).is_some());

    let fault = faults.try_recv().unwrap();
    assert_eq!(fault.avatar, Some(2));
    assert_eq!(fault.observer, None);
    assert!(matches!(fault.error, BroadcastError::Encode { avatar: 2, .. }));

    // repaired by the game layer, delivered next tick
    repo.get_mut(2).unwrap().info_mut().set_say("fixed");
    let out = engine.process(&mut repo).unwrap();
    let packet = client.decode(&out.packets[0].payload).unwrap();
    assert_eq!(packet.info(2).unwrap().block(BlockKind::Say), Some(&b"fixed\0"[..]));
}

#[test]
fn test_capacity_violation_fails_only_that_observer() {
    let mut repo = repo(8);
    for index in 0..4 {
        spawn_at(&mut repo, index, CENTER);
    }
    let (handler, faults) = ChannelExceptionHandler::new(16);
    let mut engine = engine_with(BroadcastConfig {
        hard_capacity: 16,
        soft_limit: 16,
        ..config(usize::MAX)
    })
    .with_exception_handler(Arc::new(handler));
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    engine.register_observer(ObserverId(1), CoordGrid::new(1, 100, 100), None).unwrap();

    let out = engine.process(&mut repo).unwrap();
    assert_eq!(out.failed, vec![ObserverId(0)]);
    assert!(out.packet(ObserverId(0)).is_none());
    assert!(out.packet(ObserverId(1)).is_some());
    assert_eq!(engine.tier_of(ObserverId(0), 0, &repo), Some(Tier::Low));

    let fault = faults.try_recv().unwrap();
    assert!(matches!(
        fault.error,
        BroadcastError::CapacityExceeded { required: 52, capacity: 16, .. }
    ));
}

#[test]
fn test_process_from_foreign_thread_rejected() {
    let mut repo = repo(4);
    let mut engine = engine_with(config(usize::MAX));
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let result = engine.process(&mut repo);
            assert!(matches!(result, Err(BroadcastError::ThreadViolation(_))));
        });
    });
}

#[test]
fn test_repository_larger_than_index_space_rejected() {
    let mut repo = AvatarRepository::new(AvatarKind::Player, 4096, 256, ThreadSafetyMode::Strict);
    repo.allocate(3000, SpawnParams::new(AvatarKind::Player, CENTER))
        .unwrap();
    let mut engine = BroadcastEngine::new(ProtocolProfile::PLAYER, config(usize::MAX)).unwrap();
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();

    assert!(matches!(engine.process(&mut repo), Err(BroadcastError::Config(_))));
    assert_eq!(engine.tier_of(ObserverId(0), 3000, &repo), Some(Tier::Low));
}

#[test]
fn test_duplicate_observer_rejected() {
    let mut engine = engine_with(config(usize::MAX));
    engine.register_observer(ObserverId(3), CENTER, None).unwrap();
    assert!(matches!(
        engine.register_observer(ObserverId(3), CENTER, None),
        Err(BroadcastError::DuplicateObserver { .. })
    ));
    assert!(engine.unregister_observer(ObserverId(3)));
    assert_eq!(engine.observer_count(), 0);
}

// ============================================================================
// Index reuse
// ============================================================================

#[test]
fn test_index_reused_only_after_removal() {
    let mut repo = repo(8);
    spawn_at(&mut repo, 3, CENTER);
    repo.get_mut(3).unwrap().info_mut().set_say("before");
    let mut engine = engine_with(config(usize::MAX));
    engine.register_observer(ObserverId(0), CENTER, None).unwrap();
    let mut client = PacketDecoder::new(NPC);
    client.decode(&engine.process(&mut repo).unwrap().packets[0].payload).unwrap();

    repo.release(3).unwrap();
    assert_eq!(
        repo.allocate(3, SpawnParams::new(AvatarKind::Npc, CENTER)).err(),
        Some(RepositoryError::IndexPendingRelease { index: 3 })
    );

    let out = engine.process(&mut repo).unwrap();
    let packet = client.decode(&out.packets[0].payload).unwrap();
    assert_eq!(packet.removals().collect::<Vec<_>>(), vec![3]);
    assert_eq!(out.stats.released, 1);

    let elsewhere = CENTER.translate(0, 4, 0);
    let avatar = repo
        .allocate(3, SpawnParams::new(AvatarKind::Npc, elsewhere))
        .unwrap();
    assert_eq!(*avatar.info(), ExtendedInfoSet::new());
    assert_eq!(avatar.record().previous_coord(), elsewhere);
    assert_eq!(repo.pool_stats().hits, 1);

    let out = engine.process(&mut repo).unwrap();
    let packet = client.decode(&out.packets[0].payload).unwrap();
    assert_eq!(packet.add(3).unwrap().coord, elsewhere);
    assert!(packet.info(3).is_none());
}

// ============================================================================
// Budget and determinism under load
// ============================================================================

fn crowded_world(avatars: u16, observers: u16) -> (AvatarRepository, Vec<(ObserverId, CoordGrid)>) {
    let mut rng = StdRng::seed_from_u64(5);
    let mut repo = AvatarRepository::new(AvatarKind::Npc, avatars + 1, 0, ThreadSafetyMode::Strict);
    for index in 0..avatars {
        let coord = CENTER.translate(0, rng.gen_range(-12..=12), rng.gen_range(-12..=12));
        let params = SpawnParams::new(AvatarKind::Npc, coord).with_variant(rng.gen_range(0..5000));
        repo.allocate(index, params).unwrap();
    }
    let viewers = (0..observers)
        .map(|id| {
            let coord = CENTER.translate(0, rng.gen_range(-6..=6), rng.gen_range(-6..=6));
            (ObserverId(id), coord)
        })
        .collect();
    (repo, viewers)
}

/// Run `ticks` fully dirty ticks and return every packet plus the last mode
fn run_crowd(
    avatars: u16,
    observers: u16,
    ticks: usize,
    config: BroadcastConfig,
) -> (Vec<Vec<ObserverPacket>>, DispatchMode) {
    let (mut repo, viewers) = crowded_world(avatars, observers);
    let mut engine = engine_with(config);
    for (id, coord) in viewers {
        engine.register_observer(id, coord, None).unwrap();
    }

    let mut rng = StdRng::seed_from_u64(6);
    let mut produced = Vec::new();
    let mut mode = DispatchMode::Inline;
    for _ in 0..ticks {
        for index in 0..avatars {
            let avatar = repo.get_mut(index).unwrap();
            fill_every_block(avatar.info_mut(), index as u32);
            let (dx, dz) = Direction::ALL[rng.gen_range(0..8)].delta();
            let to = avatar.record().current_coord().translate(0, dx, dz);
            avatar.walk_to(to);
        }
        let out = engine.process(&mut repo).unwrap();
        assert!(out.failed.is_empty(), "failed units: {:?}", out.failed);
        mode = out.mode;
        produced.push(out.packets);
    }
    (produced, mode)
}

#[test]
fn test_packets_stay_within_budget_with_every_block_at_maximum() {
    for policy in [PriorityPolicy::default(), PriorityPolicy::Uniform] {
        let config = BroadcastConfig {
            priority_policy: policy,
            ..config(2)
        };
        let soft_limit = config.soft_limit;
        let hard_capacity = config.hard_capacity;
        let (ticks, _) = run_crowd(300, 8, 4, config);

        let mut deferred = 0;
        for packets in &ticks {
            assert_eq!(packets.len(), 8);
            for packet in packets {
                assert!(packet.len() <= soft_limit, "{} > {}", packet.len(), soft_limit);
                assert!(packet.len() <= hard_capacity);
                deferred += packet.stats.info_deferred;
            }
        }
        assert!(deferred > 0, "load too light to exercise the filter");
    }
}

#[test]
fn test_parallel_output_matches_inline() {
    let (inline, inline_mode) = run_crowd(300, 200, 3, config(usize::MAX));
    let (parallel, parallel_mode) = run_crowd(300, 200, 3, config(1));

    assert_eq!(inline_mode, DispatchMode::Inline);
    assert_eq!(parallel_mode, DispatchMode::Parallel);
    assert_eq!(inline.len(), parallel.len());
    for (a, b) in inline.iter().zip(&parallel) {
        assert_eq!(a, b);
    }
}

#[test]
#[ignore = "full-size load: 2000 observers, 1500 avatars"]
fn test_parallel_output_matches_inline_full_size() {
    let (inline, _) = run_crowd(1500, 2000, 1, config(usize::MAX));
    let (parallel, mode) = run_crowd(1500, 2000, 1, config(1));
    assert_eq!(mode, DispatchMode::Parallel);
    assert_eq!(inline, parallel);
}
