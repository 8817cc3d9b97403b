use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use avatar_broadcast::broadcast::{BroadcastEngine, ProtocolProfile};
use avatar_broadcast::config::BroadcastConfig;
use avatar_broadcast::game::avatar::{AvatarKind, Direction, SpawnParams};
use avatar_broadcast::game::repository::AvatarRepository;
use avatar_broadcast::info::ObserverId;
use avatar_broadcast::metrics::{self, Metrics};
use avatar_broadcast::util::coord::CoordGrid;

/// Centre of the simulated area
const ORIGIN: CoordGrid = CoordGrid::new(0, 3200, 3200);
/// Half-width of the simulated area in tiles
const AREA: i32 = 48;
/// Log a summary every this many ticks
const SUMMARY_INTERVAL: u32 = 100;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn random_coord(rng: &mut StdRng) -> CoordGrid {
    ORIGIN.translate(0, rng.gen_range(-AREA..=AREA), rng.gen_range(-AREA..=AREA))
}

fn spawn_npc(repository: &mut AvatarRepository, rng: &mut StdRng) -> anyhow::Result<u16> {
    let params = SpawnParams::new(AvatarKind::Npc, random_coord(rng))
        .with_variant(rng.gen_range(0..8000))
        .with_facing(Direction::ALL[rng.gen_range(0..8)]);
    Ok(repository.allocate_next(params)?)
}

/// Move, talk, despawn and respawn NPCs the way a game tick would
fn simulate_world(repository: &mut AvatarRepository, rng: &mut StdRng) -> anyhow::Result<()> {
    let live: Vec<u16> = repository.iter().map(|a| a.index()).collect();
    let mut despawned = 0;

    for index in live {
        if rng.gen_bool(0.002) {
            repository.release(index)?;
            despawned += 1;
            continue;
        }

        let avatar = repository.get_mut(index)?;
        let from = avatar.record().current_coord();
        let (dx, dz) = Direction::ALL[rng.gen_range(0..8)].delta();
        let roll: f64 = rng.gen();
        if roll < 0.01 {
            let to = random_coord(rng);
            avatar.teleport(to, rng.gen_bool(0.5));
        } else if roll < 0.1 {
            avatar.run_to(from.translate(0, dx * 2, dz * 2));
        } else if roll < 0.4 {
            avatar.walk_to(from.translate(0, dx, dz));
        }

        if rng.gen_bool(0.02) {
            let line = format!("Tile {}", avatar.record().current_coord());
            avatar.info_mut().set_say(line);
        }
        if rng.gen_bool(0.05) {
            avatar.info_mut().set_sequence(rng.gen_range(0..9000), 0);
        }
    }

    // Pending indices are skipped by allocate_next; a full repository just
    // waits for the next tick.
    for _ in 0..despawned {
        if spawn_npc(repository, rng).is_err() {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Avatar broadcast simulator v{}", env!("CARGO_PKG_VERSION"));

    let config = BroadcastConfig::load_or_default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    let npc_count: u16 = env_or("SIM_NPCS", 1500);
    let observer_count: u16 = env_or("SIM_OBSERVERS", 200);
    info!(
        "Configuration loaded: {} NPCs, {} observers, tick={}ms, soft_limit={}",
        npc_count, observer_count, config.tick_duration_ms, config.soft_limit
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let profile = ProtocolProfile::NPC;
    let mut repository = AvatarRepository::new(
        AvatarKind::Npc,
        profile.index_capacity(),
        config.pool_capacity,
        config.thread_safety_mode,
    );
    let mut engine = BroadcastEngine::new(profile, config.clone())
        .context("creating broadcast engine")?
        .with_metrics(metrics.clone());

    let mut rng = StdRng::from_entropy();
    for _ in 0..npc_count {
        spawn_npc(&mut repository, &mut rng)?;
    }
    for id in 0..observer_count {
        engine.register_observer(ObserverId(id), random_coord(&mut rng), None)?;
    }

    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_duration_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // The repository is bound to this thread, so ticks run here rather than
    // in a spawned task.
    loop {
        tokio::select! {
            _ = interval.tick() => {
                simulate_world(&mut repository, &mut rng)?;
                match engine.process(&mut repository) {
                    Ok(output) if output.tick % SUMMARY_INTERVAL == 0 => {
                        info!(
                            "Tick {}: {} packets, {} bytes, largest {} ({:?}) - {}",
                            output.tick,
                            output.stats.packets,
                            output.stats.bytes,
                            output.stats.largest_packet,
                            output.mode,
                            engine.budget().status_message()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Tick failed: {}", e),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Simulator stopped");
    Ok(())
}
