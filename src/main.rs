//! Replica Net Demo
//!
//! One host and two clients on an in-memory session with simulated loss.
//! The host spawns a few entities before the barrier, hands a predicted
//! player to the first guest and the loop reports desync and proxy counts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use glam::Vec3;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use replica_net::{
    core::hash::short_hex,
    game::{
        collision::{CollisionWorld, LAYER_WORLD},
        input::RawInput,
        movement::MovementModel,
        player_movement::{PlayerMovement, PLAYER_MOVEMENT},
    },
    network::memory::MemoryTransport,
    replication::template::ChildTemplate,
    BehaviourRegistry, EntityTemplate, LinkConditions, MemoryNetwork, NetConfig, Peer, PeerId, TemplateCatalog,
    Transform, VERSION,
};

const HOST: PeerId = PeerId(1);
const PILOT: PeerId = PeerId(2);
const WATCHER: PeerId = PeerId(3);

const PLAYER_TEMPLATE: i32 = 1;
const CRATE_TEMPLATE: i32 = 5;
const CART_TEMPLATE: i32 = 6;

const FRAME_HZ: f32 = 60.0;
const DEMO_SECONDS: f32 = 6.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NetConfig::from_env().context("reading REPLICA_* overrides")?;
    info!("Replica Net demo v{}", VERSION);
    info!(
        "Server: {} Hz, only changes: {}, barrier timeout: {:?}",
        config.server.tick_hz, config.server.only_send_changes, config.server.barrier_timeout_secs
    );

    let catalog = Arc::new(demo_catalog().context("building template catalog")?);
    let model = Arc::new(MovementModel::new(config.movement.clone(), demo_world()));
    info!(
        "Fingerprints: catalog {}, movement {}",
        short_hex(&catalog.fingerprint()),
        short_hex(&model.config.fingerprint())
    );

    let mut behaviours = BehaviourRegistry::new();
    PlayerMovement::register(&mut behaviours, model, config.client.input_rate_hz);
    let behaviours = Arc::new(behaviours);

    let net = MemoryNetwork::new(
        HOST,
        LinkConditions {
            unreliable_loss: 0.05,
            unreliable_reorder: 0.05,
            ..Default::default()
        },
    );
    let mut peers: Vec<Peer<MemoryTransport>> = [HOST, PILOT, WATCHER]
        .into_iter()
        .map(|id| Peer::new(net.join(id), &config, catalog.clone(), behaviours.clone()))
        .collect();

    // World content registered before anyone is ready rides in the snapshot.
    let avatar = {
        let (server, router) = peers[0].server_mut().context("host peer has no server role")?;
        server.spawn(CRATE_TEMPLATE, Transform::from_position(Vec3::new(3.0, 0.0, 3.0)), None, router)?;
        server.spawn(CART_TEMPLATE, Transform::from_position(Vec3::new(-4.0, 0.0, 1.0)), None, router)?;
        let avatar = server.spawn(PLAYER_TEMPLATE, Transform::IDENTITY, None, router)?;
        server
            .behaviour_mut::<PlayerMovement>(avatar, 0)
            .context("player template lost its movement behaviour")?
            .set_controller(PILOT);
        server.spawn_after(2.0, CRATE_TEMPLATE, Transform::from_position(Vec3::new(0.0, 0.0, -6.0)), None);
        avatar
    };

    let frame = Duration::from_secs_f32(1.0 / FRAME_HZ);
    let mut ticker = interval(frame);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let mut last = 0.0f32;
    let mut next_report = 1.0f32;

    loop {
        ticker.tick().await;
        let now = start.elapsed().as_secs_f32();
        let dt = now - last;
        last = now;

        if let Some(movement) = peers[1].client_mut().behaviour_mut::<PlayerMovement>(avatar, 0) {
            movement.accumulate(RawInput {
                mouse_dx: 30.0 * dt,
                ..RawInput::forward(dt)
            });
        }

        for peer in peers.iter_mut() {
            let id = peer.id();
            let events = peer.poll(now);
            for event in &events.server {
                info!(%id, ?event, "server");
            }
            for event in &events.client {
                match event {
                    replica_net::ClientEvent::PingUpdated { .. } => {}
                    other => info!(%id, event = ?other, "client"),
                }
            }
        }

        if now >= next_report {
            next_report += 1.0;
            report(&peers, avatar, now);
        }
        if now >= DEMO_SECONDS {
            break;
        }
    }

    let stats = net.stats();
    info!(
        "Link: {} delivered, {} dropped, {} rejected, {} bytes",
        stats.delivered, stats.dropped, stats.rejected, stats.bytes
    );
    if stats.rejected > 0 {
        warn!("Some sends were rejected by the transport");
    }
    Ok(())
}

fn report(peers: &[Peer<MemoryTransport>], avatar: i32, now: f32) {
    for peer in peers {
        let client = peer.client();
        let position = client
            .world_transform(avatar)
            .map(|t| t.position)
            .unwrap_or(Vec3::ZERO);
        info!(
            "t={:.1}s {}: {} proxies, ping {:.0} ms, clock offset {:+.3}s, avatar at ({:.2}, {:.2}, {:.2})",
            now,
            peer.id(),
            client.proxies().bound_len(),
            client.clock().ping() * 1000.0,
            client.clock().offset().unwrap_or(0.0),
            position.x,
            position.y,
            position.z
        );
    }

    let pilot = peers[1].client();
    let desync = pilot
        .proxy(avatar)
        .and_then(|p| p.behaviours.downcast_ref::<PlayerMovement>(0))
        .and_then(PlayerMovement::last_desync);
    if let Some(desync) = desync {
        info!(
            "Pilot desync: {:.4} m, {:.3}°, pending commands {}",
            desync.position,
            desync.rotation_degrees,
            pilot
                .proxy(avatar)
                .and_then(|p| p.behaviours.downcast_ref::<PlayerMovement>(0))
                .and_then(PlayerMovement::predictor)
                .map_or(0, |p| p.pending_len())
        );
    }
}

fn demo_catalog() -> Result<TemplateCatalog, replica_net::NetError> {
    let templates = vec![
        EntityTemplate::new("Player")
            .with_id(PLAYER_TEMPLATE)
            .with_behaviour(PLAYER_MOVEMENT),
        EntityTemplate::new("Crate").with_id(CRATE_TEMPLATE),
        EntityTemplate::new("Cart")
            .with_id(CART_TEMPLATE)
            .with_child(ChildTemplate::new("FrontWheel").at(Transform::from_position(Vec3::new(0.0, 0.0, 1.0))))
            .with_child(ChildTemplate::new("RearWheel").at(Transform::from_position(Vec3::new(0.0, 0.0, -1.0)))),
    ];
    Ok(TemplateCatalog::build(templates)?)
}

fn demo_world() -> CollisionWorld {
    let mut world = CollisionWorld::new();
    world.add_box(Vec3::new(-20.0, -2.0, 12.0), Vec3::new(20.0, 4.0, 13.0), LAYER_WORLD);
    world.add_sphere(Vec3::new(6.0, 0.0, -6.0), 1.5, LAYER_WORLD);
    world
}
