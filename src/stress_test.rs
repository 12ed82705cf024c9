use crate::scene::{Shape, ShapeFactory};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use trellis_session::{
    ConnectConfigBuilder, HostConfigBuilder, MemoryNetwork, MemoryTransport, NodeId, Owner,
    Result, Session, SessionConfigBuilder, UserId,
};

const PORT: u16 = 5555;

type Peer = Session<MemoryTransport>;

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub num_peers: usize,
    pub objects_per_peer: usize,
    pub rounds: usize,
    pub items_sent: usize,
    pub nodes_per_peer: usize,
    pub total_time: Duration,
    pub avg_round_time: Duration,
    pub ops_per_second: f64,
    pub converged: bool,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Peers:           {:>30} ║", self.num_peers);
        println!("║  Objects per Peer:          {:>30} ║", self.objects_per_peer);
        println!("║  Rounds:                    {:>30} ║", self.rounds);
        println!("║  Items Sent:                {:>30} ║", self.items_sent);
        println!("║  Nodes per Registry:        {:>30} ║", self.nodes_per_peer);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Round Time:        {:>28}µs ║", self.avg_round_time.as_micros());
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Host on `PORT` with `peers[0]` and connect everyone else to it.
async fn form_session(network: &MemoryNetwork, num_peers: usize) -> Result<Vec<Peer>> {
    let mut peers: Vec<Peer> = (0..num_peers)
        .map(|idx| {
            let user = format!("peer_{}", idx);
            let config = SessionConfigBuilder::new().user(user.as_str()).build();
            Session::new(
                config,
                Arc::new(ShapeFactory),
                Arc::new(network.transport(user.as_str())),
            )
        })
        .collect();

    peers[0]
        .host(&HostConfigBuilder::new().port(PORT).build())
        .await?;
    for peer in peers.iter_mut().skip(1) {
        peer.connect(&ConnectConfigBuilder::new().port(PORT).build())
            .await?;
    }
    exchange(&mut peers).await?;
    Ok(peers)
}

/// One network round: everyone flushes, the host relays, everyone applies.
async fn exchange(peers: &mut [Peer]) -> Result<usize> {
    let sent: usize = join_all(peers.iter_mut().map(|peer| peer.flush()))
        .await
        .into_iter()
        .sum();

    let (host, clients) = peers.split_at_mut(1);
    host[0].poll().await?;
    host[0].apply(None, false, false)?;
    for client in clients.iter_mut() {
        client.poll().await?;
        client.apply(None, false, false)?;
    }
    Ok(sent)
}

/// Every peer holds every node with the same committed data.
fn converged(peers: &[Peer]) -> bool {
    let reference = &peers[0];
    peers.iter().all(|peer| {
        peer.registry().len() == reference.registry().len()
            && reference.registry().iter().all(|node| {
                peer.get(&node.id())
                    .map(|other| other.snapshot() == node.snapshot())
                    .unwrap_or(false)
            })
    })
}

/// Register `count` objects (each with a mesh and a material) for `peer`.
fn populate(peer: &mut Peer, count: usize) -> Result<Vec<(NodeId, Arc<Shape>)>> {
    let mut objects = Vec::with_capacity(count);
    for i in 0..count {
        let mesh = Shape::new("mesh", json!({"verts": 8 + i}));
        let material = Shape::new("material", json!({"color": format!("#{:06x}", i * 4099)}));
        let object = Shape::linked(
            "object",
            json!({"name": format!("{}_{}", peer.local_user(), i), "value": 0}),
            vec![mesh, material],
        );

        let id = peer.add(object.object_ref(), None, &[])?;
        peer.commit(&id)?;
        peer.push(&id, true)?;
        objects.push((id, object));
    }
    Ok(objects)
}

/// Peers edit their own objects at random and replicate after every round.
pub async fn stress_test_session(
    num_peers: usize,
    objects_per_peer: usize,
    rounds: usize,
) -> Result<StressTestStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Owned Edits Simulation                              ║");
    println!("║  Peers: {} | Objects/Peer: {} | Rounds: {} ", num_peers, objects_per_peer, rounds);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let network = MemoryNetwork::new();
    let mut peers = form_session(&network, num_peers).await?;

    println!("\n[Phase 1/2] Registering objects...");
    let mut owned = Vec::with_capacity(num_peers);
    for peer in peers.iter_mut() {
        owned.push(populate(peer, objects_per_peer)?);
    }
    let mut items_sent = exchange(&mut peers).await?;
    println!("[Phase 1/2] ✓ Completed");

    println!("[Phase 2/2] Editing and replicating...");
    let mut rng = StdRng::from_entropy();
    let mut round_times = Vec::with_capacity(rounds);
    let mut edits = 0;

    for round in 0..rounds {
        let round_start = Instant::now();

        for (peer, objects) in peers.iter_mut().zip(owned.iter()) {
            if objects.is_empty() || !rng.gen_bool(0.7) {
                continue;
            }
            let (id, object) = &objects[rng.gen_range(0..objects.len())];
            let mut data = object.get();
            data["value"] = json!(rng.gen::<u32>());
            object.set(data);

            peer.mark_modified(id)?;
            peer.commit(id)?;
            peer.push(id, true)?;
            edits += 1;
        }
        items_sent += exchange(&mut peers).await?;
        round_times.push(round_start.elapsed());

        if (round + 1) % 10 == 0 {
            println!("  Rounds completed: {}/{}", round + 1, rounds);
        }
    }

    let total_time = start.elapsed();
    let avg_round_time = if !round_times.is_empty() {
        round_times.iter().sum::<Duration>() / round_times.len() as u32
    } else {
        Duration::ZERO
    };
    let total_operations = num_peers * objects_per_peer + edits + items_sent;
    let ops_per_second = total_operations as f64 / total_time.as_secs_f64();
    println!("[Phase 2/2] ✓ Completed");

    let converged = converged(&peers);
    info!(peers = num_peers, edits, items_sent, converged, "simulation finished");

    Ok(StressTestStats {
        num_peers,
        objects_per_peer,
        rounds,
        items_sent,
        nodes_per_peer: peers[0].registry().len(),
        total_time,
        avg_round_time,
        ops_per_second,
        converged,
    })
}

/// The host creates every object, hands them out round-robin, and each new
/// owner edits what it received.
pub async fn stress_test_handover(num_peers: usize, objects: usize) -> Result<StressTestStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Ownership Handover Simulation                       ║");
    println!("║  Peers: {} | Objects: {} ", num_peers, objects);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let network = MemoryNetwork::new();
    let mut peers = form_session(&network, num_peers.max(2)).await?;

    println!("\n[Phase 1/2] Host registers and hands over objects...");
    let created = populate(&mut peers[0], objects)?;
    let mut items_sent = exchange(&mut peers).await?;

    let clients = peers.len() - 1;
    for (i, (id, _)) in created.iter().enumerate() {
        let owner = UserId::new(format!("peer_{}", 1 + i % clients));
        peers[0].change_owner(id, Owner::User(owner), true, true)?;
    }
    items_sent += exchange(&mut peers).await?;
    println!("[Phase 1/2] ✓ Completed");

    println!("[Phase 2/2] New owners edit...");
    let round_start = Instant::now();
    for (i, (id, _)) in created.iter().enumerate() {
        let peer = &mut peers[1 + i % clients];
        let Some(shape) = peer
            .get(id)
            .and_then(|node| node.instance())
            .and_then(|object| object.downcast::<Shape>())
        else {
            debug!(node = %id, "object not instantiated on new owner");
            continue;
        };

        let mut data = shape.get();
        data["value"] = json!(i);
        shape.set(data);
        peer.mark_modified(id)?;
        peer.commit(id)?;
        peer.push(id, true)?;
    }
    items_sent += exchange(&mut peers).await?;
    let avg_round_time = round_start.elapsed();
    println!("[Phase 2/2] ✓ Completed");

    let total_time = start.elapsed();
    let converged = converged(&peers)
        && created
            .iter()
            .enumerate()
            .all(|(i, (_, shape))| shape.get()["value"] == json!(i));

    Ok(StressTestStats {
        num_peers: peers.len(),
        objects_per_peer: objects,
        rounds: 1,
        items_sent,
        nodes_per_peer: peers[0].registry().len(),
        total_time,
        avg_round_time,
        ops_per_second: items_sent as f64 / total_time.as_secs_f64(),
        converged,
    })
}

/// Scaling analysis over an increasing number of peers
pub async fn stress_test_scaling(max_peers: usize, step_size: usize) -> Result<()> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Replication vs Peers               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_peers = step_size.max(2);
    while current_peers <= max_peers {
        let stats = stress_test_session(current_peers, 10, 20).await?;
        stats.print();
        current_peers += step_size;
    }
    Ok(())
}
