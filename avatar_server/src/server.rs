//! Server implementation.
//!
//! This is the authoritative simulation loop:
//! - TCP handshake and avatar spawn notifications (control plane)
//! - UDP intent commands, attack/equip/stance requests, state updates
//!   (gameplay plane)
//! - Fixed timestep movement integration
//! - Per-tick replication of dirty fields, filtered by read policy
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Avoid wall-clock-dependent branching in gameplay code; the authority
//!   clock is tick-derived.
//! - Entities iterate in stable id order.

use anyhow::Context;
use avatar_shared::{
    combat::{AttackInputKind, WeaponCatalog},
    command::InputCommand,
    config::SimConfig,
    field::{FieldError, WriteSource},
    math::Vec3,
    net::{
        EntityUpdate, NetMsg, PeerId, ReliableConn, ReliableListener, StateUpdate,
        PROTOCOL_VERSION,
    },
    state::EntityId,
};
use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{net::UdpSocket, sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    combat::CombatArbiter,
    entity::AvatarEntity,
    movement::{FlatGround, GroundQuery, MovementSimulator},
};

/// Ticks between full-state keyframes on the unreliable channel.
const KEYFRAME_INTERVAL: u32 = 16;

/// Connected peer state.
struct PeerState {
    peer_id: PeerId,
    reliable: ReliableConn,
    udp_peer: SocketAddr,
    /// Whether the peer has confirmed readiness and owns an avatar.
    ready: bool,
    entity: Option<EntityId>,
}

/// Authoritative avatar server.
pub struct AvatarServer {
    pub cfg: SimConfig,
    movement: MovementSimulator,
    arbiter: CombatArbiter,
    ground: Box<dyn GroundQuery>,

    entities: BTreeMap<EntityId, AvatarEntity>,
    peers: HashMap<PeerId, PeerState>,

    tcp: ReliableListener,
    udp: UdpSocket,

    tick: u32,
    next_entity_id: u64,
    next_spawn_slot: u32,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl AvatarServer {
    /// Creates a new server with the given config, catalog and world probe.
    pub async fn new(
        cfg: SimConfig,
        catalog: WeaponCatalog,
        ground: Box<dyn GroundQuery>,
    ) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;

        Ok(Self {
            movement: MovementSimulator::new(cfg.movement),
            arbiter: CombatArbiter::new(catalog),
            ground,
            cfg,
            entities: BTreeMap::new(),
            peers: HashMap::new(),
            tcp,
            udp,
            tick: 0,
            next_entity_id: 1,
            next_spawn_slot: 0,
            console_rx: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Authority clock in seconds, derived from the tick counter.
    pub fn server_time(&self) -> f64 {
        self.tick as f64 * self.cfg.tick_dt() as f64
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Read access for tests and embedding (listen-server presentation).
    pub fn entity(&self, id: EntityId) -> Option<&AvatarEntity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut AvatarEntity> {
        self.entities.get_mut(&id)
    }

    /// Accepts exactly one client (handshake only).
    pub async fn accept_one(&mut self) -> anyhow::Result<PeerId> {
        let (conn, addr) = self.tcp.accept().await?;
        self.handle_new_connection(conn, addr).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<PeerId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<PeerId> {
        let msg = conn.recv().await?;
        match msg {
            NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                let udp_hello = conn.recv().await?;
                let client_udp_port = match udp_hello {
                    NetMsg::UdpHello { client_udp_port } => client_udp_port,
                    other => anyhow::bail!("expected UdpHello, got {other:?}"),
                };

                let id = PeerId::new_unique();
                conn.send(&NetMsg::Welcome { peer_id: id }).await?;

                let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
                self.peers.insert(
                    id,
                    PeerState {
                        peer_id: id,
                        reliable: conn,
                        udp_peer,
                        ready: false,
                        entity: None,
                    },
                );

                info!(peer_id = ?id, %udp_peer, "Peer connected");
                Ok(id)
            }
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }
    }

    /// Marks a peer as ready and spawns its avatar on the next ring slot.
    ///
    /// Idempotent: a peer that already owns an avatar keeps it. Existing
    /// avatars are replayed to the new peer, and the new avatar is announced
    /// to everyone.
    pub async fn client_ready(&mut self, peer_id: PeerId) -> anyhow::Result<EntityId> {
        if !self.peers.contains_key(&peer_id) {
            anyhow::bail!("unknown peer {peer_id:?}");
        }
        if let Some(existing) = self.peers.get(&peer_id).and_then(|p| p.entity) {
            return Ok(existing);
        }

        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        let slot = self.next_spawn_slot;
        self.next_spawn_slot += 1;

        let entity = AvatarEntity::spawn(id, peer_id, slot, self.cfg.max_peers, &self.cfg.movement);
        let announce = spawn_msg(&entity);

        // Catch the new peer up on avatars that already exist.
        let catchup: Vec<NetMsg> = self.entities.values().map(spawn_msg).collect();

        self.entities.insert(id, entity);

        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.ready = true;
            peer.entity = Some(id);
            for msg in &catchup {
                peer.reliable.send(msg).await?;
            }
        }

        for peer in self.peers.values_mut() {
            if peer.ready {
                let _ = peer.reliable.send(&announce).await;
            }
        }

        info!(peer_id = ?peer_id, entity = ?id, slot, "Peer ready, avatar spawned");
        Ok(id)
    }

    /// Removes a peer and despawns its avatar.
    pub async fn drop_peer(&mut self, peer_id: PeerId, reason: &str) {
        let Some(peer) = self.peers.remove(&peer_id) else {
            return;
        };
        if let Some(entity) = peer.entity {
            self.entities.remove(&entity);
            let msg = NetMsg::AvatarDespawned { entity };
            for other in self.peers.values_mut() {
                if other.ready {
                    let _ = other.reliable.send(&msg).await;
                }
            }
        }
        info!(peer_id = ?peer_id, reason, "Peer dropped");
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(self.cfg.tick_dt());
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt: f32) -> anyhow::Result<()> {
        self.process_console_commands()?;
        self.recv_messages().await?;
        self.simulate(dt);
        self.send_updates().await?;
        self.tick += 1;
        Ok(())
    }

    fn process_console_commands(&mut self) -> anyhow::Result<()> {
        // Collect lines first to avoid borrow conflict.
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line)? {
                println!("{}", out);
            }
        }
        Ok(())
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.trim().split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Tick: {} (t={:.3}s)", self.tick, self.server_time()));
                out.push(format!("Peers: {}", self.peers.len()));
                for (id, peer) in &self.peers {
                    out.push(format!(
                        "  {:?}: udp={} ready={} entity={:?}",
                        id, peer.udp_peer, peer.ready, peer.entity
                    ));
                }
                out.push(format!("Avatars: {}", self.entities.len()));
                for entity in self.entities.values() {
                    let pose = entity.pose.get();
                    out.push(format!(
                        "  {:?}: pos=({:.2},{:.2},{:.2}) grounded={} weapon={}",
                        entity.id,
                        pose.position.x,
                        pose.position.y,
                        pose.position.z,
                        pose.grounded,
                        entity.equipped_weapon.get()
                    ));
                }
                Ok(out)
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                std::process::exit(0);
            }
            other => Ok(vec![format!("Unknown command: {}", other)]),
        }
    }

    async fn recv_messages(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Ok(msg) = serde_json::from_slice::<NetMsg>(&buf[..n]) {
                        self.handle_udp_message(from, msg).await;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv")?,
            }
        }
        Ok(())
    }

    async fn handle_udp_message(&mut self, from: SocketAddr, msg: NetMsg) {
        match msg {
            NetMsg::SubmitCommand {
                peer_id,
                entity,
                command,
            } => {
                self.on_command(from, peer_id, entity, command);
            }
            NetMsg::RequestAttack {
                peer_id,
                entity,
                input_kind,
                aim_dir,
                charge,
            } => {
                self.on_attack_request(peer_id, entity, input_kind, aim_dir, charge);
            }
            NetMsg::RequestEquip {
                peer_id,
                entity,
                weapon_id,
            } => {
                self.on_equip_request(peer_id, entity, weapon_id);
            }
            NetMsg::SetStance {
                peer_id,
                entity,
                aiming,
                blocking,
            } => {
                self.on_stance(peer_id, entity, aiming, blocking);
            }
            NetMsg::ClientReady { peer_id } => {
                if let Err(e) = self.client_ready(peer_id).await {
                    warn!(peer_id = ?peer_id, error = %e, "Failed to mark peer ready");
                }
            }
            NetMsg::Disconnect { reason } => {
                let leaving: Vec<PeerId> = self
                    .peers
                    .values()
                    .filter(|p| p.udp_peer == from)
                    .map(|p| p.peer_id)
                    .collect();
                for peer_id in leaving {
                    self.drop_peer(peer_id, &reason).await;
                }
            }
            other => {
                debug!(?other, "Unexpected UDP message");
            }
        }
    }

    /// Applies an intent command to the owned avatar.
    ///
    /// Dropped (not surfaced) when the entity is unknown or the requester is
    /// not its owner.
    fn on_command(
        &mut self,
        from: SocketAddr,
        peer_id: PeerId,
        entity_id: EntityId,
        command: InputCommand,
    ) {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.udp_peer = from;
        }
        let tick = self.tick;
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            debug!(entity = ?entity_id, "Command for unknown entity dropped");
            return;
        };
        if entity.owner != peer_id {
            debug!(entity = ?entity_id, peer_id = ?peer_id, "Command from non-owner dropped");
            return;
        }
        entity.submit_command(command, tick);
    }

    fn on_attack_request(
        &mut self,
        peer_id: PeerId,
        entity_id: EntityId,
        input_kind: AttackInputKind,
        aim_dir: Vec3,
        charge: f32,
    ) {
        let now = self.server_time();
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            debug!(entity = ?entity_id, "Attack request for unknown entity dropped");
            return;
        };
        let equipped = *entity.equipped_weapon.get();
        match self.arbiter.arbitrate(
            peer_id,
            entity.owner,
            equipped,
            &mut entity.combat,
            input_kind,
            now,
        ) {
            Ok(event) => {
                let _ = entity.last_attack.try_set(event, WriteSource::Authority);
                info!(
                    entity = ?entity_id,
                    attack_id = event.attack_id,
                    server_time = event.server_time,
                    ?aim_dir,
                    charge,
                    "Attack accepted"
                );
            }
            Err(reject) => {
                debug!(entity = ?entity_id, ?reject, "Attack request dropped");
            }
        }
    }

    fn on_equip_request(&mut self, peer_id: PeerId, entity_id: EntityId, weapon_id: u32) {
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            debug!(entity = ?entity_id, "Equip request for unknown entity dropped");
            return;
        };
        if entity.owner != peer_id {
            debug!(entity = ?entity_id, peer_id = ?peer_id, "Equip from non-owner dropped");
            return;
        }
        let Some(def) = self.arbiter.catalog().resolve_weapon(weapon_id) else {
            debug!(weapon_id, "Equip request for unknown weapon dropped");
            return;
        };
        let _ = entity
            .equipped_weapon
            .try_set(def.id, WriteSource::Authority);
        info!(entity = ?entity_id, weapon_id, weapon = %def.display_name, "Weapon equipped");
    }

    /// Owner self-reported stance; the field policy is the only gate.
    fn on_stance(&mut self, peer_id: PeerId, entity_id: EntityId, aiming: bool, blocking: bool) {
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return;
        };
        let source = WriteSource::Peer(peer_id);
        for (field, value) in [(&mut entity.aiming, aiming), (&mut entity.blocking, blocking)] {
            if let Err(FieldError::PermissionDenied) = field.try_set(value, source) {
                debug!(entity = ?entity_id, peer_id = ?peer_id, "Stance write denied");
                return;
            }
        }
    }

    /// Advances every avatar by one fixed tick and commits pose fields.
    fn simulate(&mut self, dt: f32) {
        let tick = self.tick;
        let buffer_ticks = self.cfg.movement.jump_buffer_ticks;
        for entity in self.entities.values_mut() {
            if entity.expire_stale_jump(tick, buffer_ticks) {
                debug!(entity = ?entity.id, "Stale jump request expired");
            }
            let outcome = self.movement.step(
                entity.pose.get(),
                &entity.latest_command,
                entity.jump_pending(),
                self.ground.as_ref(),
                dt,
            );
            if outcome.jump_consumed {
                entity.clear_jump();
            }
            // The simulator is the only writer of the pose.
            let _ = entity.pose.try_set(outcome.pose, WriteSource::Authority);
            let _ = entity
                .crouching
                .try_set(entity.latest_command.crouch_held, WriteSource::Authority);
        }
    }

    /// Fans out dirty fields to ready peers, filtered by read policy.
    ///
    /// Every `KEYFRAME_INTERVAL` ticks the full field set is resent instead
    /// of the delta; replicas suppress already-seen values by transition
    /// equality, so lost datagrams self-heal without double notifications.
    async fn send_updates(&mut self) -> anyhow::Result<()> {
        let keyframe = self.tick % KEYFRAME_INTERVAL == 0;
        let mut outbound = Vec::new();
        for entity in self.entities.values_mut() {
            let owner = entity.owner;
            let fields = if keyframe {
                let _ = entity.drain_dirty();
                entity.snapshot_fields()
            } else {
                entity.drain_dirty()
            };
            if !fields.is_empty() {
                outbound.push((entity.id, owner, fields));
            }
        }
        if outbound.is_empty() {
            return Ok(());
        }

        for peer in self.peers.values() {
            if !peer.ready {
                continue;
            }
            let entities: Vec<EntityUpdate> = outbound
                .iter()
                .filter_map(|(entity, owner, fields)| {
                    let visible: Vec<_> = fields
                        .iter()
                        .filter(|f| match f.read_policy {
                            avatar_shared::field::ReadPolicy::Everyone => true,
                            avatar_shared::field::ReadPolicy::OwnerOnly => *owner == peer.peer_id,
                        })
                        .map(|f| f.update.clone())
                        .collect();
                    if visible.is_empty() {
                        None
                    } else {
                        Some(EntityUpdate {
                            entity: *entity,
                            fields: visible,
                        })
                    }
                })
                .collect();
            if entities.is_empty() {
                continue;
            }

            let msg = NetMsg::StateUpdate(StateUpdate {
                tick: self.tick,
                entities,
            });
            let payload = serde_json::to_vec(&msg).context("serialize state update")?;
            let _ = self.udp.send_to(&payload, peer.udp_peer).await;
        }
        Ok(())
    }
}

fn spawn_msg(entity: &AvatarEntity) -> NetMsg {
    NetMsg::AvatarSpawned {
        entity: entity.id,
        owner: entity.owner,
        pose: *entity.pose.get(),
        equipped_weapon: *entity.equipped_weapon.get(),
    }
}

/// Helper for tests: bind to an ephemeral port with the built-in catalog
/// and a flat ground plane.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(AvatarServer, SimConfig)> {
    let mut cfg = SimConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };

    // Bind TCP first to get an ephemeral port, then bind UDP to that same port.
    let tcp = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    let addr = tcp.local_addr()?;
    cfg.server_addr = addr.to_string();

    let udp_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    let udp = UdpSocket::bind(udp_bind).await?;

    let server = AvatarServer {
        movement: MovementSimulator::new(cfg.movement),
        arbiter: CombatArbiter::new(WeaponCatalog::builtin()),
        ground: Box::new(FlatGround::default()),
        cfg: cfg.clone(),
        entities: BTreeMap::new(),
        peers: HashMap::new(),
        tcp,
        udp,
        tick: 0,
        next_entity_id: 1,
        next_spawn_slot: 0,
        console_rx: None,
    };

    Ok((server, cfg))
}
