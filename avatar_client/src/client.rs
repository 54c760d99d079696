//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (handshake + avatar spawn notifications)
//! - An unreliable datagram socket (commands, requests, state updates)
//! - A replica store mirroring every known avatar
//! - The per-frame command sampler for the locally owned avatar
//!
//! The client never simulates: it samples input, ships intent, and applies
//! whatever state the authority replicates back.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use avatar_shared::{
    combat::AttackInputKind,
    command::InputCommand,
    config::SimConfig,
    field::WriteSource,
    math::Vec3,
    net::{NetMsg, PeerId, ReliableConn, UnreliableConn, PROTOCOL_VERSION},
    state::EntityId,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{
    input::{CameraBasis, CommandSampler, RawInput},
    replica::AvatarReplica,
};

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to any server.
    Disconnected,
    /// Connected, avatar not yet requested.
    Connected,
    /// Ready signal sent; avatar spawn notification may still be in flight.
    Ready,
}

/// High-level avatar client (the owning peer).
pub struct AvatarClient {
    pub peer_id: PeerId,
    pub state: ClientState,

    reliable: ReliableConn,
    pub unreliable: UnreliableConn,
    sampler: CommandSampler,

    /// Every known avatar, local and remote.
    pub replicas: BTreeMap<EntityId, AvatarReplica>,
    /// The avatar owned by this peer, once spawned.
    pub local_entity: Option<EntityId>,
    /// Tick of the most recent state update.
    pub last_update_tick: Option<u32>,
}

impl AvatarClient {
    /// Connects to a server and performs the handshake.
    pub async fn connect(cfg: &SimConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to server");

        // Bind UDP first so we can tell the server where to send updates.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let unreliable = UnreliableConn::connect(bind, server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let welcome = reliable.recv().await?;
        let peer_id = match welcome {
            NetMsg::Welcome { peer_id } => peer_id,
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        info!(peer_id = ?peer_id, "Connected to server");

        Ok(Self {
            peer_id,
            state: ClientState::Connected,
            reliable,
            unreliable,
            sampler: CommandSampler::default(),
            replicas: BTreeMap::new(),
            local_entity: None,
            last_update_tick: None,
        })
    }

    /// Asks the authority to spawn our avatar.
    pub async fn send_ready(&mut self) -> anyhow::Result<()> {
        self.unreliable
            .send(&NetMsg::ClientReady {
                peer_id: self.peer_id,
            })
            .await?;
        self.state = ClientState::Ready;
        info!("Sent ready signal to server");
        Ok(())
    }

    /// Polls the reliable connection for control messages.
    pub async fn poll_reliable(&mut self) -> anyhow::Result<()> {
        match tokio::time::timeout(std::time::Duration::from_millis(10), self.reliable.recv()).await
        {
            Ok(Ok(msg)) => {
                self.handle_reliable_message(msg);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Reliable connection error");
                self.state = ClientState::Disconnected;
            }
            Err(_) => {
                // Timeout, no message available.
            }
        }
        Ok(())
    }

    fn handle_reliable_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::AvatarSpawned {
                entity,
                owner,
                pose,
                equipped_weapon,
            } => {
                info!(entity = ?entity, owner = ?owner, "Avatar spawned");
                self.replicas
                    .insert(entity, AvatarReplica::new(entity, owner, pose, equipped_weapon));
                if owner == self.peer_id {
                    self.local_entity = Some(entity);
                }
            }
            NetMsg::AvatarDespawned { entity } => {
                info!(entity = ?entity, "Avatar despawned");
                self.replicas.remove(&entity);
                if self.local_entity == Some(entity) {
                    self.local_entity = None;
                }
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected from server");
                self.state = ClientState::Disconnected;
            }
            other => {
                debug!(?other, "Unhandled reliable message");
            }
        }
    }

    /// The replica of the locally owned avatar, if spawned.
    pub fn local_replica(&self) -> Option<&AvatarReplica> {
        self.local_entity.and_then(|id| self.replicas.get(&id))
    }

    pub fn local_replica_mut(&mut self) -> Option<&mut AvatarReplica> {
        self.local_entity.and_then(|id| self.replicas.get_mut(&id))
    }

    /// Samples one presentation frame and ships the command if it changed.
    ///
    /// Returns the command that was sent, if any. A no-op frame sends
    /// nothing.
    pub async fn send_input(
        &mut self,
        raw: &RawInput,
        camera: &CameraBasis,
    ) -> anyhow::Result<Option<InputCommand>> {
        let Some(entity) = self.local_entity else {
            return Ok(None);
        };
        let Some(command) = self.sampler.sample(raw, camera) else {
            return Ok(None);
        };
        self.unreliable
            .send(&NetMsg::SubmitCommand {
                peer_id: self.peer_id,
                entity,
                command,
            })
            .await?;
        Ok(Some(command))
    }

    /// Fire-and-forget attack request; the arbitration result is only ever
    /// observed through the replicated attack event.
    pub async fn request_attack(
        &mut self,
        input_kind: AttackInputKind,
        aim_dir: Vec3,
        charge: f32,
    ) -> anyhow::Result<()> {
        let Some(entity) = self.local_entity else {
            return Ok(());
        };
        self.unreliable
            .send(&NetMsg::RequestAttack {
                peer_id: self.peer_id,
                entity,
                input_kind,
                aim_dir,
                charge,
            })
            .await?;
        Ok(())
    }

    /// Asks the authority to equip a catalog weapon.
    pub async fn request_equip(&mut self, weapon_id: u32) -> anyhow::Result<()> {
        let Some(entity) = self.local_entity else {
            return Ok(());
        };
        self.unreliable
            .send(&NetMsg::RequestEquip {
                peer_id: self.peer_id,
                entity,
                weapon_id,
            })
            .await?;
        Ok(())
    }

    /// Self-reports transient stance poses (owner-writable fields).
    ///
    /// Commits locally first — the owner is the writer — and ships the
    /// change only when a transition actually happened, so holding a button
    /// does not spam the wire.
    pub async fn set_stance(&mut self, aiming: bool, blocking: bool) -> anyhow::Result<()> {
        let peer_id = self.peer_id;
        let Some(entity) = self.local_entity else {
            return Ok(());
        };
        let Some(replica) = self.replicas.get_mut(&entity) else {
            return Ok(());
        };
        let source = WriteSource::Peer(peer_id);
        let aim_changed = replica.aiming.try_set(aiming, source).unwrap_or(false);
        let block_changed = replica.blocking.try_set(blocking, source).unwrap_or(false);
        if aim_changed || block_changed {
            self.unreliable
                .send(&NetMsg::SetStance {
                    peer_id,
                    entity,
                    aiming,
                    blocking,
                })
                .await?;
        }
        Ok(())
    }

    /// Receives replicated state over the unreliable channel and applies it
    /// to the replica store (firing field observers).
    pub async fn recv_update(&mut self) -> anyhow::Result<()> {
        if let Some(msg) = self
            .unreliable
            .recv_timeout(std::time::Duration::from_millis(20))
            .await?
        {
            match msg {
                NetMsg::StateUpdate(update) => {
                    self.last_update_tick = Some(update.tick);
                    for entity_update in &update.entities {
                        if let Some(replica) = self.replicas.get_mut(&entity_update.entity) {
                            replica.apply(entity_update);
                        } else {
                            debug!(entity = ?entity_update.entity, "Update for unknown avatar");
                        }
                    }
                }
                other => {
                    debug!(?other, "Unexpected UDP message");
                }
            }
        }
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.trim().split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("State: {:?}", self.state));
                out.push(format!("Peer ID: {:?}", self.peer_id));
                out.push(format!("Last update tick: {:?}", self.last_update_tick));
                for replica in self.replicas.values() {
                    let pose = replica.pose.get();
                    let local = Some(replica.entity) == self.local_entity;
                    out.push(format!(
                        "  {:?}{}: pos=({:.2},{:.2},{:.2}) yaw={:.2} grounded={} weapon={} attack={}",
                        replica.entity,
                        if local { " (local)" } else { "" },
                        pose.position.x,
                        pose.position.y,
                        pose.position.z,
                        pose.yaw,
                        pose.grounded,
                        replica.equipped_weapon.get(),
                        replica.last_attack.get().attack_id,
                    ));
                }
                Ok(out)
            }
            "attack" => {
                let kind = match tokens.get(1).copied() {
                    Some("heavy") => AttackInputKind::Heavy,
                    Some("charged") => AttackInputKind::Charged,
                    _ => AttackInputKind::Light,
                };
                self.request_attack(kind, Vec3::new(1.0, 0.0, 0.0), 0.0)
                    .await?;
                Ok(vec![format!("Requested {:?} attack", kind)])
            }
            "equip" => {
                let Some(id) = tokens.get(1).and_then(|t| t.parse::<u32>().ok()) else {
                    return Ok(vec!["Usage: equip <weapon-id>".to_string()]);
                };
                self.request_equip(id).await?;
                Ok(vec![format!("Requested equip of weapon {}", id)])
            }
            "aim" | "block" => {
                let on = tokens.get(1).copied() == Some("on");
                let (aiming, blocking) = {
                    let current = self.local_replica();
                    let aiming = current.map(|r| *r.aiming.get()).unwrap_or(false);
                    let blocking = current.map(|r| *r.blocking.get()).unwrap_or(false);
                    if tokens[0] == "aim" {
                        (on, blocking)
                    } else {
                        (aiming, on)
                    }
                };
                self.set_stance(aiming, blocking).await?;
                Ok(vec![format!("{} {}", tokens[0], if on { "on" } else { "off" })])
            }
            "disconnect" => {
                self.unreliable
                    .send(&NetMsg::Disconnect {
                        reason: "client disconnect".to_string(),
                    })
                    .await?;
                self.state = ClientState::Disconnected;
                Ok(vec!["Disconnected".to_string()])
            }
            "quit" | "exit" => {
                std::process::exit(0);
            }
            _ => Ok(vec![format!("Unknown command: {}", tokens[0])]),
        }
    }

    /// Returns the underlying reliable connection peer.
    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.reliable.peer_addr()
    }
}
