//! Networking primitives.
//!
//! Goals:
//! - Provide a simple reliable (TCP) and unreliable (UDP) channel.
//! - Provide the command/replication message types used by client/server.
//! - Keep serialization explicit and versionable.
//!
//! TCP is the control plane (handshake, spawn notifications), UDP is the
//! gameplay plane (intent commands, attack requests, state updates). Both
//! directions are fire-and-forget from the sender's point of view: a peer
//! never observes a per-message result.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    time,
};

use crate::{
    combat::{AttackEvent, AttackInputKind},
    command::InputCommand,
    field::ReadPolicy,
    math::Vec3,
    state::{EntityId, PoseState},
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

static NEXT_PEER_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected peer (network identity of an entity owner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    pub fn new_unique() -> Self {
        PeerId(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    /// Client announces its UDP port to the server.
    UdpHello {
        client_udp_port: u16,
    },
    Welcome {
        peer_id: PeerId,
    },

    // ─── Avatar lifecycle ───
    /// Client confirms it is ready to receive an avatar.
    ClientReady {
        peer_id: PeerId,
    },
    /// Server spawned an avatar (sent to every peer, including the owner).
    AvatarSpawned {
        entity: EntityId,
        owner: PeerId,
        pose: PoseState,
        equipped_weapon: u32,
    },
    /// Server removed an avatar.
    AvatarDespawned {
        entity: EntityId,
    },

    // ─── Gameplay: owner -> authority ───
    /// Latest intent command for the peer's avatar.
    SubmitCommand {
        peer_id: PeerId,
        entity: EntityId,
        command: InputCommand,
    },
    /// Attack request; arbitration result is never reported back.
    RequestAttack {
        peer_id: PeerId,
        entity: EntityId,
        input_kind: AttackInputKind,
        aim_dir: Vec3,
        charge: f32,
    },
    /// Ask the authority to equip a catalog weapon.
    RequestEquip {
        peer_id: PeerId,
        entity: EntityId,
        weapon_id: u32,
    },
    /// Owner self-reported transient poses (owner-writable fields).
    SetStance {
        peer_id: PeerId,
        entity: EntityId,
        aiming: bool,
        blocking: bool,
    },

    // ─── Replication: authority -> observers ───
    StateUpdate(StateUpdate),

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// One replicated field transition (latest value only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldUpdate {
    Pose(PoseState),
    EquippedWeapon(u32),
    Crouching(bool),
    Aiming(bool),
    Blocking(bool),
    Attack(AttackEvent),
}

/// Dirty fields of one entity for one replication pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityUpdate {
    pub entity: EntityId,
    pub fields: Vec<FieldUpdate>,
}

/// Per-tick replication payload, fanned out per read policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateUpdate {
    pub tick: u32,
    pub entities: Vec<EntityUpdate>,
}

/// A field update paired with its visibility, before per-peer filtering.
#[derive(Debug, Clone)]
pub struct OutboundField {
    pub update: FieldUpdate,
    pub read_policy: ReadPolicy,
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize msg")?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
        Ok(msg)
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// Unreliable channel over UDP.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize udp msg")?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<NetMsg> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.socket.recv(&mut buf).await.context("udp recv")?;
        let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
        Ok(msg)
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        let mut buf = vec![0u8; 64 * 1024];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    #[test]
    fn netmsg_roundtrip_bytes() {
        let msg = NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        };
        let bytes = encode_to_bytes(&msg).unwrap();
        let back = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn gameplay_messages_roundtrip() {
        let cmd = NetMsg::SubmitCommand {
            peer_id: PeerId(3),
            entity: EntityId(7),
            command: InputCommand::new(Vec2::new(0.0, 1.0), true, false, true),
        };
        assert_eq!(decode_from_bytes(&encode_to_bytes(&cmd).unwrap()).unwrap(), cmd);

        let update = NetMsg::StateUpdate(StateUpdate {
            tick: 42,
            entities: vec![EntityUpdate {
                entity: EntityId(7),
                fields: vec![
                    FieldUpdate::Crouching(true),
                    FieldUpdate::Attack(AttackEvent {
                        attack_id: 100,
                        server_time: 0.65625,
                    }),
                ],
            }],
        });
        assert_eq!(
            decode_from_bytes(&encode_to_bytes(&update).unwrap()).unwrap(),
            update
        );
    }
}
