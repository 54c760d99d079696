//! Full socket-based integration tests for client ↔ server communication.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use avatar_client::input::{CameraBasis, RawInput};
use avatar_client::AvatarClient;
use avatar_server::server::bind_ephemeral;
use avatar_shared::combat::AttackInputKind;
use avatar_shared::config::SimConfig;
use avatar_shared::math::{Vec2, Vec3};
use avatar_shared::net::{decode_from_bytes, encode_to_bytes, NetMsg, PeerId, PROTOCOL_VERSION};

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let hello = NetMsg::Hello {
        protocol: PROTOCOL_VERSION,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&hello)?)?, hello);

    let udp_hello = NetMsg::UdpHello {
        client_udp_port: 50000,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&udp_hello)?)?, udp_hello);

    let welcome = NetMsg::Welcome {
        peer_id: PeerId(1),
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&welcome)?)?, welcome);

    Ok(())
}

/// Full integration: spawn server, connect client, move the avatar, and
/// arbitrate attacks — observing everything through replicated state only.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    // Bind server to ephemeral port.
    let (mut server, cfg) = bind_ephemeral(64).await?;
    let server_addr = cfg.server_addr.clone();

    // Spawn server accept + step loop in background.
    let server_handle = tokio::spawn(async move {
        let _peer = server.accept_one().await?;
        for _ in 0..1200 {
            server.step(1.0 / 64.0).await?;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok::<_, anyhow::Error>(server)
    });

    // Give the server a moment to start listening.
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Connect client and request an avatar.
    let mut client = AvatarClient::connect(&SimConfig {
        server_addr,
        tick_hz: 64,
        ..Default::default()
    })
    .await?;
    client.send_ready().await?;

    // Wait for the spawn notification, re-sending ready in case the
    // datagram was lost (client_ready is idempotent).
    for attempt in 0..100u32 {
        client.poll_reliable().await?;
        if client.local_entity.is_some() {
            break;
        }
        if attempt % 20 == 19 {
            client.send_ready().await?;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let entity = client.local_entity.expect("avatar should spawn");
    let spawn_pos = client.local_replica().unwrap().pose.get().position;

    // Observe replicated attack events.
    let last_attack_id = Arc::new(AtomicU32::new(0));
    let seen = last_attack_id.clone();
    client
        .local_replica_mut()
        .unwrap()
        .last_attack
        .subscribe(move |_, cur| {
            seen.store(cur.attack_id as u32, Ordering::SeqCst);
        });

    // Heavy attack while unarmed: the default weapon has no Heavy entry, so
    // the request is silently dropped and nothing replicates.
    client
        .request_attack(AttackInputKind::Heavy, Vec3::new(1.0, 0.0, 0.0), 0.0)
        .await?;

    // Hold forward; at camera yaw 0 the device forward axis maps to +x.
    let camera = CameraBasis::from_yaw(0.0);
    for _ in 0..60 {
        let raw = RawInput {
            move_axes: Vec2::new(0.0, 1.0),
            ..Default::default()
        };
        client.send_input(&raw, &camera).await?;
        client.recv_update().await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let moved = client.local_replica().unwrap().pose.get().position;
    assert!(
        moved.x > spawn_pos.x + 0.3,
        "avatar should have moved +x: {:?} -> {:?}",
        spawn_pos,
        moved
    );
    assert_eq!(
        last_attack_id.load(Ordering::SeqCst),
        0,
        "rejected attack must publish nothing"
    );

    // Light attack with the default unarmed weapon publishes attack id 10.
    client
        .request_attack(AttackInputKind::Light, Vec3::new(1.0, 0.0, 0.0), 0.0)
        .await?;
    for _ in 0..100 {
        client.recv_update().await?;
        if last_attack_id.load(Ordering::SeqCst) == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last_attack_id.load(Ordering::SeqCst), 10);

    // The authority agrees on the direction of travel.
    let server = server_handle.await??;
    let authority_pose = server.entity(entity).expect("entity exists").pose.get();
    assert!(authority_pose.position.x > spawn_pos.x);
    assert!(authority_pose.grounded);

    Ok(())
}
