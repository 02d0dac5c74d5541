//! Transport behavior over real loopback sockets.

use std::time::Duration;

use meshnet_integration_tests::{loopback_config, mesh_port, start_transport, wait_until, RawPeer, WAIT};
use meshnet_protocol::{decode_datagram, encode_datagram, DiscoveryMessage, Envelope, NodeIdentity, MAX_FRAME_LEN};
use meshnet_transport::{Direction, Error, TransportEvent};
use serde_json::json;
use tokio::net::UdpSocket;

#[tokio::test]
async fn handshake_keys_both_maps_by_node_id() {
    let a = start_transport("node-a", "mesh", loopback_config()).await;
    let b = start_transport("node-b", "mesh", loopback_config()).await;

    a.connect_to_peer("127.0.0.1", mesh_port(&b).await).await.unwrap();
    wait_until!("both sides established", a.is_connected("node-b").await && b.is_connected("node-a").await);

    let at_a = a.peer("node-b").await.unwrap();
    let at_b = b.peer("node-a").await.unwrap();
    assert!(at_a.connected && at_b.connected);
    assert_eq!(at_a.direction, Direction::Outbound);
    assert_eq!(at_b.direction, Direction::Inbound);
    assert_eq!(a.pending_count().await, 0);
    assert_eq!(b.pending_count().await, 0);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn network_mismatch_never_reaches_peer_map() {
    let a = start_transport("node-a", "mesh-one", loopback_config()).await;
    let b = start_transport("node-b", "mesh-two", loopback_config()).await;
    let mut a_rx = a.subscribe();

    a.connect_to_peer("127.0.0.1", mesh_port(&b).await).await.unwrap();
    wait_until!(
        "mismatched connection to close",
        a.pending_count().await == 0 && b.pending_count().await == 0
    );

    assert_eq!(a.peer_count().await, 0);
    assert_eq!(b.peer_count().await, 0);
    assert!(!matches!(a_rx.try_recv(), Ok(TransportEvent::PeerConnected(_))));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn ceiling_rejects_without_mutation() {
    let hub = start_transport("hub", "mesh", loopback_config().with_max_peers(1)).await;
    let first = start_transport("first", "mesh", loopback_config()).await;
    let second = start_transport("second", "mesh", loopback_config()).await;
    let hub_port = mesh_port(&hub).await;

    first.connect_to_peer("127.0.0.1", hub_port).await.unwrap();
    wait_until!("hub to admit first", hub.is_connected("first").await);

    // Outbound attempts from a full node fail before dialing.
    let err = hub
        .connect_to_peer("127.0.0.1", mesh_port(&second).await)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MaxPeersReached(1)));

    // Inbound handshakes past the ceiling are closed.
    second.connect_to_peer("127.0.0.1", hub_port).await.unwrap();
    wait_until!("hub to drop the extra connection", hub.pending_count().await == 0);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(hub.peer_count().await, 1);
    assert!(hub.is_connected("first").await);
    assert!(!hub.is_connected("second").await);

    for t in [&hub, &first, &second] {
        t.stop().await;
    }
}

#[tokio::test]
async fn teardown_is_idempotent() {
    let a = start_transport("node-a", "mesh", loopback_config()).await;
    let b = start_transport("node-b", "mesh", loopback_config()).await;
    a.connect_to_peer("127.0.0.1", mesh_port(&b).await).await.unwrap();
    wait_until!("connection", b.is_connected("node-a").await);

    a.stop().await;
    a.stop().await;
    wait_until!("remote notices teardown", !b.is_connected("node-a").await);
    b.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn server_sends_handshake_first() {
    let t = start_transport("server", "mesh", loopback_config()).await;
    let mut raw = RawPeer::connect(t.local_addr().await.unwrap()).await;

    let line = raw.read_line().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "handshake");
    assert_eq!(value["nodeId"], "server");
    assert_eq!(value["networkId"], "mesh");

    t.stop().await;
}

#[tokio::test]
async fn bad_frames_are_skipped_not_fatal() {
    let t = start_transport("server", "mesh", loopback_config()).await;
    let mut rx = t.subscribe();
    let mut raw = RawPeer::connect(t.local_addr().await.unwrap()).await;

    // Dropped: arrives before the handshake.
    raw.send_json(json!({"type": "peer:status", "payload": {"seq": 0}})).await;
    raw.send_json(json!({"type": "handshake", "nodeId": "raw", "networkId": "mesh", "timestamp": 1}))
        .await;
    raw.send_line("this is not json").await;
    raw.send_json(json!({"type": "no-such-type"})).await;
    raw.send_line("").await;
    raw.send_json(json!({"type": "peer:status", "payload": {"seq": 1}})).await;

    let mut delivered = Vec::new();
    while delivered.is_empty() {
        match tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
            TransportEvent::MessageReceived { from, envelope } => delivered.push((from, envelope)),
            TransportEvent::PeerConnected(peer) => assert_eq!(peer.id, "raw"),
            TransportEvent::PeerDisconnected(id) => panic!("{id} disconnected"),
        }
    }

    let (from, envelope) = &delivered[0];
    assert_eq!(from, "raw");
    assert_eq!(
        envelope,
        &Envelope::PeerStatus {
            payload: json!({"seq": 1})
        }
    );
    assert!(t.is_connected("raw").await);

    t.stop().await;
}

#[tokio::test]
async fn invalid_utf8_frame_is_discarded() {
    let t = start_transport("server", "mesh", loopback_config()).await;
    let mut rx = t.subscribe();
    let mut raw = RawPeer::connect(t.local_addr().await.unwrap()).await;
    raw.send_json(json!({"type": "handshake", "nodeId": "raw", "networkId": "mesh", "timestamp": 1}))
        .await;
    raw.send_bytes(b"{\"type\":\"peer:status\",\"payload\":\"ab\xff\xfecd\"}\n")
        .await
        .unwrap();
    raw.send_json(json!({"type": "peer:status", "payload": "clean"})).await;

    let envelope = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(TransportEvent::MessageReceived { envelope, .. }) = rx.recv().await {
                return envelope;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(envelope, Envelope::PeerStatus { payload: json!("clean") });
    assert!(t.is_connected("raw").await);

    t.stop().await;
}

#[tokio::test]
async fn oversize_frame_closes_unauthenticated_connection() {
    let t = start_transport("server", "mesh", loopback_config()).await;
    let mut raw = RawPeer::connect(t.local_addr().await.unwrap()).await;
    assert!(raw.read_line().await.unwrap().contains("handshake"));

    // No terminator: the server must stop reading instead of buffering it all.
    let flood = vec![b'x'; MAX_FRAME_LEN + 4096];
    let _ = raw.send_bytes(&flood).await;

    assert_eq!(raw.read_line().await, None);
    wait_until!("pending connection dropped", t.pending_count().await == 0);
    assert_eq!(t.peer_count().await, 0);

    t.stop().await;
}

#[tokio::test]
async fn oversize_frame_disconnects_established_peer() {
    let t = start_transport("server", "mesh", loopback_config()).await;
    let mut raw = RawPeer::connect(t.local_addr().await.unwrap()).await;
    raw.send_json(json!({"type": "handshake", "nodeId": "raw", "networkId": "mesh", "timestamp": 1}))
        .await;
    wait_until!("raw peer established", t.is_connected("raw").await);

    let _ = raw.send_bytes(&vec![b' '; MAX_FRAME_LEN + 1]).await;
    wait_until!("oversize sender dropped", !t.is_connected("raw").await);

    t.stop().await;
}

#[tokio::test]
async fn heartbeat_refreshes_and_close_disconnects() {
    let t = start_transport("server", "mesh", loopback_config()).await;
    let mut rx = t.subscribe();
    let mut raw = RawPeer::connect(t.local_addr().await.unwrap()).await;
    raw.send_json(json!({"type": "handshake", "nodeId": "raw", "networkId": "mesh", "timestamp": 1}))
        .await;
    wait_until!("raw peer established", t.is_connected("raw").await);

    let before = t.last_heartbeat("raw").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    raw.send_json(json!({"type": "heartbeat", "nodeId": "raw", "timestamp": 2, "peers": 0}))
        .await;
    wait_until!("heartbeat recorded", t.last_heartbeat("raw").await.unwrap() > before);

    drop(raw);
    wait_until!("disconnect", !t.is_connected("raw").await);

    let mut saw_disconnect = false;
    while let Ok(event) = rx.try_recv() {
        if let TransportEvent::PeerDisconnected(id) = event {
            assert_eq!(id, "raw");
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect);

    t.stop().await;
}

#[tokio::test]
async fn silent_connection_times_out() {
    let config = loopback_config().with_handshake_timeout(Duration::from_millis(200));
    let t = start_transport("server", "mesh", config).await;
    let mut raw = RawPeer::connect(t.local_addr().await.unwrap()).await;

    assert!(raw.read_line().await.unwrap().contains("handshake"));
    assert_eq!(raw.read_line().await, None);
    assert_eq!(t.pending_count().await, 0);
    assert_eq!(t.peer_count().await, 0);

    t.stop().await;
}

#[tokio::test]
async fn disconnect_peer_notifies_both_sides() {
    let a = start_transport("node-a", "mesh", loopback_config()).await;
    let b = start_transport("node-b", "mesh", loopback_config()).await;
    a.connect_to_peer("127.0.0.1", mesh_port(&b).await).await.unwrap();
    wait_until!("connection", a.is_connected("node-b").await && b.is_connected("node-a").await);

    assert!(a.disconnect_peer("node-b").await);
    assert!(!a.disconnect_peer("node-b").await);
    wait_until!("remote close", !b.is_connected("node-a").await);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn simultaneous_dials_leave_one_connection() {
    let a = start_transport("node-a", "mesh", loopback_config()).await;
    let b = start_transport("node-b", "mesh", loopback_config()).await;
    let (a_port, b_port) = (mesh_port(&a).await, mesh_port(&b).await);

    let (ra, rb) = tokio::join!(a.connect_to_peer("127.0.0.1", b_port), b.connect_to_peer("127.0.0.1", a_port));
    ra.unwrap();
    rb.unwrap();

    wait_until!(
        "duplicates to settle",
        a.pending_count().await == 0
            && b.pending_count().await == 0
            && a.is_connected("node-b").await
            && b.is_connected("node-a").await
            && a.peer("node-b").await.map(|p| p.direction) == Some(Direction::Outbound)
            && b.peer("node-a").await.map(|p| p.direction) == Some(Direction::Inbound)
    );
    assert_eq!(a.peer_count().await, 1);
    assert_eq!(b.peer_count().await, 1);

    // The surviving link still carries traffic.
    let mut b_rx = b.subscribe();
    let status = Envelope::PeerStatus { payload: json!("ping") };
    assert!(a.send_to_peer("node-b", &status).await);
    let event = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(TransportEvent::MessageReceived { from, envelope }) = b_rx.recv().await {
                return (from, envelope);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event, ("node-a".to_string(), status));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn probe_responder_answers_same_network_only() {
    let t = start_transport("server", "mesh", loopback_config()).await;
    let probe_addr = t.probe_addr().await.unwrap();
    let port = mesh_port(&t).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut buf = [0u8; 2048];

    let probe = DiscoveryMessage::announce(&NodeIdentity::new("prober", "mesh"), None);
    socket.send_to(&encode_datagram(&probe).unwrap(), probe_addr).await.unwrap();
    let (len, _) = tokio::time::timeout(WAIT, socket.recv_from(&mut buf)).await.unwrap().unwrap();
    let reply = decode_datagram(&buf[..len]).unwrap();
    assert!(!reply.is_announce());
    assert_eq!(reply.node_id(), "server");
    assert_eq!(reply.port(), Some(port));

    let foreign = DiscoveryMessage::announce(&NodeIdentity::new("prober", "elsewhere"), None);
    socket.send_to(&encode_datagram(&foreign).unwrap(), probe_addr).await.unwrap();
    let silence = tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(silence.is_err());

    t.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_every_peer() {
    let hub = start_transport("hub", "mesh", loopback_config()).await;
    let x = start_transport("x", "mesh", loopback_config()).await;
    let y = start_transport("y", "mesh", loopback_config()).await;
    let hub_port = mesh_port(&hub).await;
    x.connect_to_peer("127.0.0.1", hub_port).await.unwrap();
    y.connect_to_peer("127.0.0.1", hub_port).await.unwrap();
    wait_until!("hub has two peers", hub.peer_count().await == 2);

    let mut x_rx = x.subscribe();
    let mut y_rx = y.subscribe();
    let sent = hub
        .broadcast(&Envelope::PeerStatus { payload: json!(1) })
        .await
        .unwrap();
    assert_eq!(sent, 2);

    for rx in [&mut x_rx, &mut y_rx] {
        let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, TransportEvent::MessageReceived { ref from, .. } if from == "hub"));
    }

    assert_eq!(hub.topology().await.edges.len(), 2);
    for t in [&hub, &x, &y] {
        t.stop().await;
    }
}
