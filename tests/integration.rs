//! End-to-end tests against real sockets: a `SocketHub` server with live
//! `TcpStream` clients, a `TcpClient` against a killable TCP listener, a
//! minimal hand-rolled broker for `MqttClient` QoS flows, and the
//! `SignalBus` handler-timeout path.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use vibemq_aio::codec::{Decoder, Encoder};
use vibemq_aio::hub::{HubConfig, Message, SocketHub};
use vibemq_aio::mqtt::{MqttClient, MqttConfig};
use vibemq_aio::protocol::{ConnAck, Packet, ProtocolVersion, PubAck, PubComp, PubRec, QoS, ReasonCode, SubAck};
use vibemq_aio::signal::SignalBus;
use vibemq_aio::tcp_client::{ConnectionConfig, TcpClient};
use vibemq_aio::timer::BackoffConfig;

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

// Scenario 1: hub broadcast fanout.
#[tokio::test]
async fn hub_broadcast_fanout() {
    let hub = SocketHub::new(HubConfig::default());
    hub.start(0).await.expect("hub should bind an ephemeral port");
    let port = hub.local_port();

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let pings: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));

    let c = connects.clone();
    hub.on_connect(move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .await;
    let d = disconnects.clone();
    hub.on_disconnect(move |_, _| {
        d.fetch_add(1, Ordering::SeqCst);
    })
    .await;
    let p = pings.clone();
    hub.on_message(move |message, _from| {
        p.lock().push(message.payload);
    })
    .await;

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();
    assert!(wait_until(|| connects.load(Ordering::SeqCst) == 2, Duration::from_secs(1)));

    a.write_all(b"ping").await.unwrap();
    assert!(wait_until(|| !pings.lock().is_empty(), Duration::from_secs(1)));
    assert_eq!(pings.lock()[0].as_ref(), b"ping");

    hub.broadcast(Message::text(Bytes::from_static(b"hi"), 0)).await;

    let mut buf = [0u8; 16];
    let n = a.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hi");
    let n = b.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hi");

    drop(a);
    assert!(wait_until(|| disconnects.load(Ordering::SeqCst) == 1, Duration::from_secs(1)));
    assert_eq!(connects.load(Ordering::SeqCst), 2);

    hub.stop().await.unwrap();
    assert_eq!(hub.stats().active_connections, 0);
}

/// A minimal MQTT broker stub: CONNACKs, then answers whatever the
/// fixture was told to expect for one PUBLISH exchange. Good enough to
/// drive the client's QoS 1/2 state machine without a real broker.
async fn fake_broker(listener: TcpListener, qos: QoS) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut decoder = Decoder::new();
    let mut inbound = BytesMut::new();
    let mut read_buf = [0u8; 4096];

    // CONNECT -> CONNACK
    loop {
        let n = stream.read(&mut read_buf).await.unwrap();
        inbound.extend_from_slice(&read_buf[..n]);
        if let Some((Packet::Connect(_), consumed)) = decoder.decode(&inbound).unwrap() {
            inbound.advance(consumed);
            break;
        }
    }
    let mut out = BytesMut::new();
    Encoder::new(ProtocolVersion::V311)
        .encode(&Packet::ConnAck(ConnAck::default()), &mut out)
        .unwrap();
    stream.write_all(&out).await.unwrap();

    // SUBSCRIBE -> SUBACK
    loop {
        let n = stream.read(&mut read_buf).await.unwrap();
        inbound.extend_from_slice(&read_buf[..n]);
        if let Some((Packet::Subscribe(sub), consumed)) = decoder.decode(&inbound).unwrap() {
            inbound.advance(consumed);
            let mut out = BytesMut::new();
            Encoder::new(ProtocolVersion::V311)
                .encode(
                    &Packet::SubAck(SubAck {
                        packet_id: sub.packet_id,
                        reason_codes: vec![ReasonCode::Success],
                        properties: Default::default(),
                    }),
                    &mut out,
                )
                .unwrap();
            stream.write_all(&out).await.unwrap();
            break;
        }
    }

    // PUBLISH -> ack sequence for the requested QoS
    loop {
        let n = stream.read(&mut read_buf).await.unwrap();
        inbound.extend_from_slice(&read_buf[..n]);
        if let Some((Packet::Publish(publish), consumed)) = decoder.decode(&inbound).unwrap() {
            inbound.advance(consumed);
            let id = publish.packet_id.unwrap();
            let mut out = BytesMut::new();
            match qos {
                QoS::AtLeastOnce => {
                    Encoder::new(ProtocolVersion::V311)
                        .encode(&Packet::PubAck(PubAck::new(id)), &mut out)
                        .unwrap();
                    stream.write_all(&out).await.unwrap();
                }
                QoS::ExactlyOnce => {
                    Encoder::new(ProtocolVersion::V311)
                        .encode(&Packet::PubRec(PubRec::new(id)), &mut out)
                        .unwrap();
                    stream.write_all(&out).await.unwrap();

                    // wait for the client's PUBREL
                    loop {
                        let n = stream.read(&mut read_buf).await.unwrap();
                        inbound.extend_from_slice(&read_buf[..n]);
                        if let Some((Packet::PubRel(rel), consumed)) = decoder.decode(&inbound).unwrap() {
                            inbound.advance(consumed);
                            let mut out = BytesMut::new();
                            Encoder::new(ProtocolVersion::V311)
                                .encode(&Packet::PubComp(PubComp::new(rel.packet_id)), &mut out)
                                .unwrap();
                            stream.write_all(&out).await.unwrap();
                            break;
                        }
                    }
                }
                QoS::AtMostOnce => {}
            }
            break;
        }
    }

    // keep the socket open until the test drops the client
    let mut sink = [0u8; 64];
    let _ = stream.read(&mut sink).await;
}

// Scenario 2: MQTT publish QoS 1.
#[tokio::test]
async fn mqtt_publish_qos1_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(fake_broker(listener, QoS::AtLeastOnce));

    let mut config = MqttConfig::default();
    config.client_id = "t".to_string();
    let client = MqttClient::new(config);

    client.connect("127.0.0.1", port, Some(Duration::from_secs(2))).await.unwrap();
    let codes = client.subscribe(&[("x", QoS::AtLeastOnce)]).await.unwrap();
    assert_eq!(codes, vec![ReasonCode::Success]);

    client
        .publish("x", Bytes::from_static(&[0x01]), QoS::AtLeastOnce, false)
        .await
        .expect("broker should PUBACK");

    assert_eq!(client.pending_count(), 0);
}

// Scenario 3: MQTT publish QoS 2.
#[tokio::test]
async fn mqtt_publish_qos2_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(fake_broker(listener, QoS::ExactlyOnce));

    let mut config = MqttConfig::default();
    config.client_id = "t2".to_string();
    let client = MqttClient::new(config);

    client.connect("127.0.0.1", port, Some(Duration::from_secs(2))).await.unwrap();
    client.subscribe(&[("y", QoS::ExactlyOnce)]).await.unwrap();

    client
        .publish("y", Bytes::from_static(b"payload"), QoS::ExactlyOnce, false)
        .await
        .expect("broker should complete the QoS 2 handshake");

    assert_eq!(client.pending_count(), 0);
}

// Scenario 4: TCP client reconnect.
#[tokio::test]
async fn tcp_client_reconnects_then_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Accept and immediately drop each connection so the client sees a
    // hard close and keeps trying.
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            drop(stream);
        }
    });

    let mut config = ConnectionConfig::default();
    config.reconnect_attempts = 3;
    config.reconnect_delay = Duration::from_millis(100);
    config.backoff = BackoffConfig {
        base: Duration::from_millis(100),
        max: Duration::from_secs(1),
        factor: 1.5,
        jitter_ratio: 0.2,
    };
    let client = TcpClient::new(config);

    let states: Arc<Mutex<Vec<vibemq_aio::tcp_client::ConnectionState>>> = Arc::new(Mutex::new(Vec::new()));
    let s = states.clone();
    client.on_state_changed(move |_, to| s.lock().push(to));

    client.connect("127.0.0.1", port, Some(Duration::from_secs(1))).await;

    assert!(wait_until(
        || states.lock().iter().any(|s| *s == vibemq_aio::tcp_client::ConnectionState::Failed),
        Duration::from_secs(5)
    ));

    let seen = states.lock().clone();
    let reconnecting_count = seen
        .iter()
        .filter(|s| **s == vibemq_aio::tcp_client::ConnectionState::Reconnecting)
        .count();
    assert!(reconnecting_count >= 1, "expected at least one reconnect attempt, saw {:?}", seen);
    assert_eq!(seen.last(), Some(&vibemq_aio::tcp_client::ConnectionState::Failed));
}

// Scenario 5: signal handler timeout.
#[test]
fn signal_handler_timeout_does_not_block_dispatch() {
    let bus = SignalBus::new(1, 16);
    bus.set_handler_timeout(Some(Duration::from_millis(200)));
    bus.register(
        libc_sigusr2(),
        Arc::new(|_| std::thread::sleep(Duration::from_secs(2))),
        0,
        "slow-handler",
    );

    let raised = std::time::Instant::now();
    bus.simulate(libc_sigusr2());

    assert!(wait_until(
        || bus.stats(libc_sigusr2()).handler_errors == 1,
        Duration::from_millis(500)
    ));
    assert!(raised.elapsed() < Duration::from_secs(2));
    assert_eq!(bus.stats(libc_sigusr2()).processed, 0);
}

fn libc_sigusr2() -> i32 {
    signal_hook::consts::signal::SIGUSR2
}
