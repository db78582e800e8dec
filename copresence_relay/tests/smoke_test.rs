// Integration smoke test for the relay server at the wire level.
//
// Each client here is a plain TCP socket plus a plain UDP socket using only
// the protocol crate's codec and framing — no `SyncClient` involved. This
// pins the wire format end-to-end: greeting ack, text broadcast shape,
// event filtering, pose datagram relay, and malformed-input tolerance.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use copresence_protocol::{
    ACK_CONNECTED, ACK_EVENT_RECEIVED, ACK_TEXT_RECEIVED, Event, SessionId, TextMessage, UserId,
    WireMessage, codec, read_frame, write_frame,
};
use copresence_relay::config::RelayConfig;
use copresence_relay::server::start_relay;

fn start_test_relay() -> (copresence_relay::RelayHandle, SocketAddr, SocketAddr) {
    let config = RelayConfig {
        server_url: "127.0.0.1:0".into(),
        session_id: None,
    };
    let (handle, tcp_addr, udp_addr) = start_relay(config).unwrap();
    // Give the accept thread a moment to start.
    std::thread::sleep(Duration::from_millis(50));
    (handle, tcp_addr, udp_addr)
}

/// Connect a raw TCP client and read the greeting ack. Returns the framed
/// reader/writer halves plus the assigned identity and session.
fn connect_raw(
    addr: SocketAddr,
) -> (
    BufReader<TcpStream>,
    BufWriter<TcpStream>,
    UserId,
    SessionId,
) {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let reader_stream = stream.try_clone().unwrap();
    let writer = BufWriter::new(stream);
    let mut reader = BufReader::new(reader_stream);

    let greeting = read_frame(&mut reader).unwrap();
    match codec::decode(&greeting).unwrap() {
        WireMessage::Ack(ack) => {
            assert_eq!(ack.message, ACK_CONNECTED);
            assert!(ack.success);
            (reader, writer, ack.from_user_id, ack.session_id)
        }
        other => panic!("expected greeting ack, got {other:?}"),
    }
}

fn send(writer: &mut BufWriter<TcpStream>, msg: &WireMessage) {
    write_frame(writer, &codec::encode(msg).unwrap()).unwrap();
}

fn recv(reader: &mut BufReader<TcpStream>) -> WireMessage {
    codec::decode(&read_frame(reader).unwrap()).unwrap()
}

fn text(body: &str, user: &UserId, session: &SessionId) -> WireMessage {
    WireMessage::Text(TextMessage {
        text: body.into(),
        user_id: user.clone(),
        session_id: session.clone(),
    })
}

#[test]
fn identity_assignment_and_text_relay() {
    let (handle, tcp_addr, _udp_addr) = start_test_relay();

    // Identities are assigned in connection order from a 1-based counter.
    let (mut reader_a, mut writer_a, user_a, session_a) = connect_raw(tcp_addr);
    assert_eq!(user_a, UserId::from("user_1"));
    assert_eq!(&session_a, handle.session_id());

    let (mut reader_b, _writer_b, user_b, session_b) = connect_raw(tcp_addr);
    assert_eq!(user_b, UserId::from("user_2"));
    assert_eq!(session_b, session_a);
    assert_eq!(handle.client_count(), 2);

    // A sends "hi": B sees the bracketed broadcast, A gets the confirmation.
    send(&mut writer_a, &text("hi", &user_a, &session_a));

    match recv(&mut reader_b) {
        WireMessage::Ack(ack) => {
            assert_eq!(ack.message, "[user_1]: hi");
            assert_eq!(ack.from_user_id, user_a);
            assert_eq!(ack.session_id, session_a);
        }
        other => panic!("expected broadcast ack, got {other:?}"),
    }
    match recv(&mut reader_a) {
        WireMessage::Ack(ack) => {
            assert_eq!(ack.message, ACK_TEXT_RECEIVED);
            assert_eq!(ack.from_user_id, user_a);
        }
        other => panic!("expected confirmation ack, got {other:?}"),
    }

    handle.stop();
}

#[test]
fn malformed_frame_keeps_connection_open() {
    let (handle, tcp_addr, _udp_addr) = start_test_relay();
    let (mut reader_a, mut writer_a, user_a, session_a) = connect_raw(tcp_addr);

    // A framed but undecodable payload is dropped server-side.
    write_frame(&mut writer_a, b"????not a message").unwrap();

    // The connection must still work afterwards.
    send(&mut writer_a, &text("still here", &user_a, &session_a));
    match recv(&mut reader_a) {
        WireMessage::Ack(ack) => assert_eq!(ack.message, ACK_TEXT_RECEIVED),
        other => panic!("expected confirmation ack, got {other:?}"),
    }

    handle.stop();
}

#[test]
fn event_forwarding_honors_filters() {
    let (handle, tcp_addr, _udp_addr) = start_test_relay();
    let (mut reader_a, mut writer_a, user_a, session) = connect_raw(tcp_addr);
    let (mut reader_b, _writer_b, user_b, _) = connect_raw(tcp_addr);
    let (mut reader_c, _writer_c, _user_c, _) = connect_raw(tcp_addr);

    // Event targeted at B only; from/session fields are spoofed and must be
    // re-stamped by the relay.
    send(
        &mut writer_a,
        &WireMessage::Event(Event {
            kind: "OBJECT_SELECTED".into(),
            payload: r#"{"objectName":"Cube","objectId":123}"#.into(),
            from_user_id: UserId::from("user_99"),
            target_session_id: None,
            target_user_id: Some(user_b.clone()),
            timestamp_ms: 1,
            session_id: SessionId::from("not_the_real_session"),
        }),
    );

    match recv(&mut reader_b) {
        WireMessage::Event(e) => {
            assert_eq!(e.kind, "OBJECT_SELECTED");
            assert_eq!(e.from_user_id, user_a);
            assert_eq!(e.session_id, session);
            assert_eq!(e.target_user_id, Some(user_b.clone()));
        }
        other => panic!("expected event, got {other:?}"),
    }
    match recv(&mut reader_a) {
        WireMessage::Ack(ack) => assert_eq!(ack.message, ACK_EVENT_RECEIVED),
        other => panic!("expected confirmation ack, got {other:?}"),
    }

    // C was not the target: the next thing C sees must NOT be that event.
    // Use a broadcast as a fence.
    send(&mut writer_a, &text("fence", &user_a, &session));
    match recv(&mut reader_c) {
        WireMessage::Ack(ack) => assert_eq!(ack.message, "[user_1]: fence"),
        other => panic!("expected fence broadcast, got {other:?}"),
    }

    handle.stop();
}

#[test]
fn server_event_reaches_all_clients() {
    let (handle, tcp_addr, _udp_addr) = start_test_relay();
    let (mut reader_a, _writer_a, _user_a, _) = connect_raw(tcp_addr);
    let (mut reader_b, _writer_b, _user_b, _) = connect_raw(tcp_addr);

    handle.send_event("TEST_EVENT", r#"{"message":"Hello from server!"}"#, None, None);

    for reader in [&mut reader_a, &mut reader_b] {
        match recv(reader) {
            WireMessage::Event(e) => {
                assert_eq!(e.kind, "TEST_EVENT");
                assert_eq!(e.from_user_id, UserId::from("server"));
            }
            other => panic!("expected server event, got {other:?}"),
        }
    }

    handle.stop();
}

#[test]
fn disconnect_cleans_up_registry() {
    let (handle, tcp_addr, _udp_addr) = start_test_relay();
    let (_reader_a, _writer_a, _user_a, _) = connect_raw(tcp_addr);
    let (reader_b, writer_b, _user_b, _) = connect_raw(tcp_addr);
    assert_eq!(handle.client_count(), 2);

    drop(reader_b);
    drop(writer_b);

    // The reader thread notices the close and unregisters user_2.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while handle.client_count() != 1 {
        assert!(
            std::time::Instant::now() < deadline,
            "user_2 was not cleaned up"
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    // Identities are never reused: the next client gets user_3.
    let (_reader_c, _writer_c, user_c, _) = connect_raw(tcp_addr);
    assert_eq!(user_c, UserId::from("user_3"));

    handle.stop();
}

#[test]
fn pose_datagrams_relayed_unmodified() {
    let (handle, tcp_addr, udp_addr) = start_test_relay();

    // Registered reliable identities are required before the relay retains
    // any unreliable address.
    let (_reader_a, _writer_a, user_a, session) = connect_raw(tcp_addr);
    let (_reader_b, _writer_b, user_b, _) = connect_raw(tcp_addr);

    let udp_a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let udp_b = UdpSocket::bind("127.0.0.1:0").unwrap();
    udp_a.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    udp_b.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let pose_from = |user: &UserId, x: f32| {
        codec::encode_pose(&copresence_protocol::PoseUpdate {
            user_id: user.clone(),
            session_id: session.clone(),
            pose: copresence_protocol::Pose::new([x, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]),
            timestamp_ms: 42,
            user_index: user.index(),
            object_index: 0,
        })
        .unwrap()
    };

    // First datagrams teach the relay both addresses.
    udp_a.send_to(&pose_from(&user_a, 0.0), udp_addr).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    udp_b.send_to(&pose_from(&user_b, 0.0), udp_addr).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    // A's next pose must arrive at B byte-identical.
    let datagram = pose_from(&user_a, 1.0);
    udp_a.send_to(&datagram, udp_addr).unwrap();

    let mut buf = [0u8; 2048];
    let (len, _) = udp_b.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], datagram.as_slice());

    // A unknown-tagged datagram is dropped: B must receive nothing more.
    udp_a.send_to(b"XXXX[garbage]", udp_addr).unwrap();
    udp_b
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    assert!(udp_b.recv_from(&mut buf).is_err());

    handle.stop();
}
