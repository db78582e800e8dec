// Dual-channel relay server.
//
// Architecture: blocking I/O with one OS thread per loop.
//
// - **Accept loop** (one thread): non-blocking `TcpListener::accept()` with a
//   short sleep so the running flag is observed. Each accepted connection is
//   assigned the next `user_<n>` identity, registered, greeted with an ack
//   carrying its id and the session id, and handed a dedicated reader thread.
// - **Connection loops** (one thread per client): framed read → decode →
//   dispatch. Text and events fan out through the `MessageRouter`; the sender
//   gets a confirmation ack. Malformed frames are dropped with the connection
//   left open. Read error or EOF ends the loop and unregisters the user —
//   final on the server side, no reconnection.
// - **Unreliable relay loop** (one thread, one UDP socket on port P+1):
//   learns each sender's address from its pose datagrams and forwards the
//   original bytes to every other known address. Uses a receive timeout so
//   the running flag is observed.
//
// Shutdown: `RelayHandle::stop` flips the flag and shuts down the registered
// streams — blocked reads are unblocked by the socket shutdown, not the flag
// alone. Per-connection writes go through `Arc<Mutex<TcpStream>>` handles so
// concurrent fan-outs from different reader threads cannot interleave a
// frame.

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Local, Utc};
use log::{debug, error, info, warn};

use copresence_protocol::{
    ACK_CONNECTED, ACK_EVENT_RECEIVED, ACK_TEXT_RECEIVED, Event, SessionId, UserId, WireMessage,
    codec, read_frame,
};

use crate::config::{Endpoint, RelayConfig};
use crate::error::Result;
use crate::registry::{ConnectionRegistry, relock};
use crate::router::{MessageRouter, SharedWriter};

/// `from_user_id` stamped on server-originated events.
pub const SERVER_USER: &str = "server";

/// Largest accepted unreliable datagram. Pose frames are ~100 bytes; this
/// leaves room for growth without risking fragmentation.
const MAX_DATAGRAM_SIZE: usize = 2048;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const UDP_POLL_INTERVAL: Duration = Duration::from_millis(250);

type Registry = ConnectionRegistry<SharedWriter<TcpStream>>;
type Router = MessageRouter<TcpStream>;

/// Fresh session identifier: `session_<YYYYMMDD>_<HHMMSS>_<4 digits>`.
pub fn generate_session_id() -> SessionId {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    SessionId(format!("session_{stamp}_{}", fastrand::u32(1000..=9999)))
}

/// Handle returned by `start_relay` to observe and stop the running server.
pub struct RelayHandle {
    running: Arc<AtomicBool>,
    registry: Arc<Registry>,
    router: Arc<Router>,
    accept_thread: Option<JoinHandle<()>>,
    udp_thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn session_id(&self) -> &SessionId {
        self.router.session_id()
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Send a server-originated event to connected clients, honoring the
    /// same session/user targeting as client events. `from_user_id` is the
    /// literal `server`, which never matches a client, so everyone eligible
    /// receives it.
    pub fn send_event(
        &self,
        kind: &str,
        payload: &str,
        target_session: Option<SessionId>,
        target_user: Option<UserId>,
    ) {
        let from = UserId::from(SERVER_USER);
        let event = Event {
            kind: kind.to_owned(),
            payload: payload.to_owned(),
            from_user_id: from.clone(),
            target_session_id: target_session,
            target_user_id: target_user,
            timestamp_ms: Utc::now().timestamp_millis(),
            session_id: self.router.session_id().clone(),
        };
        self.router.forward_event(&from, &event);
    }

    /// Stop the relay: flip the running flag, shut down client streams so
    /// blocked reads wake up, and join the two long-lived loops. The session
    /// ends here — a restarted relay generates a new session id.
    pub fn stop(mut self) {
        info!("relay stopping, session {} closed", self.session_id());
        self.running.store(false, Ordering::SeqCst);
        for (user, handle) in self.registry.reliable_targets(None) {
            if let Err(e) = relock(handle.lock()).shutdown(Shutdown::Both) {
                debug!("shutdown of {user} stream: {e}");
            }
        }
        if let Some(t) = self.accept_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.udp_thread.take() {
            let _ = t.join();
        }
    }
}

/// Start the relay. The reliable channel listens on the configured port P,
/// the unreliable channel binds P+1. Returns the handle and both bound
/// addresses (useful with port 0 in tests). Socket binding is the only
/// fatal failure; later per-connection errors are recovered.
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr, SocketAddr)> {
    let endpoint = Endpoint::parse(&config.server_url);
    let bind_ip = endpoint.bind_ip();

    let listener = TcpListener::bind((bind_ip, endpoint.port))?;
    let tcp_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let udp = UdpSocket::bind((bind_ip, tcp_addr.port().wrapping_add(1)))?;
    let udp_addr = udp.local_addr()?;
    udp.set_read_timeout(Some(UDP_POLL_INTERVAL))?;

    let session_id = config
        .session_id
        .map(SessionId)
        .unwrap_or_else(generate_session_id);
    info!("relay session {session_id}: reliable {tcp_addr}, unreliable {udp_addr}");

    let running = Arc::new(AtomicBool::new(true));
    let registry: Arc<Registry> = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(MessageRouter::new(Arc::clone(&registry), session_id));

    let accept_thread = {
        let registry = Arc::clone(&registry);
        let router = Arc::clone(&router);
        let running = Arc::clone(&running);
        thread::spawn(move || accept_loop(&listener, &registry, &router, &running))
    };

    let udp_thread = {
        let registry = Arc::clone(&registry);
        let running = Arc::clone(&running);
        thread::spawn(move || unreliable_relay_loop(&udp, &registry, &running))
    };

    Ok((
        RelayHandle {
            running,
            registry,
            router,
            accept_thread: Some(accept_thread),
            udp_thread: Some(udp_thread),
        },
        tcp_addr,
        udp_addr,
    ))
}

/// Accept loop: assign identities and spawn connection loops. The user
/// counter is 1-based and never resets, so identifiers are unique for the
/// whole server lifetime.
fn accept_loop(
    listener: &TcpListener,
    registry: &Arc<Registry>,
    router: &Arc<Router>,
    running: &Arc<AtomicBool>,
) {
    let mut next_user: u64 = 1;
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).ok();
                let user = UserId::from_counter(next_user);
                next_user += 1;
                if let Err(e) = admit_connection(stream, peer, user, registry, router, running) {
                    warn!("rejecting connection from {peer}: {e}");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("accept failed: {e}");
                }
                break;
            }
        }
    }
}

/// Register a freshly accepted connection, send the greeting ack carrying
/// the assigned identity, and spawn its receive loop.
fn admit_connection(
    stream: TcpStream,
    peer: SocketAddr,
    user: UserId,
    registry: &Arc<Registry>,
    router: &Arc<Router>,
    running: &Arc<AtomicBool>,
) -> Result<()> {
    let write_half = stream.try_clone()?;
    registry.register(user.clone(), Arc::new(Mutex::new(write_half)))?;
    info!("client connected from {peer} as {user}");
    router.send_ack(&user, ACK_CONNECTED);

    let registry = Arc::clone(registry);
    let router = Arc::clone(router);
    let running = Arc::clone(running);
    thread::spawn(move || connection_loop(stream, &user, &registry, &router, &running));
    Ok(())
}

/// Receive loop for one reliable connection. Frames are processed in receipt
/// order; the loop ends on read error, peer close, or shutdown, and always
/// unregisters the user on the way out.
fn connection_loop(
    stream: TcpStream,
    user: &UserId,
    registry: &Registry,
    router: &Router,
    running: &AtomicBool,
) {
    let mut reader = BufReader::new(stream);
    while running.load(Ordering::SeqCst) {
        let bytes = match read_frame(&mut reader) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("{user} disconnected");
                break;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    warn!("{user} connection faulted: {e}");
                }
                break;
            }
        };
        match codec::decode(&bytes) {
            Ok(WireMessage::Text(text)) => {
                debug!("text from {user}: {:?}", text.text);
                router.broadcast_text(user, &text.text);
                router.send_ack(user, ACK_TEXT_RECEIVED);
            }
            Ok(WireMessage::Event(event)) => {
                debug!("event from {user}: {}", event.kind);
                router.forward_event(user, &event);
                router.send_ack(user, ACK_EVENT_RECEIVED);
            }
            Ok(other) => {
                warn!(
                    "unexpected {} frame from {user} on the reliable channel, dropped",
                    other.kind_name()
                );
            }
            Err(e) => {
                warn!("malformed frame from {user} dropped: {e}");
            }
        }
    }
    registry.unregister(user);
}

/// Unreliable relay loop: one socket, learned addresses, raw fan-out.
///
/// Forwarded datagrams are the sender's original bytes — the relay decodes
/// only far enough to learn who sent the pose. Each forward attempt is
/// independent; one recipient's failure never blocks the others.
fn unreliable_relay_loop(socket: &UdpSocket, registry: &Registry, running: &AtomicBool) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    while running.load(Ordering::SeqCst) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("unreliable receive failed: {e}");
                }
                break;
            }
        };

        let datagram = &buf[..len];
        if datagram.len() < codec::TAG_LEN {
            continue;
        }
        let (tag, payload) = datagram.split_at(codec::TAG_LEN);
        if tag != codec::TAG_POSE {
            debug!("dropping datagram with unknown tag from {src}");
            continue;
        }
        let pose = match codec::decode_pose_payload(payload) {
            Ok(pose) => pose,
            Err(e) => {
                debug!("malformed pose datagram from {src} dropped: {e}");
                continue;
            }
        };

        registry.learn_unreliable_addr(&pose.user_id, src);
        for (user, addr) in registry.unreliable_targets(Some(&pose.user_id)) {
            if let Err(e) = socket.send_to(datagram, addr) {
                warn!("pose forward to {user} at {addr} failed: {e}");
            }
        }
    }
}
