// Client-side sync engine.
//
// `SyncClient` opens both channels together: a reliable TCP connection to
// port P and a UDP socket targeted at P+1. The greeting ack read during
// `connect()` carries the server-assigned user id and session id — until it
// arrives the client has no identity, so the read happens synchronously on
// the calling thread, mirroring the server's accept-time greeting.
//
// After the handshake two background threads run:
// - the reliable receive loop decodes acks/events into an `mpsc` inbox that
//   `poll()` drains non-blocking;
// - the unreliable receive loop decodes pose datagrams into the shared
//   `PoseStore`, keeping only the latest update per sender (in first
//   encounter order, which the fallback reconciliation strategy relies on).
//   Updates echoing the client's own user id are discarded unless
//   `accept_own_poses` is set.
//
// Outbound pose broadcasting is host-tick driven: the embedding application
// calls `update()` every tick and the engine rate-limits to the configured
// interval, sending one `PoseUpdate` per tracked entity.

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};

use copresence_protocol::{
    Event, Pose, PoseUpdate, SessionId, TextMessage, UserId, WireMessage, codec, read_frame,
    write_frame,
};

use crate::config::{Endpoint, SyncConfig};
use crate::error::{RelayError, Result};
use crate::reconcile;
use crate::registry::relock;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const UDP_POLL_INTERVAL: Duration = Duration::from_millis(250);
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Latest pose update per sender, in the order senders were first observed.
/// The encounter order feeds the fallback reconciliation strategy.
#[derive(Default)]
pub struct PoseStore {
    entries: Vec<(UserId, PoseUpdate)>,
}

impl PoseStore {
    pub fn upsert(&mut self, update: PoseUpdate) {
        match self
            .entries
            .iter_mut()
            .find(|(user, _)| *user == update.user_id)
        {
            Some((_, existing)) => *existing = update,
            None => self.entries.push((update.user_id.clone(), update)),
        }
    }

    pub fn latest(&self, user: &UserId) -> Option<&PoseUpdate> {
        self.entries
            .iter()
            .find(|(u, _)| u == user)
            .map(|(_, update)| update)
    }

    /// All latest updates in sender encounter order.
    pub fn snapshot(&self) -> Vec<PoseUpdate> {
        self.entries.iter().map(|(_, u)| u.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One locally owned entity whose pose is broadcast each interval.
struct TrackedEntity {
    object_index: u32,
    pose: Pose,
}

pub struct SyncClient {
    config: SyncConfig,
    user_id: UserId,
    session_id: SessionId,
    user_index: u32,
    writer: BufWriter<TcpStream>,
    inbox: Receiver<WireMessage>,
    udp: UdpSocket,
    poses: Arc<Mutex<PoseStore>>,
    entities: Vec<TrackedEntity>,
    last_broadcast: Option<Instant>,
    running: Arc<AtomicBool>,
    _tcp_thread: Option<JoinHandle<()>>,
    _udp_thread: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// Connect both channels and learn the assigned identity from the
    /// greeting ack. The UDP socket is bound to an ephemeral local port and
    /// connected to the server's unreliable port (reliable port + 1).
    pub fn connect(config: SyncConfig) -> Result<Self> {
        let endpoint = Endpoint::parse(&config.server_url);
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let mut reader = BufReader::new(stream.try_clone()?);

        let greeting = match read_frame(&mut reader) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // The server accepted and immediately closed on us.
                return Err(RelayError::ChannelClosed);
            }
            Err(e) => return Err(e.into()),
        };
        let (user_id, session_id) = match codec::decode(&greeting)? {
            WireMessage::Ack(ack) => (ack.from_user_id, ack.session_id),
            other => {
                return Err(RelayError::Handshake(format!(
                    "expected greeting ack, got {} frame",
                    other.kind_name()
                )));
            }
        };
        info!("connected as {user_id} in session {session_id}");

        // Clear the handshake timeout for the long-lived receive loop.
        reader.get_ref().set_read_timeout(None)?;

        let udp = UdpSocket::bind(("0.0.0.0", 0))?;
        udp.connect((endpoint.host.as_str(), endpoint.port.wrapping_add(1)))?;
        let udp_reader = udp.try_clone()?;
        udp_reader.set_read_timeout(Some(UDP_POLL_INTERVAL))?;

        let running = Arc::new(AtomicBool::new(true));
        let poses = Arc::new(Mutex::new(PoseStore::default()));

        let (tx, inbox) = mpsc::channel();
        let tcp_thread = {
            let running = Arc::clone(&running);
            thread::spawn(move || reliable_receive_loop(reader, &tx, &running))
        };
        let udp_thread = {
            let running = Arc::clone(&running);
            let poses = Arc::clone(&poses);
            let own_id = user_id.clone();
            let accept_own = config.accept_own_poses;
            thread::spawn(move || {
                unreliable_receive_loop(&udp_reader, &poses, &own_id, accept_own, &running);
            })
        };

        let user_index = user_id.index();
        Ok(Self {
            config,
            user_id,
            session_id,
            user_index,
            writer: BufWriter::new(stream),
            inbox,
            udp,
            poses,
            entities: Vec::new(),
            last_broadcast: None,
            running,
            _tcp_thread: Some(tcp_thread),
            _udp_thread: Some(udp_thread),
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn user_index(&self) -> u32 {
        self.user_index
    }

    /// Send a text line over the reliable channel.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        let msg = TextMessage {
            text: text.to_owned(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        };
        let frame = codec::encode_text(&msg)?;
        write_frame(&mut self.writer, &frame)?;
        Ok(())
    }

    /// Send an application event over the reliable channel. The relay
    /// re-stamps the origin fields, so only the targets matter here.
    pub fn send_event(
        &mut self,
        kind: &str,
        payload: &str,
        target_session: Option<SessionId>,
        target_user: Option<UserId>,
    ) -> Result<()> {
        let event = Event {
            kind: kind.to_owned(),
            payload: payload.to_owned(),
            from_user_id: self.user_id.clone(),
            target_session_id: target_session,
            target_user_id: target_user,
            timestamp_ms: Utc::now().timestamp_millis(),
            session_id: self.session_id.clone(),
        };
        let frame = codec::encode_event(&event)?;
        write_frame(&mut self.writer, &frame)?;
        Ok(())
    }

    /// Drain all queued reliable-channel messages (non-blocking).
    pub fn poll(&mut self) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Start broadcasting (or reposition) a locally owned entity. The
    /// `object_index` is the stable slot the entity occupies on every peer.
    pub fn track_entity(&mut self, object_index: u32, pose: Pose) {
        match self
            .entities
            .iter_mut()
            .find(|e| e.object_index == object_index)
        {
            Some(entity) => entity.pose = pose,
            None => self.entities.push(TrackedEntity { object_index, pose }),
        }
    }

    /// Update an already tracked entity's pose. Returns false when the
    /// entity is not tracked.
    pub fn set_entity_pose(&mut self, object_index: u32, pose: Pose) -> bool {
        match self
            .entities
            .iter_mut()
            .find(|e| e.object_index == object_index)
        {
            Some(entity) => {
                entity.pose = pose;
                true
            }
            None => false,
        }
    }

    /// Per-tick driver: broadcast one pose update per tracked entity when
    /// the configured interval has elapsed (interval 0 broadcasts on every
    /// call). Send failures on individual datagrams are logged and do not
    /// stop the remaining entities.
    pub fn update(&mut self) -> Result<()> {
        let interval = Duration::from_millis(self.config.pose_interval_ms);
        let due = match self.last_broadcast {
            None => true,
            Some(at) => at.elapsed() >= interval,
        };
        if !due || self.entities.is_empty() {
            return Ok(());
        }
        self.last_broadcast = Some(Instant::now());

        let timestamp_ms = Utc::now().timestamp_millis();
        for entity in &self.entities {
            let update = PoseUpdate {
                user_id: self.user_id.clone(),
                session_id: self.session_id.clone(),
                pose: entity.pose,
                timestamp_ms,
                user_index: self.user_index,
                object_index: entity.object_index,
            };
            let datagram = codec::encode_pose(&update)?;
            if let Err(e) = self.udp.send(&datagram) {
                warn!(
                    "pose broadcast for object {} failed: {e}",
                    entity.object_index
                );
            }
        }
        Ok(())
    }

    /// Latest received updates, one per sender in encounter order.
    pub fn received_poses(&self) -> Vec<PoseUpdate> {
        relock(self.poses.lock()).snapshot()
    }

    /// Blend the local pose slots toward the received updates using the
    /// configured smoothing factor.
    pub fn reconcile(&self, targets: &mut [Pose]) {
        let updates = self.received_poses();
        reconcile::reconcile(targets, &updates, self.config.smoothing);
    }

    /// Close both channels. Safe to call more than once; also runs on drop.
    pub fn disconnect(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.writer.get_ref().shutdown(Shutdown::Both) {
            debug!("shutdown of reliable stream: {e}");
        }
        info!("disconnected from session {}", self.session_id);
    }

    /// Drop the current connections and establish fresh ones. The server
    /// assigns a new identity — the old user id is gone for good.
    pub fn reconnect(&mut self) -> Result<()> {
        self.disconnect();
        *self = Self::connect(self.config.clone())?;
        Ok(())
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Reliable receive loop: framed read → decode → inbox. Malformed frames
/// are dropped; a read error or closed inbox ends the loop.
fn reliable_receive_loop(
    mut reader: BufReader<TcpStream>,
    tx: &Sender<WireMessage>,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        match read_frame(&mut reader) {
            Ok(bytes) => match codec::decode(&bytes) {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break; // Engine dropped the receiver.
                    }
                }
                Err(e) => warn!("malformed frame from relay dropped: {e}"),
            },
            Err(_) => break,
        }
    }
}

/// Unreliable receive loop: pose datagrams into the store. Anything that is
/// not a well-formed pose frame is dropped silently.
fn unreliable_receive_loop(
    socket: &UdpSocket,
    poses: &Mutex<PoseStore>,
    own_id: &UserId,
    accept_own: bool,
    running: &AtomicBool,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    while running.load(Ordering::SeqCst) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(_) => break,
        };
        let datagram = &buf[..len];
        if datagram.len() < codec::TAG_LEN || &datagram[..codec::TAG_LEN] != codec::TAG_POSE {
            continue;
        }
        match codec::decode_pose_payload(&datagram[codec::TAG_LEN..]) {
            Ok(update) => {
                if update.user_id == *own_id && !accept_own {
                    debug!("discarding echoed own pose");
                    continue;
                }
                relock(poses.lock()).upsert(update);
            }
            Err(e) => debug!("malformed pose datagram dropped: {e}"),
        }
    }
}
