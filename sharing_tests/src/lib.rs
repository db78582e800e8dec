// Test-only client wrapper for relay integration tests.
//
// Wraps the real `SyncClient` (from `copresence_relay::client`) with
// synchronous polling helpers so test scenarios read top to bottom:
// connect → send → wait for the expected ack/event/pose → assert. All
// networking uses the same code paths as an embedding application — the only
// test-specific code is the blocking loops around `poll()` and
// `received_poses()`.
//
// See `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use copresence_protocol::{PoseUpdate, TextAck, UserId, WireMessage};
use copresence_relay::client::SyncClient;
use copresence_relay::config::SyncConfig;

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A test client wrapping a real `SyncClient`.
pub struct TestClient {
    pub client: SyncClient,
}

impl TestClient {
    /// Connect to a relay with the given tweaks applied to a default config.
    pub fn connect(tcp_addr: SocketAddr, tweak: impl FnOnce(&mut SyncConfig)) -> Self {
        let mut config = SyncConfig {
            server_url: tcp_addr.to_string(),
            // Tests drive `update()` explicitly, so broadcast on every call.
            pose_interval_ms: 0,
            ..SyncConfig::default()
        };
        tweak(&mut config);
        let client = SyncClient::connect(config).expect("TestClient::connect failed");
        Self { client }
    }

    pub fn user_id(&self) -> UserId {
        self.client.user_id().clone()
    }

    /// Blocking poll until an ack matching the predicate arrives. Other
    /// messages are discarded.
    pub fn wait_for_ack(&mut self, what: &str, pred: impl Fn(&TextAck) -> bool) -> TextAck {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for ack: {what}"
            );
            for msg in self.client.poll() {
                if let WireMessage::Ack(ack) = msg
                    && pred(&ack)
                {
                    return ack;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until an event of the given kind arrives.
    pub fn wait_for_event(&mut self, kind: &str) -> copresence_protocol::Event {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for event {kind}"
            );
            for msg in self.client.poll() {
                if let WireMessage::Event(event) = msg
                    && event.kind == kind
                {
                    return event;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Drain anything queued on the reliable channel without blocking.
    pub fn drain(&mut self) -> Vec<WireMessage> {
        self.client.poll()
    }

    /// Block until a pose from `from` lands in our store. Both this client
    /// and the given peers rebroadcast their entities each iteration, so the
    /// relay keeps learning addresses and the sender keeps sending.
    pub fn wait_for_pose_from(&mut self, from: &UserId, peers: &mut [&mut TestClient]) -> PoseUpdate {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for pose from {from}"
            );
            self.client.update().expect("pose broadcast failed");
            for peer in peers.iter_mut() {
                peer.client.update().expect("peer pose broadcast failed");
            }
            if let Some(update) = self
                .client
                .received_poses()
                .into_iter()
                .find(|u| &u.user_id == from)
            {
                return update;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }
}
