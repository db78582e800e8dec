// Fan-out and filtering for the reliable channel.
//
// The router is stateless beyond what the registry provides: it takes a
// decoded message, applies sender exclusion and the per-recipient session /
// user filters, re-stamps the authoritative fields, and writes the encoded
// frame to each destination. A failed write to one recipient is logged and
// never aborts the rest of the fan-out or the sender's own acknowledgment.
//
// Writers are shared `Arc<Mutex<W>>` handles so concurrent fan-outs from
// different receive loops cannot interleave bytes within one frame. Generic
// over `W: Write` — the server uses TCP streams, unit tests in-memory
// buffers.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::Local;
use log::{debug, warn};

use copresence_protocol::{Event, SessionId, TextAck, UserId, codec, write_frame};

use crate::registry::{ConnectionRegistry, relock};

/// Shared per-connection writer. The mutex scope is one frame write.
pub type SharedWriter<W> = Arc<Mutex<W>>;

/// Human-readable wall-clock stamp carried in acks.
pub fn human_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct MessageRouter<W> {
    registry: Arc<ConnectionRegistry<SharedWriter<W>>>,
    session_id: SessionId,
}

impl<W: Write> MessageRouter<W> {
    pub fn new(registry: Arc<ConnectionRegistry<SharedWriter<W>>>, session_id: SessionId) -> Self {
        Self {
            registry,
            session_id,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Forward a text line from `from` to every other reliable connection,
    /// re-shaped as a `TextAck` whose message reads `"[<from>]: <text>"`.
    pub fn broadcast_text(&self, from: &UserId, text: &str) {
        let ack = TextAck {
            message: format!("[{from}]: {text}"),
            timestamp: human_timestamp(),
            success: true,
            session_id: self.session_id.clone(),
            from_user_id: from.clone(),
        };
        let frame = match codec::encode_ack(&ack) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to encode text broadcast from {from}: {e}");
                return;
            }
        };
        for (user, handle) in self.registry.reliable_targets(Some(from)) {
            self.write_to(&user, &handle, &frame);
        }
    }

    /// Forward an event from `from`, honoring the per-recipient filters.
    /// `from_user_id` and `session_id` are re-stamped with server
    /// authoritative values — clients cannot spoof them.
    pub fn forward_event(&self, from: &UserId, event: &Event) {
        let stamped = Event {
            from_user_id: from.clone(),
            session_id: self.session_id.clone(),
            ..event.clone()
        };
        let frame = match codec::encode_event(&stamped) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to encode event forward from {from}: {e}");
                return;
            }
        };
        for (user, handle) in self.registry.reliable_targets(Some(from)) {
            if let Some(target_session) = &stamped.target_session_id
                && *target_session != self.session_id
            {
                debug!("skipping {user}: event targets session {target_session}");
                continue;
            }
            if let Some(target_user) = &stamped.target_user_id
                && *target_user != user
            {
                continue;
            }
            self.write_to(&user, &handle, &frame);
        }
    }

    /// Unicast a confirmation ack to one user. The ack's `from_user_id` is
    /// the recipient's own identity — the greeting relies on this to deliver
    /// the assigned id.
    pub fn send_ack(&self, to: &UserId, message: &str) {
        let Some(handle) = self.registry.reliable_handle(to) else {
            debug!("ack to unknown user {to} dropped");
            return;
        };
        let ack = TextAck {
            message: message.to_owned(),
            timestamp: human_timestamp(),
            success: true,
            session_id: self.session_id.clone(),
            from_user_id: to.clone(),
        };
        match codec::encode_ack(&ack) {
            Ok(frame) => self.write_to(to, &handle, &frame),
            Err(e) => warn!("failed to encode ack for {to}: {e}"),
        }
    }

    /// One independent delivery attempt. Failures are logged — the peer's
    /// own receive loop notices the broken connection and cleans up.
    fn write_to(&self, user: &UserId, handle: &SharedWriter<W>, frame: &[u8]) {
        let mut writer = relock(handle.lock());
        if let Err(e) = write_frame(&mut *writer, frame) {
            warn!("forward to {user} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copresence_protocol::codec::decode;
    use copresence_protocol::{WireMessage, read_frame};

    type TestRouter = MessageRouter<Vec<u8>>;

    fn setup(users: &[u64]) -> (Arc<ConnectionRegistry<SharedWriter<Vec<u8>>>>, TestRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        for &n in users {
            registry
                .register(UserId::from_counter(n), Arc::new(Mutex::new(Vec::new())))
                .unwrap();
        }
        let router = MessageRouter::new(Arc::clone(&registry), SessionId::from("S1"));
        (registry, router)
    }

    fn frames_in(handle: &SharedWriter<Vec<u8>>) -> Vec<WireMessage> {
        let buf = relock(handle.lock()).clone();
        let mut cursor = std::io::Cursor::new(buf);
        let mut out = Vec::new();
        while let Ok(bytes) = read_frame(&mut cursor) {
            out.push(decode(&bytes).unwrap());
        }
        out
    }

    fn handle_of(
        registry: &ConnectionRegistry<SharedWriter<Vec<u8>>>,
        n: u64,
    ) -> SharedWriter<Vec<u8>> {
        registry.reliable_handle(&UserId::from_counter(n)).unwrap()
    }

    fn event(target_session: Option<&str>, target_user: Option<&str>) -> Event {
        Event {
            kind: "TEST_EVENT".into(),
            payload: r#"{"message":"Hello"}"#.into(),
            from_user_id: UserId::from("spoofed"),
            target_session_id: target_session.map(SessionId::from),
            target_user_id: target_user.map(UserId::from),
            timestamp_ms: 99,
            session_id: SessionId::from("spoofed_session"),
        }
    }

    #[test]
    fn text_broadcast_excludes_sender() {
        let (registry, router) = setup(&[1, 2, 3]);
        router.broadcast_text(&UserId::from_counter(1), "hi");

        assert!(frames_in(&handle_of(&registry, 1)).is_empty());
        for n in [2, 3] {
            let frames = frames_in(&handle_of(&registry, n));
            assert_eq!(frames.len(), 1);
            match &frames[0] {
                WireMessage::Ack(ack) => {
                    assert_eq!(ack.message, "[user_1]: hi");
                    assert_eq!(ack.from_user_id, UserId::from("user_1"));
                    assert_eq!(ack.session_id, SessionId::from("S1"));
                    assert!(ack.success);
                }
                other => panic!("expected Ack, got {other:?}"),
            }
        }
    }

    #[test]
    fn event_restamps_authoritative_fields() {
        let (registry, router) = setup(&[1, 2]);
        router.forward_event(&UserId::from_counter(1), &event(None, None));

        let frames = frames_in(&handle_of(&registry, 2));
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            WireMessage::Event(e) => {
                assert_eq!(e.from_user_id, UserId::from("user_1"));
                assert_eq!(e.session_id, SessionId::from("S1"));
                assert_eq!(e.kind, "TEST_EVENT");
            }
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn event_user_filter_delivers_to_target_only() {
        let (registry, router) = setup(&[1, 2, 3]);
        router.forward_event(&UserId::from_counter(1), &event(None, Some("user_3")));

        assert!(frames_in(&handle_of(&registry, 1)).is_empty());
        assert!(frames_in(&handle_of(&registry, 2)).is_empty());
        assert_eq!(frames_in(&handle_of(&registry, 3)).len(), 1);
    }

    #[test]
    fn event_targeting_dead_user_reaches_nobody() {
        let (registry, router) = setup(&[1, 2]);
        router.forward_event(&UserId::from_counter(1), &event(None, Some("user_9")));

        assert!(frames_in(&handle_of(&registry, 1)).is_empty());
        assert!(frames_in(&handle_of(&registry, 2)).is_empty());
    }

    #[test]
    fn event_targeting_sender_reaches_nobody() {
        // Sender exclusion wins over the user filter.
        let (registry, router) = setup(&[1, 2]);
        router.forward_event(&UserId::from_counter(1), &event(None, Some("user_1")));

        assert!(frames_in(&handle_of(&registry, 1)).is_empty());
        assert!(frames_in(&handle_of(&registry, 2)).is_empty());
    }

    #[test]
    fn event_session_filter_skips_other_sessions() {
        let (registry, router) = setup(&[1, 2]);
        router.forward_event(&UserId::from_counter(1), &event(Some("other"), None));
        assert!(frames_in(&handle_of(&registry, 2)).is_empty());

        router.forward_event(&UserId::from_counter(1), &event(Some("S1"), None));
        assert_eq!(frames_in(&handle_of(&registry, 2)).len(), 1);
    }

    #[test]
    fn ack_carries_recipient_identity() {
        let (registry, router) = setup(&[1]);
        router.send_ack(&UserId::from_counter(1), "message received");

        let frames = frames_in(&handle_of(&registry, 1));
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            WireMessage::Ack(ack) => {
                assert_eq!(ack.message, "message received");
                assert_eq!(ack.from_user_id, UserId::from("user_1"));
            }
            other => panic!("expected Ack, got {other:?}"),
        }
    }

    #[test]
    fn ack_to_unknown_user_is_dropped() {
        let (_registry, router) = setup(&[1]);
        // No panic, no delivery.
        router.send_ack(&UserId::from("user_42"), "hello");
    }
}
