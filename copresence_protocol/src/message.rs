// Protocol messages for client-relay communication.
//
// Four message kinds cover the whole vocabulary (see `codec.rs` for the wire
// layout of each):
// - `TextMessage`: client → relay, a plain text line for the other clients.
// - `TextAck`: relay → client — both the per-request confirmation and the
//   vehicle for forwarded text (`"[user_1]: hi"`) and the initial greeting
//   that carries the assigned user id.
// - `Event`: bidirectional application event with optional session/user
//   targeting. The payload is an opaque string the relay never inspects —
//   clients typically put a serde_json document in it.
// - `PoseUpdate`: bidirectional spatial pose sample, relayed unmodified over
//   the unreliable channel.
//
// All kinds are immutable once constructed; the relay re-stamps authoritative
// fields (`from_user_id`, `session_id`) by building a fresh value.

use crate::types::{Pose, SessionId, UserId};

/// Greeting text sent to a client right after accept; the carrying ack's
/// `from_user_id` is the client's newly assigned identity.
pub const ACK_CONNECTED: &str = "connected";
/// Confirmation for a received `TextMessage`.
pub const ACK_TEXT_RECEIVED: &str = "message received";
/// Confirmation for a received `Event`.
pub const ACK_EVENT_RECEIVED: &str = "event received";

/// Plain text line from a client.
#[derive(Clone, Debug, PartialEq)]
pub struct TextMessage {
    pub text: String,
    pub user_id: UserId,
    pub session_id: SessionId,
}

/// Relay acknowledgment / forwarded text.
#[derive(Clone, Debug, PartialEq)]
pub struct TextAck {
    pub message: String,
    /// Human-readable wall-clock stamp (`%Y-%m-%d %H:%M:%S`).
    pub timestamp: String,
    pub success: bool,
    pub session_id: SessionId,
    pub from_user_id: UserId,
}

/// Application event with optional targeting. `None` targets mean "all other
/// clients"; they encode as the empty string on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: String,
    pub payload: String,
    pub from_user_id: UserId,
    pub target_session_id: Option<SessionId>,
    pub target_user_id: Option<UserId>,
    pub timestamp_ms: i64,
    pub session_id: SessionId,
}

/// One pose sample for one tracked entity.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseUpdate {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub pose: Pose,
    pub timestamp_ms: i64,
    /// Compact numeric form of the sender's user id suffix.
    pub user_index: u32,
    /// Stable per-entity slot index chosen by the sender.
    pub object_index: u32,
}

/// Any decoded wire message. `codec::decode` dispatches on the leading tag
/// and returns one of these.
#[derive(Clone, Debug, PartialEq)]
pub enum WireMessage {
    Text(TextMessage),
    Ack(TextAck),
    Event(Event),
    Pose(PoseUpdate),
}

impl WireMessage {
    /// Short kind name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            WireMessage::Text(_) => "text",
            WireMessage::Ack(_) => "ack",
            WireMessage::Event(_) => "event",
            WireMessage::Pose(_) => "pose",
        }
    }
}
