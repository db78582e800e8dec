// Binary codec for the four message kinds.
//
// Wire layout: every encoded message is a 4-byte ASCII type tag followed by
// a MessagePack fixed-arity array of the kind's fields in declaration order.
// The array is positional, not a self-describing map. Decoding checks the
// exact element count and types; anything else is a `CodecError`.
//
// Tags:
//   "TMSG" TextMessage  — 3 fields: text, user, session
//   "TACK" TextAck      — 5 fields: message, timestamp, success, session, from
//   "EVNT" Event        — 7 fields: kind, payload, from, target_session,
//                          target_user, timestamp_ms, session
//   "TRNS" PoseUpdate   — 12 fields: user, session, px, py, pz, ox, oy, oz,
//                          ow, timestamp_ms, user_index, object_index
//
// The leading tag doubles as the unreliable-channel datagram header: a pose
// datagram is exactly `encode_pose()` output, and the relay forwards those
// bytes untouched. Optional event targets encode as the empty string.
//
// Floats are MessagePack f32 (IEEE-754 binary32), so any 32-bit value
// round-trips bit-exactly. Pure transform: no I/O, no side effects.

use serde::{Deserialize, Serialize};

use crate::message::{Event, PoseUpdate, TextAck, TextMessage, WireMessage};
use crate::types::{Pose, SessionId, UserId};

pub const TAG_LEN: usize = 4;
pub const TAG_TEXT: &[u8; 4] = b"TMSG";
pub const TAG_ACK: &[u8; 4] = b"TACK";
pub const TAG_EVENT: &[u8; 4] = b"EVNT";
pub const TAG_POSE: &[u8; 4] = b"TRNS";

/// Decode failure. Every variant leaves the input untouched; callers drop
/// the frame and keep the connection open.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame too short for a type tag ({0} bytes)")]
    TooShort(usize),

    #[error("unknown type tag {}", String::from_utf8_lossy(.0))]
    UnknownTag([u8; 4]),

    #[error("malformed {kind} payload: {source}")]
    Malformed {
        kind: &'static str,
        source: rmp_serde::decode::Error,
    },

    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

// Positional wire tuples, decode-side. Kept private so the struct types in
// `message.rs` stay the only public vocabulary.

type TextWire = (String, String, String);
type AckWire = (String, String, bool, String, String);
type EventWire = (String, String, String, String, String, i64, String);
#[rustfmt::skip]
type PoseWire = (
    String, String,
    f32, f32, f32,
    f32, f32, f32, f32,
    i64, u32, u32,
);

fn frame<T: Serialize>(tag: &[u8; 4], fields: &T) -> Result<Vec<u8>, CodecError> {
    let payload = rmp_serde::to_vec(fields)?;
    let mut out = Vec::with_capacity(TAG_LEN + payload.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn unframe<'a, T: Deserialize<'a>>(
    kind: &'static str,
    payload: &'a [u8],
) -> Result<T, CodecError> {
    rmp_serde::from_slice(payload).map_err(|source| CodecError::Malformed { kind, source })
}

fn target_to_wire(session: &Option<SessionId>, user: &Option<UserId>) -> (String, String) {
    (
        session.as_ref().map(|s| s.0.clone()).unwrap_or_default(),
        user.as_ref().map(|u| u.0.clone()).unwrap_or_default(),
    )
}

fn wire_to_targets(session: String, user: String) -> (Option<SessionId>, Option<UserId>) {
    (
        (!session.is_empty()).then_some(SessionId(session)),
        (!user.is_empty()).then_some(UserId(user)),
    )
}

pub fn encode_text(m: &TextMessage) -> Result<Vec<u8>, CodecError> {
    let fields: (&str, &str, &str) = (&m.text, &m.user_id.0, &m.session_id.0);
    frame(TAG_TEXT, &fields)
}

pub fn encode_ack(m: &TextAck) -> Result<Vec<u8>, CodecError> {
    let fields: (&str, &str, bool, &str, &str) = (
        &m.message,
        &m.timestamp,
        m.success,
        &m.session_id.0,
        &m.from_user_id.0,
    );
    frame(TAG_ACK, &fields)
}

pub fn encode_event(m: &Event) -> Result<Vec<u8>, CodecError> {
    let (target_session, target_user) = target_to_wire(&m.target_session_id, &m.target_user_id);
    let fields: (&str, &str, &str, &str, &str, i64, &str) = (
        &m.kind,
        &m.payload,
        &m.from_user_id.0,
        &target_session,
        &target_user,
        m.timestamp_ms,
        &m.session_id.0,
    );
    frame(TAG_EVENT, &fields)
}

pub fn encode_pose(m: &PoseUpdate) -> Result<Vec<u8>, CodecError> {
    let [px, py, pz] = m.pose.position;
    let [ox, oy, oz, ow] = m.pose.orientation;
    #[rustfmt::skip]
    let fields: (&str, &str, f32, f32, f32, f32, f32, f32, f32, i64, u32, u32) = (
        &m.user_id.0, &m.session_id.0,
        px, py, pz,
        ox, oy, oz, ow,
        m.timestamp_ms, m.user_index, m.object_index,
    );
    frame(TAG_POSE, &fields)
}

/// Encode any message kind with its tag.
pub fn encode(msg: &WireMessage) -> Result<Vec<u8>, CodecError> {
    match msg {
        WireMessage::Text(m) => encode_text(m),
        WireMessage::Ack(m) => encode_ack(m),
        WireMessage::Event(m) => encode_event(m),
        WireMessage::Pose(m) => encode_pose(m),
    }
}

/// Decode a complete tagged frame into the matching message kind.
pub fn decode(bytes: &[u8]) -> Result<WireMessage, CodecError> {
    if bytes.len() < TAG_LEN {
        return Err(CodecError::TooShort(bytes.len()));
    }
    let (tag_bytes, payload) = bytes.split_at(TAG_LEN);
    let tag = [tag_bytes[0], tag_bytes[1], tag_bytes[2], tag_bytes[3]];
    match &tag {
        t if t == TAG_TEXT => decode_text_payload(payload).map(WireMessage::Text),
        t if t == TAG_ACK => decode_ack_payload(payload).map(WireMessage::Ack),
        t if t == TAG_EVENT => decode_event_payload(payload).map(WireMessage::Event),
        t if t == TAG_POSE => decode_pose_payload(payload).map(WireMessage::Pose),
        _ => Err(CodecError::UnknownTag(tag)),
    }
}

pub fn decode_text_payload(payload: &[u8]) -> Result<TextMessage, CodecError> {
    let (text, user, session): TextWire = unframe("text", payload)?;
    Ok(TextMessage {
        text,
        user_id: UserId(user),
        session_id: SessionId(session),
    })
}

pub fn decode_ack_payload(payload: &[u8]) -> Result<TextAck, CodecError> {
    let (message, timestamp, success, session, from): AckWire = unframe("ack", payload)?;
    Ok(TextAck {
        message,
        timestamp,
        success,
        session_id: SessionId(session),
        from_user_id: UserId(from),
    })
}

pub fn decode_event_payload(payload: &[u8]) -> Result<Event, CodecError> {
    let (kind, body, from, target_session, target_user, timestamp_ms, session): EventWire =
        unframe("event", payload)?;
    let (target_session_id, target_user_id) = wire_to_targets(target_session, target_user);
    Ok(Event {
        kind,
        payload: body,
        from_user_id: UserId(from),
        target_session_id,
        target_user_id,
        timestamp_ms,
        session_id: SessionId(session),
    })
}

/// Decode the portion of a pose frame after the tag. The unreliable relay
/// calls this directly after splitting off the datagram header.
pub fn decode_pose_payload(payload: &[u8]) -> Result<PoseUpdate, CodecError> {
    let (user, session, px, py, pz, ox, oy, oz, ow, timestamp_ms, user_index, object_index): PoseWire =
        unframe("pose", payload)?;
    Ok(PoseUpdate {
        user_id: UserId(user),
        session_id: SessionId(session),
        pose: Pose::new([px, py, pz], [ox, oy, oz, ow]),
        timestamp_ms,
        user_index,
        object_index,
    })
}
