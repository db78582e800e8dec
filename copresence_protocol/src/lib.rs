// copresence_protocol — wire protocol for the copresence relay.
//
// This crate defines the message types, binary codec, and stream framing
// shared by the relay server (`copresence_relay`) and its clients. It is
// pure data transformation — no sockets, no threads.
//
// Module overview:
// - `types.rs`:   `SessionId`, `UserId`, and `Pose` (position + orientation
//                 with the reconciliation blend step).
// - `message.rs`: The four message kinds — `TextMessage`, `TextAck`,
//                 `Event`, `PoseUpdate` — and the `WireMessage` decode enum.
// - `codec.rs`:   Tagged MessagePack encoding: 4-byte ASCII type tag, then a
//                 fixed-arity positional array per kind.
// - `framing.rs`: 4-byte big-endian length prefix for the reliable stream.
//
// Design decisions:
// - **Explicit type tags.** Every frame leads with its kind; receivers
//   dispatch on the tag instead of probing decoders in sequence.
// - **Positional arrays, not maps.** Each kind has a fixed field count and
//   order, checked on decode. Compact and deterministic.
// - **No async runtime.** Framing works over plain `Read`/`Write`, matching
//   the relay's blocking thread-per-connection model.

pub mod codec;
pub mod framing;
pub mod message;
pub mod types;

pub use codec::{CodecError, decode, encode};
pub use framing::{MAX_FRAME_SIZE, read_frame, write_frame};
pub use message::{
    ACK_CONNECTED, ACK_EVENT_RECEIVED, ACK_TEXT_RECEIVED, Event, PoseUpdate, TextAck, TextMessage,
    WireMessage,
};
pub use types::{Pose, SessionId, UserId};
